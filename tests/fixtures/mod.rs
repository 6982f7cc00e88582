//! Canned visual API responses, shaped like the real service's envelopes.

#![allow(dead_code)]

use serde_json::{json, Value};

/// Eight bytes of PNG signature, base64-encoded.
pub const PNG_BASE64: &str = "iVBORw0KGgo=";

pub fn submitted(task_id: &str) -> Value {
    json!({
        "code": 10000,
        "message": "Success",
        "request_id": "req-1",
        "data": {"task_id": task_id}
    })
}

pub fn submitted_with_urls(urls: &[&str]) -> Value {
    json!({"code": 10000, "data": {"image_urls": urls, "binary_data_base64": []}})
}

pub fn submitted_inline(data: &str) -> Value {
    json!({"code": 10000, "data": {"binary_data_base64": [data]}})
}

pub fn running() -> Value {
    json!({"code": 10000, "data": {"status": "generating"}})
}

pub fn done_with_urls(urls: &[&str]) -> Value {
    json!({"code": 10000, "data": {"status": "done", "image_urls": urls}})
}

/// Success status whose artifact sits in a JSON-encoded `resp_data`.
pub fn done_nested(url: &str) -> Value {
    let nested = json!({"image_urls": [url]}).to_string();
    json!({"code": 10000, "data": {"status": 10000, "resp_data": nested}})
}

/// Success status without any artifact yet.
pub fn done_without_artifact() -> Value {
    json!({"code": 10000, "data": {"status": "done", "resp_data": "{not json"}})
}

pub fn failed(status: Value) -> Value {
    json!({"code": 10000, "data": {"status": status}})
}

pub fn business_error(code: i64, message: &str) -> Value {
    json!({"code": code, "message": message, "data": null})
}

pub fn transport_error(code: &str, message: &str) -> Value {
    json!({
        "ResponseMetadata": {
            "RequestId": "req-1",
            "Action": "CVSync2AsyncSubmitTask",
            "Error": {"Code": code, "Message": message}
        }
    })
}
