//! Normalization of heterogeneous provider payloads into [`EncodedImage`].
//!
//! Submission and polling both go through these two functions so the
//! extraction order can never drift between call sites.

use serde_json::Value;

use crate::models::image::EncodedImage;

/// Immediate-result extraction: first entry of a non-empty `image_urls`
/// list, else first entry of a non-empty `binary_data_base64` list (assumed
/// PNG), else `None`. URLs always win over inline bytes.
pub fn encoded_image_from(payload: &Value) -> Option<EncodedImage> {
    if let Some(url) = first_string(payload, "image_urls") {
        return Some(EncodedImage::url(url));
    }
    first_string(payload, "binary_data_base64").map(EncodedImage::inline_png)
}

/// Artifact URL reported alongside a success status: a direct `image_url`,
/// or `image_urls[0]` inside `resp_data`, which some providers send as a
/// JSON-encoded string. Unparseable `resp_data` yields `None`.
pub fn nested_image_url(payload: &Value) -> Option<String> {
    if let Some(url) = payload
        .get("image_url")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
    {
        return Some(url.to_string());
    }

    let nested = payload.get("resp_data")?;
    match nested {
        Value::String(raw) => match serde_json::from_str::<Value>(raw) {
            Ok(nested) => first_string(&nested, "image_urls"),
            Err(e) => {
                tracing::debug!(error = %e, "resp_data is not valid JSON");
                None
            }
        },
        Value::Object(_) => first_string(nested, "image_urls"),
        _ => None,
    }
}

fn first_string(payload: &Value, field: &str) -> Option<String> {
    payload
        .get(field)?
        .as_array()?
        .first()?
        .as_str()
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}
