use garde::Validate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Frame metadata sent by the storyboard client alongside a prompt.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Frame {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jimeng_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aspect_ratio: Option<String>,
    /// "character" or "page"; anything else stores at the root.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub character_id: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_index: Option<i64>,
    /// Unrecognized fields, echoed back untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Frame {
    /// Prompt carried by the frame itself, which wins over the request prompt.
    pub fn prompt_override(&self) -> Option<&str> {
        [&self.prompt, &self.jimeng_prompt]
            .into_iter()
            .filter_map(|p| p.as_deref())
            .find(|p| !p.trim().is_empty())
    }

    /// Storage folder and filename prefix for the generated image.
    pub fn storage_target(&self, request_id: &str) -> (String, String) {
        match self.kind.as_deref() {
            Some("character") => {
                let id = match &self.character_id {
                    Some(Value::String(s)) => s.clone(),
                    Some(other) => other.to_string(),
                    None => request_id.to_string(),
                };
                ("characters".to_string(), format!("char_{id}"))
            }
            Some("page") => (
                "pages".to_string(),
                format!("page_{}", self.page_index.unwrap_or(0)),
            ),
            _ => (String::new(), "img".to_string()),
        }
    }
}

/// Request to generate an image from a prompt.
#[derive(Debug, Deserialize, Validate)]
pub struct ImageGenerationRequest {
    #[serde(default)]
    #[garde(length(max = 4000))]
    pub prompt: String,

    #[serde(default)]
    #[garde(skip)]
    pub frame: Option<Frame>,

    /// Persist inline results and return a URL instead of a data URI.
    #[serde(default = "default_true")]
    #[garde(skip)]
    pub save_to_storage: bool,
}

fn default_true() -> bool {
    true
}

/// Request to edit an existing image (image-to-image).
#[derive(Debug, Deserialize, Validate)]
pub struct ImageEditRequest {
    /// Source image: data URI, http(s) URL, or a path under the public root.
    #[garde(length(min = 1))]
    pub image_url: String,

    #[garde(length(min = 1, max = 4000))]
    pub prompt: String,

    #[serde(default)]
    #[garde(skip)]
    pub page_index: Option<i64>,

    /// How far the result may drift from the source, 0 to 1.
    #[serde(default = "default_strength")]
    #[garde(range(min = 0.0, max = 1.0))]
    pub strength: f64,
}

fn default_strength() -> f64 {
    0.65
}

/// Request to synthesize narration audio.
#[derive(Debug, Deserialize, Validate)]
pub struct AudioGenerationRequest {
    #[garde(length(min = 1, max = 5000))]
    pub text: String,

    #[serde(default)]
    #[garde(skip)]
    pub page_index: Option<i64>,

    #[serde(default = "default_speaker")]
    #[garde(length(min = 1, max = 64))]
    pub speaker_id: String,

    #[serde(default = "default_factor")]
    #[garde(length(min = 1, max = 16))]
    pub speed_factor: String,

    #[serde(default = "default_factor")]
    #[garde(length(min = 1, max = 16))]
    pub pitch_factor: String,
}

fn default_speaker() -> String {
    "child".to_string()
}

fn default_factor() -> String {
    "1.0".to_string()
}

/// Uniform response envelope; failures never surface as raw errors.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }
}

/// Where an inline result was persisted.
#[derive(Debug, Serialize)]
pub struct StorageInfo {
    pub storage_provider: String,
    pub local_path: String,
    pub external_accessible: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageGenerationData {
    pub image_url: String,
    pub task_id: String,
    pub prompt: String,
    pub frame: Option<Frame>,
    #[serde(flatten)]
    pub storage: Option<StorageInfo>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageEditData {
    pub image_url: String,
    pub prompt: String,
    pub page_index: Option<i64>,
    #[serde(flatten)]
    pub storage: Option<StorageInfo>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioGenerationData {
    pub audio_url: String,
    pub local_path: String,
    pub text: String,
    pub page_index: Option<i64>,
    pub speaker_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn frame(value: Value) -> Frame {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn frame_prompt_prefers_prompt_then_jimeng_prompt() {
        assert_eq!(
            frame(json!({"prompt": "a", "jimengPrompt": "b"})).prompt_override(),
            Some("a")
        );
        assert_eq!(
            frame(json!({"prompt": " ", "jimengPrompt": "b"})).prompt_override(),
            Some("b")
        );
        assert_eq!(frame(json!({})).prompt_override(), None);
    }

    #[test]
    fn storage_target_groups_by_frame_type() {
        assert_eq!(
            frame(json!({"type": "character", "characterId": 7})).storage_target("r1"),
            ("characters".to_string(), "char_7".to_string())
        );
        assert_eq!(
            frame(json!({"type": "character", "characterId": "hero"})).storage_target("r1"),
            ("characters".to_string(), "char_hero".to_string())
        );
        assert_eq!(
            frame(json!({"type": "page", "pageIndex": 3})).storage_target("r1"),
            ("pages".to_string(), "page_3".to_string())
        );
        assert_eq!(
            frame(json!({"type": "cover"})).storage_target("r1"),
            (String::new(), "img".to_string())
        );
    }

    #[test]
    fn frame_round_trips_unknown_fields() {
        let value = json!({"type": "page", "pageIndex": 1, "mood": "calm"});
        assert_eq!(serde_json::to_value(frame(value.clone())).unwrap(), value);
    }

    #[test]
    fn edit_request_rejects_out_of_range_strength() {
        let request: ImageEditRequest = serde_json::from_value(json!({
            "image_url": "data:image/png;base64,AQID",
            "prompt": "make it night",
            "strength": 1.5
        }))
        .unwrap();
        assert!(request.validate().is_err());
    }

    #[test]
    fn audio_request_fills_voice_defaults() {
        let request: AudioGenerationRequest =
            serde_json::from_value(json!({"text": "hello"})).unwrap();
        assert_eq!(request.speaker_id, "child");
        assert_eq!(request.speed_factor, "1.0");
        assert!(request.validate().is_ok());
    }

    #[test]
    fn image_data_flattens_storage_info() {
        let data = ImageGenerationData {
            image_url: "/generated/img.png".into(),
            task_id: "demo_1".into(),
            prompt: "a cat".into(),
            frame: None,
            storage: Some(StorageInfo {
                storage_provider: "local".into(),
                local_path: "public/generated/img.png".into(),
                external_accessible: false,
            }),
        };
        let value = serde_json::to_value(ApiResponse::ok(data)).unwrap();
        assert_eq!(value["data"]["imageUrl"], "/generated/img.png");
        assert_eq!(value["data"]["storage_provider"], "local");
        assert_eq!(value["error"], Value::Null);
    }
}
