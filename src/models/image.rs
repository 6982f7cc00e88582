use serde::Serialize;

/// Mime type assumed for inline image payloads that carry no type of their own.
pub const DEFAULT_INLINE_MIME: &str = "image/png";

/// Canonical form every provider response is reduced to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EncodedImage {
    Url { url: String },
    /// Base64 payload plus its mime type.
    InlineData { data: String, mime_type: String },
}

impl EncodedImage {
    pub fn url(url: impl Into<String>) -> Self {
        EncodedImage::Url { url: url.into() }
    }

    pub fn inline_png(data: impl Into<String>) -> Self {
        EncodedImage::InlineData {
            data: data.into(),
            mime_type: DEFAULT_INLINE_MIME.to_string(),
        }
    }

    pub fn is_inline(&self) -> bool {
        matches!(self, EncodedImage::InlineData { .. })
    }

    /// URL form: the URL itself, or a `data:<mime>;base64,<data>` URI.
    pub fn as_uri(&self) -> String {
        match self {
            EncodedImage::Url { url } => url.clone(),
            EncodedImage::InlineData { data, mime_type } => {
                format!("data:{mime_type};base64,{data}")
            }
        }
    }
}
