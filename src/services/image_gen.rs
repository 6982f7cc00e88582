use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use strum::{Display, EnumString};
use tokio_util::sync::CancellationToken;

use crate::config::ProviderConfig;
use crate::models::image::EncodedImage;
use crate::models::job::JobRequest;
use crate::services::orchestrator::{JobError, JobOrchestrator};
use crate::services::volcengine::VisualClient;

/// Text-to-image model.
pub const T2I_REQ_KEY: &str = "jimeng_t2i_v40";
/// Image-to-image model.
pub const I2I_REQ_KEY: &str = "jimeng_high_aes_i2i";

pub const DEFAULT_ASPECT_RATIO: &str = "16:9";

/// Output sizes per supported aspect ratio.
const ASPECT_RATIO_SIZES: [(&str, u32, u32); 8] = [
    ("16:9", 1920, 1080),
    ("4:3", 1440, 1080),
    ("1:1", 1080, 1080),
    ("3:4", 1080, 1440),
    ("9:16", 1080, 1920),
    ("21:9", 2520, 1080),
    ("3:2", 1620, 1080),
    ("2:3", 1080, 1620),
];

/// `(width, height)` for `ratio`; unknown ratios get the 16:9 size.
pub fn dimensions(ratio: &str) -> (u32, u32) {
    let ratio = ratio.trim();
    ASPECT_RATIO_SIZES
        .iter()
        .find(|(name, _, _)| *name == ratio)
        .or_else(|| ASPECT_RATIO_SIZES.first())
        .map_or((1920, 1080), |&(_, w, h)| (w, h))
}

/// One image generation: a prompt, plus a base64 source image for edits.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageRequest {
    pub prompt: String,
    pub aspect_ratio: Option<String>,
    /// Bare base64 of the image to edit.
    pub source: Option<String>,
    pub strength: f64,
}

impl ImageRequest {
    pub fn text(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            aspect_ratio: None,
            source: None,
            strength: 0.65,
        }
    }

    pub fn edit(prompt: impl Into<String>, source: impl Into<String>, strength: f64) -> Self {
        Self {
            prompt: prompt.into(),
            aspect_ratio: None,
            source: Some(source.into()),
            strength,
        }
    }

    pub fn with_aspect_ratio(mut self, ratio: impl Into<String>) -> Self {
        self.aspect_ratio = Some(ratio.into());
        self
    }

    pub fn is_edit(&self) -> bool {
        self.source.is_some()
    }

    pub fn aspect_ratio(&self) -> &str {
        self.aspect_ratio.as_deref().unwrap_or(DEFAULT_ASPECT_RATIO)
    }
}

#[async_trait]
pub trait ImageGenerator: Send + Sync {
    fn name(&self) -> &'static str;

    async fn generate(
        &self,
        request: &ImageRequest,
        cancel: &CancellationToken,
    ) -> Result<EncodedImage, JobError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum ImageKind {
    #[default]
    Jimeng,
    Demo,
}

pub fn build(kind: ImageKind, config: &ProviderConfig) -> Arc<dyn ImageGenerator> {
    match kind {
        ImageKind::Jimeng => Arc::new(JimengGenerator::from_config(config)),
        ImageKind::Demo => {
            let delay = Duration::from_millis(config.app_or_default().demo_delay_ms);
            Arc::new(DemoGenerator::new(delay))
        }
    }
}

fn logo_info() -> Value {
    json!({"add_logo": false, "position": 0, "language": 0, "opacity": 1})
}

fn into_form(value: Value) -> JobRequest {
    match value {
        Value::Object(map) => map,
        _ => JobRequest::new(),
    }
}

pub fn text_to_image_form(prompt: &str, aspect_ratio: &str) -> JobRequest {
    let (width, height) = dimensions(aspect_ratio);
    into_form(json!({
        "req_key": T2I_REQ_KEY,
        "prompt": prompt,
        "width": width,
        "height": height,
        "return_url": true,
        "logo_info": logo_info(),
    }))
}

pub fn image_to_image_form(prompt: &str, source: &str, strength: f64) -> JobRequest {
    into_form(json!({
        "req_key": I2I_REQ_KEY,
        "prompt": prompt,
        "binary_data_base64": [source],
        "strength": strength,
        "return_url": true,
        "logo_info": logo_info(),
    }))
}

/// Status query for `task_id`. `return_url` is repeated so the result comes
/// back as a URL rather than inline bytes.
pub fn query_form(req_key: &str, task_id: &str) -> JobRequest {
    into_form(json!({
        "req_key": req_key,
        "task_id": task_id,
        "return_url": true,
        "logo_info": logo_info(),
    }))
}

/// Jimeng models on the Volcengine visual API, driven through the job
/// orchestrator.
pub struct JimengGenerator {
    orchestrator: JobOrchestrator,
}

impl JimengGenerator {
    pub fn new(orchestrator: JobOrchestrator) -> Self {
        Self { orchestrator }
    }

    pub fn from_config(config: &ProviderConfig) -> Self {
        let app = config.app_or_default();
        let client = VisualClient::from_config(config);
        if !client.is_configured() {
            tracing::warn!("Volcengine visual API credentials are not configured");
        }
        Self::new(JobOrchestrator::new(
            Arc::new(client),
            app.poll_policy(),
            app.max_concurrent_jobs,
        ))
    }
}

#[async_trait]
impl ImageGenerator for JimengGenerator {
    fn name(&self) -> &'static str {
        "jimeng"
    }

    async fn generate(
        &self,
        request: &ImageRequest,
        cancel: &CancellationToken,
    ) -> Result<EncodedImage, JobError> {
        let (req_key, submit) = match &request.source {
            Some(source) => (
                I2I_REQ_KEY,
                image_to_image_form(&request.prompt, source, request.strength),
            ),
            None => (
                T2I_REQ_KEY,
                text_to_image_form(&request.prompt, request.aspect_ratio()),
            ),
        };

        tracing::info!(
            req_key,
            prompt_chars = request.prompt.chars().count(),
            aspect_ratio = request.aspect_ratio(),
            "Submitting generation job"
        );

        self.orchestrator
            .run(&submit, |task_id| query_form(req_key, task_id), cancel)
            .await
    }
}

/// Placeholder generator for running without a vendor account.
pub struct DemoGenerator {
    delay: Duration,
}

impl DemoGenerator {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl ImageGenerator for DemoGenerator {
    fn name(&self) -> &'static str {
        "demo"
    }

    async fn generate(
        &self,
        request: &ImageRequest,
        cancel: &CancellationToken,
    ) -> Result<EncodedImage, JobError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(JobError::Cancelled),
            _ = tokio::time::sleep(self.delay) => {}
        }

        let stem = if request.is_edit() {
            "demo-edited"
        } else {
            "demo-image"
        };
        let url = format!(
            "https://example.com/{stem}-{}.jpg",
            chrono::Utc::now().timestamp()
        );
        tracing::info!(url = %url, "Demo image returned");
        Ok(EncodedImage::url(url))
    }
}
