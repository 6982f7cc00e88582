use async_trait::async_trait;
use base64::Engine;
use futures_util::{SinkExt, StreamExt};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use strum::{Display, EnumString};
use tokio_tungstenite::tungstenite::Message;

use crate::config::{non_blank, ProviderConfig};
use crate::models::artifact::StoredArtifact;
use crate::paths::{self, PathError, DEFAULT_AUDIO_PREFIX};

/// URL prefix under which the audio root is served.
pub const AUDIO_URL_PREFIX: &str = "/audio";

const DEFAULT_SAMPLE_RATE: u32 = 16_000;
const VOLCENGINE_SAMPLE_RATE: u32 = 24_000;
const VOLCENGINE_SUCCESS_CODE: i64 = 3000;

/// Voice parameters, passed to the backend as opaque strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceParams {
    pub speaker_id: String,
    pub speed_factor: String,
    pub pitch_factor: String,
}

impl Default for VoiceParams {
    fn default() -> Self {
        Self {
            speaker_id: "child".to_string(),
            speed_factor: "1.0".to_string(),
            pitch_factor: "1.0".to_string(),
        }
    }
}

/// Mono 16-bit little-endian PCM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioClip {
    pub pcm: Vec<u8>,
    pub sample_rate: u32,
}

impl AudioClip {
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64((self.pcm.len() / 2) as f64 / f64::from(self.sample_rate))
    }
}

#[async_trait]
pub trait Synthesizer: Send + Sync {
    fn name(&self) -> &'static str;

    fn layout(&self) -> &AudioLayout;

    async fn synthesize(&self, text: &str, voice: &VoiceParams) -> Result<AudioClip, SynthError>;

    /// Synthesize `text` and write it as a WAV file under `folder`.
    async fn synthesize_and_save(
        &self,
        text: &str,
        prefix: Option<&str>,
        folder: &str,
        voice: &VoiceParams,
    ) -> Result<StoredArtifact, SynthError> {
        let start = Instant::now();
        let clip = self.synthesize(text, voice).await?;
        let artifact = self.layout().write_wav(&clip, prefix, folder).await?;

        tracing::info!(
            provider = self.name(),
            chars = text.chars().count(),
            audio_secs = clip.duration().as_secs_f64(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            path = %artifact.local_reference,
            "Audio synthesized"
        );
        Ok(artifact)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum SynthKind {
    #[default]
    WebsocketTts,
    VolcengineTts,
}

pub fn build(kind: SynthKind, config: &ProviderConfig) -> Arc<dyn Synthesizer> {
    let app = config.app_or_default();
    let layout = AudioLayout::new(app.audio_dir());
    match kind {
        SynthKind::WebsocketTts => Arc::new(WebSocketTts::new(
            TtsSocketSettings::from_config(config),
            layout,
        )),
        SynthKind::VolcengineTts => Arc::new(VolcengineTts::new(
            app.remote_client(),
            VolcengineTtsSettings::from_config(config),
            layout,
        )),
    }
}

/// Where synthesized audio is written and served from.
#[derive(Debug, Clone)]
pub struct AudioLayout {
    root: PathBuf,
}

impl AudioLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        if let Err(e) = std::fs::create_dir_all(&root) {
            tracing::warn!(path = %root.display(), error = %e, "Failed to create audio root");
        }
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub async fn write_wav(
        &self,
        clip: &AudioClip,
        prefix: Option<&str>,
        folder: &str,
    ) -> Result<StoredArtifact, SynthError> {
        let prefix = prefix
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .unwrap_or(DEFAULT_AUDIO_PREFIX);
        let filename = paths::artifact_filename(prefix, "wav");
        let location = paths::locate(&self.root, AUDIO_URL_PREFIX, folder, &filename)?;

        let wav = encode_wav(&clip.pcm, clip.sample_rate)?;
        if let Some(parent) = location.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&location.path, wav).await?;

        Ok(StoredArtifact {
            local_reference: location.path.display().to_string(),
            public_url: location.url,
            externally_reachable: false,
        })
    }
}

/// Wrap mono 16-bit PCM in a RIFF/WAVE container. A trailing odd byte is
/// dropped so the data chunk holds whole samples.
pub fn encode_wav(pcm: &[u8], sample_rate: u32) -> Result<Vec<u8>, SynthError> {
    let num_channels: u16 = 1;
    let bits_per_sample: u16 = 16;
    let pcm = &pcm[..pcm.len() - pcm.len() % 2];
    let block_align = num_channels * (bits_per_sample / 8);
    let byte_rate = sample_rate
        .checked_mul(u32::from(block_align))
        .filter(|_| sample_rate > 0)
        .ok_or_else(|| SynthError::Protocol(format!("unusable sample rate {sample_rate}")))?;
    let data_size = u32::try_from(pcm.len())
        .ok()
        .filter(|size| size.checked_add(36).is_some())
        .ok_or_else(|| SynthError::Protocol(format!("{} bytes of PCM do not fit a WAV file", pcm.len())))?;

    let mut wav = Vec::with_capacity(44 + pcm.len());
    wav.extend_from_slice(b"RIFF");
    wav.extend_from_slice(&(36 + data_size).to_le_bytes());
    wav.extend_from_slice(b"WAVE");

    wav.extend_from_slice(b"fmt ");
    wav.extend_from_slice(&16u32.to_le_bytes());
    wav.extend_from_slice(&1u16.to_le_bytes()); // PCM
    wav.extend_from_slice(&num_channels.to_le_bytes());
    wav.extend_from_slice(&sample_rate.to_le_bytes());
    wav.extend_from_slice(&byte_rate.to_le_bytes());
    wav.extend_from_slice(&block_align.to_le_bytes());
    wav.extend_from_slice(&bits_per_sample.to_le_bytes());

    wav.extend_from_slice(b"data");
    wav.extend_from_slice(&data_size.to_le_bytes());
    wav.extend_from_slice(pcm);
    Ok(wav)
}

/// `TTS_*` settings for the streaming speech server.
#[derive(Debug, Clone, Deserialize)]
pub struct TtsSocketSettings {
    #[serde(default = "default_websocket_url")]
    pub websocket_url: String,
    #[serde(default = "default_tts_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_websocket_url() -> String {
    "ws://127.0.0.1:8765/ws/tts".to_string()
}

fn default_tts_timeout_secs() -> u64 {
    120
}

impl Default for TtsSocketSettings {
    fn default() -> Self {
        Self {
            websocket_url: default_websocket_url(),
            timeout_secs: default_tts_timeout_secs(),
        }
    }
}

impl TtsSocketSettings {
    pub fn from_config(config: &ProviderConfig) -> Self {
        config.section("TTS_").unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Invalid TTS_* settings, using defaults");
            Self::default()
        })
    }
}

/// Streaming TTS over a WebSocket session.
///
/// The client opens a session, streams the text one character at a time,
/// then signals the end; the server answers with binary PCM frames and a
/// final `end_response` message.
pub struct WebSocketTts {
    settings: TtsSocketSettings,
    layout: AudioLayout,
}

impl WebSocketTts {
    pub fn new(settings: TtsSocketSettings, layout: AudioLayout) -> Self {
        tracing::info!(url = %settings.websocket_url, "WebSocket TTS configured");
        Self { settings, layout }
    }

    async fn exchange(&self, text: &str, voice: &VoiceParams) -> Result<AudioClip, SynthError> {
        let (mut socket, _) =
            tokio_tungstenite::connect_async(self.settings.websocket_url.as_str()).await?;

        let init = json!({
            "type": "init_session",
            "speaker_id": voice.speaker_id,
            "speed_factor": voice.speed_factor,
            "pitch_factor": voice.pitch_factor,
        });
        socket.send(Message::Text(init.to_string().into())).await?;

        loop {
            match socket.next().await {
                Some(Ok(Message::Text(reply))) => {
                    let reply: Value = serde_json::from_str(&reply)
                        .map_err(|e| SynthError::Protocol(format!("bad init reply: {e}")))?;
                    tracing::debug!(message = ?reply.get("message"), "TTS session initialized");
                    break;
                }
                Some(Ok(Message::Close(_))) | None => {
                    return Err(SynthError::Protocol("closed before session init".into()))
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(e.into()),
            }
        }

        for ch in text.chars() {
            let message = json!({"type": "text", "text": ch.to_string()});
            socket.send(Message::Text(message.to_string().into())).await?;
        }
        socket
            .send(Message::Text(json!({"type": "end"}).to_string().into()))
            .await?;

        let mut clip = AudioClip {
            pcm: Vec::new(),
            sample_rate: DEFAULT_SAMPLE_RATE,
        };
        while let Some(message) = socket.next().await {
            match message? {
                Message::Binary(bytes) => clip.pcm.extend_from_slice(&bytes),
                Message::Text(raw) => {
                    let Ok(event) = serde_json::from_str::<Value>(&raw) else {
                        tracing::debug!("Ignoring non-JSON TTS message");
                        continue;
                    };
                    match event.get("type").and_then(Value::as_str) {
                        Some("audio") => {
                            if let Some(rate) = event.get("sample_rate") {
                                clip.sample_rate = parse_sample_rate(rate)?;
                            }
                        }
                        Some("end_response") => break,
                        Some("error") => {
                            return Err(SynthError::Protocol(
                                event
                                    .get("message")
                                    .and_then(Value::as_str)
                                    .unwrap_or("server error")
                                    .to_string(),
                            ))
                        }
                        _ => {}
                    }
                }
                Message::Close(_) => break,
                _ => {}
            }
        }

        let _ = socket.close(None).await;
        Ok(clip)
    }
}

/// Sample rate announced by the server; zero and anything beyond `u32`
/// are rejected.
fn parse_sample_rate(value: &Value) -> Result<u32, SynthError> {
    value
        .as_u64()
        .and_then(|rate| u32::try_from(rate).ok())
        .filter(|rate| *rate > 0)
        .ok_or_else(|| SynthError::Protocol(format!("invalid sample rate {value}")))
}

#[async_trait]
impl Synthesizer for WebSocketTts {
    fn name(&self) -> &'static str {
        "websocket_tts"
    }

    fn layout(&self) -> &AudioLayout {
        &self.layout
    }

    async fn synthesize(&self, text: &str, voice: &VoiceParams) -> Result<AudioClip, SynthError> {
        let limit = Duration::from_secs(self.settings.timeout_secs);
        tokio::time::timeout(limit, self.exchange(text, voice))
            .await
            .map_err(|_| SynthError::Timeout(limit))?
    }
}

/// `VOLCENGINE_TTS_*` settings.
#[derive(Debug, Clone, Deserialize)]
pub struct VolcengineTtsSettings {
    #[serde(default)]
    pub app_id: Option<String>,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default = "default_cluster")]
    pub cluster: String,
    #[serde(default = "default_tts_endpoint")]
    pub endpoint: String,
}

fn default_cluster() -> String {
    "volcano_tts".to_string()
}

fn default_tts_endpoint() -> String {
    "https://openspeech.bytedance.com/api/v1/tts".to_string()
}

impl Default for VolcengineTtsSettings {
    fn default() -> Self {
        Self {
            app_id: None,
            access_token: None,
            cluster: default_cluster(),
            endpoint: default_tts_endpoint(),
        }
    }
}

impl VolcengineTtsSettings {
    pub fn from_config(config: &ProviderConfig) -> Self {
        config.section("VOLCENGINE_TTS_").unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Invalid VOLCENGINE_TTS_* settings, using defaults");
            Self::default()
        })
    }
}

#[derive(Debug, Deserialize)]
struct TtsResponse {
    code: i64,
    #[serde(default)]
    message: String,
    #[serde(default)]
    data: Option<String>,
}

/// Volcengine HTTP speech synthesis returning base64 PCM.
pub struct VolcengineTts {
    http: Client,
    settings: VolcengineTtsSettings,
    layout: AudioLayout,
}

impl VolcengineTts {
    pub fn new(http: Client, settings: VolcengineTtsSettings, layout: AudioLayout) -> Self {
        if non_blank(&settings.app_id).is_none() || non_blank(&settings.access_token).is_none() {
            tracing::warn!("Volcengine TTS is not configured");
        }
        Self {
            http,
            settings,
            layout,
        }
    }
}

fn parse_ratio(raw: &str) -> f64 {
    raw.trim().parse().unwrap_or(1.0)
}

#[async_trait]
impl Synthesizer for VolcengineTts {
    fn name(&self) -> &'static str {
        "volcengine_tts"
    }

    fn layout(&self) -> &AudioLayout {
        &self.layout
    }

    async fn synthesize(&self, text: &str, voice: &VoiceParams) -> Result<AudioClip, SynthError> {
        let (Some(app_id), Some(token)) = (
            non_blank(&self.settings.app_id),
            non_blank(&self.settings.access_token),
        ) else {
            return Err(SynthError::Configuration(
                "VOLCENGINE_TTS_APP_ID and VOLCENGINE_TTS_ACCESS_TOKEN are required".into(),
            ));
        };

        let body = json!({
            "app": {"appid": app_id, "token": token, "cluster": self.settings.cluster},
            "user": {"uid": "scriptframe"},
            "audio": {
                "voice_type": voice.speaker_id,
                "encoding": "pcm",
                "rate": VOLCENGINE_SAMPLE_RATE,
                "speed_ratio": parse_ratio(&voice.speed_factor),
                "pitch_ratio": parse_ratio(&voice.pitch_factor),
            },
            "request": {
                "reqid": uuid::Uuid::new_v4().to_string(),
                "text": text,
                "text_type": "plain",
                "operation": "query",
            },
        });

        let response: TtsResponse = self
            .http
            .post(&self.settings.endpoint)
            .header("Authorization", format!("Bearer;{token}"))
            .json(&body)
            .send()
            .await?
            .json()
            .await?;

        if response.code != VOLCENGINE_SUCCESS_CODE {
            return Err(SynthError::Rejected {
                code: response.code,
                message: response.message,
            });
        }

        let data = response
            .data
            .ok_or_else(|| SynthError::Protocol("response carries no audio".into()))?;
        let pcm = base64::engine::general_purpose::STANDARD.decode(data)?;
        Ok(AudioClip {
            pcm,
            sample_rate: VOLCENGINE_SAMPLE_RATE,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SynthError {
    #[error("Speech provider not configured: {0}")]
    Configuration(String),

    #[error("WebSocket error: {0}")]
    Socket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unexpected speech server response: {0}")]
    Protocol(String),

    #[error("Speech synthesis rejected ({code}): {message}")]
    Rejected { code: i64, message: String },

    #[error("Speech synthesis timed out after {0:?}")]
    Timeout(Duration),

    #[error("Failed to write audio file: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Path(#[from] PathError),

    #[error("Audio payload is not valid base64: {0}")]
    Decode(#[from] base64::DecodeError),
}
