use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use crate::services::orchestrator::PollPolicy;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:8081").
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Root of the statically served tree; generated images land in
    /// `<public_dir>/generated` and audio in `<public_dir>/audio`.
    #[serde(default = "default_public_dir")]
    pub public_dir: PathBuf,

    /// Delay before each job status query, in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Maximum number of status queries per job.
    #[serde(default = "default_max_polls")]
    pub max_polls: u32,

    /// Upper bound on remote jobs polled at the same time.
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,

    /// Request body limit in bytes (inline images travel as base64).
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,

    /// Simulated latency of the demo image generator, in milliseconds.
    #[serde(default = "default_demo_delay_ms")]
    pub demo_delay_ms: u64,

    /// Timeout for downloading a remote source image for editing.
    #[serde(default = "default_source_fetch_timeout_secs")]
    pub source_fetch_timeout_secs: u64,

    /// Whole-request timeout for calls to the visual and speech APIs.
    #[serde(default = "default_remote_call_timeout_secs")]
    pub remote_call_timeout_secs: u64,
}

fn default_bind_addr() -> String {
    "0.0.0.0:8081".to_string()
}

fn default_public_dir() -> PathBuf {
    PathBuf::from("public")
}

fn default_poll_interval_ms() -> u64 {
    2000
}

fn default_max_polls() -> u32 {
    150
}

fn default_max_concurrent_jobs() -> usize {
    16
}

fn default_max_body_bytes() -> usize {
    20 * 1024 * 1024
}

fn default_demo_delay_ms() -> u64 {
    2000
}

fn default_source_fetch_timeout_secs() -> u64 {
    30
}

fn default_remote_call_timeout_secs() -> u64 {
    60
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            public_dir: default_public_dir(),
            poll_interval_ms: default_poll_interval_ms(),
            max_polls: default_max_polls(),
            max_concurrent_jobs: default_max_concurrent_jobs(),
            max_body_bytes: default_max_body_bytes(),
            demo_delay_ms: default_demo_delay_ms(),
            source_fetch_timeout_secs: default_source_fetch_timeout_secs(),
            remote_call_timeout_secs: default_remote_call_timeout_secs(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy::new(Duration::from_millis(self.poll_interval_ms), self.max_polls)
    }

    pub fn generated_dir(&self) -> PathBuf {
        self.public_dir.join("generated")
    }

    pub fn audio_dir(&self) -> PathBuf {
        self.public_dir.join("audio")
    }

    pub fn remote_call_timeout(&self) -> Duration {
        Duration::from_secs(self.remote_call_timeout_secs)
    }

    /// HTTP client for the remote generation APIs, bounded by
    /// `remote_call_timeout_secs`.
    pub fn remote_client(&self) -> reqwest::Client {
        reqwest::Client::builder()
            .timeout(self.remote_call_timeout())
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Failed to build timed HTTP client, using defaults");
                reqwest::Client::new()
            })
    }
}

/// Where provider configuration is read from.
///
/// The registry takes a fresh snapshot every time it constructs a provider,
/// so a `reset` followed by `get` sees whatever the source holds at that
/// moment.
pub trait ConfigSource: Send + Sync {
    fn snapshot(&self) -> BTreeMap<String, String>;
}

/// Process environment (after `.env` has been loaded).
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvSource;

impl ConfigSource for EnvSource {
    fn snapshot(&self) -> BTreeMap<String, String> {
        std::env::vars().collect()
    }
}

/// In-memory configuration, mutable between provider constructions.
#[derive(Debug, Default)]
pub struct StaticSource {
    vars: RwLock<BTreeMap<String, String>>,
}

impl StaticSource {
    pub fn new<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: RwLock::new(
                vars.into_iter()
                    .map(|(k, v)| (k.into(), v.into()))
                    .collect(),
            ),
        }
    }

    pub fn set(&self, key: impl Into<String>, value: impl Into<String>) {
        self.vars
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.into(), value.into());
    }

    pub fn remove(&self, key: &str) {
        self.vars
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }
}

impl ConfigSource for StaticSource {
    fn snapshot(&self) -> BTreeMap<String, String> {
        self.vars
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Immutable configuration bag handed to a provider at construction.
#[derive(Debug, Clone, Default)]
pub struct ProviderConfig {
    vars: Arc<BTreeMap<String, String>>,
}

impl ProviderConfig {
    pub fn capture(source: &dyn ConfigSource) -> Self {
        Self {
            vars: Arc::new(source.snapshot()),
        }
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: Arc::new(
                pairs
                    .into_iter()
                    .map(|(k, v)| (k.into(), v.into()))
                    .collect(),
            ),
        }
    }

    /// Non-blank value for `key`, trimmed.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    /// Deserialize every `PREFIX_*` variable into `T` (keys lowercased,
    /// prefix stripped).
    pub fn section<T: DeserializeOwned>(&self, prefix: &str) -> Result<T, envy::Error> {
        envy::prefixed(prefix).from_iter(self.pairs())
    }

    pub fn app(&self) -> Result<AppConfig, envy::Error> {
        envy::from_iter(self.pairs())
    }

    /// Like [`ProviderConfig::app`] but never fails: providers must always
    /// construct, so malformed values fall back to defaults.
    pub fn app_or_default(&self) -> AppConfig {
        self.app().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Invalid application settings, using defaults");
            AppConfig::default()
        })
    }

    fn pairs(&self) -> impl Iterator<Item = (String, String)> + '_ {
        self.vars.iter().map(|(k, v)| (k.clone(), v.clone()))
    }
}

/// Treat blank strings the same as missing values.
pub fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}
