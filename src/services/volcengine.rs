use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::{Client, Url};
use serde::Deserialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::config::{non_blank, ProviderConfig};
use crate::models::job::JobRequest;
use crate::services::orchestrator::{JobError, TaskApi};

type HmacSha256 = Hmac<Sha256>;

const API_VERSION: &str = "2022-08-31";
const SUBMIT_ACTION: &str = "CVSync2AsyncSubmitTask";
const QUERY_ACTION: &str = "CVSync2AsyncGetResult";
const SIGNED_HEADERS: &str = "content-type;host;x-content-sha256;x-date";
const CONTENT_TYPE: &str = "application/json";

/// `VOLCENGINE_*` settings for the visual (image generation) API.
#[derive(Debug, Clone, Deserialize)]
pub struct VisualSettings {
    #[serde(default)]
    pub access_key_id: Option<String>,
    #[serde(default)]
    pub secret_access_key: Option<String>,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default = "default_service")]
    pub service: String,
    /// Keys are stored base64-encoded (some consoles export them that way).
    #[serde(default)]
    pub credentials_base64: bool,
}

fn default_endpoint() -> String {
    "https://visual.volcengineapi.com".to_string()
}

fn default_region() -> String {
    "cn-north-1".to_string()
}

fn default_service() -> String {
    "cv".to_string()
}

impl Default for VisualSettings {
    fn default() -> Self {
        Self {
            access_key_id: None,
            secret_access_key: None,
            endpoint: default_endpoint(),
            region: default_region(),
            service: default_service(),
            credentials_base64: false,
        }
    }
}

impl VisualSettings {
    pub fn from_config(config: &ProviderConfig) -> Self {
        config.section("VOLCENGINE_").unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Invalid VOLCENGINE_* settings, using defaults");
            Self::default()
        })
    }

    /// Signing credentials, or `None` when either key is missing.
    fn credentials(&self) -> Option<(String, String)> {
        let ak = non_blank(&self.access_key_id)?;
        let sk = non_blank(&self.secret_access_key)?;
        if self.credentials_base64 {
            Some((decode_key(ak), decode_key(sk)))
        } else {
            Some((ak.to_string(), sk.to_string()))
        }
    }
}

fn decode_key(raw: &str) -> String {
    base64::engine::general_purpose::STANDARD
        .decode(raw)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .unwrap_or_else(|| {
            tracing::warn!("Credential is not valid base64, using it verbatim");
            raw.to_string()
        })
}

/// Headers produced by [`RequestSigner::sign`].
#[derive(Debug, Clone)]
pub struct SignedHeaders {
    pub authorization: String,
    pub x_date: String,
    pub content_sha256: String,
    pub host: String,
}

/// HMAC-SHA256 request signer for Volcengine OpenAPI.
#[derive(Debug, Clone)]
pub struct RequestSigner {
    access_key: String,
    secret_key: String,
    region: String,
    service: String,
}

impl RequestSigner {
    pub fn new(
        access_key: impl Into<String>,
        secret_key: impl Into<String>,
        region: impl Into<String>,
        service: impl Into<String>,
    ) -> Self {
        Self {
            access_key: access_key.into(),
            secret_key: secret_key.into(),
            region: region.into(),
            service: service.into(),
        }
    }

    pub fn sign(
        &self,
        method: &str,
        url: &Url,
        body: &[u8],
        now: DateTime<Utc>,
    ) -> Result<SignedHeaders, JobError> {
        let x_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let date = &x_date[..8];
        let host = match (url.host_str(), url.port()) {
            (Some(host), Some(port)) => format!("{host}:{port}"),
            (Some(host), None) => host.to_string(),
            (None, _) => String::new(),
        };
        let payload_hash = sha256_hex(body);

        let canonical_headers = format!(
            "content-type:{CONTENT_TYPE}\nhost:{host}\nx-content-sha256:{payload_hash}\nx-date:{x_date}\n"
        );
        let path = match url.path() {
            "" => "/",
            path => path,
        };
        let canonical_request = format!(
            "{method}\n{path}\n{}\n{canonical_headers}\n{SIGNED_HEADERS}\n{payload_hash}",
            canonical_query(url)
        );

        let scope = format!("{date}/{}/{}/request", self.region, self.service);
        let string_to_sign = format!(
            "HMAC-SHA256\n{x_date}\n{scope}\n{}",
            sha256_hex(canonical_request.as_bytes())
        );

        let k_date = hmac_sha256(self.secret_key.as_bytes(), date)?;
        let k_region = hmac_sha256(&k_date, &self.region)?;
        let k_service = hmac_sha256(&k_region, &self.service)?;
        let k_signing = hmac_sha256(&k_service, "request")?;
        let signature = hex::encode(hmac_sha256(&k_signing, &string_to_sign)?);

        Ok(SignedHeaders {
            authorization: format!(
                "HMAC-SHA256 Credential={}/{scope}, SignedHeaders={SIGNED_HEADERS}, Signature={signature}",
                self.access_key
            ),
            x_date,
            content_sha256: payload_hash,
            host,
        })
    }
}

fn canonical_query(url: &Url) -> String {
    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    pairs.sort();
    pairs
        .iter()
        .map(|(k, v)| format!("{}={}", uri_encode(k), uri_encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

fn uri_encode(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

fn hmac_sha256(key: &[u8], data: &str) -> Result<Vec<u8>, JobError> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| JobError::Configuration(format!("invalid signing key: {e}")))?;
    mac.update(data.as_bytes());
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Client for the Volcengine visual API's async task actions.
pub struct VisualClient {
    http: Client,
    settings: VisualSettings,
}

impl VisualClient {
    pub fn new(http: Client, settings: VisualSettings) -> Self {
        Self { http, settings }
    }

    pub fn from_config(config: &ProviderConfig) -> Self {
        Self::new(
            config.app_or_default().remote_client(),
            VisualSettings::from_config(config),
        )
    }

    pub fn is_configured(&self) -> bool {
        self.settings.credentials().is_some()
    }

    async fn call(&self, action: &str, form: &JobRequest) -> Result<Value, JobError> {
        let (ak, sk) = self.settings.credentials().ok_or_else(|| {
            JobError::Configuration(
                "VOLCENGINE_ACCESS_KEY_ID and VOLCENGINE_SECRET_ACCESS_KEY are required".into(),
            )
        })?;

        let base = self.settings.endpoint.trim_end_matches('/');
        let url = Url::parse(&format!("{base}/?Action={action}&Version={API_VERSION}"))
            .map_err(|e| JobError::Configuration(format!("invalid endpoint {base:?}: {e}")))?;
        let body = serde_json::to_vec(form)
            .map_err(|e| JobError::protocol(format!("unserializable request form: {e}")))?;

        let signer = RequestSigner::new(ak, sk, &self.settings.region, &self.settings.service);
        let signed = signer.sign("POST", &url, &body, Utc::now())?;

        tracing::debug!(action, host = %signed.host, "Calling visual API");

        let response = self
            .http
            .post(url)
            .header("Content-Type", CONTENT_TYPE)
            .header("Host", &signed.host)
            .header("X-Date", &signed.x_date)
            .header("X-Content-Sha256", &signed.content_sha256)
            .header("Authorization", &signed.authorization)
            .body(body)
            .send()
            .await
            .map_err(|e| JobError::transport("request_failed", e.to_string()))?;

        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| JobError::transport(i64::from(status.as_u16()), e.to_string()))?;

        // Error envelopes are JSON even on non-2xx statuses; the caller
        // classifies them.
        serde_json::from_slice(&bytes).map_err(|_| {
            JobError::transport(
                i64::from(status.as_u16()),
                format!(
                    "non-JSON response: {}",
                    String::from_utf8_lossy(&bytes).chars().take(200).collect::<String>()
                ),
            )
        })
    }
}

#[async_trait]
impl TaskApi for VisualClient {
    async fn submit(&self, form: &JobRequest) -> Result<Value, JobError> {
        self.call(SUBMIT_ACTION, form).await
    }

    async fn query(&self, form: &JobRequest) -> Result<Value, JobError> {
        self.call(QUERY_ACTION, form).await
    }
}
