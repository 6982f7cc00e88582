use async_trait::async_trait;
use base64::Engine;
use s3::creds::Credentials;
use s3::{Bucket, Region};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use strum::{Display, EnumString};

use crate::config::{non_blank, ProviderConfig};
use crate::models::artifact::StoredArtifact;
use crate::paths::{self, PathError, DEFAULT_IMAGE_PREFIX};

/// URL prefix under which the local image root is served.
pub const LOCAL_URL_PREFIX: &str = "/generated";

/// Persists decoded image payloads and reports where clients can fetch them.
#[async_trait]
pub trait Storage: Send + Sync {
    fn name(&self) -> &'static str;

    /// Decode `data` (bare base64 or a data URI) and write it under
    /// `folder`, naming the file after `prefix`.
    async fn save(
        &self,
        data: &str,
        prefix: Option<&str>,
        folder: &str,
    ) -> Result<StoredArtifact, StorageError>;

    fn public_url(&self, filename: &str, folder: &str) -> Result<String, StorageError>;

    /// Whether a remote service could fetch back URLs produced here.
    fn externally_reachable(&self) -> bool;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum StorageKind {
    #[default]
    Local,
    VolcengineTos,
    AliyunOss,
    TencentCos,
}

pub fn build(kind: StorageKind, config: &ProviderConfig) -> Arc<dyn Storage> {
    match kind {
        StorageKind::Local => Arc::new(LocalStorage::new(config.app_or_default().generated_dir())),
        StorageKind::VolcengineTos => Arc::new(ObjectStorage::from_config(ObjectVendor::VolcengineTos, config)),
        StorageKind::AliyunOss => Arc::new(ObjectStorage::from_config(ObjectVendor::AliyunOss, config)),
        StorageKind::TencentCos => Arc::new(ObjectStorage::from_config(ObjectVendor::TencentCos, config)),
    }
}

struct DecodedPayload {
    bytes: Vec<u8>,
    mime_type: String,
    extension: String,
}

fn decode_payload(data: &str) -> Result<DecodedPayload, StorageError> {
    let payload = paths::split_data_uri(data)?;
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(payload.base64)
        .map_err(|e| StorageError::InvalidPayload(e.to_string()))?;
    if bytes.is_empty() {
        return Err(StorageError::InvalidPayload("empty payload".to_string()));
    }
    Ok(DecodedPayload {
        bytes,
        mime_type: payload.mime_type,
        extension: payload.extension,
    })
}

fn filename_for(prefix: Option<&str>, extension: &str) -> String {
    let prefix = prefix
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .unwrap_or(DEFAULT_IMAGE_PREFIX);
    paths::artifact_filename(prefix, extension)
}

/// Writes images below a directory served at [`LOCAL_URL_PREFIX`].
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        if let Err(e) = std::fs::create_dir_all(&root) {
            tracing::warn!(path = %root.display(), error = %e, "Failed to create storage root");
        }
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl Storage for LocalStorage {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn save(
        &self,
        data: &str,
        prefix: Option<&str>,
        folder: &str,
    ) -> Result<StoredArtifact, StorageError> {
        let payload = decode_payload(data)?;
        let filename = filename_for(prefix, &payload.extension);
        let location = paths::locate(&self.root, LOCAL_URL_PREFIX, folder, &filename)?;

        if let Some(parent) = location.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&location.path, &payload.bytes).await?;

        tracing::info!(
            path = %location.path.display(),
            bytes = payload.bytes.len(),
            "Image saved locally"
        );

        Ok(StoredArtifact {
            local_reference: location.path.display().to_string(),
            public_url: location.url,
            externally_reachable: false,
        })
    }

    fn public_url(&self, filename: &str, folder: &str) -> Result<String, StorageError> {
        Ok(paths::locate(&self.root, LOCAL_URL_PREFIX, folder, filename)?.url)
    }

    fn externally_reachable(&self) -> bool {
        false
    }
}

/// S3-compatible object store vendors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectVendor {
    VolcengineTos,
    AliyunOss,
    TencentCos,
}

impl ObjectVendor {
    fn name(self) -> &'static str {
        match self {
            ObjectVendor::VolcengineTos => "volcengine_tos",
            ObjectVendor::AliyunOss => "aliyun_oss",
            ObjectVendor::TencentCos => "tencent_cos",
        }
    }

    pub fn env_prefix(self) -> &'static str {
        match self {
            ObjectVendor::VolcengineTos => "TOS_",
            ObjectVendor::AliyunOss => "OSS_",
            ObjectVendor::TencentCos => "COS_",
        }
    }

    fn default_region(self) -> Option<&'static str> {
        match self {
            ObjectVendor::VolcengineTos => Some("cn-north-1"),
            ObjectVendor::AliyunOss => Some("cn-hangzhou"),
            ObjectVendor::TencentCos => None,
        }
    }
}

/// `{TOS,OSS,COS}_*` settings. Each vendor names its key pair differently;
/// the aliases accept all of them.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ObjectStoreSettings {
    #[serde(default, alias = "access_key_id", alias = "secret_id")]
    pub access_key: Option<String>,
    #[serde(default, alias = "access_key_secret")]
    pub secret_key: Option<String>,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub bucket: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub public_domain: Option<String>,
}

/// Settings checked for completeness, ready to open a bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedObjectStore {
    pub access_key: String,
    pub secret_key: String,
    /// Endpoint URL including scheme.
    pub endpoint: String,
    pub bucket: String,
    pub region: String,
    pub public_domain: String,
}

impl ObjectStoreSettings {
    pub fn resolve(&self, vendor: ObjectVendor) -> Result<ResolvedObjectStore, StorageError> {
        let prefix = vendor.env_prefix();
        let required = |value: &Option<String>, key: &str| {
            non_blank(value)
                .map(str::to_string)
                .ok_or_else(|| StorageError::Configuration(format!("{prefix}{key} is not set")))
        };

        let access_key = required(&self.access_key, "ACCESS_KEY")?;
        let secret_key = required(&self.secret_key, "SECRET_KEY")?;
        let bucket = required(&self.bucket, "BUCKET")?;

        let (endpoint, region) = match vendor {
            ObjectVendor::TencentCos => {
                let region = required(&self.region, "REGION")?;
                (format!("cos.{region}.myqcloud.com"), region)
            }
            _ => {
                let endpoint = required(&self.endpoint, "ENDPOINT")?;
                let region = non_blank(&self.region)
                    .or(vendor.default_region())
                    .unwrap_or_default()
                    .to_string();
                (endpoint, region)
            }
        };

        let endpoint = if endpoint.contains("://") {
            endpoint
        } else {
            format!("https://{endpoint}")
        };
        let host = endpoint
            .split_once("://")
            .map_or(endpoint.as_str(), |(_, rest)| rest)
            .trim_end_matches('/');
        let public_domain = non_blank(&self.public_domain)
            .map(|d| d.trim_end_matches('/').to_string())
            .unwrap_or_else(|| format!("{bucket}.{host}"));

        Ok(ResolvedObjectStore {
            access_key,
            secret_key,
            endpoint,
            bucket,
            region,
            public_domain,
        })
    }
}

/// Uploads images to an S3-compatible bucket with a public domain.
pub struct ObjectStorage {
    vendor: ObjectVendor,
    settings: ObjectStoreSettings,
}

impl ObjectStorage {
    pub fn new(vendor: ObjectVendor, settings: ObjectStoreSettings) -> Self {
        if let Err(e) = settings.resolve(vendor) {
            tracing::warn!(provider = vendor.name(), error = %e, "Object storage is not configured");
        }
        Self { vendor, settings }
    }

    pub fn from_config(vendor: ObjectVendor, config: &ProviderConfig) -> Self {
        let settings = config.section(vendor.env_prefix()).unwrap_or_else(|e| {
            tracing::warn!(provider = vendor.name(), error = %e, "Invalid object storage settings");
            ObjectStoreSettings::default()
        });
        Self::new(vendor, settings)
    }

    fn bucket(&self, resolved: &ResolvedObjectStore) -> Result<Box<Bucket>, StorageError> {
        let region = Region::Custom {
            region: resolved.region.clone(),
            endpoint: resolved.endpoint.clone(),
        };
        let credentials = Credentials::new(
            Some(resolved.access_key.as_str()),
            Some(resolved.secret_key.as_str()),
            None,
            None,
            None,
        )
        .map_err(|e| StorageError::Configuration(e.to_string()))?;
        Ok(Bucket::new(&resolved.bucket, region, credentials)?)
    }
}

#[async_trait]
impl Storage for ObjectStorage {
    fn name(&self) -> &'static str {
        self.vendor.name()
    }

    async fn save(
        &self,
        data: &str,
        prefix: Option<&str>,
        folder: &str,
    ) -> Result<StoredArtifact, StorageError> {
        let resolved = self.settings.resolve(self.vendor)?;
        let payload = decode_payload(data)?;
        let filename = filename_for(prefix, &payload.extension);
        let key = paths::object_key(folder, &filename)?;

        let bucket = self.bucket(&resolved)?;
        let response = bucket
            .put_object_with_content_type(&key, &payload.bytes, &payload.mime_type)
            .await?;
        let status = response.status_code();
        if !(200..300).contains(&status) {
            return Err(StorageError::Upload { status, key });
        }

        tracing::info!(provider = self.name(), key = %key, "Image uploaded");

        Ok(StoredArtifact {
            public_url: format!("https://{}/{key}", resolved.public_domain),
            local_reference: key,
            externally_reachable: true,
        })
    }

    fn public_url(&self, filename: &str, folder: &str) -> Result<String, StorageError> {
        let resolved = self.settings.resolve(self.vendor)?;
        let key = paths::object_key(folder, filename)?;
        Ok(format!("https://{}/{key}", resolved.public_domain))
    }

    fn externally_reachable(&self) -> bool {
        true
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Storage not configured: {0}")]
    Configuration(String),

    #[error("Invalid image payload: {0}")]
    InvalidPayload(String),

    #[error(transparent)]
    Path(#[from] PathError),

    #[error("Filesystem write failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("S3 operation failed: {0}")]
    S3(#[from] s3::error::S3Error),

    #[error("Upload of {key} rejected with HTTP {status}")]
    Upload { status: u16, key: String },
}
