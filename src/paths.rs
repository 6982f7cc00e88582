//! Artifact naming and layout.
//!
//! Generated files live under a capability root (`generated/`, `audio/`),
//! optionally grouped into a sub-folder, and are named
//! `{prefix}_{timestamp_ms}_{hash8}.{ext}`. The hash is derived from the
//! timestamp and a random UUID, never from the content: it only keeps
//! concurrent writers from colliding.

use chrono::Utc;
use sha2::{Digest, Sha256};
use std::path::{Component, Path, PathBuf};
use uuid::Uuid;

use crate::models::image::DEFAULT_INLINE_MIME;

pub const DEFAULT_IMAGE_PREFIX: &str = "img";
pub const DEFAULT_AUDIO_PREFIX: &str = "audio";

#[derive(Debug, thiserror::Error)]
pub enum PathError {
    #[error("Malformed data URI: {0}")]
    InvalidDataUri(String),

    #[error("Unsafe path segment: {0:?}")]
    UnsafeSegment(String),
}

/// `{prefix}_{timestamp_ms}_{hash8}` without extension.
pub fn generate_filename(prefix: &str) -> String {
    let timestamp = Utc::now().timestamp_millis();
    let digest = Sha256::digest(format!("{timestamp}:{}", Uuid::new_v4()));
    let hash = hex::encode(digest);
    format!("{prefix}_{timestamp}_{}", &hash[..8])
}

/// Unique artifact filename with extension.
pub fn artifact_filename(prefix: &str, extension: &str) -> String {
    format!("{}.{extension}", generate_filename(prefix))
}

/// Base64 payload split out of a raw string or a data URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPayload<'a> {
    pub base64: &'a str,
    pub mime_type: String,
    pub extension: String,
}

/// Accepts `data:<mime>;base64,<payload>` or bare base64 (assumed PNG).
pub fn split_data_uri(input: &str) -> Result<DataPayload<'_>, PathError> {
    let Some(rest) = input.strip_prefix("data:") else {
        return Ok(DataPayload {
            base64: input.trim(),
            mime_type: DEFAULT_INLINE_MIME.to_string(),
            extension: "png".to_string(),
        });
    };

    let (header, payload) = rest
        .split_once(',')
        .ok_or_else(|| PathError::InvalidDataUri("missing ',' separator".to_string()))?;
    let mime_type = header.split(';').next().unwrap_or_default().trim();
    if !mime_type.contains('/') {
        return Err(PathError::InvalidDataUri(format!(
            "missing mime type in header {header:?}"
        )));
    }

    Ok(DataPayload {
        base64: payload.trim(),
        mime_type: mime_type.to_string(),
        extension: extension_for_mime(mime_type),
    })
}

/// File extension for a mime type (`image/jpeg` -> `jpg`).
pub fn extension_for_mime(mime_type: &str) -> String {
    let subtype = mime_type.split('/').nth(1).unwrap_or("bin");
    let subtype = subtype.split('+').next().unwrap_or(subtype);
    match subtype {
        "jpeg" => "jpg".to_string(),
        other => other.to_ascii_lowercase(),
    }
}

/// Resolved destination of an artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactLocation {
    pub path: PathBuf,
    pub url: String,
    /// `folder/filename`, or just `filename` at the root.
    pub key: String,
}

/// Place `filename` under `base_path` / `base_url`, inside `folder` if given.
pub fn locate(
    base_path: &Path,
    base_url: &str,
    folder: &str,
    filename: &str,
) -> Result<ArtifactLocation, PathError> {
    let key = object_key(folder, filename)?;
    Ok(ArtifactLocation {
        path: base_path.join(&key),
        url: format!("{}/{key}", base_url.trim_end_matches('/')),
        key,
    })
}

/// Relative key `folder/filename`, rejecting anything that could escape
/// the capability root.
pub fn object_key(folder: &str, filename: &str) -> Result<String, PathError> {
    ensure_relative(folder)?;
    ensure_relative(filename)?;
    if filename.is_empty() || filename.contains('/') {
        return Err(PathError::UnsafeSegment(filename.to_string()));
    }
    let folder = folder.trim_matches('/');
    Ok(if folder.is_empty() {
        filename.to_string()
    } else {
        format!("{folder}/{filename}")
    })
}

fn ensure_relative(segment: &str) -> Result<(), PathError> {
    if segment.contains('\\') {
        return Err(PathError::UnsafeSegment(segment.to_string()));
    }
    let safe = Path::new(segment.trim_start_matches('/'))
        .components()
        .all(|c| matches!(c, Component::Normal(_)));
    if safe {
        Ok(())
    } else {
        Err(PathError::UnsafeSegment(segment.to_string()))
    }
}

/// Path under `root` for a `/`-rooted public URL path such as
/// `/generated/pages/page_1.png`.
pub fn public_path(root: &Path, url_path: &str) -> Result<PathBuf, PathError> {
    let relative = url_path.trim_start_matches('/');
    if relative.is_empty() {
        return Err(PathError::UnsafeSegment(url_path.to_string()));
    }
    ensure_relative(relative)?;
    Ok(root.join(relative))
}
