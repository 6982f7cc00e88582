//! Resolution of the source image for image-to-image edits.

use base64::Engine;
use reqwest::Client;
use std::path::Path;

use crate::paths::{self, PathError};

#[derive(Debug, thiserror::Error)]
pub enum SourceImageError {
    #[error("Unsupported image reference: {0}")]
    Unsupported(String),

    #[error(transparent)]
    Path(#[from] PathError),

    #[error("Failed to download source image: {0}")]
    Download(#[from] reqwest::Error),

    #[error("Source image not found: {0}")]
    NotFound(String),

    #[error("Failed to read source image: {0}")]
    Io(#[from] std::io::Error),

    #[error("Source is not a recognizable image: {0}")]
    NotAnImage(#[from] image::ImageError),

    #[error("Source image payload is not valid base64: {0}")]
    Decode(#[from] base64::DecodeError),
}

/// Bare base64 of the image referenced by `reference`, which may be a data
/// URI, an http(s) URL, or a `/`-rooted path below `public_dir`.
pub async fn resolve_source_image(
    http: &Client,
    public_dir: &Path,
    reference: &str,
) -> Result<String, SourceImageError> {
    let reference = reference.trim();

    if reference.starts_with("data:") {
        let payload = paths::split_data_uri(reference)?;
        let bytes = base64::engine::general_purpose::STANDARD.decode(payload.base64)?;
        check_image(&bytes)?;
        return Ok(payload.base64.to_string());
    }

    if reference.starts_with("http://") || reference.starts_with("https://") {
        let bytes = http
            .get(reference)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;
        check_image(&bytes)?;
        tracing::debug!(bytes = bytes.len(), "Downloaded source image");
        return Ok(base64::engine::general_purpose::STANDARD.encode(&bytes));
    }

    if reference.starts_with('/') {
        let path = paths::public_path(public_dir, reference)?;
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SourceImageError::NotFound(reference.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        check_image(&bytes)?;
        return Ok(base64::engine::general_purpose::STANDARD.encode(&bytes));
    }

    Err(SourceImageError::Unsupported(
        reference.chars().take(64).collect(),
    ))
}

fn check_image(bytes: &[u8]) -> Result<(), SourceImageError> {
    let format = image::guess_format(bytes)?;
    tracing::debug!(format = ?format, "Source image format");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    /// Smallest byte sequence `image::guess_format` recognizes as PNG.
    const PNG_MAGIC: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0];

    fn png_base64() -> String {
        base64::engine::general_purpose::STANDARD.encode(PNG_MAGIC)
    }

    #[tokio::test]
    async fn data_uri_yields_payload() {
        let uri = format!("data:image/png;base64,{}", png_base64());
        let resolved = resolve_source_image(&Client::new(), Path::new("public"), &uri)
            .await
            .unwrap();
        assert_eq!(resolved, png_base64());
    }

    #[tokio::test]
    async fn data_uri_with_non_image_is_rejected() {
        let uri = "data:image/png;base64,aGVsbG8gd29ybGQ=";
        let err = resolve_source_image(&Client::new(), Path::new("public"), uri)
            .await
            .unwrap_err();
        assert!(matches!(err, SourceImageError::NotAnImage(_)));
    }

    #[tokio::test]
    async fn local_path_is_read_below_public_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("generated/pages")).unwrap();
        std::fs::write(dir.path().join("generated/pages/p.png"), PNG_MAGIC).unwrap();

        let resolved =
            resolve_source_image(&Client::new(), dir.path(), "/generated/pages/p.png")
                .await
                .unwrap();
        assert_eq!(resolved, png_base64());

        let missing = resolve_source_image(&Client::new(), dir.path(), "/generated/nope.png")
            .await
            .unwrap_err();
        assert!(matches!(missing, SourceImageError::NotFound(_)));
    }

    #[tokio::test]
    async fn traversal_and_unknown_schemes_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            resolve_source_image(&Client::new(), dir.path(), "/../etc/passwd").await,
            Err(SourceImageError::Path(_))
        ));
        assert!(matches!(
            resolve_source_image(&Client::new(), dir.path(), "ftp://host/a.png").await,
            Err(SourceImageError::Unsupported(_))
        ));
    }

    #[tokio::test]
    async fn remote_image_is_downloaded() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/a.png");
                then.status(200).body(PNG_MAGIC);
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/gone.png");
                then.status(404);
            })
            .await;

        let client = Client::new();
        let resolved = resolve_source_image(&client, Path::new("public"), &server.url("/a.png"))
            .await
            .unwrap();
        assert_eq!(resolved, png_base64());

        let err = resolve_source_image(&client, Path::new("public"), &server.url("/gone.png"))
            .await
            .unwrap_err();
        assert!(matches!(err, SourceImageError::Download(_)));
    }
}
