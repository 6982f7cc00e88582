use serde::Serialize;

/// A persisted artifact: where it was written and how clients reach it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredArtifact {
    /// Filesystem path or object key.
    pub local_reference: String,
    pub public_url: String,
    /// Whether a remote service could fetch `public_url` back.
    pub externally_reachable: bool,
}
