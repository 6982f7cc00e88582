use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use crate::app_state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub providers: ProviderSummary,
    pub storage_external_accessible: bool,
    pub timestamp: i64,
}

#[derive(Serialize)]
pub struct ProviderSummary {
    pub storage: String,
    pub audio: String,
    pub image: String,
}

/// GET /api/health: active providers and storage reachability.
///
/// Providers are constructed on first use, so this also warms the registry.
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let storage = state.providers.storage();
    let audio = state.providers.audio();
    let images = state.providers.images();

    let response = HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        providers: ProviderSummary {
            storage: storage.name().to_string(),
            audio: audio.name().to_string(),
            image: images.name().to_string(),
        },
        storage_external_accessible: storage.externally_reachable(),
        timestamp: chrono::Utc::now().timestamp(),
    };

    (StatusCode::OK, Json(response))
}
