pub mod generate;
pub mod health;
pub mod metrics;

use axum::routing::{get, post};
use axum::Router;
use tower_http::services::ServeDir;

use crate::app_state::AppState;
use crate::services::storage::LOCAL_URL_PREFIX;
use crate::services::synth::AUDIO_URL_PREFIX;

/// API routes plus the static trees generated artifacts are served from.
pub fn api_router(state: AppState) -> Router {
    let generated = ServeDir::new(state.public_dir().join("generated"));
    let audio = ServeDir::new(state.public_dir().join("audio"));

    Router::new()
        .route("/api/health", get(health::health_check))
        .route("/api/generate-image", post(generate::generate_image))
        .route("/api/edit-image", post(generate::edit_image))
        .route("/api/generate-audio", post(generate::generate_audio))
        .nest_service(LOCAL_URL_PREFIX, generated)
        .nest_service(AUDIO_URL_PREFIX, audio)
        .with_state(state)
}
