use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use garde::Validate;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::models::generation::{
    ApiResponse, AudioGenerationData, AudioGenerationRequest, ImageEditData, ImageEditRequest,
    ImageGenerationData, ImageGenerationRequest, StorageInfo,
};
use crate::models::image::EncodedImage;
use crate::services::image_gen::ImageRequest;
use crate::services::source_image::resolve_source_image;
use crate::services::storage::Storage;
use crate::services::synth::VoiceParams;

type Reply<T> = (StatusCode, Json<ApiResponse<T>>);

fn ok<T>(endpoint: &'static str, data: T) -> Reply<T> {
    metrics::counter!("http_generation_requests_total", "endpoint" => endpoint, "outcome" => "ok")
        .increment(1);
    (StatusCode::OK, Json(ApiResponse::ok(data)))
}

/// Provider failures are reported in the envelope with a 200 status; only
/// malformed requests get a 4xx.
fn fail<T>(endpoint: &'static str, status: StatusCode, error: impl Into<String>) -> Reply<T> {
    let outcome = if status.is_client_error() {
        "invalid"
    } else {
        "failed"
    };
    metrics::counter!("http_generation_requests_total", "endpoint" => endpoint, "outcome" => outcome)
        .increment(1);
    (status, Json(ApiResponse::failure(error)))
}

fn request_id() -> String {
    Uuid::new_v4().simple().to_string()[..12].to_string()
}

/// Deserialize and validate a JSON body, mapping both failure modes onto
/// the 400 envelope.
fn accept<T: Validate<Context = ()>>(
    endpoint: &'static str,
    body: Result<Json<T>, JsonRejection>,
) -> Result<T, StatusCode> {
    let Json(request) = body.map_err(|rejection| {
        tracing::warn!(endpoint, error = %rejection, "Rejected request body");
        StatusCode::BAD_REQUEST
    })?;
    request.validate().map_err(|report| {
        tracing::warn!(endpoint, error = %report, "Request validation failed");
        StatusCode::BAD_REQUEST
    })?;
    Ok(request)
}

/// Persist an inline result so clients get a URL instead of a data URI.
async fn persist_inline(
    storage: &dyn Storage,
    image: &EncodedImage,
    prefix: &str,
    folder: &str,
) -> Result<(String, StorageInfo), String> {
    let artifact = storage
        .save(&image.as_uri(), Some(prefix), folder)
        .await
        .map_err(|e| format!("Failed to store generated image: {e}"))?;
    let info = StorageInfo {
        storage_provider: storage.name().to_string(),
        local_path: artifact.local_reference,
        external_accessible: artifact.externally_reachable,
    };
    Ok((artifact.public_url, info))
}

/// POST /api/generate-image: text-to-image.
pub async fn generate_image(
    State(state): State<AppState>,
    body: Result<Json<ImageGenerationRequest>, JsonRejection>,
) -> Reply<ImageGenerationData> {
    const ENDPOINT: &str = "generate_image";
    let request = match accept(ENDPOINT, body) {
        Ok(request) => request,
        Err(status) => return fail(ENDPOINT, status, "Invalid request body"),
    };

    let request_id = request_id();
    let frame = request.frame.as_ref();
    let prompt = frame
        .and_then(|f| f.prompt_override())
        .unwrap_or(request.prompt.as_str())
        .trim()
        .to_string();
    if prompt.is_empty() {
        return fail(ENDPOINT, StatusCode::BAD_REQUEST, "Missing required parameter: prompt");
    }

    let mut job = ImageRequest::text(prompt.as_str());
    if let Some(ratio) = frame.and_then(|f| f.aspect_ratio.as_deref()) {
        job = job.with_aspect_ratio(ratio);
    }

    tracing::info!(
        request_id = %request_id,
        prompt_chars = prompt.chars().count(),
        aspect_ratio = job.aspect_ratio(),
        save_to_storage = request.save_to_storage,
        "Image generation requested"
    );

    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();

    let generator = state.providers.images();
    let image = match generator.generate(&job, &cancel).await {
        Ok(image) => image,
        Err(e) => {
            tracing::warn!(request_id = %request_id, kind = e.kind(), error = %e, "Image generation failed");
            return fail(ENDPOINT, StatusCode::OK, format!("Image generation failed: {e}"));
        }
    };

    let (mut image_url, mut storage) = (image.as_uri(), None);
    if request.save_to_storage && image.is_inline() {
        let (folder, prefix) = frame
            .map(|f| f.storage_target(&request_id))
            .unwrap_or_else(|| (String::new(), "img".to_string()));
        match persist_inline(state.providers.storage().as_ref(), &image, &prefix, &folder).await {
            Ok((url, info)) => {
                image_url = url;
                storage = Some(info);
            }
            Err(message) => {
                tracing::warn!(request_id = %request_id, error = %message, "Storing image failed");
                return fail(ENDPOINT, StatusCode::OK, message);
            }
        }
    }

    tracing::info!(
        request_id = %request_id,
        inline = image_url.starts_with("data:"),
        stored = storage.is_some(),
        "Image generation completed"
    );

    ok(
        ENDPOINT,
        ImageGenerationData {
            image_url,
            task_id: format!("{}_{request_id}", generator.name()),
            prompt,
            frame: request.frame,
            storage,
        },
    )
}

/// POST /api/edit-image: image-to-image.
pub async fn edit_image(
    State(state): State<AppState>,
    body: Result<Json<ImageEditRequest>, JsonRejection>,
) -> Reply<ImageEditData> {
    const ENDPOINT: &str = "edit_image";
    let request = match accept(ENDPOINT, body) {
        Ok(request) => request,
        Err(status) => return fail(ENDPOINT, status, "Invalid request body"),
    };

    let request_id = request_id();
    let prompt = request.prompt.trim();
    if prompt.is_empty() {
        return fail(ENDPOINT, StatusCode::BAD_REQUEST, "Missing edit prompt");
    }

    let source = match resolve_source_image(&state.http, state.public_dir(), &request.image_url).await
    {
        Ok(source) => source,
        Err(e) => {
            tracing::warn!(request_id = %request_id, error = %e, "Source image rejected");
            return fail(ENDPOINT, StatusCode::BAD_REQUEST, e.to_string());
        }
    };

    tracing::info!(
        request_id = %request_id,
        strength = request.strength,
        page_index = ?request.page_index,
        "Image edit requested"
    );

    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();

    let job = ImageRequest::edit(prompt, source, request.strength);
    let image = match state.providers.images().generate(&job, &cancel).await {
        Ok(image) => image,
        Err(e) => {
            tracing::warn!(request_id = %request_id, kind = e.kind(), error = %e, "Image edit failed");
            return fail(ENDPOINT, StatusCode::OK, format!("Image edit failed: {e}"));
        }
    };

    let (mut image_url, mut storage) = (image.as_uri(), None);
    if image.is_inline() {
        let prefix = match request.page_index {
            Some(index) => format!("edited_{index}"),
            None => format!("edited_{request_id}"),
        };
        match persist_inline(state.providers.storage().as_ref(), &image, &prefix, "pages").await {
            Ok((url, info)) => {
                image_url = url;
                storage = Some(info);
            }
            Err(message) => return fail(ENDPOINT, StatusCode::OK, message),
        }
    }

    ok(
        ENDPOINT,
        ImageEditData {
            image_url,
            prompt: request.prompt,
            page_index: request.page_index,
            storage,
        },
    )
}

/// POST /api/generate-audio: narration for one page or free text.
pub async fn generate_audio(
    State(state): State<AppState>,
    body: Result<Json<AudioGenerationRequest>, JsonRejection>,
) -> Reply<AudioGenerationData> {
    const ENDPOINT: &str = "generate_audio";
    let request = match accept(ENDPOINT, body) {
        Ok(request) => request,
        Err(status) => return fail(ENDPOINT, status, "Invalid request body"),
    };

    let text = request.text.trim();
    if text.is_empty() {
        return fail(ENDPOINT, StatusCode::BAD_REQUEST, "Missing required parameter: text");
    }

    let request_id = request_id();
    let (prefix, folder) = match request.page_index {
        Some(index) => (format!("page_{index}"), "pages"),
        None => (format!("audio_{request_id}"), ""),
    };
    let voice = VoiceParams {
        speaker_id: request.speaker_id.clone(),
        speed_factor: request.speed_factor.clone(),
        pitch_factor: request.pitch_factor.clone(),
    };

    let synthesizer = state.providers.audio();
    tracing::info!(
        request_id = %request_id,
        provider = synthesizer.name(),
        chars = text.chars().count(),
        page_index = ?request.page_index,
        "Audio generation requested"
    );

    match synthesizer
        .synthesize_and_save(text, Some(&prefix), folder, &voice)
        .await
    {
        Ok(artifact) => ok(
            ENDPOINT,
            AudioGenerationData {
                audio_url: artifact.public_url,
                local_path: artifact.local_reference,
                text: request.text,
                page_index: request.page_index,
                speaker_id: request.speaker_id,
            },
        ),
        Err(e) => {
            tracing::warn!(provider = synthesizer.name(), error = %e, "Audio generation failed");
            fail(ENDPOINT, StatusCode::OK, format!("Audio generation failed: {e}"))
        }
    }
}
