use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{multipart::MultipartError, DefaultBodyLimit, Multipart, Path, State},
    http::{header, Method, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use uuid::Uuid;

use livepad_shared::types::{now, FileRef, RoomId};

use crate::authority::RoomAuthority;
use crate::blob_store::BlobStore;
use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::rate_limit::RateLimiter;
use crate::ws;

/// Room for the text fields of the upload form on top of the file itself.
const FORM_OVERHEAD: usize = 64 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub authority: Arc<RoomAuthority>,
    pub rate_limiter: RateLimiter,
    pub config: Arc<ServerConfig>,
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/ws", get(ws::ws_handler))
        .route("/files", post(file_upload))
        .route("/files/:id", get(file_download))
        .layer(DefaultBodyLimit::max(
            state.config.max_file_size.saturating_add(FORM_OVERHEAD),
        ))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Serialize)]
struct UploadResponse {
    success: bool,
    file: FileRef,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Default)]
struct UploadForm {
    room_id: Option<String>,
    password_hash: Option<String>,
    encrypted_name: Option<String>,
    original_type: Option<String>,
    data: Option<Bytes>,
}

impl UploadForm {
    async fn read(multipart: &mut Multipart, max: usize) -> Result<Self, ServerError> {
        let mut form = Self::default();
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| multipart_error(e, max))?
        {
            let name = field.name().unwrap_or("").to_string();
            match name.as_str() {
                "file" => {
                    form.data = Some(field.bytes().await.map_err(|e| multipart_error(e, max))?)
                }
                "roomId" | "passwordHash" | "encryptedName" | "originalType" => {
                    let value = field.text().await.map_err(|e| multipart_error(e, max))?;
                    let slot = match name.as_str() {
                        "roomId" => &mut form.room_id,
                        "passwordHash" => &mut form.password_hash,
                        "encryptedName" => &mut form.encrypted_name,
                        _ => &mut form.original_type,
                    };
                    *slot = Some(value);
                }
                _ => {}
            }
        }
        Ok(form)
    }
}

fn multipart_error(e: MultipartError, max: usize) -> ServerError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ServerError::PayloadTooLarge { max }
    } else {
        ServerError::BadRequest(format!("Multipart error: {e}"))
    }
}

fn required(value: Option<String>, field: &str) -> Result<String, ServerError> {
    value
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ServerError::BadRequest(format!("Missing '{field}' field")))
}

/// Store an already-encrypted file for a room and announce it.
///
/// The bytes are written first; if the room then refuses the metadata (cap
/// reached, room deleted meanwhile) they are removed again.
async fn file_upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ServerError> {
    let max = state.config.max_file_size;
    let form = UploadForm::read(&mut multipart, max).await?;

    let room_id = RoomId::parse(&required(form.room_id, "roomId")?)?;
    let password_hash = required(form.password_hash, "passwordHash")?;
    let name = required(form.encrypted_name, "encryptedName")?;
    let data = form
        .data
        .ok_or_else(|| ServerError::BadRequest("Missing 'file' field".to_string()))?;
    if data.len() > max {
        return Err(ServerError::BlobTooLarge {
            size: data.len(),
            max,
        });
    }

    state
        .authority
        .verify_credential(&room_id, &password_hash)
        .await?;

    if !state.rate_limiter.check(&room_id).await {
        return Err(ServerError::TooManyRequests);
    }

    let blobs = state.authority.blobs();
    let blob_id = blobs.put(&data).await?;

    let file = FileRef {
        id: Uuid::new_v4(),
        name,
        url: BlobStore::locator(blob_id),
        mime_type: form
            .original_type
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| "application/octet-stream".to_string()),
        size: data.len() as u64,
        created_at: now(),
    };

    if let Err(err) = state.authority.add_file(&room_id, file.clone()).await {
        if let Err(cleanup) = blobs.remove(blob_id).await {
            warn!(blob = %blob_id, error = %cleanup, "Could not remove bytes of rejected upload");
        }
        return Err(err.into());
    }

    info!(room = %room_id.short(), file = %file.id, size = file.size, "File uploaded");
    Ok(Json(UploadResponse {
        success: true,
        file,
    }))
}

async fn file_download(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServerError> {
    let data = state.authority.blobs().fetch(id).await?;
    Ok(([(header::CONTENT_TYPE, "application/octet-stream")], data))
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
