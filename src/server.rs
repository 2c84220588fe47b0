//! HTTP route handlers for the fingerprint service.
//!
//! Exposes the public API used by the binary to accept audio uploads, index
//! directories and return ranked matches.

use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::engine::SharedEngine;
use crate::error::EngineError;
use crate::index::{IndexStats, Track};
use crate::matcher::MatchOptions;
use crate::pipeline::{self, FileStatus};

pub fn router(engine: SharedEngine) -> Router {
    Router::new()
        .route("/search", post(search))
        .route("/index", post(index_directory))
        .route("/tracks", get(list_tracks))
        .route("/tracks/{track_id}", get(get_track).delete(forget_track))
        .route("/stats", get(stats))
        .route("/health", get(|| async { "healthy" }))
        .with_state(engine)
}

/// JSON error body paired with a status code.
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        let status = match &e {
            EngineError::DecodeFailure(_) | EngineError::EmptyFingerprint => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            EngineError::DuplicateTrack(_) => StatusCode::CONFLICT,
            EngineError::UnknownTrack(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: e.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({ "error": self.message }));
        (self.status, body).into_response()
    }
}

#[derive(Serialize)]
pub struct SearchResponse {
    matches: Vec<MatchEntry>,
    query_duration_s: f64,
    query_landmarks: usize,
    processing_time_ms: f64,
}

#[derive(Serialize)]
struct MatchEntry {
    score: f32,
    offset_frames: i64,
    offset_s: f64,
    aligned: u32,
    track: Track,
}

/// Handle a multipart upload and return ranked matches as JSON.
///
/// Expects a form field named `file` containing the query clip.
async fn search(
    State(engine): State<SharedEngine>,
    mut multipart: Multipart,
) -> Result<Json<SearchResponse>, ApiError> {
    let started = Instant::now();

    let mut audio_bytes = Vec::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(e.to_string()))?
    {
        if field.name() == Some("file") {
            audio_bytes = field
                .bytes()
                .await
                .map_err(|e| ApiError::bad_request(e.to_string()))?
                .to_vec();
        }
    }
    if audio_bytes.is_empty() {
        return Err(ApiError::bad_request("missing `file` form field"));
    }

    let worker = engine.clone();
    let report = tokio::task::spawn_blocking(move || {
        worker.search_bytes(&audio_bytes, 5, &MatchOptions::default())
    })
    .await
    .map_err(|e| ApiError::internal(e.to_string()))??;

    let frame_period = engine.config().frame_period_s();
    let matches = report
        .matches
        .into_iter()
        .filter_map(|m| {
            engine.get_track(&m.track_id).map(|track| MatchEntry {
                score: m.score,
                offset_frames: m.offset_frames,
                offset_s: m.offset_frames as f64 * frame_period,
                aligned: m.aligned,
                track,
            })
        })
        .collect();

    Ok(Json(SearchResponse {
        matches,
        query_duration_s: report.query_duration_s,
        query_landmarks: report.query_landmarks,
        processing_time_ms: started.elapsed().as_secs_f64() * 1000.0,
    }))
}

#[derive(Deserialize)]
pub struct IndexRequest {
    directory: String,
    #[serde(default)]
    concurrency: Option<usize>,
}

#[derive(Serialize)]
pub struct IndexResponse {
    total: usize,
    indexed: u64,
    skipped: u64,
    errors: Vec<IndexError>,
}

#[derive(Serialize)]
struct IndexError {
    path: String,
    error: String,
}

/// Walk a directory and index every supported audio file in it.
async fn index_directory(
    State(engine): State<SharedEngine>,
    Json(request): Json<IndexRequest>,
) -> Result<Json<IndexResponse>, ApiError> {
    let root = PathBuf::from(&request.directory);
    if !root.is_dir() {
        return Err(ApiError::bad_request(format!(
            "{} is not a directory",
            request.directory
        )));
    }

    let paths = pipeline::collect_audio_files(&root);
    let total = paths.len();
    let concurrency = request.concurrency.unwrap_or(4);
    let cancel = Arc::new(AtomicBool::new(false));

    let report = pipeline::index_paths(engine, paths, concurrency, cancel, |done, total, file| {
        match &file.status {
            FileStatus::Indexed(track_id) => {
                tracing::info!(done, total, path = %file.path.display(), %track_id, "indexed")
            }
            FileStatus::Skipped(reason) => {
                tracing::debug!(done, total, path = %file.path.display(), %reason, "skipped")
            }
            FileStatus::Failed(error) => {
                tracing::warn!(done, total, path = %file.path.display(), %error, "failed")
            }
        }
    })
    .await;

    let errors = report
        .errors
        .iter()
        .map(|file| IndexError {
            path: file.path.display().to_string(),
            error: match &file.status {
                FileStatus::Failed(error) => error.clone(),
                _ => String::new(),
            },
        })
        .collect();

    Ok(Json(IndexResponse {
        total,
        indexed: report.indexed,
        skipped: report.skipped,
        errors,
    }))
}

#[derive(Serialize)]
pub struct TracksResponse {
    tracks: Vec<Track>,
    count: usize,
}

async fn list_tracks(State(engine): State<SharedEngine>) -> Json<TracksResponse> {
    let tracks = engine.list_tracks();
    let count = tracks.len();
    Json(TracksResponse { tracks, count })
}

async fn get_track(
    State(engine): State<SharedEngine>,
    Path(track_id): Path<String>,
) -> Result<Json<Track>, ApiError> {
    engine
        .get_track(&track_id)
        .map(Json)
        .ok_or_else(|| ApiError::from(EngineError::UnknownTrack(track_id)))
}

async fn forget_track(
    State(engine): State<SharedEngine>,
    Path(track_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    if engine.forget(&track_id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::from(EngineError::UnknownTrack(track_id)))
    }
}

async fn stats(State(engine): State<SharedEngine>) -> Json<IndexStats> {
    Json(engine.stats())
}
