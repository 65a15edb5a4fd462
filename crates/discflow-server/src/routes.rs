//! Route table and request handlers.

use std::convert::Infallible;
use std::time::Duration;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};

use discflow::activity::{
    METADATA_COMPLETE_ROUTE, TRANSCODE_COMPLETE_ROUTE, TRANSCODE_PROGRESS_ROUTE,
};
use discflow::gateway::{CompletionAck, HeartbeatAck, MetadataResult, SubmittedJob};
use discflow::{JobSnapshot, JobSummary};

use crate::errors::{AppError, AppResult};
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/disc", post(create_disc).get(list_discs))
        .route("/disc/{id}", get(get_disc))
        .route("/disc/{id}/events", get(disc_events))
        .route(METADATA_COMPLETE_ROUTE, post(complete_metadata))
        .route(TRANSCODE_COMPLETE_ROUTE, post(complete_transcode))
        .route(TRANSCODE_PROGRESS_ROUTE, post(transcode_progress))
}

/// Unwraps a JSON body, turning any rejection into a 400.
fn body<T>(payload: Result<Json<T>, JsonRejection>) -> AppResult<T> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| AppError::bad_request(rejection.body_text()))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateDiscRequest {
    #[serde(alias = "uuid")]
    pub id: String,
    #[serde(alias = "path")]
    pub source_path: String,
}

#[derive(Debug, Deserialize)]
pub struct CompleteMetadataRequest {
    pub token: String,
    #[serde(default)]
    pub result: Option<MetadataResult>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CompleteTranscodeRequest {
    pub token: String,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscodeProgressRequest {
    pub token: String,
    #[serde(default, alias = "progress")]
    pub progress_percent: Option<f64>,
}

async fn health() -> &'static str {
    "ok"
}

async fn create_disc(
    State(state): State<AppState>,
    payload: Result<Json<CreateDiscRequest>, JsonRejection>,
) -> AppResult<(StatusCode, Json<SubmittedJob>)> {
    let request = body(payload)?;
    let created = state
        .gateway
        .submit(&request.id, &request.source_path)
        .await?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn list_discs(State(state): State<AppState>) -> AppResult<Json<Vec<JobSummary>>> {
    Ok(Json(state.gateway.list_jobs().await?))
}

async fn get_disc(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<JobSnapshot>> {
    Ok(Json(state.gateway.get_job(&id).await?))
}

/// Streams the job's progress events as they are committed.
async fn disc_events(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    // Subscribe before the lookup so nothing committed in between is lost.
    let rx = state.gateway.engine().progress().subscribe();
    state.gateway.get_job(&id).await?;

    let events = BroadcastStream::new(rx).filter_map(move |message| match message {
        Ok(event) if event.job_id == id => {
            let payload = serde_json::to_string(&event).unwrap_or_default();
            Some(Ok(Event::default().data(payload)))
        }
        Ok(_) => None,
        Err(BroadcastStreamRecvError::Lagged(skipped)) => {
            tracing::warn!(job_id = %id, skipped, "progress stream lagged");
            None
        }
    });
    Ok(Sse::new(events).keep_alive(KeepAlive::new().interval(Duration::from_secs(15))))
}

async fn complete_metadata(
    State(state): State<AppState>,
    payload: Result<Json<CompleteMetadataRequest>, JsonRejection>,
) -> AppResult<Json<CompletionAck>> {
    let request = body(payload)?;
    let ack = state
        .gateway
        .complete_metadata(&request.token, request.result, request.error)
        .await?;
    Ok(Json(ack))
}

async fn complete_transcode(
    State(state): State<AppState>,
    payload: Result<Json<CompleteTranscodeRequest>, JsonRejection>,
) -> AppResult<Json<CompletionAck>> {
    let request = body(payload)?;
    let ack = state
        .gateway
        .complete_transcode(&request.token, request.error)
        .await?;
    Ok(Json(ack))
}

async fn transcode_progress(
    State(state): State<AppState>,
    payload: Result<Json<TranscodeProgressRequest>, JsonRejection>,
) -> AppResult<Json<HeartbeatAck>> {
    let request = body(payload)?;
    let ack = state
        .gateway
        .heartbeat_transcode(&request.token, request.progress_percent)
        .await?;
    Ok(Json(ack))
}
