use crate::config::{
    DetectorSettings, RunConfiguration, DEFAULT_FRAME_STRIDE, DEFAULT_MAX_DURATION_SECS,
};
use crate::error::PipelineError;
use crate::pipeline::progress::{RunEstimate, NOMINAL_FPS};
use crate::run_context::{RunContext, UploadedVideo, VideoInput};
use crate::web::runs;
use axum::{
    extract::{multipart::MultipartError, Multipart, Path, Query, State},
    http::{header, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::{wrappers::IntervalStream, StreamExt};

const PROGRESS_INTERVAL: Duration = Duration::from_millis(500);

type ApiError = (StatusCode, Json<Value>);

fn api_error(status: StatusCode, message: impl std::fmt::Display) -> ApiError {
    (status, Json(json!({ "error": message.to_string() })))
}

/// Keeps axum's status, e.g. 413 once the upload exceeds the body limit.
fn multipart_error(e: MultipartError) -> ApiError {
    api_error(e.status(), e.body_text())
}

fn pipeline_error(e: PipelineError) -> ApiError {
    let status = match e {
        PipelineError::Configuration(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(json!({ "error": e.to_string(), "kind": e.kind() })),
    )
}

#[derive(Debug, Deserialize)]
pub struct EstimateQuery {
    pub frame_stride: Option<u32>,
    pub max_duration_seconds: Option<f64>,
    pub fps: Option<f64>,
}

#[derive(Serialize)]
pub struct CreateRunResponse {
    pub run_id: String,
}

pub async fn get_estimate(Query(query): Query<EstimateQuery>) -> Result<Json<RunEstimate>, ApiError> {
    let config = RunConfiguration::from_surface(
        query.frame_stride.unwrap_or(DEFAULT_FRAME_STRIDE),
        query.max_duration_seconds.unwrap_or(DEFAULT_MAX_DURATION_SECS),
    )
    .map_err(pipeline_error)?;
    Ok(Json(RunEstimate::new(
        &config,
        query.fps.unwrap_or(NOMINAL_FPS),
    )))
}

pub async fn get_runs() -> Json<Vec<Value>> {
    Json(runs::list_runs().iter().map(|s| s.to_status_json()).collect())
}

/// Accepts a multipart upload with a `video` file part and optional
/// `frame_stride` / `max_duration_seconds` fields.
pub async fn create_run_handler(
    State(detector): State<Arc<DetectorSettings>>,
    mut multipart: Multipart,
) -> Result<Json<CreateRunResponse>, ApiError> {
    let mut video = None;
    let mut frame_stride = DEFAULT_FRAME_STRIDE;
    let mut max_duration_seconds = DEFAULT_MAX_DURATION_SECS;

    while let Some(mut field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("video") => {
                let file_name = field.file_name().map(str::to_string);
                let mut upload = UploadedVideo::create(file_name).map_err(pipeline_error)?;
                while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
                    upload.append(&chunk).map_err(pipeline_error)?;
                }
                upload.finish().map_err(pipeline_error)?;
                video = Some(upload);
            }
            Some("frame_stride") => {
                let text = field.text().await.map_err(multipart_error)?;
                frame_stride = text.trim().parse().map_err(|_| {
                    api_error(StatusCode::BAD_REQUEST, format!("invalid frame_stride: {}", text))
                })?;
            }
            Some("max_duration_seconds") => {
                let text = field.text().await.map_err(multipart_error)?;
                max_duration_seconds = text.trim().parse().map_err(|_| {
                    api_error(
                        StatusCode::BAD_REQUEST,
                        format!("invalid max_duration_seconds: {}", text),
                    )
                })?;
            }
            other => tracing::debug!("Ignoring multipart field {:?}", other),
        }
    }

    let config =
        RunConfiguration::from_surface(frame_stride, max_duration_seconds).map_err(pipeline_error)?;
    let upload =
        video.ok_or_else(|| api_error(StatusCode::BAD_REQUEST, "missing `video` file part"))?;
    if upload.is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "uploaded video is empty"));
    }

    let upload_bytes = upload.len();
    let ctx = RunContext::new(config, VideoInput::Upload(upload));
    let run_id = ctx.run_id.clone();
    tracing::info!(
        "Accepted run {} ({} bytes, stride {}, max {}s)",
        run_id,
        upload_bytes,
        config.frame_stride,
        config.max_duration_seconds
    );
    runs::start_run(ctx, (*detector).clone());

    Ok(Json(CreateRunResponse { run_id }))
}

pub async fn get_run(Path(run_id): Path<String>) -> Result<Json<Value>, StatusCode> {
    let state = runs::get_run(&run_id).ok_or(StatusCode::NOT_FOUND)?;
    Ok(Json(state.to_status_json()))
}

/// Streams the run status until it reaches a terminal state.
pub async fn progress_sse(
    Path(run_id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, StatusCode> {
    let state = runs::get_run(&run_id).ok_or(StatusCode::NOT_FOUND)?;

    let stream = async_stream::stream! {
        let mut ticks = IntervalStream::new(tokio::time::interval(PROGRESS_INTERVAL));
        while ticks.next().await.is_some() {
            // Read the state first so the final snapshot is always emitted
            let terminal = state.current_state().is_terminal();
            match Event::default().json_data(state.to_status_json()) {
                Ok(event) => yield Ok(event),
                Err(e) => tracing::warn!("Failed to serialize progress event: {}", e),
            }
            if terminal {
                break;
            }
        }
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

pub async fn latest_frame(Path(run_id): Path<String>) -> Result<Response, StatusCode> {
    let state = runs::get_run(&run_id).ok_or(StatusCode::NOT_FOUND)?;
    let jpeg = state
        .latest_frame
        .read()
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .clone()
        .ok_or(StatusCode::NOT_FOUND)?;
    Ok(([(header::CONTENT_TYPE, "image/jpeg")], jpeg).into_response())
}

pub async fn stop_run(Path(run_id): Path<String>) -> Result<Json<Value>, StatusCode> {
    if !runs::stop_run(&run_id) {
        return Err(StatusCode::NOT_FOUND);
    }
    tracing::info!("Stop requested for run {}", run_id);
    let state = runs::get_run(&run_id).ok_or(StatusCode::NOT_FOUND)?;
    Ok(Json(state.to_status_json()))
}
