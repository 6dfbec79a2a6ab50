//! Work plan session API endpoints.
//!
//! - Snapshot of the session
//! - Upload a spreadsheet (runs a full parse + analysis cycle)
//! - Mark an assignee as sent
//! - Reset / dismiss the current error
//! - Pending drafts
//! - Server-sent event stream of session changes

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    routing::{delete, get, post},
    Json, Router,
};
use futures::stream::Stream;
use tokio::sync::broadcast::error::RecvError;

use super::routes::AppState;
use super::types::SentResponse;
use crate::ingest::UploadedFile;
use crate::plan::NotificationDraft;
use crate::session::{SessionError, SessionSnapshot};

/// Create session routes.
pub fn routes(max_upload_bytes: usize) -> Router<Arc<AppState>> {
    let upload_route = Router::new()
        .route("/upload", post(upload))
        .layer(DefaultBodyLimit::max(max_upload_bytes));

    Router::new()
        .route("/", get(get_session))
        .merge(upload_route)
        .route("/assignees/:name/send", post(mark_sent))
        .route("/reset", post(reset))
        .route("/error", delete(dismiss_error))
        .route("/drafts", get(list_drafts))
        .route("/stream", get(stream))
}

// ─────────────────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────────────────

async fn get_session(State(state): State<Arc<AppState>>) -> Json<SessionSnapshot> {
    Json(state.session.snapshot().await)
}

/// Accept one spreadsheet file and run it through the session.
async fn upload(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<SessionSnapshot>, (StatusCode, String)> {
    let mut file = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?
    {
        let Some(file_name) = field.file_name().map(|s| s.to_string()) else {
            continue;
        };
        let contents = field
            .bytes()
            .await
            .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;
        file = Some(UploadedFile::new(file_name, contents));
        break;
    }

    let file = file.ok_or_else(|| {
        (
            StatusCode::BAD_REQUEST,
            "Expected a multipart file field".to_string(),
        )
    })?;

    tracing::info!("Received upload {} ({} bytes)", file.name, file.contents.len());

    state
        .session
        .select_file(file)
        .await
        .map(Json)
        .map_err(error_response)
}

async fn mark_sent(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Json<SentResponse> {
    let recorded = state.session.mark_sent(&name).await;
    let fully_dispatched = state.session.snapshot().await.fully_dispatched;
    Json(SentResponse {
        assignee: name,
        recorded,
        fully_dispatched,
    })
}

async fn reset(State(state): State<Arc<AppState>>) -> Json<SessionSnapshot> {
    state.session.reset().await;
    Json(state.session.snapshot().await)
}

async fn dismiss_error(State(state): State<Arc<AppState>>) -> StatusCode {
    state.session.dismiss_error().await;
    StatusCode::NO_CONTENT
}

async fn list_drafts(State(state): State<Arc<AppState>>) -> Json<Vec<NotificationDraft>> {
    Json(state.session.drafts().await)
}

/// Stream session events. The first event is a full snapshot; a lagging
/// client gets a fresh snapshot instead of the events it missed.
async fn stream(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    tracing::debug!("New SSE client connected to session stream");
    let mut rx = state.session.subscribe();

    let stream = async_stream::stream! {
        if let Some(event) = snapshot_event(&state).await {
            yield Ok(event);
        }

        loop {
            match rx.recv().await {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(json) => {
                        yield Ok(Event::default().event(event.name()).data(json));
                    }
                    Err(e) => {
                        tracing::warn!("SSE: Failed to serialize {} event: {}", event.name(), e);
                    }
                },
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!("SSE: client lagged by {} events, resending snapshot", skipped);
                    if let Some(event) = snapshot_event(&state).await {
                        yield Ok(event);
                    }
                }
                Err(RecvError::Closed) => break,
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}

async fn snapshot_event(state: &AppState) -> Option<Event> {
    let snapshot = state.session.snapshot().await;
    match serde_json::to_string(&snapshot) {
        Ok(json) => Some(Event::default().event("snapshot").data(json)),
        Err(e) => {
            tracing::warn!("SSE: Failed to serialize snapshot: {}", e);
            None
        }
    }
}

/// Map a session error to an HTTP status and user-facing message.
fn error_response(err: SessionError) -> (StatusCode, String) {
    let status = match &err {
        SessionError::Validation(_) => StatusCode::BAD_REQUEST,
        SessionError::Busy(_) | SessionError::Superseded => StatusCode::CONFLICT,
        SessionError::Parse(_) => StatusCode::UNPROCESSABLE_ENTITY,
        SessionError::Analysis(_) => StatusCode::BAD_GATEWAY,
        SessionError::Interrupted(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    let message = match err.info() {
        Some(info) => format!("{} ({})", info.message, info.detail),
        None => err.to_string(),
    };
    (status, message)
}
