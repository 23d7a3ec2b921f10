use std::io::ErrorKind;

use axum::{
    extract::State,
    http::{HeaderName, HeaderValue, StatusCode},
    response::{
        sse::{Event, Sse},
        Html, IntoResponse, Response,
    },
    Json,
};
use serde::Serialize;
use tokio_stream::Stream;
use tracing::{error, warn};

use crate::live::{counter_keep_alive, counter_stream, CounterUpdate};
use crate::problem::ProblemResponse;
use crate::router::AppState;

pub const CALORIES_PLACEHOLDER: &str = "{{calories}}";

const TUNNEL_BYPASS_HEADER: &str = "ngrok-skip-browser-warning";

#[derive(Debug, Serialize)]
pub struct CaloriesBody {
    pub value: i64,
}

/// Serves the overlay template with the current counter substituted into
/// every `{{calories}}` placeholder.
pub async fn test_overlay(State(state): State<AppState>) -> Result<Response, ProblemResponse> {
    let path = state.overlay_path();
    let template = tokio::fs::read_to_string(path).await.map_err(|err| {
        if err.kind() == ErrorKind::NotFound {
            warn!(stage = "overlay", path = %path.display(), "overlay file not found");
            ProblemResponse::new(
                StatusCode::NOT_FOUND,
                "overlay_not_found",
                format!("overlay file {} does not exist", path.display()),
            )
        } else {
            error!(stage = "overlay", path = %path.display(), error = %err, "failed to read overlay file");
            ProblemResponse::internal("failed to read overlay file")
        }
    })?;

    let html = if template.contains(CALORIES_PLACEHOLDER) {
        let value = state.storage().counters().current().await.unwrap_or_else(|err| {
            error!(stage = "overlay", error = %err, "failed to read counter, rendering 0");
            0
        });
        template.replace(CALORIES_PLACEHOLDER, &value.to_string())
    } else {
        template
    };

    let mut response = Html(html).into_response();
    response.headers_mut().insert(
        HeaderName::from_static(TUNNEL_BYPASS_HEADER),
        HeaderValue::from_static("true"),
    );
    Ok(response)
}

pub async fn current_value(
    State(state): State<AppState>,
) -> Result<Json<CaloriesBody>, ProblemResponse> {
    let value = state.storage().counters().current().await.map_err(|err| {
        error!(stage = "overlay", error = %err, "failed to read counter");
        ProblemResponse::internal("failed to read calories")
    })?;
    Ok(Json(CaloriesBody { value }))
}

/// Streams the counter: the current value first, then every applied change.
pub async fn overlay_sse(
    State(state): State<AppState>,
) -> Result<Sse<impl Stream<Item = Result<Event, serde_json::Error>>>, ProblemResponse> {
    // Subscribe before reading so no update lands between the read and the stream.
    let receiver = state.live().subscribe();
    let value = state.storage().counters().current().await.map_err(|err| {
        error!(stage = "overlay", error = %err, "failed to read counter for stream");
        ProblemResponse::internal("failed to read calories")
    })?;

    let initial = CounterUpdate::snapshot(value, state.now());
    Ok(Sse::new(counter_stream(receiver, initial)).keep_alive(counter_keep_alive()))
}
