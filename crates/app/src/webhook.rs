use std::time::Instant;

use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{Html, IntoResponse, Response},
};
use kick_calories_core::normalizer::{Normalizer, NormalizerError};
use kick_calories_core::policy::{self, Decision};
use kick_calories_core::types::{IgnoreReason, WebhookOutcome};
use kick_calories_storage::CounterError;
use metrics::{counter, gauge, histogram};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::live::CounterUpdate;
use crate::pages;
use crate::problem::ProblemResponse;
use crate::router::AppState;

const HEADER_EVENT_TYPE: &str = "Kick-Event-Type";
const HEADER_MESSAGE_ID: &str = "Kick-Event-Message-Id";

pub async fn status_page() -> Result<Html<String>, ProblemResponse> {
    Ok(pages::render(&pages::WebhookStatusPage)?)
}

/// Receives a Kick event delivery. The response is always `200 ok`; the
/// outcome is only observable through logs, metrics and the counter.
pub async fn handle(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let start = Instant::now();
    let outcome = process(&state, &headers, &body).await;

    match outcome {
        WebhookOutcome::Applied { delta, total } => {
            info!(stage = "webhook", delta, total, "calories updated");
        }
        WebhookOutcome::Ignored(reason) => {
            debug!(stage = "webhook", %reason, "webhook delivery ignored");
        }
    }
    counter!("webhook_events_total", "outcome" => outcome.metric_label()).increment(1);
    histogram!("webhook_ack_latency_seconds").record(start.elapsed().as_secs_f64());

    acknowledge()
}

async fn process(state: &AppState, headers: &HeaderMap, body: &[u8]) -> WebhookOutcome {
    let event = match Normalizer::normalize(header_value(headers, HEADER_EVENT_TYPE), body) {
        Ok(event) => event,
        Err(NormalizerError::UnsupportedEventType(event_type)) => {
            debug!(stage = "webhook", %event_type, "unsupported event type");
            return WebhookOutcome::Ignored(IgnoreReason::UnsupportedEventType);
        }
        Err(err) => {
            warn!(stage = "webhook", error = %err, size_bytes = body.len(), "malformed webhook payload");
            return WebhookOutcome::Ignored(IgnoreReason::MalformedPayload);
        }
    };

    let channel = state.active_channel().await;
    let delta = match policy::evaluate(&event, channel.as_ref()) {
        Decision::Apply { delta } => delta,
        Decision::Ignore { reason, detail } => {
            if let Some(detail) = detail {
                warn!(
                    stage = "webhook",
                    %reason,
                    sender = %event.sender.username,
                    %detail,
                    "invalid calories command"
                );
            }
            return WebhookOutcome::Ignored(reason);
        }
    };

    let message_id = header_value(headers, HEADER_MESSAGE_ID).or(event.message_id.as_deref());
    match apply_delta(state, message_id, delta).await {
        Ok(outcome) => outcome,
        Err(err) => {
            error!(stage = "storage", error = %err, delta, "failed to apply calories command");
            WebhookOutcome::Ignored(IgnoreReason::StorageFailure)
        }
    }
}

/// Records the delivery id and increments the counter in one transaction.
async fn apply_delta(
    state: &AppState,
    message_id: Option<&str>,
    delta: i64,
) -> Result<WebhookOutcome, ApplyError> {
    let storage = state.storage();
    let now = state.now();
    let mut tx = storage.begin().await?;

    if let Some(message_id) = message_id {
        let recorded = storage
            .processed_events()
            .record(&mut tx, message_id, now)
            .await?;
        if recorded.is_duplicate() {
            tx.rollback().await?;
            info!(stage = "webhook", %message_id, "duplicate delivery skipped");
            return Ok(WebhookOutcome::Ignored(IgnoreReason::Duplicate));
        }
    }

    let total = storage.counters().increment(&mut tx, delta).await?;
    tx.commit().await?;

    gauge!("calories_value").set(total as f64);
    state.live().publish(CounterUpdate::applied(total, delta, now));
    Ok(WebhookOutcome::Applied { delta, total })
}

#[derive(Debug, Error)]
enum ApplyError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Counter(#[from] CounterError),
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

fn acknowledge() -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        "ok",
    )
        .into_response()
}
