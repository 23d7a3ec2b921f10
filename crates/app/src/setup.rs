use axum::{extract::State, response::Html};
use axum_extra::extract::cookie::CookieJar;
use kick_calories_core::types::ChannelIdentity;
use metrics::counter;
use tracing::{info, warn};

use crate::error::FlowError;
use crate::pages;
use crate::router::AppState;
use crate::session::{session_id, Session};

/// Resolves the authenticated user's channel and makes it the active channel
/// for webhook authorization.
pub async fn setup(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<Html<String>, FlowError> {
    let (id, session) = current_session(&state, &jar).await?;
    let token = session.access_token.ok_or(FlowError::Unauthenticated)?;

    let channels = state.api_client().list_channels(&token).await;
    record_api_result("channels", channels.is_ok());
    let channels = channels.map_err(|err| {
        warn!(stage = "setup", error = %err, "failed to list channels");
        FlowError::UpstreamError(err.to_string())
    })?;

    let Some(channel) = channels.into_iter().next() else {
        warn!(stage = "setup", "channel list was empty");
        return Err(FlowError::UpstreamError(
            "Kick returned no channels for this account".to_string(),
        ));
    };

    let identity = ChannelIdentity {
        broadcaster_user_id: channel.broadcaster_user_id,
        channel_slug: channel.slug,
    };
    state
        .sessions()
        .update(&id, state.now(), |session| {
            session.channel = Some(identity.clone());
        })
        .await
        .ok_or(FlowError::Unauthenticated)?;
    state.set_active_channel(identity.clone()).await;

    info!(
        stage = "setup",
        broadcaster_user_id = %identity.broadcaster_user_id,
        channel_slug = %identity.channel_slug,
        "channel resolved"
    );
    Ok(pages::render(&pages::SetupCompletePage::new(&identity))?)
}

/// Registers the webhook subscription for chat messages of the session's
/// channel. Any HTTP status from Kick is reported back verbatim.
pub async fn subscribe(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<Html<String>, FlowError> {
    let (_, session) = current_session(&state, &jar).await?;
    let (Some(token), Some(channel)) = (session.access_token, session.channel) else {
        return Err(FlowError::Unauthenticated);
    };

    let result = state
        .api_client()
        .create_chat_subscription(&token, &channel.broadcaster_user_id)
        .await;
    record_api_result("events_subscriptions", result.is_ok());
    let result = result.map_err(|err| {
        warn!(stage = "subscribe", error = %err, "subscription request failed");
        FlowError::UpstreamError(err.to_string())
    })?;

    info!(
        stage = "subscribe",
        status = result.status.as_u16(),
        broadcaster_user_id = %channel.broadcaster_user_id,
        "subscription response received"
    );
    Ok(pages::render(&pages::SubscriptionPage::new(
        result.status,
        &result.body,
    ))?)
}

async fn current_session(
    state: &AppState,
    jar: &CookieJar,
) -> Result<(String, Session), FlowError> {
    let id = session_id(jar).ok_or(FlowError::Unauthenticated)?;
    let session = state
        .sessions()
        .get(&id, state.now())
        .await
        .ok_or(FlowError::Unauthenticated)?;
    Ok((id, session))
}

fn record_api_result(endpoint: &'static str, ok: bool) {
    let result = if ok { "ok" } else { "error" };
    counter!("kick_api_requests_total", "endpoint" => endpoint, "result" => result).increment(1);
}
