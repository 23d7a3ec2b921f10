//! HTML pages for the browser-facing setup flow, rendered with askama.

use askama::Template;
use axum::{http::StatusCode, response::Html};
use kick_calories_core::types::ChannelIdentity;
use tracing::error;

#[derive(Template)]
#[template(path = "landing.html", escape = "html")]
pub struct LandingPage;

#[derive(Template)]
#[template(path = "webhook_status.html", escape = "html")]
pub struct WebhookStatusPage;

#[derive(Template)]
#[template(path = "authorize.html", escape = "html")]
pub struct AuthorizePage<'a> {
    pub authorize_url: &'a str,
}

#[derive(Template)]
#[template(path = "authorized.html", escape = "html")]
pub struct AuthorizedPage;

#[derive(Template)]
#[template(path = "manual_code.html", escape = "html")]
pub struct ManualCodePage<'a> {
    pub code: &'a str,
}

#[derive(Template)]
#[template(path = "setup.html", escape = "html")]
pub struct SetupCompletePage<'a> {
    broadcaster_user_id: &'a str,
    channel_slug: &'a str,
}

impl<'a> SetupCompletePage<'a> {
    pub fn new(channel: &'a ChannelIdentity) -> Self {
        Self {
            broadcaster_user_id: &channel.broadcaster_user_id,
            channel_slug: &channel.channel_slug,
        }
    }
}

#[derive(Template)]
#[template(path = "subscription.html", escape = "html")]
pub struct SubscriptionPage<'a> {
    status: u16,
    body: &'a str,
}

impl<'a> SubscriptionPage<'a> {
    pub fn new(status: StatusCode, body: &'a str) -> Self {
        Self {
            status: status.as_u16(),
            body,
        }
    }
}

/// Renders a page into an HTML response body.
pub fn render<T: Template>(page: &T) -> Result<Html<String>, askama::Error> {
    page.render().map(Html).map_err(|err| {
        error!(stage = "pages", error = %err, "failed to render page");
        err
    })
}
