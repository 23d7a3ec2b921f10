use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{Html, IntoResponse},
    routing::get,
    Router,
};
use chrono::{DateTime, Utc};
use kick_calories_core::types::ChannelIdentity;
use kick_calories_kick::{KickApiClient, KickOAuthClient};
use kick_calories_storage::Database;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::sync::RwLock;

use crate::live::CounterHub;
use crate::problem::ProblemResponse;
use crate::session::SessionStore;
use crate::{oauth, overlay, pages, setup, telemetry, webhook};

/// Settings the handlers need beyond their collaborators.
pub struct StateSettings {
    pub redirect_uri: String,
    pub overlay_path: PathBuf,
    pub session_ttl: Duration,
    pub secure_cookies: bool,
}

#[derive(Clone)]
pub struct AppState {
    metrics: PrometheusHandle,
    storage: Database,
    oauth_client: KickOAuthClient,
    api_client: KickApiClient,
    redirect_uri: Arc<str>,
    overlay_path: Arc<Path>,
    secure_cookies: bool,
    sessions: SessionStore,
    active_channel: Arc<RwLock<Option<ChannelIdentity>>>,
    live: CounterHub,
    clock: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>,
}

impl AppState {
    pub fn new(
        metrics: PrometheusHandle,
        storage: Database,
        oauth_client: KickOAuthClient,
        api_client: KickApiClient,
        settings: StateSettings,
    ) -> Self {
        Self {
            metrics,
            storage,
            oauth_client,
            api_client,
            redirect_uri: Arc::from(settings.redirect_uri),
            overlay_path: Arc::from(settings.overlay_path),
            secure_cookies: settings.secure_cookies,
            sessions: SessionStore::new(settings.session_ttl),
            active_channel: Arc::new(RwLock::new(None)),
            live: CounterHub::new(),
            clock: Arc::new(Utc::now),
        }
    }

    #[cfg(test)]
    pub fn with_clock(mut self, clock: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>) -> Self {
        self.clock = clock;
        self
    }

    pub fn metrics(&self) -> &PrometheusHandle {
        &self.metrics
    }

    pub fn storage(&self) -> &Database {
        &self.storage
    }

    pub fn oauth_client(&self) -> &KickOAuthClient {
        &self.oauth_client
    }

    pub fn api_client(&self) -> &KickApiClient {
        &self.api_client
    }

    pub fn redirect_uri(&self) -> &str {
        &self.redirect_uri
    }

    pub fn overlay_path(&self) -> &Path {
        &self.overlay_path
    }

    pub fn secure_cookies(&self) -> bool {
        self.secure_cookies
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub fn live(&self) -> &CounterHub {
        &self.live
    }

    pub fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    /// Channel whose chat may change the counter, set by the last `/setup`.
    pub async fn active_channel(&self) -> Option<ChannelIdentity> {
        self.active_channel.read().await.clone()
    }

    pub async fn set_active_channel(&self, channel: ChannelIdentity) {
        *self.active_channel.write().await = Some(channel);
    }
}

pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(landing))
        .route("/auth", get(oauth::start))
        .route(
            "/callback",
            get(oauth::callback).post(oauth::manual_callback),
        )
        .route("/setup", get(setup::setup))
        .route("/subscribe", get(setup::subscribe))
        .route("/webhook", get(webhook::status_page).post(webhook::handle))
        .route("/test-overlay", get(overlay::test_overlay))
        .route("/api/calories", get(overlay::current_value))
        .route("/overlay/sse", get(overlay::overlay_sse))
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
        .with_state(state)
}

async fn landing() -> Result<Html<String>, ProblemResponse> {
    Ok(pages::render(&pages::LandingPage)?)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    let body = telemetry::render_metrics(state.metrics());
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
}
