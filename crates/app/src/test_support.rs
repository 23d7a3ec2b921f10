use std::{path::PathBuf, sync::Arc, time::Duration};

use axum::Router;
use chrono::{DateTime, Utc};
use kick_calories_core::types::ChannelIdentity;
use kick_calories_kick::{KickApiClient, KickOAuthClient};
use kick_calories_storage::Database;
use reqwest::Client;
use url::Url;

use crate::router::{app_router, AppState, StateSettings};
use crate::session::{PendingAuthorization, SESSION_COOKIE};
use crate::telemetry;

pub const REDIRECT_URI: &str = "http://localhost:8080/callback";
/// Timeout of the outbound client; mocks delayed beyond it simulate a stalled Kick.
pub const UPSTREAM_TIMEOUT: Duration = Duration::from_millis(500);

pub struct TestContext {
    pub state: AppState,
    pub database: Database,
    pub now: DateTime<Utc>,
    pub mock_server: Option<httpmock::MockServer>,
}

impl TestContext {
    pub async fn new() -> Self {
        Self::init(None, "sqlite::memory:".to_string(), None).await
    }

    pub async fn with_mock() -> Self {
        let server = httpmock::MockServer::start();
        Self::init(Some(server), "sqlite::memory:".to_string(), None).await
    }

    pub async fn with_database_url(url: String) -> Self {
        Self::init(None, url, None).await
    }

    pub async fn with_overlay(path: PathBuf) -> Self {
        Self::init(None, "sqlite::memory:".to_string(), Some(path)).await
    }

    async fn init(
        mock_server: Option<httpmock::MockServer>,
        database_url: String,
        overlay_path: Option<PathBuf>,
    ) -> Self {
        let metrics = telemetry::init_metrics().expect("metrics");
        let database = Database::connect(&database_url).await.expect("connect");
        database.run_migrations().await.expect("migrations");

        let now = DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let clock = Arc::new(move || now);

        let (oauth_base, api_base) = match mock_server.as_ref() {
            Some(server) => (
                format!("{}/oauth/", server.base_url()),
                format!("{}/public/v1/", server.base_url()),
            ),
            None => (
                "https://id.kick.com/oauth/".to_string(),
                "https://api.kick.com/public/v1/".to_string(),
            ),
        };
        let http = Client::builder()
            .timeout(UPSTREAM_TIMEOUT)
            .build()
            .expect("client");
        let oauth_client = KickOAuthClient::new(
            "client",
            "secret",
            Url::parse(&oauth_base).expect("url"),
            http.clone(),
        );
        let api_client = KickApiClient::new(Url::parse(&api_base).expect("url"), http);

        let state = AppState::new(
            metrics,
            database.clone(),
            oauth_client,
            api_client,
            StateSettings {
                redirect_uri: REDIRECT_URI.to_string(),
                overlay_path: overlay_path.unwrap_or_else(|| PathBuf::from("missing.html")),
                session_ttl: Duration::from_secs(600),
                secure_cookies: false,
            },
        )
        .with_clock(clock);

        Self {
            state,
            database,
            now,
            mock_server,
        }
    }

    pub fn router(&self) -> Router {
        app_router(self.state.clone())
    }

    pub fn server(&self) -> &httpmock::MockServer {
        self.mock_server.as_ref().expect("mock server")
    }

    /// Creates a session holding a pending authorization and returns its id.
    pub async fn session_with_pending(&self, state_value: &str, verifier: &str) -> String {
        let id = self.state.sessions().create(self.now).await;
        self.state
            .sessions()
            .update(&id, self.now, |session| {
                session.pending = Some(PendingAuthorization {
                    code_verifier: verifier.to_string(),
                    state: state_value.to_string(),
                });
            })
            .await
            .expect("session");
        id
    }

    /// Creates a session that already holds an access token.
    pub async fn session_with_token(&self, token: &str) -> String {
        let id = self.state.sessions().create(self.now).await;
        self.state
            .sessions()
            .update(&id, self.now, |session| {
                session.access_token = Some(token.to_string());
            })
            .await
            .expect("session");
        id
    }

    pub async fn activate_channel(&self, user_id: &str, slug: &str) {
        self.state
            .set_active_channel(ChannelIdentity {
                broadcaster_user_id: user_id.to_string(),
                channel_slug: slug.to_string(),
            })
            .await;
    }

    pub async fn counter(&self) -> i64 {
        self.database.counters().current().await.expect("counter")
    }
}

pub fn cookie_header(session_id: &str) -> String {
    format!("{SESSION_COOKIE}={session_id}")
}
