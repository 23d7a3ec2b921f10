mod error;
mod live;
mod maintenance;
mod oauth;
mod overlay;
mod pages;
mod problem;
mod router;
mod session;
mod setup;
mod telemetry;
mod webhook;

#[cfg(test)]
mod test_support;

use std::net::SocketAddr;

use kick_calories_kick::{KickApiClient, KickOAuthClient};
use kick_calories_storage::Database;
use kick_calories_util::{load_env_file, AppConfig};
use tracing::info;
use url::Url;

use crate::maintenance::MaintenanceWorker;
use crate::router::{AppState, StateSettings};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    load_env_file();
    let config = AppConfig::from_env()?;

    telemetry::init_tracing(&config)?;
    let metrics = telemetry::init_metrics()?;

    let database = Database::connect(&config.database_url).await?;
    database.run_migrations().await?;
    info!(stage = "storage", url = %config.database_url, "database ready");

    let http = reqwest::Client::builder()
        .timeout(config.http_timeout)
        .build()?;
    let oauth_client = KickOAuthClient::new(
        config.client_id.as_str(),
        config.client_secret.as_str(),
        Url::parse(&config.oauth_base_url)?,
        http.clone(),
    );
    let api_client = KickApiClient::new(Url::parse(&config.api_base_url)?, http);

    let state = AppState::new(
        metrics,
        database.clone(),
        oauth_client,
        api_client,
        StateSettings {
            redirect_uri: config.redirect_uri.clone(),
            overlay_path: config.overlay_path.clone(),
            session_ttl: config.session_ttl,
            secure_cookies: config.environment.is_production(),
        },
    );

    MaintenanceWorker::new(database, state.sessions().clone()).spawn();

    let addr: SocketAddr = config.bind_addr;
    info!(
        stage = "app",
        %addr,
        env = %config.environment.as_str(),
        redirect_uri = %config.redirect_uri,
        "starting HTTP server"
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router::app_router(state))
        .await
        .map_err(|err| err.into())
}
