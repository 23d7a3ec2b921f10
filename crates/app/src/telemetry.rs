use std::{
    fmt::Write as _,
    sync::{Mutex, OnceLock},
    time::Instant,
};

use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use thiserror::Error;
use tracing_subscriber::{
    fmt::{self, time::UtcTime},
    layer::SubscriberExt,
    util::{SubscriberInitExt, TryInitError},
    EnvFilter,
};

use kick_calories_util::AppConfig;

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("failed to initialize tracing: {0}")]
    Tracing(#[from] TryInitError),
    #[error("failed to install prometheus recorder: {0}")]
    Metrics(#[from] BuildError),
}

const COUNTERS: &[(&str, &str)] = &[
    ("oauth_callbacks_total", "OAuth callbacks by result"),
    (
        "kick_api_requests_total",
        "Kick public API requests by endpoint and result",
    ),
    ("webhook_events_total", "Webhook deliveries by outcome"),
    (
        "db_ttl_deleted_total",
        "Processed webhook ids removed by the TTL sweep",
    ),
];

const GAUGES: &[(&str, &str)] = &[
    ("app_build_info", "Version of the running binary"),
    ("app_uptime_seconds", "Seconds since the metrics recorder was installed"),
    ("calories_value", "Counter value after the last applied command"),
];

static TRACING_READY: OnceLock<()> = OnceLock::new();
static RECORDER: Mutex<Option<PrometheusHandle>> = Mutex::new(None);
static STARTED_AT: OnceLock<Instant> = OnceLock::new();

/// Installs the global subscriber: JSON lines in production, pretty output
/// otherwise. Later calls are no-ops.
pub fn init_tracing(config: &AppConfig) -> Result<(), TelemetryError> {
    if TRACING_READY.get().is_some() {
        return Ok(());
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = config.environment.is_production();

    let pretty_layer = (!json).then(|| {
        fmt::layer()
            .with_target(false)
            .with_timer(UtcTime::rfc_3339())
            .pretty()
    });
    let json_layer = json.then(|| {
        fmt::layer()
            .with_target(false)
            .with_timer(UtcTime::rfc_3339())
            .json()
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(pretty_layer)
        .with(json_layer)
        .try_init()?;

    TRACING_READY.set(()).ok();
    tracing::info!(
        stage = "telemetry",
        env = config.environment.as_str(),
        version = env!("CARGO_PKG_VERSION"),
        "tracing initialized"
    );
    Ok(())
}

/// Installs the Prometheus recorder on first use and returns its handle.
pub fn init_metrics() -> Result<PrometheusHandle, TelemetryError> {
    let mut recorder = RECORDER
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    if let Some(handle) = recorder.as_ref() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    for &(name, description) in COUNTERS {
        describe_counter!(name, description);
    }
    for &(name, description) in GAUGES {
        describe_gauge!(name, description);
    }
    describe_histogram!(
        "webhook_ack_latency_seconds",
        "Seconds spent handling a webhook delivery before acknowledging it"
    );
    STARTED_AT.get_or_init(Instant::now);

    *recorder = Some(handle.clone());
    Ok(handle)
}

/// Prometheus text output followed by the build and uptime gauges.
pub fn render_metrics(handle: &PrometheusHandle) -> String {
    let mut body = handle.render();
    if !body.is_empty() && !body.ends_with('\n') {
        body.push('\n');
    }

    let uptime = STARTED_AT
        .get()
        .map(|started| started.elapsed().as_secs_f64())
        .unwrap_or_default();
    // Writing into a String cannot fail.
    let _ = write!(
        body,
        "# TYPE app_build_info gauge\napp_build_info{{version=\"{}\"}} 1\n\
         # TYPE app_uptime_seconds gauge\napp_uptime_seconds {uptime}\n",
        env!("CARGO_PKG_VERSION"),
    );
    body
}
