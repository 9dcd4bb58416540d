//! Tracing subscriber setup shared by the fleet binaries.

use once_cell::sync::OnceCell;
use tracing_subscriber::filter::Targets;
use tracing_subscriber::{
    fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
    EnvFilter,
};

/// Target used by the HTTP access-log middleware.
pub const ACCESS_TARGET: &str = "http.access";

static ACCESS_GUARD: OnceCell<tracing_appender::non_blocking::WorkerGuard> = OnceCell::new();

/// Install the console subscriber (`RUST_LOG`, default `info`). When
/// `FLEET_ACCESS_LOG_ROLL=1`, access-log events are also written to a
/// rolling file under `FLEET_ACCESS_LOG_DIR` (or `FLEET_LOGS_DIR`, or `logs`).
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(fmt::layer().with_filter(filter));

    if std::env::var("FLEET_ACCESS_LOG_ROLL").ok().as_deref() != Some("1") {
        let _ = registry.try_init();
        return;
    }

    let dir = std::env::var("FLEET_ACCESS_LOG_DIR")
        .ok()
        .or_else(|| std::env::var("FLEET_LOGS_DIR").ok())
        .unwrap_or_else(|| "logs".to_string());
    let prefix = std::env::var("FLEET_ACCESS_LOG_PREFIX").unwrap_or_else(|_| "http-access".into());
    let rotation = std::env::var("FLEET_ACCESS_LOG_ROTATION").unwrap_or_else(|_| "daily".into());
    if std::fs::create_dir_all(&dir).is_err() {
        tracing::warn!(directory = %dir, "failed to create access log directory");
    }
    let writer = match rotation.to_lowercase().as_str() {
        "hourly" => tracing_appender::rolling::hourly(&dir, &prefix),
        "minutely" => tracing_appender::rolling::minutely(&dir, &prefix),
        _ => tracing_appender::rolling::daily(&dir, &prefix),
    };
    let (nb, guard) = tracing_appender::non_blocking(writer);
    let _ = ACCESS_GUARD.set(guard);
    let access_layer = fmt::layer()
        .with_ansi(false)
        .with_target(false)
        .with_writer(nb)
        .with_filter(Targets::new().with_target(ACCESS_TARGET, tracing::Level::INFO));
    let _ = registry.with(access_layer).try_init();
}
