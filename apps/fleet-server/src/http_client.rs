use std::time::Duration;

use crate::config::ServerConfig;

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(default)
}

fn keepalive() -> Duration {
    Duration::from_secs(env_u64("FLEET_HTTP_TCP_KEEPALIVE_SECS", 60).max(1))
}

fn pool_idle() -> Duration {
    Duration::from_secs(env_u64("FLEET_HTTP_POOL_IDLE_SECS", 90).max(1))
}

fn user_agent() -> String {
    format!("fleet-server/{}", env!("CARGO_PKG_VERSION"))
}

/// Base client builder with harmonized defaults.
pub fn builder(cfg: &ServerConfig) -> reqwest::ClientBuilder {
    reqwest::Client::builder()
        .user_agent(user_agent())
        .connect_timeout(Duration::from_secs(cfg.connect_timeout_secs))
        .timeout(Duration::from_secs(cfg.http_timeout_secs))
        .tcp_keepalive(keepalive())
        .pool_idle_timeout(pool_idle())
}

/// Outbound client shared by the executor and artifact fetches.
pub fn client(cfg: &ServerConfig) -> reqwest::Result<reqwest::Client> {
    builder(cfg).build()
}
