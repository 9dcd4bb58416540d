use std::sync::Arc;

use anyhow::Context;
use fleet_events::Bus;
use fleet_kernel::Kernel;
use tokio::task::JoinHandle;
use tracing::info;

use crate::{
    access_log,
    app_state::AppState,
    artifacts::ArtifactStore,
    config::ServerConfig,
    executor::{CommandExecutor, WpRestExecutor},
    http_client, journal,
    router::build_router,
    security,
};

pub(crate) struct BootstrapOutput {
    pub router: axum::Router<AppState>,
    pub state: AppState,
}

pub(crate) fn build(cfg: &ServerConfig) -> anyhow::Result<BootstrapOutput> {
    let kernel = Kernel::open(&cfg.state_dir)
        .with_context(|| format!("open state store in {}", cfg.state_dir.display()))?;
    let http = http_client::client(cfg).context("build outbound http client")?;
    let artifacts = ArtifactStore::new(http.clone(), cfg.storage_base_url.clone());
    let executor: Arc<dyn CommandExecutor> = Arc::new(WpRestExecutor::new(http, artifacts));
    let bus = Bus::new(256);

    let (router, endpoints) = build_router();
    for endpoint in &endpoints {
        info!(target: "fleet::gateway", %endpoint, "route registered");
    }

    let state = AppState::builder(bus, kernel, executor)
        .with_poll_mode(cfg.poll_mode)
        .build();

    Ok(BootstrapOutput { router, state })
}

/// Background tasks that outlive single requests.
pub(crate) fn start_background(state: &AppState) -> Vec<JoinHandle<()>> {
    vec![journal::spawn_forwarder(&state.bus(), state.kernel().clone())]
}

pub(crate) fn attach_stateful_layers(
    router: axum::Router<AppState>,
    state: AppState,
    body_limit_bytes: usize,
) -> axum::Router<()> {
    router
        .with_state::<()>(state)
        .layer(axum::extract::DefaultBodyLimit::max(body_limit_bytes))
}

pub(crate) fn attach_http_layers(
    router: axum::Router<()>,
    concurrency_limit: usize,
) -> axum::Router<()> {
    use tower::limit::ConcurrencyLimitLayer;
    use tower_http::{compression::CompressionLayer, trace::TraceLayer};

    router
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(ConcurrencyLimitLayer::new(concurrency_limit))
}

pub(crate) fn attach_global_layers(router: axum::Router<()>) -> axum::Router<()> {
    router
        .layer(axum::middleware::from_fn(access_log::access_log_mw))
        .layer(axum::middleware::from_fn(security::headers_mw))
}

/// Full middleware stack in serving order.
pub(crate) fn app(output: BootstrapOutput, cfg: &ServerConfig) -> axum::Router<()> {
    attach_global_layers(attach_http_layers(
        attach_stateful_layers(output.router, output.state, cfg.body_limit_bytes),
        cfg.concurrency_limit,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FileConfig, PollMode};
    use crate::test_support::{self, FakeExecutor};
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    fn test_config() -> ServerConfig {
        ServerConfig::resolve(FileConfig::default(), |_| None).expect("config")
    }

    #[tokio::test]
    async fn layered_app_serves_gateway_with_security_headers() {
        let fx = test_support::fixture();
        let state = test_support::state(&fx, FakeExecutor::succeeding(), PollMode::Return);
        let (router, _) = build_router();
        let app = app(BootstrapOutput { router, state }, &test_config());

        let resp = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri(crate::router::paths::HEALTHZ)
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers()
                .get("x-content-type-options")
                .and_then(|v| v.to_str().ok()),
            Some("nosniff")
        );

        let resp = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(crate::router::paths::GET_PLUGIN_COMMANDS)
                    .body(Body::from(format!(
                        r#"{{"api_key":"{}"}}"#,
                        test_support::SITE_KEY
                    )))
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(resp.status(), StatusCode::OK);
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.expect("body");
        let value: serde_json::Value = serde_json::from_slice(&bytes).expect("json");
        assert_eq!(value["success"], true);
    }

    #[tokio::test]
    async fn oversized_bodies_are_rejected() {
        let fx = test_support::fixture();
        let state = test_support::state(&fx, FakeExecutor::succeeding(), PollMode::Return);
        let (router, _) = build_router();
        let mut cfg = test_config();
        cfg.body_limit_bytes = 1024;
        let app = app(BootstrapOutput { router, state }, &cfg);

        let big = format!(r#"{{"api_key":"{}"}}"#, "k".repeat(4096));
        let resp = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(crate::router::paths::GET_PLUGIN_COMMANDS)
                    .body(Body::from(big))
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }
}
