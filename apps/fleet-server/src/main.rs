use std::net::SocketAddr;
use std::time::Duration;

use tracing::{error, info};

mod access_log;
mod app_state;
mod artifacts;
mod bootstrap;
mod config;
mod executor;
mod gateway;
mod http_client;
mod journal;
mod responses;
mod router;
mod security;
mod site_locks;
#[cfg(test)]
mod test_support;
mod wp_rest;

pub(crate) use app_state::AppState;

#[tokio::main]
async fn main() {
    fleet_otel::init();

    let cfg = match config::ServerConfig::from_env() {
        Ok(cfg) => cfg,
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(2);
        }
    };

    let output = match bootstrap::build(&cfg) {
        Ok(output) => output,
        Err(err) => {
            eprintln!("error: {err:#}");
            std::process::exit(1);
        }
    };
    let background = bootstrap::start_background(&output.state);
    let app = bootstrap::app(output, &cfg);

    let listener = match tokio::net::TcpListener::bind(cfg.addr).await {
        Ok(listener) => listener,
        Err(err) => {
            eprintln!("error: bind {}: {err}", cfg.addr);
            std::process::exit(1);
        }
    };
    info!(
        target: "fleet::gateway",
        addr = %cfg.addr,
        mode = cfg.poll_mode.as_str(),
        state_dir = %cfg.state_dir.display(),
        "fleet server listening"
    );

    let server = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal());

    if let Err(err) = server.await {
        error!("http server exited with error: {err}");
    }
    // The router held the last bus sender; let the journal drain.
    for handle in background {
        if tokio::time::timeout(Duration::from_secs(5), handle).await.is_err() {
            error!("background task did not stop within 5s");
        }
    }
    info!("fleet server stopped");
}

async fn shutdown_signal() {
    info!("shutdown signal listener active");
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = term.recv() => {},
                }
            }
            Err(err) => {
                error!("install SIGTERM handler: {err}");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }

    info!("shutdown signal received");
}
