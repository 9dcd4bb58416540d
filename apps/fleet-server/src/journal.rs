//! Bus to journal forwarder: every envelope published on the bus lands in
//! the store's events table.
//!
//! Outcomes written by the convergence writer are journaled by the kernel
//! inside the same transaction and are not published here.

use fleet_events::{Bus, Envelope};
use fleet_kernel::Kernel;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

const TASK: &str = "bus.forward.journal";

/// Subscribe before spawning so nothing published after this call is missed.
/// The task ends once every bus sender is gone and the backlog is drained.
pub(crate) fn spawn_forwarder(bus: &Bus, kernel: Kernel) -> JoinHandle<()> {
    let rx = bus.subscribe();
    tokio::spawn(forward(rx, kernel))
}

async fn forward(mut rx: broadcast::Receiver<Envelope>, kernel: Kernel) {
    loop {
        match rx.recv().await {
            Ok(env) => record(&kernel, &env).await,
            Err(RecvError::Lagged(skipped)) => {
                warn!(target: "fleet::gateway", task = TASK, skipped, "journal forwarder lagged");
            }
            Err(RecvError::Closed) => break,
        }
    }
    debug!(target: "fleet::gateway", task = TASK, "journal forwarder stopped");
}

async fn record(kernel: &Kernel, env: &Envelope) {
    let site_id = payload_str(env, "site_id");
    let installation_id = payload_str(env, "installation_id");
    if let Err(err) = kernel
        .append_event_async(env, site_id.as_deref(), installation_id.as_deref())
        .await
    {
        warn!(target: "fleet::gateway", kind = %env.kind, error = %err, "journal append failed");
    }
}

fn payload_str(env: &Envelope, key: &str) -> Option<String> {
    env.payload
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::to_string)
}
