//! Poll gateway: the two endpoints sites talk to.
//!
//! `getPluginCommands` authenticates the site, snapshots its records,
//! runs the reconciler and either hands the commands back (return mode)
//! or executes and applies them in-line (execute mode).
//! `updatePluginStatus` folds a site-side execution report through the
//! same convergence writer.

use std::collections::HashMap;
use std::str::FromStr;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use fleet_core::{
    compute_commands, decide, Action, Command, InstallStatus, Installation, Outcome,
    PluginVersion, Site, SiteStatus,
};
use fleet_events::topics;
use fleet_kernel::StoreError;
use metrics::counter;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::config::PollMode;
use crate::responses::GatewayError;
use crate::security::bearer_token;
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
pub(crate) struct PollRequest {
    #[serde(default)]
    pub api_key: Option<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct PollResponse {
    pub success: bool,
    pub commands: Vec<Command>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results: Option<Vec<CommandResult>>,
}

#[derive(Debug, Serialize)]
pub(crate) struct CommandResult {
    pub installation_id: String,
    pub action: Action,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_step: Option<String>,
    /// Set when the outcome could not be written back.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store_error: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct StatusReport {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub installation_id: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub action: Option<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct StatusResponse {
    pub success: bool,
    pub installation: Installation,
}

/// Empty bodies are accepted so a site can authenticate by header alone.
fn parse_body<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T, GatewayError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| GatewayError::BadRequest(format!("invalid body: {e}")))
}

async fn authenticate(
    state: &AppState,
    body_key: Option<&str>,
    headers: &HeaderMap,
) -> Result<Site, GatewayError> {
    let key = body_key
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(str::to_string)
        .or_else(|| bearer_token(headers))
        .ok_or(GatewayError::MissingKey)?;
    match state.kernel().find_site_by_api_key_async(&key).await? {
        Some(site) => Ok(site),
        None => {
            warn!(target: "fleet::gateway", "poll with unknown api key rejected");
            Err(GatewayError::UnknownKey)
        }
    }
}

/// POST /getPluginCommands
pub(crate) async fn get_plugin_commands(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<PollResponse>, GatewayError> {
    let req: PollRequest = parse_body(&body)?;
    let site = authenticate(&state, req.api_key.as_deref(), &headers).await?;
    let _guard = state.site_locks().acquire(&site.id).await;
    counter!("fleet_polls_total").increment(1);

    let snapshot = state.kernel().site_snapshot_async(&site.id).await?;
    let plan = compute_commands(&site, &snapshot.installations, &snapshot.catalog);
    for skipped in &plan.skipped {
        warn!(
            target: "fleet::gateway",
            site = %site.id,
            installation = %skipped.installation_id,
            action = %skipped.action,
            reason = %skipped.reason,
            "command skipped"
        );
    }
    let observed: HashMap<&str, InstallStatus> = snapshot
        .installations
        .iter()
        .map(|inst| (inst.id.as_str(), inst.status))
        .collect();

    let mode = state.poll_mode();
    let (results, site_status) = match mode {
        PollMode::Return => {
            issue_commands(&state, &site, &plan.commands, &observed).await;
            (None, SiteStatus::Active)
        }
        PollMode::Execute => {
            let results = execute_commands(&state, &site, &plan.commands, &observed).await;
            let transport_failed = results.iter().any(|(_, transport)| *transport);
            let status = if transport_failed {
                SiteStatus::Error
            } else {
                SiteStatus::Active
            };
            (Some(results.into_iter().map(|(r, _)| r).collect()), status)
        }
    };

    if let Err(err) = state
        .kernel()
        .touch_site_async(&site.id, Some(site_status))
        .await
    {
        warn!(target: "fleet::gateway", site = %site.id, error = %err, "site liveness update failed");
    }
    state.bus().publish(
        topics::TOPIC_POLL_SERVED,
        &json!({
            "site_id": site.id,
            "mode": mode.as_str(),
            "commands": plan.commands.len(),
            "skipped": plan.skipped.len(),
        }),
    );
    info!(
        target: "fleet::gateway",
        site = %site.id,
        mode = mode.as_str(),
        commands = plan.commands.len(),
        "poll served"
    );

    Ok(Json(PollResponse {
        success: true,
        commands: plan.commands,
        results,
    }))
}

async fn issue_commands(
    state: &AppState,
    site: &Site,
    commands: &[Command],
    observed: &HashMap<&str, InstallStatus>,
) {
    for cmd in commands {
        counter!("fleet_commands_total", "action" => cmd.action.as_str()).increment(1);
        let Some(expected) = observed.get(cmd.installation_id.as_str()).copied() else {
            continue;
        };
        match state
            .kernel()
            .touch_last_sync_async(&cmd.installation_id, expected)
            .await
        {
            Ok(true) => {}
            Ok(false) => debug!(
                target: "fleet::gateway",
                installation = %cmd.installation_id,
                "record changed after snapshot; last_sync not stamped"
            ),
            Err(err) => warn!(
                target: "fleet::gateway",
                installation = %cmd.installation_id,
                error = %err,
                "last_sync update failed"
            ),
        }
        state.bus().publish(
            topics::TOPIC_COMMAND_ISSUED,
            &json!({
                "site_id": site.id,
                "installation_id": cmd.installation_id,
                "command": cmd,
            }),
        );
    }
}

/// Run each command and write its outcome. One installation's failure
/// never stops its siblings. The flag marks transport failures.
async fn execute_commands(
    state: &AppState,
    site: &Site,
    commands: &[Command],
    observed: &HashMap<&str, InstallStatus>,
) -> Vec<(CommandResult, bool)> {
    let executor = state.executor();
    let mut out = Vec::with_capacity(commands.len());
    for cmd in commands {
        counter!("fleet_commands_total", "action" => cmd.action.as_str()).increment(1);
        let outcome = executor.execute(site, cmd).await;
        if !outcome.success {
            counter!("fleet_command_failures_total", "action" => cmd.action.as_str())
                .increment(1);
        }
        let transport = outcome.error_kind.as_deref() == Some("transport");
        let store_error = match observed.get(cmd.installation_id.as_str()).copied() {
            Some(expected) => apply(
                state,
                site,
                cmd.action,
                &cmd.installation_id,
                expected,
                &outcome,
                &cmd.version,
            )
            .await
            .err(),
            None => Some(format!(
                "installation {} missing from snapshot",
                cmd.installation_id
            )),
        };
        out.push((
            CommandResult {
                installation_id: cmd.installation_id.clone(),
                action: cmd.action,
                success: outcome.success,
                version: outcome.version,
                error: outcome.error,
                failed_step: outcome.failed_step,
                store_error,
            },
            transport,
        ));
    }
    out
}

/// Convergence write. Applied and failed outcomes are journaled by the
/// kernel; conflicts go out on the bus. Returns the store error text when
/// the record could not be updated.
async fn apply(
    state: &AppState,
    site: &Site,
    action: Action,
    installation_id: &str,
    expected: InstallStatus,
    outcome: &Outcome,
    target_version: &str,
) -> Result<Installation, String> {
    match state
        .kernel()
        .apply_outcome_async(installation_id, expected, action, outcome, target_version)
        .await
    {
        Ok(record) => {
            debug!(
                target: "fleet::gateway",
                installation = %installation_id,
                action = %action,
                status = %record.status,
                "outcome applied"
            );
            Ok(record)
        }
        Err(err @ StoreError::Conflict { .. }) => {
            warn!(
                target: "fleet::gateway",
                installation = %installation_id,
                action = %action,
                error = %err,
                "outcome discarded: record changed concurrently"
            );
            state.bus().publish(
                topics::TOPIC_COMMAND_CONFLICT,
                &json!({"site_id": site.id, "installation_id": installation_id, "action": action}),
            );
            Err(err.to_string())
        }
        Err(err) => {
            warn!(
                target: "fleet::gateway",
                installation = %installation_id,
                action = %action,
                error = %err,
                "outcome write failed"
            );
            Err(err.to_string())
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReportedStatus {
    Active,
    Inactive,
    Removed,
}

/// `Ok(None)` is the site reporting a failure.
fn parse_status(raw: &str) -> Result<Option<ReportedStatus>, GatewayError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "active" => Ok(Some(ReportedStatus::Active)),
        "inactive" => Ok(Some(ReportedStatus::Inactive)),
        "available" | "uninstalled" => Ok(Some(ReportedStatus::Removed)),
        "error" => Ok(None),
        other => Err(GatewayError::BadRequest(format!(
            "unknown status {other:?} (expected active|inactive|available|uninstalled|error)"
        ))),
    }
}

/// Translate a site report into the `(action, outcome, target_version)`
/// triple the convergence writer understands.
fn fold_report(
    report: &StatusReport,
    inst: &Installation,
    desired: Option<&PluginVersion>,
) -> Result<(Action, Outcome, String), GatewayError> {
    let status = parse_status(&report.status)?;
    let explicit = report
        .action
        .as_deref()
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .map(|a| Action::from_str(a).map_err(|e| GatewayError::BadRequest(e.to_string())))
        .transpose()?;
    let reported_version = report
        .version
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty());
    let target = reported_version
        .map(str::to_string)
        .or_else(|| desired.map(|v| v.version.clone()))
        .or_else(|| inst.installed_version.clone())
        .unwrap_or_default();
    let error_message = report
        .error_message
        .as_deref()
        .map(str::trim)
        .filter(|m| !m.is_empty());

    let status = match (status, error_message) {
        (Some(status), None) => status,
        (_, message) => {
            let action = explicit
                .or_else(|| decide(inst, desired))
                .unwrap_or(Action::Install);
            let message = message.unwrap_or("site reported an error");
            return Ok((action, Outcome::failed(message), target));
        }
    };

    let action = explicit.unwrap_or(match status {
        ReportedStatus::Active => match (&inst.installed_version, reported_version) {
            (Some(installed), Some(v)) if installed != v => Action::Update,
            _ => Action::Activate,
        },
        ReportedStatus::Inactive if inst.installed_version.is_none() => Action::Install,
        ReportedStatus::Inactive => Action::Deactivate,
        ReportedStatus::Removed => Action::Uninstall,
    });
    Ok((action, Outcome::ok(reported_version.map(str::to_string)), target))
}

/// POST /updatePluginStatus
pub(crate) async fn update_plugin_status(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<StatusResponse>, GatewayError> {
    let report: StatusReport = parse_body(&body)?;
    let site = authenticate(&state, report.api_key.as_deref(), &headers).await?;
    if report.installation_id.trim().is_empty() {
        return Err(GatewayError::BadRequest("installation_id is required".into()));
    }
    let _guard = state.site_locks().acquire(&site.id).await;

    let inst = state
        .kernel()
        .get_installation_async(&report.installation_id)
        .await?
        .filter(|inst| inst.site_id == site.id)
        .ok_or_else(|| GatewayError::InstallationNotFound(report.installation_id.clone()))?;
    let desired = state
        .kernel()
        .get_plugin_version_async(&inst.version_id)
        .await?;
    let (action, outcome, target) = fold_report(&report, &inst, desired.as_ref())?;
    if !outcome.success {
        counter!("fleet_command_failures_total", "action" => action.as_str()).increment(1);
    }

    let record = state
        .kernel()
        .apply_outcome_async(&inst.id, inst.status, action, &outcome, &target)
        .await?;
    if let Err(err) = state
        .kernel()
        .touch_site_async(&site.id, Some(SiteStatus::Active))
        .await
    {
        warn!(target: "fleet::gateway", site = %site.id, error = %err, "site liveness update failed");
    }
    state.bus().publish(
        topics::TOPIC_STATUS_REPORTED,
        &json!({
            "site_id": site.id,
            "installation_id": record.id,
            "action": action,
            "status": record.status,
        }),
    );
    info!(
        target: "fleet::gateway",
        site = %site.id,
        installation = %record.id,
        action = %action,
        status = %record.status,
        "status report applied"
    );
    Ok(Json(StatusResponse {
        success: true,
        installation: record,
    }))
}

/// GET /healthz
pub(crate) async fn healthz(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({"ok": true, "mode": state.poll_mode().as_str()}))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{self, FakeExecutor, Fixture};
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request, StatusCode};
    use axum::routing::{get, post};
    use axum::Router;
    use std::sync::Arc;
    use tower::ServiceExt;

    fn router(state: AppState) -> Router {
        Router::new()
            .route("/getPluginCommands", post(get_plugin_commands))
            .route("/updatePluginStatus", post(update_plugin_status))
            .route("/healthz", get(healthz))
            .with_state(state)
    }

    async fn call(app: &Router, path: &str, body: serde_json::Value) -> (StatusCode, serde_json::Value) {
        let resp = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(path)
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body.to_string()))
                    .expect("request"),
            )
            .await
            .expect("response");
        let status = resp.status();
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.expect("body");
        let value = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).expect("json")
        };
        (status, value)
    }

    fn request(fx: &Fixture, activate: bool) -> Installation {
        fx.kernel
            .request_installation(&fx.site.id, &fx.plugin.id, &fx.version.id, activate)
            .expect("request")
    }

    #[tokio::test]
    async fn unknown_key_is_unauthorized() {
        let fx = test_support::fixture();
        let app = router(test_support::state(&fx, FakeExecutor::succeeding(), PollMode::Return));

        let (status, body) = call(&app, "/getPluginCommands", json!({"api_key": "nope"})).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["status"], 401);

        let (status, _) = call(&app, "/getPluginCommands", json!({})).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn return_mode_hands_out_commands_and_stamps_last_sync() {
        let fx = test_support::fixture();
        let inst = request(&fx, false);
        let app = router(test_support::state(&fx, FakeExecutor::succeeding(), PollMode::Return));

        let (status, body) = call(
            &app,
            "/getPluginCommands",
            json!({"api_key": test_support::SITE_KEY}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        let commands = body["commands"].as_array().expect("commands");
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0]["installation_id"], inst.id.as_str());
        assert_eq!(commands[0]["action"], "install");
        assert_eq!(commands[0]["plugin_slug"], "forms");
        assert_eq!(commands[0]["version"], "2.0");
        assert_eq!(commands[0]["file_url"], fx.version.file_url.as_str());
        assert!(body.get("results").is_none());

        let after = fx.kernel.get_installation(&inst.id).unwrap().unwrap();
        assert_eq!(after.status, InstallStatus::Pending);
        assert!(after.last_sync.is_some());
        let site = fx.kernel.get_site(&fx.site.id).unwrap().unwrap();
        assert!(site.last_seen.is_some());
        assert_eq!(site.status, SiteStatus::Active);
    }

    #[tokio::test]
    async fn bearer_header_authenticates_empty_body() {
        let fx = test_support::fixture();
        let app = router(test_support::state(&fx, FakeExecutor::succeeding(), PollMode::Return));
        let resp = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/getPluginCommands")
                    .header(header::AUTHORIZATION, format!("Bearer {}", test_support::SITE_KEY))
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn execute_mode_applies_outcomes() {
        let fx = test_support::fixture();
        let inst = request(&fx, true);
        let fake = FakeExecutor::succeeding();
        let app = router(test_support::state(&fx, Arc::clone(&fake), PollMode::Execute));

        let (status, body) = call(
            &app,
            "/getPluginCommands",
            json!({"api_key": test_support::SITE_KEY}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["results"][0]["success"], true);
        assert_eq!(body["results"][0]["action"], "install");
        assert_eq!(fake.calls().len(), 1);

        let after = fx.kernel.get_installation(&inst.id).unwrap().unwrap();
        assert_eq!(after.status, InstallStatus::Inactive);
        assert_eq!(after.installed_version.as_deref(), Some("2.0"));

        // Desired active: the next poll activates.
        let (_, body) = call(
            &app,
            "/getPluginCommands",
            json!({"api_key": test_support::SITE_KEY}),
        )
        .await;
        assert_eq!(body["commands"].as_array().map(Vec::len), Some(0));
        fx.kernel
            .set_desired_activation(&inst.id, true)
            .expect("owner edit");
        let (_, body) = call(
            &app,
            "/getPluginCommands",
            json!({"api_key": test_support::SITE_KEY}),
        )
        .await;
        assert_eq!(body["commands"][0]["action"], "activate");
        let after = fx.kernel.get_installation(&inst.id).unwrap().unwrap();
        assert_eq!(after.status, InstallStatus::Active);
        assert!(after.is_active);
    }

    #[tokio::test]
    async fn overlapping_polls_for_one_site_execute_once() {
        let fx = test_support::fixture();
        let inst = request(&fx, false);
        let fake = FakeExecutor::succeeding();
        let app = router(test_support::state(&fx, Arc::clone(&fake), PollMode::Execute));
        let body = json!({"api_key": test_support::SITE_KEY});

        let ((a, first), (b, second)) = tokio::join!(
            call(&app, "/getPluginCommands", body.clone()),
            call(&app, "/getPluginCommands", body.clone()),
        );
        assert_eq!(a, StatusCode::OK);
        assert_eq!(b, StatusCode::OK);
        assert_eq!(fake.calls().len(), 1);
        let executed: usize = [first, second]
            .iter()
            .map(|r| r["results"].as_array().map(Vec::len).unwrap_or(0))
            .sum();
        assert_eq!(executed, 1);

        let after = fx.kernel.get_installation(&inst.id).unwrap().unwrap();
        assert_eq!(after.status, InstallStatus::Inactive);
    }

    #[tokio::test]
    async fn issued_commands_and_polls_are_journaled() {
        let fx = test_support::fixture();
        let inst = request(&fx, false);
        let state = test_support::state(&fx, FakeExecutor::succeeding(), PollMode::Return);
        let journal = crate::journal::spawn_forwarder(&state.bus(), fx.kernel.clone());
        let app = router(state);

        let (status, _) = call(
            &app,
            "/getPluginCommands",
            json!({"api_key": test_support::SITE_KEY}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        drop(app);
        journal.await.expect("journal forwarder");

        let issued = fx.kernel.recent_events(10, Some(inst.id.as_str())).unwrap();
        assert!(issued.iter().any(|e| {
            e.kind == topics::TOPIC_COMMAND_ISSUED && e.site_id.as_deref() == Some(fx.site.id.as_str())
        }));
        let all = fx.kernel.recent_events(50, None).unwrap();
        assert!(all.iter().any(|e| e.kind == topics::TOPIC_POLL_SERVED));
    }

    #[tokio::test]
    async fn execute_mode_transport_failure_marks_site_error() {
        let fx = test_support::fixture();
        let inst = request(&fx, false);
        let app = router(test_support::state(
            &fx,
            FakeExecutor::failing("transport", "connection refused"),
            PollMode::Execute,
        ));

        let (_, body) = call(
            &app,
            "/getPluginCommands",
            json!({"api_key": test_support::SITE_KEY}),
        )
        .await;
        assert_eq!(body["results"][0]["success"], false);
        assert_eq!(body["results"][0]["error"], "connection refused");

        let after = fx.kernel.get_installation(&inst.id).unwrap().unwrap();
        assert_eq!(after.status, InstallStatus::Error);
        assert_eq!(after.error_message.as_deref(), Some("connection refused"));
        let site = fx.kernel.get_site(&fx.site.id).unwrap().unwrap();
        assert_eq!(site.status, SiteStatus::Error);

        // Parked in error: later polls stay quiet.
        let (_, body) = call(
            &app,
            "/getPluginCommands",
            json!({"api_key": test_support::SITE_KEY}),
        )
        .await;
        assert_eq!(body["commands"].as_array().map(Vec::len), Some(0));
    }

    #[tokio::test]
    async fn status_report_folds_through_transition_table() {
        let fx = test_support::fixture();
        let inst = request(&fx, false);
        let app = router(test_support::state(&fx, FakeExecutor::succeeding(), PollMode::Return));

        let (status, body) = call(
            &app,
            "/updatePluginStatus",
            json!({
                "api_key": test_support::SITE_KEY,
                "installation_id": inst.id,
                "status": "inactive",
                "version": "2.0"
            }),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["installation"]["status"], "inactive");
        assert_eq!(body["installation"]["installed_version"], "2.0");

        let events = fx.kernel.recent_events(10, Some(inst.id.as_str())).unwrap();
        assert!(events
            .iter()
            .any(|e| e.kind == topics::TOPIC_COMMAND_APPLIED));
    }

    #[tokio::test]
    async fn status_report_error_and_validation() {
        let fx = test_support::fixture();
        let inst = request(&fx, false);
        let app = router(test_support::state(&fx, FakeExecutor::succeeding(), PollMode::Return));

        let (status, _) = call(
            &app,
            "/updatePluginStatus",
            json!({
                "api_key": test_support::SITE_KEY,
                "installation_id": inst.id,
                "status": "sleeping"
            }),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = call(
            &app,
            "/updatePluginStatus",
            json!({
                "api_key": test_support::SITE_KEY,
                "installation_id": "someone-elses",
                "status": "active"
            }),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = call(
            &app,
            "/updatePluginStatus",
            json!({
                "api_key": test_support::SITE_KEY,
                "installation_id": inst.id,
                "status": "error",
                "error_message": "The package could not be installed."
            }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["installation"]["status"], "error");
        assert_eq!(
            body["installation"]["error_message"],
            "The package could not be installed."
        );
    }

    #[tokio::test]
    async fn installations_of_other_sites_are_hidden() {
        let fx = test_support::fixture();
        let other = fx
            .kernel
            .insert_site("https://other.example", "other-key", None)
            .expect("site");
        let foreign = fx
            .kernel
            .request_installation(&other.id, &fx.plugin.id, &fx.version.id, false)
            .expect("request");
        let app = router(test_support::state(&fx, FakeExecutor::succeeding(), PollMode::Return));

        let (_, body) = call(
            &app,
            "/getPluginCommands",
            json!({"api_key": test_support::SITE_KEY}),
        )
        .await;
        assert_eq!(body["commands"].as_array().map(Vec::len), Some(0));

        let (status, _) = call(
            &app,
            "/updatePluginStatus",
            json!({
                "api_key": test_support::SITE_KEY,
                "installation_id": foreign.id,
                "status": "active"
            }),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn healthz_reports_mode() {
        let fx = test_support::fixture();
        let app = router(test_support::state(&fx, FakeExecutor::succeeding(), PollMode::Execute));
        let resp = app
            .oneshot(
                Request::builder()
                    .uri("/healthz")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(resp.status(), StatusCode::OK);
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.expect("body");
        let value: serde_json::Value = serde_json::from_slice(&bytes).expect("json");
        assert_eq!(value, json!({"ok": true, "mode": "execute"}));
    }

    fn record(installed: Option<&str>) -> Installation {
        Installation {
            id: "i1".into(),
            site_id: "s1".into(),
            plugin_id: "p1".into(),
            version_id: "v2".into(),
            status: InstallStatus::Pending,
            is_enabled: true,
            is_active: true,
            installed_version: installed.map(str::to_string),
            last_sync: None,
            error_message: None,
        }
    }

    fn report(status: &str, version: Option<&str>) -> StatusReport {
        StatusReport {
            status: status.into(),
            version: version.map(str::to_string),
            ..StatusReport::default()
        }
    }

    #[test]
    fn report_action_inference() {
        let cases = [
            ("active", Some("2.0"), Some("1.0"), Action::Update),
            ("active", Some("1.0"), Some("1.0"), Action::Activate),
            ("active", None, Some("1.0"), Action::Activate),
            ("active", Some("2.0"), None, Action::Activate),
            ("inactive", Some("2.0"), None, Action::Install),
            ("inactive", None, Some("1.0"), Action::Deactivate),
            ("available", None, Some("1.0"), Action::Uninstall),
            ("Uninstalled", None, Some("1.0"), Action::Uninstall),
        ];
        for (status, version, installed, expected) in cases {
            let (action, outcome, _) =
                fold_report(&report(status, version), &record(installed), None).expect("fold");
            assert_eq!(action, expected, "{status} {version:?} {installed:?}");
            assert!(outcome.success);
        }
    }

    #[test]
    fn report_explicit_action_and_failures() {
        let mut r = report("active", Some("2.0"));
        r.action = Some("activate".into());
        let (action, _, target) = fold_report(&r, &record(Some("1.0")), None).unwrap();
        assert_eq!(action, Action::Activate);
        assert_eq!(target, "2.0");

        r.action = Some("reboot".into());
        assert!(matches!(
            fold_report(&r, &record(None), None),
            Err(GatewayError::BadRequest(_))
        ));

        let mut failed = report("active", None);
        failed.error_message = Some("fatal error on activation".into());
        let (_, outcome, _) = fold_report(&failed, &record(Some("1.0")), None).unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.error.as_deref(), Some("fatal error on activation"));
    }
}
