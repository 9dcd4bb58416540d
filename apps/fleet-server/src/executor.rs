use async_trait::async_trait;
use fleet_core::{Action, Command, Outcome, Site};
use tracing::{info, warn};

use crate::artifacts::ArtifactStore;
use crate::wp_rest::{RemotePlugin, WpRestClient};

#[derive(Debug, thiserror::Error)]
pub(crate) enum ExecError {
    #[error("plugin {0} not found on site")]
    NotFound(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("{message}")]
    RemoteRejection { status: u16, message: String },
    #[error("artifact unavailable: {0}")]
    Artifact(String),
    #[error("invalid response from site: {0}")]
    InvalidResponse(String),
}

impl ExecError {
    pub(crate) fn transport(err: reqwest::Error) -> Self {
        ExecError::Transport(err.to_string())
    }

    pub(crate) fn kind(&self) -> &'static str {
        match self {
            ExecError::NotFound(_) => "not_found",
            ExecError::Transport(_) => "transport",
            ExecError::RemoteRejection { .. } => "remote_rejection",
            ExecError::Artifact(_) => "artifact",
            ExecError::InvalidResponse(_) => "invalid_response",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Step {
    Resolve,
    FetchArtifact,
    Install,
    Activate,
    Deactivate,
    Uninstall,
}

impl Step {
    pub fn as_str(self) -> &'static str {
        match self {
            Step::Resolve => "resolve",
            Step::FetchArtifact => "fetch_artifact",
            Step::Install => "install",
            Step::Activate => "activate",
            Step::Deactivate => "deactivate",
            Step::Uninstall => "uninstall",
        }
    }
}

#[derive(Debug)]
struct StepFailure {
    step: Step,
    error: ExecError,
}

fn at(step: Step) -> impl FnOnce(ExecError) -> StepFailure {
    move |error| StepFailure { step, error }
}

/// Runs one reconciler command against a site and reports what happened.
/// Implementations never retry and never panic on remote failures.
#[async_trait]
pub(crate) trait CommandExecutor: Send + Sync {
    async fn execute(&self, site: &Site, command: &Command) -> Outcome;
}

/// Executor speaking the WordPress plugins REST API.
pub(crate) struct WpRestExecutor {
    http: reqwest::Client,
    artifacts: ArtifactStore,
}

impl WpRestExecutor {
    pub fn new(http: reqwest::Client, artifacts: ArtifactStore) -> Self {
        Self { http, artifacts }
    }

    async fn run(
        &self,
        site: &Site,
        cmd: &Command,
        trace: &mut Vec<String>,
    ) -> Result<Option<String>, StepFailure> {
        let wp = WpRestClient::new(&self.http, site.base_url(), &site.api_key);
        match cmd.action {
            Action::Install => self.install(&wp, cmd, trace).await.map(|(_, v)| Some(v)),
            Action::Activate => {
                let found = resolve_required(&wp, &cmd.plugin_slug, trace).await?;
                set_status(&wp, &found.plugin, Step::Activate, trace).await?;
                Ok(None)
            }
            Action::Deactivate => {
                let found = resolve_required(&wp, &cmd.plugin_slug, trace).await?;
                set_status(&wp, &found.plugin, Step::Deactivate, trace).await?;
                Ok(None)
            }
            Action::Uninstall => uninstall(&wp, &cmd.plugin_slug, trace).await.map(|_| None),
            Action::Update => {
                match uninstall(&wp, &cmd.plugin_slug, trace).await {
                    Ok(()) => {}
                    Err(StepFailure {
                        error: ExecError::NotFound(_),
                        ..
                    }) => {}
                    Err(failure) => return Err(failure),
                }
                let (plugin, version) = self.install(&wp, cmd, trace).await?;
                let plugin = match plugin {
                    Some(plugin) => plugin,
                    None => resolve_required(&wp, &cmd.plugin_slug, trace).await?.plugin,
                };
                set_status(&wp, &plugin, Step::Activate, trace).await?;
                Ok(Some(version))
            }
        }
    }

    async fn install(
        &self,
        wp: &WpRestClient<'_>,
        cmd: &Command,
        trace: &mut Vec<String>,
    ) -> Result<(Option<String>, String), StepFailure> {
        trace.push(Step::FetchArtifact.as_str().into());
        let file_url = cmd
            .file_url
            .as_deref()
            .ok_or_else(|| ExecError::Artifact("command carries no file_url".into()))
            .map_err(at(Step::FetchArtifact))?;
        let artifact = self
            .artifacts
            .fetch(file_url)
            .await
            .map_err(at(Step::FetchArtifact))?;
        trace.push(Step::Install.as_str().into());
        let receipt = wp.upload(artifact).await.map_err(at(Step::Install))?;
        let version = receipt
            .version
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| cmd.version.clone());
        Ok((receipt.plugin.filter(|p| !p.is_empty()), version))
    }
}

async fn resolve(
    wp: &WpRestClient<'_>,
    slug: &str,
    trace: &mut Vec<String>,
) -> Result<Option<RemotePlugin>, StepFailure> {
    trace.push(Step::Resolve.as_str().into());
    wp.find(slug).await.map_err(at(Step::Resolve))
}

async fn resolve_required(
    wp: &WpRestClient<'_>,
    slug: &str,
    trace: &mut Vec<String>,
) -> Result<RemotePlugin, StepFailure> {
    resolve(wp, slug, trace)
        .await?
        .ok_or_else(|| at(Step::Resolve)(ExecError::NotFound(slug.to_string())))
}

async fn set_status(
    wp: &WpRestClient<'_>,
    plugin: &str,
    step: Step,
    trace: &mut Vec<String>,
) -> Result<(), StepFailure> {
    trace.push(step.as_str().into());
    let status = if step == Step::Activate {
        "active"
    } else {
        "inactive"
    };
    wp.set_status(plugin, status).await.map_err(at(step))
}

/// Absent plugins count as already removed.
async fn uninstall(
    wp: &WpRestClient<'_>,
    slug: &str,
    trace: &mut Vec<String>,
) -> Result<(), StepFailure> {
    let Some(found) = resolve(wp, slug, trace).await? else {
        return Ok(());
    };
    if found.is_active() {
        set_status(wp, &found.plugin, Step::Deactivate, trace).await?;
    }
    trace.push(Step::Uninstall.as_str().into());
    match wp.delete(&found.plugin).await {
        Ok(()) | Err(ExecError::NotFound(_)) => Ok(()),
        Err(err) => Err(at(Step::Uninstall)(err)),
    }
}

#[async_trait]
impl CommandExecutor for WpRestExecutor {
    async fn execute(&self, site: &Site, cmd: &Command) -> Outcome {
        let mut trace = Vec::new();
        match self.run(site, cmd, &mut trace).await {
            Ok(version) => {
                info!(
                    target: "fleet::executor",
                    site = %site.id,
                    installation = %cmd.installation_id,
                    action = %cmd.action,
                    version = version.as_deref().unwrap_or(""),
                    "command executed"
                );
                Outcome::ok(version).with_steps(trace)
            }
            Err(StepFailure { step, error }) => {
                warn!(
                    target: "fleet::executor",
                    site = %site.id,
                    installation = %cmd.installation_id,
                    action = %cmd.action,
                    step = step.as_str(),
                    kind = error.kind(),
                    %error,
                    "command failed"
                );
                Outcome::failed(error.to_string())
                    .with_error_kind(error.kind())
                    .with_failed_step(step.as_str())
                    .with_steps(trace)
            }
        }
    }
}
