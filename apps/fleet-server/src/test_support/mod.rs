use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use fleet_core::{Action, Command, Outcome, Plugin, PluginVersion, Site};
use fleet_events::Bus;
use fleet_kernel::Kernel;
use tempfile::TempDir;

use crate::config::PollMode;
use crate::executor::CommandExecutor;
use crate::AppState;

pub(crate) const SITE_KEY: &str = "site-key";

/// A fresh store with one site and one catalog plugin at version 2.0.
pub(crate) struct Fixture {
    _dir: TempDir,
    pub kernel: Kernel,
    pub site: Site,
    pub plugin: Plugin,
    pub version: PluginVersion,
}

pub(crate) fn fixture() -> Fixture {
    let dir = tempfile::tempdir().expect("tempdir");
    let kernel = Kernel::open(dir.path()).expect("kernel");
    let site = kernel
        .insert_site("https://shop.example", SITE_KEY, Some("Shop"))
        .expect("site");
    let plugin = kernel
        .insert_plugin("team-1", "forms", "Forms")
        .expect("plugin");
    let version = kernel
        .insert_plugin_version(&plugin.id, "2.0", "https://cdn.example/forms-2.0.zip")
        .expect("version");
    Fixture {
        _dir: dir,
        kernel,
        site,
        plugin,
        version,
    }
}

pub(crate) fn state(fx: &Fixture, executor: Arc<FakeExecutor>, mode: PollMode) -> AppState {
    AppState::builder(Bus::new(64), fx.kernel.clone(), executor)
        .with_poll_mode(mode)
        .build()
}

type Respond = Box<dyn Fn(&Command) -> Outcome + Send + Sync>;

/// Scripted executor recording every command it receives.
pub(crate) struct FakeExecutor {
    respond: Respond,
    calls: Mutex<Vec<Command>>,
}

impl FakeExecutor {
    pub(crate) fn new(respond: impl Fn(&Command) -> Outcome + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            respond: Box::new(respond),
            calls: Mutex::new(Vec::new()),
        })
    }

    /// Succeeds, reporting the target version for install and update.
    pub(crate) fn succeeding() -> Arc<Self> {
        Self::new(|cmd| match cmd.action {
            Action::Install | Action::Update => Outcome::ok(Some(cmd.version.clone())),
            _ => Outcome::ok(None),
        })
    }

    pub(crate) fn failing(kind: &'static str, message: &'static str) -> Arc<Self> {
        Self::new(move |_| Outcome::failed(message).with_error_kind(kind))
    }

    pub(crate) fn calls(&self) -> Vec<Command> {
        self.calls.lock().expect("calls lock").clone()
    }
}

#[async_trait]
impl CommandExecutor for FakeExecutor {
    async fn execute(&self, _site: &Site, command: &Command) -> Outcome {
        self.calls.lock().expect("calls lock").push(command.clone());
        (self.respond)(command)
    }
}
