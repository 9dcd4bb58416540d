use std::sync::Arc;

use fleet_events::Bus;
use fleet_kernel::Kernel;

use crate::config::PollMode;
use crate::executor::CommandExecutor;
use crate::site_locks::SiteLocks;

#[derive(Clone)]
pub(crate) struct AppState {
    bus: Bus,
    kernel: Kernel,
    executor: Arc<dyn CommandExecutor>,
    poll_mode: PollMode,
    site_locks: Arc<SiteLocks>,
}

impl AppState {
    pub(crate) fn builder(
        bus: Bus,
        kernel: Kernel,
        executor: Arc<dyn CommandExecutor>,
    ) -> AppStateBuilder {
        AppStateBuilder {
            bus,
            kernel,
            executor,
            poll_mode: PollMode::default(),
        }
    }

    pub fn kernel(&self) -> &Kernel {
        &self.kernel
    }

    pub fn bus(&self) -> Bus {
        self.bus.clone()
    }

    pub fn executor(&self) -> Arc<dyn CommandExecutor> {
        Arc::clone(&self.executor)
    }

    pub fn poll_mode(&self) -> PollMode {
        self.poll_mode
    }

    pub fn site_locks(&self) -> Arc<SiteLocks> {
        Arc::clone(&self.site_locks)
    }
}

pub(crate) struct AppStateBuilder {
    bus: Bus,
    kernel: Kernel,
    executor: Arc<dyn CommandExecutor>,
    poll_mode: PollMode,
}

impl AppStateBuilder {
    pub(crate) fn with_poll_mode(mut self, mode: PollMode) -> Self {
        self.poll_mode = mode;
        self
    }

    pub(crate) fn build(self) -> AppState {
        AppState {
            bus: self.bus,
            kernel: self.kernel,
            executor: self.executor,
            poll_mode: self.poll_mode,
            site_locks: Arc::new(SiteLocks::default()),
        }
    }
}
