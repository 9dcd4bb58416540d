//! Domain model and pure decision logic for the plugin fleet control plane.
//!
//! Nothing in this crate performs I/O: the reconciler reads a snapshot and
//! the convergence table maps an outcome onto field changes. Persistence
//! lives in `fleet-kernel`, remote execution in `fleet-server`.

pub mod convergence;
pub mod model;
pub mod reconcile;

pub use convergence::{transition, FieldUpdate, Outcome, Transition};
pub use model::{
    Action, InstallStatus, Installation, ParseLabelError, Plugin, PluginVersion, Site, SiteStatus,
};
pub use reconcile::{compute_commands, decide, Catalog, Command, Plan, Skipped};
