//! Canonical event topic constants.
//!
//! Keep this list alphabetized within sections and favor dot.case names.

// Poll gateway
pub const TOPIC_POLL_SERVED: &str = "fleet.poll.served";
pub const TOPIC_STATUS_REPORTED: &str = "fleet.status.reported";

// Commands
pub const TOPIC_COMMAND_APPLIED: &str = "plugins.command.applied";
pub const TOPIC_COMMAND_CONFLICT: &str = "plugins.command.conflict";
pub const TOPIC_COMMAND_FAILED: &str = "plugins.command.failed";
pub const TOPIC_COMMAND_ISSUED: &str = "plugins.command.issued";

// Desired state edits
pub const TOPIC_INSTALLATION_PURGED: &str = "plugins.installation.purged";
pub const TOPIC_INSTALLATION_REQUESTED: &str = "plugins.installation.requested";
