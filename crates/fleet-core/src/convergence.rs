use serde::{Deserialize, Serialize};

use crate::model::{Action, InstallStatus, Installation};

/// Structured result of executing one command against a site.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outcome {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Failure class (`not_found`, `transport`, `remote_rejection`, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    /// Sub-step that failed, for composed actions and slug resolution.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_step: Option<String>,
    /// Sub-steps attempted, in order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<String>,
}

impl Outcome {
    pub fn ok(version: Option<String>) -> Self {
        Self {
            success: true,
            version,
            ..Self::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Self::default()
        }
    }

    pub fn with_failed_step(mut self, step: impl Into<String>) -> Self {
        self.failed_step = Some(step.into());
        self
    }

    pub fn with_error_kind(mut self, kind: impl Into<String>) -> Self {
        self.error_kind = Some(kind.into());
        self
    }

    pub fn with_steps(mut self, steps: Vec<String>) -> Self {
        self.steps = steps;
        self
    }
}

/// Field changes for one applied outcome. `None` means "leave unchanged".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub status: InstallStatus,
    pub installed_version: FieldUpdate,
    pub is_active: Option<bool>,
    /// `Some(None)` clears the last error.
    pub error_message: Option<Option<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldUpdate {
    Keep,
    Clear,
    Set(String),
}

/// Map `(action, outcome)` onto the next persisted fields.
///
/// `target_version` is used when a successful install/update outcome does
/// not carry the version the site reported.
pub fn transition(action: Action, outcome: &Outcome, target_version: &str) -> Transition {
    if !outcome.success {
        let message = outcome
            .error
            .clone()
            .unwrap_or_else(|| format!("{action} failed"));
        return Transition {
            status: InstallStatus::Error,
            installed_version: FieldUpdate::Keep,
            is_active: None,
            error_message: Some(Some(message)),
        };
    }

    let reported = || {
        FieldUpdate::Set(
            outcome
                .version
                .clone()
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| target_version.to_string()),
        )
    };
    let (status, installed_version, is_active) = match action {
        Action::Install => (InstallStatus::Inactive, reported(), false),
        Action::Activate => (InstallStatus::Active, FieldUpdate::Keep, true),
        Action::Deactivate => (InstallStatus::Inactive, FieldUpdate::Keep, false),
        Action::Uninstall => (InstallStatus::Available, FieldUpdate::Clear, false),
        Action::Update => (InstallStatus::Active, reported(), true),
    };
    Transition {
        status,
        installed_version,
        is_active: Some(is_active),
        error_message: Some(None),
    }
}

impl Transition {
    /// Apply to an in-memory record; `now` becomes `last_sync`.
    pub fn apply_to(&self, inst: &mut Installation, now: &str) {
        inst.status = self.status;
        match &self.installed_version {
            FieldUpdate::Keep => {}
            FieldUpdate::Clear => inst.installed_version = None,
            FieldUpdate::Set(v) => inst.installed_version = Some(v.clone()),
        }
        if let Some(active) = self.is_active {
            inst.is_active = active;
        }
        if let Some(err) = &self.error_message {
            inst.error_message = err.clone();
        }
        inst.last_sync = Some(now.to_string());
    }
}
