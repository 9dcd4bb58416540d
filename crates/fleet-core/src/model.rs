use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Raised when a persisted or reported label does not name a known variant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind}: {value}")]
pub struct ParseLabelError {
    pub kind: &'static str,
    pub value: String,
}

/// Observable status of one (site, plugin) installation record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstallStatus {
    Pending,
    Active,
    Inactive,
    Available,
    Error,
}

impl InstallStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            InstallStatus::Pending => "pending",
            InstallStatus::Active => "active",
            InstallStatus::Inactive => "inactive",
            InstallStatus::Available => "available",
            InstallStatus::Error => "error",
        }
    }
}

impl fmt::Display for InstallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InstallStatus {
    type Err = ParseLabelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(InstallStatus::Pending),
            "active" => Ok(InstallStatus::Active),
            "inactive" => Ok(InstallStatus::Inactive),
            "available" => Ok(InstallStatus::Available),
            "error" => Ok(InstallStatus::Error),
            other => Err(ParseLabelError {
                kind: "installation status",
                value: other.to_string(),
            }),
        }
    }
}

/// Reachability of a remote site as last observed by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SiteStatus {
    Active,
    Error,
    Unknown,
}

impl SiteStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SiteStatus::Active => "active",
            SiteStatus::Error => "error",
            SiteStatus::Unknown => "unknown",
        }
    }
}

impl FromStr for SiteStatus {
    type Err = ParseLabelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "active" => Ok(SiteStatus::Active),
            "error" => Ok(SiteStatus::Error),
            "unknown" => Ok(SiteStatus::Unknown),
            other => Err(ParseLabelError {
                kind: "site status",
                value: other.to_string(),
            }),
        }
    }
}

/// One atomic remote action. `Update` is a single action type even though
/// its remote execution is composed of several sub-steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Install,
    Activate,
    Deactivate,
    Uninstall,
    Update,
}

impl Action {
    pub const ALL: [Action; 5] = [
        Action::Install,
        Action::Activate,
        Action::Deactivate,
        Action::Uninstall,
        Action::Update,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Action::Install => "install",
            Action::Activate => "activate",
            Action::Deactivate => "deactivate",
            Action::Uninstall => "uninstall",
            Action::Update => "update",
        }
    }

    /// Whether executing the action needs the artifact package.
    pub fn needs_artifact(self) -> bool {
        matches!(self, Action::Install | Action::Update)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = ParseLabelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Action::ALL
            .into_iter()
            .find(|a| a.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ParseLabelError {
                kind: "action",
                value: s.to_string(),
            })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plugin {
    pub id: String,
    /// Stable identity key shared with remote sites.
    pub slug: String,
    pub name: String,
    pub owner: String,
}

/// Immutable artifact descriptor; a new upload creates a new row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginVersion {
    pub id: String,
    pub plugin_id: String,
    pub version: String,
    pub file_url: String,
}

/// Desired and observed state for one (site, plugin) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Installation {
    pub id: String,
    pub site_id: String,
    pub plugin_id: String,
    /// Desired catalog version.
    pub version_id: String,
    pub status: InstallStatus,
    /// Desired presence; false means the plugin should not be on the site at all.
    pub is_enabled: bool,
    /// Desired activation, meaningful only while present.
    pub is_active: bool,
    /// Last version observed installed on the site. Only the convergence
    /// writer sets this.
    pub installed_version: Option<String>,
    pub last_sync: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl Installation {
    /// Disabled and nothing left on the remote site; eligible for deletion.
    pub fn is_terminal(&self) -> bool {
        !self.is_enabled && self.installed_version.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Site {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub url: String,
    /// Bearer credential for inbound polls and outbound calls.
    #[serde(skip_serializing)]
    pub api_key: String,
    pub status: SiteStatus,
    #[serde(default)]
    pub last_seen: Option<String>,
}

impl Site {
    /// Site URL without trailing slashes, ready for path joins.
    pub fn base_url(&self) -> &str {
        self.url.trim_end_matches('/')
    }
}
