//! Reconciler: diffs one site's desired installation records against what
//! was last observed and emits at most one command per installation.
//!
//! The planner is pure. It never touches the store or the network, so the
//! same snapshot always yields the same commands.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::model::{Action, InstallStatus, Installation, Plugin, PluginVersion, Site};

/// Read-only lookup of plugins and versions referenced by a snapshot.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    plugins: HashMap<String, Plugin>,
    versions: HashMap<String, PluginVersion>,
}

impl Catalog {
    pub fn new(
        plugins: impl IntoIterator<Item = Plugin>,
        versions: impl IntoIterator<Item = PluginVersion>,
    ) -> Self {
        Self {
            plugins: plugins.into_iter().map(|p| (p.id.clone(), p)).collect(),
            versions: versions.into_iter().map(|v| (v.id.clone(), v)).collect(),
        }
    }

    pub fn plugin(&self, id: &str) -> Option<&Plugin> {
        self.plugins.get(id)
    }

    pub fn version(&self, id: &str) -> Option<&PluginVersion> {
        self.versions.get(id)
    }
}

/// Wire shape of one command, identical for the poll response and the
/// executor input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    pub installation_id: String,
    pub plugin_id: String,
    pub plugin_slug: String,
    pub action: Action,
    /// Target version string.
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_url: Option<String>,
}

/// An installation the rules selected but that could not be turned into a
/// command because catalog data was missing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Skipped {
    pub installation_id: String,
    pub action: Action,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plan {
    pub commands: Vec<Command>,
    pub skipped: Vec<Skipped>,
}

type Predicate = fn(&Installation, Option<&PluginVersion>) -> bool;

/// Decision table, evaluated top to bottom; the first matching rule wins.
/// Uninstall sits first: once the owner disabled a plugin, its activation
/// flag and version drift are stale.
pub const RULES: &[(Action, Predicate)] = &[
    (Action::Uninstall, wants_uninstall),
    (Action::Install, wants_install),
    (Action::Update, wants_update),
    (Action::Activate, wants_activate),
    (Action::Deactivate, wants_deactivate),
];

fn wants_uninstall(inst: &Installation, _: Option<&PluginVersion>) -> bool {
    !inst.is_enabled && inst.installed_version.is_some()
}

fn wants_install(inst: &Installation, _: Option<&PluginVersion>) -> bool {
    inst.status == InstallStatus::Pending && inst.installed_version.is_none()
}

fn wants_update(inst: &Installation, desired: Option<&PluginVersion>) -> bool {
    match (&inst.installed_version, desired) {
        (Some(installed), Some(target)) => {
            inst.status == InstallStatus::Pending && installed != &target.version
        }
        _ => false,
    }
}

fn wants_activate(inst: &Installation, _: Option<&PluginVersion>) -> bool {
    inst.status == InstallStatus::Pending && inst.installed_version.is_some() && inst.is_active
}

fn wants_deactivate(inst: &Installation, _: Option<&PluginVersion>) -> bool {
    inst.status == InstallStatus::Pending && inst.installed_version.is_some() && !inst.is_active
}

/// Pick the action for one installation, if any.
///
/// A pending record whose desired version is missing from the catalog
/// cannot be checked for drift; it falls through to activate/deactivate.
pub fn decide(inst: &Installation, desired: Option<&PluginVersion>) -> Option<Action> {
    RULES
        .iter()
        .find(|(_, matches)| matches(inst, desired))
        .map(|(action, _)| *action)
}

/// Compute the ordered commands for `site`. Installations that belong to
/// another site are ignored.
pub fn compute_commands(site: &Site, installations: &[Installation], catalog: &Catalog) -> Plan {
    let mut plan = Plan::default();
    for inst in installations.iter().filter(|i| i.site_id == site.id) {
        let desired = catalog.version(&inst.version_id);
        let Some(action) = decide(inst, desired) else {
            continue;
        };
        match build_command(inst, action, desired, catalog) {
            Ok(cmd) => plan.commands.push(cmd),
            Err(reason) => plan.skipped.push(Skipped {
                installation_id: inst.id.clone(),
                action,
                reason,
            }),
        }
    }
    plan
}

fn build_command(
    inst: &Installation,
    action: Action,
    desired: Option<&PluginVersion>,
    catalog: &Catalog,
) -> Result<Command, String> {
    let plugin = catalog
        .plugin(&inst.plugin_id)
        .ok_or_else(|| format!("plugin {} missing from catalog", inst.plugin_id))?;

    let (version, file_url) = if action.needs_artifact() {
        let target = desired
            .ok_or_else(|| format!("version {} missing from catalog", inst.version_id))?;
        (target.version.clone(), Some(target.file_url.clone()))
    } else if action == Action::Uninstall {
        let installed = inst.installed_version.clone().unwrap_or_default();
        (installed, None)
    } else {
        let version = desired
            .map(|v| v.version.clone())
            .or_else(|| inst.installed_version.clone())
            .unwrap_or_default();
        (version, None)
    };

    Ok(Command {
        installation_id: inst.id.clone(),
        plugin_id: plugin.id.clone(),
        plugin_slug: plugin.slug.clone(),
        action,
        version,
        file_url,
    })
}
