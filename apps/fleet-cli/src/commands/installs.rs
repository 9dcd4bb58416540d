use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use fleet_kernel::Kernel;
use serde_json::json;

use super::util::print_json;

/// Owner-side edits of desired state. Every edit hands the record back to
/// the reconciler as `pending`.
#[derive(Subcommand)]
pub enum InstallCmd {
    /// Track a plugin on a site at a given version
    Request(InstallRequestArgs),
    /// Change the desired version
    Version(InstallVersionArgs),
    /// Ask for the plugin to be active
    Activate(InstallIdArgs),
    /// Ask for the plugin to be installed but inactive
    Deactivate(InstallIdArgs),
    /// Remove the plugin from the site
    Disable(InstallIdArgs),
    /// List installation records
    List(InstallListArgs),
}

#[derive(Args)]
pub struct InstallRequestArgs {
    /// Site id
    #[arg(long)]
    pub site: String,
    /// Plugin id
    #[arg(long)]
    pub plugin: String,
    /// Plugin version id
    #[arg(long)]
    pub version: String,
    /// Activate after install
    #[arg(long)]
    pub activate: bool,
}

#[derive(Args)]
pub struct InstallVersionArgs {
    /// Installation id
    pub id: String,
    /// Plugin version id
    #[arg(long)]
    pub version: String,
}

#[derive(Args)]
pub struct InstallIdArgs {
    /// Installation id
    pub id: String,
}

#[derive(Args)]
pub struct InstallListArgs {
    /// Only records for this site
    #[arg(long)]
    pub site: Option<String>,
}

pub fn run_install(kernel: &Kernel, cmd: InstallCmd, pretty: bool) -> Result<()> {
    let record = match cmd {
        InstallCmd::Request(args) => kernel
            .request_installation(&args.site, &args.plugin, &args.version, args.activate)
            .context("request installation")?,
        InstallCmd::Version(args) => kernel
            .set_desired_version(&args.id, &args.version)
            .context("set desired version")?,
        InstallCmd::Activate(args) => kernel
            .set_desired_activation(&args.id, true)
            .context("request activation")?,
        InstallCmd::Deactivate(args) => kernel
            .set_desired_activation(&args.id, false)
            .context("request deactivation")?,
        InstallCmd::Disable(args) => kernel
            .disable_installation(&args.id)
            .context("disable installation")?,
        InstallCmd::List(args) => {
            return print_json(&kernel.list_installations(args.site.as_deref())?, pretty);
        }
    };
    print_json(&record, pretty)
}

/// Delete disabled records that are no longer installed anywhere.
pub fn run_gc(kernel: &Kernel, pretty: bool) -> Result<()> {
    let purged = kernel.purge_removed().context("purge removed installations")?;
    print_json(&json!({"purged": purged}), pretty)
}
