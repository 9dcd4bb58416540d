use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use fleet_kernel::Kernel;
use serde_json::json;

use super::util::{generate_api_key, print_json};

#[derive(Subcommand)]
pub enum SiteCmd {
    /// Register a site; prints its api key once
    Add(SiteAddArgs),
    /// List registered sites
    List,
}

#[derive(Args)]
pub struct SiteAddArgs {
    /// Site root URL (e.g., https://shop.example)
    #[arg(long)]
    pub url: String,
    /// Shared credential; generated when omitted
    #[arg(long)]
    pub api_key: Option<String>,
    /// Display name
    #[arg(long)]
    pub name: Option<String>,
}

#[derive(Subcommand)]
pub enum PluginCmd {
    /// Add a plugin to an owner's catalog
    Add(PluginAddArgs),
}

#[derive(Args)]
pub struct PluginAddArgs {
    /// Owning account
    #[arg(long)]
    pub owner: String,
    /// Stable slug shared with sites (no '/')
    #[arg(long)]
    pub slug: String,
    /// Display name; defaults to the slug
    #[arg(long)]
    pub name: Option<String>,
}

#[derive(Subcommand)]
pub enum VersionCmd {
    /// Register an uploaded artifact as a new plugin version
    Add(VersionAddArgs),
    /// List versions of a plugin
    List(VersionListArgs),
}

#[derive(Args)]
pub struct VersionAddArgs {
    /// Plugin id
    #[arg(long)]
    pub plugin: String,
    /// Version string (e.g., 2.1.0)
    #[arg(long)]
    pub version: String,
    /// Artifact URL; relative paths resolve against the server's storage base
    #[arg(long)]
    pub file_url: String,
}

#[derive(Args)]
pub struct VersionListArgs {
    /// Plugin id
    #[arg(long)]
    pub plugin: String,
}

pub fn run_site(kernel: &Kernel, cmd: SiteCmd, pretty: bool) -> Result<()> {
    match cmd {
        SiteCmd::Add(args) => {
            let api_key = args.api_key.unwrap_or_else(|| generate_api_key(24));
            let site = kernel
                .insert_site(&args.url, &api_key, args.name.as_deref())
                .context("add site")?;
            // The key is never serialized with the site; show it this once.
            print_json(&json!({"site": site, "api_key": api_key}), pretty)
        }
        SiteCmd::List => print_json(&kernel.list_sites()?, pretty),
    }
}

pub fn run_plugin(kernel: &Kernel, cmd: PluginCmd, pretty: bool) -> Result<()> {
    match cmd {
        PluginCmd::Add(args) => {
            let name = args.name.unwrap_or_else(|| args.slug.clone());
            let plugin = kernel
                .insert_plugin(&args.owner, &args.slug, &name)
                .context("add plugin")?;
            print_json(&plugin, pretty)
        }
    }
}

pub fn run_version(kernel: &Kernel, cmd: VersionCmd, pretty: bool) -> Result<()> {
    match cmd {
        VersionCmd::Add(args) => {
            let version = kernel
                .insert_plugin_version(&args.plugin, &args.version, &args.file_url)
                .context("add version")?;
            print_json(&version, pretty)
        }
        VersionCmd::List(args) => print_json(&kernel.list_plugin_versions(&args.plugin)?, pretty),
    }
}
