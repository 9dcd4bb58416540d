use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

mod commands;

use commands::{EventsArgs, InstallCmd, PluginCmd, PollArgs, SiteCmd, VersionCmd};

#[derive(Parser)]
#[command(name = "fleet-cli", version, about = "Plugin fleet administration")]
struct Cli {
    /// State directory holding fleet.sqlite; falls back to FLEET_STATE_DIR
    #[arg(long, global = true)]
    state_dir: Option<PathBuf>,
    /// Pretty-print JSON output
    #[arg(long, global = true)]
    pretty: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Site registry
    Site {
        #[command(subcommand)]
        cmd: SiteCmd,
    },
    /// Plugin catalog
    Plugin {
        #[command(subcommand)]
        cmd: PluginCmd,
    },
    /// Plugin versions
    Version {
        #[command(subcommand)]
        cmd: VersionCmd,
    },
    /// Desired-state edits for installations
    Install {
        #[command(subcommand)]
        cmd: InstallCmd,
    },
    /// Purge disabled installations that are gone from their site
    Gc,
    /// Poll a running server as a site
    Poll(PollArgs),
    /// Recent journal entries
    Events(EventsArgs),
}

fn run(cli: Cli) -> Result<()> {
    let pretty = cli.pretty;
    let kernel =
        || commands::util::open_kernel(&commands::util::resolve_state_dir(cli.state_dir.clone()));
    match cli.command {
        Commands::Site { cmd } => commands::catalog::run_site(&kernel()?, cmd, pretty),
        Commands::Plugin { cmd } => commands::catalog::run_plugin(&kernel()?, cmd, pretty),
        Commands::Version { cmd } => commands::catalog::run_version(&kernel()?, cmd, pretty),
        Commands::Install { cmd } => commands::installs::run_install(&kernel()?, cmd, pretty),
        Commands::Gc => commands::installs::run_gc(&kernel()?, pretty),
        Commands::Poll(args) => commands::poll::run_poll(&args, pretty),
        Commands::Events(args) => commands::events::run_events(&kernel()?, &args, pretty),
    }
}

fn main() {
    let _ = fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .try_init();

    if let Err(err) = run(Cli::parse()) {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_nested_install_edit() {
        let cli = Cli::try_parse_from([
            "fleet-cli",
            "--state-dir",
            "/tmp/fleet",
            "install",
            "version",
            "inst-1",
            "--version",
            "ver-2",
        ])
        .expect("parse");
        assert_eq!(cli.state_dir, Some(PathBuf::from("/tmp/fleet")));
        assert!(matches!(
            cli.command,
            Commands::Install {
                cmd: InstallCmd::Version(_)
            }
        ));
    }
}
