use anyhow::Result;
use clap::Args;
use fleet_kernel::{EventRow, Kernel};

use super::util::print_json;

#[derive(Args)]
pub struct EventsArgs {
    /// Maximum rows, newest last
    #[arg(long, default_value_t = 50)]
    pub limit: i64,
    /// Only events for this installation
    #[arg(long)]
    pub installation: Option<String>,
    /// Emit raw JSON instead of one summary line per event
    #[arg(long)]
    pub json: bool,
}

pub fn run_events(kernel: &Kernel, args: &EventsArgs, pretty: bool) -> Result<()> {
    let rows = kernel.recent_events(args.limit.max(1), args.installation.as_deref())?;
    if args.json {
        return print_json(&rows, pretty);
    }
    for row in &rows {
        println!("{}", summary_line(row));
    }
    Ok(())
}

fn summary_line(row: &EventRow) -> String {
    let mut line = format!("{} {}", row.time, row.kind);
    if let Some(inst) = &row.installation_id {
        line.push_str(&format!(" installation={}", inst));
    }
    if let Some(action) = row.payload.get("action").and_then(|v| v.as_str()) {
        line.push_str(&format!(" action={}", action));
    }
    if let Some(err) = row.payload.get("error").and_then(|v| v.as_str()) {
        line.push_str(&format!(" error={:?}", err));
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn summary_includes_action_and_error() {
        let row = EventRow {
            id: 1,
            time: "2026-01-01T00:00:00.000Z".into(),
            kind: "plugins.command.failed".into(),
            site_id: Some("s1".into()),
            installation_id: Some("i1".into()),
            payload: json!({"action": "install", "error": "Upload failed"}),
        };
        assert_eq!(
            summary_line(&row),
            "2026-01-01T00:00:00.000Z plugins.command.failed installation=i1 action=install error=\"Upload failed\""
        );
    }
}
