use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Args;
use reqwest::blocking::Client;
use serde_json::{json, Value as JsonValue};

use super::util::print_json;

#[derive(Args)]
pub struct PollArgs {
    /// Base URL of the fleet server
    #[arg(long, default_value = "http://127.0.0.1:8092")]
    pub base: String,
    /// Site api key; falls back to FLEET_SITE_API_KEY env
    #[arg(long)]
    pub api_key: Option<String>,
    /// Timeout seconds
    #[arg(long, default_value_t = 30)]
    pub timeout: u64,
}

/// Poll the server as a site would and print the command batch.
pub fn run_poll(args: &PollArgs, pretty: bool) -> Result<()> {
    let body = poll(args)?;
    print_json(&body, pretty)
}

fn poll(args: &PollArgs) -> Result<JsonValue> {
    let api_key = args
        .api_key
        .clone()
        .or_else(|| std::env::var("FLEET_SITE_API_KEY").ok())
        .filter(|k| !k.trim().is_empty())
        .context("--api-key or FLEET_SITE_API_KEY is required")?;
    let base = args.base.trim_end_matches('/');
    let client = Client::builder()
        .timeout(Duration::from_secs(args.timeout.max(1)))
        .build()?;
    let resp = client
        .post(format!("{}/getPluginCommands", base))
        .json(&json!({ "api_key": api_key }))
        .send()
        .with_context(|| format!("POST {}/getPluginCommands", base))?;
    let status = resp.status();
    let body: JsonValue = resp.json().unwrap_or_else(|_| json!({}));
    if !status.is_success() {
        let detail = body
            .get("detail")
            .and_then(JsonValue::as_str)
            .unwrap_or("no detail");
        bail!("poll failed with {}: {}", status.as_u16(), detail);
    }
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    #[test]
    fn poll_posts_api_key_and_returns_commands() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/getPluginCommands")
                .json_body(json!({"api_key": "k1"}));
            then.status(200).json_body(json!({
                "success": true,
                "commands": [{"installation_id": "i1", "action": "install"}]
            }));
        });
        let args = PollArgs {
            base: server.base_url(),
            api_key: Some("k1".into()),
            timeout: 5,
        };
        let body = poll(&args).expect("poll");
        assert_eq!(body["commands"][0]["action"], "install");
        mock.assert();
    }

    #[test]
    fn poll_surfaces_problem_detail() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/getPluginCommands");
            then.status(401).json_body(json!({
                "type": "about:blank",
                "title": "Unauthorized",
                "status": 401,
                "detail": "unknown api_key"
            }));
        });
        let args = PollArgs {
            base: server.base_url(),
            api_key: Some("nope".into()),
            timeout: 5,
        };
        let err = poll(&args).unwrap_err();
        assert!(err.to_string().contains("unknown api_key"), "{err}");
    }
}
