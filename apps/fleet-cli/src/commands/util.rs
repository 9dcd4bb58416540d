use std::fmt::Write as _;
use std::path::PathBuf;

use anyhow::{Context, Result};
use fleet_kernel::Kernel;
use rand::RngCore;
use serde::Serialize;

/// `--state-dir`, else `FLEET_STATE_DIR`, else `./state`.
pub fn resolve_state_dir(flag: Option<PathBuf>) -> PathBuf {
    flag.or_else(|| {
        std::env::var("FLEET_STATE_DIR")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
    })
    .unwrap_or_else(|| PathBuf::from("state"))
}

pub fn open_kernel(state_dir: &std::path::Path) -> Result<Kernel> {
    tracing::debug!(state_dir = %state_dir.display(), "opening fleet store");
    Kernel::open(state_dir).with_context(|| format!("open store in {}", state_dir.display()))
}

pub fn print_json<T: Serialize>(value: &T, pretty: bool) -> Result<()> {
    let out = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{}", out);
    Ok(())
}

pub fn encode_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(out, "{:02x}", byte);
    }
    out
}

/// Random site credential, hex encoded.
pub fn generate_api_key(length: usize) -> String {
    let mut bytes = vec![0u8; length.max(16)];
    rand::rng().fill_bytes(&mut bytes);
    encode_hex(&bytes)
}
