use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// How the poll gateway treats computed commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub(crate) enum PollMode {
    /// Return commands; the site executes locally and reports back.
    #[default]
    Return,
    /// Execute against the site's REST surface within the poll.
    Execute,
}

impl PollMode {
    pub fn as_str(self) -> &'static str {
        match self {
            PollMode::Return => "return",
            PollMode::Execute => "execute",
        }
    }
}

impl FromStr for PollMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "return" => Ok(PollMode::Return),
            "execute" => Ok(PollMode::Execute),
            other => Err(ConfigError::InvalidMode(other.to_string())),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub(crate) enum ConfigError {
    #[error("invalid FLEET_POLL_MODE: {0} (expected return|execute)")]
    InvalidMode(String),
    #[error("invalid {key}: {value}")]
    InvalidNumber { key: &'static str, value: String },
    #[error("invalid bind address {0}")]
    InvalidBind(String),
    #[error("invalid FLEET_STORAGE_BASE_URL: {0}")]
    InvalidUrl(String),
    #[error("read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Optional TOML file layer (`FLEET_CONFIG`). Every key may be omitted.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct FileConfig {
    pub bind: Option<String>,
    pub port: Option<u16>,
    pub concurrency_limit: Option<usize>,
    pub body_limit_bytes: Option<usize>,
    pub state_dir: Option<PathBuf>,
    pub poll_mode: Option<PollMode>,
    pub http_timeout_secs: Option<u64>,
    pub connect_timeout_secs: Option<u64>,
    pub storage_base_url: Option<String>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[derive(Debug, Clone)]
pub(crate) struct ServerConfig {
    pub addr: SocketAddr,
    pub concurrency_limit: usize,
    pub body_limit_bytes: usize,
    pub state_dir: PathBuf,
    pub poll_mode: PollMode,
    pub http_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub storage_base_url: Option<url::Url>,
}

const DEFAULT_BIND: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8092;
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 5;

fn parse_num<T: FromStr>(key: &'static str, raw: String) -> Result<T, ConfigError> {
    raw.trim()
        .parse()
        .map_err(|_| ConfigError::InvalidNumber { key, value: raw })
}

impl ServerConfig {
    /// Resolve from the process environment, reading `FLEET_CONFIG` first
    /// when set. Environment values win over file values.
    pub fn from_env() -> Result<Self, ConfigError> {
        let file = match std::env::var("FLEET_CONFIG") {
            Ok(path) if !path.trim().is_empty() => Some(FileConfig::load(Path::new(&path))?),
            _ => None,
        };
        Self::resolve(file.unwrap_or_default(), |key| std::env::var(key).ok())
    }

    pub fn resolve<F>(file: FileConfig, env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = |key: &str| env(key).filter(|v| !v.trim().is_empty());

        let bind = env("FLEET_BIND")
            .or(file.bind)
            .unwrap_or_else(|| DEFAULT_BIND.into());
        let port = match env("FLEET_PORT") {
            Some(raw) => parse_num("FLEET_PORT", raw)?,
            None => file.port.unwrap_or(DEFAULT_PORT),
        };
        let addr = format!("{}:{}", bind.trim(), port)
            .parse()
            .map_err(|_| ConfigError::InvalidBind(bind.clone()))?;

        let concurrency_limit = match env("FLEET_HTTP_MAX_CONC") {
            Some(raw) => parse_num("FLEET_HTTP_MAX_CONC", raw)?,
            None => file.concurrency_limit.unwrap_or(1024),
        };
        let body_limit_bytes = match env("FLEET_BODY_LIMIT_BYTES") {
            Some(raw) => parse_num("FLEET_BODY_LIMIT_BYTES", raw)?,
            None => file.body_limit_bytes.unwrap_or(256 * 1024),
        };
        let state_dir = env("FLEET_STATE_DIR")
            .map(PathBuf::from)
            .or(file.state_dir)
            .unwrap_or_else(|| PathBuf::from("state"));
        let poll_mode = match env("FLEET_POLL_MODE") {
            Some(raw) => raw.parse()?,
            None => file.poll_mode.unwrap_or_default(),
        };
        let http_timeout_secs = match env("FLEET_HTTP_TIMEOUT_SECS") {
            Some(raw) => parse_num("FLEET_HTTP_TIMEOUT_SECS", raw)?,
            None => file.http_timeout_secs.unwrap_or(DEFAULT_HTTP_TIMEOUT_SECS),
        };
        let connect_timeout_secs = match env("FLEET_HTTP_CONNECT_TIMEOUT_SECS") {
            Some(raw) => parse_num("FLEET_HTTP_CONNECT_TIMEOUT_SECS", raw)?,
            None => file
                .connect_timeout_secs
                .unwrap_or(DEFAULT_CONNECT_TIMEOUT_SECS),
        };
        let storage_base_url = env("FLEET_STORAGE_BASE_URL")
            .or(file.storage_base_url)
            .map(|raw| {
                // A trailing slash makes Url::join append instead of replace.
                let normalized = format!("{}/", raw.trim().trim_end_matches('/'));
                url::Url::parse(&normalized).map_err(|_| ConfigError::InvalidUrl(raw))
            })
            .transpose()?;

        Ok(Self {
            addr,
            concurrency_limit: concurrency_limit.max(1),
            body_limit_bytes: body_limit_bytes.max(1024),
            state_dir,
            poll_mode,
            http_timeout_secs: http_timeout_secs.max(1),
            connect_timeout_secs: connect_timeout_secs.max(1),
            storage_base_url,
        })
    }
}
