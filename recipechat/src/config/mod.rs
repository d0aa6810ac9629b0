//! Configuration system for the `RecipeChat` client.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/recipechat/config.toml`)
//! 4. Compiled defaults
//!
//! Missing config file is not an error (defaults are used). An explicit
//! `--config` path that doesn't exist is an error.

use std::path::PathBuf;
use std::time::Duration;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the TOML configuration.
    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),
}

/// How the session learns about its own sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EchoPolicy {
    /// The backend broadcasts every message back to its sender; nothing is
    /// appended locally on send.
    #[default]
    Server,
    /// Append a local copy on send and suppress the matching server echo.
    Local,
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConfigFile {
    network: NetworkFileConfig,
    session: SessionFileConfig,
}

/// `[network]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct NetworkFileConfig {
    api_url: Option<String>,
    ws_url: Option<String>,
    request_timeout_secs: Option<u64>,
    connect_timeout_secs: Option<u64>,
}

/// `[session]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct SessionFileConfig {
    event_buffer: Option<usize>,
    echo: Option<EchoPolicy>,
}

// ---------------------------------------------------------------------------
// Resolved configuration (concrete types, all fields populated)
// ---------------------------------------------------------------------------

/// Conversation session configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Budget for each REST call (contacts, room, history).
    pub request_timeout: Duration,
    /// Budget for the realtime handshake.
    pub connect_timeout: Duration,
    /// Capacity of the session event channel.
    pub event_buffer: usize,
    /// Own-message echo handling.
    pub echo: EchoPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(10),
            event_buffer: 64,
            echo: EchoPolicy::Server,
        }
    }
}

/// Fully resolved client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the REST API (e.g. `http://127.0.0.1:8000/api`).
    pub api_url: String,
    /// Base URL of the realtime endpoint (e.g. `ws://127.0.0.1:8000/ws`).
    pub ws_url: String,
    /// Session credential, if supplied.
    pub token: Option<String>,
    /// Session settings.
    pub session: SessionConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: "http://127.0.0.1:8000/api".to_string(),
            ws_url: "ws://127.0.0.1:8000/ws".to_string(),
            token: None,
            session: SessionConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the explicit config file cannot be read
    /// or parsed.
    pub fn load(cli: &CliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Ok(Self::resolve(cli, &file))
    }

    /// Resolve a `ClientConfig` from CLI args and a parsed config file.
    ///
    /// Priority: CLI > file > default.
    #[must_use]
    fn resolve(cli: &CliArgs, file: &ConfigFile) -> Self {
        let defaults = Self::default();

        Self {
            api_url: cli
                .api_url
                .clone()
                .or_else(|| file.network.api_url.clone())
                .unwrap_or(defaults.api_url),
            ws_url: cli
                .ws_url
                .clone()
                .or_else(|| file.network.ws_url.clone())
                .unwrap_or(defaults.ws_url),
            token: cli.token.clone(),
            session: SessionConfig {
                request_timeout: file
                    .network
                    .request_timeout_secs
                    .map_or(defaults.session.request_timeout, Duration::from_secs),
                connect_timeout: file
                    .network
                    .connect_timeout_secs
                    .map_or(defaults.session.connect_timeout, Duration::from_secs),
                event_buffer: file
                    .session
                    .event_buffer
                    .unwrap_or(defaults.session.event_buffer),
                echo: file.session.echo.unwrap_or(defaults.session.echo),
            },
        }
    }
}

/// CLI arguments parsed by clap.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "RecipeChat direct messages in the terminal")]
pub struct CliArgs {
    /// Base URL of the REST API.
    #[arg(long, env = "RECIPECHAT_API_URL")]
    pub api_url: Option<String>,

    /// Base URL of the realtime endpoint.
    #[arg(long, env = "RECIPECHAT_WS_URL")]
    pub ws_url: Option<String>,

    /// Session access token.
    #[arg(long, env = "RECIPECHAT_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Open a conversation with this contact (id or username) on start.
    #[arg(long)]
    pub peer: Option<String>,

    /// Path to config file (default: `~/.config/recipechat/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "RECIPECHAT_LOG")]
    pub log_level: String,

    /// Path to log file (default: `$TMPDIR/recipechat.log`).
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Load and parse a TOML config file.
///
/// If `explicit_path` is `Some`, the file must exist (error if not).
/// If `explicit_path` is `None`, the default path is tried and missing file
/// is treated as empty config.
fn load_config_file(explicit_path: Option<&std::path::Path>) -> Result<ConfigFile, ConfigError> {
    let path = if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    } else {
        let Some(config_dir) = dirs::config_dir() else {
            return Ok(ConfigFile::default());
        };
        config_dir.join("recipechat").join("config.toml")
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
