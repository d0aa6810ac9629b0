//! Configuration system for the `RecipeChat` development backend.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/recipechat-backend/config.toml`)
//! 4. Compiled defaults

use std::path::PathBuf;

use recipechat_proto::user::{Contact, UserId};

/// Errors that can occur when loading backend configuration.
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

    /// A `--user` argument is not `id:username[:email]`.
    #[error("invalid user entry {0:?}, expected id:username[:email]")]
    InvalidUser(String),
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure for the backend.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct BackendConfigFile {
    server: ServerFileConfig,
    users: Vec<Contact>,
}

/// `[server]` section of the backend config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ServerFileConfig {
    bind_addr: Option<String>,
}

// ---------------------------------------------------------------------------
// CLI arguments
// ---------------------------------------------------------------------------

/// CLI arguments for the development backend.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "RecipeChat development backend")]
pub struct BackendCliArgs {
    /// Address to bind the backend to.
    #[arg(short, long, env = "RECIPECHAT_BACKEND_ADDR")]
    pub bind: Option<String>,

    /// Path to config file (default: `~/.config/recipechat-backend/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Roster entry `id:username[:email]`; may be repeated.
    #[arg(short, long = "user")]
    pub users: Vec<String>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "RECIPECHAT_BACKEND_LOG")]
    pub log_level: String,
}

// ---------------------------------------------------------------------------
// Resolved configuration
// ---------------------------------------------------------------------------

/// Fully resolved backend configuration.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// Address to bind the server to (e.g., `127.0.0.1:8000`).
    pub bind_addr: String,
    /// Initial roster; CLI entries override file entries with the same id.
    pub users: Vec<Contact>,
    /// Log level filter string.
    pub log_level: String,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8000".to_string(),
            users: Vec::new(),
            log_level: "info".to_string(),
        }
    }
}

impl BackendConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the explicit config file cannot be read
    /// or parsed, or a `--user` entry is malformed.
    pub fn load(cli: &BackendCliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Self::resolve(cli, file)
    }

    /// Resolve a `BackendConfig` from CLI args and a parsed config file.
    ///
    /// Priority: CLI > file > default.
    fn resolve(cli: &BackendCliArgs, file: BackendConfigFile) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let mut users = file.users;
        for entry in &cli.users {
            let contact = parse_user_arg(entry)?;
            users.retain(|u| u.id != contact.id);
            users.push(contact);
        }

        Ok(Self {
            bind_addr: cli
                .bind
                .clone()
                .or(file.server.bind_addr)
                .unwrap_or(defaults.bind_addr),
            users,
            log_level: cli.log_level.clone(),
        })
    }
}

/// Parses `id:username[:email]`.
fn parse_user_arg(entry: &str) -> Result<Contact, ConfigError> {
    let mut parts = entry.splitn(3, ':');
    let id = parts.next().filter(|s| !s.is_empty());
    let username = parts.next().filter(|s| !s.is_empty());
    let (Some(id), Some(username)) = (id, username) else {
        return Err(ConfigError::InvalidUser(entry.to_string()));
    };
    Ok(Contact {
        id: UserId::new(id),
        username: username.to_string(),
        email: parts.next().unwrap_or_default().to_string(),
    })
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Load and parse a TOML config file for the backend.
fn load_config_file(
    explicit_path: Option<&std::path::Path>,
) -> Result<BackendConfigFile, ConfigError> {
    let path = if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    } else {
        let Some(config_dir) = dirs::config_dir() else {
            return Ok(BackendConfigFile::default());
        };
        config_dir.join("recipechat-backend").join("config.toml")
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BackendConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
