//! Configuration loading and management.
//!
//! Lookup order: explicit path, `./planner/config.yaml`, `~/.planner/config.yaml`,
//! then built-in defaults. Environment variables are applied on top:
//! - `PLANNER_DB_PATH` - Database path
//! - `PLANNER_HOST` / `PLANNER_PORT` - Listen address
//! - `PLANNER_JWT_SECRET` - Session token signing secret
//! - `PLANNER_ENFORCE_DEPENDENCIES` - Block completion of tasks with open dependencies

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Secret used when nothing is configured. Fine for local use only.
pub const DEV_JWT_SECRET: &str = "planner-dev-secret-change-me";

/// Application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(default)]
    pub tasks: TasksConfig,

    #[serde(default)]
    pub reminders: RemindersConfig,
}

/// HTTP server and storage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("planner/planner.db")
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    31995
}

/// Authentication settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default = "default_jwt_secret")]
    pub jwt_secret: String,

    /// Session lifetime in hours.
    #[serde(default = "default_token_ttl_hours")]
    pub token_ttl_hours: i64,

    /// bcrypt work factor.
    #[serde(default = "default_bcrypt_cost")]
    pub bcrypt_cost: u32,

    /// Password reset token lifetime in minutes.
    #[serde(default = "default_reset_ttl_minutes")]
    pub reset_token_ttl_minutes: i64,

    /// Mark the session cookie `Secure` (requires HTTPS).
    #[serde(default)]
    pub secure_cookie: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: default_jwt_secret(),
            token_ttl_hours: default_token_ttl_hours(),
            bcrypt_cost: default_bcrypt_cost(),
            reset_token_ttl_minutes: default_reset_ttl_minutes(),
            secure_cookie: false,
        }
    }
}

fn default_jwt_secret() -> String {
    DEV_JWT_SECRET.to_string()
}

fn default_token_ttl_hours() -> i64 {
    24
}

fn default_bcrypt_cost() -> u32 {
    bcrypt::DEFAULT_COST
}

fn default_reset_ttl_minutes() -> i64 {
    60
}

/// Task behaviour settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TasksConfig {
    /// Refuse to mark a task done while any of its dependencies is open.
    #[serde(default)]
    pub enforce_dependencies: bool,

    /// Horizon of the upcoming view, in days after today.
    #[serde(default = "default_upcoming_days")]
    pub upcoming_days: u32,
}

impl Default for TasksConfig {
    fn default() -> Self {
        Self {
            enforce_dependencies: false,
            upcoming_days: default_upcoming_days(),
        }
    }
}

fn default_upcoming_days() -> u32 {
    7
}

/// Reminder dispatch settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemindersConfig {
    /// Run the reminder poller inside `serve`.
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_poll_interval")]
    pub poll_interval_seconds: u64,

    /// Maximum reminders dispatched per poll.
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
}

impl Default for RemindersConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval_seconds: default_poll_interval(),
            batch_size: default_batch_size(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_poll_interval() -> u64 {
    60
}

fn default_batch_size() -> u32 {
    100
}

impl Config {
    /// Load configuration from file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("parsing config file {}", path.display()))?;
        Ok(config)
    }

    /// Candidate config files, highest priority first.
    pub fn search_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from("planner/config.yaml")];
        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".planner").join("config.yaml"));
        }
        paths
    }

    /// Load from an explicit path, or the first config file found, then apply
    /// environment overrides.
    pub fn load_or_default(explicit: Option<&Path>) -> Result<Self> {
        let mut config = match explicit {
            Some(path) => Self::load(path)?,
            None => {
                let found = Self::search_paths().into_iter().find(|p| p.exists());
                match found {
                    Some(path) => {
                        debug!(path = %path.display(), "Loading config file");
                        Self::load(&path)?
                    }
                    None => Self::default(),
                }
            }
        };

        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Apply environment overrides using the given lookup.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(db_path) = lookup("PLANNER_DB_PATH") {
            self.server.db_path = PathBuf::from(db_path);
        }

        if let Some(host) = lookup("PLANNER_HOST") {
            self.server.host = host;
        }

        if let Some(port) = lookup("PLANNER_PORT") {
            match port.parse() {
                Ok(port) => self.server.port = port,
                Err(_) => warn!(value = %port, "Ignoring invalid PLANNER_PORT"),
            }
        }

        if let Some(secret) = lookup("PLANNER_JWT_SECRET") {
            self.auth.jwt_secret = secret;
        }

        if let Some(flag) = lookup("PLANNER_ENFORCE_DEPENDENCIES") {
            self.tasks.enforce_dependencies = matches!(flag.as_str(), "1" | "true" | "yes");
        }
    }

    /// Ensure the database directory exists.
    pub fn ensure_db_dir(&self) -> Result<()> {
        if let Some(parent) = self.server.db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Ok(())
    }

    /// True when the signing secret is still the built-in development value.
    pub fn uses_dev_secret(&self) -> bool {
        self.auth.jwt_secret == DEV_JWT_SECRET
    }
}
