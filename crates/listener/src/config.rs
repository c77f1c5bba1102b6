//! Worker configuration, read from the environment.
//!
//! Every reader has a `from_lookup` twin taking a closure, so tests supply
//! values without touching the process environment.

use std::path::{Path, PathBuf};

use dispatch::{ActorLogin, RetrySettings, DEFAULT_COMMAND_PREFIX};
use handlers::Allowlist;
use thiserror::Error;
use tracing::{info, warn};

/// Directory wiped between tasks.
pub const WORK_DIR_ENV: &str = "STEWARD_WORK_DIR";
/// Set by Kubernetes in every pod; the scratch volume is only wiped there.
pub const SANDBOX_MARKER_ENV: &str = "KUBERNETES_SERVICE_HOST";
/// Comment prefix introducing bot commands.
pub const COMMAND_PREFIX_ENV: &str = "STEWARD_COMMAND_PREFIX";
/// Prometheus Pushgateway base URL.
pub const PUSHGATEWAY_URL_ENV: &str = "STEWARD_PUSHGATEWAY_URL";
/// Comma-separated admin logins that bypass the allowlist.
pub const ADMINS_ENV: &str = "STEWARD_ADMINS";
/// Path of the JSON allowlist file.
pub const ALLOWLIST_ENV: &str = "STEWARD_ALLOWLIST";

pub const DEFAULT_WORK_DIR: &str = "/tmp/steward-work";

/// Errors in the worker configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment value is present but unusable.
    #[error("Invalid value for {name}: '{value}' ({reason})")]
    InvalidValue {
        /// Variable name.
        name: &'static str,
        /// Offending value.
        value: String,
        /// What is wrong with it.
        reason: &'static str,
    },

    /// The allowlist file could not be read.
    #[error("Failed to read allowlist '{path}': {source}")]
    AllowlistRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The allowlist file is not a JSON object of namespace statuses.
    #[error("Failed to parse allowlist '{path}': {source}")]
    AllowlistParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Everything a worker process needs besides the handler list.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerConfig {
    pub retry: RetrySettings,
    pub work_dir: PathBuf,
    pub in_sandbox: bool,
    pub command_prefix: String,
    pub pushgateway_url: Option<String>,
    pub admins: Vec<ActorLogin>,
    pub allowlist_path: Option<PathBuf>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            retry: RetrySettings::default(),
            work_dir: PathBuf::from(DEFAULT_WORK_DIR),
            in_sandbox: false,
            command_prefix: DEFAULT_COMMAND_PREFIX.to_string(),
            pushgateway_url: None,
            admins: Vec::new(),
            allowlist_path: None,
        }
    }
}

impl WorkerConfig {
    /// Reads the configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads the configuration through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let retry = RetrySettings::from_lookup(&lookup);

        let work_dir = non_empty(WORK_DIR_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_WORK_DIR));

        let in_sandbox = non_empty(SANDBOX_MARKER_ENV).is_some();

        let command_prefix = match lookup(COMMAND_PREFIX_ENV) {
            None => DEFAULT_COMMAND_PREFIX.to_string(),
            Some(value) => {
                let trimmed = value.trim();
                if trimmed.is_empty() || trimmed.contains(char::is_whitespace) {
                    return Err(ConfigError::InvalidValue {
                        name: COMMAND_PREFIX_ENV,
                        value,
                        reason: "must be a single non-empty word",
                    });
                }
                trimmed.to_string()
            }
        };

        let pushgateway_url = match non_empty(PUSHGATEWAY_URL_ENV) {
            None => None,
            Some(url) if url.starts_with("http://") || url.starts_with("https://") => {
                Some(url.trim_end_matches('/').to_string())
            }
            Some(url) => {
                return Err(ConfigError::InvalidValue {
                    name: PUSHGATEWAY_URL_ENV,
                    value: url,
                    reason: "must be an http(s) URL",
                })
            }
        };

        let admins = non_empty(ADMINS_ENV)
            .map(|raw| {
                raw.split(',')
                    .filter_map(|login| ActorLogin::new(login.trim()))
                    .collect()
            })
            .unwrap_or_default();

        let allowlist_path = non_empty(ALLOWLIST_ENV).map(PathBuf::from);

        Ok(Self {
            retry,
            work_dir,
            in_sandbox,
            command_prefix,
            pushgateway_url,
            admins,
            allowlist_path,
        })
    }

    /// Loads the allowlist and attaches the configured admins.
    ///
    /// Without a configured file every namespace is approved.
    pub fn load_allowlist(&self) -> Result<Allowlist, ConfigError> {
        let allowlist = match &self.allowlist_path {
            Some(path) => read_allowlist(path)?,
            None => {
                warn!("No allowlist configured, approving every namespace");
                Allowlist::permissive()
            }
        };
        Ok(allowlist.with_admins(self.admins.iter().cloned()))
    }
}

fn read_allowlist(path: &Path) -> Result<Allowlist, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::AllowlistRead {
        path: path.to_path_buf(),
        source,
    })?;
    let allowlist = Allowlist::from_json(&raw).map_err(|source| ConfigError::AllowlistParse {
        path: path.to_path_buf(),
        source,
    })?;
    info!(path = %path.display(), entries = allowlist.len(), "Allowlist loaded");
    Ok(allowlist)
}
