use dirs::config_dir;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::discovery::{AccountTarget, CloneProtocol, ListingPolicy, DEFAULT_PAGE_SIZE};
use crate::error::{BackupError, BackupResult};
use crate::retry::{RetryPolicy, DEFAULT_RETRY_DELAY_MS, MAX_RETRIES};

/// Environment variable consulted when no token is passed on the command line
pub const TOKEN_ENV_VAR: &str = "GITHUB_TOKEN";

/// Settings read from the optional YAML config file
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Config {
    /// Directory where repositories are backed up
    #[serde(default)]
    pub backup_directory: Option<String>,

    /// Number of repositories backed up concurrently
    #[serde(default = "default_parallel")]
    pub parallel: usize,

    /// Replace existing copies instead of pulling
    #[serde(default)]
    pub replace: bool,

    /// Preferred clone URL
    #[serde(default)]
    pub clone_protocol: CloneProtocol,

    /// Repository listing behavior
    #[serde(default)]
    pub listing: ListingConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Pagination and retry settings for repository listing
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ListingConfig {
    #[serde(default = "default_page_size")]
    pub page_size: u8,

    /// Additional attempts for a failing page
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

/// Logging configuration
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String, // "info"
}

// Default value functions
fn default_parallel() -> usize {
    2
}
fn default_page_size() -> u8 {
    DEFAULT_PAGE_SIZE
}
fn default_max_retries() -> u32 {
    MAX_RETRIES
}
fn default_retry_delay_ms() -> u64 {
    DEFAULT_RETRY_DELAY_MS
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ListingConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backup_directory: None,
            parallel: default_parallel(),
            replace: false,
            clone_protocol: CloneProtocol::default(),
            listing: ListingConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Load the default config file if there is one, built-in defaults otherwise
    pub fn load_or_default() -> BackupResult<Self> {
        match Self::default_config_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Load configuration from a specific file
    pub fn load(path: &Path) -> BackupResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            BackupError::config(format!("failed to read config file {}: {}", path.display(), e))
        })?;

        let mut config: Config = serde_yaml::from_str(&content).map_err(|e| {
            BackupError::config(format!("failed to parse config file {}: {}", path.display(), e))
        })?;

        config.expand_paths()?;
        tracing::debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Get the default configuration file path (XDG compliant)
    pub fn default_config_path() -> Option<PathBuf> {
        config_dir().map(|dir| dir.join("ghbu").join("config.yml"))
    }

    /// Expand `~` and environment variables in configured paths
    pub fn expand_paths(&mut self) -> BackupResult<()> {
        if let Some(dir) = &self.backup_directory {
            let expanded = shellexpand::full(dir).map_err(|e| {
                BackupError::config(format!("failed to expand backup_directory: {}", e))
            })?;
            self.backup_directory = Some(expanded.into_owned());
        }
        Ok(())
    }

    pub fn listing_policy(&self) -> ListingPolicy {
        ListingPolicy {
            page_size: self.listing.page_size,
            retry: RetryPolicy::new(
                self.listing.max_retries,
                Duration::from_millis(self.listing.retry_delay_ms),
            ),
        }
    }
}

/// Command-line values that take precedence over the config file
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub org: Option<String>,
    pub user: Option<String>,
    pub dir: Option<PathBuf>,
    pub token: Option<String>,
    pub replace: bool,
    pub parallel: Option<usize>,
    pub clone_protocol: Option<CloneProtocol>,
}

/// Access token that never shows up in debug output
#[derive(Clone, PartialEq, Eq)]
pub struct Token(String);

impl Token {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Token(***)")
    }
}

/// Fully resolved settings for one run, built once before any work starts
#[derive(Debug, Clone)]
pub struct BackupConfig {
    /// Existing directory that receives one subdirectory per repository
    pub destination: PathBuf,
    pub replace: bool,
    /// Maximum number of concurrent git operations, at least 1
    pub parallel: usize,
    pub token: Token,
    pub target: AccountTarget,
    pub clone_protocol: CloneProtocol,
    pub listing: ListingPolicy,
}

impl BackupConfig {
    /// Merge command-line values over the config file and validate the result
    pub fn resolve(config: &Config, cli: CliOverrides) -> BackupResult<Self> {
        let destination = cli
            .dir
            .or_else(|| config.backup_directory.as_ref().map(PathBuf::from))
            .filter(|dir| !dir.as_os_str().is_empty());
        let token = cli.token.filter(|t| !t.trim().is_empty());

        let (destination, token) = match (destination, token) {
            (Some(destination), Some(token)) => (destination, token),
            _ => return Err(BackupError::config("directory and token are required")),
        };

        match std::fs::metadata(&destination) {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => {
                return Err(BackupError::config(format!(
                    "not a directory: {}",
                    destination.display()
                )))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(BackupError::config(format!(
                    "directory does not exist: {}",
                    destination.display()
                )))
            }
            Err(e) => return Err(BackupError::filesystem(destination, e)),
        }

        let parallel = cli.parallel.unwrap_or(config.parallel);
        if parallel == 0 {
            return Err(BackupError::config("parallel must be at least 1"));
        }

        let listing = config.listing_policy();
        if listing.page_size == 0 || listing.page_size > 100 {
            return Err(BackupError::config(format!(
                "listing.page_size must be between 1 and 100, got {}",
                listing.page_size
            )));
        }

        Ok(Self {
            destination,
            replace: cli.replace || config.replace,
            parallel,
            token: Token::new(token.trim()),
            target: AccountTarget::from_names(cli.org, cli.user),
            clone_protocol: cli.clone_protocol.unwrap_or(config.clone_protocol),
            listing,
        })
    }
}
