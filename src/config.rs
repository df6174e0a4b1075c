//! Configuration management for botpack
//!
//! Settings are loaded from environment variables with defaults suitable for
//! a developer machine. Command-line flags override them.
//!
//! # Environment Variables
//!
//! - `BOTPACK_BACKEND`: Build backend (local|docker) - default: "local"
//! - `BOTPACK_STORE_DIR`: Local image store - default: user data dir + "botpack"
//! - `BOTPACK_CACHE_ENABLED`: Look up cached layers (true|false) - default: "true"
//! - `BOTPACK_BUILD_TIMEOUT`: Timeout in seconds for each build command - default: "1800"
//! - `BOTPACK_DOCKER_BIN`: Docker CLI executable - default: "docker"
//! - `BOTPACK_LOG_LEVEL`: Logging level - default: "info"
//!
//! # Example
//!
//! ```no_run
//! use botpack::BotpackConfig;
//!
//! let config = BotpackConfig::default();
//! config.validate().expect("Invalid configuration");
//! let backend = config.create_backend(false);
//! println!("Building with {}", backend.name());
//! ```

use crate::backend::{BuildBackend, DockerBackend, HostRunner, ImageStore, LocalBackend};
use clap::ValueEnum;
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_CACHE_ENABLED: bool = true;
const DEFAULT_BUILD_TIMEOUT_SECS: u64 = 1800;
const DEFAULT_DOCKER_BIN: &str = "docker";

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Invalid backend name
    #[error("Invalid backend: {0}. Valid options: local, docker")]
    InvalidBackend(String),

    /// Configuration validation failed
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum BackendKind {
    /// Build into botpack's own image store
    #[default]
    Local,
    /// Build with the Docker daemon
    Docker,
}

impl FromStr for BackendKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "local" => Ok(BackendKind::Local),
            "docker" => Ok(BackendKind::Docker),
            other => Err(ConfigError::InvalidBackend(other.to_string())),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Local => write!(f, "local"),
            BackendKind::Docker => write!(f, "docker"),
        }
    }
}

/// Main configuration structure for botpack
#[derive(Debug, Clone)]
pub struct BotpackConfig {
    pub backend: BackendKind,

    /// Root of the local image store (layers, images, tags)
    pub store_dir: PathBuf,

    pub cache_enabled: bool,

    /// Timeout in seconds for each RUN command (local) or the whole build (docker)
    pub build_timeout_secs: u64,

    pub docker_bin: String,

    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
}

fn default_store_dir() -> PathBuf {
    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(env::temp_dir)
        .join("botpack")
}

impl Default for BotpackConfig {
    /// Loads BOTPACK_* environment variables, falling back to defaults for
    /// anything unset. An unparseable backend falls back to `local`; call
    /// [`BotpackConfig::from_env`] to get the error instead.
    fn default() -> Self {
        Self::from_env().unwrap_or_else(|_| Self::from_env_with_backend(BackendKind::Local))
    }
}

impl BotpackConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let backend = match env::var("BOTPACK_BACKEND") {
            Ok(value) if !value.trim().is_empty() => value.parse()?,
            _ => BackendKind::default(),
        };
        Ok(Self::from_env_with_backend(backend))
    }

    fn from_env_with_backend(backend: BackendKind) -> Self {
        let store_dir = env::var("BOTPACK_STORE_DIR")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(default_store_dir);

        let cache_enabled = env::var("BOTPACK_CACHE_ENABLED")
            .ok()
            .and_then(|v| v.parse::<bool>().ok())
            .unwrap_or(DEFAULT_CACHE_ENABLED);

        let build_timeout_secs = env::var("BOTPACK_BUILD_TIMEOUT")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(DEFAULT_BUILD_TIMEOUT_SECS);

        let docker_bin =
            env::var("BOTPACK_DOCKER_BIN").unwrap_or_else(|_| DEFAULT_DOCKER_BIN.to_string());

        let log_level = env::var("BOTPACK_LOG_LEVEL")
            .unwrap_or_else(|_| DEFAULT_LOG_LEVEL.to_string())
            .to_lowercase();

        Self {
            backend,
            store_dir,
            cache_enabled,
            build_timeout_secs,
            docker_bin,
            log_level,
        }
    }

    /// Validates the configuration
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if any validation fails
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.build_timeout_secs == 0 {
            return Err(ConfigError::ValidationFailed(
                "Build timeout must be at least 1 second".to_string(),
            ));
        }
        if self.build_timeout_secs > 24 * 3600 {
            return Err(ConfigError::ValidationFailed(
                "Build timeout cannot exceed 24 hours".to_string(),
            ));
        }

        if self.store_dir.as_os_str().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "Store directory must not be empty".to_string(),
            ));
        }

        if self.docker_bin.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "Docker executable must not be empty".to_string(),
            ));
        }

        match self.log_level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => {
                return Err(ConfigError::ValidationFailed(format!(
                    "Invalid log level: {}. Valid options: trace, debug, info, warn, error",
                    self.log_level
                )))
            }
        }

        Ok(())
    }

    pub fn build_timeout(&self) -> Duration {
        Duration::from_secs(self.build_timeout_secs)
    }

    pub fn image_store(&self) -> ImageStore {
        ImageStore::new(&self.store_dir)
    }

    /// Backend for the configured kind. A dry run always goes through the
    /// local store with RUN commands skipped, whatever the configured kind.
    pub fn create_backend(&self, dry_run: bool) -> Box<dyn BuildBackend> {
        if dry_run {
            return Box::new(LocalBackend::new(self.image_store()).dry_run());
        }
        match self.backend {
            BackendKind::Local => Box::new(
                LocalBackend::new(self.image_store())
                    .with_runner(Arc::new(HostRunner::new(self.build_timeout()))),
            ),
            BackendKind::Docker => Box::new(DockerBackend::new(
                self.docker_bin.clone(),
                self.build_timeout(),
            )),
        }
    }

    /// Converts configuration to a display map for output formatting
    pub fn to_display_map(&self) -> std::collections::BTreeMap<String, String> {
        let mut map = std::collections::BTreeMap::new();

        map.insert("backend".to_string(), self.backend.to_string());
        map.insert("store_dir".to_string(), self.store_dir.display().to_string());
        map.insert("cache_enabled".to_string(), self.cache_enabled.to_string());
        map.insert(
            "build_timeout_secs".to_string(),
            self.build_timeout_secs.to_string(),
        );
        map.insert("docker_bin".to_string(), self.docker_bin.clone());
        map.insert("log_level".to_string(), self.log_level.clone());

        map
    }
}

impl fmt::Display for BotpackConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Botpack Configuration:")?;
        writeln!(f, "  Backend: {}", self.backend)?;
        writeln!(f, "  Store Dir: {}", self.store_dir.display())?;
        writeln!(f, "  Cache Enabled: {}", self.cache_enabled)?;
        writeln!(f, "  Build Timeout: {}s", self.build_timeout_secs)?;
        writeln!(f, "  Docker: {}", self.docker_bin)?;
        writeln!(f, "  Log Level: {}", self.log_level)?;
        Ok(())
    }
}
