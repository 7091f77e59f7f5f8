//! Application configuration loaded from environment variables.

use std::env;
use std::path::PathBuf;

/// Development default values - NEVER use in production.
pub mod defaults {
    pub const DEV_HOST: &str = "127.0.0.1";
    pub const DEV_PORT: u16 = 5000;
    pub const DEV_RUNNER_EXECUTABLE: &str = "msim";
    pub const DEV_JOB_RETENTION_HOURS: u64 = 24;
    pub const DEV_CLEANUP_INTERVAL_SECS: u64 = 3600;
}

/// Runtime environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    /// Parse environment from string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "development" | "dev" => Some(Self::Development),
            "production" | "prod" => Some(Self::Production),
            _ => None,
        }
    }

    /// Check if this is a development environment.
    pub fn is_development(&self) -> bool {
        matches!(self, Self::Development)
    }

    /// Check if this is a production environment.
    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Development => write!(f, "development"),
            Self::Production => write!(f, "production"),
        }
    }
}

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Runtime environment
    pub environment: Environment,
    /// Server host address
    pub host: String,
    /// Server port
    pub port: u16,
    /// Project root the rerun flow operates under (the deployment's
    /// `PRJ_ICDIR`). Optional at startup; jobs fail with a configuration
    /// error when it is needed but absent.
    pub project_root: Option<PathBuf>,
    /// Name or path of the external regression-runner executable.
    pub runner_executable: String,
    /// Directory holding the interactive report, served statically when set.
    pub report_dir: Option<PathBuf>,
    /// Persisted report document rewritten after each rerun, when set.
    pub report_file: Option<PathBuf>,
    /// Hours a terminal job stays queryable before eviction.
    pub job_retention_hours: u64,
    /// How often the retention sweep runs, in seconds.
    pub cleanup_interval_secs: u64,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `RUST_ENV`: Environment (development/production) - REQUIRED
    /// - `SRS_HOST`: Server host (default: 127.0.0.1)
    /// - `SRS_PORT`: Server port (default: 5000)
    /// - `PRJ_ICDIR`: Project root for templates and log discovery
    ///   (required in production)
    /// - `SRS_RUNNER`: Runner executable name (default: msim)
    /// - `SRS_REPORT_DIR`: Interactive report directory to serve (optional)
    /// - `SRS_REPORT_FILE`: Report document to rewrite after reruns
    ///   (optional)
    /// - `SRS_JOB_RETENTION_HOURS`: Terminal job retention (default: 24)
    /// - `SRS_CLEANUP_INTERVAL_SECS`: Retention sweep interval (default: 3600)
    pub fn from_env() -> Result<Self, ConfigError> {
        // Parse environment - required
        let env_str = env::var("RUST_ENV").map_err(|_| ConfigError::MissingEnvVar("RUST_ENV"))?;

        let environment = Environment::parse(&env_str).ok_or(ConfigError::InvalidValue(
            "RUST_ENV must be 'development' or 'production'",
        ))?;

        let host = env::var("SRS_HOST").unwrap_or_else(|_| defaults::DEV_HOST.to_string());

        let port = env::var("SRS_PORT")
            .unwrap_or_else(|_| defaults::DEV_PORT.to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidValue("SRS_PORT must be a valid port number"))?;

        let project_root = env::var("PRJ_ICDIR").ok().map(PathBuf::from);

        let runner_executable =
            env::var("SRS_RUNNER").unwrap_or_else(|_| defaults::DEV_RUNNER_EXECUTABLE.to_string());

        let report_dir = env::var("SRS_REPORT_DIR").ok().map(PathBuf::from);
        let report_file = env::var("SRS_REPORT_FILE").ok().map(PathBuf::from);

        let job_retention_hours = env::var("SRS_JOB_RETENTION_HOURS")
            .unwrap_or_else(|_| defaults::DEV_JOB_RETENTION_HOURS.to_string())
            .parse::<u64>()
            .map_err(|_| {
                ConfigError::InvalidValue("SRS_JOB_RETENTION_HOURS must be a valid number")
            })?;

        let cleanup_interval_secs = env::var("SRS_CLEANUP_INTERVAL_SECS")
            .unwrap_or_else(|_| defaults::DEV_CLEANUP_INTERVAL_SECS.to_string())
            .parse::<u64>()
            .map_err(|_| {
                ConfigError::InvalidValue("SRS_CLEANUP_INTERVAL_SECS must be a valid number")
            })?;
        // A zero period would panic the sweep ticker.
        if cleanup_interval_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "SRS_CLEANUP_INTERVAL_SECS must be greater than zero",
            ));
        }

        let config = Config {
            environment,
            host,
            port,
            project_root,
            runner_executable,
            report_dir,
            report_file,
            job_retention_hours,
            cleanup_interval_secs,
        };

        // Validate production configuration
        if environment.is_production() {
            config.validate_production()?;
        }

        Ok(config)
    }

    /// Validate that production deployments carry the inputs jobs depend on.
    fn validate_production(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        if self.project_root.is_none() {
            errors.push(
                "PRJ_ICDIR is not set. Rerun jobs cannot locate templates or logs without it."
                    .to_string(),
            );
        }

        if self.runner_executable.trim().is_empty() {
            errors.push("SRS_RUNNER must not be empty.".to_string());
        }

        if !errors.is_empty() {
            return Err(ConfigError::ProductionValidation(errors));
        }

        Ok(())
    }

    /// Get the server bind address.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Check if running in development mode.
    pub fn is_development(&self) -> bool {
        self.environment.is_development()
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(&'static str),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(&'static str),

    #[error("Production configuration validation failed:\n{}", .0.iter().map(|e| format!("  - {}", e)).collect::<Vec<_>>().join("\n"))]
    ProductionValidation(Vec<String>),
}
