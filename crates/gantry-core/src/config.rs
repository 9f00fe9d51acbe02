//! Runtime configuration for the kernel pool and execution coordinator.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Error, Result};

/// Core configuration.
///
/// Construct with [`CoreConfig::default`] or [`CoreConfig::from_env`], which
/// applies `GANTRY_*` environment overrides on top of the defaults.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Maximum number of live kernels. Creating beyond this evicts the
    /// least recently active kernel.
    pub max_kernels: usize,
    /// Upper bound for a worker to become ready after start or restart.
    pub kernel_timeout: Duration,
    /// Timeout for short request/reply queries (completion, inspection,
    /// variable listing).
    pub query_timeout: Duration,
    /// Wait per poll of the worker event queue while streaming.
    pub poll_timeout: Duration,
    /// Pause after an empty poll before polling again.
    pub poll_backoff: Duration,
    /// Working directory for worker processes.
    pub working_dir: PathBuf,
    /// Number of finished execution results retained in memory.
    pub execution_history: usize,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            max_kernels: 10,
            kernel_timeout: Duration::from_secs(60),
            query_timeout: Duration::from_secs(5),
            poll_timeout: Duration::from_secs(1),
            poll_backoff: Duration::from_millis(10),
            working_dir: std::env::temp_dir().join("gantry"),
            execution_history: 1000,
        }
    }
}

impl CoreConfig {
    /// Load configuration from `GANTRY_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration using an arbitrary variable lookup.
    ///
    /// Split out from [`from_env`](Self::from_env) so tests do not have to
    /// mutate the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(value) = lookup("GANTRY_MAX_KERNELS") {
            config.max_kernels = parse_var("GANTRY_MAX_KERNELS", &value)?;
        }
        if let Some(value) = lookup("GANTRY_KERNEL_TIMEOUT") {
            config.kernel_timeout = Duration::from_secs(parse_var("GANTRY_KERNEL_TIMEOUT", &value)?);
        }
        if let Some(value) = lookup("GANTRY_QUERY_TIMEOUT") {
            config.query_timeout = Duration::from_secs(parse_var("GANTRY_QUERY_TIMEOUT", &value)?);
        }
        if let Some(value) = lookup("GANTRY_KERNEL_WORKING_DIR") {
            config.working_dir = PathBuf::from(value);
        }
        if let Some(value) = lookup("GANTRY_EXECUTION_HISTORY") {
            config.execution_history = parse_var("GANTRY_EXECUTION_HISTORY", &value)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Check that every limit is usable.
    ///
    /// The pool and coordinator treat a zero `max_kernels` or
    /// `execution_history` as 1 when handed an unvalidated config.
    pub fn validate(&self) -> Result<()> {
        if self.max_kernels == 0 {
            return Err(Error::Config("max_kernels (GANTRY_MAX_KERNELS) must be at least 1".to_string()));
        }
        if self.execution_history == 0 {
            return Err(Error::Config(
                "execution_history (GANTRY_EXECUTION_HISTORY) must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_var<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("{} has invalid value '{}'", key, value)))
}
