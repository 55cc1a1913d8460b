//! Shared configuration for the tether host and worker.
//!
//! Values are layered with `ortho_config`: built-in defaults, then an optional
//! configuration file (`--config-path`), then `TETHER_*` environment
//! variables, then command-line flags. Both sides of the bridge load the same
//! structure so a heartbeat interval chosen by the host reaches the worker
//! through the environment without extra plumbing.

mod defaults;
mod logging;

use std::time::Duration;

use camino::Utf8PathBuf;
use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use defaults::{
    DEFAULT_HEARTBEAT_INTERVAL_MS, DEFAULT_HEARTBEAT_TIMEOUT_MS, DEFAULT_LOG_FILTER,
    DEFAULT_MAX_RESTARTS, DEFAULT_REQUEST_TIMEOUT_MS, DEFAULT_RESTART_BACKOFF_MS,
    DEFAULT_RESTART_WINDOW_MS, DEFAULT_STABLE_CONNECTION_MS, DEFAULT_STARTUP_TIMEOUT_MS,
    DEFAULT_WORKER_COMMAND, HEARTBEAT_TIMEOUT_MARGIN, default_log_filter,
    default_log_filter_string, default_log_format, default_worker_command,
};
pub use logging::{LogFormat, LogFormatParseError};

/// Environment variable the host sets so the worker heartbeats on its schedule.
pub const HEARTBEAT_INTERVAL_ENV: &str = "TETHER_HEARTBEAT_INTERVAL_MS";

/// Resolved configuration for one supervised link.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, OrthoConfig)]
#[ortho_config(prefix = "TETHER")]
pub struct Config {
    /// Interval between worker heartbeat notifications.
    #[ortho_config(default = DEFAULT_HEARTBEAT_INTERVAL_MS)]
    pub heartbeat_interval_ms: u64,
    /// Silence tolerated before the worker is declared dead.
    #[ortho_config(default = DEFAULT_HEARTBEAT_TIMEOUT_MS)]
    pub heartbeat_timeout_ms: u64,
    /// Restarts permitted within one restart window.
    #[ortho_config(default = DEFAULT_MAX_RESTARTS)]
    pub max_restarts: u32,
    /// Width of the sliding restart window.
    #[ortho_config(default = DEFAULT_RESTART_WINDOW_MS)]
    pub restart_window_ms: u64,
    /// Delay between a failure and the next spawn attempt.
    #[ortho_config(default = DEFAULT_RESTART_BACKOFF_MS)]
    pub restart_backoff_ms: u64,
    /// Uptime after which a connection clears the restart ledger.
    #[ortho_config(default = DEFAULT_STABLE_CONNECTION_MS)]
    pub stable_connection_ms: u64,
    /// Time a freshly spawned worker has to report readiness.
    #[ortho_config(default = DEFAULT_STARTUP_TIMEOUT_MS)]
    pub startup_timeout_ms: u64,
    /// Deadline applied to each outbound request.
    #[ortho_config(default = DEFAULT_REQUEST_TIMEOUT_MS)]
    pub request_timeout_ms: u64,
    /// Worker executable path or command name.
    #[ortho_config(default = default_worker_command())]
    pub worker_command: Utf8PathBuf,
    /// Arguments passed to the worker executable.
    #[ortho_config(default = Vec::new())]
    pub worker_args: Vec<String>,
    /// Tracing filter expression.
    #[ortho_config(default = default_log_filter_string())]
    pub log_filter: String,
    /// Tracing output format.
    #[ortho_config(default = default_log_format())]
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: DEFAULT_HEARTBEAT_INTERVAL_MS,
            heartbeat_timeout_ms: DEFAULT_HEARTBEAT_TIMEOUT_MS,
            max_restarts: DEFAULT_MAX_RESTARTS,
            restart_window_ms: DEFAULT_RESTART_WINDOW_MS,
            restart_backoff_ms: DEFAULT_RESTART_BACKOFF_MS,
            stable_connection_ms: DEFAULT_STABLE_CONNECTION_MS,
            startup_timeout_ms: DEFAULT_STARTUP_TIMEOUT_MS,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            worker_command: default_worker_command(),
            worker_args: Vec::new(),
            log_filter: default_log_filter_string(),
            log_format: default_log_format(),
        }
    }
}

/// Errors raised when a loaded configuration is internally inconsistent.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A duration that must be positive was zero.
    #[error("'{field}' must be greater than zero")]
    ZeroDuration {
        /// Name of the offending field.
        field: &'static str,
    },
    /// The heartbeat timeout leaves no margin over the interval.
    #[error(
        "heartbeat timeout ({timeout_ms}ms) must be at least {margin}x the heartbeat interval ({interval_ms}ms)"
    )]
    HeartbeatMargin {
        /// Configured heartbeat interval.
        interval_ms: u64,
        /// Configured heartbeat timeout.
        timeout_ms: u64,
        /// Required ratio.
        margin: u64,
    },
    /// No worker executable was configured.
    #[error("worker command must not be empty")]
    EmptyWorkerCommand,
}

impl Config {
    /// Checks invariants the loaders cannot express.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] describing the first violated invariant.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let durations = [
            ("heartbeat_interval_ms", self.heartbeat_interval_ms),
            ("heartbeat_timeout_ms", self.heartbeat_timeout_ms),
            ("restart_window_ms", self.restart_window_ms),
            ("startup_timeout_ms", self.startup_timeout_ms),
            ("request_timeout_ms", self.request_timeout_ms),
        ];
        if let Some((field, _)) = durations.iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::ZeroDuration { field });
        }

        let required = self
            .heartbeat_interval_ms
            .saturating_mul(HEARTBEAT_TIMEOUT_MARGIN);
        if self.heartbeat_timeout_ms < required {
            return Err(ConfigError::HeartbeatMargin {
                interval_ms: self.heartbeat_interval_ms,
                timeout_ms: self.heartbeat_timeout_ms,
                margin: HEARTBEAT_TIMEOUT_MARGIN,
            });
        }

        if self.worker_command.as_str().trim().is_empty() {
            return Err(ConfigError::EmptyWorkerCommand);
        }
        Ok(())
    }

    /// Checks only the settings a worker process acts on.
    ///
    /// A worker inherits the host's heartbeat interval through the
    /// environment but never sees the host's timeout, so the margin and
    /// restart settings belong to [`Config::validate`] on the host side.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ZeroDuration`] for a zero heartbeat interval.
    pub const fn validate_worker(&self) -> Result<(), ConfigError> {
        if self.heartbeat_interval_ms == 0 {
            return Err(ConfigError::ZeroDuration {
                field: "heartbeat_interval_ms",
            });
        }
        Ok(())
    }

    /// Interval between worker heartbeats.
    #[must_use]
    pub const fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Silence tolerated before the worker is declared dead.
    #[must_use]
    pub const fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }

    /// Width of the sliding restart window.
    #[must_use]
    pub const fn restart_window(&self) -> Duration {
        Duration::from_millis(self.restart_window_ms)
    }

    /// Delay between a failure and the next spawn attempt.
    #[must_use]
    pub const fn restart_backoff(&self) -> Duration {
        Duration::from_millis(self.restart_backoff_ms)
    }

    /// Uptime after which a connection clears the restart ledger.
    #[must_use]
    pub const fn stable_connection(&self) -> Duration {
        Duration::from_millis(self.stable_connection_ms)
    }

    /// Time a freshly spawned worker has to report readiness.
    #[must_use]
    pub const fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }

    /// Deadline applied to each outbound request.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Tracing filter expression.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        &self.log_filter
    }

    /// Tracing output format.
    #[must_use]
    pub const fn log_format(&self) -> LogFormat {
        self.log_format
    }
}
