//! Runtime settings for a supervised worker link.

use std::path::PathBuf;
use std::time::Duration;

use tether_config::{Config, ConfigError};

/// How to launch the worker executable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerCommand {
    /// The executable path or command name.
    pub program: PathBuf,
    /// Arguments passed to the worker.
    pub args: Vec<String>,
    /// Working directory for the spawned process.
    pub working_dir: Option<PathBuf>,
    /// Extra environment variables for the worker.
    pub env: Vec<(String, String)>,
}

impl WorkerCommand {
    /// Creates a command with no arguments.
    #[must_use]
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
            env: Vec::new(),
        }
    }

    /// Replaces the argument list.
    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Sets a custom working directory.
    #[must_use]
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Adds an environment variable.
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

/// Timing and budget knobs consumed by the supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkSettings {
    /// Worker launch description.
    pub command: WorkerCommand,
    /// Interval the worker is asked to heartbeat at.
    pub heartbeat_interval: Duration,
    /// Silence tolerated before the worker is declared dead.
    pub heartbeat_timeout: Duration,
    /// Restarts permitted within one restart window.
    pub max_restarts: u32,
    /// Width of the sliding restart window.
    pub restart_window: Duration,
    /// Fixed delay before a restart attempt.
    pub restart_backoff: Duration,
    /// Uptime after which a connection clears the restart ledger.
    pub stable_connection: Duration,
    /// Time a freshly spawned worker has to report readiness.
    pub startup_timeout: Duration,
    /// Deadline applied to each outbound request.
    pub request_timeout: Duration,
}

impl LinkSettings {
    /// Builds settings with the shared configuration defaults.
    #[must_use]
    pub fn new(command: WorkerCommand) -> Self {
        Self::with_config(command, &Config::default())
    }

    fn with_config(command: WorkerCommand, config: &Config) -> Self {
        Self {
            command,
            heartbeat_interval: config.heartbeat_interval(),
            heartbeat_timeout: config.heartbeat_timeout(),
            max_restarts: config.max_restarts,
            restart_window: config.restart_window(),
            restart_backoff: config.restart_backoff(),
            stable_connection: config.stable_connection(),
            startup_timeout: config.startup_timeout(),
            request_timeout: config.request_timeout(),
        }
    }

    /// Derives settings from a loaded configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the configuration is inconsistent.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        config.validate()?;
        let command = WorkerCommand::new(config.worker_command.as_std_path())
            .with_args(config.worker_args.iter().cloned());
        Ok(Self::with_config(command, config))
    }

    /// Sets the heartbeat interval and timeout.
    #[must_use]
    pub fn with_heartbeat(mut self, interval: Duration, timeout: Duration) -> Self {
        self.heartbeat_interval = interval;
        self.heartbeat_timeout = timeout;
        self
    }

    /// Sets the restart budget.
    #[must_use]
    pub fn with_restart_budget(mut self, max_restarts: u32, window: Duration) -> Self {
        self.max_restarts = max_restarts;
        self.restart_window = window;
        self
    }

    /// Sets the delay before a restart attempt.
    #[must_use]
    pub fn with_restart_backoff(mut self, backoff: Duration) -> Self {
        self.restart_backoff = backoff;
        self
    }

    /// Sets the uptime after which earlier restarts are forgiven.
    #[must_use]
    pub fn with_stable_connection(mut self, threshold: Duration) -> Self {
        self.stable_connection = threshold;
        self
    }

    /// Sets the readiness deadline for new workers.
    #[must_use]
    pub fn with_startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = timeout;
        self
    }

    /// Sets the per-request deadline.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}
