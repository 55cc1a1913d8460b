use camino::Utf8PathBuf;

/// Interval between worker heartbeat notifications.
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 5_000;

/// Silence tolerated before the worker is declared dead.
pub const DEFAULT_HEARTBEAT_TIMEOUT_MS: u64 = 15_000;

/// Restarts permitted inside one restart window.
pub const DEFAULT_MAX_RESTARTS: u32 = 3;

/// Width of the sliding restart window.
pub const DEFAULT_RESTART_WINDOW_MS: u64 = 60_000;

/// Delay between a failure and the next spawn attempt.
pub const DEFAULT_RESTART_BACKOFF_MS: u64 = 1_000;

/// Uptime after which a connection forgives earlier restarts.
pub const DEFAULT_STABLE_CONNECTION_MS: u64 = 10_000;

/// Time a freshly spawned worker has to report readiness.
pub const DEFAULT_STARTUP_TIMEOUT_MS: u64 = 10_000;

/// Deadline applied to each outbound request.
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;

/// Executable spawned when no worker command is configured.
pub const DEFAULT_WORKER_COMMAND: &str = "tether-worker";

/// Default log filter expression used by the binaries.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Minimum ratio between heartbeat timeout and interval.
pub const HEARTBEAT_TIMEOUT_MARGIN: u64 = 2;

/// Default log filter expression used by the binaries.
#[must_use]
pub fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// Owned log filter value used where allocation is required (e.g. serde).
#[must_use]
pub fn default_log_filter_string() -> String {
    DEFAULT_LOG_FILTER.to_owned()
}

/// Default logging format for the binaries.
#[must_use]
pub fn default_log_format() -> crate::logging::LogFormat {
    crate::logging::LogFormat::Json
}

/// Default worker executable.
#[must_use]
pub fn default_worker_command() -> Utf8PathBuf {
    Utf8PathBuf::from(DEFAULT_WORKER_COMMAND)
}
