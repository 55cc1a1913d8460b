//! Connection lifecycle states.

use std::fmt;

/// Lifecycle of the supervised link.
///
/// Transitions are driven exclusively by the supervisor's control thread:
///
/// ```text
/// Disconnected -> Starting -> Connected -> Restarting -> Starting -> ...
///                    |            |            |
///                    +------------+------------+--> Failed
/// ```
///
/// `stop()` returns any state to `Disconnected`; `start()` leaves `Failed`
/// and `Disconnected` by spawning a new worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// No worker is running and none is scheduled.
    #[default]
    Disconnected,
    /// A worker has been spawned and has not yet reported readiness.
    Starting,
    /// The worker reported readiness and accepts requests.
    Connected,
    /// The worker was lost and a restart is scheduled.
    Restarting,
    /// The restart budget is exhausted; only an explicit start recovers.
    Failed,
}

impl ConnectionState {
    /// Stable lowercase name used in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Starting => "starting",
            Self::Connected => "connected",
            Self::Restarting => "restarting",
            Self::Failed => "failed",
        }
    }

    /// Returns `true` while a worker is alive or about to be.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Starting | Self::Connected | Self::Restarting)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
