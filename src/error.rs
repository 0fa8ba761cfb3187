// Error taxonomy for executor, cache and scheduler

use std::time::Duration;

/// Domain errors. Non-zero exit codes are NOT errors; they come back in
/// `CommandOutput::exit_code`. Only transport/config level failures live here.
#[derive(Debug, thiserror::Error)]
pub enum FleetError {
    /// Network or device down: ping failed, connection refused, no route.
    #[error("unreachable: {0}")]
    Unreachable(String),

    /// Remote access rejected (bad key, permission denied, host key mismatch).
    #[error("auth failure: {0}")]
    AuthFailure(String),

    /// Hard timeout elapsed; the process (group) was terminated.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The command ran but the action failed at the application level.
    #[error("action failed: {0}")]
    ActionError(String),

    /// Malformed device or job definition; rejected at creation time.
    #[error("invalid configuration: {0}")]
    ConfigError(String),

    #[error("unknown device: {0}")]
    UnknownDevice(String),

    #[error("unknown job: {0}")]
    UnknownJob(String),

    /// Suppressed duplicate run or refresh. Informational, not a failure.
    #[error("skipped: {0} already in flight")]
    SkippedGuard(String),
}

impl FleetError {
    /// True for failures the loops recover from locally (offline snapshot,
    /// failed RunRecord) rather than surfacing.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            FleetError::Unreachable(_) | FleetError::Timeout(_) | FleetError::SkippedGuard(_)
        )
    }
}
