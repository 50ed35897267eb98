use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::registry::RegistryError;

/// Failures of the underlying accessibility platform.
///
/// Absence of an element is never reported through this type; lookups return
/// `Ok(None)` for that.
#[derive(Error, Debug)]
pub enum AutomationError {
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Platform-specific error: {0}")]
    PlatformError(String),

    #[error("Unsupported platform: {0}")]
    UnsupportedPlatform(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid selector: {0}")]
    InvalidSelector(String),

    #[error("Element is detached from the accessibility tree: {0}")]
    ElementDetached(String),
}

/// Outcome of a bounded wait that did not produce a value.
#[derive(Error, Debug)]
pub enum WaitError {
    #[error("timed out after {elapsed:?} ({attempts} attempts)")]
    TimedOut { elapsed: Duration, attempts: u32 },

    #[error(transparent)]
    Automation(#[from] AutomationError),
}

/// Coarse classification of an [`InstallError`], used in workflow traces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    InvalidRequest,
    NotPurchased,
    NotSignedIn,
    StartupTimeout,
    NavigationTimeout,
    InstallTimeout,
    ControlNotFound,
    Activation,
    Registry,
}

/// Every way an install workflow can end other than success.
#[derive(Error, Debug)]
pub enum InstallError {
    #[error("Invalid install request: {0}")]
    InvalidRequest(String),

    #[error("App '{0}' has not been purchased")]
    NotPurchased(String),

    #[error("User must be signed into the App Store to install apps")]
    NotSignedIn,

    #[error("Timed out after {0:?} waiting for the App Store to load")]
    StartupTimeout(Duration),

    #[error("Timed out after {0:?} waiting for Purchases page to load")]
    NavigationTimeout(Duration),

    #[error("Timed out after {timeout:?} waiting for '{app}' to install")]
    InstallTimeout { app: String, timeout: Duration },

    #[error("Could not find {0} in the App Store window")]
    ControlNotFound(String),

    #[error("Accessibility call failed: {0}")]
    Activation(#[from] AutomationError),

    #[error("Installed-state query failed: {0}")]
    Registry(#[from] RegistryError),
}

impl InstallError {
    pub fn kind(&self) -> FailureKind {
        match self {
            InstallError::InvalidRequest(_) => FailureKind::InvalidRequest,
            InstallError::NotPurchased(_) => FailureKind::NotPurchased,
            InstallError::NotSignedIn => FailureKind::NotSignedIn,
            InstallError::StartupTimeout(_) => FailureKind::StartupTimeout,
            InstallError::NavigationTimeout(_) => FailureKind::NavigationTimeout,
            InstallError::InstallTimeout { .. } => FailureKind::InstallTimeout,
            InstallError::ControlNotFound(_) => FailureKind::ControlNotFound,
            InstallError::Activation(_) => FailureKind::Activation,
            InstallError::Registry(_) => FailureKind::Registry,
        }
    }

    /// Timeouts depend on external timing and may pass on a later run.
    /// Everything else needs a human or a code change.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            FailureKind::StartupTimeout
                | FailureKind::NavigationTimeout
                | FailureKind::InstallTimeout
        )
    }

    /// Maps a wait failure onto the timeout variant for the step that waited,
    /// keeping platform failures as activation errors.
    pub(crate) fn from_wait(err: WaitError, on_timeout: impl FnOnce() -> InstallError) -> Self {
        match err {
            WaitError::TimedOut { .. } => on_timeout(),
            WaitError::Automation(e) => InstallError::Activation(e),
        }
    }
}
