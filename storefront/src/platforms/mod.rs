use crate::{AutomationError, UIElement};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Identity of a running application, enough to bring it back to the front.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppIdentity {
    pub pid: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bundle_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// The common trait that all platform-specific engines must implement
///
/// Element-level reads and presses go through [`crate::element::UIElementImpl`];
/// this trait covers the application-level entry points.
pub trait AccessibilityEngine: Send + Sync {
    /// Root element of a running application, `None` when it is not running.
    fn application(&self, bundle_id: &str) -> Result<Option<UIElement>, AutomationError>;

    /// Identity of a running application, `None` when it is not running.
    fn running_application(&self, bundle_id: &str) -> Result<Option<AppIdentity>, AutomationError>;

    /// Asks the OS to launch an application. Returns once the launch request was
    /// accepted; the application may still be starting.
    fn launch_application(&self, bundle_id: &str) -> Result<(), AutomationError>;

    /// The application that currently holds keyboard focus
    fn focused_application(&self) -> Result<Option<AppIdentity>, AutomationError>;

    /// Bring an application to the front
    fn activate_application(&self, app: &AppIdentity) -> Result<(), AutomationError>;

    /// Ask an application to quit
    fn terminate_application(&self, bundle_id: &str) -> Result<(), AutomationError>;
}

#[cfg(target_os = "macos")]
pub mod macos;
#[cfg(any(test, feature = "test-utils"))]
pub mod mock;

/// Create the appropriate engine for the current platform
pub fn create_engine() -> Result<Arc<dyn AccessibilityEngine>, AutomationError> {
    #[cfg(target_os = "macos")]
    {
        Ok(Arc::new(macos::MacOSEngine::new()?))
    }
    #[cfg(not(target_os = "macos"))]
    {
        Err(AutomationError::UnsupportedPlatform(
            "the App Store is only available on macOS".to_string(),
        ))
    }
}
