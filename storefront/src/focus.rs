//! Remembering and restoring which application had focus.

use crate::errors::AutomationError;
use crate::platforms::AppIdentity;
use crate::AccessibilityClient;
use serde::Serialize;
use tracing::{debug, warn};

/// What the desktop looked like before a run touched it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FocusSnapshot {
    pub previous: Option<AppIdentity>,
    pub storefront_was_running: bool,
}

impl FocusSnapshot {
    /// The storefront should be quit at the end of a run that launched it.
    pub fn quit_when_done(&self) -> bool {
        !self.storefront_was_running
    }
}

#[derive(Debug, Clone)]
pub struct FocusTracker {
    client: AccessibilityClient,
    bundle_id: String,
}

impl FocusTracker {
    pub fn new(client: AccessibilityClient, bundle_id: impl Into<String>) -> Self {
        Self {
            client,
            bundle_id: bundle_id.into(),
        }
    }

    pub fn capture_at_start(&self) -> Result<FocusSnapshot, AutomationError> {
        let previous = self.client.focused_application()?;
        let storefront_was_running = self.client.running_application(&self.bundle_id)?.is_some();
        debug!(?previous, storefront_was_running, "captured focus");
        Ok(FocusSnapshot {
            previous,
            storefront_was_running,
        })
    }

    /// Brings the previously focused application back to the front.
    /// Nothing to do when no app had focus or it was the storefront itself.
    pub fn restore(&self, snapshot: &FocusSnapshot) -> Result<(), AutomationError> {
        let Some(previous) = &snapshot.previous else {
            debug!("no application had focus before the run");
            return Ok(());
        };
        if previous.bundle_id.as_deref() == Some(self.bundle_id.as_str()) {
            return Ok(());
        }
        debug!(pid = previous.pid, name = ?previous.name, "restoring focus");
        self.client.activate_application(previous)
    }

    /// Captures the current focus and returns a guard that restores it.
    pub fn guard(&self) -> Result<FocusGuard<'_>, AutomationError> {
        Ok(FocusGuard {
            tracker: self,
            snapshot: Some(self.capture_at_start()?),
        })
    }
}

/// Restores focus when the run ends.
///
/// Call [`FocusGuard::restore`] on every exit path. If a panic unwinds past the
/// guard first, `Drop` makes the attempt instead.
#[derive(Debug)]
pub struct FocusGuard<'a> {
    tracker: &'a FocusTracker,
    snapshot: Option<FocusSnapshot>,
}

impl FocusGuard<'_> {
    pub fn snapshot(&self) -> Option<&FocusSnapshot> {
        self.snapshot.as_ref()
    }

    /// Restores focus once. Failures are logged, never returned: the run's own
    /// outcome matters more than where focus ends up.
    pub fn restore(&mut self) -> bool {
        match self.snapshot.take() {
            Some(snapshot) => match self.tracker.restore(&snapshot) {
                Ok(()) => true,
                Err(e) => {
                    warn!("Failed to restore focus: {}", e);
                    false
                }
            },
            None => false,
        }
    }
}

impl Drop for FocusGuard<'_> {
    fn drop(&mut self) {
        if self.snapshot.is_some() {
            debug!("focus guard dropped before restore");
            self.restore();
        }
    }
}
