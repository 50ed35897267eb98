use crate::config::Settings;
use crate::element::Attribute;
use crate::errors::{AutomationError, FailureKind, InstallError};
use crate::focus::{FocusGuard, FocusTracker};
use crate::navigator::StorefrontNavigator;
use crate::registry::InstalledState;
use crate::selector::{Role, Selector};
use crate::wait::{self, Clock, SystemClock, WaitSpec};
use crate::AccessibilityClient;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Steps of one install run, recorded in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Start,
    CheckPurchased,
    CheckInstalled,
    Navigating,
    Installing,
    WaitComplete,
    Cleanup,
    Done,
    Failed(FailureKind),
}

/// Where an app stands with respect to this machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowState {
    NotPurchased,
    PurchasedNotInstalled,
    Installing,
    Installed,
    SignedOut,
}

impl std::fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            WorkflowState::NotPurchased => "not purchased",
            WorkflowState::PurchasedNotInstalled => "purchased, not installed",
            WorkflowState::Installing => "installing",
            WorkflowState::Installed => "installed",
            WorkflowState::SignedOut => "signed out of the App Store",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallRequest {
    pub app_name: String,
    /// How long to wait for the install to finish. `None` uses the configured default.
    pub timeout: Option<Duration>,
}

impl InstallRequest {
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct InstallOutcome {
    pub app_name: String,
    /// Whether this run changed the system.
    pub changed: bool,
    pub state: WorkflowState,
    pub trace: Vec<Step>,
}

/// Drives an install from "maybe not even running" to "installed", or to a
/// specific failure.
///
/// Side effects happen in order and are not rolled back. Focus is handed back
/// to whichever app had it before, on success and on failure.
pub struct Orchestrator {
    client: AccessibilityClient,
    registry: Arc<dyn InstalledState>,
    clock: Arc<dyn Clock>,
    settings: Settings,
    trace: Vec<Step>,
    state: Option<WorkflowState>,
}

impl Orchestrator {
    pub fn new(
        client: AccessibilityClient,
        registry: Arc<dyn InstalledState>,
        clock: Arc<dyn Clock>,
        settings: Settings,
    ) -> Self {
        Self {
            client,
            registry,
            clock,
            settings,
            trace: Vec::new(),
            state: None,
        }
    }

    /// Orchestrator for the real desktop and wall-clock time.
    pub fn system(settings: Settings, registry: Arc<dyn InstalledState>) -> Result<Self, AutomationError> {
        Ok(Self::new(
            AccessibilityClient::new()?,
            registry,
            Arc::new(SystemClock),
            settings,
        ))
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn client(&self) -> &AccessibilityClient {
        &self.client
    }

    /// Steps taken by the most recent run.
    pub fn trace(&self) -> &[Step] {
        &self.trace
    }

    /// Last state observed by the most recent run.
    pub fn state(&self) -> Option<WorkflowState> {
        self.state
    }

    fn record(&mut self, step: Step) {
        debug!(?step, "install step");
        self.trace.push(step);
    }

    fn observe(&mut self, state: WorkflowState) {
        debug!(%state, "workflow state");
        self.state = Some(state);
    }

    fn navigator(&self) -> StorefrontNavigator {
        StorefrontNavigator::new(self.client.clone(), self.clock.clone(), self.settings.clone())
    }

    fn focus_tracker(&self) -> FocusTracker {
        FocusTracker::new(self.client.clone(), self.settings.bundle_id.clone())
    }

    fn outcome(&self, app_name: &str, changed: bool) -> InstallOutcome {
        InstallOutcome {
            app_name: app_name.to_string(),
            changed,
            state: self.state.unwrap_or(WorkflowState::Installed),
            trace: self.trace.clone(),
        }
    }

    /// Installs `request.app_name` unless it is already installed.
    #[instrument(skip(self, request), fields(app = %request.app_name))]
    pub fn install(&mut self, request: &InstallRequest) -> Result<InstallOutcome, InstallError> {
        self.trace.clear();
        self.state = None;

        let app_name = request.app_name.trim();
        if app_name.is_empty() {
            return Err(InstallError::InvalidRequest("app name is empty".to_string()));
        }
        let timeout = request.timeout.unwrap_or(self.settings.install_timeout);
        let install_wait = self
            .settings
            .install_wait(timeout)
            .map_err(|e| InstallError::InvalidRequest(e.to_string()))?;

        self.record(Step::Start);
        if self.registry.installed(app_name)? {
            info!("'{}' is already installed", app_name);
            self.observe(WorkflowState::Installed);
            self.record(Step::Done);
            return Ok(self.outcome(app_name, false));
        }

        let tracker = self.focus_tracker();
        let mut guard = tracker.guard()?;
        let result = self.run(app_name, &install_wait, &guard);
        guard.restore();

        match result {
            Ok(changed) => {
                self.record(Step::Done);
                info!(changed, "Install of '{}' finished", app_name);
                Ok(self.outcome(app_name, changed))
            }
            Err(e) => {
                self.record(Step::Failed(e.kind()));
                warn!("Install of '{}' failed: {}", app_name, e);
                Err(e)
            }
        }
    }

    fn run(&mut self, app_name: &str, install_wait: &WaitSpec, guard: &FocusGuard<'_>) -> Result<bool, InstallError> {
        let quit_when_done = guard.snapshot().map(|s| s.quit_when_done()).unwrap_or(false);
        let mut nav = self.navigator();

        self.record(Step::CheckPurchased);
        let row = match nav.find_row(app_name) {
            Ok(Some(row)) => row,
            Ok(None) => {
                self.observe(WorkflowState::NotPurchased);
                return Err(InstallError::NotPurchased(app_name.to_string()));
            }
            Err(InstallError::NotSignedIn) => {
                self.observe(WorkflowState::SignedOut);
                return Err(InstallError::NotSignedIn);
            }
            Err(e) => return Err(e),
        };
        self.observe(WorkflowState::PurchasedNotInstalled);

        self.record(Step::CheckInstalled);
        if self.registry.installed(app_name)? {
            info!("'{}' was installed while the App Store was loading", app_name);
            self.observe(WorkflowState::Installed);
            self.cleanup(&mut nav, quit_when_done);
            return Ok(false);
        }

        self.record(Step::Navigating);
        nav.focus_storefront()?;
        let page = nav.open_app_page(&row)?;
        let window = nav.main_window(&page)?;

        self.record(Step::Installing);
        let control = nav
            .locate(&window, self.settings.install_control.clone())
            .breadth_first()
            .first()?
            .ok_or_else(|| InstallError::ControlNotFound("the install button".to_string()))?;
        debug!(control = ?control.attributes(), "pressing install control");
        self.client.activate(&control)?;
        self.observe(WorkflowState::Installing);

        self.record(Step::WaitComplete);
        let completion = Selector::role(Role::Button)
            .with(Attribute::Description, self.settings.completion_labels.clone());
        wait::wait_for(self.clock.as_ref(), install_wait, || {
            let window = match page.locator(Role::Window).max_depth(1).first() {
                Ok(Some(window)) => window,
                Ok(None) | Err(AutomationError::ElementDetached(_)) => return Ok(None),
                Err(e) => return Err(e),
            };
            match nav.locate(&window, completion.clone()).first() {
                Err(AutomationError::ElementDetached(_)) => Ok(None),
                other => other,
            }
        })
        .map_err(|e| {
            InstallError::from_wait(e, || InstallError::InstallTimeout {
                app: app_name.to_string(),
                timeout: install_wait.timeout(),
            })
        })?;
        info!("'{}' installed", app_name);
        self.observe(WorkflowState::Installed);

        self.cleanup(&mut nav, quit_when_done);
        Ok(true)
    }

    fn cleanup(&mut self, nav: &mut StorefrontNavigator, quit_when_done: bool) {
        self.record(Step::Cleanup);
        if quit_when_done {
            debug!("quitting the App Store, it was not running before");
            if let Err(e) = nav.quit() {
                warn!("Failed to quit the App Store: {}", e);
            }
        }
    }

    /// Reads the app's current state without changing anything but focus.
    #[instrument(skip(self))]
    pub fn inspect(&mut self, app_name: &str) -> Result<WorkflowState, InstallError> {
        self.trace.clear();
        self.state = None;

        if self.registry.installed(app_name)? {
            self.observe(WorkflowState::Installed);
            return Ok(WorkflowState::Installed);
        }

        let tracker = self.focus_tracker();
        let mut guard = tracker.guard()?;
        let quit_when_done = guard.snapshot().map(|s| s.quit_when_done()).unwrap_or(false);
        let mut nav = self.navigator();

        let state = match nav.find_row(app_name) {
            Ok(Some(_)) => Ok(WorkflowState::PurchasedNotInstalled),
            Ok(None) => Ok(WorkflowState::NotPurchased),
            Err(InstallError::NotSignedIn) => Ok(WorkflowState::SignedOut),
            Err(e) => Err(e),
        };
        if quit_when_done {
            if let Err(e) = nav.quit() {
                warn!("Failed to quit the App Store: {}", e);
            }
        }
        guard.restore();

        let state = state?;
        self.observe(state);
        Ok(state)
    }

    /// Version advertised on the app's store page.
    #[instrument(skip(self))]
    pub fn latest_version(&mut self, app_name: &str) -> Result<Option<String>, InstallError> {
        let tracker = self.focus_tracker();
        let mut guard = tracker.guard()?;
        let quit_when_done = guard.snapshot().map(|s| s.quit_when_done()).unwrap_or(false);
        let mut nav = self.navigator();

        let version = read_version(&mut nav, app_name);

        if quit_when_done {
            if let Err(e) = nav.quit() {
                warn!("Failed to quit the App Store: {}", e);
            }
        }
        guard.restore();
        version
    }
}

fn read_version(nav: &mut StorefrontNavigator, app_name: &str) -> Result<Option<String>, InstallError> {
    let row = nav
        .find_row(app_name)?
        .ok_or_else(|| InstallError::NotPurchased(app_name.to_string()))?;
    nav.focus_storefront()?;
    let page = nav.open_app_page(&row)?;
    nav.latest_version(&page)
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("settings", &self.settings)
            .field("trace", &self.trace)
            .field("state", &self.state)
            .finish()
    }
}
