//! Getting from "App Store may not be running" to "the app's page is open".
//!
//! The navigator holds the one storefront application handle a run is allowed
//! to keep. Everything else is looked up again each time it is needed.

use crate::config::Settings;
use crate::element::{Attribute, UIElement};
use crate::errors::{AutomationError, InstallError};
use crate::locator::Locator;
use crate::selector::{LabelPatterns, Role, Selector};
use crate::wait::{self, Clock};
use crate::AccessibilityClient;
use std::sync::Arc;
use tracing::{debug, info, instrument};

pub const STORE_MENU: &str = "Store";
pub const PURCHASES_MENU_ITEM: &str = "Purchases";
pub const PURCHASED_GROUP_ID: &str = "purchased";
pub const SIGN_IN_LINK: &str = "sign in";
pub const VERSION_LABEL: &str = "Version: ";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavState {
    AppNotRunning,
    AppLaunching,
    MenuReady,
    PurchasesOpen,
    SignedOut,
    RowFound,
    RowAbsent,
    PageOpen,
}

pub struct StorefrontNavigator {
    client: AccessibilityClient,
    clock: Arc<dyn Clock>,
    settings: Settings,
    app: Option<UIElement>,
    state: NavState,
}

impl StorefrontNavigator {
    pub fn new(client: AccessibilityClient, clock: Arc<dyn Clock>, settings: Settings) -> Self {
        Self {
            client,
            clock,
            settings,
            app: None,
            state: NavState::AppNotRunning,
        }
    }

    pub fn state(&self) -> NavState {
        self.state
    }

    fn transition(&mut self, next: NavState) {
        if self.state != next {
            debug!(from = ?self.state, to = ?next, "navigator state");
            self.state = next;
        }
    }

    /// Locator under `root` bounded by the configured search depth.
    pub fn locate(&self, root: &UIElement, selector: impl Into<Selector>) -> Locator {
        root.locator(selector).max_depth(self.settings.max_search_depth)
    }

    /// The storefront application, launched and ready for menu navigation.
    ///
    /// Readiness is the Purchases menu item being present. The handle is kept
    /// for the rest of the run.
    #[instrument(level = "debug", skip(self))]
    pub fn ensure_app_ready(&mut self) -> Result<UIElement, InstallError> {
        if let Some(app) = &self.app {
            return Ok(app.clone());
        }

        let bundle_id = self.settings.bundle_id.clone();
        if self.client.running_application(&bundle_id)?.is_none() {
            info!("Launching {}", bundle_id);
            self.client.launch_application(&bundle_id)?;
            self.transition(NavState::AppLaunching);
        }

        let menu_item = Selector::role(Role::MenuItem).titled(PURCHASES_MENU_ITEM);
        let spec = self.settings.startup;
        let app = wait::wait_for(self.clock.as_ref(), &spec, || {
            let Some(app) = self.client.application(&bundle_id)? else {
                return Ok(None);
            };
            match self.locate(&app, menu_item.clone()).first() {
                Ok(found) => Ok(found.map(|_| app)),
                // Still starting up.
                Err(AutomationError::ElementDetached(_)) => Ok(None),
                Err(e) => Err(e),
            }
        })
        .map_err(|e| InstallError::from_wait(e, || InstallError::StartupTimeout(spec.timeout())))?;

        self.transition(NavState::MenuReady);
        self.app = Some(app.clone());
        Ok(app)
    }

    /// Chooses Store → Purchases and waits for the purchased list.
    ///
    /// Fails with [`InstallError::NotSignedIn`] when the page offers a sign-in
    /// link instead.
    #[instrument(level = "debug", skip(self))]
    pub fn open_purchases(&mut self) -> Result<UIElement, InstallError> {
        let app = self.ensure_app_ready()?;

        let store_menu = self
            .locate(&app, Selector::role(Role::MenuBarItem).titled(STORE_MENU))
            .first()?
            .ok_or_else(|| InstallError::ControlNotFound(format!("the '{STORE_MENU}' menu")))?;
        self.client.activate(&store_menu)?;

        let purchases = self
            .locate(&store_menu, Selector::role(Role::MenuItem).titled(PURCHASES_MENU_ITEM))
            .first()?
            .ok_or_else(|| {
                InstallError::ControlNotFound(format!("the '{PURCHASES_MENU_ITEM}' menu item"))
            })?;
        self.client.activate(&purchases)?;

        let group = self.locate(
            &app,
            Selector::role(Role::Group).with(Attribute::Identifier, LabelPatterns::exact(PURCHASED_GROUP_ID)),
        );
        let spec = self.settings.navigation;
        group
            .wait(self.clock.as_ref(), &spec)
            .map_err(|e| InstallError::from_wait(e, || InstallError::NavigationTimeout(spec.timeout())))?;

        let window = self.main_window(&app)?;
        let sign_in = self
            .locate(&window, Selector::role(Role::Link).titled(SIGN_IN_LINK))
            .first()?;
        if sign_in.is_some() {
            self.transition(NavState::SignedOut);
            return Err(InstallError::NotSignedIn);
        }

        self.transition(NavState::PurchasesOpen);
        Ok(app)
    }

    /// The Purchases row whose link is titled exactly `app_name`.
    #[instrument(level = "debug", skip(self))]
    pub fn find_row(&mut self, app_name: &str) -> Result<Option<UIElement>, InstallError> {
        let app = self.open_purchases()?;
        let window = self.main_window(&app)?;
        let row = self
            .locate(
                &window,
                Selector::role(Role::Row).has(Selector::role(Role::Link).titled(app_name)),
            )
            .first()?;

        self.transition(if row.is_some() {
            NavState::RowFound
        } else {
            NavState::RowAbsent
        });
        Ok(row)
    }

    /// Follows the row's link to the app's store page.
    ///
    /// The page gives no readiness signal, so this sleeps for the configured
    /// settle delay and hopes the page is there afterwards.
    #[instrument(level = "debug", skip(self, row))]
    pub fn open_app_page(&mut self, row: &UIElement) -> Result<UIElement, InstallError> {
        let link = self
            .locate(row, Role::Link)
            .first()?
            .ok_or_else(|| InstallError::ControlNotFound("the app link in its Purchases row".to_string()))?;
        self.client.activate(&link)?;

        debug!(delay = ?self.settings.settle_delay, "waiting for the app page to settle");
        self.clock.sleep(self.settings.settle_delay);

        let app = self.ensure_app_ready()?;
        self.transition(NavState::PageOpen);
        Ok(app)
    }

    pub fn focus_storefront(&self) -> Result<(), InstallError> {
        let identity = self
            .client
            .running_application(&self.settings.bundle_id)?
            .ok_or_else(|| {
                AutomationError::PlatformError(format!("{} is not running", self.settings.bundle_id))
            })?;
        self.client.activate_application(&identity)?;
        Ok(())
    }

    /// First window of the application.
    pub fn main_window(&self, app: &UIElement) -> Result<UIElement, InstallError> {
        app.locator(Role::Window)
            .max_depth(1)
            .first()?
            .ok_or_else(|| InstallError::ControlNotFound("the main window".to_string()))
    }

    /// Version shown in the page's information section: the numeric text next
    /// to the "Version: " label.
    pub fn latest_version(&self, page: &UIElement) -> Result<Option<String>, InstallError> {
        let window = self.main_window(page)?;
        let label = self
            .locate(
                &window,
                Selector::role(Role::StaticText).with(Attribute::Value, LabelPatterns::exact(VERSION_LABEL)),
            )
            .first()?;
        let Some(section) = label.map(|l| l.parent()).transpose()?.flatten() else {
            return Ok(None);
        };

        let number = LabelPatterns::regexes(["^[0-9]"])?;
        let value = section
            .locator(Selector::role(Role::StaticText).with(Attribute::Value, number))
            .max_depth(1)
            .first()?
            .map(|text| self.client.read_attribute(&text, Attribute::Value))
            .transpose()?
            .flatten();
        Ok(value)
    }

    /// Quits the storefront. Drops the held handle, which is stale afterwards.
    pub fn quit(&mut self) -> Result<(), AutomationError> {
        self.app = None;
        self.transition(NavState::AppNotRunning);
        self.client.terminate_application(&self.settings.bundle_id)
    }
}

impl std::fmt::Debug for StorefrontNavigator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorefrontNavigator")
            .field("bundle_id", &self.settings.bundle_id)
            .field("state", &self.state)
            .field("has_app", &self.app.is_some())
            .finish()
    }
}
