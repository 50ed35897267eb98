//! In-memory accessibility tree for exercising the automation without a desktop.
//!
//! Nodes can be hidden, appear after a number of polls, and react to presses,
//! which is enough to script the App Store's asynchronous transitions.

use crate::element::{Attribute, UIElement, UIElementImpl};
use crate::errors::AutomationError;
use crate::platforms::{AccessibilityEngine, AppIdentity};
use crate::registry::{InstalledState, RegistryError};
use crate::selector::Role;
use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

pub type NodeId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Visible,
    Hidden,
    /// Becomes visible on the n-th time its parent's children are listed.
    Pending(u32),
}

/// A scripted reaction to a press or a launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    Show(NodeId),
    ShowAfter(NodeId, u32),
    Hide(NodeId),
}

/// Declarative description of a subtree to insert.
#[derive(Debug, Clone)]
pub struct NodeSpec {
    role: Role,
    attributes: HashMap<Attribute, String>,
    visibility: Visibility,
    key: Option<String>,
    children: Vec<NodeSpec>,
}

impl NodeSpec {
    pub fn new(role: Role) -> Self {
        Self {
            role,
            attributes: HashMap::new(),
            visibility: Visibility::Visible,
            key: None,
            children: Vec::new(),
        }
    }

    pub fn attribute(mut self, attribute: Attribute, value: impl Into<String>) -> Self {
        self.attributes.insert(attribute, value.into());
        self
    }

    pub fn title(self, value: impl Into<String>) -> Self {
        self.attribute(Attribute::Title, value)
    }

    pub fn description(self, value: impl Into<String>) -> Self {
        self.attribute(Attribute::Description, value)
    }

    pub fn value(self, value: impl Into<String>) -> Self {
        self.attribute(Attribute::Value, value)
    }

    pub fn identifier(self, value: impl Into<String>) -> Self {
        self.attribute(Attribute::Identifier, value)
    }

    pub fn hidden(mut self) -> Self {
        self.visibility = Visibility::Hidden;
        self
    }

    /// Name the node so it can be looked up with [`MockEngine::node`].
    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn child(mut self, child: NodeSpec) -> Self {
        self.children.push(child);
        self
    }

    pub fn children(mut self, children: impl IntoIterator<Item = NodeSpec>) -> Self {
        self.children.extend(children);
        self
    }
}

#[derive(Debug)]
struct MockNode {
    role: Role,
    attributes: HashMap<Attribute, String>,
    visibility: Visibility,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    app: Option<usize>,
    on_press: Vec<Effect>,
}

#[derive(Debug)]
struct MockApp {
    identity: AppIdentity,
    root: NodeId,
    running: bool,
    on_launch: Vec<Effect>,
}

#[derive(Debug, Default)]
struct MockState {
    nodes: Vec<MockNode>,
    apps: Vec<MockApp>,
    keys: HashMap<String, NodeId>,
    focused: Option<i32>,
    pressed: Vec<String>,
    launches: Vec<String>,
    terminations: Vec<String>,
    activations: Vec<i32>,
    deny_presses: bool,
}

impl MockState {
    fn insert(&mut self, spec: NodeSpec, parent: Option<NodeId>, app: Option<usize>) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(MockNode {
            role: spec.role,
            attributes: spec.attributes,
            visibility: spec.visibility,
            parent,
            children: Vec::new(),
            app,
            on_press: Vec::new(),
        });
        if let Some(key) = spec.key {
            self.keys.insert(key, id);
        }
        for child in spec.children {
            let child_id = self.insert(child, Some(id), app);
            self.nodes[id].children.push(child_id);
        }
        id
    }

    fn set_app(&mut self, node: NodeId, app: usize) {
        self.nodes[node].app = Some(app);
        for child in self.nodes[node].children.clone() {
            self.set_app(child, app);
        }
    }

    fn apply(&mut self, effect: &Effect) {
        match *effect {
            Effect::Show(id) => self.nodes[id].visibility = Visibility::Visible,
            Effect::Hide(id) => self.nodes[id].visibility = Visibility::Hidden,
            Effect::ShowAfter(id, polls) => {
                if self.nodes[id].visibility != Visibility::Visible {
                    self.nodes[id].visibility = if polls == 0 {
                        Visibility::Visible
                    } else {
                        Visibility::Pending(polls)
                    };
                }
            }
        }
    }

    fn ensure_alive(&self, id: NodeId) -> Result<(), AutomationError> {
        if let Some(app) = self.nodes[id].app {
            if !self.apps[app].running {
                return Err(AutomationError::ElementDetached(format!(
                    "{} is not running",
                    self.apps[app].identity.bundle_id.as_deref().unwrap_or("application")
                )));
            }
        }
        Ok(())
    }

    fn app_by_bundle(&self, bundle_id: &str) -> Option<usize> {
        self.apps
            .iter()
            .position(|a| a.identity.bundle_id.as_deref() == Some(bundle_id))
    }

    fn label(&self, id: NodeId) -> String {
        let node = &self.nodes[id];
        node.attributes
            .get(&Attribute::Title)
            .or_else(|| node.attributes.get(&Attribute::Description))
            .cloned()
            .unwrap_or_else(|| node.role.ax_name().to_string())
    }
}

/// Scriptable fake implementing [`AccessibilityEngine`].
///
/// Cloning shares the same tree.
#[derive(Debug, Clone, Default)]
pub struct MockEngine {
    state: Arc<Mutex<MockState>>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Inserts a free-standing tree that belongs to no application.
    pub fn add_tree(&self, spec: NodeSpec) -> NodeId {
        self.lock().insert(spec, None, None)
    }

    /// Registers an application whose root element is built from `root`.
    pub fn add_application(&self, identity: AppIdentity, root: NodeSpec, running: bool) -> NodeId {
        let mut state = self.lock();
        let app = state.apps.len();
        let root_id = state.insert(root, None, None);
        state.set_app(root_id, app);
        state.apps.push(MockApp {
            identity,
            root: root_id,
            running,
            on_launch: Vec::new(),
        });
        root_id
    }

    pub fn element(&self, id: NodeId) -> UIElement {
        UIElement::new(Box::new(MockElement {
            state: self.state.clone(),
            id,
        }))
    }

    /// Node registered under `key` with [`NodeSpec::key`].
    pub fn node(&self, key: &str) -> Option<NodeId> {
        self.lock().keys.get(key).copied()
    }

    pub fn on_press(&self, node: NodeId, effect: Effect) {
        self.lock().nodes[node].on_press.push(effect);
    }

    pub fn on_launch(&self, bundle_id: &str, effect: Effect) {
        let mut state = self.lock();
        if let Some(app) = state.app_by_bundle(bundle_id) {
            state.apps[app].on_launch.push(effect);
        }
    }

    pub fn set_visibility(&self, node: NodeId, visibility: Visibility) {
        self.lock().nodes[node].visibility = visibility;
    }

    pub fn visibility(&self, node: NodeId) -> Visibility {
        self.lock().nodes[node].visibility
    }

    pub fn set_focused(&self, pid: Option<i32>) {
        self.lock().focused = pid;
    }

    pub fn focused_pid(&self) -> Option<i32> {
        self.lock().focused
    }

    pub fn is_running(&self, bundle_id: &str) -> bool {
        let state = self.lock();
        state
            .app_by_bundle(bundle_id)
            .map(|app| state.apps[app].running)
            .unwrap_or(false)
    }

    /// Makes every subsequent press fail as if accessibility access was revoked.
    pub fn deny_presses(&self, deny: bool) {
        self.lock().deny_presses = deny;
    }

    /// Labels of pressed elements, in order.
    pub fn pressed(&self) -> Vec<String> {
        self.lock().pressed.clone()
    }

    pub fn press_count(&self) -> usize {
        self.lock().pressed.len()
    }

    pub fn launches(&self) -> Vec<String> {
        self.lock().launches.clone()
    }

    pub fn terminations(&self) -> Vec<String> {
        self.lock().terminations.clone()
    }

    pub fn activations(&self) -> Vec<i32> {
        self.lock().activations.clone()
    }
}

impl AccessibilityEngine for MockEngine {
    fn application(&self, bundle_id: &str) -> Result<Option<UIElement>, AutomationError> {
        let root = {
            let state = self.lock();
            state
                .app_by_bundle(bundle_id)
                .filter(|&app| state.apps[app].running)
                .map(|app| state.apps[app].root)
        };
        Ok(root.map(|id| self.element(id)))
    }

    fn running_application(&self, bundle_id: &str) -> Result<Option<AppIdentity>, AutomationError> {
        let state = self.lock();
        Ok(state
            .app_by_bundle(bundle_id)
            .filter(|&app| state.apps[app].running)
            .map(|app| state.apps[app].identity.clone()))
    }

    fn launch_application(&self, bundle_id: &str) -> Result<(), AutomationError> {
        let mut state = self.lock();
        let app = state.app_by_bundle(bundle_id).ok_or_else(|| {
            AutomationError::PlatformError(format!("Unable to find application with bundle id {bundle_id}"))
        })?;
        state.launches.push(bundle_id.to_string());
        if !state.apps[app].running {
            state.apps[app].running = true;
            let effects = state.apps[app].on_launch.clone();
            for effect in &effects {
                state.apply(effect);
            }
        }
        state.focused = Some(state.apps[app].identity.pid);
        debug!(bundle_id, "mock application launched");
        Ok(())
    }

    fn focused_application(&self) -> Result<Option<AppIdentity>, AutomationError> {
        let state = self.lock();
        Ok(state.focused.and_then(|pid| {
            state
                .apps
                .iter()
                .find(|a| a.running && a.identity.pid == pid)
                .map(|a| a.identity.clone())
        }))
    }

    fn activate_application(&self, app: &AppIdentity) -> Result<(), AutomationError> {
        let mut state = self.lock();
        let running = state
            .apps
            .iter()
            .any(|a| a.running && a.identity.pid == app.pid);
        if !running {
            return Err(AutomationError::PlatformError(format!(
                "No running application with pid {}",
                app.pid
            )));
        }
        state.focused = Some(app.pid);
        state.activations.push(app.pid);
        Ok(())
    }

    fn terminate_application(&self, bundle_id: &str) -> Result<(), AutomationError> {
        let mut state = self.lock();
        let Some(app) = state.app_by_bundle(bundle_id) else {
            return Ok(());
        };
        state.apps[app].running = false;
        state.terminations.push(bundle_id.to_string());
        if state.focused == Some(state.apps[app].identity.pid) {
            state.focused = None;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct MockElement {
    state: Arc<Mutex<MockState>>,
    id: NodeId,
}

impl MockElement {
    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn wrap(&self, id: NodeId) -> UIElement {
        UIElement::new(Box::new(MockElement {
            state: self.state.clone(),
            id,
        }))
    }
}

impl UIElementImpl for MockElement {
    fn object_id(&self) -> usize {
        self.id
    }

    fn role(&self) -> String {
        self.lock().nodes[self.id].role.ax_name().to_string()
    }

    fn attribute(&self, attribute: Attribute) -> Result<Option<String>, AutomationError> {
        let state = self.lock();
        state.ensure_alive(self.id)?;
        Ok(state.nodes[self.id].attributes.get(&attribute).cloned())
    }

    fn children(&self) -> Result<Vec<UIElement>, AutomationError> {
        let mut state = self.lock();
        state.ensure_alive(self.id)?;
        let mut visible = Vec::new();
        for child in state.nodes[self.id].children.clone() {
            let node = &mut state.nodes[child];
            match node.visibility {
                Visibility::Visible => visible.push(child),
                Visibility::Hidden => {}
                Visibility::Pending(remaining) => {
                    if remaining <= 1 {
                        node.visibility = Visibility::Visible;
                        visible.push(child);
                    } else {
                        node.visibility = Visibility::Pending(remaining - 1);
                    }
                }
            }
        }
        drop(state);
        Ok(visible.into_iter().map(|id| self.wrap(id)).collect())
    }

    fn parent(&self) -> Result<Option<UIElement>, AutomationError> {
        let parent = {
            let state = self.lock();
            state.ensure_alive(self.id)?;
            state.nodes[self.id].parent
        };
        Ok(parent.map(|id| self.wrap(id)))
    }

    fn press(&self) -> Result<(), AutomationError> {
        let mut state = self.lock();
        if state.deny_presses {
            return Err(AutomationError::PermissionDenied(
                "accessibility access was revoked".to_string(),
            ));
        }
        state.ensure_alive(self.id)?;
        if state.nodes[self.id].visibility != Visibility::Visible {
            return Err(AutomationError::ElementDetached(format!(
                "{} is no longer on screen",
                state.label(self.id)
            )));
        }
        let label = state.label(self.id);
        state.pressed.push(label);
        let effects = state.nodes[self.id].on_press.clone();
        for effect in &effects {
            state.apply(effect);
        }
        Ok(())
    }

    fn clone_box(&self) -> Box<dyn UIElementImpl> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn is_same(&self, other: &dyn UIElementImpl) -> bool {
        // Node ids restart at zero in every engine.
        other
            .as_any()
            .downcast_ref::<MockElement>()
            .is_some_and(|other| Arc::ptr_eq(&self.state, &other.state) && self.id == other.id)
    }
}

/// Installed-state collaborator backed by in-memory sets.
#[derive(Debug, Default)]
pub struct MockRegistry {
    installed: Mutex<HashSet<String>>,
    upgradable: Mutex<HashSet<String>>,
    queries: Mutex<u32>,
}

impl MockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_installed(self, app_name: &str) -> Self {
        self.mark_installed(app_name);
        self
    }

    pub fn mark_installed(&self, app_name: &str) {
        self.installed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(app_name.to_string());
    }

    pub fn mark_upgradable(&self, app_name: &str) {
        self.upgradable
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(app_name.to_string());
    }

    /// Number of `installed` queries answered so far.
    pub fn installed_queries(&self) -> u32 {
        *self.queries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl InstalledState for MockRegistry {
    fn installed(&self, app_name: &str) -> Result<bool, RegistryError> {
        *self.queries.lock().unwrap_or_else(|e| e.into_inner()) += 1;
        Ok(self
            .installed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(app_name))
    }

    fn upgradable(&self, app_name: &str) -> Result<bool, RegistryError> {
        Ok(self
            .upgradable
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(app_name))
    }
}

pub const STOREFRONT_PID: i32 = 200;
pub const PREVIOUS_APP_PID: i32 = 100;

/// Builder for a fake App Store with a purchases list and per-app store pages.
#[derive(Debug, Clone)]
pub struct StorefrontScenario {
    pub bundle_id: String,
    pub purchased: Vec<String>,
    pub signed_in: bool,
    pub already_running: bool,
    /// Polls before the Purchases menu item exists after launch.
    pub menu_ready_after: u32,
    /// Polls before the purchases list appears after choosing Store → Purchases.
    pub purchases_ready_after: u32,
    /// Polls before the completion button appears after pressing install; `None` never.
    pub install_completes_after: Option<u32>,
    /// Leading word of the completion button, "Installed" or "Open".
    pub completion_word: String,
    pub with_install_control: bool,
    pub version: String,
}

impl Default for StorefrontScenario {
    fn default() -> Self {
        Self {
            bundle_id: "com.apple.appstore".to_string(),
            purchased: vec!["Example App".to_string()],
            signed_in: true,
            already_running: false,
            menu_ready_after: 1,
            purchases_ready_after: 1,
            install_completes_after: Some(3),
            completion_word: "Installed".to_string(),
            with_install_control: true,
            version: "2.4.1".to_string(),
        }
    }
}

/// A built scenario: the engine plus the ids tests usually poke at.
#[derive(Debug, Clone)]
pub struct StorefrontFixture {
    pub engine: MockEngine,
    pub bundle_id: String,
    pub purchases_menu_item: NodeId,
    pub purchased_group: NodeId,
    pub sign_in_link: NodeId,
}

impl StorefrontFixture {
    pub fn install_button(&self, app_name: &str) -> Option<NodeId> {
        self.engine.node(&format!("install:{app_name}"))
    }

    pub fn completion_button(&self, app_name: &str) -> Option<NodeId> {
        self.engine.node(&format!("done:{app_name}"))
    }
}

impl StorefrontScenario {
    fn app_page(&self, app: &str) -> NodeSpec {
        let mut controls = NodeSpec::new(Role::Group);
        if self.with_install_control {
            controls = controls
                .child(
                    NodeSpec::new(Role::Button)
                        .description(format!("Install, {app}"))
                        .key(format!("install:{app}")),
                )
                .child(
                    NodeSpec::new(Role::Button)
                        .description(format!("{}, {app}", self.completion_word))
                        .key(format!("done:{app}"))
                        .hidden(),
                );
        }

        NodeSpec::new(Role::WebArea)
            .key(format!("page:{app}"))
            .hidden()
            .child(NodeSpec::new(Role::Group).child(controls))
            .child(
                NodeSpec::new(Role::Group).title("Information").child(
                    NodeSpec::new(Role::Group)
                        .child(NodeSpec::new(Role::StaticText).value("Category: "))
                        .child(NodeSpec::new(Role::StaticText).value("Productivity"))
                        .child(NodeSpec::new(Role::StaticText).value("Version: "))
                        .child(NodeSpec::new(Role::StaticText).value(self.version.clone())),
                ),
            )
    }

    pub fn build(self) -> StorefrontFixture {
        let engine = MockEngine::new();

        engine.add_application(
            AppIdentity {
                pid: PREVIOUS_APP_PID,
                bundle_id: Some("com.apple.Terminal".to_string()),
                name: Some("Terminal".to_string()),
            },
            NodeSpec::new(Role::Application).title("Terminal"),
            true,
        );
        engine.set_focused(Some(PREVIOUS_APP_PID));

        let rows = if self.signed_in {
            self.purchased
                .iter()
                .map(|app| {
                    NodeSpec::new(Role::Row)
                        .child(NodeSpec::new(Role::Link).title(app.clone()).key(format!("link:{app}")))
                })
                .collect()
        } else {
            Vec::new()
        };

        let root = NodeSpec::new(Role::Application)
            .title("App Store")
            .child(
                NodeSpec::new(Role::MenuBar).child(
                    NodeSpec::new(Role::MenuBarItem).title("Store").child(
                        NodeSpec::new(Role::Menu).child(
                            NodeSpec::new(Role::MenuItem)
                                .title("Purchases")
                                .key("menu:purchases"),
                        ),
                    ),
                ),
            )
            .child(
                NodeSpec::new(Role::Window)
                    .title("App Store")
                    .child(NodeSpec::new(Role::Link).title("sign in").key("sign-in").hidden())
                    .child(
                        NodeSpec::new(Role::Group)
                            .identifier("purchased")
                            .key("purchased")
                            .hidden()
                            .child(NodeSpec::new(Role::Table).children(rows)),
                    )
                    .children(self.purchased.iter().map(|app| self.app_page(app))),
            );

        engine.add_application(
            AppIdentity {
                pid: STOREFRONT_PID,
                bundle_id: Some(self.bundle_id.clone()),
                name: Some("App Store".to_string()),
            },
            root,
            self.already_running,
        );

        let lookup = |key: &str| engine.node(key).unwrap_or_default();
        let purchases_menu_item = lookup("menu:purchases");
        let purchased_group = lookup("purchased");
        let sign_in_link = lookup("sign-in");

        if !self.already_running {
            engine.set_visibility(purchases_menu_item, Visibility::Hidden);
            engine.on_launch(
                &self.bundle_id,
                Effect::ShowAfter(purchases_menu_item, self.menu_ready_after),
            );
        }

        engine.on_press(
            purchases_menu_item,
            Effect::ShowAfter(purchased_group, self.purchases_ready_after),
        );
        if !self.signed_in {
            engine.on_press(purchases_menu_item, Effect::Show(sign_in_link));
        }

        let pages: Vec<NodeId> = self
            .purchased
            .iter()
            .map(|app| lookup(&format!("page:{app}")))
            .collect();
        for (app, &page) in self.purchased.iter().zip(&pages) {
            if let Some(link) = engine.node(&format!("link:{app}")) {
                for &other in &pages {
                    if other != page {
                        engine.on_press(link, Effect::Hide(other));
                    }
                }
                engine.on_press(link, Effect::Show(page));
            }
            if let (Some(install), Some(done)) = (
                engine.node(&format!("install:{app}")),
                engine.node(&format!("done:{app}")),
            ) {
                engine.on_press(install, Effect::Hide(install));
                if let Some(polls) = self.install_completes_after {
                    engine.on_press(install, Effect::ShowAfter(done, polls));
                }
            }
        }

        StorefrontFixture {
            engine,
            bundle_id: self.bundle_id,
            purchases_menu_item,
            purchased_group,
            sign_in_link,
        }
    }
}
