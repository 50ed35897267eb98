//! App Store install automation through the macOS accessibility tree
//!
//! The App Store has no scriptable install API. This crate drives its UI the
//! way a user would: it finds the app in the Purchases list, opens its page,
//! presses the install button and polls until the button reports the app as
//! installed. Every wait is bounded and every failure is a distinct
//! [`InstallError`] variant.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, instrument};

pub mod config;
pub mod element;
pub mod errors;
pub mod focus;
pub mod locator;
pub mod navigator;
pub mod orchestrator;
pub mod platforms;
pub mod registry;
pub mod selector;
#[cfg(test)]
mod tests;
pub mod wait;

pub use config::{InstallerConfig, Settings};
pub use element::{Attribute, UIElement, UIElementAttributes};
pub use errors::{AutomationError, FailureKind, InstallError, WaitError};
pub use locator::{Locator, SearchOrder};
pub use orchestrator::{InstallOutcome, InstallRequest, Orchestrator, Step, WorkflowState};
pub use platforms::{AccessibilityEngine, AppIdentity};
pub use registry::{InstalledState, MasConfig, MasRegistry, RegistryError};
pub use selector::{LabelPatterns, Role, Selector};
pub use wait::{Clock, SystemClock, WaitSpec};

/// Represents a node in the UI tree, containing its attributes and children.
#[derive(Clone, Serialize, Deserialize)]
pub struct UINode {
    pub attributes: UIElementAttributes,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub children: Vec<UINode>,
}

impl fmt::Debug for UINode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.debug_with_depth(f, 0, 100)
    }
}

impl UINode {
    /// Helper method for debug formatting with depth control
    fn debug_with_depth(
        &self,
        f: &mut fmt::Formatter<'_>,
        current_depth: usize,
        max_depth: usize,
    ) -> fmt::Result {
        let mut debug_struct = f.debug_struct("UINode");
        debug_struct.field("attributes", &self.attributes);

        if !self.children.is_empty() {
            if current_depth < max_depth {
                let children: Vec<DebugNodeWithDepth<'_>> = self
                    .children
                    .iter()
                    .map(|node| DebugNodeWithDepth {
                        node,
                        current_depth: current_depth + 1,
                        max_depth,
                    })
                    .collect();
                debug_struct.field("children", &children);
            } else {
                debug_struct.field(
                    "children",
                    &format!("[{} children (depth limit reached)]", self.children.len()),
                );
            }
        }

        debug_struct.finish()
    }

    /// Number of nodes in this subtree, including this one.
    pub fn node_count(&self) -> usize {
        1 + self.children.iter().map(UINode::node_count).sum::<usize>()
    }
}

struct DebugNodeWithDepth<'a> {
    node: &'a UINode,
    current_depth: usize,
    max_depth: usize,
}

impl fmt::Debug for DebugNodeWithDepth<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.node
            .debug_with_depth(f, self.current_depth, self.max_depth)
    }
}

/// The main entry point for talking to the accessibility layer
///
/// Absence of an element is `Ok(None)`. Errors are reserved for genuine
/// platform failures: revoked permissions, vanished processes.
#[derive(Clone)]
pub struct AccessibilityClient {
    engine: Arc<dyn AccessibilityEngine>,
}

impl fmt::Debug for AccessibilityClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessibilityClient").finish_non_exhaustive()
    }
}

impl AccessibilityClient {
    /// Client for the current platform's accessibility API.
    #[instrument]
    pub fn new() -> Result<Self, AutomationError> {
        Ok(Self::with_engine(platforms::create_engine()?))
    }

    pub fn with_engine(engine: Arc<dyn AccessibilityEngine>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &Arc<dyn AccessibilityEngine> {
        &self.engine
    }

    /// First descendant of `root` matching `selector`, searched depth-first.
    #[instrument(level = "debug", skip(self, root), fields(selector = %selector))]
    pub fn find_child(
        &self,
        root: &UIElement,
        selector: &Selector,
    ) -> Result<Option<UIElement>, AutomationError> {
        root.locator(selector.clone()).first()
    }

    /// Presses an element. Success means the press was delivered, not that
    /// the UI reacted to it.
    #[instrument(level = "debug", skip(self, element), fields(element = ?element.attributes()))]
    pub fn activate(&self, element: &UIElement) -> Result<(), AutomationError> {
        element.press()
    }

    pub fn read_attribute(
        &self,
        element: &UIElement,
        attribute: Attribute,
    ) -> Result<Option<String>, AutomationError> {
        element.attribute(attribute)
    }

    #[instrument(level = "debug", skip(self))]
    pub fn application(&self, bundle_id: &str) -> Result<Option<UIElement>, AutomationError> {
        self.engine.application(bundle_id)
    }

    pub fn running_application(&self, bundle_id: &str) -> Result<Option<AppIdentity>, AutomationError> {
        self.engine.running_application(bundle_id)
    }

    #[instrument(skip(self))]
    pub fn launch_application(&self, bundle_id: &str) -> Result<(), AutomationError> {
        self.engine.launch_application(bundle_id)
    }

    pub fn focused_application(&self) -> Result<Option<AppIdentity>, AutomationError> {
        self.engine.focused_application()
    }

    #[instrument(skip(self))]
    pub fn activate_application(&self, app: &AppIdentity) -> Result<(), AutomationError> {
        self.engine.activate_application(app)
    }

    #[instrument(skip(self))]
    pub fn terminate_application(&self, bundle_id: &str) -> Result<(), AutomationError> {
        self.engine.terminate_application(bundle_id)
    }

    /// Snapshot of the subtree under `root`, `max_depth` levels deep.
    ///
    /// Children that disappear while walking are left out.
    #[instrument(skip(self, root))]
    pub fn tree(&self, root: &UIElement, max_depth: usize) -> Result<UINode, AutomationError> {
        let node = build_node(root, 0, max_depth)?;
        debug!(nodes = node.node_count(), "captured accessibility tree");
        Ok(node)
    }
}

fn build_node(element: &UIElement, depth: usize, max_depth: usize) -> Result<UINode, AutomationError> {
    let attributes = element.attributes();
    if depth >= max_depth {
        return Ok(UINode {
            attributes,
            children: Vec::new(),
        });
    }

    let children = match element.children() {
        Ok(children) => children,
        Err(AutomationError::ElementDetached(_)) if depth > 0 => Vec::new(),
        Err(e) => return Err(e),
    };

    let mut nodes = Vec::with_capacity(children.len());
    for child in &children {
        match build_node(child, depth + 1, max_depth) {
            Ok(node) => nodes.push(node),
            Err(AutomationError::ElementDetached(_)) => continue,
            Err(e) => return Err(e),
        }
    }

    Ok(UINode {
        attributes,
        children: nodes,
    })
}
