use crate::errors::AutomationError;
use crate::locator::Locator;
use crate::selector::Selector;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::fmt::Debug;

/// Attributes the automation reads from an element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Attribute {
    Title,
    Description,
    Value,
    Identifier,
}

impl Attribute {
    /// The AX attribute name used by the platform API.
    pub fn ax_name(&self) -> &'static str {
        match self {
            Attribute::Title => "AXTitle",
            Attribute::Description => "AXDescription",
            Attribute::Value => "AXValue",
            Attribute::Identifier => "AXIdentifier",
        }
    }
}

impl std::str::FromStr for Attribute {
    type Err = AutomationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "title" | "axtitle" => Ok(Attribute::Title),
            "description" | "axdescription" => Ok(Attribute::Description),
            "value" | "axvalue" => Ok(Attribute::Value),
            "identifier" | "id" | "axidentifier" => Ok(Attribute::Identifier),
            other => Err(AutomationError::InvalidSelector(format!(
                "Unknown attribute '{other}'. Use title, description, value or identifier."
            ))),
        }
    }
}

/// Represents a UI element in the live accessibility tree.
///
/// A handle is only meaningful while the element exists; nothing here is
/// cached and every read goes to the platform.
pub struct UIElement {
    inner: Box<dyn UIElementImpl>,
}

/// Snapshot of the attributes of one element, for logging and tree dumps
#[derive(Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct UIElementAttributes {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
}

impl fmt::Debug for UIElementAttributes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug_struct = f.debug_struct("UIElementAttributes");

        if !self.role.is_empty() {
            debug_struct.field("role", &self.role);
        }
        for (name, value) in [
            ("title", &self.title),
            ("description", &self.description),
            ("value", &self.value),
            ("identifier", &self.identifier),
        ] {
            if let Some(value) = value {
                if !value.is_empty() {
                    debug_struct.field(name, value);
                }
            }
        }

        debug_struct.finish()
    }
}

/// Interface for platform-specific element implementations
pub trait UIElementImpl: Send + Sync + Debug {
    /// Stable for the object's lifetime and shared by handles to the same
    /// object. Not unique: use [`UIElementImpl::is_same`] for identity.
    fn object_id(&self) -> usize;
    fn role(&self) -> String;
    /// Reads one attribute. `Ok(None)` when the element has no such value.
    fn attribute(&self, attribute: Attribute) -> Result<Option<String>, AutomationError>;
    fn children(&self) -> Result<Vec<UIElement>, AutomationError>;
    fn parent(&self) -> Result<Option<UIElement>, AutomationError>;
    /// Sends a synthetic press. Returns once the event was delivered.
    fn press(&self) -> Result<(), AutomationError>;
    fn clone_box(&self) -> Box<dyn UIElementImpl>;
    fn as_any(&self) -> &dyn Any;

    /// Whether both handles name the same platform object.
    fn is_same(&self, other: &dyn UIElementImpl) -> bool {
        self.object_id() == other.object_id()
    }
}

impl UIElement {
    pub fn new(inner: Box<dyn UIElementImpl>) -> Self {
        Self { inner }
    }

    pub fn object_id(&self) -> usize {
        self.inner.object_id()
    }

    pub fn role(&self) -> String {
        self.inner.role()
    }

    pub fn attribute(&self, attribute: Attribute) -> Result<Option<String>, AutomationError> {
        self.inner.attribute(attribute)
    }

    pub fn title(&self) -> Option<String> {
        self.inner.attribute(Attribute::Title).ok().flatten()
    }

    /// Collects every known attribute, treating read failures as absent.
    pub fn attributes(&self) -> UIElementAttributes {
        let read = |attribute| self.inner.attribute(attribute).ok().flatten();
        UIElementAttributes {
            role: self.role(),
            title: read(Attribute::Title),
            description: read(Attribute::Description),
            value: read(Attribute::Value),
            identifier: read(Attribute::Identifier),
        }
    }

    pub fn children(&self) -> Result<Vec<UIElement>, AutomationError> {
        self.inner.children()
    }

    pub fn parent(&self) -> Result<Option<UIElement>, AutomationError> {
        self.inner.parent()
    }

    pub fn press(&self) -> Result<(), AutomationError> {
        self.inner.press()
    }

    /// Creates a locator scoped to this element's subtree.
    pub fn locator(&self, selector: impl Into<Selector>) -> Locator {
        Locator::new(self.clone(), selector.into())
    }
}

impl Clone for UIElement {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone_box(),
        }
    }
}

impl PartialEq for UIElement {
    fn eq(&self, other: &Self) -> bool {
        self.inner.is_same(other.inner.as_ref())
    }
}

impl Eq for UIElement {}

impl Debug for UIElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UIElement")
            .field("object_id", &self.object_id())
            .field("role", &self.role())
            .finish()
    }
}
