//! macOS backend: AX API for the element tree, `NSRunningApplication` for
//! process-level focus and lifecycle.

use crate::element::{Attribute, UIElement, UIElementImpl};
use crate::errors::AutomationError;
use crate::platforms::{AccessibilityEngine, AppIdentity};
use accessibility_sys::{
    kAXChildrenAttribute, kAXErrorAPIDisabled, kAXErrorAttributeUnsupported, kAXErrorCannotComplete,
    kAXErrorInvalidUIElement, kAXErrorNoValue, kAXErrorNotImplemented, kAXErrorSuccess,
    kAXParentAttribute, kAXPressAction, kAXRoleAttribute, AXError, AXIsProcessTrusted,
    AXUIElementCopyAttributeValue, AXUIElementCreateApplication, AXUIElementGetTypeID,
    AXUIElementPerformAction, AXUIElementRef,
};
use core_foundation::array::CFArray;
use core_foundation::base::{CFEqual, CFGetTypeID, CFHash, CFRelease, CFRetain, CFType, CFTypeRef, TCFType};
use core_foundation::boolean::CFBoolean;
use core_foundation::number::CFNumber;
use core_foundation::string::CFString;
use objc::rc::autoreleasepool;
use objc::runtime::{Object, BOOL, NO};
use objc::{class, msg_send, sel, sel_impl};
use objc_foundation::{INSString, NSString};
use std::process::Command;
use tracing::{debug, instrument, trace};

/// `NSApplicationActivateIgnoringOtherApps`
const ACTIVATE_IGNORING_OTHER_APPS: usize = 1 << 1;

fn ax_error(code: AXError, what: &str) -> AutomationError {
    match code {
        kAXErrorAPIDisabled => AutomationError::PermissionDenied(format!(
            "accessibility access is not enabled for this process ({what})"
        )),
        kAXErrorInvalidUIElement => AutomationError::ElementDetached(what.to_string()),
        kAXErrorCannotComplete => {
            AutomationError::PlatformError(format!("the application did not respond to {what}"))
        }
        other => AutomationError::PlatformError(format!("AX error {other} during {what}")),
    }
}

/// Owned reference to an `AXUIElementRef`.
struct AxElement(AXUIElementRef);

// AX element references are CF objects and may be used from any thread.
unsafe impl Send for AxElement {}
unsafe impl Sync for AxElement {}

impl AxElement {
    /// Takes ownership of a reference obtained under the create rule.
    fn wrap_created(raw: AXUIElementRef) -> Option<Self> {
        (!raw.is_null()).then_some(Self(raw))
    }

    /// Retains a reference obtained under the get rule.
    fn wrap_retained(raw: AXUIElementRef) -> Self {
        unsafe { CFRetain(raw as CFTypeRef) };
        Self(raw)
    }

    fn copy_attribute(&self, name: &str) -> Result<Option<CFType>, AutomationError> {
        let attribute = CFString::new(name);
        let mut value: CFTypeRef = std::ptr::null();
        let code = unsafe {
            AXUIElementCopyAttributeValue(self.0, attribute.as_concrete_TypeRef(), &mut value)
        };
        match code {
            kAXErrorSuccess if value.is_null() => Ok(None),
            kAXErrorSuccess => Ok(Some(unsafe { CFType::wrap_under_create_rule(value) })),
            kAXErrorNoValue | kAXErrorAttributeUnsupported | kAXErrorNotImplemented => Ok(None),
            code => Err(ax_error(code, name)),
        }
    }

    fn string_attribute(&self, name: &str) -> Result<Option<String>, AutomationError> {
        Ok(self.copy_attribute(name)?.and_then(|value| cf_to_string(&value)))
    }

    fn element_attribute(&self, name: &str) -> Result<Option<AxElement>, AutomationError> {
        Ok(self.copy_attribute(name)?.and_then(|value| as_ax_element(&value)))
    }
}

impl Clone for AxElement {
    fn clone(&self) -> Self {
        Self::wrap_retained(self.0)
    }
}

impl Drop for AxElement {
    fn drop(&mut self) {
        unsafe { CFRelease(self.0 as CFTypeRef) };
    }
}

fn as_ax_element(value: &CFType) -> Option<AxElement> {
    let raw = value.as_CFTypeRef();
    let is_element = unsafe { CFGetTypeID(raw) == AXUIElementGetTypeID() };
    is_element.then(|| AxElement::wrap_retained(raw as AXUIElementRef))
}

fn cf_to_string(value: &CFType) -> Option<String> {
    if let Some(s) = value.downcast::<CFString>() {
        return Some(s.to_string());
    }
    if let Some(n) = value.downcast::<CFNumber>() {
        return n
            .to_i64()
            .map(|i| i.to_string())
            .or_else(|| n.to_f64().map(|f| f.to_string()));
    }
    if let Some(b) = value.downcast::<CFBoolean>() {
        return Some(bool::from(b).to_string());
    }
    None
}

#[derive(Clone)]
pub struct MacOSUIElement {
    element: AxElement,
}

impl std::fmt::Debug for MacOSUIElement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MacOSUIElement")
            .field("ptr", &self.element.0)
            .finish()
    }
}

impl MacOSUIElement {
    fn wrap(element: AxElement) -> UIElement {
        UIElement::new(Box::new(MacOSUIElement { element }))
    }
}

impl UIElementImpl for MacOSUIElement {
    fn object_id(&self) -> usize {
        // Distinct AXUIElementRefs can name the same UI object; CFHash agrees across them.
        unsafe { CFHash(self.element.0 as CFTypeRef) as usize }
    }

    fn is_same(&self, other: &dyn UIElementImpl) -> bool {
        // Hashes can collide; CFEqual compares the underlying UI object.
        match other.as_any().downcast_ref::<MacOSUIElement>() {
            Some(other) => unsafe {
                CFEqual(self.element.0 as CFTypeRef, other.element.0 as CFTypeRef) != 0
            },
            None => false,
        }
    }

    fn role(&self) -> String {
        self.element
            .string_attribute(kAXRoleAttribute)
            .ok()
            .flatten()
            .unwrap_or_default()
    }

    fn attribute(&self, attribute: Attribute) -> Result<Option<String>, AutomationError> {
        self.element.string_attribute(attribute.ax_name())
    }

    fn children(&self) -> Result<Vec<UIElement>, AutomationError> {
        let Some(value) = self.element.copy_attribute(kAXChildrenAttribute)? else {
            return Ok(Vec::new());
        };
        let Some(array) = value.downcast::<CFArray<CFType>>() else {
            trace!("AXChildren was not an array");
            return Ok(Vec::new());
        };
        Ok(array
            .iter()
            .filter_map(|item| as_ax_element(&item))
            .map(MacOSUIElement::wrap)
            .collect())
    }

    fn parent(&self) -> Result<Option<UIElement>, AutomationError> {
        Ok(self
            .element
            .element_attribute(kAXParentAttribute)?
            .map(MacOSUIElement::wrap))
    }

    fn press(&self) -> Result<(), AutomationError> {
        let action = CFString::new(kAXPressAction);
        let code = unsafe { AXUIElementPerformAction(self.element.0, action.as_concrete_TypeRef()) };
        if code == kAXErrorSuccess {
            Ok(())
        } else {
            Err(ax_error(code, kAXPressAction))
        }
    }

    fn clone_box(&self) -> Box<dyn UIElementImpl> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

/// Reads a Foundation string property of an Objective-C object.
unsafe fn ns_string(value: *mut NSString) -> Option<String> {
    if value.is_null() {
        None
    } else {
        Some((*value).as_str().to_string())
    }
}

unsafe fn identity_of(app: *mut Object) -> AppIdentity {
    let pid: i32 = msg_send![app, processIdentifier];
    let bundle: *mut NSString = msg_send![app, bundleIdentifier];
    let name: *mut NSString = msg_send![app, localizedName];
    AppIdentity {
        pid,
        bundle_id: ns_string(bundle),
        name: ns_string(name),
    }
}

/// Running instances of an application, via `NSRunningApplication`.
fn running_with_bundle_id(bundle_id: &str) -> Vec<AppIdentity> {
    autoreleasepool(|| unsafe {
        let bundle = NSString::from_str(bundle_id);
        let bundle_ptr = &*bundle as *const NSString as *const Object;
        let apps: *mut Object =
            msg_send![class!(NSRunningApplication), runningApplicationsWithBundleIdentifier: bundle_ptr];
        if apps.is_null() {
            return Vec::new();
        }
        let count: usize = msg_send![apps, count];
        (0..count)
            .map(|i| {
                let app: *mut Object = msg_send![apps, objectAtIndex: i];
                identity_of(app)
            })
            .collect()
    })
}

pub struct MacOSEngine;

impl MacOSEngine {
    /// Fails unless this process has been granted accessibility access.
    pub fn new() -> Result<Self, AutomationError> {
        if !unsafe { AXIsProcessTrusted() } {
            return Err(AutomationError::PermissionDenied(
                "accessibility access is required. Grant it in System Settings > Privacy & Security > Accessibility"
                    .to_string(),
            ));
        }
        Ok(Self)
    }
}

impl AccessibilityEngine for MacOSEngine {
    fn application(&self, bundle_id: &str) -> Result<Option<UIElement>, AutomationError> {
        let Some(app) = self.running_application(bundle_id)? else {
            return Ok(None);
        };
        let element = AxElement::wrap_created(unsafe { AXUIElementCreateApplication(app.pid) })
            .ok_or_else(|| {
                AutomationError::PlatformError(format!("could not create AX element for pid {}", app.pid))
            })?;
        Ok(Some(MacOSUIElement::wrap(element)))
    }

    fn running_application(&self, bundle_id: &str) -> Result<Option<AppIdentity>, AutomationError> {
        Ok(running_with_bundle_id(bundle_id).into_iter().next())
    }

    #[instrument(skip(self))]
    fn launch_application(&self, bundle_id: &str) -> Result<(), AutomationError> {
        let output = Command::new("open")
            .args(["-b", bundle_id])
            .output()
            .map_err(|e| AutomationError::PlatformError(format!("failed to run open: {e}")))?;
        if !output.status.success() {
            return Err(AutomationError::PlatformError(format!(
                "open -b {bundle_id} failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        debug!("launch requested");
        Ok(())
    }

    fn focused_application(&self) -> Result<Option<AppIdentity>, AutomationError> {
        Ok(autoreleasepool(|| unsafe {
            let workspace: *mut Object = msg_send![class!(NSWorkspace), sharedWorkspace];
            let app: *mut Object = msg_send![workspace, frontmostApplication];
            (!app.is_null()).then(|| identity_of(app))
        }))
    }

    fn activate_application(&self, app: &AppIdentity) -> Result<(), AutomationError> {
        let activated = autoreleasepool(|| unsafe {
            let running: *mut Object = msg_send![
                class!(NSRunningApplication),
                runningApplicationWithProcessIdentifier: app.pid
            ];
            if running.is_null() {
                return None;
            }
            let ok: BOOL = msg_send![running, activateWithOptions: ACTIVATE_IGNORING_OTHER_APPS];
            Some(ok != NO)
        });
        match activated {
            Some(true) => Ok(()),
            Some(false) => Err(AutomationError::PlatformError(format!(
                "application with pid {} refused activation",
                app.pid
            ))),
            None => Err(AutomationError::PlatformError(format!(
                "no running application with pid {}",
                app.pid
            ))),
        }
    }

    fn terminate_application(&self, bundle_id: &str) -> Result<(), AutomationError> {
        autoreleasepool(|| unsafe {
            let bundle = NSString::from_str(bundle_id);
            let bundle_ptr = &*bundle as *const NSString as *const Object;
            let apps: *mut Object =
                msg_send![class!(NSRunningApplication), runningApplicationsWithBundleIdentifier: bundle_ptr];
            if apps.is_null() {
                return;
            }
            let count: usize = msg_send![apps, count];
            for i in 0..count {
                let app: *mut Object = msg_send![apps, objectAtIndex: i];
                let _: BOOL = msg_send![app, terminate];
            }
        });
        Ok(())
    }
}
