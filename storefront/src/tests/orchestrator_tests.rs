use super::{default_settings, harness, Harness};
use crate::errors::{FailureKind, InstallError};
use crate::orchestrator::{InstallRequest, Orchestrator, Step, WorkflowState};
use crate::platforms::mock::{MockRegistry, StorefrontScenario, PREVIOUS_APP_PID};
use crate::registry::{InstalledState, RegistryError};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn orchestrator(h: &Harness, registry: Arc<dyn InstalledState>) -> Orchestrator {
    Orchestrator::new(h.client.clone(), registry, h.clock.clone(), default_settings())
}

/// Reports the app as installed from the `after`-th query on.
struct InstalledAfter {
    calls: AtomicU32,
    after: u32,
}

impl InstalledState for InstalledAfter {
    fn installed(&self, _app_name: &str) -> Result<bool, RegistryError> {
        Ok(self.calls.fetch_add(1, Ordering::SeqCst) + 1 >= self.after)
    }

    fn upgradable(&self, _app_name: &str) -> Result<bool, RegistryError> {
        Ok(false)
    }
}

#[test]
fn inspect_reports_each_state() {
    let h = harness(StorefrontScenario::default());
    let mut orch = orchestrator(&h, Arc::new(MockRegistry::new()));
    assert_eq!(orch.inspect("Example App").unwrap(), WorkflowState::PurchasedNotInstalled);
    assert_eq!(orch.inspect("Missing App").unwrap(), WorkflowState::NotPurchased);

    let mut orch = orchestrator(&h, Arc::new(MockRegistry::new().with_installed("Example App")));
    assert_eq!(orch.inspect("Example App").unwrap(), WorkflowState::Installed);

    let h = harness(StorefrontScenario {
        signed_in: false,
        ..StorefrontScenario::default()
    });
    let mut orch = orchestrator(&h, Arc::new(MockRegistry::new()));
    assert_eq!(orch.inspect("Example App").unwrap(), WorkflowState::SignedOut);
}

#[test]
fn inspect_quits_a_storefront_it_launched_and_restores_focus() {
    let h = harness(StorefrontScenario::default());
    let mut orch = orchestrator(&h, Arc::new(MockRegistry::new()));
    orch.inspect("Example App").unwrap();
    assert!(!h.fixture.engine.is_running("com.apple.appstore"));
    assert_eq!(h.fixture.engine.focused_pid(), Some(PREVIOUS_APP_PID));
    assert_eq!(h.fixture.engine.press_count(), 2);
}

#[test]
fn latest_version_reads_the_store_page() {
    let h = harness(StorefrontScenario {
        version: "14.1".to_string(),
        already_running: true,
        ..StorefrontScenario::default()
    });
    let mut orch = orchestrator(&h, Arc::new(MockRegistry::new()));
    assert_eq!(orch.latest_version("Example App").unwrap().as_deref(), Some("14.1"));
    assert!(h.fixture.engine.is_running("com.apple.appstore"));
    assert!(matches!(
        orch.latest_version("Missing App"),
        Err(InstallError::NotPurchased(_))
    ));
}

#[test]
fn install_rejects_bad_requests_before_touching_anything() {
    let h = harness(StorefrontScenario::default());
    let registry = Arc::new(MockRegistry::new());
    let mut orch = orchestrator(&h, registry.clone());

    let err = orch.install(&InstallRequest::new("  ")).unwrap_err();
    assert_eq!(err.kind(), FailureKind::InvalidRequest);

    let err = orch
        .install(&InstallRequest::new("Example App").with_timeout(Duration::from_millis(10)))
        .unwrap_err();
    assert_eq!(err.kind(), FailureKind::InvalidRequest);

    assert_eq!(registry.installed_queries(), 0);
    assert!(h.fixture.engine.launches().is_empty());
}

#[test]
fn installed_after_purchase_check_skips_the_install_control() {
    let h = harness(StorefrontScenario::default());
    let registry = Arc::new(InstalledAfter {
        calls: AtomicU32::new(0),
        after: 2,
    });
    let mut orch = orchestrator(&h, registry);

    let outcome = orch.install(&InstallRequest::new("Example App")).unwrap();
    assert!(!outcome.changed);
    assert_eq!(outcome.state, WorkflowState::Installed);
    assert_eq!(
        outcome.trace,
        vec![
            Step::Start,
            Step::CheckPurchased,
            Step::CheckInstalled,
            Step::Cleanup,
            Step::Done
        ]
    );
    assert!(h
        .fixture
        .engine
        .pressed()
        .iter()
        .all(|label| !label.starts_with("Install")));
    assert!(!h.fixture.engine.is_running("com.apple.appstore"));
}

#[test]
fn missing_install_control_fails_without_quitting() {
    let h = harness(StorefrontScenario {
        with_install_control: false,
        ..StorefrontScenario::default()
    });
    let mut orch = orchestrator(&h, Arc::new(MockRegistry::new()));
    let err = orch.install(&InstallRequest::new("Example App")).unwrap_err();

    assert!(matches!(err, InstallError::ControlNotFound(_)));
    assert_eq!(orch.trace().last(), Some(&Step::Failed(FailureKind::ControlNotFound)));
    assert!(h.fixture.engine.terminations().is_empty());
    assert_eq!(h.fixture.engine.focused_pid(), Some(PREVIOUS_APP_PID));
}

#[test]
fn revoked_permissions_surface_as_activation_errors() {
    let h = harness(StorefrontScenario::default());
    h.fixture.engine.deny_presses(true);
    let mut orch = orchestrator(&h, Arc::new(MockRegistry::new()));
    let err = orch.install(&InstallRequest::new("Example App")).unwrap_err();
    assert_eq!(err.kind(), FailureKind::Activation);
    assert!(!err.is_retryable());
    assert_eq!(h.fixture.engine.focused_pid(), Some(PREVIOUS_APP_PID));
}

#[test]
fn open_label_variant_also_completes() {
    let h = harness(StorefrontScenario {
        completion_word: "Open".to_string(),
        install_completes_after: Some(1),
        ..StorefrontScenario::default()
    });
    let mut orch = orchestrator(&h, Arc::new(MockRegistry::new()));
    let outcome = orch.install(&InstallRequest::new("Example App")).unwrap();
    assert!(outcome.changed);
    assert_eq!(orch.state(), Some(WorkflowState::Installed));
}
