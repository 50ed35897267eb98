mod navigator_tests;
mod orchestrator_tests;

use crate::config::{InstallerConfig, Settings};
use crate::platforms::mock::{StorefrontFixture, StorefrontScenario};
use crate::wait::ManualClock;
use crate::AccessibilityClient;
use std::sync::Arc;

// Initialize tracing for tests
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    let _ = fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::DEBUG.into()))
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .with_test_writer()
        .try_init();
}

pub fn default_settings() -> Settings {
    InstallerConfig::default()
        .validate()
        .expect("default config is valid")
}

pub struct Harness {
    pub fixture: StorefrontFixture,
    pub client: AccessibilityClient,
    pub clock: Arc<ManualClock>,
}

pub fn harness(scenario: StorefrontScenario) -> Harness {
    init_tracing();
    let fixture = scenario.build();
    let client = AccessibilityClient::with_engine(Arc::new(fixture.engine.clone()));
    Harness {
        fixture,
        client,
        clock: Arc::new(ManualClock::new()),
    }
}
