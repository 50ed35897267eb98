use super::{default_settings, harness, Harness};
use crate::errors::{FailureKind, InstallError};
use crate::navigator::{NavState, StorefrontNavigator};
use crate::platforms::mock::{StorefrontScenario, STOREFRONT_PID};
use std::time::Duration;

fn navigator(h: &Harness) -> StorefrontNavigator {
    StorefrontNavigator::new(h.client.clone(), h.clock.clone(), default_settings())
}

#[test]
fn launches_once_and_memoizes_the_app() {
    let h = harness(StorefrontScenario::default());
    let mut nav = navigator(&h);
    assert_eq!(nav.state(), NavState::AppNotRunning);

    let first = nav.ensure_app_ready().unwrap();
    let second = nav.ensure_app_ready().unwrap();
    assert_eq!(first, second);
    assert_eq!(nav.state(), NavState::MenuReady);
    assert_eq!(h.fixture.engine.launches(), vec!["com.apple.appstore".to_string()]);
}

#[test]
fn does_not_launch_a_running_storefront() {
    let h = harness(StorefrontScenario {
        already_running: true,
        ..StorefrontScenario::default()
    });
    let mut nav = navigator(&h);
    nav.ensure_app_ready().unwrap();
    assert!(h.fixture.engine.launches().is_empty());
    assert_eq!(h.clock.sleep_count(), 0);
}

#[test]
fn waits_for_the_menu_while_starting() {
    let h = harness(StorefrontScenario {
        menu_ready_after: 4,
        ..StorefrontScenario::default()
    });
    let mut nav = navigator(&h);
    nav.ensure_app_ready().unwrap();
    assert_eq!(h.clock.sleep_count(), 3);
    assert_eq!(h.clock.elapsed(), Duration::from_millis(600));
}

#[test]
fn startup_timeout_when_menu_never_appears() {
    let h = harness(StorefrontScenario {
        menu_ready_after: 10_000,
        ..StorefrontScenario::default()
    });
    let mut nav = navigator(&h);
    let err = nav.ensure_app_ready().unwrap_err();
    assert_eq!(err.kind(), FailureKind::StartupTimeout);
    assert!(err.is_retryable());
    assert!(h.clock.elapsed() >= Duration::from_secs(15));
}

#[test]
fn purchases_opens_through_the_store_menu() {
    let h = harness(StorefrontScenario::default());
    let mut nav = navigator(&h);
    nav.open_purchases().unwrap();
    assert_eq!(nav.state(), NavState::PurchasesOpen);
    assert_eq!(h.fixture.engine.pressed(), vec!["Store", "Purchases"]);
}

#[test]
fn navigation_timeout_when_purchases_never_load() {
    let h = harness(StorefrontScenario {
        purchases_ready_after: 10_000,
        ..StorefrontScenario::default()
    });
    let mut nav = navigator(&h);
    let err = nav.open_purchases().unwrap_err();
    assert!(matches!(err, InstallError::NavigationTimeout(d) if d == Duration::from_secs(15)));
}

#[test]
fn sign_in_link_means_signed_out() {
    let h = harness(StorefrontScenario {
        signed_in: false,
        ..StorefrontScenario::default()
    });
    let mut nav = navigator(&h);
    let err = nav.find_row("Example App").unwrap_err();
    assert!(matches!(err, InstallError::NotSignedIn));
    assert_eq!(nav.state(), NavState::SignedOut);
}

#[test]
fn row_lookup_matches_exact_titles_only() {
    let h = harness(StorefrontScenario {
        purchased: vec!["Example App".to_string(), "Example App Pro".to_string()],
        ..StorefrontScenario::default()
    });
    let mut nav = navigator(&h);

    let row = nav.find_row("Example App Pro").unwrap().unwrap();
    let link = row.locator(crate::selector::Role::Link).first().unwrap().unwrap();
    assert_eq!(link.title().as_deref(), Some("Example App Pro"));
    assert_eq!(nav.state(), NavState::RowFound);

    assert!(nav.find_row("Example").unwrap().is_none());
    assert_eq!(nav.state(), NavState::RowAbsent);
}

#[test]
fn app_page_waits_the_settle_delay() {
    let h = harness(StorefrontScenario::default());
    let mut nav = navigator(&h);
    let row = nav.find_row("Example App").unwrap().unwrap();
    let before = h.clock.elapsed();

    nav.focus_storefront().unwrap();
    let page = nav.open_app_page(&row).unwrap();
    assert_eq!(h.clock.elapsed() - before, Duration::from_secs(3));
    assert_eq!(nav.state(), NavState::PageOpen);
    assert_eq!(h.fixture.engine.focused_pid(), Some(STOREFRONT_PID));
    assert_eq!(nav.latest_version(&page).unwrap().as_deref(), Some("2.4.1"));
}

#[test]
fn main_window_missing_is_control_not_found() {
    let h = harness(StorefrontScenario::default());
    let nav = navigator(&h);
    let bare = h
        .fixture
        .engine
        .add_tree(crate::platforms::mock::NodeSpec::new(crate::selector::Role::Application));
    let err = nav.main_window(&h.fixture.engine.element(bare)).unwrap_err();
    assert_eq!(err.kind(), FailureKind::ControlNotFound);
}
