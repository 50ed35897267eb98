use std::time::{Duration, Instant};
use storefront::platforms::mock::{MockEngine, NodeSpec, Visibility};
use storefront::wait::{poll_until, wait_for, ManualClock, SystemClock, WaitSpec};
use storefront::{Role, Selector, WaitError};

#[test]
fn real_clock_waits_at_least_the_timeout() {
    let start = Instant::now();
    let mut calls = 0;
    let result = poll_until::<(), _>(
        &SystemClock,
        Duration::from_millis(20),
        Duration::from_millis(100),
        || {
            calls += 1;
            Ok(None)
        },
    );

    assert!(matches!(result, Err(WaitError::TimedOut { .. })));
    assert!(start.elapsed() >= Duration::from_millis(100));
    assert!(calls >= 1 && calls <= 5, "evaluated {calls} times");
}

#[test]
fn real_clock_returns_as_soon_as_the_condition_holds() {
    let start = Instant::now();
    let value = poll_until(&SystemClock, Duration::from_millis(500), Duration::from_secs(5), || {
        Ok(Some("ready"))
    })
    .unwrap();
    assert_eq!(value, "ready");
    assert!(start.elapsed() < Duration::from_millis(500));
}

#[test]
fn locator_wait_finds_an_element_that_appears_later() {
    let engine = MockEngine::new();
    let root = engine.add_tree(
        NodeSpec::new(Role::Window)
            .child(NodeSpec::new(Role::StaticText).title("I have arrived!").key("late")),
    );
    let late = engine.node("late").unwrap();
    engine.set_visibility(late, Visibility::Pending(3));

    let clock = ManualClock::new();
    let spec = WaitSpec::new(Duration::from_millis(200), Duration::from_secs(5)).unwrap();
    let found = engine
        .element(root)
        .locator(Selector::role(Role::StaticText).titled("I have arrived!"))
        .wait(&clock, &spec)
        .unwrap();

    assert_eq!(found.title().as_deref(), Some("I have arrived!"));
    assert_eq!(clock.sleep_count(), 2);
}

#[test]
fn locator_wait_times_out_for_a_missing_element() {
    let engine = MockEngine::new();
    let root = engine.add_tree(NodeSpec::new(Role::Window));
    let clock = ManualClock::new();
    let spec = WaitSpec::new(Duration::from_secs(1), Duration::from_secs(5)).unwrap();

    let err = engine
        .element(root)
        .locator(Selector::role(Role::Button).titled("non-existent-element"))
        .wait(&clock, &spec)
        .unwrap_err();

    match err {
        WaitError::TimedOut { attempts, elapsed } => {
            assert_eq!(attempts, 5);
            assert!(elapsed >= Duration::from_secs(5));
        }
        other => panic!("expected a timeout, got {other:?}"),
    }
}

#[test]
fn single_check_spec_never_sleeps() {
    let clock = ManualClock::new();
    let result = wait_for::<(), _>(&clock, &WaitSpec::once(), || Ok(None));
    assert!(result.is_err());
    assert_eq!(clock.sleep_count(), 0);
}
