//! Unit tests for the manual clock used by polling loops.

use std::time::Duration;

use agent_conductor::orchestrator::{Clock, ManualClock};

#[tokio::test]
async fn manual_clock_starts_at_zero_and_advances() {
    let clock = ManualClock::new();
    assert_eq!(clock.now(), Duration::ZERO);
    clock.advance(Duration::from_millis(1500));
    assert_eq!(clock.now(), Duration::from_millis(1500));
}

#[tokio::test]
async fn sleep_completes_only_after_deadline() {
    let clock = ManualClock::new();
    let sleeper = tokio::spawn(clock.sleep(Duration::from_secs(2)));

    clock.advance(Duration::from_secs(1));
    tokio::task::yield_now().await;
    assert!(!sleeper.is_finished());

    clock.advance(Duration::from_secs(1));
    tokio::time::timeout(Duration::from_secs(1), sleeper)
        .await
        .expect("sleep should finish")
        .expect("join");
}

#[tokio::test]
async fn zero_sleep_is_immediate() {
    let clock = ManualClock::new();
    tokio::time::timeout(Duration::from_millis(100), clock.sleep(Duration::ZERO))
        .await
        .expect("zero sleep finishes at once");
}
