//! Tests for the column-change timestamp cache: cold population,
//! provisional/authoritative reconciliation, and machine-wide clears.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use common::{fixture, settle, ts};
use futures_util::StreamExt;
use muninn::{
    ColumnChange, ColumnKey, HistoricCorrection, LiveTick, MuninnError, TimeRange,
};

fn key(machine: &str, signal: &str) -> ColumnKey {
    ColumnKey::new(machine, signal)
}

/// Fixture with press-01/temperature seeded to have last changed at
/// `ts(-10)` to value 1.0, already cold-populated into the cache.
async fn populated() -> (common::Fixture, ColumnKey) {
    let fx = fixture();
    let key = key("press-01", "temperature");
    fx.trend
        .seed_last_change(key.clone(), ColumnChange::new(ts(-10), 1.0));

    let change = fx.muninn.columns().get(&key).await.unwrap().unwrap();
    assert_eq!(change, ColumnChange::new(ts(-10), 1.0));
    (fx, key)
}

#[tokio::test(start_paused = true)]
async fn cold_populate_then_hit() {
    let (fx, key) = populated().await;

    let change = fx.muninn.columns().get(&key).await.unwrap().unwrap();
    assert_eq!(change.changed_at, ts(-10));
    assert_eq!(fx.trend.last_change_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn unknown_signal_is_rejected_without_any_call() {
    let fx = fixture();

    assert!(matches!(
        fx.muninn.columns().get(&key("press-01", "vibration")).await,
        Err(MuninnError::Validation(_))
    ));
    assert!(matches!(
        fx.muninn.columns().get(&key("press-01", " ")).await,
        Err(MuninnError::Validation(_))
    ));
    assert!(matches!(
        fx.muninn.columns().get(&key("", "temperature")).await,
        Err(MuninnError::Validation(_))
    ));
    assert_eq!(fx.trend.last_change_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn equal_tick_value_keeps_the_cached_timestamp() {
    let (fx, key) = populated().await;

    fx.bus
        .publish_tick(LiveTick::minutely("press-01", ts(0)).with_value("temperature", 1.0));
    fx.bus
        .publish_tick(LiveTick::sub_minute("press-01", ts(1)).with_value("temperature", 1.0));
    settle().await;

    let change = fx.muninn.columns().get(&key).await.unwrap().unwrap();
    assert_eq!(change, ColumnChange::new(ts(-10), 1.0));
}

#[tokio::test(start_paused = true)]
async fn differing_minutely_tick_adopts_timestamp_and_value() {
    let (fx, key) = populated().await;

    fx.bus
        .publish_tick(LiveTick::minutely("press-01", ts(0)).with_value("temperature", 2.0));
    settle().await;

    let change = fx.muninn.columns().get(&key).await.unwrap().unwrap();
    assert_eq!(change, ColumnChange::new(ts(0), 2.0));
}

#[tokio::test(start_paused = true)]
async fn provisional_change_rolls_back_when_the_minute_confirms_the_old_value() {
    let (fx, key) = populated().await;

    // A sub-minute reading flips the value...
    fx.bus
        .publish_tick(LiveTick::sub_minute("press-01", ts(0)).with_value("temperature", 2.0));
    settle().await;
    assert_eq!(
        fx.muninn.columns().get(&key).await.unwrap().unwrap(),
        ColumnChange::new(ts(0), 2.0)
    );

    // ...but the authoritative minute boundary still reports the old
    // value: the provisional change did not survive. Roll back to the
    // authoritative state, not to (provisional timestamp, old value).
    fx.bus
        .publish_tick(LiveTick::minutely("press-01", ts(1)).with_value("temperature", 1.0));
    settle().await;
    assert_eq!(
        fx.muninn.columns().get(&key).await.unwrap().unwrap(),
        ColumnChange::new(ts(-10), 1.0)
    );
}

#[tokio::test(start_paused = true)]
async fn provisional_change_confirmed_by_the_minute_becomes_authoritative() {
    let (fx, key) = populated().await;

    fx.bus
        .publish_tick(LiveTick::sub_minute("press-01", ts(0)).with_value("temperature", 2.0));
    fx.bus
        .publish_tick(LiveTick::minutely("press-01", ts(1)).with_value("temperature", 2.0));
    settle().await;

    // Reconciliation compares against the last authoritative value
    // (1.0), so the minutely tick's timestamp wins.
    assert_eq!(
        fx.muninn.columns().get(&key).await.unwrap().unwrap(),
        ColumnChange::new(ts(1), 2.0)
    );
}

#[tokio::test(start_paused = true)]
async fn correction_clears_all_of_the_machines_columns() {
    let (fx, key) = populated().await;

    fx.trend
        .seed_last_change(key.clone(), ColumnChange::new(ts(-2), 5.0));
    fx.bus.publish_correction(HistoricCorrection::new(
        "press-01",
        TimeRange::closed(ts(-30), ts(0)),
        vec!["temperature".into()],
    ));
    settle().await;

    // The entry was cleared, so this get re-fetches the corrected state.
    let change = fx.muninn.columns().get(&key).await.unwrap().unwrap();
    assert_eq!(change, ColumnChange::new(ts(-2), 5.0));
    assert_eq!(fx.trend.last_change_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn ticks_for_unread_pairs_are_noops() {
    let fx = fixture();

    fx.bus
        .publish_tick(LiveTick::minutely("press-01", ts(0)).with_value("temperature", 2.0));
    settle().await;

    assert_eq!(fx.trend.last_change_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn no_recorded_change_yet_returns_none() {
    let fx = fixture();

    let change = fx
        .muninn
        .columns()
        .get(&key("press-01", "temperature"))
        .await
        .unwrap();
    assert!(change.is_none());
}

#[tokio::test(start_paused = true)]
async fn effective_updates_are_published() {
    let (fx, key) = populated().await;
    let mut changes = fx.muninn.columns().subscribe();

    fx.bus
        .publish_tick(LiveTick::sub_minute("press-01", ts(0)).with_value("temperature", 2.0));

    let changed = changes.next().await.unwrap();
    assert_eq!(changed.key, key);
    assert_eq!(changed.change, ColumnChange::new(ts(0), 2.0));
}

#[tokio::test(start_paused = true)]
async fn concurrent_gets_fetch_once() {
    let fx = Arc::new(fixture());
    let key = key("press-01", "temperature");
    fx.trend
        .seed_last_change(key.clone(), ColumnChange::new(ts(-10), 1.0));

    let mut handles = Vec::new();
    for _ in 0..4 {
        let fx = Arc::clone(&fx);
        let key = key.clone();
        handles.push(tokio::spawn(async move {
            fx.muninn.columns().get(&key).await
        }));
    }
    for handle in handles {
        assert!(handle.await.unwrap().unwrap().is_some());
    }
    assert_eq!(fx.trend.last_change_calls.load(Ordering::SeqCst), 1);
}
