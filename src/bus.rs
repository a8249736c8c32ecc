//! Push notification channel.
//!
//! [`EventBus`] is the subscribe contract the caches consume; the
//! message-bus transport itself is an external collaborator whose adapter
//! publishes decoded events into an [`InProcessBus`]. Each cache
//! subscribes once at construction and drains its receivers on spawned
//! listener tasks, so push handling never blocks the notification source.
//!
//! Broadcast channels are bounded; a listener that falls behind sees a
//! lag notice and continues with the newest events. Every handler is
//! idempotent under redelivery, so skipped-then-refetched state converges.
//!
//! [`ValueChanges`] is the outward side: each derived push cache exposes
//! its confirmed "value changed" notifications as a `Stream`, with lag
//! gaps skipped transparently.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures_util::Stream;
use pin_project_lite::pin_project;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;

use crate::types::{HistoricCorrection, LiveTick, ProductionPeriodChange};

/// Default capacity of each broadcast channel.
///
/// Sized for a minutely tick cadence across a large plant: a listener
/// stalled for several seconds still catches up without lag drops.
pub const DEFAULT_BUS_CAPACITY: usize = 256;

/// Subscribe contract for push notifications.
///
/// Each method returns a fresh receiver; subscribing is cheap and
/// per-cache-instance. Implementations fan every event out to all
/// current receivers.
pub trait EventBus: Send + Sync {
    /// Per-machine live value ticks, minutely and sub-minute.
    fn live_ticks(&self) -> broadcast::Receiver<LiveTick>;

    /// Per-machine historic-correction notifications.
    fn corrections(&self) -> broadcast::Receiver<HistoricCorrection>;

    /// Per-machine production-period-change notifications.
    fn period_changes(&self) -> broadcast::Receiver<ProductionPeriodChange>;
}

/// In-process event hub backed by tokio broadcast channels.
///
/// The transport adapter publishes into this; caches subscribe from it.
/// Publishing with no live subscribers is a no-op, not an error.
pub struct InProcessBus {
    ticks: broadcast::Sender<LiveTick>,
    corrections: broadcast::Sender<HistoricCorrection>,
    period_changes: broadcast::Sender<ProductionPeriodChange>,
}

impl InProcessBus {
    /// Create a bus with the default channel capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_BUS_CAPACITY)
    }

    /// Create a bus with a custom per-channel capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        let (ticks, _) = broadcast::channel(capacity);
        let (corrections, _) = broadcast::channel(capacity);
        let (period_changes, _) = broadcast::channel(capacity);
        Self {
            ticks,
            corrections,
            period_changes,
        }
    }

    /// Publish a live tick to all subscribers.
    pub fn publish_tick(&self, tick: LiveTick) {
        let _ = self.ticks.send(tick);
    }

    /// Publish a historic correction to all subscribers.
    pub fn publish_correction(&self, correction: HistoricCorrection) {
        let _ = self.corrections.send(correction);
    }

    /// Publish a production-period change to all subscribers.
    pub fn publish_period_change(&self, change: ProductionPeriodChange) {
        let _ = self.period_changes.send(change);
    }
}

impl Default for InProcessBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus for InProcessBus {
    fn live_ticks(&self) -> broadcast::Receiver<LiveTick> {
        self.ticks.subscribe()
    }

    fn corrections(&self) -> broadcast::Receiver<HistoricCorrection> {
        self.corrections.subscribe()
    }

    fn period_changes(&self) -> broadcast::Receiver<ProductionPeriodChange> {
        self.period_changes.subscribe()
    }
}

pin_project! {
    /// Stream of confirmed "value changed" notifications from a derived
    /// push cache.
    ///
    /// Wraps a broadcast receiver; if the subscriber lags, the missed
    /// notifications are skipped (the stream continues with the newest)
    /// rather than surfacing an error item. Dropping the stream
    /// unsubscribes.
    pub struct ValueChanges<T> {
        #[pin]
        inner: BroadcastStream<T>,
    }
}

impl<T: Clone + Send + 'static> ValueChanges<T> {
    pub(crate) fn new(receiver: broadcast::Receiver<T>) -> Self {
        Self {
            inner: BroadcastStream::new(receiver),
        }
    }
}

impl<T: Clone + Send + 'static> Stream for ValueChanges<T> {
    type Item = T;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();
        loop {
            match this.inner.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(value))) => return Poll::Ready(Some(value)),
                Poll::Ready(Some(Err(BroadcastStreamRecvError::Lagged(skipped)))) => {
                    tracing::debug!(skipped, "value-changes subscriber lagged; skipping");
                }
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use futures_util::StreamExt;

    use crate::types::MachineId;

    #[tokio::test]
    async fn publish_without_subscribers_is_a_noop() {
        let bus = InProcessBus::new();
        bus.publish_tick(LiveTick::minutely("m1", Utc::now()));
    }

    #[tokio::test]
    async fn every_subscriber_sees_every_event() {
        let bus = InProcessBus::new();
        let mut a = bus.live_ticks();
        let mut b = bus.live_ticks();

        bus.publish_tick(LiveTick::minutely("m1", Utc::now()));

        assert_eq!(a.recv().await.unwrap().machine, MachineId::new("m1"));
        assert_eq!(b.recv().await.unwrap().machine, MachineId::new("m1"));
    }

    #[tokio::test]
    async fn value_changes_is_pending_until_a_publish() {
        let (tx, rx) = broadcast::channel(8);
        let mut stream = tokio_test::task::spawn(ValueChanges::new(rx));

        tokio_test::assert_pending!(stream.poll_next());
        tx.send(5u32).unwrap();
        tokio_test::assert_ready_eq!(stream.poll_next(), Some(5));
    }

    #[tokio::test]
    async fn value_changes_skips_lag_gaps() {
        let (tx, rx) = broadcast::channel(2);
        let mut stream = ValueChanges::new(rx);

        // Overflow the 2-slot channel; the oldest item is dropped.
        tx.send(1u32).unwrap();
        tx.send(2).unwrap();
        tx.send(3).unwrap();

        assert_eq!(stream.next().await, Some(2));
        assert_eq!(stream.next().await, Some(3));
        drop(tx);
        assert_eq!(stream.next().await, None);
    }
}
