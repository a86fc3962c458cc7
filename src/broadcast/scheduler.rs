//! Periodic broadcast of pending fragments
//!
//! The scheduler is purely time driven: the ingest thread never signals it.
//! A fragment waits at most one period in the store before it is published,
//! and most firings drain nothing.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::segment::SegmentStore;
use crate::stats::RelayMetrics;

use super::channel::BroadcastChannel;

/// Default firing period
pub const DEFAULT_BROADCAST_INTERVAL: Duration = Duration::from_millis(40);

/// What a single firing did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Fragments published
    pub fragments: usize,
    /// Bytes published
    pub bytes: usize,
    /// Subscribers at the time of publishing
    pub receivers: usize,
}

/// Moves fragments from the store to the broadcast channel on a timer
pub struct BroadcastScheduler {
    store: Arc<SegmentStore>,
    channel: BroadcastChannel,
    metrics: Arc<RelayMetrics>,
    interval: Duration,
}

impl BroadcastScheduler {
    /// Create a scheduler firing every [`DEFAULT_BROADCAST_INTERVAL`]
    pub fn new(
        store: Arc<SegmentStore>,
        channel: BroadcastChannel,
        metrics: Arc<RelayMetrics>,
    ) -> Self {
        Self {
            store,
            channel,
            metrics,
            interval: DEFAULT_BROADCAST_INTERVAL,
        }
    }

    /// Set the firing period (at least 1ms)
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval.max(Duration::from_millis(1));
        self
    }

    /// Get the firing period
    pub fn period(&self) -> Duration {
        self.interval
    }

    /// Fire once: drain the store and publish every fragment in order
    pub fn tick(&self) -> TickReport {
        let fragments = self.store.drain_all();
        if fragments.is_empty() {
            return TickReport {
                receivers: self.channel.subscriber_count(),
                ..TickReport::default()
            };
        }

        let mut report = TickReport {
            fragments: fragments.len(),
            ..TickReport::default()
        };

        for fragment in fragments {
            report.bytes += fragment.len();
            report.receivers = self.channel.publish(fragment);
        }

        self.metrics
            .record_publish(report.fragments as u64, report.bytes as u64);

        tracing::trace!(
            channel = self.channel.name(),
            fragments = report.fragments,
            bytes = report.bytes,
            receivers = report.receivers,
            "Published fragments"
        );

        report
    }

    /// Spawn the timer loop on the current runtime
    ///
    /// Late firings are not compensated: after a stall the next firing is
    /// one full period later. Abort the returned handle to stop.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            tracing::debug!(
                channel = self.channel.name(),
                interval_ms = self.interval.as_millis() as u64,
                "Broadcast scheduler started"
            );

            loop {
                ticker.tick().await;
                self.tick();
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::broadcast::channel::Delivery;

    fn setup() -> (Arc<SegmentStore>, BroadcastChannel, BroadcastScheduler) {
        let store = Arc::new(SegmentStore::new());
        let channel = BroadcastChannel::default();
        let scheduler = BroadcastScheduler::new(
            Arc::clone(&store),
            channel.clone(),
            Arc::new(RelayMetrics::new()),
        );
        (store, channel, scheduler)
    }

    #[tokio::test]
    async fn test_tick_publishes_in_order() {
        let (store, channel, scheduler) = setup();
        let mut first = channel.subscribe();
        let mut second = channel.subscribe();

        store.append(b"AAAA");
        store.mark_ready().unwrap();
        store.append(b"BB");
        store.append(b"CC");

        let report = scheduler.tick();
        assert_eq!(
            report,
            TickReport {
                fragments: 2,
                bytes: 4,
                receivers: 2
            }
        );

        for sub in [&mut first, &mut second] {
            assert_eq!(sub.recv().await, Delivery::Payload(Bytes::from_static(b"BB")));
            assert_eq!(sub.recv().await, Delivery::Payload(Bytes::from_static(b"CC")));
        }
    }

    #[test]
    fn test_empty_tick() {
        let (store, _channel, scheduler) = setup();

        // Before ready, appends never reach the queue
        store.append(b"init");
        assert_eq!(scheduler.tick().fragments, 0);

        store.mark_ready().unwrap();
        assert_eq!(scheduler.tick(), TickReport::default());
    }

    #[test]
    fn test_tick_without_subscribers_drains() {
        let (store, _channel, scheduler) = setup();
        store.mark_ready().unwrap();
        store.append(b"unseen");

        let report = scheduler.tick();

        assert_eq!(report.fragments, 1);
        assert_eq!(report.receivers, 0);
        // Drained even though nobody was listening
        assert!(store.drain_all().is_empty());
    }

    #[tokio::test]
    async fn test_tick_records_metrics() {
        let store = Arc::new(SegmentStore::new());
        let metrics = Arc::new(RelayMetrics::new());
        let scheduler = BroadcastScheduler::new(
            Arc::clone(&store),
            BroadcastChannel::default(),
            Arc::clone(&metrics),
        );

        store.mark_ready().unwrap();
        store.append(b"12345");
        scheduler.tick();

        let stats = metrics.snapshot();
        assert_eq!(stats.fragments_published, 1);
        assert_eq!(stats.bytes_published, 5);
    }

    #[test]
    fn test_interval_floor() {
        let (_store, _channel, scheduler) = setup();

        let scheduler = scheduler.interval(Duration::ZERO);
        assert_eq!(scheduler.period(), Duration::from_millis(1));
    }

    #[tokio::test]
    async fn test_spawned_scheduler_delivers() {
        let (store, channel, scheduler) = setup();
        let mut sub = channel.subscribe();

        let handle = scheduler.interval(Duration::from_millis(5)).spawn();

        store.mark_ready().unwrap();
        store.append(b"live");

        let delivery = tokio::time::timeout(Duration::from_secs(5), sub.recv())
            .await
            .unwrap();
        assert_eq!(delivery, Delivery::Payload(Bytes::from_static(b"live")));

        handle.abort();
    }
}
