//! Delayed delivery.
//!
//! Actions carrying an absolute `deliver_at` or a positive `delay_ms` are
//! parked here until due. The pending list is persisted after every change so
//! a restarted process still delivers them; anything that fell due while the
//! process was down is delivered as soon as the runner starts.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::clock::{Clock, Millis};
use crate::storage::{load_json_or_default, save_json, DurableStore};
use crate::types::ResolvedAction;

/// Durable store key of the pending list.
pub const PENDING_KEY: &str = "delivery.pending";

/// Receives actions ready to be presented.
pub trait DeliverySink: Send + Sync {
    /// Hand `action` to the host. Must not block.
    fn deliver(&self, action: ResolvedAction);
}

/// An action waiting for its delivery time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingDelivery {
    /// When the action becomes due.
    pub due_at: Millis,
    /// The parked action.
    pub action: ResolvedAction,
}

/// When `action` must be delivered, or `None` for immediately.
///
/// An absolute time wins over a relative delay; the delay counts from resolution.
#[must_use]
pub fn delivery_time(action: &ResolvedAction) -> Option<Millis> {
    action.deliver_at.or_else(|| {
        (action.delay_ms > 0).then(|| action.resolved_at.saturating_add(action.delay_ms))
    })
}

/// Persisted queue of delayed deliveries.
pub struct DeliveryScheduler {
    pending: Mutex<Vec<PendingDelivery>>,
    store: Arc<dyn DurableStore>,
    wake: Notify,
}

impl DeliveryScheduler {
    /// Restore the pending list from `store`.
    #[must_use]
    pub fn open(store: Arc<dyn DurableStore>) -> Self {
        let pending: Vec<PendingDelivery> = load_json_or_default(store.as_ref(), PENDING_KEY);
        if !pending.is_empty() {
            debug!(count = pending.len(), "Restored pending deliveries");
        }
        Self {
            pending: Mutex::new(pending),
            store,
            wake: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<PendingDelivery>> {
        match self.pending.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn persist(&self, pending: &[PendingDelivery]) {
        if let Err(e) = save_json(self.store.as_ref(), PENDING_KEY, pending) {
            warn!(error = %e, "Failed to persist pending deliveries");
        }
    }

    /// Park `action` until `due_at`. Scheduling the same instance again moves it.
    pub fn schedule(&self, due_at: Millis, action: ResolvedAction) {
        {
            let mut pending = self.lock();
            pending.retain(|p| p.action.instance_uuid != action.instance_uuid);
            pending.push(PendingDelivery { due_at, action });
            pending.sort_by_key(|p| p.due_at);
            self.persist(&pending);
        }
        self.wake.notify_one();
    }

    /// Remove and return every action due at `now`, earliest first.
    pub fn take_due(&self, now: Millis) -> Vec<ResolvedAction> {
        let mut pending = self.lock();
        let split = pending.partition_point(|p| p.due_at <= now);
        if split == 0 {
            return Vec::new();
        }
        let due: Vec<ResolvedAction> = pending.drain(..split).map(|p| p.action).collect();
        self.persist(&pending);
        due
    }

    /// Drop a parked action. Returns whether it was pending.
    pub fn cancel(&self, instance_uuid: Uuid) -> bool {
        let mut pending = self.lock();
        let before = pending.len();
        pending.retain(|p| p.action.instance_uuid != instance_uuid);
        let removed = pending.len() != before;
        if removed {
            self.persist(&pending);
        }
        removed
    }

    /// Earliest due time, if anything is pending.
    #[must_use]
    pub fn next_due(&self) -> Option<Millis> {
        self.lock().first().map(|p| p.due_at)
    }

    /// Copy of the pending list, earliest first.
    #[must_use]
    pub fn pending(&self) -> Vec<PendingDelivery> {
        self.lock().clone()
    }

    /// Number of parked actions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether nothing is parked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Drop everything.
    pub fn clear(&self) {
        let mut pending = self.lock();
        pending.clear();
        self.persist(&pending);
    }
}

/// Run the delivery loop until `cancel` fires.
#[must_use]
pub fn spawn_delivery(
    scheduler: Arc<DeliveryScheduler>,
    sink: Arc<dyn DeliverySink>,
    clock: Arc<dyn Clock>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let now = clock.now_millis();
            for action in scheduler.take_due(now) {
                debug!(action = %action.uuid, instance = %action.instance_uuid, "Delivering delayed action");
                sink.deliver(action);
            }

            let sleep_for = scheduler
                .next_due()
                .map(|due| Duration::from_millis(due.saturating_sub(now)));
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                () = scheduler.wake.notified() => {}
                () = sleep_or_forever(sleep_for) => {}
            }
        }
        debug!("Delivery task finished");
    })
}

async fn sleep_or_forever(duration: Option<Duration>) {
    match duration {
        Some(duration) => tokio::time::sleep(duration).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use crate::testing::{beacon, descriptor, event, TokioClock};
    use crate::types::Trigger;

    #[derive(Default)]
    struct Collect(Mutex<Vec<ResolvedAction>>);

    impl DeliverySink for Collect {
        fn deliver(&self, action: ResolvedAction) {
            self.0.lock().unwrap().push(action);
        }
    }

    fn action(resolved_at: Millis, delay_ms: u64, deliver_at: Option<Millis>) -> ResolvedAction {
        let mut d = descriptor(Trigger::Entry);
        d.delay_ms = delay_ms;
        d.deliver_at = deliver_at;
        ResolvedAction::from_descriptor(d, &event(beacon(1), true, Uuid::new_v4(), 0), resolved_at)
    }

    #[test]
    fn test_delivery_time_precedence() {
        assert_eq!(delivery_time(&action(100, 0, None)), None);
        assert_eq!(delivery_time(&action(100, 50, None)), Some(150));
        assert_eq!(delivery_time(&action(100, 50, Some(1_000))), Some(1_000));
    }

    #[test]
    fn test_reschedule_dedups_on_instance() {
        let scheduler = DeliveryScheduler::open(Arc::new(MemoryStore::new()));
        let a = action(0, 0, None);
        scheduler.schedule(500, a.clone());
        scheduler.schedule(200, a.clone());

        let pending = scheduler.pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].due_at, 200);
        assert!(scheduler.cancel(a.instance_uuid));
        assert!(scheduler.is_empty());
    }

    #[test]
    fn test_take_due_is_ordered_and_partial() {
        let scheduler = DeliveryScheduler::open(Arc::new(MemoryStore::new()));
        let late = action(0, 0, None);
        let early = action(0, 0, None);
        scheduler.schedule(300, late.clone());
        scheduler.schedule(100, early.clone());

        assert!(scheduler.take_due(99).is_empty());
        let due = scheduler.take_due(300);
        assert_eq!(
            due.iter().map(|a| a.instance_uuid).collect::<Vec<_>>(),
            vec![early.instance_uuid, late.instance_uuid]
        );
        assert_eq!(scheduler.next_due(), None);
    }

    #[test]
    fn test_pending_survives_reopen() {
        let store: Arc<dyn DurableStore> = Arc::new(MemoryStore::new());
        let a = action(0, 0, None);
        DeliveryScheduler::open(Arc::clone(&store)).schedule(1_000, a.clone());

        let reopened = DeliveryScheduler::open(store);
        assert_eq!(reopened.pending()[0].action, a);
    }

    #[tokio::test(start_paused = true)]
    async fn test_runner_delivers_when_due() {
        let scheduler = Arc::new(DeliveryScheduler::open(Arc::new(MemoryStore::new())));
        let sink = Arc::new(Collect::default());
        let clock = Arc::new(TokioClock::new(10_000));
        let cancel = CancellationToken::new();
        let _task = spawn_delivery(scheduler.clone(), sink.clone(), clock, cancel.clone());

        let a = action(10_000, 2_000, None);
        scheduler.schedule(delivery_time(&a).unwrap(), a.clone());

        tokio::time::sleep(Duration::from_millis(1_900)).await;
        assert!(sink.0.lock().unwrap().is_empty());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(sink.0.lock().unwrap().len(), 1);
        assert!(scheduler.is_empty());
        cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_overdue_entries_fire_on_start() {
        let store: Arc<dyn DurableStore> = Arc::new(MemoryStore::new());
        DeliveryScheduler::open(Arc::clone(&store)).schedule(5_000, action(0, 5_000, None));

        let scheduler = Arc::new(DeliveryScheduler::open(store));
        let sink = Arc::new(Collect::default());
        let cancel = CancellationToken::new();
        let _task = spawn_delivery(
            scheduler,
            sink.clone(),
            Arc::new(TokioClock::new(60_000)),
            cancel.clone(),
        );

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(sink.0.lock().unwrap().len(), 1);
        cancel.cancel();
    }
}
