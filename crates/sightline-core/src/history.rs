//! Delivery history and suppression.
//!
//! The [`HistoryLedger`] buffers three kinds of records until the backend
//! acknowledges them: scan events, presented actions and conversion statuses.
//! Each record gets a sequence number when buffered; an upload removes only
//! the records whose numbers were part of the snapshot, so anything buffered
//! while the request is in flight waits for the next batch. A failed upload
//! leaves the buffers untouched.
//!
//! The ledger also owns the suppression store consulted before delivery.
//! Buffers and suppression store are written through to the durable store on
//! every mutation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::clock::Millis;
use crate::error::{Result, SightlineError};
use crate::storage::{load_json_or_default, save_json, DurableStore};
use crate::transport::Transport;
use crate::types::{ActionRecord, ConversionRecord, HistoryBatch, ResolvedAction, ScanEvent};

/// Durable store key of buffers and suppression store.
pub const HISTORY_KEY: &str = "history.buffer";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Sequenced<T> {
    seq: u64,
    record: T,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct HistoryState {
    next_seq: u64,
    scans: Vec<Sequenced<ScanEvent>>,
    actions: Vec<Sequenced<ActionRecord>>,
    conversions: Vec<Sequenced<ConversionRecord>>,
    /// Last presentation time per logical action.
    last_presented: HashMap<Uuid, Millis>,
}

impl HistoryState {
    fn take_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    fn batch(&self) -> HistoryBatch {
        HistoryBatch {
            scans: self.scans.iter().map(|s| s.record.clone()).collect(),
            actions: self.actions.iter().map(|s| s.record.clone()).collect(),
            conversions: self.conversions.iter().map(|s| s.record.clone()).collect(),
        }
    }
}

/// Buffer sizes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct HistoryCounts {
    /// Buffered scan events.
    #[schema(example = 3)]
    pub scans: usize,
    /// Buffered action records.
    #[schema(example = 1)]
    pub actions: usize,
    /// Buffered conversion records.
    #[schema(example = 1)]
    pub conversions: usize,
    /// Actions tracked by the suppression store.
    #[schema(example = 4)]
    pub suppression_keys: usize,
}

/// Persisted history buffers plus suppression store.
pub struct HistoryLedger {
    state: Mutex<HistoryState>,
    store: Arc<dyn DurableStore>,
}

impl HistoryLedger {
    /// Restore the ledger from `store`. A corrupt record starts empty.
    #[must_use]
    pub fn open(store: Arc<dyn DurableStore>) -> Self {
        let state: HistoryState = load_json_or_default(store.as_ref(), HISTORY_KEY);
        Self {
            state: Mutex::new(state),
            store,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HistoryState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn persist(&self, state: &HistoryState) {
        if let Err(e) = save_json(self.store.as_ref(), HISTORY_KEY, state) {
            warn!(error = %e, "Failed to persist history");
        }
    }

    /// Buffer a scan event.
    pub fn record_scan(&self, event: &ScanEvent) {
        let mut state = self.lock();
        let seq = state.take_seq();
        state.scans.push(Sequenced {
            seq,
            record: event.clone(),
        });
        self.persist(&state);
    }

    /// Buffer the presentation of `action`.
    pub fn record_action(&self, action: &ResolvedAction, timestamp: Millis, location_hint: Option<String>) {
        let record = ActionRecord {
            action_uuid: action.uuid,
            instance_uuid: action.instance_uuid,
            beacon_id: action.beacon_id.clone(),
            is_entry: action.is_entry,
            pairing_id: action.pairing_id,
            timestamp,
            location_hint,
        };
        let mut state = self.lock();
        let seq = state.take_seq();
        state.actions.push(Sequenced { seq, record });
        self.persist(&state);
    }

    /// Buffer a conversion status.
    ///
    /// A buffered status for the same instance is replaced only by a higher
    /// ranked one. Returns whether the record was accepted.
    pub fn record_conversion(&self, record: ConversionRecord) -> bool {
        let mut state = self.lock();
        let existing = state
            .conversions
            .iter()
            .position(|c| c.record.action_instance_uuid == record.action_instance_uuid);
        if let Some(index) = existing {
            let current = state.conversions[index].record.kind;
            if record.kind < current {
                warn!(
                    instance = %record.action_instance_uuid,
                    from = ?current,
                    to = ?record.kind,
                    "Dropping conversion downgrade"
                );
                return false;
            }
            if record.kind == current {
                debug!(instance = %record.action_instance_uuid, kind = ?current, "Conversion already recorded");
                return false;
            }
            state.conversions.remove(index);
        }
        let seq = state.take_seq();
        state.conversions.push(Sequenced { seq, record });
        self.persist(&state);
        true
    }

    /// Apply the suppression policy to `action` at `now`.
    ///
    /// On the allowed path the presentation time is stored before returning,
    /// so a concurrent check for the same action sees it.
    pub fn should_deliver(&self, action: &ResolvedAction, now: Millis) -> bool {
        let tracked = action.send_only_once || action.suppression_window_ms > 0;
        if !tracked {
            return true;
        }
        let mut state = self.lock();
        if let Some(&last) = state.last_presented.get(&action.uuid) {
            if action.send_only_once {
                debug!(action = %action.uuid, "Suppressed, already delivered once");
                return false;
            }
            if last >= now.saturating_sub(action.suppression_window_ms) {
                debug!(action = %action.uuid, last, "Suppressed, inside window");
                return false;
            }
        }
        state.last_presented.insert(action.uuid, now);
        self.persist(&state);
        true
    }

    /// Upload everything buffered at call time.
    ///
    /// Returns the number of records acknowledged.
    ///
    /// # Errors
    ///
    /// Returns the transport failure; the buffers are left as they were.
    pub async fn upload(&self, transport: &dyn Transport) -> Result<usize> {
        let (batch, high_water) = {
            let state = self.lock();
            (state.batch(), state.next_seq)
        };
        if batch.is_empty() {
            return Ok(0);
        }

        if let Err(e) = transport.upload_history(&batch).await {
            let err = SightlineError::from(e);
            debug!(error = %err, records = batch.len(), "History upload failed, keeping buffers");
            return Err(err);
        }

        let mut state = self.lock();
        state.scans.retain(|s| s.seq >= high_water);
        state.actions.retain(|s| s.seq >= high_water);
        state.conversions.retain(|s| s.seq >= high_water);
        self.persist(&state);
        info!(records = batch.len(), "History uploaded");
        Ok(batch.len())
    }

    /// Wipe buffers and suppression store.
    pub fn purge(&self) {
        let mut state = self.lock();
        // Keep numbering monotonic so an in-flight upload cannot remove new records.
        let next_seq = state.next_seq;
        *state = HistoryState {
            next_seq,
            ..HistoryState::default()
        };
        self.persist(&state);
        info!("History purged");
    }

    /// Current buffer sizes.
    #[must_use]
    pub fn counts(&self) -> HistoryCounts {
        let state = self.lock();
        HistoryCounts {
            scans: state.scans.len(),
            actions: state.actions.len(),
            conversions: state.conversions.len(),
            suppression_keys: state.last_presented.len(),
        }
    }

    /// Copy of everything buffered.
    #[must_use]
    pub fn snapshot(&self) -> HistoryBatch {
        self.lock().batch()
    }
}

enum PublisherRequest {
    Fire,
    Wait(oneshot::Sender<Result<usize>>),
    Interval(Duration),
}

fn upload_ticker(period: Duration) -> tokio::time::Interval {
    let period = period.max(Duration::from_millis(1));
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker
}

/// Serializes history uploads: periodic and on demand.
#[derive(Clone)]
pub struct HistoryPublisher {
    requests: mpsc::UnboundedSender<PublisherRequest>,
    cancel: CancellationToken,
}

impl HistoryPublisher {
    /// Spawn the publisher. Must be called from within a tokio runtime.
    #[must_use]
    pub fn spawn(ledger: Arc<HistoryLedger>, transport: Arc<dyn Transport>, interval: Duration) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        tokio::spawn(async move {
            let mut ticker = upload_ticker(interval);
            loop {
                let request = tokio::select! {
                    biased;
                    () = token.cancelled() => break,
                    request = rx.recv() => match request {
                        Some(request) => request,
                        None => break,
                    },
                    _ = ticker.tick() => PublisherRequest::Fire,
                };
                let reply = match request {
                    PublisherRequest::Fire => None,
                    PublisherRequest::Wait(reply) => Some(reply),
                    PublisherRequest::Interval(period) => {
                        debug!(interval = ?period, "History upload interval changed");
                        ticker = upload_ticker(period);
                        continue;
                    }
                };
                let outcome = ledger.upload(transport.as_ref()).await;
                if let Some(reply) = reply {
                    let _ = reply.send(outcome);
                }
            }
            debug!("History publisher finished");
        });

        Self {
            requests: tx,
            cancel,
        }
    }

    /// Request an upload without waiting for it.
    ///
    /// # Errors
    ///
    /// Returns [`SightlineError::ComponentStopped`] after shutdown.
    pub fn flush(&self) -> Result<()> {
        self.requests
            .send(PublisherRequest::Fire)
            .map_err(|_| SightlineError::ComponentStopped("history publisher"))
    }

    /// Request an upload and wait for its outcome.
    ///
    /// # Errors
    ///
    /// Returns the upload failure, or [`SightlineError::ComponentStopped`]
    /// after shutdown.
    pub async fn flush_and_wait(&self) -> Result<usize> {
        let (reply, outcome) = oneshot::channel();
        self.requests
            .send(PublisherRequest::Wait(reply))
            .map_err(|_| SightlineError::ComponentStopped("history publisher"))?;
        outcome
            .await
            .map_err(|_| SightlineError::ComponentStopped("history publisher"))?
    }

    /// Change the upload period. The next periodic upload is one full period away.
    ///
    /// # Errors
    ///
    /// Returns [`SightlineError::ComponentStopped`] after shutdown.
    pub fn set_interval(&self, interval: Duration) -> Result<()> {
        self.requests
            .send(PublisherRequest::Interval(interval))
            .map_err(|_| SightlineError::ComponentStopped("history publisher"))
    }

    /// Stop the publisher.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}
