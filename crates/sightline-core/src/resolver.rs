//! Event resolution.
//!
//! The [`Resolver`] turns each [`ScanEvent`] into zero or more
//! [`ResolvedAction`]s by asking the backend, retrying transient failures a
//! bounded number of times. Events for one beacon are resolved strictly in
//! arrival order; different beacons resolve concurrently.
//!
//! Every accepted event produces exactly one listener callback, either
//! [`ResolverListener::on_resolved`] or [`ResolverListener::on_resolution_failed`].

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace};

use crate::beacon::BeaconId;
use crate::clock::Clock;
use crate::config::ResolverConfig;
use crate::error::{Result, SightlineError};
use crate::listeners::{ListenerSet, ResolverListener};
use crate::transport::{Transport, TransportResult};
use crate::types::{ActionDescriptor, ResolvedAction, ScanEvent};

/// Proximity UUIDs the backend is interested in.
///
/// An empty layout accepts every beacon.
#[derive(Debug, Clone, Default)]
pub struct LayoutFilter {
    uuids: Arc<RwLock<HashSet<String>>>,
}

impl LayoutFilter {
    /// Whether events of `beacon` are worth resolving.
    #[must_use]
    pub fn accepts(&self, beacon: &BeaconId) -> bool {
        let uuids = match self.uuids.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if uuids.is_empty() {
            return true;
        }
        beacon
            .normalized_uuid()
            .map_or(true, |uuid| uuids.contains(&uuid))
    }

    /// Replace the layout. UUIDs are compared without dashes, case-insensitively.
    pub fn replace<I, S>(&self, uuids: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let normalized: HashSet<String> = uuids
            .into_iter()
            .map(|u| u.as_ref().replace('-', "").to_ascii_lowercase())
            .collect();
        let mut guard = match self.uuids.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = normalized;
    }

    /// Number of UUIDs in the layout.
    #[must_use]
    pub fn len(&self) -> usize {
        match self.uuids.read() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    /// Whether the layout is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

enum Command {
    Resolve(ScanEvent),
    Completed {
        event: ScanEvent,
        attempt: u32,
        outcome: TransportResult<Vec<ActionDescriptor>>,
    },
    Retry {
        event: ScanEvent,
        attempt: u32,
    },
    Configure(ResolverConfig),
}

/// Handle to the resolver actor.
#[derive(Clone)]
pub struct Resolver {
    mailbox: mpsc::UnboundedSender<Command>,
    transport: Arc<dyn Transport>,
    listeners: Arc<ListenerSet<dyn ResolverListener>>,
    layout: LayoutFilter,
    stopped: Arc<AtomicBool>,
    cancel: CancellationToken,
}

impl Resolver {
    /// Spawn the resolver. Must be called from within a tokio runtime.
    #[must_use]
    pub fn spawn(config: ResolverConfig, transport: Arc<dyn Transport>, clock: Arc<dyn Clock>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let resolver = Self {
            mailbox: tx.clone(),
            transport: Arc::clone(&transport),
            listeners: Arc::new(ListenerSet::new()),
            layout: LayoutFilter::default(),
            stopped: Arc::new(AtomicBool::new(false)),
            cancel: CancellationToken::new(),
        };
        let actor = ResolverActor {
            config,
            transport,
            clock,
            mailbox: tx,
            listeners: Arc::clone(&resolver.listeners),
            stopped: Arc::clone(&resolver.stopped),
            queues: HashMap::new(),
        };
        tokio::spawn(actor.run(rx, resolver.cancel.clone()));
        resolver
    }

    /// Queue `event` for resolution.
    ///
    /// # Errors
    ///
    /// Returns [`SightlineError::ComponentStopped`] after shutdown.
    pub fn resolve(&self, event: ScanEvent) -> Result<()> {
        self.mailbox
            .send(Command::Resolve(event))
            .map_err(|_| SightlineError::ComponentStopped("resolver"))
    }

    /// Replace the retry policy. Attempts already counted keep their count.
    ///
    /// # Errors
    ///
    /// Returns [`SightlineError::ComponentStopped`] after shutdown.
    pub fn reconfigure(&self, config: ResolverConfig) -> Result<()> {
        self.mailbox
            .send(Command::Configure(config))
            .map_err(|_| SightlineError::ComponentStopped("resolver"))
    }

    /// Register a resolution listener.
    pub fn add_listener(&self, listener: Arc<dyn ResolverListener>) {
        self.listeners.add(listener);
    }

    /// Unregister a resolution listener.
    pub fn remove_listener(&self, listener: &Arc<dyn ResolverListener>) -> bool {
        self.listeners.remove(listener)
    }

    /// Shared layout pre-filter.
    #[must_use]
    pub fn layout(&self) -> LayoutFilter {
        self.layout.clone()
    }

    /// Fetch the current layout from the backend.
    ///
    /// Returns the number of proximity UUIDs now in the layout.
    ///
    /// # Errors
    ///
    /// Returns the transport failure; the previous layout is kept.
    pub async fn refresh_layout(&self) -> Result<usize> {
        let uuids = self.transport.fetch_layout().await?;
        self.layout.replace(&uuids);
        info!(count = uuids.len(), "Beacon layout refreshed");
        Ok(self.layout.len())
    }

    /// Allow retries to be scheduled again.
    pub fn start(&self) {
        self.stopped.store(false, Ordering::SeqCst);
    }

    /// Stop scheduling retries. Responses already in flight are still delivered.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    /// Whether retries are currently suppressed.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Terminate the actor. Later calls fail with `ComponentStopped`.
    pub fn shutdown(&self) {
        self.stop();
        self.cancel.cancel();
    }
}

struct ResolverActor {
    config: ResolverConfig,
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
    mailbox: mpsc::UnboundedSender<Command>,
    listeners: Arc<ListenerSet<dyn ResolverListener>>,
    stopped: Arc<AtomicBool>,
    /// Per-beacon FIFO. The head is the event currently being resolved.
    queues: HashMap<BeaconId, VecDeque<ScanEvent>>,
}

impl ResolverActor {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>, cancel: CancellationToken) {
        loop {
            let command = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                command = rx.recv() => match command {
                    Some(command) => command,
                    None => break,
                },
            };
            match command {
                Command::Resolve(event) => self.enqueue(event),
                Command::Completed {
                    event,
                    attempt,
                    outcome,
                } => self.on_completed(event, attempt, outcome),
                Command::Retry { event, attempt } => self.on_retry(event, attempt),
                Command::Configure(config) => {
                    debug!(max_retries = config.max_retries, retry_delay_ms = config.retry_delay_ms, "Resolver reconfigured");
                    self.config = config;
                }
            }
        }
        debug!("Resolver task finished");
    }

    fn enqueue(&mut self, event: ScanEvent) {
        let queue = self.queues.entry(event.beacon_id.clone()).or_default();
        let duplicate = queue
            .iter()
            .any(|q| q.pairing_id == event.pairing_id && q.is_entry == event.is_entry);
        if duplicate {
            debug!(beacon = %event.beacon_id, pairing_id = %event.pairing_id, "Coalescing duplicate event");
            return;
        }
        queue.push_back(event.clone());
        if queue.len() == 1 {
            self.dispatch(event, 0);
        } else {
            trace!(beacon = %event.beacon_id, queued = queue.len(), "Event queued behind in-flight resolution");
        }
    }

    fn dispatch(&self, event: ScanEvent, attempt: u32) {
        let transport = Arc::clone(&self.transport);
        let mailbox = self.mailbox.clone();
        tokio::spawn(async move {
            let outcome = transport.resolve(&event).await;
            let _ = mailbox.send(Command::Completed {
                event,
                attempt,
                outcome,
            });
        });
    }

    fn on_completed(
        &mut self,
        event: ScanEvent,
        attempt: u32,
        outcome: TransportResult<Vec<ActionDescriptor>>,
    ) {
        match outcome {
            Ok(descriptors) => {
                let now = self.clock.now_millis();
                let actions: Vec<ResolvedAction> = descriptors
                    .into_iter()
                    .filter(|d| d.trigger.matches(event.is_entry))
                    .map(|d| ResolvedAction::from_descriptor(d, &event, now))
                    .collect();
                debug!(beacon = %event.beacon_id, is_entry = event.is_entry, actions = actions.len(), "Event resolved");
                self.listeners.for_each(|l| l.on_resolved(&event, &actions));
                self.finish(&event.beacon_id);
            }
            Err(e) => {
                let retry = e.is_transient()
                    && attempt < self.config.max_retries
                    && !self.stopped.load(Ordering::SeqCst);
                if retry {
                    debug!(beacon = %event.beacon_id, attempt, error = %e, "Resolution failed, retrying");
                    let mailbox = self.mailbox.clone();
                    let delay = Duration::from_millis(self.config.retry_delay_ms);
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        let _ = mailbox.send(Command::Retry {
                            event,
                            attempt: attempt + 1,
                        });
                    });
                } else {
                    self.fail(&event, &SightlineError::from(e));
                }
            }
        }
    }

    fn on_retry(&mut self, event: ScanEvent, attempt: u32) {
        if self.stopped.load(Ordering::SeqCst) {
            self.fail(&event, &SightlineError::ComponentStopped("resolver"));
            return;
        }
        self.dispatch(event, attempt);
    }

    fn fail(&mut self, event: &ScanEvent, err: &SightlineError) {
        if err.is_permanent_input() {
            error!(beacon = %event.beacon_id, error = %err, "Resolution abandoned");
        } else {
            debug!(beacon = %event.beacon_id, error = %err, "Resolution abandoned");
        }
        self.listeners
            .for_each(|l| l.on_resolution_failed(event, err));
        self.finish(&event.beacon_id);
    }

    fn finish(&mut self, beacon: &BeaconId) {
        let Some(queue) = self.queues.get_mut(beacon) else {
            return;
        };
        queue.pop_front();
        match queue.front() {
            Some(next) => {
                let next = next.clone();
                self.dispatch(next, 0);
            }
            None => {
                self.queues.remove(beacon);
            }
        }
    }
}
