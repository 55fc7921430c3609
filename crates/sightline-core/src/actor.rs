//! Tokio runtime for the scanner.
//!
//! One task owns the [`DutyCycleScanner`] and drains a single mailbox, so radio
//! callbacks, timer expiries and control calls are handled one at a time.
//! Timers are spawned sleep tasks that post back into the same mailbox; each
//! carries an epoch and deliveries from a cancelled or replaced timer are
//! dropped on arrival.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::config::ScannerConfig;
use crate::error::{Result, SightlineError};
use crate::listeners::{ListenerSet, RssiListener, ScannerListener};
use crate::presence::{lock_ledger, PresenceEntry, SharedLedger};
use crate::radio::{Radio, RadioCallback};
use crate::scanner::{DutyCycleScanner, ScannerEnv, ScannerMessage, ScannerState, TimerKind, Timers};

enum Envelope {
    Message(ScannerMessage),
    Timer { kind: TimerKind, epoch: u64 },
    Tick { epoch: u64 },
    State(oneshot::Sender<ScannerState>),
}

/// [`Timers`] backed by tokio sleep tasks.
pub struct TokioTimers {
    mailbox: mpsc::UnboundedSender<Envelope>,
    oneshot: Option<JoinHandle<()>>,
    ticks: Option<JoinHandle<()>>,
    oneshot_epoch: u64,
    tick_epoch: u64,
}

impl TokioTimers {
    fn new(mailbox: mpsc::UnboundedSender<Envelope>) -> Self {
        Self {
            mailbox,
            oneshot: None,
            ticks: None,
            oneshot_epoch: 0,
            tick_epoch: 0,
        }
    }

    const fn is_current_oneshot(&self, epoch: u64) -> bool {
        self.oneshot.is_some() && self.oneshot_epoch == epoch
    }

    const fn is_current_tick(&self, epoch: u64) -> bool {
        self.ticks.is_some() && self.tick_epoch == epoch
    }
}

impl Timers for TokioTimers {
    fn schedule(&mut self, kind: TimerKind, delay_ms: u64) {
        self.cancel();
        let epoch = self.oneshot_epoch;
        let mailbox = self.mailbox.clone();
        self.oneshot = Some(tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            let _ = mailbox.send(Envelope::Timer { kind, epoch });
        }));
    }

    fn cancel(&mut self) {
        if let Some(task) = self.oneshot.take() {
            task.abort();
        }
        self.oneshot_epoch = self.oneshot_epoch.wrapping_add(1);
    }

    fn start_exit_ticks(&mut self, initial_delay_ms: u64, period_ms: u64) {
        self.stop_exit_ticks();
        let epoch = self.tick_epoch;
        let mailbox = self.mailbox.clone();
        self.ticks = Some(tokio::spawn(async move {
            let start = tokio::time::Instant::now() + Duration::from_millis(initial_delay_ms);
            let mut interval =
                tokio::time::interval_at(start, Duration::from_millis(period_ms.max(1)));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                if mailbox.send(Envelope::Tick { epoch }).is_err() {
                    break;
                }
            }
        }));
    }

    fn stop_exit_ticks(&mut self) {
        if let Some(task) = self.ticks.take() {
            task.abort();
        }
        self.tick_epoch = self.tick_epoch.wrapping_add(1);
    }
}

impl Drop for TokioTimers {
    fn drop(&mut self) {
        self.cancel();
        self.stop_exit_ticks();
    }
}

/// Control handle of a running scanner.
#[derive(Clone)]
pub struct ScannerHandle {
    mailbox: mpsc::UnboundedSender<Envelope>,
    ledger: SharedLedger,
    listeners: Arc<ListenerSet<dyn ScannerListener>>,
    rssi_listeners: Arc<ListenerSet<dyn RssiListener>>,
    cancel: CancellationToken,
}

/// Spawn the scanner task. Must be called from within a tokio runtime.
#[must_use]
pub fn spawn_scanner(config: ScannerConfig, radio: Box<dyn Radio>, env: ScannerEnv) -> ScannerHandle {
    let (tx, rx) = mpsc::unbounded_channel();
    let reports = tx.clone();
    let on_report: RadioCallback = Arc::new(move |report| {
        let _ = reports.send(Envelope::Message(ScannerMessage::Report(report)));
    });

    let scanner = DutyCycleScanner::new(config, radio, TokioTimers::new(tx.clone()), env, on_report);
    let handle = ScannerHandle {
        mailbox: tx,
        ledger: scanner.ledger(),
        listeners: scanner.listeners(),
        rssi_listeners: scanner.rssi_listeners(),
        cancel: CancellationToken::new(),
    };
    tokio::spawn(run(scanner, rx, handle.cancel.clone()));
    handle
}

async fn run(
    mut scanner: DutyCycleScanner<TokioTimers>,
    mut mailbox: mpsc::UnboundedReceiver<Envelope>,
    cancel: CancellationToken,
) {
    loop {
        let envelope = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            envelope = mailbox.recv() => match envelope {
                Some(envelope) => envelope,
                None => break,
            },
        };
        match envelope {
            Envelope::Message(message) => scanner.handle(message),
            Envelope::Timer { kind, epoch } => {
                if scanner.timers().is_current_oneshot(epoch) {
                    scanner.handle(kind.into());
                } else {
                    trace!(?kind, "Dropping cancelled timer");
                }
            }
            Envelope::Tick { epoch } => {
                if scanner.timers().is_current_tick(epoch) {
                    scanner.handle(ScannerMessage::ExitCheck);
                }
            }
            Envelope::State(reply) => {
                let _ = reply.send(scanner.state());
            }
        }
    }
    scanner.handle(ScannerMessage::Stop);
    debug!("Scanner task finished");
}

impl ScannerHandle {
    fn send(&self, message: ScannerMessage) -> Result<()> {
        self.mailbox
            .send(Envelope::Message(message))
            .map_err(|_| SightlineError::ComponentStopped("scanner"))
    }

    /// Begin duty cycling. A no-op if already running.
    ///
    /// # Errors
    ///
    /// Returns [`SightlineError::ComponentStopped`] after shutdown.
    pub fn start(&self) -> Result<()> {
        self.send(ScannerMessage::Start)
    }

    /// Stop scanning and cancel all timers.
    ///
    /// # Errors
    ///
    /// Returns [`SightlineError::ComponentStopped`] after shutdown.
    pub fn stop(&self) -> Result<()> {
        self.send(ScannerMessage::Stop)
    }

    /// Switch to foreground timings.
    ///
    /// # Errors
    ///
    /// Returns [`SightlineError::ComponentStopped`] after shutdown.
    pub fn foreground(&self) -> Result<()> {
        self.send(ScannerMessage::Foreground)
    }

    /// Switch to background timings.
    ///
    /// # Errors
    ///
    /// Returns [`SightlineError::ComponentStopped`] after shutdown.
    pub fn background(&self) -> Result<()> {
        self.send(ScannerMessage::Background)
    }

    /// Forget every present beacon without emitting exits.
    ///
    /// # Errors
    ///
    /// Returns [`SightlineError::ComponentStopped`] after shutdown.
    pub fn clear_cache(&self) -> Result<()> {
        self.send(ScannerMessage::ClearCache)
    }

    /// Replace timings and filters. A running window is shortened or extended
    /// in place.
    ///
    /// # Errors
    ///
    /// Returns [`SightlineError::ComponentStopped`] after shutdown.
    pub fn reconfigure(&self, config: ScannerConfig) -> Result<()> {
        self.send(ScannerMessage::Reconfigure(Box::new(config)))
    }

    /// Current scanner state, answered in mailbox order.
    ///
    /// # Errors
    ///
    /// Returns [`SightlineError::ComponentStopped`] after shutdown.
    pub async fn state(&self) -> Result<ScannerState> {
        let (reply, answer) = oneshot::channel();
        self.mailbox
            .send(Envelope::State(reply))
            .map_err(|_| SightlineError::ComponentStopped("scanner"))?;
        answer
            .await
            .map_err(|_| SightlineError::ComponentStopped("scanner"))
    }

    /// Snapshot of present beacons.
    #[must_use]
    pub fn presence(&self) -> Vec<PresenceEntry> {
        lock_ledger(&self.ledger).snapshot()
    }

    /// Register an entry/exit listener.
    pub fn add_listener(&self, listener: Arc<dyn ScannerListener>) {
        self.listeners.add(listener);
    }

    /// Unregister an entry/exit listener.
    pub fn remove_listener(&self, listener: &Arc<dyn ScannerListener>) -> bool {
        self.listeners.remove(listener)
    }

    /// Register a signal update listener.
    pub fn add_rssi_listener(&self, listener: Arc<dyn RssiListener>) {
        self.rssi_listeners.add(listener);
    }

    /// Unregister a signal update listener.
    pub fn remove_rssi_listener(&self, listener: &Arc<dyn RssiListener>) -> bool {
        self.rssi_listeners.remove(listener)
    }

    /// Stop the scanner task. Later calls fail with `ComponentStopped`.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}
