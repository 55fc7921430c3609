//! Duty-cycled presence detection.
//!
//! [`DutyCycleScanner`] turns a noisy stream of sightings into discrete entry
//! and exit events while alternating the radio between a scan window and a
//! wait window:
//!
//! ```text
//! STOPPED --start--> SCAN_REQUESTED --un-pause--> SCANNING <--> PAUSED
//!    ^                                                 |          |
//!    +--------------------------stop-------------------+----------+
//! ```
//!
//! The scanner is a plain synchronous state machine driven by
//! [`ScannerMessage`]s. It never sleeps; time-based transitions are requested
//! through the [`Timers`] port and come back as messages. The tokio runtime in
//! [`crate::actor`] owns the scanner and serializes every message through one
//! mailbox.
//!
//! Exit detection counts radio-on absence only: each entry accumulates the
//! radio-off time since it was last seen and an exit fires once
//! `now - last_seen_at - accumulated_pause > exit_timeout`.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::clock::{Clock, Millis};
use crate::config::ScannerConfig;
use crate::error::SightlineError;
use crate::listeners::{ListenerSet, RssiListener, ScannerListener};
use crate::location::LocationSource;
use crate::presence::{lock_ledger, PresenceEntry, PresenceLedger, SharedLedger};
use crate::radio::{estimate_distance, Radio, RadioCallback, RadioReport, Sighting};
use crate::storage::{load_json_or_default, save_json, DurableStore};
use crate::types::{ScanEvent, SignalMetadata, Trigger};

/// Durable store key of the stop/pause marks.
pub const MARKS_KEY: &str = "scanner.marks";

/// Scanner lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ScannerState {
    /// Radio off, no timers.
    Stopped,
    /// Start accepted, first scan window pending.
    ScanRequested,
    /// Radio on, pause timer armed.
    Scanning,
    /// Radio off, wake timer armed.
    Paused,
}

/// One-shot timers the scanner arms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// End of a scan window.
    Pause,
    /// End of a wait window.
    UnPause,
}

/// Everything the scanner reacts to.
#[derive(Debug, Clone)]
pub enum ScannerMessage {
    /// Begin duty cycling.
    Start,
    /// Stop the radio and cancel all timers.
    Stop,
    /// Scan window elapsed.
    Pause,
    /// Wait window elapsed.
    UnPause,
    /// Periodic exit check.
    ExitCheck,
    /// Radio callback output.
    Report(RadioReport),
    /// Host application moved to the foreground.
    Foreground,
    /// Host application moved to the background.
    Background,
    /// Forget all present beacons.
    ClearCache,
    /// Replace timings and filters; the running window is recomputed.
    Reconfigure(Box<ScannerConfig>),
}

impl From<TimerKind> for ScannerMessage {
    fn from(kind: TimerKind) -> Self {
        match kind {
            TimerKind::Pause => Self::Pause,
            TimerKind::UnPause => Self::UnPause,
        }
    }
}

/// Timer port.
///
/// At most one one-shot timer is pending at a time; scheduling replaces it.
/// Cancelled timers must never be delivered.
pub trait Timers: Send {
    /// Arm the one-shot timer, replacing any pending one.
    fn schedule(&mut self, kind: TimerKind, delay_ms: Millis);

    /// Cancel the pending one-shot timer, if any.
    fn cancel(&mut self);

    /// Start the fixed-rate exit check after `initial_delay_ms`.
    fn start_exit_ticks(&mut self, initial_delay_ms: Millis, period_ms: Millis);

    /// Stop the fixed-rate exit check.
    fn stop_exit_ticks(&mut self);
}

/// Collaborators the scanner reads from.
#[derive(Clone)]
pub struct ScannerEnv {
    /// Time source.
    pub clock: Arc<dyn Clock>,
    /// Persistence for presence and marks.
    pub store: Arc<dyn DurableStore>,
    /// Location hints for events.
    pub location: Arc<dyn LocationSource>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
struct ScannerMarks {
    last_stop_at: Option<Millis>,
    pause_started_at: Option<Millis>,
}

/// The scan/sleep state machine.
pub struct DutyCycleScanner<T: Timers> {
    config: ScannerConfig,
    env: ScannerEnv,
    radio: Box<dyn Radio>,
    timers: T,
    on_report: RadioCallback,
    ledger: SharedLedger,
    listeners: Arc<ListenerSet<dyn ScannerListener>>,
    rssi_listeners: Arc<ListenerSet<dyn RssiListener>>,
    state: ScannerState,
    foreground: bool,
    scan_started_at: Millis,
    paused_at: Millis,
    marks: ScannerMarks,
}

impl<T: Timers> DutyCycleScanner<T> {
    /// Build a stopped scanner in background mode.
    ///
    /// `on_report` is handed to the radio on every start; it must route reports
    /// back into this scanner as [`ScannerMessage::Report`].
    pub fn new(
        config: ScannerConfig,
        radio: Box<dyn Radio>,
        timers: T,
        env: ScannerEnv,
        on_report: RadioCallback,
    ) -> Self {
        let ledger = PresenceLedger::open(Arc::clone(&env.store), config.restore_presence);
        let marks: ScannerMarks = load_json_or_default(env.store.as_ref(), MARKS_KEY);
        Self {
            config,
            radio,
            timers,
            on_report,
            ledger: Arc::new(std::sync::Mutex::new(ledger)),
            listeners: Arc::new(ListenerSet::new()),
            rssi_listeners: Arc::new(ListenerSet::new()),
            state: ScannerState::Stopped,
            foreground: false,
            scan_started_at: 0,
            paused_at: 0,
            marks,
            env,
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> ScannerState {
        self.state
    }

    /// Whether foreground timings are active.
    #[must_use]
    pub const fn is_foreground(&self) -> bool {
        self.foreground
    }

    /// Shared presence ledger.
    #[must_use]
    pub fn ledger(&self) -> SharedLedger {
        Arc::clone(&self.ledger)
    }

    /// Entry/exit listeners.
    #[must_use]
    pub fn listeners(&self) -> Arc<ListenerSet<dyn ScannerListener>> {
        Arc::clone(&self.listeners)
    }

    /// Signal update listeners.
    #[must_use]
    pub fn rssi_listeners(&self) -> Arc<ListenerSet<dyn RssiListener>> {
        Arc::clone(&self.rssi_listeners)
    }

    /// Timer port, for the runtime to validate timer deliveries.
    #[must_use]
    pub const fn timers(&self) -> &T {
        &self.timers
    }

    /// Process one message.
    pub fn handle(&mut self, message: ScannerMessage) {
        match message {
            ScannerMessage::Start => self.on_start(),
            ScannerMessage::Stop => self.on_stop(),
            ScannerMessage::Pause => self.on_pause(),
            ScannerMessage::UnPause => self.on_unpause(),
            ScannerMessage::ExitCheck => self.on_exit_check(),
            ScannerMessage::Report(Ok(sighting)) => self.on_sighting(sighting),
            ScannerMessage::Report(Err(code)) => {
                debug!(code, "Radio reported a scan error");
            }
            ScannerMessage::Foreground => self.set_foreground(true),
            ScannerMessage::Background => self.set_foreground(false),
            ScannerMessage::ClearCache => lock_ledger(&self.ledger).clear(),
            ScannerMessage::Reconfigure(config) => self.reconfigure(*config),
        }
    }

    fn now(&self) -> Millis {
        self.env.clock.now_millis()
    }

    const fn timings(&self) -> (Millis, Millis, Millis) {
        self.config.timings(self.foreground)
    }

    fn on_start(&mut self) {
        if self.state != ScannerState::Stopped {
            debug!(state = ?self.state, "Start ignored, scanner already running");
            return;
        }
        let now = self.now();
        if let Some(stopped_at) = self.marks.last_stop_at.take() {
            let off_for = now.saturating_sub(stopped_at);
            if off_for > self.config.restart_timeout_ms {
                info!(off_for_ms = off_for, "Scanner was off too long, clearing presence");
                lock_ledger(&self.ledger).clear();
                self.marks.pause_started_at = None;
            }
            // The mark only describes the stop it was written by; a later
            // crash must not be measured from it.
            self.persist_marks();
        }
        self.state = ScannerState::ScanRequested;
        self.timers.schedule(TimerKind::UnPause, 0);
        info!("Scanner started");
    }

    fn on_stop(&mut self) {
        if self.state == ScannerState::Stopped {
            return;
        }
        let now = self.now();
        self.timers.cancel();
        self.timers.stop_exit_ticks();
        self.stop_radio();
        if self.state == ScannerState::Scanning {
            self.marks.pause_started_at.get_or_insert(now);
        }
        self.marks.last_stop_at = Some(now);
        self.persist_marks();
        self.state = ScannerState::Stopped;
        info!("Scanner stopped");
    }

    fn on_pause(&mut self) {
        if self.state != ScannerState::Scanning {
            trace!(state = ?self.state, "Ignoring stale pause");
            return;
        }
        let now = self.now();
        self.stop_radio();
        self.timers.stop_exit_ticks();
        self.state = ScannerState::Paused;
        self.paused_at = now;
        self.marks.pause_started_at.get_or_insert(now);
        self.persist_marks();

        let (_, wait, _) = self.timings();
        self.timers.schedule(TimerKind::UnPause, wait);
        debug!(wait_ms = wait, "Scan paused");
    }

    fn on_unpause(&mut self) {
        if !matches!(
            self.state,
            ScannerState::ScanRequested | ScannerState::Paused
        ) {
            trace!(state = ?self.state, "Ignoring stale un-pause");
            return;
        }
        let now = self.now();
        match self.radio.start_scan(Arc::clone(&self.on_report)) {
            Ok(()) => {
                if let Some(paused_at) = self.marks.pause_started_at.take() {
                    let pause = now.saturating_sub(paused_at);
                    lock_ledger(&self.ledger).add_pause_time(pause);
                    debug!(pause_ms = pause, "Scan resumed");
                }
                self.persist_marks();
            }
            Err(e) => {
                // The window still runs so the cycle keeps its cadence.
                debug!(error = %SightlineError::from(e), "Radio start failed, retrying on next un-pause");
            }
        }

        let (scan, _, grace) = self.timings();
        self.state = ScannerState::Scanning;
        self.scan_started_at = now;
        self.timers.schedule(TimerKind::Pause, scan);
        self.timers
            .start_exit_ticks(grace, self.config.exit_check_interval_ms);
    }

    fn on_exit_check(&mut self) {
        if !self.radio.is_scanning() {
            return;
        }
        let now = self.now();
        let expired = lock_ledger(&self.ledger).drain_expired(now, self.config.exit_timeout_ms);
        for entry in expired {
            info!(beacon = %entry.beacon_id, absent_ms = entry.absence(now), "Beacon exited");
            let event = ScanEvent {
                beacon_id: entry.beacon_id,
                timestamp: now,
                is_entry: false,
                location_hint: self.env.location.location_hint(),
                pairing_id: entry.pairing_id,
                signal: None,
            };
            self.emit(&event);
        }
    }

    fn on_sighting(&mut self, sighting: Sighting) {
        if !self.radio.is_scanning() {
            trace!(beacon = %sighting.beacon_id, "Dropping sighting, radio is off");
            return;
        }
        if let Some(min) = self.config.min_rssi {
            if sighting.rssi < min {
                trace!(beacon = %sighting.beacon_id, rssi = sighting.rssi, "Below RSSI floor");
                return;
            }
        }
        if let Some(max) = self.config.max_distance_m {
            let distance = estimate_distance(sighting.rssi, sighting.calibrated_rssi);
            if distance.is_some_and(|d| d > max) {
                trace!(beacon = %sighting.beacon_id, ?distance, "Beyond distance ceiling");
                return;
            }
        }

        let now = self.now();
        let entered = {
            let mut ledger = lock_ledger(&self.ledger);
            if ledger.refresh(&sighting.beacon_id, now) {
                None
            } else {
                let pairing_id = Uuid::new_v4();
                ledger.insert(PresenceEntry {
                    beacon_id: sighting.beacon_id.clone(),
                    last_seen_at: now,
                    event_mask: Trigger::ENTRY_MASK,
                    pairing_id,
                    accumulated_pause_ms: 0,
                });
                Some(pairing_id)
            }
        };

        match entered {
            Some(pairing_id) => {
                info!(beacon = %sighting.beacon_id, rssi = sighting.rssi, "Beacon entered");
                let event = ScanEvent {
                    beacon_id: sighting.beacon_id,
                    timestamp: now,
                    is_entry: true,
                    location_hint: self.env.location.location_hint(),
                    pairing_id,
                    signal: Some(SignalMetadata {
                        rssi: sighting.rssi,
                        calibrated_rssi: sighting.calibrated_rssi,
                        address: sighting.address,
                    }),
                };
                self.emit(&event);
            }
            None => {
                trace!(beacon = %sighting.beacon_id, "Beacon seen again");
                self.rssi_listeners
                    .for_each(|l| l.on_rssi_updated(&sighting.beacon_id, sighting.rssi));
            }
        }
    }

    fn set_foreground(&mut self, foreground: bool) {
        if self.foreground == foreground {
            return;
        }
        self.foreground = foreground;
        debug!(foreground, "Lifecycle mode changed");
        self.recompute_window();
    }

    fn reconfigure(&mut self, config: ScannerConfig) {
        if self.config == config {
            return;
        }
        let restore_presence = self.config.restore_presence;
        self.config = ScannerConfig {
            restore_presence,
            ..config
        };
        info!(
            scan_ms = self.timings().0,
            wait_ms = self.timings().1,
            exit_timeout_ms = self.config.exit_timeout_ms,
            "Scanner reconfigured"
        );
        self.recompute_window();
    }

    /// Re-arm the pending window timer for the current timings.
    fn recompute_window(&mut self) {
        let (scan, wait, _) = self.timings();
        let now = self.now();

        match self.state {
            ScannerState::Paused => {
                let remaining = wait.saturating_sub(now.saturating_sub(self.paused_at));
                debug!(remaining_ms = remaining, "Wait window recomputed");
                self.timers.schedule(TimerKind::UnPause, remaining);
            }
            ScannerState::Scanning => {
                let elapsed = now.saturating_sub(self.scan_started_at);
                if elapsed >= scan {
                    debug!(elapsed_ms = elapsed, "Scan window already exceeded, pausing now");
                    self.timers.cancel();
                    self.on_pause();
                } else {
                    self.timers.schedule(TimerKind::Pause, scan - elapsed);
                }
            }
            ScannerState::Stopped | ScannerState::ScanRequested => {}
        }
    }

    fn stop_radio(&mut self) {
        if !self.radio.is_scanning() {
            return;
        }
        if let Err(e) = self.radio.stop_scan() {
            debug!(error = %SightlineError::from(e), "Radio stop failed");
        }
    }

    fn emit(&self, event: &ScanEvent) {
        self.listeners.for_each(|l| l.on_scan_event(event));
    }

    fn persist_marks(&self) {
        if let Err(e) = save_json(self.env.store.as_ref(), MARKS_KEY, &self.marks) {
            debug!(error = %e, "Failed to persist scanner marks");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::location::NoLocation;
    use crate::radio::{BridgeFeed, BridgeRadio};
    use crate::beacon::BeaconId;
    use crate::storage::MemoryStore;
    use std::sync::Mutex;

    #[derive(Default)]
    struct SimInner {
        oneshot: Option<(TimerKind, Millis)>,
        ticks: Option<(Millis, Millis)>,
        log: Vec<(TimerKind, Millis)>,
    }

    /// Timers that fire only when the test advances time.
    #[derive(Clone)]
    struct SimTimers {
        clock: Arc<ManualClock>,
        inner: Arc<Mutex<SimInner>>,
    }

    impl Timers for SimTimers {
        fn schedule(&mut self, kind: TimerKind, delay_ms: Millis) {
            let due = self.clock.now_millis() + delay_ms;
            let mut inner = self.inner.lock().unwrap();
            inner.oneshot = Some((kind, due));
            inner.log.push((kind, delay_ms));
        }

        fn cancel(&mut self) {
            self.inner.lock().unwrap().oneshot = None;
        }

        fn start_exit_ticks(&mut self, initial_delay_ms: Millis, period_ms: Millis) {
            let first = self.clock.now_millis() + initial_delay_ms;
            self.inner.lock().unwrap().ticks = Some((first, period_ms));
        }

        fn stop_exit_ticks(&mut self) {
            self.inner.lock().unwrap().ticks = None;
        }
    }

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<ScanEvent>>,
        rssi: Mutex<Vec<i16>>,
    }

    impl ScannerListener for Recorder {
        fn on_scan_event(&self, event: &ScanEvent) {
            self.events.lock().unwrap().push(event.clone());
        }
    }

    impl RssiListener for Recorder {
        fn on_rssi_updated(&self, _beacon: &BeaconId, rssi: i16) {
            self.rssi.lock().unwrap().push(rssi);
        }
    }

    impl Recorder {
        fn events(&self) -> Vec<ScanEvent> {
            self.events.lock().unwrap().clone()
        }
    }

    struct Harness {
        clock: Arc<ManualClock>,
        timers: SimTimers,
        feed: BridgeFeed,
        recorder: Arc<Recorder>,
        scanner: DutyCycleScanner<SimTimers>,
    }

    enum Due {
        Timer(TimerKind),
        Tick,
    }

    impl Harness {
        fn new(config: ScannerConfig) -> Self {
            Self::with_store(config, Arc::new(MemoryStore::new()), 0)
        }

        fn with_store(config: ScannerConfig, store: Arc<MemoryStore>, start: Millis) -> Self {
            let clock = Arc::new(ManualClock::new(start));
            let timers = SimTimers {
                clock: Arc::clone(&clock),
                inner: Arc::new(Mutex::new(SimInner::default())),
            };
            let (radio, feed) = BridgeRadio::new();
            let env = ScannerEnv {
                clock: clock.clone(),
                store,
                location: Arc::new(NoLocation),
            };
            let scanner = DutyCycleScanner::new(
                config,
                Box::new(radio),
                timers.clone(),
                env,
                Arc::new(|_| {}),
            );
            let recorder = Arc::new(Recorder::default());
            scanner.listeners().add(recorder.clone());
            scanner.rssi_listeners().add(recorder.clone());
            Self {
                clock,
                timers,
                feed,
                recorder,
                scanner,
            }
        }

        fn next_due(&self) -> Option<(Millis, Due)> {
            let inner = self.timers.inner.lock().unwrap();
            match (inner.oneshot, inner.ticks) {
                (Some((_, at)), Some((tick, _))) if tick < at => Some((tick, Due::Tick)),
                (Some((kind, at)), _) => Some((at, Due::Timer(kind))),
                (None, Some((tick, _))) => Some((tick, Due::Tick)),
                (None, None) => None,
            }
        }

        /// Fire every timer due up to `target`, in order, then settle the clock there.
        fn advance_to(&mut self, target: Millis) {
            while let Some((at, due)) = self.next_due() {
                if at > target {
                    break;
                }
                self.clock.set(at.max(self.clock.now_millis()));
                match due {
                    Due::Timer(kind) => {
                        self.timers.inner.lock().unwrap().oneshot = None;
                        self.scanner.handle(kind.into());
                    }
                    Due::Tick => {
                        {
                            let mut inner = self.timers.inner.lock().unwrap();
                            if let Some((next, period)) = inner.ticks {
                                inner.ticks = Some((next + period, period));
                            }
                        }
                        self.scanner.handle(ScannerMessage::ExitCheck);
                    }
                }
            }
            self.clock.set(target);
        }

        fn sight(&mut self, beacon: &BeaconId, rssi: i16) {
            self.scanner.handle(ScannerMessage::Report(Ok(Sighting {
                beacon_id: beacon.clone(),
                rssi,
                calibrated_rssi: -59,
                address: None,
                raw: Vec::new(),
            })));
        }

        fn ledger_len(&self) -> usize {
            lock_ledger(&self.scanner.ledger()).len()
        }

        fn schedule_log(&self) -> Vec<(TimerKind, Millis)> {
            self.timers.inner.lock().unwrap().log.clone()
        }

        fn clear_log(&self) {
            self.timers.inner.lock().unwrap().log.clear();
        }
    }

    fn u1() -> BeaconId {
        format!("{}:10:20", Uuid::from_u128(0x1)).parse().unwrap()
    }

    fn config() -> ScannerConfig {
        ScannerConfig {
            foreground_scan_ms: 10_000,
            foreground_wait_ms: 10_000,
            background_scan_ms: 60_000,
            background_wait_ms: 10_000,
            foreground_exit_grace_ms: 1_000,
            background_exit_grace_ms: 1_000,
            exit_timeout_ms: 9_999,
            restart_timeout_ms: 60_000,
            exit_check_interval_ms: 1_000,
            min_rssi: None,
            max_distance_m: None,
            restore_presence: true,
        }
    }

    #[test]
    fn test_entry_then_exit_after_timeout() {
        let mut h = Harness::new(config());
        h.scanner.handle(ScannerMessage::Start);
        h.advance_to(0);
        assert_eq!(h.scanner.state(), ScannerState::Scanning);

        h.sight(&u1(), -60);
        assert_eq!(h.ledger_len(), 1);
        let events = h.recorder.events();
        assert_eq!(events.len(), 1);
        assert!(events[0].is_entry);
        assert_eq!(events[0].signal.as_ref().unwrap().rssi, -60);

        h.advance_to(9_999);
        assert_eq!(h.recorder.events().len(), 1, "no exit at exactly the timeout");

        h.advance_to(10_000);
        let events = h.recorder.events();
        assert_eq!(events.len(), 2);
        assert!(!events[1].is_entry);
        assert_eq!(events[1].timestamp, 10_000);
        assert_eq!(events[1].pairing_id, events[0].pairing_id);
        assert_eq!(h.ledger_len(), 0);
    }

    #[test]
    fn test_single_entry_per_dwell() {
        let mut h = Harness::new(config());
        h.scanner.handle(ScannerMessage::Start);
        h.advance_to(0);

        for t in [0, 2_000, 4_000, 6_000] {
            h.advance_to(t);
            h.sight(&u1(), -60);
        }
        assert_eq!(h.recorder.events().len(), 1);
        assert_eq!(h.recorder.rssi.lock().unwrap().len(), 3);

        h.advance_to(17_000);
        assert_eq!(h.recorder.events().len(), 2);

        h.sight(&u1(), -60);
        let events = h.recorder.events();
        assert_eq!(events.len(), 3);
        assert!(events[2].is_entry);
        assert_ne!(events[2].pairing_id, events[0].pairing_id);
    }

    #[test]
    fn test_pause_time_does_not_count_towards_exit() {
        let mut h = Harness::new(ScannerConfig {
            background_scan_ms: 3_000,
            background_wait_ms: 20_000,
            ..config()
        });
        h.scanner.handle(ScannerMessage::Start);
        h.advance_to(0);
        h.sight(&u1(), -60);

        // Three full cycles: 9s of radio-on absence, 69.5s of wall clock.
        h.advance_to(69_500);
        assert_eq!(h.recorder.events().len(), 1);
        assert_eq!(h.ledger_len(), 1);
        let entry = lock_ledger(&h.scanner.ledger()).snapshot()[0].clone();
        assert_eq!(entry.accumulated_pause_ms, 60_000);

        h.advance_to(70_000);
        let events = h.recorder.events();
        assert_eq!(events.len(), 2);
        assert!(!events[1].is_entry);
    }

    #[test]
    fn test_foreground_mid_wait_schedules_one_recomputed_unpause() {
        let mut h = Harness::new(ScannerConfig {
            background_scan_ms: 20_000,
            background_wait_ms: 120_000,
            ..config()
        });
        h.scanner.handle(ScannerMessage::Start);
        h.advance_to(20_000);
        assert_eq!(h.scanner.state(), ScannerState::Paused);

        h.advance_to(25_000);
        h.clear_log();
        h.scanner.handle(ScannerMessage::Foreground);

        assert_eq!(h.schedule_log(), vec![(TimerKind::UnPause, 5_000)]);
        assert_eq!(
            h.timers.inner.lock().unwrap().oneshot,
            Some((TimerKind::UnPause, 30_000))
        );

        h.advance_to(29_999);
        assert_eq!(h.scanner.state(), ScannerState::Paused);
        h.advance_to(30_000);
        assert_eq!(h.scanner.state(), ScannerState::Scanning);
    }

    #[test]
    fn test_foreground_after_long_wait_unpauses_immediately() {
        let mut h = Harness::new(ScannerConfig {
            background_scan_ms: 20_000,
            background_wait_ms: 120_000,
            ..config()
        });
        h.scanner.handle(ScannerMessage::Start);
        h.advance_to(50_000);
        h.clear_log();

        h.scanner.handle(ScannerMessage::Foreground);
        assert_eq!(h.schedule_log(), vec![(TimerKind::UnPause, 0)]);

        h.advance_to(50_000);
        assert_eq!(h.scanner.state(), ScannerState::Scanning);
    }

    #[test]
    fn test_repeated_foreground_is_a_no_op() {
        let mut h = Harness::new(config());
        h.scanner.handle(ScannerMessage::Foreground);
        h.scanner.handle(ScannerMessage::Start);
        h.advance_to(12_000);
        h.clear_log();

        h.scanner.handle(ScannerMessage::Foreground);
        assert!(h.schedule_log().is_empty());
        assert!(h.scanner.is_foreground());
    }

    #[test]
    fn test_background_while_scanning() {
        let overdue = ScannerConfig {
            foreground_scan_ms: 30_000,
            background_scan_ms: 20_000,
            background_wait_ms: 40_000,
            ..config()
        };

        let mut h = Harness::new(overdue.clone());
        h.scanner.handle(ScannerMessage::Foreground);
        h.scanner.handle(ScannerMessage::Start);
        h.advance_to(5_000);
        h.clear_log();
        h.scanner.handle(ScannerMessage::Background);
        assert_eq!(h.scanner.state(), ScannerState::Scanning);
        assert_eq!(h.schedule_log(), vec![(TimerKind::Pause, 15_000)]);

        let mut h = Harness::new(overdue);
        h.scanner.handle(ScannerMessage::Foreground);
        h.scanner.handle(ScannerMessage::Start);
        h.advance_to(25_000);
        h.clear_log();
        h.scanner.handle(ScannerMessage::Background);
        assert_eq!(h.scanner.state(), ScannerState::Paused);
        assert_eq!(h.schedule_log(), vec![(TimerKind::UnPause, 40_000)]);
        assert!(!h.feed.is_scanning());
    }

    #[test]
    fn test_stop_cancels_everything() {
        let mut h = Harness::new(config());
        h.scanner.handle(ScannerMessage::Start);
        h.advance_to(1_500);
        assert!(h.feed.is_scanning());

        h.scanner.handle(ScannerMessage::Stop);
        assert_eq!(h.scanner.state(), ScannerState::Stopped);
        assert!(!h.feed.is_scanning());
        {
            let inner = h.timers.inner.lock().unwrap();
            assert!(inner.oneshot.is_none());
            assert!(inner.ticks.is_none());
        }

        // A late timer delivery must not revive the scanner.
        h.scanner.handle(ScannerMessage::UnPause);
        h.scanner.handle(ScannerMessage::Pause);
        assert_eq!(h.scanner.state(), ScannerState::Stopped);
    }

    #[test]
    fn test_restart_timeout_clears_presence() {
        let mut h = Harness::new(config());
        h.scanner.handle(ScannerMessage::Start);
        h.advance_to(0);
        h.sight(&u1(), -60);
        h.advance_to(1_000);
        h.scanner.handle(ScannerMessage::Stop);

        h.advance_to(30_000);
        h.scanner.handle(ScannerMessage::Start);
        assert_eq!(h.ledger_len(), 1, "short stop keeps presence");

        h.scanner.handle(ScannerMessage::Stop);
        h.advance_to(100_000);
        h.scanner.handle(ScannerMessage::Start);
        assert_eq!(h.ledger_len(), 0, "long stop clears presence");
    }

    #[test]
    fn test_sightings_ignored_while_paused() {
        let mut h = Harness::new(ScannerConfig {
            background_scan_ms: 5_000,
            background_wait_ms: 5_000,
            ..config()
        });
        h.scanner.handle(ScannerMessage::Start);
        h.advance_to(6_000);
        assert_eq!(h.scanner.state(), ScannerState::Paused);

        h.sight(&u1(), -60);
        assert!(h.recorder.events().is_empty());
        assert_eq!(h.ledger_len(), 0);
    }

    #[test]
    fn test_rssi_and_distance_filters() {
        let mut h = Harness::new(ScannerConfig {
            min_rssi: Some(-75),
            max_distance_m: Some(3.0),
            ..config()
        });
        h.scanner.handle(ScannerMessage::Start);
        h.advance_to(0);

        h.sight(&u1(), -90);
        assert!(h.recorder.events().is_empty(), "below RSSI floor");

        h.sight(&u1(), -72);
        assert!(h.recorder.events().is_empty(), "too far away");

        h.sight(&u1(), -55);
        assert_eq!(h.recorder.events().len(), 1);
    }

    #[test]
    fn test_radio_start_failure_is_not_fatal() {
        let mut h = Harness::new(ScannerConfig {
            background_scan_ms: 5_000,
            background_wait_ms: 5_000,
            ..config()
        });
        h.feed.fail_next_starts(1);
        h.scanner.handle(ScannerMessage::Start);
        h.advance_to(0);

        assert_eq!(h.scanner.state(), ScannerState::Scanning);
        assert!(!h.feed.is_scanning());
        h.sight(&u1(), -60);
        assert!(h.recorder.events().is_empty());

        h.advance_to(10_000);
        assert!(h.feed.is_scanning());
        h.sight(&u1(), -60);
        assert_eq!(h.recorder.events().len(), 1);
    }

    #[test]
    fn test_presence_survives_restart() {
        let store = Arc::new(MemoryStore::new());
        let pairing_id = {
            let mut h = Harness::with_store(config(), Arc::clone(&store), 0);
            h.scanner.handle(ScannerMessage::Start);
            h.advance_to(0);
            h.sight(&u1(), -60);
            h.advance_to(2_000);
            h.scanner.handle(ScannerMessage::Stop);
            h.recorder.events()[0].pairing_id
        };

        let mut h = Harness::with_store(config(), store, 5_000);
        assert_eq!(h.ledger_len(), 1);
        h.scanner.handle(ScannerMessage::Start);
        h.advance_to(5_000);

        // Radio was on for 2s before the stop, so the exit needs ~8s more.
        h.advance_to(12_000);
        assert!(h.recorder.events().is_empty());
        h.advance_to(13_000);
        let events = h.recorder.events();
        assert_eq!(events.len(), 1);
        assert!(!events[0].is_entry);
        assert_eq!(events[0].pairing_id, pairing_id);
    }

    #[test]
    fn test_crash_after_long_run_keeps_presence() {
        let store = Arc::new(MemoryStore::new());
        let pairing_id = {
            let mut h = Harness::with_store(config(), Arc::clone(&store), 0);
            h.scanner.handle(ScannerMessage::Start);
            h.advance_to(0);
            h.scanner.handle(ScannerMessage::Stop);
            h.advance_to(1_000);
            h.scanner.handle(ScannerMessage::Start);
            for t in (1_000..=200_000).step_by(500) {
                h.advance_to(t);
                h.sight(&u1(), -60);
            }
            let events = h.recorder.events();
            assert_eq!(events.len(), 1);
            events[0].pairing_id
            // Dropped without a stop, like a killed process.
        };

        let mut h = Harness::with_store(config(), store, 200_600);
        h.scanner.handle(ScannerMessage::Start);
        h.advance_to(200_600);
        assert_eq!(h.ledger_len(), 1, "stale stop mark must not clear presence");

        h.sight(&u1(), -60);
        assert!(h.recorder.events().is_empty(), "same dwell, no second entry");
        assert_eq!(
            lock_ledger(&h.scanner.ledger()).snapshot()[0].pairing_id,
            pairing_id
        );
    }

    #[test]
    fn test_reconfigure_recomputes_windows() {
        let mut h = Harness::new(ScannerConfig {
            background_scan_ms: 60_000,
            background_wait_ms: 120_000,
            ..config()
        });
        h.scanner.handle(ScannerMessage::Start);
        h.advance_to(4_000);
        h.clear_log();

        let shorter = ScannerConfig {
            background_scan_ms: 10_000,
            background_wait_ms: 30_000,
            ..config()
        };
        h.scanner
            .handle(ScannerMessage::Reconfigure(Box::new(shorter.clone())));
        assert_eq!(h.schedule_log(), vec![(TimerKind::Pause, 6_000)]);

        h.advance_to(10_000);
        assert_eq!(h.scanner.state(), ScannerState::Paused);
        h.advance_to(40_000);
        assert_eq!(h.scanner.state(), ScannerState::Scanning);

        h.clear_log();
        h.scanner.handle(ScannerMessage::Reconfigure(Box::new(shorter)));
        assert!(h.schedule_log().is_empty(), "same config is a no-op");
    }

    #[test]
    fn test_reconfigure_tightens_filters() {
        let mut h = Harness::new(config());
        h.scanner.handle(ScannerMessage::Start);
        h.advance_to(0);
        h.scanner.handle(ScannerMessage::Reconfigure(Box::new(ScannerConfig {
            min_rssi: Some(-70),
            ..config()
        })));

        h.sight(&u1(), -80);
        assert!(h.recorder.events().is_empty());
        h.sight(&u1(), -65);
        assert_eq!(h.recorder.events().len(), 1);
    }

    #[test]
    fn test_clear_cache_empties_ledger() {
        let mut h = Harness::new(config());
        h.scanner.handle(ScannerMessage::Start);
        h.advance_to(0);
        h.sight(&u1(), -60);
        h.scanner.handle(ScannerMessage::ClearCache);
        assert_eq!(h.ledger_len(), 0);
    }
}
