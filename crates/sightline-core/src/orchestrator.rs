//! Pipeline wiring.
//!
//! The [`Orchestrator`] owns every component and connects them:
//!
//! ```text
//! radio -> scanner -> record scan -> layout filter -> resolver
//!       -> suppression -> (deliver_at | delay | now) -> present
//! ```
//!
//! Presenting an action records it in history, then (unless the action is
//! silent) records a `Suppressed` conversion and hands it to the host sink.
//! The host later upgrades the conversion through
//! [`Orchestrator::notify_conversion`].
//!
//! Backend-managed settings are fetched on start and then periodically; a new
//! revision is pushed into the scanner, the resolver, the history publisher
//! and both refresh loops without restarting anything.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};
use uuid::Uuid;

use crate::actor::{spawn_scanner, ScannerHandle};
use crate::clock::Clock;
use crate::config::SightlineConfig;
use crate::delivery::{delivery_time, spawn_delivery, DeliveryScheduler, DeliverySink, PendingDelivery};
use crate::error::{Result, SightlineError};
use crate::history::{HistoryLedger, HistoryPublisher};
use crate::listeners::{ResolverListener, RssiListener, ScannerListener};
use crate::location::LocationSource;
use crate::presence::PresenceEntry;
use crate::radio::Radio;
use crate::resolver::{LayoutFilter, Resolver};
use crate::scanner::{ScannerEnv, ScannerState};
use crate::settings::{EffectiveSettings, SettingsPatch};
use crate::storage::DurableStore;
use crate::transport::Transport;
use crate::types::{ConversionKind, ConversionRecord, ResolvedAction, ScanEvent};

/// External collaborators of the pipeline.
pub struct OrchestratorDeps {
    /// Platform radio.
    pub radio: Box<dyn Radio>,
    /// Backend transport.
    pub transport: Arc<dyn Transport>,
    /// Durable storage for presence, history and pending deliveries.
    pub store: Arc<dyn DurableStore>,
    /// Host presentation sink.
    pub sink: Arc<dyn DeliverySink>,
    /// Time source.
    pub clock: Arc<dyn Clock>,
    /// Location hints.
    pub location: Arc<dyn LocationSource>,
}

/// Listener glue between the components.
struct Pipeline {
    clock: Arc<dyn Clock>,
    location: Arc<dyn LocationSource>,
    history: Arc<HistoryLedger>,
    publisher: HistoryPublisher,
    resolver: Resolver,
    layout: LayoutFilter,
    delivery: Arc<DeliveryScheduler>,
    sink: Arc<dyn DeliverySink>,
}

impl Pipeline {
    fn present(&self, action: ResolvedAction) {
        let now = self.clock.now_millis();
        let location_hint = self.location.location_hint();
        self.history
            .record_action(&action, now, location_hint.clone());

        if action.content.is_silent() {
            debug!(action = %action.uuid, "Silent action recorded");
            return;
        }
        self.history.record_conversion(ConversionRecord {
            action_instance_uuid: action.instance_uuid,
            kind: ConversionKind::Suppressed,
            timestamp: now,
            location_hint,
        });
        info!(action = %action.uuid, kind = action.content.name(), beacon = %action.beacon_id, "Delivering action");
        self.sink.deliver(action);
    }

    fn flush(&self) {
        if let Err(e) = self.publisher.flush() {
            debug!(error = %e, "History flush not requested");
        }
    }
}

impl ScannerListener for Pipeline {
    fn on_scan_event(&self, event: &ScanEvent) {
        self.history.record_scan(event);
        if !self.layout.accepts(&event.beacon_id) {
            trace!(beacon = %event.beacon_id, "Beacon outside layout, not resolving");
            return;
        }
        if let Err(e) = self.resolver.resolve(event.clone()) {
            debug!(beacon = %event.beacon_id, error = %e, "Event not resolved");
        }
    }
}

impl ResolverListener for Pipeline {
    fn on_resolved(&self, event: &ScanEvent, actions: &[ResolvedAction]) {
        let now = self.clock.now_millis();
        let mut flush = false;
        for action in actions {
            if !self.history.should_deliver(action, now) {
                continue;
            }
            flush |= action.report_immediately;
            match delivery_time(action) {
                Some(due) if due > now => {
                    debug!(action = %action.uuid, due, "Action scheduled");
                    self.delivery.schedule(due, action.clone());
                }
                _ => self.present(action.clone()),
            }
        }
        if flush {
            debug!(beacon = %event.beacon_id, "Reporting immediately");
            self.flush();
        }
    }

    fn on_resolution_failed(&self, event: &ScanEvent, error: &SightlineError) {
        trace!(beacon = %event.beacon_id, code = error.error_code(), "No actions for event");
    }
}

impl DeliverySink for Pipeline {
    fn deliver(&self, action: ResolvedAction) {
        let report = action.report_immediately;
        self.present(action);
        if report {
            self.flush();
        }
    }
}

/// Pushes accepted settings revisions into the running components.
struct SettingsSync {
    transport: Arc<dyn Transport>,
    state: Mutex<EffectiveSettings>,
    scanner: ScannerHandle,
    resolver: Resolver,
    publisher: HistoryPublisher,
    layout_period: watch::Sender<Duration>,
    settings_period: watch::Sender<Duration>,
}

impl SettingsSync {
    fn lock(&self) -> MutexGuard<'_, EffectiveSettings> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    async fn refresh(&self) -> Result<bool> {
        let revision = self.lock().revision();
        let update = self.transport.fetch_settings(revision).await?;
        let Some(config) = self.lock().apply(update)? else {
            trace!(?revision, "Settings unchanged");
            return Ok(false);
        };

        self.scanner.reconfigure(config.scanner.clone())?;
        self.resolver.reconfigure(config.resolver.clone())?;
        self.publisher
            .set_interval(Duration::from_millis(config.history.upload_interval_ms))?;
        set_period(&self.layout_period, config.resolver.layout_refresh_interval_ms);
        set_period(&self.settings_period, config.backend.settings_refresh_interval_ms);
        Ok(true)
    }
}

fn set_period(sender: &watch::Sender<Duration>, millis: u64) {
    let period = Duration::from_millis(millis);
    sender.send_if_modified(|current| {
        if *current == period {
            return false;
        }
        *current = period;
        true
    });
}

/// The assembled pipeline.
pub struct Orchestrator {
    scanner: ScannerHandle,
    resolver: Resolver,
    history: Arc<HistoryLedger>,
    publisher: HistoryPublisher,
    delivery: Arc<DeliveryScheduler>,
    pipeline: Arc<Pipeline>,
    settings: Arc<SettingsSync>,
    clock: Arc<dyn Clock>,
    location: Arc<dyn LocationSource>,
    cancel: CancellationToken,
}

impl Orchestrator {
    /// Build and spawn every component. Must be called from within a tokio runtime.
    ///
    /// Components are configured from `config` with the last accepted backend
    /// settings revision layered on top. The scanner starts stopped; call
    /// [`Orchestrator::start`].
    #[must_use]
    pub fn new(config: &SightlineConfig, deps: OrchestratorDeps) -> Self {
        let OrchestratorDeps {
            radio,
            transport,
            store,
            sink,
            clock,
            location,
        } = deps;

        let settings = EffectiveSettings::open(config.clone(), Arc::clone(&store));
        let config = settings.effective().clone();

        let history = Arc::new(HistoryLedger::open(Arc::clone(&store)));
        let publisher = HistoryPublisher::spawn(
            Arc::clone(&history),
            Arc::clone(&transport),
            Duration::from_millis(config.history.upload_interval_ms),
        );
        let resolver = Resolver::spawn(config.resolver.clone(), Arc::clone(&transport), Arc::clone(&clock));
        let delivery = Arc::new(DeliveryScheduler::open(Arc::clone(&store)));
        let scanner = spawn_scanner(
            config.scanner.clone(),
            radio,
            ScannerEnv {
                clock: Arc::clone(&clock),
                store,
                location: Arc::clone(&location),
            },
        );

        let pipeline = Arc::new(Pipeline {
            clock: Arc::clone(&clock),
            location: Arc::clone(&location),
            history: Arc::clone(&history),
            publisher: publisher.clone(),
            resolver: resolver.clone(),
            layout: resolver.layout(),
            delivery: Arc::clone(&delivery),
            sink,
        });
        scanner.add_listener(pipeline.clone());
        resolver.add_listener(pipeline.clone());

        let cancel = CancellationToken::new();
        let _ = spawn_delivery(Arc::clone(&delivery), pipeline.clone(), Arc::clone(&clock), cancel.clone());

        let (layout_period, layout_rx) = watch::channel(Duration::from_millis(
            config.resolver.layout_refresh_interval_ms,
        ));
        let (settings_period, settings_rx) = watch::channel(Duration::from_millis(
            config.backend.settings_refresh_interval_ms,
        ));
        let settings = Arc::new(SettingsSync {
            transport,
            state: Mutex::new(settings),
            scanner: scanner.clone(),
            resolver: resolver.clone(),
            publisher: publisher.clone(),
            layout_period,
            settings_period,
        });

        let layout_resolver = resolver.clone();
        spawn_periodic(layout_rx, cancel.clone(), move || {
            let resolver = layout_resolver.clone();
            async move {
                if let Err(e) = resolver.refresh_layout().await {
                    debug!(error = %e, "Layout refresh failed, keeping previous layout");
                }
            }
        });
        let sync = Arc::clone(&settings);
        spawn_periodic(settings_rx, cancel.clone(), move || {
            let sync = Arc::clone(&sync);
            async move {
                if let Err(e) = sync.refresh().await {
                    debug!(error = %e, "Settings refresh failed, keeping current settings");
                }
            }
        });

        Self {
            scanner,
            resolver,
            history,
            publisher,
            delivery,
            pipeline,
            settings,
            clock,
            location,
            cancel,
        }
    }

    /// Start scanning.
    ///
    /// # Errors
    ///
    /// Returns [`SightlineError::ComponentStopped`] after shutdown.
    pub fn start(&self) -> Result<()> {
        self.resolver.start();
        self.scanner.start()?;
        info!("Pipeline started");
        Ok(())
    }

    /// Stop scanning. In-flight resolutions still complete; retries are dropped.
    ///
    /// # Errors
    ///
    /// Returns [`SightlineError::ComponentStopped`] after shutdown.
    pub fn stop(&self) -> Result<()> {
        self.scanner.stop()?;
        self.resolver.stop();
        info!("Pipeline stopped");
        Ok(())
    }

    /// The host application came to the foreground.
    ///
    /// # Errors
    ///
    /// Returns [`SightlineError::ComponentStopped`] after shutdown.
    pub fn on_foreground(&self) -> Result<()> {
        self.scanner.foreground()?;
        let resolver = self.resolver.clone();
        tokio::spawn(async move {
            if let Err(e) = resolver.refresh_layout().await {
                debug!(error = %e, "Layout refresh failed");
            }
        });
        self.publisher.flush()
    }

    /// The host application went to the background.
    ///
    /// # Errors
    ///
    /// Returns [`SightlineError::ComponentStopped`] after shutdown.
    pub fn on_background(&self) -> Result<()> {
        self.scanner.background()?;
        self.publisher.flush()
    }

    /// Report a conversion status for a delivered action instance.
    ///
    /// Returns `false` if the status would downgrade the buffered one.
    pub fn notify_conversion(&self, instance_uuid: Uuid, kind: ConversionKind) -> bool {
        self.history.record_conversion(ConversionRecord {
            action_instance_uuid: instance_uuid,
            kind,
            timestamp: self.clock.now_millis(),
            location_hint: self.location.location_hint(),
        })
    }

    /// Wipe history, suppression state and pending deliveries.
    pub fn purge_history(&self) {
        self.history.purge();
        self.delivery.clear();
    }

    /// Forget every present beacon.
    ///
    /// # Errors
    ///
    /// Returns [`SightlineError::ComponentStopped`] after shutdown.
    pub fn clear_presence(&self) -> Result<()> {
        self.scanner.clear_cache()
    }

    /// Snapshot of present beacons.
    #[must_use]
    pub fn presence(&self) -> Vec<PresenceEntry> {
        self.scanner.presence()
    }

    /// Current scanner state.
    ///
    /// # Errors
    ///
    /// Returns [`SightlineError::ComponentStopped`] after shutdown.
    pub async fn scanner_state(&self) -> Result<ScannerState> {
        self.scanner.state().await
    }

    /// Upload buffered history now and wait for the outcome.
    ///
    /// # Errors
    ///
    /// Returns the upload failure or [`SightlineError::ComponentStopped`].
    pub async fn flush_history(&self) -> Result<usize> {
        self.publisher.flush_and_wait().await
    }

    /// Refresh the beacon layout now.
    ///
    /// # Errors
    ///
    /// Returns the transport failure.
    pub async fn refresh_layout(&self) -> Result<usize> {
        self.resolver.refresh_layout().await
    }

    /// Fetch backend settings now and apply a new revision.
    ///
    /// Returns `true` if the effective configuration changed.
    ///
    /// # Errors
    ///
    /// Returns the transport failure, a validation error for a revision that
    /// would produce an invalid configuration, or
    /// [`SightlineError::ComponentStopped`] after shutdown.
    pub async fn refresh_settings(&self) -> Result<bool> {
        self.settings.refresh().await
    }

    /// Revision of the backend settings in force, `None` for local configuration only.
    #[must_use]
    pub fn settings_revision(&self) -> Option<u64> {
        self.settings.lock().revision()
    }

    /// Backend overrides in force.
    #[must_use]
    pub fn settings_overrides(&self) -> Option<SettingsPatch> {
        self.settings.lock().overrides().cloned()
    }

    /// Configuration the components currently run with.
    #[must_use]
    pub fn effective_config(&self) -> SightlineConfig {
        self.settings.lock().effective().clone()
    }

    /// History ledger.
    #[must_use]
    pub const fn history(&self) -> &Arc<HistoryLedger> {
        &self.history
    }

    /// Actions waiting for their delivery time.
    #[must_use]
    pub fn pending_deliveries(&self) -> Vec<PendingDelivery> {
        self.delivery.pending()
    }

    /// Layout pre-filter.
    #[must_use]
    pub fn layout(&self) -> LayoutFilter {
        self.resolver.layout()
    }

    /// Register an entry/exit listener.
    pub fn add_scan_listener(&self, listener: Arc<dyn ScannerListener>) {
        self.scanner.add_listener(listener);
    }

    /// Unregister an entry/exit listener.
    pub fn remove_scan_listener(&self, listener: &Arc<dyn ScannerListener>) -> bool {
        self.scanner.remove_listener(listener)
    }

    /// Register a signal update listener.
    pub fn add_rssi_listener(&self, listener: Arc<dyn RssiListener>) {
        self.scanner.add_rssi_listener(listener);
    }

    /// Unregister a signal update listener.
    pub fn remove_rssi_listener(&self, listener: &Arc<dyn RssiListener>) -> bool {
        self.scanner.remove_rssi_listener(listener)
    }

    /// Register a resolution listener.
    pub fn add_resolution_listener(&self, listener: Arc<dyn ResolverListener>) {
        self.resolver.add_listener(listener);
    }

    /// Unregister a resolution listener.
    pub fn remove_resolution_listener(&self, listener: &Arc<dyn ResolverListener>) -> bool {
        self.resolver.remove_listener(listener)
    }

    /// Stop every component. The orchestrator is unusable afterwards.
    pub fn shutdown(&self) {
        let as_scan: Arc<dyn ScannerListener> = self.pipeline.clone();
        let as_resolver: Arc<dyn ResolverListener> = self.pipeline.clone();
        self.scanner.remove_listener(&as_scan);
        self.resolver.remove_listener(&as_resolver);

        self.cancel.cancel();
        self.scanner.shutdown();
        self.resolver.shutdown();
        self.publisher.shutdown();
        info!("Pipeline shut down");
    }
}

/// Run `job` now and then every period, following period changes.
fn spawn_periodic<F, Fut>(mut period: watch::Receiver<Duration>, cancel: CancellationToken, job: F)
where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let ticker_for = |every: Duration| {
        let mut ticker = tokio::time::interval(every.max(Duration::from_secs(1)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker
    };
    tokio::spawn(async move {
        let mut ticker = ticker_for(*period.borrow_and_update());
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                changed = period.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let every = *period.borrow_and_update();
                    ticker = ticker_for(every);
                    // A fresh interval ticks immediately; skip it.
                    ticker.reset();
                }
                _ = ticker.tick() => job().await,
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScannerConfig;
    use crate::location::FixedLocation;
    use crate::radio::{BridgeFeed, BridgeRadio, Sighting};
    use crate::settings::{RemoteSettings, SettingsUpdate};
    use crate::storage::MemoryStore;
    use crate::testing::{beacon, descriptor, ScriptedTransport, TokioClock};
    use crate::beacon::BeaconId;
    use crate::types::{ActionKind, Trigger};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Collect(Mutex<Vec<ResolvedAction>>);

    impl DeliverySink for Collect {
        fn deliver(&self, action: ResolvedAction) {
            self.0.lock().unwrap().push(action);
        }
    }

    impl Collect {
        fn len(&self) -> usize {
            self.0.lock().unwrap().len()
        }
    }

    struct Fixture {
        orchestrator: Orchestrator,
        feed: BridgeFeed,
        transport: Arc<ScriptedTransport>,
        sink: Arc<Collect>,
    }

    fn config() -> SightlineConfig {
        SightlineConfig {
            scanner: ScannerConfig {
                background_scan_ms: 600_000,
                background_wait_ms: 1_000,
                ..ScannerConfig::default()
            },
            ..SightlineConfig::default()
        }
    }

    fn fixture_with(transport: Arc<ScriptedTransport>, store: Arc<MemoryStore>) -> Fixture {
        let (radio, feed) = BridgeRadio::new();
        let sink = Arc::new(Collect::default());
        let orchestrator = Orchestrator::new(
            &config(),
            OrchestratorDeps {
                radio: Box::new(radio),
                transport: transport.clone(),
                store,
                sink: sink.clone(),
                clock: Arc::new(TokioClock::new(1_700_000_000_000)),
                location: Arc::new(FixedLocation("52.52,13.40".into())),
            },
        );
        Fixture {
            orchestrator,
            feed,
            transport,
            sink,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(Arc::new(ScriptedTransport::new()), Arc::new(MemoryStore::new()))
    }

    fn sighting(beacon_id: BeaconId) -> Sighting {
        Sighting {
            beacon_id,
            rssi: -60,
            calibrated_rssi: -59,
            address: Some("C3:11:AA:00:00:01".into()),
            raw: Vec::new(),
        }
    }

    async fn settle(ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    async fn started(f: &Fixture) {
        f.orchestrator.start().unwrap();
        settle(10).await;
        assert_eq!(f.orchestrator.scanner_state().await.unwrap(), ScannerState::Scanning);
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_is_resolved_and_delivered() {
        let f = fixture();
        let action = descriptor(Trigger::Entry);
        f.transport.push_resolve(Ok(vec![action.clone()]));
        started(&f).await;

        assert!(f.feed.push(sighting(beacon(1))));
        settle(10).await;

        let delivered = f.sink.0.lock().unwrap().clone();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].uuid, action.uuid);
        assert_eq!(delivered[0].beacon_id, beacon(1));

        let history = f.orchestrator.history().snapshot();
        assert_eq!(history.scans.len(), 1);
        assert_eq!(history.actions.len(), 1);
        assert_eq!(history.actions[0].location_hint.as_deref(), Some("52.52,13.40"));
        assert_eq!(history.conversions.len(), 1);
        assert_eq!(history.conversions[0].kind, ConversionKind::Suppressed);
        f.orchestrator.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_once_action_is_delivered_once() {
        let f = fixture();
        let mut once = descriptor(Trigger::Entry);
        once.send_only_once = true;
        f.transport.push_resolve(Ok(vec![once.clone()]));
        f.transport.push_resolve(Ok(vec![once]));
        started(&f).await;

        f.feed.push(sighting(beacon(1)));
        settle(10).await;
        f.feed.push(sighting(beacon(2)));
        settle(10).await;

        assert_eq!(f.transport.resolve_calls(), 2);
        assert_eq!(f.sink.len(), 1);
        assert_eq!(f.orchestrator.history().counts().actions, 1);
        f.orchestrator.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_delayed_action_waits_for_due_time() {
        let f = fixture();
        let mut delayed = descriptor(Trigger::Entry);
        delayed.delay_ms = 5_000;
        f.transport.push_resolve(Ok(vec![delayed]));
        started(&f).await;

        f.feed.push(sighting(beacon(1)));
        settle(10).await;
        assert_eq!(f.sink.len(), 0);
        assert_eq!(f.orchestrator.pending_deliveries().len(), 1);

        settle(5_100).await;
        assert_eq!(f.sink.len(), 1);
        assert!(f.orchestrator.pending_deliveries().is_empty());
        f.orchestrator.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_action_is_recorded_not_delivered() {
        let f = fixture();
        let mut silent = descriptor(Trigger::Entry);
        silent.content = ActionKind::Silent;
        f.transport.push_resolve(Ok(vec![silent]));
        started(&f).await;

        f.feed.push(sighting(beacon(1)));
        settle(10).await;

        assert_eq!(f.sink.len(), 0);
        let counts = f.orchestrator.history().counts();
        assert_eq!(counts.actions, 1);
        assert_eq!(counts.conversions, 0);
        f.orchestrator.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_layout_prefilters_resolution() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.set_layout(&["00000000-0000-0000-0000-000000000001"]);
        let f = fixture_with(transport, Arc::new(MemoryStore::new()));
        started(&f).await;
        assert_eq!(f.orchestrator.layout().len(), 1);

        f.feed.push(sighting(beacon(1)));
        settle(10).await;

        assert_eq!(f.transport.resolve_calls(), 0);
        assert_eq!(f.orchestrator.history().counts().scans, 1);
        f.orchestrator.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_conversion_upgrade_from_host() {
        let f = fixture();
        f.transport.push_resolve(Ok(vec![descriptor(Trigger::Entry)]));
        started(&f).await;
        f.feed.push(sighting(beacon(1)));
        settle(10).await;

        let instance = f.sink.0.lock().unwrap()[0].instance_uuid;
        assert!(f.orchestrator.notify_conversion(instance, ConversionKind::Success));
        assert!(!f.orchestrator.notify_conversion(instance, ConversionKind::Shown));
        let conversions = f.orchestrator.history().snapshot().conversions;
        assert_eq!(conversions.len(), 1);
        assert_eq!(conversions[0].kind, ConversionKind::Success);
        f.orchestrator.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_report_immediately_flushes_history() {
        let f = fixture();
        let mut urgent = descriptor(Trigger::Entry);
        urgent.report_immediately = true;
        f.transport.push_resolve(Ok(vec![urgent]));
        started(&f).await;

        f.feed.push(sighting(beacon(1)));
        settle(10).await;

        assert_eq!(f.transport.upload_calls(), 1);
        assert_eq!(f.orchestrator.history().counts().actions, 0);
        f.orchestrator.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_drops_history_and_pending() {
        let f = fixture();
        let mut delayed = descriptor(Trigger::Entry);
        delayed.delay_ms = 60_000;
        f.transport.push_resolve(Ok(vec![delayed]));
        started(&f).await;
        f.feed.push(sighting(beacon(1)));
        settle(10).await;
        assert_eq!(f.orchestrator.pending_deliveries().len(), 1);

        f.orchestrator.purge_history();
        assert!(f.orchestrator.pending_deliveries().is_empty());
        assert_eq!(f.orchestrator.history().counts().scans, 0);

        settle(61_000).await;
        assert_eq!(f.sink.len(), 0);
        f.orchestrator.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_delivery_survives_restart() {
        let store = Arc::new(MemoryStore::new());
        {
            let transport = Arc::new(ScriptedTransport::new());
            let mut delayed = descriptor(Trigger::Entry);
            delayed.delay_ms = 30_000;
            transport.push_resolve(Ok(vec![delayed]));
            let f = fixture_with(transport, Arc::clone(&store));
            started(&f).await;
            f.feed.push(sighting(beacon(1)));
            settle(10).await;
            f.orchestrator.shutdown();
        }

        let f = fixture_with(Arc::new(ScriptedTransport::new()), store);
        assert_eq!(f.orchestrator.pending_deliveries().len(), 1);
        assert_eq!(f.orchestrator.presence().len(), 1);
        settle(31_000).await;
        assert_eq!(f.sink.len(), 1);
        f.orchestrator.shutdown();
    }

    fn short_scan(revision: u64) -> SettingsUpdate {
        SettingsUpdate::Changed(RemoteSettings {
            revision,
            settings: SettingsPatch {
                background_scan_ms: Some(5_000),
                max_retries: Some(1),
                ..SettingsPatch::default()
            },
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_settings_revision_changes_duty_cycle() {
        let f = fixture();
        f.transport.push_settings(Ok(short_scan(1)));
        started(&f).await;

        assert_eq!(f.orchestrator.settings_revision(), Some(1));
        assert_eq!(f.orchestrator.effective_config().scanner.background_scan_ms, 5_000);
        assert_eq!(f.orchestrator.effective_config().resolver.max_retries, 1);

        // Local config scans for ten minutes; the revision cuts it to five seconds.
        settle(5_100).await;
        assert_eq!(f.orchestrator.scanner_state().await.unwrap(), ScannerState::Paused);
        f.orchestrator.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_settings_refresh_is_idempotent_and_resettable() {
        let f = fixture();
        f.transport.push_settings(Ok(short_scan(2)));
        settle(10).await;
        assert_eq!(f.orchestrator.settings_revision(), Some(2));

        f.transport.push_settings(Ok(short_scan(2)));
        assert!(!f.orchestrator.refresh_settings().await.unwrap());
        assert_eq!(
            f.transport.settings_requests.lock().unwrap().last(),
            Some(&Some(2))
        );

        f.transport.push_settings(Ok(SettingsUpdate::Reset));
        assert!(f.orchestrator.refresh_settings().await.unwrap());
        assert_eq!(f.orchestrator.settings_revision(), None);
        assert_eq!(f.orchestrator.effective_config(), config());

        f.transport
            .push_settings(Err(crate::transport::TransportError::Timeout));
        assert!(matches!(
            f.orchestrator.refresh_settings().await,
            Err(SightlineError::Timeout)
        ));
        f.orchestrator.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_settings_survive_restart() {
        let store = Arc::new(MemoryStore::new());
        {
            let transport = Arc::new(ScriptedTransport::new());
            transport.push_settings(Ok(short_scan(3)));
            let f = fixture_with(transport, Arc::clone(&store));
            settle(10).await;
            assert_eq!(f.orchestrator.settings_revision(), Some(3));
            f.orchestrator.shutdown();
        }

        let f = fixture_with(Arc::new(ScriptedTransport::new()), store);
        assert_eq!(f.orchestrator.settings_revision(), Some(3));
        assert_eq!(
            f.orchestrator.settings_overrides().unwrap().background_scan_ms,
            Some(5_000)
        );
        settle(10).await;
        assert_eq!(
            f.transport.settings_requests.lock().unwrap().as_slice(),
            &[Some(3)]
        );
        f.orchestrator.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_lifecycle_after_shutdown_fails() {
        let f = fixture();
        f.orchestrator.shutdown();
        settle(10).await;
        assert!(matches!(
            f.orchestrator.start(),
            Err(SightlineError::ComponentStopped(_))
        ));
        assert!(f.orchestrator.on_foreground().is_err());
    }
}
