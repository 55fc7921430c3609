//! Shared fixtures for unit tests.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::beacon::BeaconId;
use crate::clock::Millis;
use crate::settings::SettingsUpdate;
use crate::transport::{Transport, TransportResult};
use crate::types::{ActionDescriptor, ActionKind, HistoryBatch, ScanEvent, Trigger};

/// Transport answering from per-call scripts. Empty scripts answer `Ok`.
#[derive(Default)]
pub struct ScriptedTransport {
    resolve_script: Mutex<VecDeque<TransportResult<Vec<ActionDescriptor>>>>,
    resolve_delays: Mutex<VecDeque<u64>>,
    upload_script: Mutex<VecDeque<TransportResult<()>>>,
    upload_delay_ms: Mutex<u64>,
    layout: Mutex<Vec<String>>,
    settings_script: Mutex<VecDeque<TransportResult<SettingsUpdate>>>,
    pub settings_requests: Mutex<Vec<Option<u64>>>,
    pub resolved: Mutex<Vec<ScanEvent>>,
    pub uploads: Mutex<Vec<HistoryBatch>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_resolve(&self, answer: TransportResult<Vec<ActionDescriptor>>) {
        self.resolve_script.lock().unwrap().push_back(answer);
    }

    /// Delay of the next resolve calls, in call order.
    pub fn push_resolve_delay(&self, ms: u64) {
        self.resolve_delays.lock().unwrap().push_back(ms);
    }

    pub fn push_upload(&self, answer: TransportResult<()>) {
        self.upload_script.lock().unwrap().push_back(answer);
    }

    pub fn set_upload_delay(&self, ms: u64) {
        *self.upload_delay_ms.lock().unwrap() = ms;
    }

    pub fn set_layout(&self, uuids: &[&str]) {
        *self.layout.lock().unwrap() = uuids.iter().map(ToString::to_string).collect();
    }

    pub fn push_settings(&self, answer: TransportResult<SettingsUpdate>) {
        self.settings_script.lock().unwrap().push_back(answer);
    }

    pub fn resolve_calls(&self) -> usize {
        self.resolved.lock().unwrap().len()
    }

    pub fn upload_calls(&self) -> usize {
        self.uploads.lock().unwrap().len()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn resolve(&self, event: &ScanEvent) -> TransportResult<Vec<ActionDescriptor>> {
        self.resolved.lock().unwrap().push(event.clone());
        let delay = self.resolve_delays.lock().unwrap().pop_front().unwrap_or(0);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        let answer = self.resolve_script.lock().unwrap().pop_front();
        answer.unwrap_or_else(|| Ok(Vec::new()))
    }

    async fn upload_history(&self, batch: &HistoryBatch) -> TransportResult<()> {
        self.uploads.lock().unwrap().push(batch.clone());
        let delay = *self.upload_delay_ms.lock().unwrap();
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        let answer = self.upload_script.lock().unwrap().pop_front();
        answer.unwrap_or(Ok(()))
    }

    async fn fetch_layout(&self) -> TransportResult<Vec<String>> {
        Ok(self.layout.lock().unwrap().clone())
    }

    async fn fetch_settings(&self, revision: Option<u64>) -> TransportResult<SettingsUpdate> {
        self.settings_requests.lock().unwrap().push(revision);
        let answer = self.settings_script.lock().unwrap().pop_front();
        answer.unwrap_or(Ok(SettingsUpdate::Unchanged))
    }
}

pub fn beacon(minor: u16) -> BeaconId {
    BeaconId::new(Uuid::from_u128(0xf782_6da6_4fa2_4e98_8024_bc5b_71e0_893e), 10, minor)
}

pub fn event(beacon_id: BeaconId, is_entry: bool, pairing_id: Uuid, timestamp: Millis) -> ScanEvent {
    ScanEvent {
        beacon_id,
        timestamp,
        is_entry,
        location_hint: None,
        pairing_id,
        signal: None,
    }
}

pub fn descriptor(trigger: Trigger) -> ActionDescriptor {
    ActionDescriptor {
        uuid: Uuid::new_v4(),
        content: ActionKind::Message {
            subject: Some("Welcome".into()),
            body: Some("Hello there".into()),
        },
        trigger,
        delay_ms: 0,
        deliver_at: None,
        suppression_window_ms: 0,
        send_only_once: false,
        report_immediately: false,
        payload: None,
    }
}

/// Clock following tokio's (possibly paused) time.
pub struct TokioClock {
    origin: tokio::time::Instant,
    base: Millis,
}

impl TokioClock {
    pub fn new(base: Millis) -> Self {
        Self {
            origin: tokio::time::Instant::now(),
            base,
        }
    }
}

impl crate::clock::Clock for TokioClock {
    fn now_millis(&self) -> Millis {
        let elapsed = u64::try_from(self.origin.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.base + elapsed
    }
}
