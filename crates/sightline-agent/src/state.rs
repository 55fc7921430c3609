//! Application state shared across handlers.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use sightline_core::{
    BridgeFeed, BridgeRadio, DeliverySink, DurableStore, FileStore, HttpTransport, NoLocation,
    Orchestrator, OrchestratorDeps, ResolvedAction, SightlineConfig, SystemClock, Transport,
};
use tracing::info;

/// How many delivered actions the agent keeps for polling hosts.
pub const RECENT_ACTIONS_CAPACITY: usize = 100;

/// Shared application state.
pub type SharedState = Arc<AppState>;

/// Everything the handlers need.
pub struct AppState {
    /// The running pipeline.
    pub orchestrator: Orchestrator,
    /// Producer side of the bridge radio; sightings posted to the API enter here.
    pub feed: BridgeFeed,
    /// Actions handed to the host, newest last.
    pub inbox: Arc<RecentActions>,
    /// Effective configuration.
    pub config: SightlineConfig,
}

impl AppState {
    /// Build the pipeline from `config` with a file store and the HTTP transport.
    ///
    /// # Errors
    ///
    /// Returns an error if the data directory or the backend URL is invalid.
    pub fn from_config(config: SightlineConfig) -> anyhow::Result<SharedState> {
        let store = FileStore::new(config.data_dir()?);
        info!(data_dir = %store.data_dir().display(), "Using file store");
        let transport = HttpTransport::new(&config.backend)?;
        Ok(Self::new(config, Arc::new(transport), Arc::new(store)))
    }

    /// Build the pipeline around the given transport and store.
    #[must_use]
    pub fn new(
        config: SightlineConfig,
        transport: Arc<dyn Transport>,
        store: Arc<dyn DurableStore>,
    ) -> SharedState {
        let (radio, feed) = BridgeRadio::new();
        let inbox = Arc::new(RecentActions::new(RECENT_ACTIONS_CAPACITY));
        let orchestrator = Orchestrator::new(
            &config,
            OrchestratorDeps {
                radio: Box::new(radio),
                transport,
                store,
                sink: inbox.clone(),
                clock: Arc::new(SystemClock),
                location: Arc::new(NoLocation),
            },
        );
        Arc::new(Self {
            orchestrator,
            feed,
            inbox,
            config,
        })
    }
}

/// Bounded buffer of delivered actions.
pub struct RecentActions {
    actions: Mutex<VecDeque<ResolvedAction>>,
    capacity: usize,
}

impl RecentActions {
    /// Create a buffer keeping at most `capacity` actions.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            actions: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    fn guard(&self) -> MutexGuard<'_, VecDeque<ResolvedAction>> {
        match self.actions.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// The newest `limit` actions, oldest first.
    #[must_use]
    pub fn latest(&self, limit: usize) -> Vec<ResolvedAction> {
        let actions = self.guard();
        let skip = actions.len().saturating_sub(limit);
        actions.iter().skip(skip).cloned().collect()
    }

    /// Number of buffered actions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.guard().len()
    }

    /// Whether nothing was delivered yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.guard().is_empty()
    }
}

impl DeliverySink for RecentActions {
    fn deliver(&self, action: ResolvedAction) {
        let mut actions = self.guard();
        if actions.len() == self.capacity {
            actions.pop_front();
        }
        actions.push_back(action);
    }
}
