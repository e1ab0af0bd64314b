//! Deduplicated beacon submitter.
//!
//! Sends at most one "project viewed" beacon per project id for the lifetime
//! of a [`BeaconSubmitter`]. Delivery is best-effort: the PUT runs in a
//! detached task, failures are logged and never retried, and the id stays
//! recorded whether or not delivery succeeded. Delivery tasks are tracked so
//! a host shutting down can let them finish with [`BeaconSubmitter::drain`].

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use reqwest::Client;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::config::BeaconConfig;
use crate::consent::{self, ConsentDecision, ConsentSource, PrivacySignals};
use crate::error::AppError;
use crate::prefs::PreferenceStore;

pub const EVENT_EMBED: &str = "view/embed";
pub const EVENT_INDEX: &str = "view/index";

/// JSON body of one beacon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Chime {
    pub resource: String,
    pub event: &'static str,
}

impl Chime {
    pub fn new(resource_prefix: &str, project_id: &str, embedded: bool) -> Self {
        Self {
            resource: format!("{resource_prefix}/{project_id}"),
            event: if embedded { EVENT_EMBED } else { EVENT_INDEX },
        }
    }
}

// ── Session ledger ────────────────────────────────────────────────────────────

/// Ids already submitted by one submitter. Entries never expire; a fresh
/// ledger corresponds to a fresh session.
#[derive(Debug, Default)]
pub struct SessionLedger {
    seen: Mutex<HashSet<String>>,
}

impl SessionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `id`. Returns `true` only for the first claim of an id; check
    /// and insert happen under one lock.
    pub fn claim(&self, id: &str) -> bool {
        // A poisoned set is still a valid set.
        let mut seen = self.seen.lock().unwrap_or_else(|p| p.into_inner());
        seen.insert(id.to_string())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.seen.lock().unwrap_or_else(|p| p.into_inner()).contains(id)
    }

    pub fn len(&self) -> usize {
        self.seen.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ── Outcomes ──────────────────────────────────────────────────────────────────

/// Result of one delivery attempt, as reported by the detached task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered { status: u16 },
    Rejected { status: u16 },
    Failed { reason: String },
}

impl DeliveryOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered { .. })
    }
}

/// What [`BeaconSubmitter::submit`] did with a request.
#[derive(Debug)]
pub enum SubmitOutcome {
    /// Suppressed by consent; the id was not recorded.
    OptedOut(ConsentSource),
    /// Id already recorded this session; nothing sent.
    AlreadySubmitted,
    /// Delivery task spawned. Dropping the handle detaches it.
    Dispatched(JoinHandle<DeliveryOutcome>),
}

impl SubmitOutcome {
    /// Wait for the delivery task, if one was spawned.
    pub async fn delivery(self) -> Option<DeliveryOutcome> {
        match self {
            Self::Dispatched(handle) => match handle.await {
                Ok(outcome) => Some(outcome),
                Err(e) => Some(DeliveryOutcome::Failed { reason: format!("delivery task: {e}") }),
            },
            _ => None,
        }
    }
}

// ── Submitter ─────────────────────────────────────────────────────────────────

/// Consent-aware, per-session deduplicated beacon sender.
///
/// Construct one per session and share it behind an `Arc`; `submit` takes
/// `&self`. Requires a tokio runtime when submitting.
pub struct BeaconSubmitter {
    client: Client,
    endpoint: String,
    resource_prefix: String,
    embedded: bool,
    feature_enabled: bool,
    signals: PrivacySignals,
    store: Arc<dyn PreferenceStore>,
    ledger: SessionLedger,
    deliveries: TaskTracker,
}

impl BeaconSubmitter {
    /// Build a submitter from `[beacon]` settings.
    ///
    /// Privacy signals are read from the process environment here; override
    /// them with [`with_signals`](Self::with_signals).
    pub fn new(settings: &BeaconConfig, store: Arc<dyn PreferenceStore>) -> Result<Self, AppError> {
        // No timeout: the request runs to completion or failure on its own.
        let client = Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AppError::Http(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: settings.endpoint.clone(),
            resource_prefix: settings.resource_prefix.clone(),
            embedded: settings.embedded,
            feature_enabled: consent::FEATURE_ENABLED,
            signals: PrivacySignals::from_env(),
            store,
            ledger: SessionLedger::new(),
            deliveries: TaskTracker::new(),
        })
    }

    pub fn with_signals(mut self, signals: PrivacySignals) -> Self {
        self.signals = signals;
        self
    }

    pub fn with_feature_enabled(mut self, enabled: bool) -> Self {
        self.feature_enabled = enabled;
        self
    }

    pub fn with_embedded(mut self, embedded: bool) -> Self {
        self.embedded = embedded;
        self
    }

    pub fn consent(&self) -> ConsentDecision {
        consent::resolve(self.feature_enabled, self.store.as_ref(), self.signals)
    }

    pub fn has_submitted(&self, project_id: &str) -> bool {
        self.ledger.contains(project_id)
    }

    pub fn submitted_count(&self) -> usize {
        self.ledger.len()
    }

    /// Submit a view beacon for `project_id`, at most once per session.
    ///
    /// Never blocks on the network and never fails: the returned outcome is
    /// informational and may be dropped.
    pub fn submit(&self, project_id: &str) -> SubmitOutcome {
        let decision = self.consent();
        if decision.opted_out {
            debug!(project_id, source = %decision.source, "beacon suppressed");
            return SubmitOutcome::OptedOut(decision.source);
        }

        // Recorded before sending so a re-trigger while in flight is a no-op.
        if !self.ledger.claim(project_id) {
            debug!(project_id, "beacon already submitted this session");
            return SubmitOutcome::AlreadySubmitted;
        }

        let chime = Chime::new(&self.resource_prefix, project_id, self.embedded);
        info!(resource = %chime.resource, event = chime.event, "submitting beacon");

        let client = self.client.clone();
        let endpoint = self.endpoint.clone();
        SubmitOutcome::Dispatched(self.deliveries.spawn(deliver(client, endpoint, chime)))
    }

    /// Deliveries spawned and not yet finished.
    pub fn in_flight(&self) -> usize {
        self.deliveries.len()
    }

    /// Give in-flight deliveries up to `grace` to finish. Returns `true` if
    /// all of them did; stragglers are logged.
    ///
    /// Meant for host shutdown. Submitting afterwards still works.
    pub async fn drain(&self, grace: Duration) -> bool {
        self.deliveries.close();
        let pending = self.deliveries.len();
        if pending == 0 {
            return true;
        }
        debug!(pending, "waiting for in-flight beacons");
        match tokio::time::timeout(grace, self.deliveries.wait()).await {
            Ok(()) => true,
            Err(_) => {
                warn!(
                    unfinished = self.deliveries.len(),
                    grace_ms = grace.as_millis() as u64,
                    "beacon deliveries still in flight at shutdown"
                );
                false
            }
        }
    }
}

async fn deliver(client: Client, endpoint: String, chime: Chime) -> DeliveryOutcome {
    // `.json()` also sets `content-type: application/json`.
    let result = client.put(&endpoint).json(&chime).send().await;
    match result {
        Ok(res) if res.status().is_success() => {
            debug!(resource = %chime.resource, status = res.status().as_u16(), "beacon delivered");
            DeliveryOutcome::Delivered { status: res.status().as_u16() }
        }
        Ok(res) => {
            let status = res.status();
            error!(resource = %chime.resource, status = status.as_u16(), "beacon request got status");
            DeliveryOutcome::Rejected { status: status.as_u16() }
        }
        Err(e) => {
            error!(resource = %chime.resource, error = %e, "beacon request failed");
            if e.is_builder() {
                warn!(endpoint = %endpoint, "beacon endpoint looks malformed");
            }
            DeliveryOutcome::Failed { reason: e.to_string() }
        }
    }
}
