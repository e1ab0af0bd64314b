//! Start-edge detection feeding the beacon submitter.
//!
//! A beacon fires when the host goes from "not started" to "started" with a
//! real project loaded. [`StartTrigger`] holds the edge state;
//! [`watch_runs`] drives it from a `tokio::sync::mpsc` queue of states.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use crate::submitter::BeaconSubmitter;

/// Host state observed by the trigger.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunState {
    pub started: bool,
    pub project_id: String,
}

impl RunState {
    pub fn new(started: bool, project_id: impl Into<String>) -> Self {
        Self { started, project_id: project_id.into() }
    }
}

#[derive(Debug, Clone)]
pub struct StartTrigger {
    was_started: bool,
    no_project_id: String,
}

impl StartTrigger {
    /// Capture the state at mount. If the host is already started at this
    /// point there is no edge, so nothing fires until it stops and restarts.
    pub fn mount(initial: &RunState, no_project_id: impl Into<String>) -> Self {
        Self { was_started: initial.started, no_project_id: no_project_id.into() }
    }

    /// Feed the next state. Returns the project id to submit on a
    /// false→true edge with a real project loaded.
    pub fn observe(&mut self, state: &RunState) -> Option<String> {
        let rising = state.started && !self.was_started;
        self.was_started = state.started;
        if !rising {
            return None;
        }
        if state.project_id.is_empty() || state.project_id == self.no_project_id {
            trace!(project_id = %state.project_id, "start edge without a project");
            return None;
        }
        Some(state.project_id.clone())
    }
}

/// Consume run states from `rx` until `shutdown` fires or every sender is
/// dropped, submitting a beacon on every start edge.
///
/// `initial` is the state at mount. The queue keeps every state, so a burst
/// of start/stop transitions yields one edge per start. Delivery handles are
/// dropped immediately; deliveries are tracked by the submitter and awaited
/// with [`BeaconSubmitter::drain`].
pub async fn watch_runs(
    initial: RunState,
    mut rx: mpsc::Receiver<RunState>,
    submitter: Arc<BeaconSubmitter>,
    no_project_id: String,
    shutdown: CancellationToken,
) {
    let mut trigger = StartTrigger::mount(&initial, no_project_id);
    info!(started = initial.started, "beacon trigger watching run state");

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                debug!("beacon trigger shutting down");
                break;
            }
            next = rx.recv() => {
                let Some(state) = next else {
                    debug!("run state senders dropped, beacon trigger exiting");
                    break;
                };
                if let Some(project_id) = trigger.observe(&state) {
                    drop(submitter.submit(&project_id));
                }
            }
        }
    }
}
