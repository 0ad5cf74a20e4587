//! Mitigation decision state machine.
//!
//! Converts detector alerts into blocking decisions under one of three
//! policies: simple (block on first flag), delayed auto-block, or manual
//! (suspects accumulate until the operator mitigates them explicitly).
//!
//! All shared mitigation state lives behind one mutex: delayed blocks fire
//! from timer tasks, manual mitigation and undo from operator actions, and
//! flags from the ingestion worker, so every path goes through
//! [`SharedState`].

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info};
use tokio::sync::{mpsc, Mutex};
use tokio::task::AbortHandle;

use crate::core::blocklist::BlocklistManager;
use crate::core::controller::ControllerCmd;
use crate::core::executor::MitigationRecord;
use crate::core::parser::FIELD_PLACEHOLDER;
use crate::events::{Alert, EventBus};
use crate::models::MitigationConfig;

/// Shared mitigation state guarded by a single mutex.
pub struct MitigationState {
    /// IPs flagged by at least one DoS alert, not necessarily blocked
    pub suspects: HashSet<String>,
    /// Capture-level exclusion set and filter computation
    pub blocklist: BlocklistManager,
    /// Delayed blocks waiting for their timer, keyed by IP
    pub pending: HashMap<String, AbortHandle>,
    /// Mitigation records still eligible for undo
    pub records: Vec<MitigationRecord>,
}

impl MitigationState {
    pub fn new(auto_block: bool) -> Self {
        Self {
            suspects: HashSet::new(),
            blocklist: BlocklistManager::new(auto_block),
            pending: HashMap::new(),
            records: Vec::new(),
        }
    }
}

pub type SharedState = Arc<Mutex<MitigationState>>;

pub fn shared_state(auto_block: bool) -> SharedState {
    Arc::new(Mutex::new(MitigationState::new(auto_block)))
}

/// Scheduler handle; cheap to clone across tasks.
#[derive(Clone)]
pub struct MitigationScheduler {
    state: SharedState,
    config: MitigationConfig,
    bus: EventBus,
    controller: mpsc::UnboundedSender<ControllerCmd>,
}

impl MitigationScheduler {
    pub fn new(
        state: SharedState,
        config: MitigationConfig,
        bus: EventBus,
        controller: mpsc::UnboundedSender<ControllerCmd>,
    ) -> Self {
        Self {
            state,
            config,
            bus,
            controller,
        }
    }

    pub fn state(&self) -> SharedState {
        Arc::clone(&self.state)
    }

    /// Flag an IP as suspected after a DoS alert.
    ///
    /// Re-flagging an IP that already has a pending block is ignored: the
    /// original timer keeps its deadline, so a pending block is never lost
    /// and no competing timers exist for one IP.
    pub async fn flag_suspect(&self, ip: &str) {
        if ip.is_empty() || ip == FIELD_PLACEHOLDER {
            return;
        }
        let mut state = self.state.lock().await;
        state.suspects.insert(ip.to_string());

        // Simple mode blocks immediately regardless of the delay setting.
        if self.config.simple_mode {
            self.block_now(&mut state, ip, "Simple Mode");
            return;
        }
        if !self.config.auto_block {
            // Manual mode: suspects accumulate until the operator acts.
            return;
        }
        if self.config.block_delay_secs == 0 {
            self.block_now(&mut state, ip, "Auto-Block (immediate)");
            return;
        }
        if state.blocklist.contains(ip) {
            return;
        }
        if state.pending.contains_key(ip) {
            debug!("Block of {} already pending, keeping existing deadline", ip);
            return;
        }

        let delay = Duration::from_secs(self.config.block_delay_secs);
        let scheduler = self.clone();
        let pending_ip = ip.to_string();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let mut state = scheduler.state.lock().await;
            state.pending.remove(&pending_ip);
            scheduler.block_now(&mut state, &pending_ip, "Auto-Block (scheduled)");
        });
        state.pending.insert(ip.to_string(), handle.abort_handle());
        info!(
            "Scheduled auto-block of {} in {}s",
            ip, self.config.block_delay_secs
        );
    }

    /// Add the IP to the blocklist, announce, and request a capture restart.
    ///
    /// A no-op when the IP is already blocked, so repeated flags of the
    /// same source do not cause restart storms.
    fn block_now(&self, state: &mut MitigationState, ip: &str, reason: &str) {
        if !state.blocklist.insert(ip) {
            return;
        }
        info!("Blocking {} ({})", ip, reason);
        self.bus
            .alert(Alert::info(format!("AUTO-BLOCK: {} - {}", ip, reason)));
        let _ = self.controller.send(ControllerCmd::Restart);
    }

    pub async fn suspects_snapshot(&self) -> Vec<String> {
        let state = self.state.lock().await;
        state.suspects.iter().cloned().collect()
    }

    /// Abort every pending delayed block.
    ///
    /// Stopping capture deliberately does not call this; pending blocks
    /// keep running across a stop. Only process shutdown cancels them.
    pub async fn cancel_all_pending(&self) {
        let mut state = self.state.lock().await;
        for (ip, handle) in state.pending.drain() {
            debug!("Cancelling pending block of {}", ip);
            handle.abort();
        }
    }
}
