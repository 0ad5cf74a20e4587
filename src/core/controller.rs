//! Top-level orchestration of capture, detection, and mitigation.
//!
//! The controller runs as one task consuming commands from collaborators
//! and from the scheduler. Restarts and firewall passes are blocking-ish
//! subprocess work, so mitigation passes run on their own tasks and never
//! on the ingestion worker.

use std::sync::Arc;

use log::{info, warn};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Duration;

use crate::core::capture::CaptureSession;
use crate::core::executor::{platform_backend, FirewallBackend, MitigationExecutor};
use crate::core::scheduler::{shared_state, MitigationScheduler, SharedState};
use crate::events::EventBus;
use crate::models::Config;

/// Commands accepted by the controller task.
#[derive(Debug)]
pub enum ControllerCmd {
    /// Start capture with the configured path, interface, and filter
    Start,
    /// Stop the running capture
    Stop,
    /// The user filter text changed; restart after the quiet period
    FilterChanged(String),
    /// Restart immediately with the recomputed effective filter
    Restart,
    /// Block the suspect snapshot (the collaborator confirmed already)
    MitigateSuspects,
    /// Revert every mitigation applied this session
    UndoMitigations,
    /// Manually add an IP to the capture blocklist
    BlockIp(String),
    /// Manually remove an IP from the capture blocklist
    UnblockIp(String),
    /// Cancel pending blocks, stop capture, and exit the task
    Shutdown,
}

/// Cloneable handle for collaborators to drive the controller.
#[derive(Clone)]
pub struct ControllerHandle {
    tx: mpsc::UnboundedSender<ControllerCmd>,
}

impl ControllerHandle {
    pub fn start(&self) {
        self.send(ControllerCmd::Start);
    }

    pub fn stop(&self) {
        self.send(ControllerCmd::Stop);
    }

    pub fn set_filter(&self, filter: impl Into<String>) {
        self.send(ControllerCmd::FilterChanged(filter.into()));
    }

    /// Request a mitigation pass over the current suspects. Confirmation
    /// is presented by the collaborator before calling this.
    pub fn mitigate_suspects(&self) {
        self.send(ControllerCmd::MitigateSuspects);
    }

    pub fn undo_mitigations(&self) {
        self.send(ControllerCmd::UndoMitigations);
    }

    pub fn block_ip(&self, ip: impl Into<String>) {
        self.send(ControllerCmd::BlockIp(ip.into()));
    }

    pub fn unblock_ip(&self, ip: impl Into<String>) {
        self.send(ControllerCmd::UnblockIp(ip.into()));
    }

    pub fn shutdown(&self) {
        self.send(ControllerCmd::Shutdown);
    }

    fn send(&self, cmd: ControllerCmd) {
        if self.tx.send(cmd).is_err() {
            warn!("Controller task is gone; command dropped");
        }
    }
}

/// Orchestrator task state.
pub struct CaptureController {
    config: Config,
    session: CaptureSession,
    scheduler: MitigationScheduler,
    executor: Arc<MitigationExecutor>,
    state: SharedState,
    current_filter: String,
    rx: mpsc::UnboundedReceiver<ControllerCmd>,
    self_tx: mpsc::UnboundedSender<ControllerCmd>,
    debounce: Option<JoinHandle<()>>,
}

impl CaptureController {
    /// Wire up the full pipeline and spawn the controller task.
    pub fn spawn(config: Config, bus: EventBus) -> ControllerHandle {
        Self::spawn_with_backend(config, bus, platform_backend())
    }

    /// Same as [`spawn`](Self::spawn) with an explicit firewall backend.
    pub fn spawn_with_backend(
        config: Config,
        bus: EventBus,
        backend: Box<dyn FirewallBackend>,
    ) -> ControllerHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let state = shared_state(config.mitigation.auto_block || config.mitigation.simple_mode);
        let scheduler = MitigationScheduler::new(
            Arc::clone(&state),
            config.mitigation.clone(),
            bus.clone(),
            tx.clone(),
        );
        let executor = Arc::new(MitigationExecutor::new(
            backend,
            Arc::clone(&state),
            bus.clone(),
            &config.mitigation,
        ));
        let session = CaptureSession::new(bus, config.detection.clone(), scheduler.clone());

        let controller = Self {
            current_filter: config.capture.filter.clone(),
            config,
            session,
            scheduler,
            executor,
            state,
            rx,
            self_tx: tx.clone(),
            debounce: None,
        };
        tokio::spawn(controller.run());
        ControllerHandle { tx }
    }

    async fn run(mut self) {
        while let Some(cmd) = self.rx.recv().await {
            match cmd {
                ControllerCmd::Start | ControllerCmd::Restart => {
                    self.restart().await;
                }
                ControllerCmd::Stop => {
                    self.session.stop().await;
                }
                ControllerCmd::FilterChanged(filter) => {
                    self.current_filter = filter;
                    self.arm_debounce();
                }
                ControllerCmd::MitigateSuspects => {
                    let executor = Arc::clone(&self.executor);
                    tokio::spawn(async move {
                        let applied = executor.mitigate_all().await;
                        info!("Mitigation pass finished ({} blocks applied)", applied);
                    });
                }
                ControllerCmd::UndoMitigations => {
                    let executor = Arc::clone(&self.executor);
                    tokio::spawn(async move {
                        let reverted = executor.undo().await;
                        info!("Undo pass finished ({} rules reverted)", reverted);
                    });
                }
                ControllerCmd::BlockIp(ip) => {
                    let changed = {
                        let mut state = self.state.lock().await;
                        state.blocklist.insert(&ip)
                    };
                    if changed {
                        self.restart().await;
                    }
                }
                ControllerCmd::UnblockIp(ip) => {
                    let changed = {
                        let mut state = self.state.lock().await;
                        state.blocklist.remove(&ip)
                    };
                    if changed {
                        self.restart().await;
                    }
                }
                ControllerCmd::Shutdown => {
                    self.scheduler.cancel_all_pending().await;
                    self.session.stop().await;
                    info!("Controller shut down");
                    break;
                }
            }
        }
    }

    /// Restart the quiet-period timer; the restart fires only once typing
    /// settles, avoiding a restart storm per keystroke.
    fn arm_debounce(&mut self) {
        if let Some(handle) = self.debounce.take() {
            handle.abort();
        }
        let quiet = Duration::from_millis(self.config.controller.debounce_millis);
        let tx = self.self_tx.clone();
        self.debounce = Some(tokio::spawn(async move {
            tokio::time::sleep(quiet).await;
            let _ = tx.send(ControllerCmd::Restart);
        }));
    }

    /// Stop the current session and start a fresh one with the same tool
    /// path and interface and the recomputed effective filter.
    async fn restart(&mut self) {
        self.session.stop().await;
        let effective = {
            let state = self.state.lock().await;
            state.blocklist.effective_filter(&self.current_filter)
        };
        if let Err(e) = self
            .session
            .start(
                &self.config.capture.tool_path,
                &self.config.capture.interface,
                &effective,
            )
            .await
        {
            warn!("Capture restart failed: {}", e);
        }
    }
}
