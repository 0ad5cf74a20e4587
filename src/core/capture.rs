//! Capture subprocess lifecycle and line ingestion.
//!
//! One `CaptureSession` owns at most one capture-tool process. A dedicated
//! read-loop task is the sole producer of packet records and window
//! evaluations, so the detector's counters stay single-threaded.

use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tokio::sync::Mutex;

use crate::core::detector::RateDetector;
use crate::core::parser::{is_noise, parse_line};
use crate::core::scheduler::MitigationScheduler;
use crate::events::{Alert, AlertKind, EventBus};
use crate::models::DetectionConfig;

/// Errors that can occur while managing the capture subprocess
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("failed to launch capture tool: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("capture tool stdout was not captured")]
    MissingStdout,
}

/// Capture session state machine.
///
/// `Idle → Starting → Running → Stopped`, with `Error` reachable on
/// launch failure and both `Error` and `Stopped` restartable via a fresh
/// `start`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CaptureStatus {
    Idle,
    Starting,
    Running,
    Stopped,
    Error(String),
}

struct SessionInner {
    bus: EventBus,
    detection: DetectionConfig,
    scheduler: MitigationScheduler,
    /// Running child tagged with the generation of the `start` that owns
    /// it. A finished read loop tears down through `stop_if_owner`, so a
    /// restart that has already replaced the child is never clobbered.
    child: Mutex<Option<(u64, Child)>>,
    status: std::sync::Mutex<CaptureStatus>,
    generation: AtomicU64,
}

/// Manages one external capture-tool process for one logical run.
#[derive(Clone)]
pub struct CaptureSession {
    inner: Arc<SessionInner>,
}

impl CaptureSession {
    pub fn new(bus: EventBus, detection: DetectionConfig, scheduler: MitigationScheduler) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                bus,
                detection,
                scheduler,
                child: Mutex::new(None),
                status: std::sync::Mutex::new(CaptureStatus::Idle),
                generation: AtomicU64::new(0),
            }),
        }
    }

    pub fn status(&self) -> CaptureStatus {
        self.inner.status.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn set_status(&self, status: CaptureStatus) {
        *self.inner.status.lock().unwrap_or_else(|e| e.into_inner()) = status.clone();
        self.inner.bus.status(status);
    }

    /// Launch the capture tool and begin the read loop.
    ///
    /// Validates nothing itself; path and interface checks are the
    /// caller's concern. Launch failure reports an `Error` status plus an
    /// alert and leaves the session restartable.
    pub async fn start(
        &self,
        tool_path: &str,
        interface: &str,
        filter: &str,
    ) -> Result<(), CaptureError> {
        self.set_status(CaptureStatus::Starting);

        let mut cmd = Command::new(tool_path);
        cmd.arg("-i").arg(interface).arg("-l");
        if !filter.is_empty() {
            cmd.arg("-f").arg(filter);
        }
        cmd.args([
            "-T",
            "fields",
            "-e",
            "frame.time",
            "-e",
            "_ws.col.Protocol",
            "-e",
            "ip.src",
            "-e",
            "ip.dst",
            "-e",
            "_ws.col.Info",
        ]);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                self.report_start_failure(&e.to_string());
                return Err(CaptureError::Spawn(e));
            }
        };

        let stdout = match child.stdout.take() {
            Some(stdout) => stdout,
            None => {
                let e = CaptureError::MissingStdout;
                self.report_start_failure(&e.to_string());
                return Err(e);
            }
        };
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!("capture stderr: {}", line);
                }
            });
        }

        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        *self.inner.child.lock().await = Some((generation, child));
        self.set_status(CaptureStatus::Running);
        info!("Capture started (iface: {}, filter: {:?})", interface, filter);

        let session = self.clone();
        tokio::spawn(async move {
            session.read_loop(stdout, generation).await;
        });
        Ok(())
    }

    async fn read_loop(&self, stdout: ChildStdout, generation: u64) {
        let mut lines = BufReader::new(stdout).lines();
        let mut detector = RateDetector::new(&self.inner.detection);
        while let Ok(Some(line)) = lines.next_line().await {
            self.ingest_line(&line, &mut detector).await;
        }
        // Natural end of stream. Tear down only if this loop's start
        // still owns the child; a restart may have superseded it.
        if self.stop_if_owner(generation).await {
            self.inner.bus.alert(Alert::info("Capture stopped"));
        }
    }

    /// Kill and clear the child only while it is still owned by the given
    /// start generation. Ownership check and teardown happen under the
    /// child lock, so a concurrent restart cannot lose its fresh child to
    /// a stale read loop.
    async fn stop_if_owner(&self, generation: u64) -> bool {
        let mut guard = self.inner.child.lock().await;
        match guard.as_mut() {
            Some((owner, child)) if *owner == generation => {
                if let Err(e) = child.start_kill() {
                    debug!("Capture process already gone: {}", e);
                }
                *guard = None;
                self.set_status(CaptureStatus::Stopped);
                true
            }
            _ => false,
        }
    }

    fn report_start_failure(&self, reason: &str) {
        warn!("Capture tool launch failed: {}", reason);
        self.inner
            .bus
            .alert(Alert::info(format!("Failed to start capture tool: {}", reason)));
        self.set_status(CaptureStatus::Error(reason.to_string()));
    }

    /// Decode one line, forward the row, and run detection on it.
    pub async fn ingest_line(&self, line: &str, detector: &mut RateDetector) {
        let record = match parse_line(line) {
            Some(record) => record,
            None => return,
        };
        if is_noise(&record) {
            return;
        }
        let alerts = detector.observe(&record.source_ip);
        self.inner.bus.packet(record);
        for alert in alerts {
            if alert.kind == AlertKind::Dos {
                if let Some(ip) = alert.source_ip.clone() {
                    self.inner.scheduler.flag_suspect(&ip).await;
                }
            }
            self.inner.bus.alert(alert);
        }
    }

    /// Terminate the subprocess if one is running. Idempotent: calling it
    /// with no process is a no-op apart from the `Stopped` notification.
    pub async fn stop(&self) {
        let mut guard = self.inner.child.lock().await;
        if let Some((_, child)) = guard.as_mut() {
            if let Err(e) = child.start_kill() {
                debug!("Capture process already gone: {}", e);
            }
        }
        *guard = None;
        self.set_status(CaptureStatus::Stopped);
    }

    /// Run the capture tool with `-D` and return the interface listing.
    pub async fn list_interfaces(tool_path: &str) -> Result<Vec<String>, CaptureError> {
        let output = Command::new(tool_path)
            .arg("-D")
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(CaptureError::Spawn)?;
        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(|line| line.trim().to_string())
            .filter(|line| !line.is_empty())
            .collect())
    }
}
