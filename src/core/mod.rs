//! Core functionality of the capture monitor.
//!
//! This module contains the capture subprocess lifecycle, the rate-based
//! anomaly detector, the mitigation-decision state machine, the firewall
//! executor with its durable log, and the top-level controller.

pub mod blocklist;
pub mod capture;
pub mod controller;
pub mod detector;
pub mod executor;
pub mod parser;
pub mod scheduler;

pub use blocklist::BlocklistManager;
pub use capture::{CaptureError, CaptureSession, CaptureStatus};
pub use controller::{CaptureController, ControllerHandle};
pub use detector::RateDetector;
pub use executor::{
    platform_backend, FirewallBackend, IptablesBackend, MitigationError, MitigationExecutor,
    MitigationRecord, NetshBackend,
};
pub use parser::{parse_line, PacketRecord, FIELD_PLACEHOLDER};
pub use scheduler::{shared_state, MitigationScheduler, MitigationState, SharedState};
