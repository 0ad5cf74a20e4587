//! Live packet capture monitor with DoS/DDoS detection and automatic
//! mitigation.
//!
//! The core ingests decoded packet lines from an external capture tool,
//! detects rate anomalies, and can exclude or firewall-block offending
//! sources. Presentation is out of scope: collaborators subscribe to
//! [`events::CoreEvent`]s and drive the core through
//! [`core::ControllerHandle`].

pub mod cli;
pub mod config;
pub mod core;
pub mod events;
pub mod models;
pub mod utils;
