use serde::{Deserialize, Serialize};

/// Capture session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Path to the capture tool executable (tshark or compatible)
    pub tool_path: String,
    /// Interface selection passed to the capture tool (`-i`)
    pub interface: String,
    /// User capture filter expression (`-f`), may be empty
    pub filter: String,
    /// Capacity of the event broadcast channel
    pub event_buffer: usize,
}

/// Rate-based detection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionConfig {
    /// Per-source packet threshold (packets per window)
    pub per_source_threshold: u32,
    /// Aggregate packet threshold (packets per window)
    pub aggregate_threshold: u32,
    /// Minimum window length in milliseconds before counts are evaluated
    pub window_millis: u64,
}

/// Mitigation and auto-block configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MitigationConfig {
    /// Whether suspected IPs are excluded from the capture automatically
    pub auto_block: bool,
    /// Block on the first alert immediately, bypassing the delay
    pub simple_mode: bool,
    /// Seconds to wait after an alert before auto-blocking (0 = immediate)
    pub block_delay_secs: u64,
    /// Build and log firewall commands without executing them
    pub dry_run: bool,
    /// Keep a mitigation record in memory when its revert command fails
    pub retain_failed_undo: bool,
    /// Path of the append-only mitigation log
    pub log_file: String,
}

/// Capture controller configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Quiet period after a filter edit before the capture is restarted
    pub debounce_millis: u64,
}

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Capture session configuration
    pub capture: CaptureConfig,
    /// Detection configuration
    pub detection: DetectionConfig,
    /// Mitigation configuration
    pub mitigation: MitigationConfig,
    /// Controller configuration
    pub controller: ControllerConfig,
}

/// Upper bound accepted for `block_delay_secs`.
pub const MAX_BLOCK_DELAY_SECS: u64 = 600;

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            tool_path: "tshark".to_string(),
            interface: "1".to_string(),
            filter: String::new(),
            event_buffer: 1024,
        }
    }
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            per_source_threshold: 100,
            aggregate_threshold: 1000,
            window_millis: 1000,
        }
    }
}

impl Default for MitigationConfig {
    fn default() -> Self {
        Self {
            auto_block: true,
            simple_mode: true,
            block_delay_secs: 5,
            dry_run: false,
            retain_failed_undo: false,
            log_file: "mitigation.log".to_string(),
        }
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            debounce_millis: 800,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            capture: CaptureConfig::default(),
            detection: DetectionConfig::default(),
            mitigation: MitigationConfig::default(),
            controller: ControllerConfig::default(),
        }
    }
}
