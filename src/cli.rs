use clap::Parser;

use crate::models::Config;

/// pktguard — live packet capture monitor with DoS/DDoS detection and
/// automatic mitigation.
///
/// Streams decoded packets from a tshark-compatible capture tool, raises
/// alerts on per-source and aggregate rate thresholds, and can exclude or
/// firewall-block offending sources automatically.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "pktguard",
    version,
    about = "Live packet capture monitor with DoS/DDoS detection and automatic mitigation",
    long_about = None,
)]
pub struct Cli {
    /// Path to the capture tool executable (tshark or compatible).
    #[arg(short = 't', long = "tool-path", value_name = "PATH")]
    pub tool_path: Option<String>,

    /// Interface selection passed to the capture tool.
    ///
    /// Use --list-interfaces to see what the capture tool offers.
    #[arg(short = 'i', long = "interface", value_name = "IFACE")]
    pub interface: Option<String>,

    /// Capture filter expression (tcpdump syntax).
    #[arg(short = 'f', long = "filter", value_name = "EXPR")]
    pub filter: Option<String>,

    /// List the capture tool's interfaces and exit.
    #[arg(long = "list-interfaces")]
    pub list_interfaces: bool,

    /// Disable automatic capture-level blocking of suspected IPs.
    #[arg(long = "no-auto-block")]
    pub no_auto_block: bool,

    /// Disable simple mode (block on first alert) in favor of the
    /// configured block delay.
    #[arg(long = "no-simple-mode")]
    pub no_simple_mode: bool,

    /// Seconds to wait after an alert before auto-blocking (0 = immediate,
    /// max 600).
    #[arg(long = "block-delay", value_name = "SECS")]
    pub block_delay: Option<u64>,

    /// Build and log firewall commands without executing them.
    #[arg(long = "dry-run")]
    pub dry_run: bool,

    /// Emit events as newline-delimited JSON instead of log lines.
    #[arg(short = 'j', long = "json")]
    pub json: bool,
}

impl Cli {
    /// Overlay the command-line flags onto the file/env configuration.
    pub fn apply(&self, config: &mut Config) {
        if let Some(tool_path) = &self.tool_path {
            config.capture.tool_path = tool_path.clone();
        }
        if let Some(interface) = &self.interface {
            config.capture.interface = interface.clone();
        }
        if let Some(filter) = &self.filter {
            config.capture.filter = filter.clone();
        }
        if self.no_auto_block {
            config.mitigation.auto_block = false;
        }
        if self.no_simple_mode {
            config.mitigation.simple_mode = false;
        }
        if let Some(delay) = self.block_delay {
            config.mitigation.block_delay_secs = delay;
        }
        if self.dry_run {
            config.mitigation.dry_run = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_config() {
        let cli = Cli::parse_from([
            "pktguard",
            "-t",
            "/usr/bin/tshark",
            "-i",
            "2",
            "-f",
            "tcp",
            "--no-simple-mode",
            "--block-delay",
            "30",
        ]);
        let mut config = Config::default();
        cli.apply(&mut config);
        assert_eq!(config.capture.tool_path, "/usr/bin/tshark");
        assert_eq!(config.capture.interface, "2");
        assert_eq!(config.capture.filter, "tcp");
        assert!(!config.mitigation.simple_mode);
        assert!(config.mitigation.auto_block);
        assert_eq!(config.mitigation.block_delay_secs, 30);
    }

    #[test]
    fn test_defaults_leave_config_untouched() {
        let cli = Cli::parse_from(["pktguard"]);
        let mut config = Config::default();
        cli.apply(&mut config);
        assert_eq!(config.capture.tool_path, "tshark");
        assert!(config.mitigation.simple_mode);
    }
}
