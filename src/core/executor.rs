//! Firewall mitigation executor and its durable audit log.
//!
//! Blocks are applied through a platform backend: a named-rule backend
//! (`netsh advfirewall`, rules named `Block_<ip>`) or an unnamed-rule
//! backend (`iptables` DROP entries matched by IP on undo). Every
//! successful command appends a [`MitigationRecord`] to the in-memory
//! list and to the append-only mitigation log.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::process::Stdio;

use log::warn;
use thiserror::Error;
use tokio::process::Command;

use crate::core::scheduler::SharedState;
use crate::events::{Alert, EventBus};
use crate::models::MitigationConfig;
use crate::utils::epoch_millis;

/// Errors that can occur while executing mitigation commands
#[derive(Error, Debug)]
pub enum MitigationError {
    #[error("empty mitigation command")]
    EmptyCommand,
    #[error("failed to run `{command}`: {source}")]
    Launch {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("`{command}` exited with {status}: {output}")]
    CommandFailed {
        command: String,
        status: std::process::ExitStatus,
        output: String,
    },
}

/// One applied mitigation, eligible for undo while held in memory.
///
/// Immutable once logged; the durable log is never rewritten.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MitigationRecord {
    pub timestamp_ms: u64,
    pub backend: String,
    pub ip: String,
    /// Rule name on the named-rule backend, empty otherwise
    pub rule_name: String,
    pub command: String,
    pub success: bool,
    pub dry_run: bool,
}

impl MitigationRecord {
    /// Pipe-separated log line. `|` inside the rule name or command is
    /// replaced with `_` so the field layout stays parseable.
    pub fn to_line(&self) -> String {
        format!(
            "{}|{}|{}|{}|{}|{}|{}",
            self.timestamp_ms,
            self.backend,
            self.ip,
            self.rule_name.replace('|', "_"),
            self.command.replace('|', "_"),
            if self.success { 1 } else { 0 },
            if self.dry_run { 1 } else { 0 },
        )
    }
}

/// Platform firewall command builder.
#[cfg_attr(test, mockall::automock)]
pub trait FirewallBackend: Send + Sync {
    fn name(&self) -> &'static str;
    /// Build the block command for an IP. Returns the argv and the rule
    /// name (empty on backends without named rules).
    fn apply_command(&self, ip: &str) -> (Vec<String>, String);
    /// Build the inverse command for a previously applied record.
    fn revert_command(&self, record: &MitigationRecord) -> Vec<String>;
}

/// Named-rule backend driving `netsh advfirewall`.
pub struct NetshBackend;

impl FirewallBackend for NetshBackend {
    fn name(&self) -> &'static str {
        "windows"
    }

    fn apply_command(&self, ip: &str) -> (Vec<String>, String) {
        let rule_name = format!("Block_{}", ip);
        let argv = vec![
            "netsh".to_string(),
            "advfirewall".to_string(),
            "firewall".to_string(),
            "add".to_string(),
            "rule".to_string(),
            format!("name={}", rule_name),
            "dir=in".to_string(),
            "action=block".to_string(),
            format!("remoteip={}", ip),
        ];
        (argv, rule_name)
    }

    fn revert_command(&self, record: &MitigationRecord) -> Vec<String> {
        vec![
            "netsh".to_string(),
            "advfirewall".to_string(),
            "firewall".to_string(),
            "delete".to_string(),
            "rule".to_string(),
            format!("name={}", record.rule_name),
        ]
    }
}

/// Unnamed-rule backend driving `iptables`; undo matches by IP.
pub struct IptablesBackend;

impl FirewallBackend for IptablesBackend {
    fn name(&self) -> &'static str {
        "posix"
    }

    fn apply_command(&self, ip: &str) -> (Vec<String>, String) {
        let argv = vec![
            "/bin/sh".to_string(),
            "-c".to_string(),
            format!("iptables -A INPUT -s {} -j DROP", ip),
        ];
        (argv, String::new())
    }

    fn revert_command(&self, record: &MitigationRecord) -> Vec<String> {
        vec![
            "/bin/sh".to_string(),
            "-c".to_string(),
            format!("iptables -D INPUT -s {} -j DROP", record.ip),
        ]
    }
}

/// Backend for the host platform. Fixed at construction, not switchable
/// mid-session.
pub fn platform_backend() -> Box<dyn FirewallBackend> {
    if cfg!(windows) {
        Box::new(NetshBackend)
    } else {
        Box::new(IptablesBackend)
    }
}

/// Applies and reverts firewall blocks and keeps the audit trail.
pub struct MitigationExecutor {
    backend: Box<dyn FirewallBackend>,
    state: SharedState,
    bus: EventBus,
    log_path: PathBuf,
    dry_run: bool,
    retain_failed_undo: bool,
}

impl MitigationExecutor {
    pub fn new(
        backend: Box<dyn FirewallBackend>,
        state: SharedState,
        bus: EventBus,
        config: &MitigationConfig,
    ) -> Self {
        Self {
            backend,
            state,
            bus,
            log_path: PathBuf::from(&config.log_file),
            dry_run: config.dry_run,
            retain_failed_undo: config.retain_failed_undo,
        }
    }

    /// Apply a firewall block for one IP.
    ///
    /// On success the record is held in memory for undo and appended to
    /// the durable log. Failure is reported as an alert and leaves no
    /// record.
    pub async fn apply(&self, ip: &str) -> Result<MitigationRecord, MitigationError> {
        let (argv, rule_name) = self.backend.apply_command(ip);
        let command = argv.join(" ");

        if self.dry_run {
            self.bus.alert(Alert::info(format!(
                "[dry-run] mitigation for {}: {}",
                ip, command
            )));
        } else {
            match run_command(&argv).await {
                Ok(output) => {
                    self.bus
                        .alert(Alert::info(format!("Mitigation output for {}:\n{}", ip, output)));
                }
                Err(e) => {
                    self.bus.alert(Alert::info(format!(
                        "Failed to apply mitigation for {}: {}",
                        ip, e
                    )));
                    return Err(e);
                }
            }
        }

        let record = MitigationRecord {
            timestamp_ms: epoch_millis(),
            backend: self.backend.name().to_string(),
            ip: ip.to_string(),
            rule_name,
            command,
            success: true,
            dry_run: self.dry_run,
        };
        {
            let mut state = self.state.lock().await;
            state.records.push(record.clone());
        }
        self.append_log(&record.to_line());
        Ok(record)
    }

    /// Apply a block for every currently suspected IP.
    ///
    /// Confirmation is the caller's responsibility. Per-IP failures are
    /// reported and do not abort the batch; the suspect set is cleared
    /// unconditionally after the pass. Returns the number of blocks
    /// applied.
    pub async fn mitigate_all(&self) -> usize {
        let suspects: Vec<String> = {
            let state = self.state.lock().await;
            state.suspects.iter().cloned().collect()
        };
        if suspects.is_empty() {
            self.bus.alert(Alert::info("No suspected IPs to mitigate"));
            return 0;
        }
        let mut applied = 0;
        for ip in &suspects {
            if self.apply(ip).await.is_ok() {
                applied += 1;
            }
        }
        let mut state = self.state.lock().await;
        state.suspects.clear();
        applied
    }

    /// Revert every held mitigation record, then append the `UNDO:`
    /// terminator to the durable log.
    ///
    /// When `retain_failed_undo` is set, a record whose revert command
    /// failed stays in memory for a later retry; otherwise it is removed
    /// regardless. Returns the number of successful reverts.
    pub async fn undo(&self) -> usize {
        let records: Vec<MitigationRecord> = {
            let mut state = self.state.lock().await;
            std::mem::take(&mut state.records)
        };
        if records.is_empty() {
            self.bus.alert(Alert::info("No mitigation records to undo"));
            return 0;
        }

        let mut retained = Vec::new();
        let mut reverted = 0;
        for record in records {
            let argv = self.backend.revert_command(&record);
            let command = argv.join(" ");
            if record.dry_run || self.dry_run {
                self.bus.alert(Alert::info(format!(
                    "[dry-run] undo for {}: {}",
                    record.ip, command
                )));
                reverted += 1;
                continue;
            }
            match run_command(&argv).await {
                Ok(output) => {
                    self.bus
                        .alert(Alert::info(format!("Undo output for {}:\n{}", record.ip, output)));
                    reverted += 1;
                }
                Err(e) => {
                    self.bus.alert(Alert::info(format!(
                        "Failed to undo mitigation for {}: {}",
                        record.ip, e
                    )));
                    if self.retain_failed_undo {
                        retained.push(record);
                    }
                }
            }
        }

        {
            let mut state = self.state.lock().await;
            // Records applied while the pass ran stay alongside retries.
            state.records.extend(retained);
        }
        self.append_log(&format!("UNDO:{}", epoch_millis()));
        reverted
    }

    /// Append one line to the durable log. Write failures are reported as
    /// alerts and never block mitigation.
    fn append_log(&self, line: &str) {
        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .and_then(|mut file| writeln!(file, "{}", line));
        if let Err(e) = result {
            warn!("Failed to write mitigation log: {}", e);
            self.bus
                .alert(Alert::info(format!("Failed to write mitigation log: {}", e)));
        }
    }
}

async fn run_command(argv: &[String]) -> Result<String, MitigationError> {
    let (program, args) = argv.split_first().ok_or(MitigationError::EmptyCommand)?;
    let command = argv.join(" ");
    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|source| MitigationError::Launch {
            command: command.clone(),
            source,
        })?;
    let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
    combined.push_str(&String::from_utf8_lossy(&output.stderr));
    if !output.status.success() {
        return Err(MitigationError::CommandFailed {
            command,
            status: output.status,
            output: combined,
        });
    }
    Ok(combined)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::scheduler::shared_state;
    use std::sync::Arc;
    use uuid::Uuid;

    /// Backend whose commands always succeed without touching the firewall.
    struct EchoBackend;

    impl FirewallBackend for EchoBackend {
        fn name(&self) -> &'static str {
            "posix"
        }
        fn apply_command(&self, ip: &str) -> (Vec<String>, String) {
            (
                vec!["/bin/echo".to_string(), "add".to_string(), ip.to_string()],
                String::new(),
            )
        }
        fn revert_command(&self, record: &MitigationRecord) -> Vec<String> {
            vec![
                "/bin/echo".to_string(),
                "del".to_string(),
                record.ip.clone(),
            ]
        }
    }

    /// Backend whose revert command always fails.
    struct FlakyUndoBackend;

    impl FirewallBackend for FlakyUndoBackend {
        fn name(&self) -> &'static str {
            "posix"
        }
        fn apply_command(&self, ip: &str) -> (Vec<String>, String) {
            (
                vec!["/bin/echo".to_string(), "add".to_string(), ip.to_string()],
                String::new(),
            )
        }
        fn revert_command(&self, _record: &MitigationRecord) -> Vec<String> {
            vec!["/bin/false".to_string()]
        }
    }

    fn temp_log() -> PathBuf {
        std::env::temp_dir().join(format!("pktguard-test-{}.log", Uuid::new_v4()))
    }

    fn executor_with(
        backend: Box<dyn FirewallBackend>,
        config: MitigationConfig,
    ) -> (MitigationExecutor, SharedState, PathBuf) {
        let state = shared_state(true);
        let bus = EventBus::new(256);
        let log = temp_log();
        let config = MitigationConfig {
            log_file: log.to_string_lossy().into_owned(),
            ..config
        };
        let executor = MitigationExecutor::new(backend, Arc::clone(&state), bus, &config);
        (executor, state, log)
    }

    #[test]
    fn test_record_line_escapes_pipes() {
        let record = MitigationRecord {
            timestamp_ms: 42,
            backend: "posix".to_string(),
            ip: "1.2.3.4".to_string(),
            rule_name: "a|b".to_string(),
            command: "sh -c 'x|y'".to_string(),
            success: true,
            dry_run: false,
        };
        assert_eq!(record.to_line(), "42|posix|1.2.3.4|a_b|sh -c 'x_y'|1|0");
    }

    #[test]
    fn test_netsh_commands() {
        let backend = NetshBackend;
        let (argv, rule_name) = backend.apply_command("1.2.3.4");
        assert_eq!(rule_name, "Block_1.2.3.4");
        assert!(argv.contains(&"name=Block_1.2.3.4".to_string()));
        assert!(argv.contains(&"remoteip=1.2.3.4".to_string()));
        assert!(argv.contains(&"action=block".to_string()));

        let record = MitigationRecord {
            timestamp_ms: 0,
            backend: "windows".to_string(),
            ip: "1.2.3.4".to_string(),
            rule_name,
            command: String::new(),
            success: true,
            dry_run: false,
        };
        let revert = backend.revert_command(&record);
        assert!(revert.contains(&"delete".to_string()));
        assert!(revert.contains(&"name=Block_1.2.3.4".to_string()));
    }

    #[test]
    fn test_iptables_commands() {
        let backend = IptablesBackend;
        let (argv, rule_name) = backend.apply_command("5.6.7.8");
        assert!(rule_name.is_empty());
        assert_eq!(argv[2], "iptables -A INPUT -s 5.6.7.8 -j DROP");

        let record = MitigationRecord {
            timestamp_ms: 0,
            backend: "posix".to_string(),
            ip: "5.6.7.8".to_string(),
            rule_name,
            command: String::new(),
            success: true,
            dry_run: false,
        };
        assert_eq!(
            backend.revert_command(&record)[2],
            "iptables -D INPUT -s 5.6.7.8 -j DROP"
        );
    }

    #[tokio::test]
    async fn test_apply_undo_round_trip_logs_terminator() {
        let (executor, state, log) =
            executor_with(Box::new(EchoBackend), MitigationConfig::default());

        executor.apply("1.2.3.4").await.unwrap();
        assert_eq!(state.lock().await.records.len(), 1);

        assert_eq!(executor.undo().await, 1);
        assert!(state.lock().await.records.is_empty());

        let contents = std::fs::read_to_string(&log).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("|posix|1.2.3.4|"));
        assert!(lines[0].ends_with("|1|0"));
        assert!(lines[1].starts_with("UNDO:"));
        let _ = std::fs::remove_file(&log);
    }

    #[tokio::test]
    async fn test_failed_apply_leaves_no_record() {
        struct FailingBackend;
        impl FirewallBackend for FailingBackend {
            fn name(&self) -> &'static str {
                "posix"
            }
            fn apply_command(&self, _ip: &str) -> (Vec<String>, String) {
                (vec!["/bin/false".to_string()], String::new())
            }
            fn revert_command(&self, _record: &MitigationRecord) -> Vec<String> {
                vec!["/bin/false".to_string()]
            }
        }

        let (executor, state, log) =
            executor_with(Box::new(FailingBackend), MitigationConfig::default());
        assert!(executor.apply("1.2.3.4").await.is_err());
        assert!(state.lock().await.records.is_empty());
        assert!(!log.exists());
    }

    #[tokio::test]
    async fn test_mitigate_all_clears_suspects_despite_failures() {
        struct FailingBackend;
        impl FirewallBackend for FailingBackend {
            fn name(&self) -> &'static str {
                "posix"
            }
            fn apply_command(&self, _ip: &str) -> (Vec<String>, String) {
                (vec!["/bin/false".to_string()], String::new())
            }
            fn revert_command(&self, _record: &MitigationRecord) -> Vec<String> {
                vec!["/bin/false".to_string()]
            }
        }

        let (executor, state, log) =
            executor_with(Box::new(FailingBackend), MitigationConfig::default());
        {
            let mut state = state.lock().await;
            state.suspects.insert("1.1.1.1".to_string());
            state.suspects.insert("2.2.2.2".to_string());
        }
        assert_eq!(executor.mitigate_all().await, 0);
        assert!(state.lock().await.suspects.is_empty());
        let _ = std::fs::remove_file(&log);
    }

    #[tokio::test]
    async fn test_failed_undo_retains_record_when_configured() {
        let config = MitigationConfig {
            retain_failed_undo: true,
            ..MitigationConfig::default()
        };
        let (executor, state, log) = executor_with(Box::new(FlakyUndoBackend), config);

        executor.apply("9.9.9.9").await.unwrap();
        assert_eq!(executor.undo().await, 0);
        // The record survives for retry.
        assert_eq!(state.lock().await.records.len(), 1);

        let contents = std::fs::read_to_string(&log).unwrap();
        assert!(contents.lines().last().unwrap().starts_with("UNDO:"));
        let _ = std::fs::remove_file(&log);
    }

    #[tokio::test]
    async fn test_failed_undo_drops_record_by_default() {
        let (executor, state, log) =
            executor_with(Box::new(FlakyUndoBackend), MitigationConfig::default());

        executor.apply("9.9.9.9").await.unwrap();
        assert_eq!(executor.undo().await, 0);
        assert!(state.lock().await.records.is_empty());
        let _ = std::fs::remove_file(&log);
    }

    #[tokio::test]
    async fn test_dry_run_executes_nothing_but_logs() {
        let config = MitigationConfig {
            dry_run: true,
            ..MitigationConfig::default()
        };
        // A backend whose commands would fail if actually executed.
        struct FailingBackend;
        impl FirewallBackend for FailingBackend {
            fn name(&self) -> &'static str {
                "posix"
            }
            fn apply_command(&self, ip: &str) -> (Vec<String>, String) {
                (
                    vec![
                        "/bin/sh".to_string(),
                        "-c".to_string(),
                        format!("iptables -A INPUT -s {} -j DROP", ip),
                    ],
                    String::new(),
                )
            }
            fn revert_command(&self, record: &MitigationRecord) -> Vec<String> {
                vec![
                    "/bin/sh".to_string(),
                    "-c".to_string(),
                    format!("iptables -D INPUT -s {} -j DROP", record.ip),
                ]
            }
        }
        let (executor, state, log) = executor_with(Box::new(FailingBackend), config);

        let record = executor.apply("3.3.3.3").await.unwrap();
        assert!(record.dry_run);
        assert_eq!(executor.undo().await, 1);
        assert!(state.lock().await.records.is_empty());

        let contents = std::fs::read_to_string(&log).unwrap();
        assert!(contents.lines().next().unwrap().ends_with("|1|1"));
        let _ = std::fs::remove_file(&log);
    }

    #[tokio::test]
    async fn test_mock_backend_apply_invocation() {
        let mut mock = MockFirewallBackend::new();
        mock.expect_name().return_const("posix");
        mock.expect_apply_command().times(1).returning(|ip| {
            (
                vec!["/bin/echo".to_string(), ip.to_string()],
                String::new(),
            )
        });
        let (executor, state, log) =
            executor_with(Box::new(mock), MitigationConfig::default());

        executor.apply("7.7.7.7").await.unwrap();
        assert_eq!(state.lock().await.records[0].ip, "7.7.7.7");
        let _ = std::fs::remove_file(&log);
    }
}
