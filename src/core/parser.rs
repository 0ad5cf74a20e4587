//! Decoding of capture-tool output lines.
//!
//! The capture tool is asked for five tab-separated fields per packet:
//! frame time, protocol, source IP, destination IP, info. Lines that do
//! not carry all five fields are dropped silently; partial lines are
//! expected under pipe buffering and are not errors.

use serde::{Deserialize, Serialize};

/// Placeholder substituted for empty captured fields so downstream
/// consumers never see an empty value.
pub const FIELD_PLACEHOLDER: &str = "-";

/// One decoded packet line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacketRecord {
    pub timestamp: String,
    pub protocol: String,
    pub source_ip: String,
    pub dest_ip: String,
    pub info: String,
}

/// Parse one tab-separated capture line into a [`PacketRecord`].
///
/// Returns `None` when fewer than five fields are present. Empty fields
/// are replaced by [`FIELD_PLACEHOLDER`].
pub fn parse_line(line: &str) -> Option<PacketRecord> {
    // `split` keeps trailing empty fields, matching `split("\t", -1)` semantics.
    let mut fields: Vec<&str> = line.split('\t').collect();
    if fields.len() < 5 {
        return None;
    }
    for field in fields.iter_mut() {
        if field.is_empty() {
            *field = FIELD_PLACEHOLDER;
        }
    }
    Some(PacketRecord {
        timestamp: fields[0].to_string(),
        protocol: fields[1].to_string(),
        source_ip: fields[2].to_string(),
        dest_ip: fields[3].to_string(),
        info: fields[4].to_string(),
    })
}

/// Noisy ICMP "destination unreachable" lines are suppressed before they
/// reach consumers.
pub fn is_noise(record: &PacketRecord) -> bool {
    record.info.to_lowercase().contains("destination unreachable")
}
