//! Capture-level blocklist and effective-filter computation.

use std::collections::HashSet;

/// Owns the authoritative set of capture-level excluded IPs.
///
/// Entries are only ever removed through explicit blocklist management;
/// the detector and scheduler never remove them.
#[derive(Debug)]
pub struct BlocklistManager {
    blocked: HashSet<String>,
    auto_block: bool,
}

impl BlocklistManager {
    pub fn new(auto_block: bool) -> Self {
        Self {
            blocked: HashSet::new(),
            auto_block,
        }
    }

    /// Add an IP. Returns `true` if the IP was not already blocked.
    pub fn insert(&mut self, ip: &str) -> bool {
        self.blocked.insert(ip.to_string())
    }

    /// Remove an IP. Returns `true` if the IP was present.
    pub fn remove(&mut self, ip: &str) -> bool {
        self.blocked.remove(ip)
    }

    pub fn contains(&self, ip: &str) -> bool {
        self.blocked.contains(ip)
    }

    pub fn is_empty(&self) -> bool {
        self.blocked.is_empty()
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.blocked.iter().cloned().collect()
    }

    /// Conjunct the user filter with a `not host X` clause per blocked IP.
    ///
    /// Returns the user filter unchanged when auto-block is disabled or
    /// nothing is blocked.
    pub fn effective_filter(&self, user_filter: &str) -> String {
        if !self.auto_block || self.blocked.is_empty() {
            return user_filter.to_string();
        }
        let exclusion = self
            .blocked
            .iter()
            .map(|ip| format!("not host {}", ip))
            .collect::<Vec<_>>()
            .join(" and ");
        if user_filter.is_empty() {
            exclusion
        } else {
            format!("({}) and ({})", user_filter, exclusion)
        }
    }
}
