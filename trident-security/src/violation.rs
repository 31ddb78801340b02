//! Violation records and the bounded history ring.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use keel::{MetadataMap, SessionId};

/// Severity of a security event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViolationLevel {
    /// Informational.
    Low,
    /// Suspicious but tolerated.
    Medium,
    /// Blocked or redacted content.
    High,
    /// Definite attack pattern or secret leak.
    Critical,
}

/// One recorded security event.
#[non_exhaustive]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Violation {
    /// When the event occurred.
    pub timestamp: DateTime<Utc>,
    /// Session on whose behalf the call ran.
    pub session_id: SessionId,
    /// The tool involved.
    pub tool_name: String,
    /// Event type: the matching rule's name, or `rate_limit`.
    pub kind: String,
    /// Severity.
    pub level: ViolationLevel,
    /// Human-readable description.
    pub description: String,
    /// Offending input excerpt, when capturing it is safe.
    pub input: Option<String>,
    /// Extra detail (action taken, remaining block time).
    #[serde(default)]
    pub metadata: MetadataMap,
}

/// Per-level and per-kind violation counts.
#[non_exhaustive]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ViolationStats {
    /// Total recorded (and retained) violations.
    pub total: usize,
    /// Counts per severity level.
    pub by_level: HashMap<String, usize>,
    /// Counts per event kind.
    pub by_kind: HashMap<String, usize>,
}

/// Bounded FIFO history of violations. Oldest entries are trimmed once
/// the capacity is reached.
pub(crate) struct ViolationRing {
    entries: Mutex<VecDeque<Violation>>,
    capacity: usize,
}

impl ViolationRing {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            capacity,
        }
    }

    pub(crate) fn record(&self, violation: Violation) {
        let mut entries = self.entries.lock().expect("violation ring lock");
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(violation);
    }

    pub(crate) fn snapshot(
        &self,
        session: Option<&SessionId>,
        limit: Option<usize>,
    ) -> Vec<Violation> {
        let entries = self.entries.lock().expect("violation ring lock");
        let filtered = entries
            .iter()
            .rev()
            .filter(|v| session.is_none_or(|s| &v.session_id == s));
        match limit {
            Some(n) => filtered.take(n).cloned().collect(),
            None => filtered.cloned().collect(),
        }
    }

    pub(crate) fn stats(&self) -> ViolationStats {
        let entries = self.entries.lock().expect("violation ring lock");
        let mut stats = ViolationStats {
            total: entries.len(),
            ..ViolationStats::default()
        };
        for v in entries.iter() {
            let level = serde_json::to_value(v.level)
                .ok()
                .and_then(|j| j.as_str().map(str::to_string))
                .unwrap_or_default();
            *stats.by_level.entry(level).or_insert(0) += 1;
            *stats.by_kind.entry(v.kind.clone()).or_insert(0) += 1;
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn violation(kind: &str) -> Violation {
        Violation {
            timestamp: Utc::now(),
            session_id: SessionId::new("s-1"),
            tool_name: "echo".into(),
            kind: kind.into(),
            level: ViolationLevel::Medium,
            description: "test".into(),
            input: None,
            metadata: MetadataMap::new(),
        }
    }

    #[test]
    fn ring_trims_oldest_first() {
        let ring = ViolationRing::new(2);
        ring.record(violation("a"));
        ring.record(violation("b"));
        ring.record(violation("c"));
        let all = ring.snapshot(None, None);
        assert_eq!(all.len(), 2);
        // Newest first.
        assert_eq!(all[0].kind, "c");
        assert_eq!(all[1].kind, "b");
    }

    #[test]
    fn snapshot_filters_by_session() {
        let ring = ViolationRing::new(10);
        ring.record(violation("a"));
        let mut other = violation("b");
        other.session_id = SessionId::new("s-2");
        ring.record(other);
        let filtered = ring.snapshot(Some(&SessionId::new("s-2")), None);
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].kind, "b");
    }

    #[test]
    fn stats_count_by_level_and_kind() {
        let ring = ViolationRing::new(10);
        ring.record(violation("a"));
        ring.record(violation("a"));
        let stats = ring.stats();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.by_kind["a"], 2);
        assert_eq!(stats.by_level["medium"], 2);
    }
}
