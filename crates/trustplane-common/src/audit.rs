//! Append-only audit log
//!
//! Records every token lifecycle transition and every moderation action:
//! - Token issuance, consumption, revocation and rejected validations
//! - Moderation actions with their per-target tally
//!
//! Records are assigned an id and a timestamp at append time. Timestamps are
//! non-decreasing in append order, so the log is always ordered by time.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::clock::{new_id, Clock};

/// Audit record kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    /// Credential token issued
    TokenIssued,
    /// Credential token consumed by a successful validation
    TokenConsumed,
    /// Credential token superseded by a newer one
    TokenRevoked,
    /// Validation attempt refused
    TokenRejected,
    /// Bulk moderation action completed
    ModerationApplied,
}

impl AuditKind {
    /// Rejections are worth a warning; everything else is routine
    pub fn is_warning(&self) -> bool {
        matches!(self, AuditKind::TokenRejected)
    }
}

impl std::fmt::Display for AuditKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuditKind::TokenIssued => write!(f, "TOKEN_ISSUED"),
            AuditKind::TokenConsumed => write!(f, "TOKEN_CONSUMED"),
            AuditKind::TokenRevoked => write!(f, "TOKEN_REVOKED"),
            AuditKind::TokenRejected => write!(f, "TOKEN_REJECTED"),
            AuditKind::ModerationApplied => write!(f, "MODERATION"),
        }
    }
}

/// Persisted audit record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// Who caused the transition (`system` for automatic ones)
    pub actor_id: String,
    pub kind: AuditKind,
    /// Token id, moderation action id, or subject the record is about
    pub subject_id: String,
    pub detail: BTreeMap<String, String>,
}

impl AuditRecord {
    /// Convert to JSON string
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Audit record before the log assigns id and timestamp
#[derive(Debug, Clone)]
pub struct AuditEntry {
    actor_id: String,
    kind: AuditKind,
    subject_id: String,
    detail: BTreeMap<String, String>,
}

impl AuditEntry {
    pub fn new(kind: AuditKind, actor_id: &str, subject_id: &str) -> Self {
        Self {
            actor_id: actor_id.to_string(),
            kind,
            subject_id: subject_id.to_string(),
            detail: BTreeMap::new(),
        }
    }

    /// Add detail
    pub fn with_detail(mut self, key: &str, value: impl ToString) -> Self {
        self.detail.insert(key.to_string(), value.to_string());
        self
    }
}

/// Audit record sink
pub trait AuditSink: Send + Sync {
    /// Write an appended record
    fn write(&self, record: &AuditRecord);

    /// Flush pending records
    fn flush(&self);
}

/// Forwards records to `tracing`
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn write(&self, record: &AuditRecord) {
        if record.kind.is_warning() {
            warn!(
                audit_id = %record.id,
                actor = %record.actor_id,
                subject = %record.subject_id,
                detail = ?record.detail,
                "[AUDIT] {}",
                record.kind
            );
        } else {
            info!(
                audit_id = %record.id,
                actor = %record.actor_id,
                subject = %record.subject_id,
                detail = ?record.detail,
                "[AUDIT] {}",
                record.kind
            );
        }
    }

    fn flush(&self) {
        // Tracing output is immediate
    }
}

/// Filter for audit listings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditQuery {
    pub kind: Option<AuditKind>,
    pub subject_id: Option<String>,
    pub actor_id: Option<String>,
    /// Only records at or after this instant
    pub since: Option<DateTime<Utc>>,
    /// Keep only the most recent `limit` matches
    pub limit: Option<usize>,
}

/// Append-only audit log
pub struct AuditLog {
    records: RwLock<Vec<AuditRecord>>,
    sinks: Vec<Box<dyn AuditSink>>,
    clock: Arc<dyn Clock>,
}

impl AuditLog {
    /// Create a log that forwards to `tracing`
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            records: RwLock::new(Vec::new()),
            sinks: vec![Box::new(TracingAuditSink)],
            clock,
        }
    }

    /// Add a sink
    pub fn add_sink(&mut self, sink: Box<dyn AuditSink>) {
        self.sinks.push(sink);
    }

    /// Append an entry, returning the stored record
    pub fn append(&self, entry: AuditEntry) -> AuditRecord {
        let record = {
            let mut records = self.records.write();
            let mut timestamp = self.clock.now();
            if let Some(last) = records.last() {
                timestamp = timestamp.max(last.timestamp);
            }
            let record = AuditRecord {
                id: new_id(),
                timestamp,
                actor_id: entry.actor_id,
                kind: entry.kind,
                subject_id: entry.subject_id,
                detail: entry.detail,
            };
            records.push(record.clone());
            record
        };

        for sink in &self.sinks {
            sink.write(&record);
        }
        record
    }

    /// Matching records, oldest first
    pub fn list(&self, query: &AuditQuery) -> Vec<AuditRecord> {
        let records = self.records.read();
        let mut matched: Vec<AuditRecord> = records
            .iter()
            .filter(|r| query.kind.map_or(true, |k| r.kind == k))
            .filter(|r| query.subject_id.as_deref().map_or(true, |s| r.subject_id == s))
            .filter(|r| query.actor_id.as_deref().map_or(true, |a| r.actor_id == a))
            .filter(|r| query.since.map_or(true, |t| r.timestamp >= t))
            .cloned()
            .collect();

        if let Some(limit) = query.limit {
            let skip = matched.len().saturating_sub(limit);
            matched.drain(..skip);
        }
        matched
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Flush all sinks
    pub fn flush(&self) {
        for sink in &self.sinks {
            sink.flush();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::{Duration, TimeZone};
    use parking_lot::Mutex;

    struct CapturingSink(Arc<Mutex<Vec<AuditRecord>>>);

    impl AuditSink for CapturingSink {
        fn write(&self, record: &AuditRecord) {
            self.0.lock().push(record.clone());
        }

        fn flush(&self) {}
    }

    fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap(),
        ))
    }

    #[test]
    fn test_append_assigns_id_and_time() {
        let clock = clock();
        let log = AuditLog::new(clock.clone());

        let record = log.append(
            AuditEntry::new(AuditKind::TokenIssued, "system", "tok-1")
                .with_detail("purpose", "email_verify"),
        );

        assert_eq!(record.timestamp, clock.now());
        assert_eq!(record.detail.get("purpose"), Some(&"email_verify".to_string()));
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn test_timestamps_never_go_backwards() {
        let clock = clock();
        let log = AuditLog::new(clock.clone());

        let first = log.append(AuditEntry::new(AuditKind::TokenIssued, "system", "a"));
        clock.advance(Duration::seconds(-30));
        let second = log.append(AuditEntry::new(AuditKind::TokenConsumed, "system", "a"));

        assert!(second.timestamp >= first.timestamp);
    }

    #[test]
    fn test_list_filters_and_limit() {
        let clock = clock();
        let log = AuditLog::new(clock.clone());

        for i in 0..5 {
            log.append(AuditEntry::new(AuditKind::TokenIssued, "system", &format!("t{}", i)));
            clock.advance(Duration::minutes(1));
        }
        log.append(AuditEntry::new(AuditKind::ModerationApplied, "admin", "act-1"));

        let issued = log.list(&AuditQuery {
            kind: Some(AuditKind::TokenIssued),
            ..Default::default()
        });
        assert_eq!(issued.len(), 5);

        let recent = log.list(&AuditQuery {
            kind: Some(AuditKind::TokenIssued),
            limit: Some(2),
            ..Default::default()
        });
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].subject_id, "t3");
        assert_eq!(recent[1].subject_id, "t4");

        let by_admin = log.list(&AuditQuery {
            actor_id: Some("admin".into()),
            ..Default::default()
        });
        assert_eq!(by_admin.len(), 1);
    }

    #[test]
    fn test_sinks_receive_records() {
        let captured = Arc::new(Mutex::new(Vec::new()));
        let mut log = AuditLog::new(clock());
        log.add_sink(Box::new(CapturingSink(captured.clone())));

        log.append(AuditEntry::new(AuditKind::TokenRejected, "anonymous", "tok"));
        log.flush();

        assert_eq!(captured.lock().len(), 1);
        assert!(captured.lock()[0].to_json().contains("token_rejected"));
    }
}
