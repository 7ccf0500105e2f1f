//! Outbound audit notifications.
//!
//! The stock core never persists audit history itself: every create or
//! transition is handed to an [`AuditSink`] as a fire-and-forget record.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;
use tracing::info;

use stockledger_core::UserId;

/// `{entity, record_id, action, before, after, actor, timestamp}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditRecord {
    pub entity: &'static str,
    pub record_id: String,
    pub action: &'static str,
    pub before: Option<JsonValue>,
    pub after: Option<JsonValue>,
    pub actor: Option<UserId>,
    pub timestamp: DateTime<Utc>,
}

impl AuditRecord {
    /// Build a record, snapshotting `before`/`after` as JSON.
    ///
    /// Snapshots that fail to serialize are recorded as `None`.
    pub fn capture<B, A>(
        entity: &'static str,
        record_id: impl core::fmt::Display,
        action: &'static str,
        before: Option<&B>,
        after: Option<&A>,
        actor: Option<UserId>,
    ) -> Self
    where
        B: Serialize + ?Sized,
        A: Serialize + ?Sized,
    {
        Self {
            entity,
            record_id: record_id.to_string(),
            action,
            before: before.and_then(|b| serde_json::to_value(b).ok()),
            after: after.and_then(|a| serde_json::to_value(a).ok()),
            actor,
            timestamp: Utc::now(),
        }
    }

    /// Record for a newly created entity (no `before`).
    pub fn created<A>(
        entity: &'static str,
        record_id: impl core::fmt::Display,
        after: &A,
        actor: Option<UserId>,
    ) -> Self
    where
        A: Serialize + ?Sized,
    {
        Self::capture::<A, A>(entity, record_id, "create", None, Some(after), actor)
    }
}

/// Audit collaborator. Implementations must not block or fail the caller.
pub trait AuditSink: Send + Sync + 'static {
    fn emit(&self, record: AuditRecord);
}

/// Discards every record.
#[derive(Debug, Default)]
pub struct NoopAuditSink;

impl AuditSink for NoopAuditSink {
    fn emit(&self, _record: AuditRecord) {}
}

/// Forwards records to the tracing pipeline as structured events.
#[derive(Debug, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn emit(&self, record: AuditRecord) {
        info!(
            target: "stock.audit",
            entity = record.entity,
            record_id = %record.record_id,
            action = record.action,
            actor = ?record.actor,
            "audit"
        );
    }
}

/// In-memory sink for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryAuditSink {
    inner: Mutex<Vec<AuditRecord>>,
}

impl InMemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> Vec<AuditRecord> {
        match self.inner.lock() {
            Ok(records) => records.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Records for one entity kind, in emission order.
    pub fn for_entity(&self, entity: &str) -> Vec<AuditRecord> {
        self.all().into_iter().filter(|r| r.entity == entity).collect()
    }
}

impl AuditSink for InMemoryAuditSink {
    fn emit(&self, record: AuditRecord) {
        if let Ok(mut records) = self.inner.lock() {
            records.push(record);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize)]
    struct Snapshot {
        status: &'static str,
    }

    #[test]
    fn capture_serializes_before_and_after() {
        let sink = InMemoryAuditSink::new();
        let actor = UserId::new();
        sink.emit(AuditRecord::capture(
            "lot",
            "LOT-1",
            "block",
            Some(&Snapshot { status: "active" }),
            Some(&Snapshot { status: "blocked" }),
            Some(actor),
        ));

        let records = sink.for_entity("lot");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].action, "block");
        assert_eq!(records[0].before, Some(serde_json::json!({"status": "active"})));
        assert_eq!(records[0].after, Some(serde_json::json!({"status": "blocked"})));
        assert_eq!(records[0].actor, Some(actor));
    }
}
