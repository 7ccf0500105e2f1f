//! Workflow events and the outbound audit trail.

pub mod audit;
pub mod event;

pub use audit::{AuditRecord, AuditSink, InMemoryAuditSink, NoopAuditSink, TracingAuditSink};
pub use event::Event;
