use chrono::{DateTime, Utc};

/// A domain-agnostic workflow event.
///
/// Events are immutable facts emitted by an aggregate's `handle` and folded
/// back into its state by `apply`.
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Stable event name/type identifier (e.g. "stock.transfer.shipped").
    fn event_type(&self) -> &'static str;

    /// Schema version for this event type.
    fn version(&self) -> u32 {
        1
    }

    /// When the event occurred (business time).
    fn occurred_at(&self) -> DateTime<Utc>;
}
