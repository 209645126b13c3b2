use chrono::{DateTime, Utc};

/// A fact produced by an aggregate's decision logic.
///
/// Events are immutable and carry a stable dotted name
/// (e.g. `"ledger.settlement.confirmed"`) that the service layer logs with
/// every committed write.
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Stable event name/type identifier.
    fn event_type(&self) -> &'static str;

    /// Schema version for this event type.
    fn version(&self) -> u32 {
        1
    }

    /// When the event occurred (business time).
    fn occurred_at(&self) -> DateTime<Utc>;
}
