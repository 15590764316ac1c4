use chrono::{DateTime, Utc};

/// A committed fact about one aggregate.
///
/// Envelopes copy `event_type` out of the payload so consumers can route
/// without decoding it.
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Stream name shared by every event of this type (e.g. "transfer").
    const AGGREGATE_TYPE: &'static str;

    /// Stable dotted name (e.g. "transfer.shipped").
    fn event_type(&self) -> &'static str;

    /// Business time of the change.
    fn occurred_at(&self) -> DateTime<Utc>;
}
