use chrono::{DateTime, Utc};

/// Contract every domain event satisfies before it can be stored or routed.
///
/// Events are facts about the workflow, named in past tense and never edited
/// after the append commits. The three accessors exist for the machinery
/// around the domain: `event_type` routes and audits, `version` leaves room
/// for payload schema evolution, `occurred_at` carries business time (when
/// the transition happened, not when the row was written).
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Stable dotted name, e.g. "refunds.request.credit_recorded".
    fn event_type(&self) -> &'static str;

    /// Payload schema version for this event type, starting at 1.
    fn version(&self) -> u32;

    /// Business time of the transition.
    fn occurred_at(&self) -> DateTime<Utc>;
}
