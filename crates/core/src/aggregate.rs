//! Event-sourced aggregate contract.
//!
//! An aggregate decides (`handle`) and evolves (`apply`); the surrounding
//! infrastructure owns loading, appending and publishing. The version an
//! aggregate reports is the sequence number of the last event applied, which
//! is exactly what optimistic writers fence against.

/// Identity and version surface of an aggregate.
pub trait AggregateRoot {
    /// Strongly-typed identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    fn id(&self) -> &Self::Id;

    /// Sequence number of the last applied event; 0 for a fresh instance.
    fn version(&self) -> u64;
}

/// What a writer believes the stream version is before appending.
///
/// `Exact` is the normal case: read the aggregate, decide, append fenced on
/// the version that was read. `Any` is for writers that tolerate
/// interleaving, such as rebuild tooling and tests.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ExpectedVersion {
    Any,
    Exact(u64),
}

impl ExpectedVersion {
    /// Whether an append under this expectation may proceed at `actual`.
    pub fn matches(self, actual: u64) -> bool {
        match self {
            ExpectedVersion::Any => true,
            ExpectedVersion::Exact(expected) => expected == actual,
        }
    }
}

/// Pure decision/evolution semantics of an event-sourced aggregate.
///
/// `handle` inspects state and returns the events a command produces, or the
/// domain error that rejects it. `apply` folds one event into state. Neither
/// performs IO, so replaying a stored stream always reproduces the state
/// that wrote it.
pub trait Aggregate: AggregateRoot {
    type Command: Clone + core::fmt::Debug;
    type Event: Clone + core::fmt::Debug;
    type Error: core::fmt::Debug;

    /// Decide what a command does given current state, without mutating it.
    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error>;

    /// Fold one event into state, advancing `version()` by one.
    fn apply(&mut self, event: &Self::Event);
}
