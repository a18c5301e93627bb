//! Entity trait: identity that outlives state changes.

/// Marker for domain objects with durable identity.
///
/// Two entities are the same thing when their ids match, whatever their
/// fields currently say; an order keeps being the same order while its lines
/// change. Contrast with [`crate::ValueObject`], which has no id at all.
pub trait Entity {
    /// Strongly-typed identifier, unique within the entity's kind.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    fn id(&self) -> &Self::Id;
}
