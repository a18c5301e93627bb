//! Value object trait: equality by value, not identity.

/// Marker trait for immutable domain values.
///
/// A value object has no identity of its own; two instances with the same
/// attribute values are interchangeable. [`crate::Money`] is the canonical
/// example here: `Money::from_minor_units(2499)` equals any other 24.99,
/// regardless of where either came from. Contrast with [`crate::Entity`],
/// where two objects sharing an id are the *same* thing even when their
/// fields differ.
///
/// Value objects are never mutated in place. "Changing" one means creating a
/// new value, which keeps them trivially shareable across threads.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
