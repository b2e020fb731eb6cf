//! Value object trait: equality by value, not identity.

/// Marker trait for value objects.
///
/// Value objects are immutable and compared by their attribute values; two
/// with the same values are the same thing. A movement kind or a severity is
/// a value object; a batch (which has an id and continuity) is not.
///
/// The trait requires `Clone` (values are cheap to copy), `PartialEq`
/// (compared by value) and `Debug` (loggable in tests).
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
