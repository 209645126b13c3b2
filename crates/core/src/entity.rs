//! Entity trait: identity + continuity across state changes.

/// Entity marker + minimal interface.
///
/// Expenses are entities rather than aggregates: they are admitted once,
/// never evolve, and are only ever deleted whole.
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the entity identifier.
    fn id(&self) -> &Self::Id;
}
