//! Domain events emitted by the ledger's aggregates.

pub mod event;

pub use event::Event;
