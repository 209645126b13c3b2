//! Ledger persistence boundary.
//!
//! Reads return owned snapshots. Writes are staged into a [`UnitOfWork`] and
//! committed all-or-nothing, so an expense is never visible without its
//! splits and a settlement never changes status twice.

pub mod in_memory;
pub mod r#trait;
pub mod unit_of_work;

pub use in_memory::InMemoryLedgerStore;
pub use r#trait::LedgerStore;
pub use unit_of_work::{StagedWrite, UnitOfWork};
