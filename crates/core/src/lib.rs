//! `splitledger-core`: ledger foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! identifiers, the fixed-point `Money` type and the error taxonomy shared by
//! every other crate.

pub mod aggregate;
pub mod entity;
pub mod error;
pub mod id;
pub mod money;

pub use aggregate::{Aggregate, AggregateRoot, ExpectedVersion};
pub use entity::Entity;
pub use error::{DomainError, DomainResult, InconsistencyReport};
pub use id::{ExpenseId, GroupId, MemberId, SettlementId, SubscriptionId};
pub use money::Money;
