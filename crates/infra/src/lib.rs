//! Infrastructure layer: storage boundary, service orchestration, config.

pub mod config;
pub mod service;
pub mod store;


pub use config::LedgerConfig;
pub use service::LedgerService;
pub use store::{InMemoryLedgerStore, LedgerStore, StagedWrite, UnitOfWork};
