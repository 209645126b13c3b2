//! Shared-expense ledger engine.
//!
//! Pure domain logic only: no IO, no HTTP, no persistence concerns. Balances
//! and obligations are recomputed from expenses and settlements on every
//! call; nothing here caches or mutates stored state.

pub mod balances;
pub mod expense;
pub mod group;
pub mod obligations;
pub mod policy;
pub mod settlement;
pub mod subscription;
pub mod unconfirmed;

pub use balances::{Balances, calculate_group_balances};
pub use expense::{Expense, ExpenseAdmission, ExpenseSplit, NewExpense};
pub use group::{
    AddMember, ChangeMemberRole, CreateGroup, Group, GroupCommand, GroupCreated, GroupEvent,
    MemberAdded, MemberRemoved, MemberRole, MemberRoleChanged, Membership, RemoveMember,
};
pub use obligations::{
    Creditors, ObligationMap, UserObligations, get_group_obligations, get_user_obligations,
};
pub use policy::AmountPolicy;
pub use settlement::{
    RequestSettlement, ResolveSettlement, Settlement, SettlementCommand, SettlementConfirmed,
    SettlementEvent, SettlementRejected, SettlementRequested, SettlementStatus, request_settlement,
};
pub use subscription::{
    BillingCycle, BillingPeriod, BillingSchedule, DueExpenses, GeneratedExpense, NewSubscription,
    Subscription, generate_due_expenses, open_subscription,
};
pub use unconfirmed::{UnconfirmedSettlements, unconfirmed_settlements};
