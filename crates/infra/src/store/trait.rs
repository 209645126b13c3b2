use std::sync::Arc;

use splitledger_core::{
    DomainResult, ExpenseId, GroupId, MemberId, SettlementId, SubscriptionId,
};
use splitledger_ledger::{Expense, GeneratedExpense, Group, Settlement, Subscription};

use super::unit_of_work::UnitOfWork;

/// Storage for groups, expenses (with their splits), settlements and
/// subscriptions.
///
/// ## Contract
///
/// - Group-scoped reads fail with `NotFound` when the group does not exist.
/// - Single-record reads return `Ok(None)` for a missing record.
/// - Expenses are listed in insertion order, settlements likewise.
/// - [`LedgerStore::commit`] applies every staged write or none of them.
///   A rejected write (version mismatch, settlement no longer pending,
///   duplicate id or billing period, missing group) leaves the store
///   untouched.
pub trait LedgerStore: Send + Sync {
    fn load_group(&self, group_id: GroupId) -> DomainResult<Option<Group>>;

    /// Every group `member_id` currently belongs to.
    fn list_member_groups(&self, member_id: MemberId) -> DomainResult<Vec<Group>>;

    fn list_expenses(&self, group_id: GroupId) -> DomainResult<Vec<Expense>>;

    fn load_expense(&self, expense_id: ExpenseId) -> DomainResult<Option<Expense>>;

    fn list_settlements(&self, group_id: GroupId) -> DomainResult<Vec<Settlement>>;

    fn load_settlement(&self, settlement_id: SettlementId) -> DomainResult<Option<Settlement>>;

    /// Settlements in any group where `member_id` is the debtor or the creditor.
    fn list_member_settlements(&self, member_id: MemberId) -> DomainResult<Vec<Settlement>>;

    fn load_subscription(
        &self,
        subscription_id: SubscriptionId,
    ) -> DomainResult<Option<Subscription>>;

    fn list_subscriptions(&self, group_id: GroupId) -> DomainResult<Vec<Subscription>>;

    /// Billing periods already turned into expenses, oldest first.
    fn list_generated_expenses(
        &self,
        subscription_id: SubscriptionId,
    ) -> DomainResult<Vec<GeneratedExpense>>;

    fn commit(&self, work: UnitOfWork) -> DomainResult<()>;
}

impl<S: LedgerStore + ?Sized> LedgerStore for Arc<S> {
    fn load_group(&self, group_id: GroupId) -> DomainResult<Option<Group>> {
        (**self).load_group(group_id)
    }

    fn list_member_groups(&self, member_id: MemberId) -> DomainResult<Vec<Group>> {
        (**self).list_member_groups(member_id)
    }

    fn list_expenses(&self, group_id: GroupId) -> DomainResult<Vec<Expense>> {
        (**self).list_expenses(group_id)
    }

    fn load_expense(&self, expense_id: ExpenseId) -> DomainResult<Option<Expense>> {
        (**self).load_expense(expense_id)
    }

    fn list_settlements(&self, group_id: GroupId) -> DomainResult<Vec<Settlement>> {
        (**self).list_settlements(group_id)
    }

    fn load_settlement(&self, settlement_id: SettlementId) -> DomainResult<Option<Settlement>> {
        (**self).load_settlement(settlement_id)
    }

    fn list_member_settlements(&self, member_id: MemberId) -> DomainResult<Vec<Settlement>> {
        (**self).list_member_settlements(member_id)
    }

    fn load_subscription(
        &self,
        subscription_id: SubscriptionId,
    ) -> DomainResult<Option<Subscription>> {
        (**self).load_subscription(subscription_id)
    }

    fn list_subscriptions(&self, group_id: GroupId) -> DomainResult<Vec<Subscription>> {
        (**self).list_subscriptions(group_id)
    }

    fn list_generated_expenses(
        &self,
        subscription_id: SubscriptionId,
    ) -> DomainResult<Vec<GeneratedExpense>> {
        (**self).list_generated_expenses(subscription_id)
    }

    fn commit(&self, work: UnitOfWork) -> DomainResult<()> {
        (**self).commit(work)
    }
}
