use std::collections::BTreeMap;
use std::sync::RwLock;

use splitledger_core::{
    AggregateRoot, DomainError, DomainResult, Entity, ExpenseId, GroupId, MemberId, SettlementId,
    SubscriptionId,
};
use splitledger_ledger::{
    Expense, GeneratedExpense, Group, Settlement, SettlementStatus, Subscription,
};

use super::r#trait::LedgerStore;
use super::unit_of_work::{StagedWrite, UnitOfWork};

#[derive(Debug, Clone, Default)]
struct LedgerState {
    groups: BTreeMap<GroupId, Group>,
    /// Per group, in insertion order.
    expenses: BTreeMap<GroupId, Vec<Expense>>,
    /// Per group, in insertion order.
    settlements: BTreeMap<GroupId, Vec<Settlement>>,
    /// Per group, in creation order.
    subscriptions: BTreeMap<GroupId, Vec<Subscription>>,
    generated: Vec<GeneratedExpense>,
}

impl LedgerState {
    fn require_group(&self, group_id: GroupId) -> DomainResult<()> {
        if self.groups.contains_key(&group_id) {
            Ok(())
        } else {
            Err(DomainError::not_found(format!("group {group_id}")))
        }
    }

    fn find_expense(&self, expense_id: ExpenseId) -> Option<&Expense> {
        self.expenses
            .values()
            .flat_map(|list| list.iter())
            .find(|e| *e.id() == expense_id)
    }

    fn find_settlement(&self, settlement_id: SettlementId) -> Option<&Settlement> {
        self.settlements
            .values()
            .flat_map(|list| list.iter())
            .find(|s| s.id_typed() == settlement_id)
    }

    fn find_subscription(&self, subscription_id: SubscriptionId) -> Option<&Subscription> {
        self.subscriptions
            .values()
            .flat_map(|list| list.iter())
            .find(|s| s.id_typed() == subscription_id)
    }

    fn apply(&mut self, write: StagedWrite) -> DomainResult<()> {
        match write {
            StagedWrite::RequireGroupVersion { group_id, version } => {
                let current = self
                    .groups
                    .get(&group_id)
                    .map(|g| g.version())
                    .ok_or_else(|| DomainError::not_found(format!("group {group_id}")))?;
                if current != version {
                    return Err(DomainError::conflict(format!(
                        "group {group_id} changed since it was read \
                         (expected version {version}, found {current})"
                    )));
                }
            }
            StagedWrite::PutGroup { group, expected } => {
                let group_id = group.id_typed();
                let current = self.groups.get(&group_id).map(|g| g.version()).unwrap_or(0);
                expected.check(current)?;
                self.groups.insert(group_id, group);
            }
            StagedWrite::DeleteGroup { group_id } => {
                if self.groups.remove(&group_id).is_none() {
                    return Err(DomainError::not_found(format!("group {group_id}")));
                }
                self.expenses.remove(&group_id);
                self.settlements.remove(&group_id);
                if let Some(subscriptions) = self.subscriptions.remove(&group_id) {
                    self.generated.retain(|link| {
                        !subscriptions
                            .iter()
                            .any(|s| s.id_typed() == link.subscription_id)
                    });
                }
            }
            StagedWrite::InsertExpense(expense) => {
                self.require_group(expense.group_id())?;
                if self.find_expense(expense.id_typed()).is_some() {
                    return Err(DomainError::conflict(format!(
                        "expense {} already exists",
                        expense.id_typed()
                    )));
                }
                self.expenses
                    .entry(expense.group_id())
                    .or_default()
                    .push(expense);
            }
            StagedWrite::DeleteExpense {
                group_id,
                expense_id,
            } => {
                let list = self.expenses.get_mut(&group_id);
                let position = list
                    .as_ref()
                    .and_then(|l| l.iter().position(|e| *e.id() == expense_id));
                match (list, position) {
                    (Some(list), Some(idx)) => {
                        list.remove(idx);
                        self.generated.retain(|link| link.expense_id != expense_id);
                    }
                    _ => {
                        return Err(DomainError::not_found(format!(
                            "expense {expense_id} does not exist in group {group_id}"
                        )));
                    }
                }
            }
            StagedWrite::InsertSettlement(settlement) => {
                self.require_group(settlement.group_id())?;
                if self.find_settlement(settlement.id_typed()).is_some() {
                    return Err(DomainError::conflict(format!(
                        "settlement {} already exists",
                        settlement.id_typed()
                    )));
                }
                self.settlements
                    .entry(settlement.group_id())
                    .or_default()
                    .push(settlement);
            }
            StagedWrite::TransitionSettlement {
                settlement,
                expected_version,
            } => {
                let settlement_id = settlement.id_typed();
                let stored = self
                    .settlements
                    .get_mut(&settlement.group_id())
                    .and_then(|list| list.iter_mut().find(|s| s.id_typed() == settlement_id))
                    .ok_or_else(|| DomainError::not_found(format!("settlement {settlement_id}")))?;

                // Check-and-set: only the first resolver of a pending record wins.
                if stored.status() != SettlementStatus::Pending
                    || stored.version() != expected_version
                {
                    return Err(DomainError::invalid_transition(format!(
                        "settlement {settlement_id} is no longer pending (status: {})",
                        stored.status()
                    )));
                }
                *stored = settlement;
            }
            StagedWrite::PutSubscription {
                subscription,
                expected,
            } => {
                let group_id = subscription.group_id();
                self.require_group(group_id)?;
                let subscription_id = subscription.id_typed();
                let list = self.subscriptions.entry(group_id).or_default();
                let position = list.iter().position(|s| s.id_typed() == subscription_id);
                let current = position.map(|idx| list[idx].version()).unwrap_or(0);
                expected.check(current)?;
                match position {
                    Some(idx) => list[idx] = subscription,
                    None => list.push(subscription),
                }
            }
            StagedWrite::LinkGeneratedExpense(link) => {
                if self.find_subscription(link.subscription_id).is_none() {
                    return Err(DomainError::not_found(format!(
                        "subscription {}",
                        link.subscription_id
                    )));
                }
                if self.find_expense(link.expense_id).is_none() {
                    return Err(DomainError::not_found(format!("expense {}", link.expense_id)));
                }
                if let Some(existing) = self.generated.iter().find(|g| {
                    g.expense_id == link.expense_id
                        || (g.subscription_id == link.subscription_id
                            && g.billing_period == link.billing_period)
                }) {
                    return Err(DomainError::conflict(format!(
                        "billing period {} of subscription {} is already linked to expense {}",
                        existing.billing_period, existing.subscription_id, existing.expense_id
                    )));
                }
                self.generated.push(link);
            }
        }
        Ok(())
    }
}

/// In-memory ledger store.
///
/// Intended for tests/dev. A commit stages every write against a copy of the
/// state and swaps it in only when all of them succeed.
#[derive(Debug, Default)]
pub struct InMemoryLedgerStore {
    state: RwLock<LedgerState>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read<T>(&self, f: impl FnOnce(&LedgerState) -> DomainResult<T>) -> DomainResult<T> {
        let state = self
            .state
            .read()
            .map_err(|_| DomainError::storage("ledger store lock poisoned"))?;
        f(&state)
    }
}

impl LedgerStore for InMemoryLedgerStore {
    fn load_group(&self, group_id: GroupId) -> DomainResult<Option<Group>> {
        self.read(|state| Ok(state.groups.get(&group_id).cloned()))
    }

    fn list_member_groups(&self, member_id: MemberId) -> DomainResult<Vec<Group>> {
        self.read(|state| {
            Ok(state
                .groups
                .values()
                .filter(|g| g.is_member(member_id))
                .cloned()
                .collect())
        })
    }

    fn list_expenses(&self, group_id: GroupId) -> DomainResult<Vec<Expense>> {
        self.read(|state| {
            state.require_group(group_id)?;
            Ok(state.expenses.get(&group_id).cloned().unwrap_or_default())
        })
    }

    fn load_expense(&self, expense_id: ExpenseId) -> DomainResult<Option<Expense>> {
        self.read(|state| Ok(state.find_expense(expense_id).cloned()))
    }

    fn list_settlements(&self, group_id: GroupId) -> DomainResult<Vec<Settlement>> {
        self.read(|state| {
            state.require_group(group_id)?;
            Ok(state.settlements.get(&group_id).cloned().unwrap_or_default())
        })
    }

    fn load_settlement(&self, settlement_id: SettlementId) -> DomainResult<Option<Settlement>> {
        self.read(|state| Ok(state.find_settlement(settlement_id).cloned()))
    }

    fn list_member_settlements(&self, member_id: MemberId) -> DomainResult<Vec<Settlement>> {
        self.read(|state| {
            Ok(state
                .settlements
                .values()
                .flat_map(|list| list.iter())
                .filter(|s| s.from_member() == member_id || s.to_member() == member_id)
                .cloned()
                .collect())
        })
    }

    fn load_subscription(
        &self,
        subscription_id: SubscriptionId,
    ) -> DomainResult<Option<Subscription>> {
        self.read(|state| Ok(state.find_subscription(subscription_id).cloned()))
    }

    fn list_subscriptions(&self, group_id: GroupId) -> DomainResult<Vec<Subscription>> {
        self.read(|state| {
            state.require_group(group_id)?;
            Ok(state.subscriptions.get(&group_id).cloned().unwrap_or_default())
        })
    }

    fn list_generated_expenses(
        &self,
        subscription_id: SubscriptionId,
    ) -> DomainResult<Vec<GeneratedExpense>> {
        self.read(|state| {
            Ok(state
                .generated
                .iter()
                .filter(|g| g.subscription_id == subscription_id)
                .cloned()
                .collect())
        })
    }

    fn commit(&self, work: UnitOfWork) -> DomainResult<()> {
        if work.is_empty() {
            return Ok(());
        }

        let mut state = self
            .state
            .write()
            .map_err(|_| DomainError::storage("ledger store lock poisoned"))?;

        let mut next = state.clone();
        for write in work.into_writes() {
            next.apply(write)?;
        }
        *state = next;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use splitledger_core::{Aggregate, ExpectedVersion, Money};
    use chrono::NaiveDate;
    use splitledger_ledger::{
        AddMember, BillingPeriod, BillingSchedule, CreateGroup, ExpenseAdmission, ExpenseSplit,
        GroupCommand, MemberRole, NewSubscription, RemoveMember, SettlementStatus,
        open_subscription,
    };
    use std::sync::Arc;

    fn group_of(creator: MemberId, others: &[MemberId]) -> Group {
        let group_id = GroupId::new();
        let (mut group, _) = Group::empty(group_id)
            .execute(&GroupCommand::CreateGroup(CreateGroup {
                group_id,
                name: "Trip".to_string(),
                description: None,
                creator,
                occurred_at: Utc::now(),
            }))
            .unwrap();
        for member in others {
            group = group
                .execute(&GroupCommand::AddMember(AddMember {
                    group_id,
                    member_id: *member,
                    role: MemberRole::Member,
                    occurred_at: Utc::now(),
                }))
                .unwrap()
                .0;
        }
        group
    }

    fn expense(group_id: GroupId, payer: MemberId, debtor: MemberId, cents: i64) -> Expense {
        Expense::restore(
            ExpenseId::new(),
            group_id,
            payer,
            "dinner".to_string(),
            Money::from_cents(cents),
            Utc::now(),
            vec![ExpenseSplit::new(debtor, Money::from_cents(cents))],
            Utc::now(),
        )
    }

    fn pending(group_id: GroupId, from: MemberId, to: MemberId) -> Settlement {
        Settlement::restore(
            SettlementId::new(),
            group_id,
            from,
            to,
            Money::from_cents(500),
            SettlementStatus::Pending,
            Utc::now(),
            None,
        )
    }

    fn seeded() -> (InMemoryLedgerStore, Group, MemberId, MemberId) {
        let (alice, bob) = (MemberId::new(), MemberId::new());
        let group = group_of(alice, &[bob]);
        let store = InMemoryLedgerStore::new();
        store
            .commit(UnitOfWork::new().put_group(group.clone(), ExpectedVersion::Exact(0)))
            .unwrap();
        (store, group, alice, bob)
    }

    #[test]
    fn failed_commit_leaves_state_untouched() {
        let (store, group, alice, bob) = seeded();
        let first = expense(group.id_typed(), alice, bob, 1000);

        let err = store
            .commit(
                UnitOfWork::new()
                    .insert_expense(first.clone())
                    .insert_expense(first.clone()),
            )
            .unwrap_err();

        assert!(matches!(err, DomainError::Conflict(_)));
        assert!(store.list_expenses(group.id_typed()).unwrap().is_empty());
        assert!(store.load_expense(first.id_typed()).unwrap().is_none());
    }

    #[test]
    fn stale_group_version_is_a_conflict() {
        let (store, group, _, _) = seeded();
        let err = store
            .commit(UnitOfWork::new().put_group(group, ExpectedVersion::Exact(0)))
            .unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
    }

    #[test]
    fn transition_only_succeeds_once() {
        let (store, group, alice, bob) = seeded();
        let settlement = pending(group.id_typed(), bob, alice);
        store
            .commit(UnitOfWork::new().insert_settlement(settlement.clone()))
            .unwrap();

        let (confirmed, _) = settlement.confirm(alice, Utc::now()).unwrap();
        let (rejected, _) = settlement.reject(alice, Utc::now()).unwrap();

        store
            .commit(UnitOfWork::new().transition_settlement(confirmed, settlement.version()))
            .unwrap();
        let err = store
            .commit(UnitOfWork::new().transition_settlement(rejected, settlement.version()))
            .unwrap_err();

        assert!(matches!(err, DomainError::InvalidTransition(_)));
        let stored = store.load_settlement(settlement.id_typed()).unwrap().unwrap();
        assert_eq!(stored.status(), SettlementStatus::Confirmed);
    }

    #[test]
    fn deleting_a_group_cascades() {
        let (store, group, alice, bob) = seeded();
        let group_id = group.id_typed();
        let e = expense(group_id, alice, bob, 1000);
        let s = pending(group_id, bob, alice);
        store
            .commit(
                UnitOfWork::new()
                    .insert_expense(e.clone())
                    .insert_settlement(s.clone()),
            )
            .unwrap();

        store.commit(UnitOfWork::new().delete_group(group_id)).unwrap();

        assert!(store.load_group(group_id).unwrap().is_none());
        assert!(store.load_expense(e.id_typed()).unwrap().is_none());
        assert!(store.load_settlement(s.id_typed()).unwrap().is_none());
        assert!(store.list_member_settlements(bob).unwrap().is_empty());
        assert!(matches!(
            store.list_expenses(group_id).unwrap_err(),
            DomainError::NotFound(_)
        ));
    }

    #[test]
    fn member_scoped_reads() {
        let (store, group, alice, bob) = seeded();
        let carol = MemberId::new();
        let other = group_of(carol, &[alice]);
        store
            .commit(
                UnitOfWork::new()
                    .put_group(other.clone(), ExpectedVersion::Exact(0))
                    .insert_settlement(pending(group.id_typed(), bob, alice))
                    .insert_settlement(pending(other.id_typed(), alice, carol)),
            )
            .unwrap();

        assert_eq!(store.list_member_groups(alice).unwrap().len(), 2);
        assert_eq!(store.list_member_groups(bob).unwrap().len(), 1);
        assert_eq!(store.list_member_settlements(alice).unwrap().len(), 2);
        assert_eq!(store.list_member_settlements(carol).unwrap().len(), 1);
    }

    #[test]
    fn writes_into_a_missing_group_are_rejected() {
        let store = InMemoryLedgerStore::new();
        let err = store
            .commit(UnitOfWork::new().insert_expense(expense(
                GroupId::new(),
                MemberId::new(),
                MemberId::new(),
                100,
            )))
            .unwrap_err();
        assert!(matches!(err, DomainError::NotFound(_)));
    }

    fn monthly(group: &Group, owner: MemberId) -> Subscription {
        open_subscription(
            &ExpenseAdmission::default(),
            group,
            NewSubscription {
                subscription_id: SubscriptionId::new(),
                group_id: group.id_typed(),
                creator: owner,
                name: "Rent".to_string(),
                amount: Money::from_cents(1000),
                schedule: BillingSchedule::monthly(NaiveDate::from_ymd_opt(2026, 1, 1).unwrap()),
                splits: vec![ExpenseSplit::new(owner, Money::from_cents(1000))],
                occurred_at: Utc::now(),
            },
        )
        .unwrap()
    }

    fn link(subscription: &Subscription, expense: &Expense, month: u32) -> GeneratedExpense {
        GeneratedExpense {
            subscription_id: subscription.id_typed(),
            expense_id: expense.id_typed(),
            billing_period: BillingPeriod::of(NaiveDate::from_ymd_opt(2026, month, 1).unwrap()),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn roster_guard_rejects_writes_admitted_against_an_old_roster() {
        let (store, group, alice, bob) = seeded();
        let group_id = group.id_typed();
        let (smaller, _) = group
            .execute(&GroupCommand::RemoveMember(RemoveMember {
                group_id,
                member_id: bob,
                occurred_at: Utc::now(),
            }))
            .unwrap();
        store
            .commit(
                UnitOfWork::new()
                    .put_group(smaller.clone(), ExpectedVersion::Exact(group.version())),
            )
            .unwrap();

        let stale = expense(group_id, alice, bob, 1000);
        let err = store
            .commit(
                UnitOfWork::new()
                    .require_group_version(group_id, group.version())
                    .insert_expense(stale.clone()),
            )
            .unwrap_err();
        assert!(matches!(err, DomainError::Conflict(ref msg) if msg.contains("changed since")));
        assert!(store.load_expense(stale.id_typed()).unwrap().is_none());

        let fresh = expense(group_id, alice, alice, 1000);
        store
            .commit(
                UnitOfWork::new()
                    .require_group_version(group_id, smaller.version())
                    .insert_expense(fresh),
            )
            .unwrap();

        let err = store
            .commit(UnitOfWork::new().require_group_version(GroupId::new(), 1))
            .unwrap_err();
        assert!(matches!(err, DomainError::NotFound(_)));
    }

    #[test]
    fn billing_period_is_linked_at_most_once() {
        let (store, group, alice, _) = seeded();
        let group_id = group.id_typed();
        let sub = monthly(&group, alice);
        let january = expense(group_id, alice, alice, 1000);
        store
            .commit(
                UnitOfWork::new()
                    .put_subscription(sub.clone(), ExpectedVersion::Exact(0))
                    .insert_expense(january.clone())
                    .link_generated_expense(link(&sub, &january, 1)),
            )
            .unwrap();

        let again = expense(group_id, alice, alice, 1000);
        let err = store
            .commit(
                UnitOfWork::new()
                    .insert_expense(again.clone())
                    .link_generated_expense(link(&sub, &again, 1)),
            )
            .unwrap_err();
        assert!(matches!(err, DomainError::Conflict(ref msg) if msg.contains("01-2026")));
        assert!(store.load_expense(again.id_typed()).unwrap().is_none());

        let err = store
            .commit(UnitOfWork::new().link_generated_expense(link(&sub, &january, 2)))
            .unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));

        let err = store
            .commit(UnitOfWork::new().put_subscription(sub.clone(), ExpectedVersion::Exact(0)))
            .unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));

        assert_eq!(store.list_generated_expenses(sub.id_typed()).unwrap().len(), 1);
        assert_eq!(store.list_subscriptions(group_id).unwrap(), vec![sub]);
    }

    #[test]
    fn deletes_drop_subscription_links() {
        let (store, group, alice, _) = seeded();
        let group_id = group.id_typed();
        let sub = monthly(&group, alice);
        let (january, february) = (
            expense(group_id, alice, alice, 1000),
            expense(group_id, alice, alice, 1000),
        );
        store
            .commit(
                UnitOfWork::new()
                    .put_subscription(sub.clone(), ExpectedVersion::Exact(0))
                    .insert_expense(january.clone())
                    .insert_expense(february.clone())
                    .link_generated_expense(link(&sub, &january, 1))
                    .link_generated_expense(link(&sub, &february, 2)),
            )
            .unwrap();

        store
            .commit(UnitOfWork::new().delete_expense(group_id, january.id_typed()))
            .unwrap();
        let remaining = store.list_generated_expenses(sub.id_typed()).unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].expense_id, february.id_typed());

        store.commit(UnitOfWork::new().delete_group(group_id)).unwrap();
        assert!(store.load_subscription(sub.id_typed()).unwrap().is_none());
        assert!(store.list_generated_expenses(sub.id_typed()).unwrap().is_empty());
    }

    #[test]
    fn poisoned_lock_is_a_storage_failure() {
        let store = Arc::new(InMemoryLedgerStore::new());
        let poisoner = Arc::clone(&store);
        let crashed = std::thread::spawn(move || {
            let _guard = poisoner.state.write().unwrap();
            panic!("writer crashed while holding the lock");
        })
        .join();
        assert!(crashed.is_err());

        let err = store.load_group(GroupId::new()).unwrap_err();
        assert!(matches!(err, DomainError::Storage(_)));
        assert_eq!(err.kind(), "storage");

        let group = group_of(MemberId::new(), &[]);
        let err = store
            .commit(UnitOfWork::new().put_group(group, ExpectedVersion::Exact(0)))
            .unwrap_err();
        assert!(matches!(err, DomainError::Storage(_)));
    }
}
