//! Ledger application service.
//!
//! Every operation follows the same pipeline:
//!
//! ```text
//! load what the operation needs through the LedgerStore
//!   ↓
//! run the pure domain logic (admission, aggregate handle/apply)
//!   ↓
//! optionally re-check the zero-sum invariant over the prospective state
//!   ↓
//! stage the writes in one UnitOfWork and commit once
//! ```
//!
//! Writes that were admitted against a group's roster also stage the roster
//! version they read, so a membership change committed in between turns the
//! write into a `Conflict` instead of admitting it against a stale roster.
//!
//! Reads never cache: balances and obligations are re-derived from the store
//! on every call.

use chrono::{DateTime, NaiveDate, Utc};
use tracing::{error, info, instrument, warn};

use splitledger_core::{
    Aggregate, AggregateRoot, DomainError, DomainResult, ExpectedVersion, ExpenseId, GroupId,
    MemberId, Money, SettlementId, SubscriptionId,
};
use splitledger_events::Event;
use splitledger_ledger::{
    AddMember, AmountPolicy, Balances, BillingSchedule, ChangeMemberRole, CreateGroup, Expense,
    ExpenseAdmission, ExpenseSplit, Group, GroupCommand, MemberRole, Membership, NewExpense,
    NewSubscription, ObligationMap, RemoveMember, RequestSettlement, Settlement, SettlementEvent,
    Subscription, UnconfirmedSettlements, UserObligations, calculate_group_balances,
    generate_due_expenses, get_group_obligations, get_user_obligations, open_subscription,
    request_settlement, unconfirmed_settlements,
};

use crate::config::LedgerConfig;
use crate::store::{LedgerStore, UnitOfWork};

/// Entry point for every ledger operation, generic over the storage backend.
#[derive(Debug)]
pub struct LedgerService<S> {
    store: S,
    config: LedgerConfig,
    admission: ExpenseAdmission,
    policy: AmountPolicy,
}

impl<S: LedgerStore> LedgerService<S> {
    pub fn new(store: S) -> Self {
        Self::with_config(store, LedgerConfig::default())
    }

    pub fn with_config(store: S, config: LedgerConfig) -> Self {
        let policy = config.amount_policy();
        Self {
            store,
            admission: ExpenseAdmission::new(policy),
            policy,
            config,
        }
    }

    /// Load [`LedgerConfig`] from the environment and build the service.
    ///
    /// The tracing subscriber is not installed here. An embedding process
    /// without one of its own calls `splitledger_observability::init` with
    /// [`LedgerConfig::observability`] first.
    pub fn from_env(store: S) -> anyhow::Result<Self> {
        let config = LedgerConfig::from_env()?;
        info!(
            verify_on_write = config.verify_on_write,
            max_amount = %config.max_amount,
            "ledger service configured"
        );
        Ok(Self::with_config(store, config))
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    // ---------------------------------------------------------------------
    // Group roster
    // ---------------------------------------------------------------------

    /// Create a group; `creator` becomes its first admin.
    #[instrument(skip_all, fields(creator = %creator))]
    pub fn create_group(
        &self,
        name: impl Into<String>,
        description: Option<String>,
        creator: MemberId,
    ) -> DomainResult<Group> {
        let name = name.into();
        run("create_group", || {
            let group_id = GroupId::new();
            let (group, events) =
                Group::empty(group_id).execute(&GroupCommand::CreateGroup(CreateGroup {
                    group_id,
                    name,
                    description,
                    creator,
                    occurred_at: now(),
                }))?;

            self.store.commit(
                UnitOfWork::new().put_group(group.clone(), ExpectedVersion::Exact(0)),
            )?;
            log_events(&events);
            Ok(group)
        })
    }

    #[instrument(skip_all, fields(group_id = %group_id, member_id = %member_id, role = %role))]
    pub fn add_member(
        &self,
        group_id: GroupId,
        member_id: MemberId,
        role: MemberRole,
    ) -> DomainResult<Membership> {
        run("add_member", || {
            let group = self.apply_group_command(
                group_id,
                GroupCommand::AddMember(AddMember {
                    group_id,
                    member_id,
                    role,
                    occurred_at: now(),
                }),
            )?;
            seat(&group, member_id)
        })
    }

    #[instrument(skip_all, fields(group_id = %group_id, member_id = %member_id))]
    pub fn remove_member(&self, group_id: GroupId, member_id: MemberId) -> DomainResult<()> {
        run("remove_member", || {
            self.apply_group_command(
                group_id,
                GroupCommand::RemoveMember(RemoveMember {
                    group_id,
                    member_id,
                    occurred_at: now(),
                }),
            )?;
            Ok(())
        })
    }

    #[instrument(skip_all, fields(group_id = %group_id, member_id = %member_id, role = %role))]
    pub fn change_member_role(
        &self,
        group_id: GroupId,
        member_id: MemberId,
        role: MemberRole,
    ) -> DomainResult<Membership> {
        run("change_member_role", || {
            let group = self.apply_group_command(
                group_id,
                GroupCommand::ChangeMemberRole(ChangeMemberRole {
                    group_id,
                    member_id,
                    role,
                    occurred_at: now(),
                }),
            )?;
            seat(&group, member_id)
        })
    }

    /// Every group `member_id` belongs to.
    pub fn member_groups(&self, member_id: MemberId) -> DomainResult<Vec<Group>> {
        run("member_groups", || self.store.list_member_groups(member_id))
    }

    /// Delete a group with all of its expenses and settlements.
    #[instrument(skip_all, fields(group_id = %group_id, requester = %requester))]
    pub fn delete_group(&self, group_id: GroupId, requester: MemberId) -> DomainResult<bool> {
        run("delete_group", || {
            let group = self.require_group(group_id)?;
            if !group.is_admin(requester) {
                return Err(DomainError::unauthorized("only admins can delete the group"));
            }

            self.store.commit(
                UnitOfWork::new()
                    .require_group_version(group_id, group.version())
                    .delete_group(group_id),
            )?;
            info!(group_id = %group_id, "group deleted");
            Ok(true)
        })
    }

    // ---------------------------------------------------------------------
    // Expenses
    // ---------------------------------------------------------------------

    /// Admit and persist a new expense paid by `creator`.
    #[instrument(skip_all, fields(group_id = %group_id, creator = %creator, total_amount = %total_amount))]
    pub fn create_expense(
        &self,
        group_id: GroupId,
        creator: MemberId,
        description: impl Into<String>,
        total_amount: Money,
        splits: Vec<ExpenseSplit>,
        date: DateTime<Utc>,
    ) -> DomainResult<Expense> {
        let description = description.into();
        run("create_expense", || {
            let group = self.require_group(group_id)?;
            let expense = self.admission.admit(
                &group,
                NewExpense {
                    expense_id: ExpenseId::new(),
                    group_id,
                    creator,
                    description,
                    total_amount,
                    splits,
                    date,
                    occurred_at: now(),
                },
            )?;

            if self.config.verify_on_write {
                let mut expenses = self.store.list_expenses(group_id)?;
                expenses.push(expense.clone());
                calculate_group_balances(&expenses, &self.store.list_settlements(group_id)?)?;
            }

            self.store.commit(
                UnitOfWork::new()
                    .require_group_version(group_id, group.version())
                    .insert_expense(expense.clone()),
            )?;
            info!(
                group_id = %group_id,
                expense_id = %expense.id_typed(),
                splits = expense.splits().len(),
                "expense recorded"
            );
            Ok(expense)
        })
    }

    /// Delete an expense and its splits. Only group admins may do this.
    #[instrument(skip_all, fields(group_id = %group_id, expense_id = %expense_id, requester = %requester))]
    pub fn delete_expense(
        &self,
        group_id: GroupId,
        expense_id: ExpenseId,
        requester: MemberId,
    ) -> DomainResult<bool> {
        run("delete_expense", || {
            let group = self.require_group(group_id)?;
            let expenses = self.store.list_expenses(group_id)?;
            self.admission
                .authorize_deletion(&group, &expenses, expense_id, requester)?;

            if self.config.verify_on_write {
                let remaining: Vec<Expense> = expenses
                    .into_iter()
                    .filter(|e| e.id_typed() != expense_id)
                    .collect();
                calculate_group_balances(&remaining, &self.store.list_settlements(group_id)?)?;
            }

            self.store.commit(
                UnitOfWork::new()
                    .require_group_version(group_id, group.version())
                    .delete_expense(group_id, expense_id),
            )?;
            info!(group_id = %group_id, expense_id = %expense_id, "expense deleted");
            Ok(true)
        })
    }

    pub fn group_expenses(&self, group_id: GroupId) -> DomainResult<Vec<Expense>> {
        run("group_expenses", || self.store.list_expenses(group_id))
    }

    pub fn expense_details(&self, expense_id: ExpenseId) -> DomainResult<Expense> {
        run("expense_details", || {
            self.store
                .load_expense(expense_id)?
                .ok_or_else(|| DomainError::not_found(format!("expense {expense_id}")))
        })
    }

    // ---------------------------------------------------------------------
    // Projections
    // ---------------------------------------------------------------------

    #[instrument(skip_all, fields(group_id = %group_id))]
    pub fn calculate_group_balances(&self, group_id: GroupId) -> DomainResult<Balances> {
        run("calculate_group_balances", || {
            let expenses = self.store.list_expenses(group_id)?;
            let settlements = self.store.list_settlements(group_id)?;
            calculate_group_balances(&expenses, &settlements)
        })
    }

    #[instrument(skip_all, fields(group_id = %group_id))]
    pub fn get_group_obligations(&self, group_id: GroupId) -> DomainResult<ObligationMap> {
        run("get_group_obligations", || {
            let expenses = self.store.list_expenses(group_id)?;
            let settlements = self.store.list_settlements(group_id)?;
            Ok(get_group_obligations(&expenses, &settlements))
        })
    }

    #[instrument(skip_all, fields(group_id = %group_id, member_id = %member_id))]
    pub fn get_user_obligations(
        &self,
        group_id: GroupId,
        member_id: MemberId,
    ) -> DomainResult<UserObligations> {
        run("get_user_obligations", || {
            let expenses = self.store.list_expenses(group_id)?;
            let settlements = self.store.list_settlements(group_id)?;
            Ok(get_user_obligations(&expenses, &settlements, member_id))
        })
    }

    // ---------------------------------------------------------------------
    // Settlements
    // ---------------------------------------------------------------------

    /// Open a pending settlement from debtor `from_member` to creditor
    /// `to_member`.
    #[instrument(skip_all, fields(group_id = %group_id, from = %from_member, to = %to_member, amount = %amount))]
    pub fn create_settlement_request(
        &self,
        group_id: GroupId,
        from_member: MemberId,
        to_member: MemberId,
        amount: Money,
    ) -> DomainResult<Settlement> {
        run("create_settlement_request", || {
            let group = self.require_group(group_id)?;
            let (settlement, events) = request_settlement(
                &group,
                &self.policy,
                RequestSettlement {
                    group_id,
                    settlement_id: SettlementId::new(),
                    from_member,
                    to_member,
                    amount,
                    occurred_at: now(),
                },
            )?;

            self.store.commit(
                UnitOfWork::new()
                    .require_group_version(group_id, group.version())
                    .insert_settlement(settlement.clone()),
            )?;
            log_events(&events);
            Ok(settlement)
        })
    }

    /// Confirm a pending settlement as its creditor.
    #[instrument(skip_all, fields(settlement_id = %settlement_id, member_id = %member_id))]
    pub fn confirm_settlement(
        &self,
        settlement_id: SettlementId,
        member_id: MemberId,
    ) -> DomainResult<Settlement> {
        run("confirm_settlement", || {
            self.resolve_settlement(settlement_id, |current| current.confirm(member_id, now()))
        })
    }

    /// Reject a pending settlement as its creditor.
    #[instrument(skip_all, fields(settlement_id = %settlement_id, member_id = %member_id))]
    pub fn reject_settlement(
        &self,
        settlement_id: SettlementId,
        member_id: MemberId,
    ) -> DomainResult<Settlement> {
        run("reject_settlement", || {
            self.resolve_settlement(settlement_id, |current| current.reject(member_id, now()))
        })
    }

    pub fn group_settlements(&self, group_id: GroupId) -> DomainResult<Vec<Settlement>> {
        run("group_settlements", || self.store.list_settlements(group_id))
    }

    /// Requests waiting on `member_id` and requests of theirs that were
    /// turned down, across every group.
    #[instrument(skip_all, fields(member_id = %member_id))]
    pub fn get_user_unconfirmed_settlements(
        &self,
        member_id: MemberId,
    ) -> DomainResult<UnconfirmedSettlements> {
        run("get_user_unconfirmed_settlements", || {
            let settlements = self.store.list_member_settlements(member_id)?;
            Ok(unconfirmed_settlements(member_id, &settlements))
        })
    }

    // ---------------------------------------------------------------------
    // Subscriptions
    // ---------------------------------------------------------------------

    /// Open a recurring charge paid by `creator` and split as `splits` every
    /// cycle.
    #[instrument(skip_all, fields(group_id = %group_id, creator = %creator, amount = %amount, cycle = %schedule.cycle))]
    pub fn create_subscription(
        &self,
        group_id: GroupId,
        creator: MemberId,
        name: impl Into<String>,
        amount: Money,
        splits: Vec<ExpenseSplit>,
        schedule: BillingSchedule,
    ) -> DomainResult<Subscription> {
        let name = name.into();
        run("create_subscription", || {
            let group = self.require_group(group_id)?;
            let subscription = open_subscription(
                &self.admission,
                &group,
                NewSubscription {
                    subscription_id: SubscriptionId::new(),
                    group_id,
                    creator,
                    name,
                    amount,
                    schedule,
                    splits,
                    occurred_at: now(),
                },
            )?;

            self.store.commit(
                UnitOfWork::new()
                    .require_group_version(group_id, group.version())
                    .put_subscription(subscription.clone(), ExpectedVersion::Exact(0)),
            )?;
            info!(
                group_id = %group_id,
                subscription_id = %subscription.id_typed(),
                "subscription opened"
            );
            Ok(subscription)
        })
    }

    /// Stop a subscription from billing. Expenses it already produced stay.
    #[instrument(skip_all, fields(subscription_id = %subscription_id, requester = %requester))]
    pub fn cancel_subscription(
        &self,
        subscription_id: SubscriptionId,
        requester: MemberId,
    ) -> DomainResult<Subscription> {
        run("cancel_subscription", || {
            let current = self.require_subscription(subscription_id)?;
            let group = self.require_group(current.group_id())?;
            let next = current.cancel(&group, requester)?;

            self.store.commit(
                UnitOfWork::new()
                    .require_group_version(group.id_typed(), group.version())
                    .put_subscription(next.clone(), ExpectedVersion::Exact(current.version())),
            )?;
            info!(subscription_id = %subscription_id, "subscription cancelled");
            Ok(next)
        })
    }

    /// Record an expense for every billing date of the subscription on or
    /// before `today` that has not been billed yet.
    ///
    /// Returns the expenses created by this call; an up-to-date subscription
    /// yields none. The expenses, their period links and the advanced
    /// subscription are committed together.
    #[instrument(skip_all, fields(subscription_id = %subscription_id, today = %today))]
    pub fn generate_due_expenses(
        &self,
        subscription_id: SubscriptionId,
        today: NaiveDate,
    ) -> DomainResult<Vec<Expense>> {
        run("generate_due_expenses", || {
            let subscription = self.require_subscription(subscription_id)?;
            let group_id = subscription.group_id();
            let group = self.require_group(group_id)?;
            let already = self.store.list_generated_expenses(subscription_id)?;

            let due = generate_due_expenses(
                &self.admission,
                &group,
                &subscription,
                &already,
                today,
                now(),
            )?;
            if due.subscription.version() == subscription.version() {
                return Ok(Vec::new());
            }

            if self.config.verify_on_write && !due.is_empty() {
                let mut expenses = self.store.list_expenses(group_id)?;
                expenses.extend(due.expenses.iter().cloned());
                calculate_group_balances(&expenses, &self.store.list_settlements(group_id)?)?;
            }

            let work = UnitOfWork::new()
                .require_group_version(group_id, group.version())
                .put_subscription(
                    due.subscription.clone(),
                    ExpectedVersion::Exact(subscription.version()),
                );
            let work = due
                .expenses
                .iter()
                .cloned()
                .fold(work, UnitOfWork::insert_expense);
            let work = due
                .links
                .into_iter()
                .fold(work, UnitOfWork::link_generated_expense);
            self.store.commit(work)?;

            info!(
                group_id = %group_id,
                subscription_id = %subscription_id,
                generated = due.expenses.len(),
                cycles_billed = due.subscription.cycles_billed(),
                "subscription billed"
            );
            Ok(due.expenses)
        })
    }

    pub fn group_subscriptions(&self, group_id: GroupId) -> DomainResult<Vec<Subscription>> {
        run("group_subscriptions", || self.store.list_subscriptions(group_id))
    }

    // ---------------------------------------------------------------------
    // Internals
    // ---------------------------------------------------------------------

    fn require_subscription(&self, subscription_id: SubscriptionId) -> DomainResult<Subscription> {
        self.store
            .load_subscription(subscription_id)?
            .ok_or_else(|| DomainError::not_found(format!("subscription {subscription_id}")))
    }

    fn require_group(&self, group_id: GroupId) -> DomainResult<Group> {
        self.store
            .load_group(group_id)?
            .ok_or_else(|| DomainError::not_found(format!("group {group_id}")))
    }

    fn apply_group_command(&self, group_id: GroupId, command: GroupCommand) -> DomainResult<Group> {
        let group = self.require_group(group_id)?;
        let (next, events) = group.execute(&command)?;

        self.store.commit(
            UnitOfWork::new().put_group(next.clone(), ExpectedVersion::Exact(group.version())),
        )?;
        log_events(&events);
        Ok(next)
    }

    fn resolve_settlement(
        &self,
        settlement_id: SettlementId,
        transition: impl FnOnce(&Settlement) -> DomainResult<(Settlement, Vec<SettlementEvent>)>,
    ) -> DomainResult<Settlement> {
        let current = self
            .store
            .load_settlement(settlement_id)?
            .ok_or_else(|| DomainError::not_found(format!("settlement {settlement_id}")))?;

        let (next, events) = transition(&current)?;

        if self.config.verify_on_write && next.is_confirmed() {
            let group_id = next.group_id();
            let settlements: Vec<Settlement> = self
                .store
                .list_settlements(group_id)?
                .into_iter()
                .map(|s| if s.id_typed() == settlement_id { next.clone() } else { s })
                .collect();
            calculate_group_balances(&self.store.list_expenses(group_id)?, &settlements)?;
        }

        self.store.commit(
            UnitOfWork::new().transition_settlement(next.clone(), current.version()),
        )?;
        log_events(&events);
        Ok(next)
    }
}

fn now() -> DateTime<Utc> {
    Utc::now()
}

fn seat(group: &Group, member_id: MemberId) -> DomainResult<Membership> {
    group
        .membership(member_id)
        .cloned()
        .ok_or_else(|| DomainError::not_found(format!("member {member_id}")))
}

fn log_events<E: Event>(events: &[E]) {
    for event in events {
        info!(
            event_type = event.event_type(),
            event_version = event.version(),
            occurred_at = %event.occurred_at(),
            "ledger event committed"
        );
    }
}

/// Run one service operation, logging refusals and invariant failures.
fn run<T>(operation: &'static str, f: impl FnOnce() -> DomainResult<T>) -> DomainResult<T> {
    f().inspect_err(|err| match err {
        DomainError::LedgerInconsistency(report) => {
            error!(
                operation,
                total = %report.total,
                members = report.balances.len(),
                "ledger inconsistency: balances do not sum to zero"
            );
        }
        other => {
            warn!(operation, kind = other.kind(), error = %other, "operation refused");
        }
    })
}
