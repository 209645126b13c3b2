//! Recurring subscriptions that bill a group on a fixed cycle.
//!
//! A subscription is a template for an expense: the same payer, total and
//! splits every cycle. Generating the expenses that are due is a pure step
//! that runs every charge through [`ExpenseAdmission`], so a generated expense
//! is held to exactly the rules of a hand-entered one.

use chrono::{DateTime, Datelike, Months, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use splitledger_core::{
    AggregateRoot, DomainError, DomainResult, ExpenseId, GroupId, MemberId, Money, SubscriptionId,
};

use crate::expense::{Expense, ExpenseAdmission, ExpenseSplit, NewExpense};
use crate::group::Group;

/// How often a subscription bills.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BillingCycle {
    #[default]
    Monthly,
    Yearly,
}

impl BillingCycle {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingCycle::Monthly => "monthly",
            BillingCycle::Yearly => "yearly",
        }
    }

    fn months(&self) -> u32 {
        match self {
            BillingCycle::Monthly => 1,
            BillingCycle::Yearly => 12,
        }
    }
}

impl core::fmt::Display for BillingCycle {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for BillingCycle {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "monthly" => Ok(BillingCycle::Monthly),
            "yearly" => Ok(BillingCycle::Yearly),
            other => Err(DomainError::validation(format!(
                "invalid billing cycle '{other}': must be 'monthly' or 'yearly'"
            ))),
        }
    }
}

/// When a subscription bills: every `cycle`, starting on `starts_on`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingSchedule {
    pub cycle: BillingCycle,
    pub starts_on: NaiveDate,
}

impl BillingSchedule {
    pub fn monthly(starts_on: NaiveDate) -> Self {
        Self {
            cycle: BillingCycle::Monthly,
            starts_on,
        }
    }

    pub fn yearly(starts_on: NaiveDate) -> Self {
        Self {
            cycle: BillingCycle::Yearly,
            starts_on,
        }
    }
}

/// Calendar month a charge belongs to. Renders as `MM-YYYY`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BillingPeriod {
    year: i32,
    month: u32,
}

impl BillingPeriod {
    pub fn of(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }
}

impl core::fmt::Display for BillingPeriod {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:02}-{:04}", self.month, self.year)
    }
}

/// A recurring charge owned by a group and paid by its creator.
///
/// Billing dates are derived from the first billing date and the number of
/// cycles already billed, so a subscription anchored on the 31st bills on
/// the last day of shorter months without drifting afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    id: SubscriptionId,
    group_id: GroupId,
    name: String,
    amount: Money,
    billing_cycle: BillingCycle,
    first_billing_date: NaiveDate,
    cycles_billed: u32,
    splits: Vec<ExpenseSplit>,
    created_by: MemberId,
    active: bool,
    created_at: DateTime<Utc>,
    version: u64,
}

impl Subscription {
    pub fn id_typed(&self) -> SubscriptionId {
        self.id
    }

    pub fn group_id(&self) -> GroupId {
        self.group_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn amount(&self) -> Money {
        self.amount
    }

    pub fn billing_cycle(&self) -> BillingCycle {
        self.billing_cycle
    }

    pub fn splits(&self) -> &[ExpenseSplit] {
        &self.splits
    }

    pub fn created_by(&self) -> MemberId {
        self.created_by
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn cycles_billed(&self) -> u32 {
        self.cycles_billed
    }

    /// Date of the next charge that has not been billed yet.
    pub fn next_billing_date(&self) -> DomainResult<NaiveDate> {
        self.billing_date(self.cycles_billed)
    }

    fn billing_date(&self, cycle: u32) -> DomainResult<NaiveDate> {
        cycle
            .checked_mul(self.billing_cycle.months())
            .and_then(|months| self.first_billing_date.checked_add_months(Months::new(months)))
            .ok_or_else(|| {
                DomainError::validation(format!(
                    "billing date for cycle {cycle} of subscription {} is out of range",
                    self.id
                ))
            })
    }

    /// Stop billing. Only the owner or a group admin may cancel.
    pub fn cancel(&self, group: &Group, requester: MemberId) -> DomainResult<Subscription> {
        if requester != self.created_by && !group.is_admin(requester) {
            return Err(DomainError::unauthorized(
                "only the subscription owner or a group admin can cancel it",
            ));
        }
        if !self.active {
            return Err(DomainError::invalid_transition(format!(
                "subscription {} is already cancelled",
                self.id
            )));
        }

        let mut next = self.clone();
        next.active = false;
        next.version += 1;
        Ok(next)
    }
}

impl AggregateRoot for Subscription {
    type Id = SubscriptionId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Input for opening a subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewSubscription {
    pub subscription_id: SubscriptionId,
    pub group_id: GroupId,
    pub creator: MemberId,
    pub name: String,
    pub amount: Money,
    pub schedule: BillingSchedule,
    pub splits: Vec<ExpenseSplit>,
    pub occurred_at: DateTime<Utc>,
}

/// Open a subscription in `group`.
///
/// The charge template is dry-run through `admission` so a subscription that
/// could never produce a valid expense is refused up front.
pub fn open_subscription(
    admission: &ExpenseAdmission,
    group: &Group,
    draft: NewSubscription,
) -> DomainResult<Subscription> {
    let name = draft.name.trim();
    if name.is_empty() {
        return Err(DomainError::validation("subscription name cannot be empty"));
    }

    admission.admit(
        group,
        NewExpense {
            expense_id: ExpenseId::from_uuid(*draft.subscription_id.as_uuid()),
            group_id: draft.group_id,
            creator: draft.creator,
            description: name.to_string(),
            total_amount: draft.amount,
            splits: draft.splits.clone(),
            date: start_of_day(draft.schedule.starts_on),
            occurred_at: draft.occurred_at,
        },
    )?;

    Ok(Subscription {
        id: draft.subscription_id,
        group_id: draft.group_id,
        name: name.to_string(),
        amount: draft.amount,
        billing_cycle: draft.schedule.cycle,
        first_billing_date: draft.schedule.starts_on,
        cycles_billed: 0,
        splits: draft.splits,
        created_by: draft.creator,
        active: true,
        created_at: draft.occurred_at,
        version: 1,
    })
}

/// Link between a subscription's billing period and the expense it produced.
///
/// A period is billed at most once and an expense is linked at most once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedExpense {
    pub subscription_id: SubscriptionId,
    pub expense_id: ExpenseId,
    pub billing_period: BillingPeriod,
    pub created_at: DateTime<Utc>,
}

/// Result of one billing run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DueExpenses {
    /// The subscription advanced past every period considered in this run.
    pub subscription: Subscription,
    pub expenses: Vec<Expense>,
    pub links: Vec<GeneratedExpense>,
}

impl DueExpenses {
    pub fn is_empty(&self) -> bool {
        self.expenses.is_empty()
    }
}

/// Produce an expense for every billing date of `subscription` on or before
/// `today`.
///
/// Periods already present in `already_generated` are skipped, so re-running
/// over the same history generates nothing new. An inactive subscription
/// generates nothing. If any charge fails admission (a split member has left
/// the group, for instance) the whole run fails.
pub fn generate_due_expenses(
    admission: &ExpenseAdmission,
    group: &Group,
    subscription: &Subscription,
    already_generated: &[GeneratedExpense],
    today: NaiveDate,
    at: DateTime<Utc>,
) -> DomainResult<DueExpenses> {
    let mut next = subscription.clone();
    let mut expenses = Vec::new();
    let mut links = Vec::new();

    if next.active {
        loop {
            let due = next.next_billing_date()?;
            if due > today {
                break;
            }

            let period = BillingPeriod::of(due);
            let billed = already_generated
                .iter()
                .any(|g| g.subscription_id == next.id && g.billing_period == period);

            if !billed {
                let expense = admission.admit(
                    group,
                    NewExpense {
                        expense_id: ExpenseId::new(),
                        group_id: next.group_id,
                        creator: next.created_by,
                        description: format!("{} ({period})", next.name),
                        total_amount: next.amount,
                        splits: next.splits.clone(),
                        date: start_of_day(due),
                        occurred_at: at,
                    },
                )?;
                links.push(GeneratedExpense {
                    subscription_id: next.id,
                    expense_id: expense.id_typed(),
                    billing_period: period,
                    created_at: at,
                });
                expenses.push(expense);
            }

            next.cycles_billed += 1;
        }
    }

    if next.cycles_billed != subscription.cycles_billed {
        next.version += 1;
    }

    Ok(DueExpenses {
        subscription: next,
        expenses,
        links,
    })
}

fn start_of_day(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::group::{AddMember, CreateGroup, GroupCommand, MemberRole, RemoveMember};
    use splitledger_core::Aggregate;

    fn m(s: &str) -> Money {
        s.parse().unwrap()
    }

    fn day(y: i32, mo: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, mo, d).unwrap()
    }

    fn flat() -> (Group, MemberId, MemberId) {
        let (alice, bob) = (MemberId::new(), MemberId::new());
        let group_id = GroupId::new();
        let (group, _) = Group::empty(group_id)
            .execute(&GroupCommand::CreateGroup(CreateGroup {
                group_id,
                name: "Flat".to_string(),
                description: None,
                creator: alice,
                occurred_at: Utc::now(),
            }))
            .unwrap();
        let (group, _) = group
            .execute(&GroupCommand::AddMember(AddMember {
                group_id,
                member_id: bob,
                role: MemberRole::Member,
                occurred_at: Utc::now(),
            }))
            .unwrap();
        (group, alice, bob)
    }

    fn streaming(
        group: &Group,
        owner: MemberId,
        other: MemberId,
        schedule: BillingSchedule,
    ) -> Subscription {
        open_subscription(
            &ExpenseAdmission::default(),
            group,
            NewSubscription {
                subscription_id: SubscriptionId::new(),
                group_id: group.id_typed(),
                creator: owner,
                name: " Streaming ".to_string(),
                amount: m("15.98"),
                schedule,
                splits: vec![
                    ExpenseSplit::new(owner, m("7.99")),
                    ExpenseSplit::new(other, m("7.99")),
                ],
                occurred_at: Utc::now(),
            },
        )
        .unwrap()
    }

    #[test]
    fn opening_runs_the_template_through_admission() {
        let (group, alice, bob) = flat();
        let base = NewSubscription {
            subscription_id: SubscriptionId::new(),
            group_id: group.id_typed(),
            creator: alice,
            name: "Internet".to_string(),
            amount: m("40.00"),
            schedule: BillingSchedule::monthly(day(2026, 1, 1)),
            splits: vec![ExpenseSplit::new(bob, m("30.00"))],
            occurred_at: Utc::now(),
        };
        let admission = ExpenseAdmission::default();

        let err = open_subscription(&admission, &group, base.clone()).unwrap_err();
        assert!(matches!(err, DomainError::Validation(ref msg) if msg.contains("sum to 30.00")));

        let mut unnamed = base.clone();
        unnamed.name = "  ".to_string();
        let err = open_subscription(&admission, &group, unnamed).unwrap_err();
        assert!(matches!(err, DomainError::Validation(ref msg) if msg.contains("name")));

        let mut outsider = base;
        outsider.splits = vec![ExpenseSplit::new(MemberId::new(), m("40.00"))];
        let err = open_subscription(&admission, &group, outsider).unwrap_err();
        assert!(matches!(err, DomainError::Validation(ref msg) if msg.contains("does not belong")));
    }

    #[test]
    fn monthly_run_bills_every_elapsed_period_without_drift() {
        let (group, alice, bob) = flat();
        let sub = streaming(&group, alice, bob, BillingSchedule::monthly(day(2026, 1, 31)));
        assert_eq!(sub.name(), "Streaming");

        let due = generate_due_expenses(
            &ExpenseAdmission::default(),
            &group,
            &sub,
            &[],
            day(2026, 4, 15),
            Utc::now(),
        )
        .unwrap();

        let periods: Vec<String> = due.links.iter().map(|l| l.billing_period.to_string()).collect();
        assert_eq!(periods, vec!["01-2026", "02-2026", "03-2026"]);
        let dates: Vec<NaiveDate> = due.expenses.iter().map(|e| e.date().date_naive()).collect();
        assert_eq!(dates, vec![day(2026, 1, 31), day(2026, 2, 28), day(2026, 3, 31)]);
        assert_eq!(due.expenses[1].description(), "Streaming (02-2026)");
        assert!(due.expenses.iter().all(|e| e.payer() == alice && e.split_total() == m("15.98")));

        assert_eq!(due.subscription.next_billing_date().unwrap(), day(2026, 4, 30));
        assert_eq!(due.subscription.version(), sub.version() + 1);
    }

    #[test]
    fn second_run_for_the_same_period_generates_nothing() {
        let (group, alice, bob) = flat();
        let admission = ExpenseAdmission::default();
        let sub = streaming(&group, alice, bob, BillingSchedule::monthly(day(2026, 3, 1)));
        let today = day(2026, 3, 20);

        let first = generate_due_expenses(&admission, &group, &sub, &[], today, Utc::now()).unwrap();
        assert_eq!(first.expenses.len(), 1);

        let advanced = generate_due_expenses(
            &admission,
            &group,
            &first.subscription,
            &first.links,
            today,
            Utc::now(),
        )
        .unwrap();
        assert!(advanced.is_empty());
        assert_eq!(advanced.subscription, first.subscription);

        // A stale copy of the subscription still skips periods already linked.
        let stale = generate_due_expenses(&admission, &group, &sub, &first.links, today, Utc::now()).unwrap();
        assert!(stale.is_empty());
        assert_eq!(stale.subscription.cycles_billed(), 1);
    }

    #[test]
    fn yearly_cycle_and_future_start() {
        let (group, alice, bob) = flat();
        let admission = ExpenseAdmission::default();
        let sub = streaming(&group, alice, bob, BillingSchedule::yearly(day(2024, 2, 29)));

        let due = generate_due_expenses(&admission, &group, &sub, &[], day(2026, 6, 1), Utc::now()).unwrap();
        let periods: Vec<String> = due.links.iter().map(|l| l.billing_period.to_string()).collect();
        assert_eq!(periods, vec!["02-2024", "02-2025", "02-2026"]);
        assert_eq!(due.expenses[1].date().date_naive(), day(2025, 2, 28));

        let early = generate_due_expenses(&admission, &group, &sub, &[], day(2024, 1, 1), Utc::now()).unwrap();
        assert!(early.is_empty());
        assert_eq!(early.subscription, sub);
    }

    #[test]
    fn cancelled_subscription_stops_billing() {
        let (group, alice, bob) = flat();
        let sub = streaming(&group, bob, alice, BillingSchedule::monthly(day(2026, 1, 1)));

        let stranger = MemberId::new();
        assert!(matches!(sub.cancel(&group, stranger).unwrap_err(), DomainError::Unauthorized(_)));

        // Alice is an admin, not the owner.
        let cancelled = sub.cancel(&group, alice).unwrap();
        assert!(!cancelled.is_active());
        assert!(matches!(
            cancelled.cancel(&group, bob).unwrap_err(),
            DomainError::InvalidTransition(_)
        ));

        let due = generate_due_expenses(
            &ExpenseAdmission::default(),
            &group,
            &cancelled,
            &[],
            day(2026, 12, 31),
            Utc::now(),
        )
        .unwrap();
        assert!(due.is_empty());
    }

    #[test]
    fn charge_for_a_departed_member_fails_the_run() {
        let (group, alice, bob) = flat();
        let sub = streaming(&group, alice, bob, BillingSchedule::monthly(day(2026, 1, 1)));
        let (group, _) = group
            .execute(&GroupCommand::RemoveMember(RemoveMember {
                group_id: group.id_typed(),
                member_id: bob,
                occurred_at: Utc::now(),
            }))
            .unwrap();

        let err = generate_due_expenses(
            &ExpenseAdmission::default(),
            &group,
            &sub,
            &[],
            day(2026, 1, 2),
            Utc::now(),
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn cycle_parses_from_its_stored_name() {
        assert_eq!("yearly".parse::<BillingCycle>().unwrap(), BillingCycle::Yearly);
        assert_eq!(BillingCycle::Monthly.to_string(), "monthly");
        assert!("weekly".parse::<BillingCycle>().is_err());
    }
}
