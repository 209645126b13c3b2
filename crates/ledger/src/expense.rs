use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use splitledger_core::{DomainError, DomainResult, Entity, ExpenseId, GroupId, MemberId, Money};

use crate::group::Group;
use crate::policy::AmountPolicy;

/// One member's share of an expense.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpenseSplit {
    pub member_id: MemberId,
    pub amount_owed: Money,
}

impl ExpenseSplit {
    pub fn new(member_id: MemberId, amount_owed: Money) -> Self {
        Self {
            member_id,
            amount_owed,
        }
    }
}

/// An expense paid by one member and shared through its splits.
///
/// The splits are owned by the expense: they are admitted, stored and deleted
/// together with it and never reassigned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Expense {
    id: ExpenseId,
    group_id: GroupId,
    payer: MemberId,
    description: String,
    total_amount: Money,
    date: DateTime<Utc>,
    splits: Vec<ExpenseSplit>,
    created_at: DateTime<Utc>,
}

impl Expense {
    /// Rebuild an expense from stored parts.
    ///
    /// Performs no validation: this is for the persistence layer handing back
    /// records that went through [`ExpenseAdmission::admit`] when written.
    #[allow(clippy::too_many_arguments)]
    pub fn restore(
        id: ExpenseId,
        group_id: GroupId,
        payer: MemberId,
        description: String,
        total_amount: Money,
        date: DateTime<Utc>,
        splits: Vec<ExpenseSplit>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            group_id,
            payer,
            description,
            total_amount,
            date,
            splits,
            created_at,
        }
    }

    pub fn id_typed(&self) -> ExpenseId {
        self.id
    }

    pub fn group_id(&self) -> GroupId {
        self.group_id
    }

    pub fn payer(&self) -> MemberId {
        self.payer
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn total_amount(&self) -> Money {
        self.total_amount
    }

    pub fn date(&self) -> DateTime<Utc> {
        self.date
    }

    pub fn splits(&self) -> &[ExpenseSplit] {
        &self.splits
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn split_total(&self) -> Money {
        self.splits.iter().map(|s| s.amount_owed).sum()
    }
}

impl Entity for Expense {
    type Id = ExpenseId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// Input for recording a new expense. The creator is the payer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewExpense {
    pub expense_id: ExpenseId,
    pub group_id: GroupId,
    pub creator: MemberId,
    pub description: String,
    pub total_amount: Money,
    pub splits: Vec<ExpenseSplit>,
    pub date: DateTime<Utc>,
    pub occurred_at: DateTime<Utc>,
}

/// Gatekeeper for expense writes.
///
/// Checks run in a fixed order and the first failure is reported:
///
/// 1. description is non-empty after trimming
/// 2. total amount is positive (and within the amount ceiling)
/// 3. the creator belongs to the group
/// 4. every split member belongs to the group
/// 5. no member appears twice in the splits
/// 6. split amounts are non-negative and sum exactly to the total
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExpenseAdmission {
    policy: AmountPolicy,
}

impl ExpenseAdmission {
    pub fn new(policy: AmountPolicy) -> Self {
        Self { policy }
    }

    pub fn admit(&self, group: &Group, draft: NewExpense) -> DomainResult<Expense> {
        if !group.is_created() || group.id_typed() != draft.group_id {
            return Err(DomainError::not_found(format!("group {}", draft.group_id)));
        }

        let description = draft.description.trim();
        if description.is_empty() {
            return Err(DomainError::validation("description cannot be empty"));
        }

        if !draft.total_amount.is_positive() {
            return Err(DomainError::validation(
                "total amount must be greater than zero",
            ));
        }
        self.policy.check_ceiling("total amount", draft.total_amount)?;

        if !group.is_member(draft.creator) {
            return Err(DomainError::validation(format!(
                "creator {} must be a member of the group",
                draft.creator
            )));
        }

        for split in &draft.splits {
            if !group.is_member(split.member_id) {
                return Err(DomainError::validation(format!(
                    "member {} in splits does not belong to the group",
                    split.member_id
                )));
            }
        }

        let mut seen = HashSet::with_capacity(draft.splits.len());
        for split in &draft.splits {
            if !seen.insert(split.member_id) {
                return Err(DomainError::validation(format!(
                    "duplicate member {} found in splits",
                    split.member_id
                )));
            }
        }

        for split in &draft.splits {
            if split.amount_owed.is_negative() {
                return Err(DomainError::validation(format!(
                    "split amount for member {} cannot be negative",
                    split.member_id
                )));
            }
            self.policy.check_ceiling("split amount", split.amount_owed)?;
        }

        let split_total: Money = draft.splits.iter().map(|s| s.amount_owed).sum();
        if split_total != draft.total_amount {
            return Err(DomainError::validation(format!(
                "split amounts sum to {split_total} but the total amount is {}",
                draft.total_amount
            )));
        }

        Ok(Expense {
            id: draft.expense_id,
            group_id: draft.group_id,
            payer: draft.creator,
            description: description.to_string(),
            total_amount: draft.total_amount,
            date: draft.date,
            splits: draft.splits,
            created_at: draft.occurred_at,
        })
    }

    /// Check that `requester` may delete `expense_id` and return the expense.
    ///
    /// `expenses` is the group's current expense list.
    pub fn authorize_deletion<'a>(
        &self,
        group: &Group,
        expenses: &'a [Expense],
        expense_id: ExpenseId,
        requester: MemberId,
    ) -> DomainResult<&'a Expense> {
        let membership = group.membership(requester).ok_or_else(|| {
            DomainError::unauthorized(format!(
                "member {requester} must belong to the group to delete expenses"
            ))
        })?;
        if !membership.is_admin() {
            return Err(DomainError::unauthorized("only admins can delete expenses"));
        }

        expenses
            .iter()
            .find(|e| e.id == expense_id && e.group_id == group.id_typed())
            .ok_or_else(|| {
                DomainError::not_found(format!(
                    "expense {expense_id} does not exist in group {}",
                    group.id_typed()
                ))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::group::{AddMember, CreateGroup, GroupCommand, MemberRole};
    use proptest::prelude::*;
    use splitledger_core::Aggregate;

    fn m(s: &str) -> Money {
        s.parse().unwrap()
    }

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    struct Trio {
        group: Group,
        alice: MemberId,
        bob: MemberId,
        carol: MemberId,
    }

    fn trio() -> Trio {
        let (alice, bob, carol) = (MemberId::new(), MemberId::new(), MemberId::new());
        let group_id = GroupId::new();
        let (mut group, _) = Group::empty(group_id)
            .execute(&GroupCommand::CreateGroup(CreateGroup {
                group_id,
                name: "Trip".to_string(),
                description: None,
                creator: alice,
                occurred_at: test_time(),
            }))
            .unwrap();
        for member_id in [bob, carol] {
            group = group
                .execute(&GroupCommand::AddMember(AddMember {
                    group_id,
                    member_id,
                    role: MemberRole::Member,
                    occurred_at: test_time(),
                }))
                .unwrap()
                .0;
        }
        Trio {
            group,
            alice,
            bob,
            carol,
        }
    }

    fn draft(t: &Trio, total: &str, splits: Vec<ExpenseSplit>) -> NewExpense {
        NewExpense {
            expense_id: ExpenseId::new(),
            group_id: t.group.id_typed(),
            creator: t.alice,
            description: "Dinner".to_string(),
            total_amount: m(total),
            splits,
            date: test_time(),
            occurred_at: test_time(),
        }
    }

    fn even_thirds(t: &Trio) -> Vec<ExpenseSplit> {
        vec![
            ExpenseSplit::new(t.alice, m("20.00")),
            ExpenseSplit::new(t.bob, m("20.00")),
            ExpenseSplit::new(t.carol, m("20.00")),
        ]
    }

    fn validation_message(result: DomainResult<Expense>) -> String {
        match result.unwrap_err() {
            DomainError::Validation(msg) => msg,
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn admits_even_split_with_creator_as_payer() {
        let t = trio();
        let expense = ExpenseAdmission::default()
            .admit(&t.group, draft(&t, "60.00", even_thirds(&t)))
            .unwrap();

        assert_eq!(expense.payer(), t.alice);
        assert_eq!(expense.total_amount(), m("60.00"));
        assert_eq!(expense.split_total(), expense.total_amount());
        assert_eq!(expense.splits().len(), 3);
    }

    #[test]
    fn description_is_checked_first() {
        let t = trio();
        let mut d = draft(&t, "0.00", vec![]);
        d.description = "  \t".to_string();
        d.creator = MemberId::new();

        let msg = validation_message(ExpenseAdmission::default().admit(&t.group, d));
        assert_eq!(msg, "description cannot be empty");
    }

    #[test]
    fn non_positive_total_is_rejected_before_membership() {
        let t = trio();
        let mut d = draft(&t, "0.00", vec![]);
        d.creator = MemberId::new();

        let msg = validation_message(ExpenseAdmission::default().admit(&t.group, d));
        assert_eq!(msg, "total amount must be greater than zero");
    }

    #[test]
    fn outsider_creator_is_rejected() {
        let t = trio();
        let outsider = MemberId::new();
        let mut d = draft(&t, "60.00", even_thirds(&t));
        d.creator = outsider;

        let msg = validation_message(ExpenseAdmission::default().admit(&t.group, d));
        assert!(msg.contains(&outsider.to_string()));
        assert!(msg.contains("must be a member"));
    }

    #[test]
    fn outsider_split_member_is_named() {
        let t = trio();
        let outsider = MemberId::new();
        let splits = vec![
            ExpenseSplit::new(t.alice, m("30.00")),
            ExpenseSplit::new(outsider, m("30.00")),
        ];

        let msg = validation_message(
            ExpenseAdmission::default().admit(&t.group, draft(&t, "60.00", splits)),
        );
        assert_eq!(
            msg,
            format!("member {outsider} in splits does not belong to the group")
        );
    }

    #[test]
    fn duplicate_split_member_is_named() {
        let t = trio();
        let splits = vec![
            ExpenseSplit::new(t.bob, m("30.00")),
            ExpenseSplit::new(t.bob, m("30.00")),
        ];

        let msg = validation_message(
            ExpenseAdmission::default().admit(&t.group, draft(&t, "60.00", splits)),
        );
        assert_eq!(msg, format!("duplicate member {} found in splits", t.bob));
    }

    #[test]
    fn split_sum_mismatch_reports_both_sums() {
        let t = trio();
        let splits = vec![
            ExpenseSplit::new(t.alice, m("20.00")),
            ExpenseSplit::new(t.bob, m("20.00")),
            ExpenseSplit::new(t.carol, m("19.99")),
        ];

        let msg = validation_message(
            ExpenseAdmission::default().admit(&t.group, draft(&t, "60.00", splits)),
        );
        assert_eq!(msg, "split amounts sum to 59.99 but the total amount is 60.00");
    }

    #[test]
    fn negative_split_is_rejected_even_if_sum_matches() {
        let t = trio();
        let splits = vec![
            ExpenseSplit::new(t.alice, m("70.00")),
            ExpenseSplit::new(t.bob, m("-10.00")),
        ];

        let msg = validation_message(
            ExpenseAdmission::default().admit(&t.group, draft(&t, "60.00", splits)),
        );
        assert!(msg.contains("cannot be negative"));
    }

    #[test]
    fn zero_split_is_allowed() {
        let t = trio();
        let splits = vec![
            ExpenseSplit::new(t.bob, m("60.00")),
            ExpenseSplit::new(t.carol, m("0.00")),
        ];
        assert!(
            ExpenseAdmission::default()
                .admit(&t.group, draft(&t, "60.00", splits))
                .is_ok()
        );
    }

    #[test]
    fn amount_ceiling_applies_to_total() {
        let t = trio();
        let admission = ExpenseAdmission::new(AmountPolicy::new(m("100.00")));
        let splits = vec![ExpenseSplit::new(t.bob, m("100.01"))];

        let msg = validation_message(admission.admit(&t.group, draft(&t, "100.01", splits)));
        assert!(msg.starts_with("total amount 100.01 exceeds"));
    }

    #[test]
    fn deletion_requires_admin_then_existing_expense() {
        let t = trio();
        let admission = ExpenseAdmission::default();
        let expense = admission
            .admit(&t.group, draft(&t, "60.00", even_thirds(&t)))
            .unwrap();
        let expenses = vec![expense.clone()];

        let err = admission
            .authorize_deletion(&t.group, &expenses, expense.id_typed(), t.bob)
            .unwrap_err();
        assert!(matches!(err, DomainError::Unauthorized(_)));

        let err = admission
            .authorize_deletion(&t.group, &expenses, expense.id_typed(), MemberId::new())
            .unwrap_err();
        assert!(matches!(err, DomainError::Unauthorized(_)));

        let err = admission
            .authorize_deletion(&t.group, &expenses, ExpenseId::new(), t.alice)
            .unwrap_err();
        assert!(matches!(err, DomainError::NotFound(_)));

        let found = admission
            .authorize_deletion(&t.group, &expenses, expense.id_typed(), t.alice)
            .unwrap();
        assert_eq!(found, &expense);
    }

    proptest! {
        /// Property: an expense is admitted exactly when its splits sum to the total,
        /// and every admitted expense satisfies the sum exactly.
        #[test]
        fn admitted_iff_splits_sum_to_total(
            cents in prop::collection::vec(0i64..50_000, 3),
            total_cents in 1i64..150_000,
        ) {
            let t = trio();
            let splits = vec![
                ExpenseSplit::new(t.alice, Money::from_cents(cents[0])),
                ExpenseSplit::new(t.bob, Money::from_cents(cents[1])),
                ExpenseSplit::new(t.carol, Money::from_cents(cents[2])),
            ];
            let mut d = draft(&t, "1.00", splits);
            d.total_amount = Money::from_cents(total_cents);

            let result = ExpenseAdmission::default().admit(&t.group, d);
            let sums_match = cents.iter().sum::<i64>() == total_cents;

            prop_assert_eq!(result.is_ok(), sums_match);
            if let Ok(expense) = result {
                prop_assert_eq!(expense.split_total(), expense.total_amount());
            }
        }
    }
}
