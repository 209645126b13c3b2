//! Net balance per member.
//!
//! Positive balance: the member is owed money. Negative: the member owes.

use std::collections::BTreeMap;

use splitledger_core::{DomainError, DomainResult, MemberId, Money};

use crate::expense::Expense;
use crate::settlement::Settlement;

/// Member → signed net balance. Only members touched by an expense, a split
/// or a confirmed settlement appear (possibly at `0.00`).
pub type Balances = BTreeMap<MemberId, Money>;

/// Fold expenses, their splits and confirmed settlements into net balances.
///
/// The result must sum to exactly zero. If it does not, upstream data is
/// corrupt and the whole breakdown is returned as `LedgerInconsistency`.
pub fn calculate_group_balances(
    expenses: &[Expense],
    settlements: &[Settlement],
) -> DomainResult<Balances> {
    let mut balances = Balances::new();

    for expense in expenses {
        *balances.entry(expense.payer()).or_insert(Money::ZERO) += expense.total_amount();
        for split in expense.splits() {
            *balances.entry(split.member_id).or_insert(Money::ZERO) -= split.amount_owed;
        }
    }

    for settlement in settlements.iter().filter(|s| s.is_confirmed()) {
        *balances.entry(settlement.from_member()).or_insert(Money::ZERO) += settlement.amount();
        *balances.entry(settlement.to_member()).or_insert(Money::ZERO) -= settlement.amount();
    }

    let total: Money = balances.values().sum();
    if !total.is_zero() {
        return Err(DomainError::inconsistency(total, balances));
    }

    Ok(balances)
}
