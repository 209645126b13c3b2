//! Pairwise "who owes whom" obligations.
//!
//! Obligations are tracked per directed debtor → creditor edge and are never
//! netted across pairs: a confirmed settlement discharges exactly the edge it
//! names. Over-paying an edge zeroes it; the excess is not carried anywhere.

use std::collections::BTreeMap;

use serde::Serialize;

use splitledger_core::{MemberId, Money};

use crate::expense::Expense;
use crate::settlement::Settlement;

/// Creditor → amount owed to them by one debtor.
pub type Creditors = BTreeMap<MemberId, Money>;

/// Sparse debtor → creditor → positive amount map.
///
/// Entries are only ever created by [`ObligationMap::accrue`] with a positive
/// amount and removed by [`ObligationMap::discharge`] once they reach zero,
/// so the map never holds a zero or negative edge and never holds a debtor
/// with no creditors.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ObligationMap(BTreeMap<MemberId, Creditors>);

impl ObligationMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `amount` to the `debtor → creditor` edge, creating it if missing.
    /// Non-positive amounts leave the map untouched.
    pub fn accrue(&mut self, debtor: MemberId, creditor: MemberId, amount: Money) {
        if !amount.is_positive() {
            return;
        }
        *self
            .0
            .entry(debtor)
            .or_default()
            .entry(creditor)
            .or_insert(Money::ZERO) += amount;
    }

    /// Subtract `amount` from the `debtor → creditor` edge, pruning the edge
    /// (and the debtor) when nothing positive remains.
    pub fn discharge(&mut self, debtor: MemberId, creditor: MemberId, amount: Money) {
        let Some(creditors) = self.0.get_mut(&debtor) else {
            return;
        };
        if let Some(owed) = creditors.get_mut(&creditor) {
            *owed -= amount;
            if !owed.is_positive() {
                creditors.remove(&creditor);
            }
        }
        if creditors.is_empty() {
            self.0.remove(&debtor);
        }
    }

    /// Amount `debtor` owes `creditor`, if any.
    pub fn get(&self, debtor: MemberId, creditor: MemberId) -> Option<Money> {
        self.0.get(&debtor).and_then(|c| c.get(&creditor)).copied()
    }

    /// Everyone `debtor` owes.
    pub fn creditors_of(&self, debtor: MemberId) -> Option<&Creditors> {
        self.0.get(&debtor)
    }

    /// Everyone who owes `creditor`, keyed by debtor.
    pub fn debtors_of(&self, creditor: MemberId) -> Creditors {
        self.0
            .iter()
            .filter_map(|(debtor, creditors)| {
                creditors.get(&creditor).map(|amount| (*debtor, *amount))
            })
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&MemberId, &Creditors)> {
        self.0.iter()
    }

    /// Every `(debtor, creditor, amount)` edge.
    pub fn edges(&self) -> impl Iterator<Item = (MemberId, MemberId, Money)> + '_ {
        self.0.iter().flat_map(|(debtor, creditors)| {
            creditors
                .iter()
                .map(move |(creditor, amount)| (*debtor, *creditor, *amount))
        })
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of debtors with at least one outstanding edge.
    pub fn len(&self) -> usize {
        self.0.len()
    }
}

/// One member's view of the obligation map.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UserObligations {
    /// Creditor → amount this member owes them.
    pub owes: Creditors,
    /// Debtor → amount they owe this member.
    pub owed_by: Creditors,
}

/// Fold expenses and confirmed settlements into per-edge obligations.
pub fn get_group_obligations(expenses: &[Expense], settlements: &[Settlement]) -> ObligationMap {
    let mut obligations = ObligationMap::new();

    for expense in expenses {
        let payer = expense.payer();
        for split in expense.splits() {
            // A payer's own share is not a debt.
            if split.member_id == payer {
                continue;
            }
            obligations.accrue(split.member_id, payer, split.amount_owed);
        }
    }

    for settlement in settlements.iter().filter(|s| s.is_confirmed()) {
        obligations.discharge(
            settlement.from_member(),
            settlement.to_member(),
            settlement.amount(),
        );
    }

    obligations
}

/// `member`'s outgoing and incoming edges, built from one scan of the map.
pub fn get_user_obligations(
    expenses: &[Expense],
    settlements: &[Settlement],
    member: MemberId,
) -> UserObligations {
    let obligations = get_group_obligations(expenses, settlements);
    UserObligations {
        owes: obligations.creditors_of(member).cloned().unwrap_or_default(),
        owed_by: obligations.debtors_of(member),
    }
}
