use splitledger_core::{ExpectedVersion, ExpenseId, GroupId};
use splitledger_ledger::{Expense, GeneratedExpense, Group, Settlement, Subscription};

/// One pending change to the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StagedWrite {
    /// Insert or replace a group. `expected` is checked against the stored
    /// group's version (`0` when absent).
    PutGroup {
        group: Group,
        expected: ExpectedVersion,
    },
    /// Fail the commit unless the stored group is still at `version`.
    ///
    /// Writes that were admitted against a roster snapshot stage this so a
    /// roster change committed in between is reported as a conflict.
    RequireGroupVersion { group_id: GroupId, version: u64 },
    /// Remove a group together with its expenses, settlements and
    /// subscriptions.
    DeleteGroup { group_id: GroupId },
    /// Insert an expense with its splits. The id must be new.
    InsertExpense(Expense),
    /// Remove an expense, its splits and any subscription link to it.
    DeleteExpense {
        group_id: GroupId,
        expense_id: ExpenseId,
    },
    /// Insert a pending settlement. The id must be new.
    InsertSettlement(Settlement),
    /// Replace a settlement that is still pending at `expected_version`.
    TransitionSettlement {
        settlement: Settlement,
        expected_version: u64,
    },
    /// Insert or replace a subscription, checked like [`StagedWrite::PutGroup`].
    PutSubscription {
        subscription: Subscription,
        expected: ExpectedVersion,
    },
    /// Record that a billing period produced an expense. A period or an
    /// expense that is already linked is a conflict.
    LinkGeneratedExpense(GeneratedExpense),
}

/// Ordered batch of writes committed as one atomic step.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnitOfWork {
    writes: Vec<StagedWrite>,
}

impl UnitOfWork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stage(mut self, write: StagedWrite) -> Self {
        self.writes.push(write);
        self
    }

    pub fn put_group(self, group: Group, expected: ExpectedVersion) -> Self {
        self.stage(StagedWrite::PutGroup { group, expected })
    }

    pub fn require_group_version(self, group_id: GroupId, version: u64) -> Self {
        self.stage(StagedWrite::RequireGroupVersion { group_id, version })
    }

    pub fn delete_group(self, group_id: GroupId) -> Self {
        self.stage(StagedWrite::DeleteGroup { group_id })
    }

    pub fn insert_expense(self, expense: Expense) -> Self {
        self.stage(StagedWrite::InsertExpense(expense))
    }

    pub fn delete_expense(self, group_id: GroupId, expense_id: ExpenseId) -> Self {
        self.stage(StagedWrite::DeleteExpense {
            group_id,
            expense_id,
        })
    }

    pub fn insert_settlement(self, settlement: Settlement) -> Self {
        self.stage(StagedWrite::InsertSettlement(settlement))
    }

    pub fn transition_settlement(self, settlement: Settlement, expected_version: u64) -> Self {
        self.stage(StagedWrite::TransitionSettlement {
            settlement,
            expected_version,
        })
    }

    pub fn put_subscription(self, subscription: Subscription, expected: ExpectedVersion) -> Self {
        self.stage(StagedWrite::PutSubscription {
            subscription,
            expected,
        })
    }

    pub fn link_generated_expense(self, link: GeneratedExpense) -> Self {
        self.stage(StagedWrite::LinkGeneratedExpense(link))
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    pub fn into_writes(self) -> Vec<StagedWrite> {
        self.writes
    }
}
