//! Settlements that still need a member's attention.

use serde::Serialize;

use splitledger_core::MemberId;

use crate::settlement::{Settlement, SettlementStatus};

/// A member's open settlement items across every group they belong to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UnconfirmedSettlements {
    /// Requests addressed to the member that they have not resolved yet.
    pub pending_received: Vec<Settlement>,
    /// Requests the member sent that the creditor turned down.
    pub rejected_sent: Vec<Settlement>,
}

/// Filter `settlements` down to what `member` has to act on.
pub fn unconfirmed_settlements(member: MemberId, settlements: &[Settlement]) -> UnconfirmedSettlements {
    let pending_received = settlements
        .iter()
        .filter(|s| s.to_member() == member && s.status() == SettlementStatus::Pending)
        .cloned()
        .collect();

    let rejected_sent = settlements
        .iter()
        .filter(|s| s.from_member() == member && s.status() == SettlementStatus::Rejected)
        .cloned()
        .collect();

    UnconfirmedSettlements {
        pending_received,
        rejected_sent,
    }
}
