use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use splitledger_core::{
    Aggregate, AggregateRoot, DomainError, DomainResult, GroupId, MemberId, Money, SettlementId,
};
use splitledger_events::Event;

use crate::group::Group;
use crate::policy::AmountPolicy;

/// Settlement status lifecycle: `pending` → `confirmed` | `rejected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettlementStatus {
    Pending,
    Confirmed,
    Rejected,
}

impl SettlementStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SettlementStatus::Pending => "pending",
            SettlementStatus::Confirmed => "confirmed",
            SettlementStatus::Rejected => "rejected",
        }
    }

    /// No transition leaves a terminal status.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SettlementStatus::Pending)
    }
}

impl core::fmt::Display for SettlementStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregate root: Settlement.
///
/// A debtor's claim to have repaid a creditor. It only affects balances and
/// obligations once the creditor confirms it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settlement {
    id: SettlementId,
    group_id: GroupId,
    from_member: MemberId,
    to_member: MemberId,
    amount: Money,
    status: SettlementStatus,
    created_at: Option<DateTime<Utc>>,
    resolved_at: Option<DateTime<Utc>>,
    version: u64,
    created: bool,
}

impl Settlement {
    /// Create an empty, not-yet-requested aggregate instance for rehydration.
    pub fn empty(id: SettlementId) -> Self {
        Self {
            id,
            group_id: GroupId::from_uuid(uuid::Uuid::nil()),
            from_member: MemberId::from_uuid(uuid::Uuid::nil()),
            to_member: MemberId::from_uuid(uuid::Uuid::nil()),
            amount: Money::ZERO,
            status: SettlementStatus::Pending,
            created_at: None,
            resolved_at: None,
            version: 0,
            created: false,
        }
    }

    /// Rebuild a settlement from stored parts without re-validating it.
    #[allow(clippy::too_many_arguments)]
    pub fn restore(
        id: SettlementId,
        group_id: GroupId,
        from_member: MemberId,
        to_member: MemberId,
        amount: Money,
        status: SettlementStatus,
        created_at: DateTime<Utc>,
        resolved_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            id,
            group_id,
            from_member,
            to_member,
            amount,
            status,
            created_at: Some(created_at),
            resolved_at,
            version: if status.is_terminal() { 2 } else { 1 },
            created: true,
        }
    }

    pub fn id_typed(&self) -> SettlementId {
        self.id
    }

    pub fn group_id(&self) -> GroupId {
        self.group_id
    }

    pub fn from_member(&self) -> MemberId {
        self.from_member
    }

    pub fn to_member(&self) -> MemberId {
        self.to_member
    }

    pub fn amount(&self) -> Money {
        self.amount
    }

    pub fn status(&self) -> SettlementStatus {
        self.status
    }

    pub fn is_confirmed(&self) -> bool {
        self.status == SettlementStatus::Confirmed
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn resolved_at(&self) -> Option<DateTime<Utc>> {
        self.resolved_at
    }

    /// Confirm as `actor`, returning the evolved settlement and its events.
    pub fn confirm(
        &self,
        actor: MemberId,
        at: DateTime<Utc>,
    ) -> DomainResult<(Settlement, Vec<SettlementEvent>)> {
        self.execute(&SettlementCommand::Confirm(ResolveSettlement {
            settlement_id: self.id,
            actor,
            occurred_at: at,
        }))
    }

    /// Reject as `actor`, returning the evolved settlement and its events.
    pub fn reject(
        &self,
        actor: MemberId,
        at: DateTime<Utc>,
    ) -> DomainResult<(Settlement, Vec<SettlementEvent>)> {
        self.execute(&SettlementCommand::Reject(ResolveSettlement {
            settlement_id: self.id,
            actor,
            occurred_at: at,
        }))
    }
}

impl AggregateRoot for Settlement {
    type Id = SettlementId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: RequestSettlement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestSettlement {
    pub group_id: GroupId,
    pub settlement_id: SettlementId,
    pub from_member: MemberId,
    pub to_member: MemberId,
    pub amount: Money,
    pub occurred_at: DateTime<Utc>,
}

/// Command payload shared by confirm and reject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolveSettlement {
    pub settlement_id: SettlementId,
    pub actor: MemberId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SettlementCommand {
    Request(RequestSettlement),
    Confirm(ResolveSettlement),
    Reject(ResolveSettlement),
}

/// Event: SettlementRequested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementRequested {
    pub group_id: GroupId,
    pub settlement_id: SettlementId,
    pub from_member: MemberId,
    pub to_member: MemberId,
    pub amount: Money,
    pub occurred_at: DateTime<Utc>,
}

/// Event: SettlementConfirmed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementConfirmed {
    pub group_id: GroupId,
    pub settlement_id: SettlementId,
    pub confirmed_by: MemberId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: SettlementRejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementRejected {
    pub group_id: GroupId,
    pub settlement_id: SettlementId,
    pub rejected_by: MemberId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SettlementEvent {
    SettlementRequested(SettlementRequested),
    SettlementConfirmed(SettlementConfirmed),
    SettlementRejected(SettlementRejected),
}

impl Event for SettlementEvent {
    fn event_type(&self) -> &'static str {
        match self {
            SettlementEvent::SettlementRequested(_) => "ledger.settlement.requested",
            SettlementEvent::SettlementConfirmed(_) => "ledger.settlement.confirmed",
            SettlementEvent::SettlementRejected(_) => "ledger.settlement.rejected",
        }
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            SettlementEvent::SettlementRequested(e) => e.occurred_at,
            SettlementEvent::SettlementConfirmed(e) => e.occurred_at,
            SettlementEvent::SettlementRejected(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Settlement {
    type Command = SettlementCommand;
    type Event = SettlementEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            SettlementEvent::SettlementRequested(e) => {
                self.id = e.settlement_id;
                self.group_id = e.group_id;
                self.from_member = e.from_member;
                self.to_member = e.to_member;
                self.amount = e.amount;
                self.status = SettlementStatus::Pending;
                self.created_at = Some(e.occurred_at);
                self.created = true;
            }
            SettlementEvent::SettlementConfirmed(e) => {
                self.status = SettlementStatus::Confirmed;
                self.resolved_at = Some(e.occurred_at);
            }
            SettlementEvent::SettlementRejected(e) => {
                self.status = SettlementStatus::Rejected;
                self.resolved_at = Some(e.occurred_at);
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            SettlementCommand::Request(cmd) => self.handle_request(cmd),
            SettlementCommand::Confirm(cmd) => {
                self.ensure_resolvable(cmd, "confirm")?;
                Ok(vec![SettlementEvent::SettlementConfirmed(SettlementConfirmed {
                    group_id: self.group_id,
                    settlement_id: self.id,
                    confirmed_by: cmd.actor,
                    occurred_at: cmd.occurred_at,
                })])
            }
            SettlementCommand::Reject(cmd) => {
                self.ensure_resolvable(cmd, "reject")?;
                Ok(vec![SettlementEvent::SettlementRejected(SettlementRejected {
                    group_id: self.group_id,
                    settlement_id: self.id,
                    rejected_by: cmd.actor,
                    occurred_at: cmd.occurred_at,
                })])
            }
        }
    }
}

impl Settlement {
    fn handle_request(&self, cmd: &RequestSettlement) -> Result<Vec<SettlementEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("settlement already exists"));
        }
        if !cmd.amount.is_positive() {
            return Err(DomainError::validation(
                "settlement amount must be greater than zero",
            ));
        }
        if cmd.from_member == cmd.to_member {
            return Err(DomainError::validation(
                "cannot create a settlement request to yourself",
            ));
        }

        Ok(vec![SettlementEvent::SettlementRequested(SettlementRequested {
            group_id: cmd.group_id,
            settlement_id: cmd.settlement_id,
            from_member: cmd.from_member,
            to_member: cmd.to_member,
            amount: cmd.amount,
            occurred_at: cmd.occurred_at,
        })])
    }

    // Existence, then status, then the actor: a stale confirm by the wrong
    // member still reports the transition problem first.
    fn ensure_resolvable(&self, cmd: &ResolveSettlement, verb: &str) -> Result<(), DomainError> {
        if !self.created || self.id != cmd.settlement_id {
            return Err(DomainError::not_found(format!(
                "settlement {}",
                cmd.settlement_id
            )));
        }
        if self.status != SettlementStatus::Pending {
            return Err(DomainError::invalid_transition(format!(
                "only pending settlements can be {verb}ed; settlement {} is {}",
                self.id, self.status
            )));
        }
        if cmd.actor != self.to_member {
            return Err(DomainError::unauthorized(format!(
                "only the member who is owed money can {verb} settlement {}",
                self.id
            )));
        }
        Ok(())
    }
}

/// Open a settlement request between two members of `group`.
///
/// Both parties must belong to the group; the amount must be positive and
/// within `policy`; a member cannot settle with themself.
pub fn request_settlement(
    group: &Group,
    policy: &AmountPolicy,
    cmd: RequestSettlement,
) -> DomainResult<(Settlement, Vec<SettlementEvent>)> {
    if !group.is_created() || group.id_typed() != cmd.group_id {
        return Err(DomainError::not_found(format!("group {}", cmd.group_id)));
    }
    if !group.is_member(cmd.from_member) || !group.is_member(cmd.to_member) {
        return Err(DomainError::validation(
            "both members must belong to the group to create a settlement request",
        ));
    }

    let (settlement, events) =
        Settlement::empty(cmd.settlement_id).execute(&SettlementCommand::Request(cmd))?;
    policy.check_ceiling("settlement amount", settlement.amount())?;

    Ok((settlement, events))
}
