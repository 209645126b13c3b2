//! Amount bounds shared by expense admission and settlement requests.

use splitledger_core::{DomainError, DomainResult, Money};

/// Largest amount a `NUMERIC(10,2)` column can hold.
pub const DEFAULT_MAX_AMOUNT_CENTS: i64 = 99_999_999_99;

/// Upper bound every admitted amount must respect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AmountPolicy {
    max_amount: Money,
}

impl AmountPolicy {
    pub fn new(max_amount: Money) -> Self {
        Self { max_amount }
    }

    pub fn max_amount(&self) -> Money {
        self.max_amount
    }

    /// Reject `amount` when it exceeds the configured maximum.
    pub fn check_ceiling(&self, label: &str, amount: Money) -> DomainResult<()> {
        if amount > self.max_amount {
            return Err(DomainError::validation(format!(
                "{label} {amount} exceeds the maximum of {}",
                self.max_amount
            )));
        }
        Ok(())
    }
}

impl Default for AmountPolicy {
    fn default() -> Self {
        Self::new(Money::from_cents(DEFAULT_MAX_AMOUNT_CENTS))
    }
}
