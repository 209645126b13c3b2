//! Fixed-point money amounts (two fractional digits, exact arithmetic).

use core::ops::{Add, AddAssign, Neg, Sub, SubAssign};
use core::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};

/// A signed amount of money with exactly two fractional digits.
///
/// All ledger arithmetic goes through this type so that sums are exact:
/// there is no floating point anywhere between admission and the zero-sum
/// check. Amounts carrying more than two fractional digits are rejected at
/// construction rather than rounded.
///
/// Serialises as a decimal string (`"20.00"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Money(Decimal);

impl Money {
    /// Number of fractional digits every amount carries.
    pub const SCALE: u32 = 2;

    pub const ZERO: Money = Money(Decimal::from_parts(0, 0, 0, false, Self::SCALE));

    /// Build an amount from a decimal, rejecting sub-cent precision.
    pub fn new(value: Decimal) -> DomainResult<Self> {
        if value.round_dp(Self::SCALE) != value {
            return Err(DomainError::validation(format!(
                "amount {value} has more than {} decimal places",
                Self::SCALE
            )));
        }
        Ok(Self::canonical(value))
    }

    /// Build an amount from a count of minor units (cents).
    pub fn from_cents(cents: i64) -> Self {
        Self::canonical(Decimal::new(cents, Self::SCALE))
    }

    pub fn amount(&self) -> Decimal {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn is_positive(&self) -> bool {
        self.0 > Decimal::ZERO
    }

    pub fn is_negative(&self) -> bool {
        self.0 < Decimal::ZERO
    }

    // Zero is always positive and every value is stored at scale 2, so equal
    // amounts render identically.
    fn canonical(value: Decimal) -> Self {
        let mut value = if value.is_zero() { Decimal::ZERO } else { value };
        value.rescale(Self::SCALE);
        Self(value)
    }
}

impl Default for Money {
    fn default() -> Self {
        Self::ZERO
    }
}

impl core::fmt::Display for Money {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

impl FromStr for Money {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = Decimal::from_str(s.trim())
            .map_err(|e| DomainError::validation(format!("invalid amount '{s}': {e}")))?;
        Self::new(value)
    }
}

impl TryFrom<Decimal> for Money {
    type Error = DomainError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Money> for Decimal {
    fn from(value: Money) -> Self {
        value.0
    }
}

impl Add for Money {
    type Output = Money;

    fn add(self, rhs: Money) -> Money {
        Self::canonical(self.0 + rhs.0)
    }
}

impl Sub for Money {
    type Output = Money;

    fn sub(self, rhs: Money) -> Money {
        Self::canonical(self.0 - rhs.0)
    }
}

impl Neg for Money {
    type Output = Money;

    fn neg(self) -> Money {
        Self::canonical(-self.0)
    }
}

impl AddAssign for Money {
    fn add_assign(&mut self, rhs: Money) {
        *self = *self + rhs;
    }
}

impl SubAssign for Money {
    fn sub_assign(&mut self, rhs: Money) {
        *self = *self - rhs;
    }
}

impl core::iter::Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Money {
        iter.fold(Money::ZERO, Add::add)
    }
}

impl<'a> core::iter::Sum<&'a Money> for Money {
    fn sum<I: Iterator<Item = &'a Money>>(iter: I) -> Money {
        iter.copied().sum()
    }
}
