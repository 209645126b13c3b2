//! Configuration loading and representation.

use anyhow::{Context, bail};

use splitledger_core::Money;
use splitledger_ledger::AmountPolicy;
use splitledger_ledger::policy::DEFAULT_MAX_AMOUNT_CENTS;
use splitledger_observability::{LogFormat, ObservabilityConfig};

pub const ENV_VERIFY_ON_WRITE: &str = "SPLITLEDGER_VERIFY_ON_WRITE";
pub const ENV_MAX_AMOUNT: &str = "SPLITLEDGER_MAX_AMOUNT";
pub const ENV_LOG: &str = "SPLITLEDGER_LOG";
pub const ENV_LOG_FORMAT: &str = "SPLITLEDGER_LOG_FORMAT";

/// Settings for [`crate::service::LedgerService`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerConfig {
    /// Re-run the balance calculator over the prospective state inside each
    /// money-moving write and abort before commit if it does not sum to zero.
    pub verify_on_write: bool,
    /// Ceiling for any single expense, split or settlement amount.
    pub max_amount: Money,
    pub observability: ObservabilityConfig,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            verify_on_write: true,
            max_amount: Money::from_cents(DEFAULT_MAX_AMOUNT_CENTS),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl LedgerConfig {
    pub fn with_verify_on_write(mut self, verify: bool) -> Self {
        self.verify_on_write = verify;
        self
    }

    pub fn with_max_amount(mut self, max_amount: Money) -> Self {
        self.max_amount = max_amount;
        self
    }

    pub fn with_observability(mut self, observability: ObservabilityConfig) -> Self {
        self.observability = observability;
        self
    }

    pub fn amount_policy(&self) -> AmountPolicy {
        AmountPolicy::new(self.max_amount)
    }

    /// Read the configuration from process environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    ///
    /// Unset keys keep their defaults. The log filter falls back to
    /// `RUST_LOG` when `SPLITLEDGER_LOG` is unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let mut config = Self::default();

        if let Some(raw) = lookup(ENV_VERIFY_ON_WRITE) {
            config.verify_on_write =
                parse_flag(&raw).with_context(|| format!("{ENV_VERIFY_ON_WRITE}={raw}"))?;
        }

        if let Some(raw) = lookup(ENV_MAX_AMOUNT) {
            let max: Money = raw
                .parse()
                .with_context(|| format!("{ENV_MAX_AMOUNT}={raw}"))?;
            if !max.is_positive() {
                bail!("{ENV_MAX_AMOUNT} must be greater than zero (got {raw})");
            }
            config.max_amount = max;
        }

        if let Some(filter) = lookup(ENV_LOG).or_else(|| lookup("RUST_LOG")) {
            config.observability.filter = filter;
        }

        if let Some(raw) = lookup(ENV_LOG_FORMAT) {
            config.observability.format = raw
                .parse::<LogFormat>()
                .with_context(|| format!("{ENV_LOG_FORMAT}={raw}"))?;
        }

        Ok(config)
    }
}

fn parse_flag(raw: &str) -> anyhow::Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => bail!("expected a boolean, got '{other}'"),
    }
}
