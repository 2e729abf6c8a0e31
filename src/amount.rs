//! Non-negative token amounts used for supply, reserves, and
//! liquidity deltas.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::str::FromStr;

/// A non-negative quantity of the bridged token.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(transparent)]
pub struct Amount(Decimal);

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum AmountError {
    #[error("amount cannot be negative: {0}")]
    Negative(Decimal),
    #[error("amount arithmetic overflowed")]
    Overflow,
    #[error("subtraction would produce a negative amount: {minuend} - {subtrahend}")]
    Underflow { minuend: Decimal, subtrahend: Decimal },
    #[error("failed to parse amount: {0}")]
    Parse(String),
}

impl Amount {
    pub const ZERO: Self = Self(Decimal::ZERO);

    pub fn new(value: Decimal) -> Result<Self, AmountError> {
        if value.is_sign_negative() && !value.is_zero() {
            return Err(AmountError::Negative(value));
        }
        Ok(Self(value))
    }

    pub fn value(self) -> Decimal {
        self.0
    }

    pub fn is_zero(self) -> bool {
        self.0.is_zero()
    }

    pub fn is_positive(self) -> bool {
        !self.0.is_zero()
    }

    pub fn checked_add(self, rhs: Self) -> Result<Self, AmountError> {
        self.0
            .checked_add(rhs.0)
            .map(Self)
            .ok_or(AmountError::Overflow)
    }

    /// Fails with `Underflow` rather than going negative.
    pub fn checked_sub(self, rhs: Self) -> Result<Self, AmountError> {
        if rhs.0 > self.0 {
            return Err(AmountError::Underflow {
                minuend: self.0,
                subtrahend: rhs.0,
            });
        }
        Ok(Self(self.0 - rhs.0))
    }

    pub fn min(self, other: Self) -> Self {
        if self.0 <= other.0 { self } else { other }
    }
}

impl From<Amount> for Decimal {
    fn from(value: Amount) -> Self {
        value.0
    }
}

impl FromStr for Amount {
    type Err = AmountError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let decimal =
            Decimal::from_str(value).map_err(|error| AmountError::Parse(error.to_string()))?;
        Self::new(decimal)
    }
}

impl Display for Amount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
