//! Precision-safe decimal types for trading.
//!
//! Uses `rust_decimal` for exact decimal arithmetic. All prices and
//! quantities are normalized to 4 fractional digits on construction;
//! floating point is never used on the money path, so P&L and stop
//! calculations cannot accumulate rounding drift.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Div, Mul, Sub};
use std::str::FromStr;

/// Fractional digits carried by every price and quantity.
pub const PRICE_SCALE: u32 = 4;

/// Price with exact decimal precision, normalized to 4 dp.
///
/// On binary prediction markets a price is a probability in `[0, 1]`;
/// the bound itself is enforced by the risk gate, not the type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Price(Decimal);

impl Price {
    pub const ZERO: Self = Self(Decimal::ZERO);
    pub const ONE: Self = Self(Decimal::ONE);

    #[inline]
    pub fn new(value: Decimal) -> Self {
        Self(value.round_dp(PRICE_SCALE))
    }

    #[inline]
    pub fn inner(&self) -> Decimal {
        self.0
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    #[inline]
    pub fn is_positive(&self) -> bool {
        self.0.is_sign_positive() && !self.0.is_zero()
    }

    /// Check the probability bound `0 <= p <= 1`.
    #[inline]
    pub fn is_probability(&self) -> bool {
        self.0 >= Decimal::ZERO && self.0 <= Decimal::ONE
    }

    /// Complement price `1 - p`: the price of the opposite outcome.
    #[inline]
    pub fn complement(&self) -> Self {
        Self(Decimal::ONE - self.0)
    }

    /// Clamp into the probability bound `[0, 1]`.
    #[inline]
    pub fn clamp_probability(&self) -> Self {
        Self(self.0.clamp(Decimal::ZERO, Decimal::ONE))
    }

    /// Percentage difference from another price.
    #[inline]
    pub fn pct_from(&self, other: Price) -> Option<Decimal> {
        if other.is_zero() {
            return None;
        }
        Some((self.0 - other.0) / other.0 * Decimal::from(100))
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Price {
    type Err = crate::CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::new(s.parse::<Decimal>()?))
    }
}

impl From<Decimal> for Price {
    fn from(d: Decimal) -> Self {
        Self::new(d)
    }
}

impl Add for Price {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl Sub for Price {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0 - rhs.0)
    }
}

impl Mul<Decimal> for Price {
    type Output = Self;

    fn mul(self, rhs: Decimal) -> Self::Output {
        Self::new(self.0 * rhs)
    }
}

impl Div<Decimal> for Price {
    type Output = Self;

    fn div(self, rhs: Decimal) -> Self::Output {
        Self::new(self.0 / rhs)
    }
}

/// Quantity (number of contracts) with exact decimal precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Qty(Decimal);

impl Qty {
    pub const ZERO: Self = Self(Decimal::ZERO);
    pub const ONE: Self = Self(Decimal::ONE);

    #[inline]
    pub fn new(value: Decimal) -> Self {
        Self(value.round_dp(PRICE_SCALE))
    }

    #[inline]
    pub fn inner(&self) -> Decimal {
        self.0
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    #[inline]
    pub fn is_positive(&self) -> bool {
        self.0.is_sign_positive() && !self.0.is_zero()
    }

    /// Notional value: qty * price.
    #[inline]
    pub fn notional(&self, price: Price) -> Decimal {
        self.0 * price.inner()
    }

    /// Saturating subtraction, floored at zero.
    #[inline]
    pub fn saturating_sub(&self, rhs: Qty) -> Self {
        let diff = self.0 - rhs.0;
        if diff.is_sign_negative() {
            Self::ZERO
        } else {
            Self(diff)
        }
    }
}

impl fmt::Display for Qty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Qty {
    type Err = crate::CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::new(s.parse::<Decimal>()?))
    }
}

impl From<Decimal> for Qty {
    fn from(d: Decimal) -> Self {
        Self::new(d)
    }
}

impl Add for Qty {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl Sub for Qty {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0 - rhs.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_price_normalized_to_scale() {
        let p = Price::new(dec!(0.123456));
        assert_eq!(p.inner(), dec!(0.1235));
    }

    #[test]
    fn test_price_complement() {
        let p = Price::new(dec!(0.35));
        assert_eq!(p.complement().inner(), dec!(0.65));
    }

    #[test]
    fn test_price_probability_bound() {
        assert!(Price::new(dec!(0.5)).is_probability());
        assert!(Price::new(dec!(1)).is_probability());
        assert!(!Price::new(dec!(1.01)).is_probability());
        assert!(!Price::new(dec!(-0.01)).is_probability());
    }

    #[test]
    fn test_price_pct_from() {
        let entry = Price::new(dec!(0.50));
        let mark = Price::new(dec!(0.55));
        assert_eq!(mark.pct_from(entry).unwrap(), dec!(10));
        assert!(mark.pct_from(Price::ZERO).is_none());
    }

    #[test]
    fn test_qty_notional() {
        let qty = Qty::new(dec!(100));
        let price = Price::new(dec!(0.42));
        assert_eq!(qty.notional(price), dec!(42));
    }

    #[test]
    fn test_qty_saturating_sub() {
        let a = Qty::new(dec!(3));
        let b = Qty::new(dec!(5));
        assert_eq!(a.saturating_sub(b), Qty::ZERO);
        assert_eq!(b.saturating_sub(a), Qty::new(dec!(2)));
    }
}
