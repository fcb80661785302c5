//! Precision-safe decimal types for market data.
//!
//! The DLOB server sends prices and amounts as integers scaled by a fixed
//! precision (e.g. `100000000` with price precision 1e6 is `100`). These types
//! hold the unscaled value as an exact `Decimal`.

use crate::error::{CoreError, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::ops::{Add, Div, Mul, Sub};
use std::str::FromStr;

/// Scale of price fields on the wire.
pub const PRICE_PRECISION: u64 = 1_000_000;
/// Scale of base asset amounts on the wire.
pub const BASE_PRECISION: u64 = 1_000_000_000;
/// Scale of quote asset amounts and fees on the wire.
pub const QUOTE_PRECISION: u64 = 1_000_000;

/// Price with exact decimal precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Price(pub Decimal);

impl Price {
    pub const ZERO: Self = Self(Decimal::ZERO);

    #[inline]
    pub fn new(value: Decimal) -> Self {
        Self(value)
    }

    /// Unscale a raw wire value by `precision`.
    pub fn from_scaled(raw: Decimal, precision: u64) -> Result<Self> {
        unscale(raw, precision)
            .map(Self)
            .ok_or_else(|| CoreError::InvalidPrice(format!("{raw} / {precision}")))
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

    /// Midpoint between two prices.
    #[inline]
    pub fn midpoint(&self, other: Price) -> Self {
        Self((self.0 + other.0) / Decimal::TWO)
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.normalize())
    }
}

impl FromStr for Price {
    type Err = rust_decimal::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

impl From<Decimal> for Price {
    fn from(d: Decimal) -> Self {
        Self(d)
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
        Self(self.0 * rhs)
    }
}

impl Div<Decimal> for Price {
    type Output = Self;

    fn div(self, rhs: Decimal) -> Self::Output {
        Self(self.0 / rhs)
    }
}

/// Size/quantity with exact decimal precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Size(pub Decimal);

impl Size {
    pub const ZERO: Self = Self(Decimal::ZERO);

    #[inline]
    pub fn new(value: Decimal) -> Self {
        Self(value)
    }

    /// Unscale a raw wire value by `precision`.
    pub fn from_scaled(raw: Decimal, precision: u64) -> Result<Self> {
        unscale(raw, precision)
            .map(Self)
            .ok_or_else(|| CoreError::InvalidSize(format!("{raw} / {precision}")))
    }

    #[inline]
    pub fn inner(&self) -> Decimal {
        self.0
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Calculate notional value: size * price.
    #[inline]
    pub fn notional(&self, price: Price) -> Decimal {
        self.0 * price.0
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.normalize())
    }
}

impl FromStr for Size {
    type Err = rust_decimal::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

impl From<Decimal> for Size {
    fn from(d: Decimal) -> Self {
        Self(d)
    }
}

impl Add for Size {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl Sub for Size {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0 - rhs.0)
    }
}

fn unscale(raw: Decimal, precision: u64) -> Option<Decimal> {
    if precision == 0 {
        return None;
    }
    raw.checked_div(Decimal::from(precision))
}

/// A number that may arrive on the wire as a JSON string or a JSON number.
///
/// The server is inconsistent here: BN-backed fields come as strings, plain
/// counters as numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WireDecimal(pub Decimal);

impl WireDecimal {
    #[inline]
    pub fn inner(&self) -> Decimal {
        self.0
    }

    /// Interpret the value as a non-negative integer (slots, indices).
    pub fn to_u64(&self) -> Option<u64> {
        use rust_decimal::prelude::ToPrimitive;
        if self.0.fract().is_zero() {
            self.0.to_u64()
        } else {
            None
        }
    }

    pub fn to_i64(&self) -> Option<i64> {
        use rust_decimal::prelude::ToPrimitive;
        self.0.trunc().to_i64()
    }
}

impl<'de> Deserialize<'de> for WireDecimal {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Str(String),
            Int(i64),
            UInt(u64),
            Float(f64),
        }

        let value = match Raw::deserialize(deserializer)? {
            Raw::Str(s) => Decimal::from_str(s.trim()).map_err(serde::de::Error::custom)?,
            Raw::Int(i) => Decimal::from(i),
            Raw::UInt(u) => Decimal::from(u),
            Raw::Float(f) => Decimal::try_from(f).map_err(serde::de::Error::custom)?,
        };
        Ok(Self(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_price_from_scaled() {
        let price = Price::from_scaled(dec!(100000000), PRICE_PRECISION).unwrap();
        assert_eq!(price.inner(), dec!(100));
        assert_eq!(price.to_string(), "100");
    }

    #[test]
    fn test_price_from_scaled_zero_precision() {
        assert!(Price::from_scaled(dec!(1), 0).is_err());
    }

    #[test]
    fn test_price_midpoint() {
        let mid = Price::new(dec!(100)).midpoint(Price::new(dec!(101)));
        assert_eq!(mid.inner(), dec!(100.5));
    }

    #[test]
    fn test_size_from_scaled() {
        let size = Size::from_scaled(dec!(2500000000), BASE_PRECISION).unwrap();
        assert_eq!(size.inner(), dec!(2.5));
        assert_eq!(size.notional(Price::new(dec!(100))), dec!(250));
    }

    #[test]
    fn test_wire_decimal_accepts_strings_and_numbers() {
        let values: Vec<WireDecimal> =
            serde_json::from_str(r#"["101000000", 42, -7, 1.5]"#).unwrap();
        assert_eq!(values[0].inner(), dec!(101000000));
        assert_eq!(values[1].to_u64(), Some(42));
        assert_eq!(values[2].to_i64(), Some(-7));
        assert_eq!(values[3].to_u64(), None);
    }

    #[test]
    fn test_wire_decimal_rejects_garbage() {
        assert!(serde_json::from_str::<WireDecimal>(r#""abc""#).is_err());
        assert!(serde_json::from_str::<WireDecimal>("true").is_err());
    }
}
