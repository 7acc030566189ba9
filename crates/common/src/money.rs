use std::fmt;
use std::iter::Sum;
use std::ops::Add;

use serde::{Deserialize, Serialize};

/// A price or charge in integer cents.
///
/// Serialized as the bare number of cents, which is how the seed files and
/// purchase results carry prices.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Money(i64);

impl Money {
    pub fn from_cents(cents: i64) -> Self {
        Self(cents)
    }

    pub fn zero() -> Self {
        Self(0)
    }

    pub fn cents(&self) -> i64 {
        self.0
    }

    /// Price of `quantity` units at this unit price.
    pub fn multiply(&self, quantity: u32) -> Money {
        Money(self.0 * i64::from(quantity))
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{sign}${}.{:02}", abs / 100, abs % 100)
    }
}

impl Add for Money {
    type Output = Money;

    fn add(self, rhs: Self) -> Self::Output {
        Money(self.0 + rhs.0)
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self {
        iter.fold(Money::zero(), Add::add)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_formats_dollars_and_cents() {
        assert_eq!(Money::from_cents(129_999).to_string(), "$1299.99");
        assert_eq!(Money::from_cents(-250).to_string(), "-$2.50");
        assert_eq!(Money::zero().to_string(), "$0.00");
    }

    #[test]
    fn line_totals() {
        assert_eq!(Money::from_cents(1500).multiply(3), Money::from_cents(4500));
        let total: Money = [Money::from_cents(200), Money::from_cents(5)]
            .into_iter()
            .sum();
        assert_eq!(total.cents(), 205);
    }

    #[test]
    fn serializes_as_bare_cents() {
        let json = serde_json::to_string(&Money::from_cents(999)).unwrap();
        assert_eq!(json, "999");
        let back: Money = serde_json::from_str("79900").unwrap();
        assert_eq!(back, Money::from_cents(79_900));
    }
}
