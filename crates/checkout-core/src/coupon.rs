//! # Coupons
//!
//! Coupon definitions and the coupon book the cart store resolves codes
//! against. Codes are opaque strings and are matched exactly.

use crate::money::Rate;
use serde::{Deserialize, Serialize};

/// How a coupon reduces the order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Discount {
    /// Percentage of the pre-coupon subtotal
    Percentage { rate: Rate },
    /// Flat amount in minor units
    Fixed { amount: i64 },
}

/// A coupon as applied to a cart
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coupon {
    pub code: String,
    pub discount: Discount,
    /// Minimum subtotal (minor units) for the coupon to count; 0 disables
    #[serde(default)]
    pub min_order: i64,
}

impl Coupon {
    pub fn percentage(code: impl Into<String>, rate: Rate) -> Self {
        Self {
            code: code.into(),
            discount: Discount::Percentage { rate },
            min_order: 0,
        }
    }

    pub fn fixed(code: impl Into<String>, amount: i64) -> Self {
        Self {
            code: code.into(),
            discount: Discount::Fixed { amount },
            min_order: 0,
        }
    }

    /// Builder: set the minimum-order threshold
    pub fn with_min_order(mut self, min_order: i64) -> Self {
        self.min_order = min_order;
        self
    }

    /// Discount this coupon contributes for the given pre-coupon subtotal
    pub fn discount_for(&self, subtotal: i64) -> i64 {
        if self.min_order > 0 && subtotal < self.min_order {
            return 0;
        }
        match self.discount {
            Discount::Percentage { rate } => rate.apply(subtotal),
            Discount::Fixed { amount } => amount,
        }
    }
}

/// Known coupon codes (loaded from `config/coupons.toml`)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CouponBook {
    #[serde(default)]
    pub coupons: Vec<Coupon>,
}

impl CouponBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_coupon(mut self, coupon: Coupon) -> Self {
        self.coupons.push(coupon);
        self
    }

    pub fn get(&self, code: &str) -> Option<&Coupon> {
        self.coupons.iter().find(|c| c.code == code)
    }

    pub fn from_toml(toml_str: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(toml_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentage_discount() {
        let coupon = Coupon::percentage("SAVE10", Rate::from_bps(1000));
        assert_eq!(coupon.discount_for(4000), 400);
    }

    #[test]
    fn test_min_order_threshold() {
        let coupon = Coupon::fixed("FIVEOFF", 500).with_min_order(5000);
        assert_eq!(coupon.discount_for(4999), 0);
        assert_eq!(coupon.discount_for(5000), 500);
    }

    #[test]
    fn test_coupon_book_from_toml() {
        let book = CouponBook::from_toml(
            r#"
            [[coupons]]
            code = "SAVE10"
            discount = { type = "percentage", rate = 1000 }

            [[coupons]]
            code = "BIGSPENDER"
            discount = { type = "fixed", amount = 1500 }
            min_order = 10000
            "#,
        )
        .unwrap();

        assert_eq!(
            book.get("SAVE10").unwrap().discount,
            Discount::Percentage {
                rate: Rate::from_bps(1000)
            }
        );
        assert_eq!(book.get("BIGSPENDER").unwrap().min_order, 10000);
        assert!(book.get("save10").is_none());
    }
}
