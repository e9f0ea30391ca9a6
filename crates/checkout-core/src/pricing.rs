//! # Pricing Engine
//!
//! Turns cart lines, applied coupons and a shipping profile into a
//! [`Totals`] breakdown. Pure integer arithmetic over minor units, no I/O:
//! identical input always yields identical output.
//!
//! ```text
//! subtotal        = Σ price × quantity
//! items_discount  = Σ (original_price − price) × quantity      (informational)
//! coupon_discount = Σ coupon.discount_for(subtotal)             (stacked, uncapped)
//! shipping_cost   = 0 if free shipping else flat_rate
//! estimated_tax   = max(0, (subtotal − coupon_discount) × rate)
//! grand_total     = subtotal − coupon_discount + shipping_cost + estimated_tax
//! ```

use crate::cart::CartLine;
use crate::coupon::Coupon;
use crate::money::Rate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Default free-shipping threshold: $35.00
pub const DEFAULT_FREE_SHIPPING_THRESHOLD: i64 = 3500;

/// Default flat shipping rate: $8.99
pub const DEFAULT_FLAT_SHIPPING_RATE: i64 = 899;

/// Default tax rate when the jurisdiction is unknown: 8.5%
pub const DEFAULT_TAX_RATE: Rate = Rate::from_bps(850);

/// Derived monetary breakdown of a cart. Never edited by hand.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Totals {
    pub subtotal: i64,
    pub items_discount: i64,
    pub coupon_discount: i64,
    pub shipping_cost: i64,
    pub prime_discount: i64,
    pub estimated_tax: i64,
    pub grand_total: i64,
    pub qualifies_for_free_shipping: bool,
    pub has_prime_items: bool,
}

impl Totals {
    /// Stacked coupons can exceed the subtotal; callers surface this for review
    pub fn discount_exceeds_subtotal(&self) -> bool {
        self.coupon_discount > self.subtotal
    }
}

/// Shipping inputs: destination jurisdiction plus the shipping rules in force
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShippingProfile {
    /// State/province code used for tax selection
    #[serde(default)]
    pub jurisdiction: Option<String>,
    pub free_shipping_threshold: i64,
    pub flat_rate: i64,
}

impl Default for ShippingProfile {
    fn default() -> Self {
        Self {
            jurisdiction: None,
            free_shipping_threshold: DEFAULT_FREE_SHIPPING_THRESHOLD,
            flat_rate: DEFAULT_FLAT_SHIPPING_RATE,
        }
    }
}

impl ShippingProfile {
    pub fn with_jurisdiction(mut self, jurisdiction: impl Into<String>) -> Self {
        self.jurisdiction = Some(jurisdiction.into());
        self
    }

    pub fn with_free_shipping_threshold(mut self, threshold: i64) -> Self {
        self.free_shipping_threshold = threshold;
        self
    }
}

/// Jurisdiction → tax rate lookup with a fallback rate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxTable {
    pub default_rate: Rate,
    #[serde(default, deserialize_with = "normalized_rates")]
    pub rates: BTreeMap<String, Rate>,
}

fn jurisdiction_key(jurisdiction: &str) -> String {
    jurisdiction.trim().to_ascii_uppercase()
}

/// Jurisdiction keys are matched case-insensitively, so store them uppercased
fn normalized_rates<'de, D: serde::Deserializer<'de>>(d: D) -> Result<BTreeMap<String, Rate>, D::Error> {
    let raw = BTreeMap::<String, Rate>::deserialize(d)?;
    Ok(raw.into_iter().map(|(k, v)| (jurisdiction_key(&k), v)).collect())
}

impl Default for TaxTable {
    fn default() -> Self {
        Self::empty(DEFAULT_TAX_RATE)
            .with_rate("CA", Rate::from_bps(875))
            .with_rate("NY", Rate::from_bps(800))
            .with_rate("TX", Rate::from_bps(625))
            .with_rate("FL", Rate::from_bps(600))
    }
}

impl TaxTable {
    /// A table with no jurisdictions, only the fallback
    pub fn empty(default_rate: Rate) -> Self {
        Self {
            default_rate,
            rates: BTreeMap::new(),
        }
    }

    pub fn with_rate(mut self, jurisdiction: impl Into<String>, rate: Rate) -> Self {
        self.rates.insert(jurisdiction_key(&jurisdiction.into()), rate);
        self
    }

    /// Rate for a jurisdiction, falling back to the default when unknown
    pub fn rate_for(&self, jurisdiction: Option<&str>) -> Rate {
        jurisdiction
            .and_then(|j| self.rates.get(&jurisdiction_key(j)).copied())
            .unwrap_or(self.default_rate)
    }
}

/// Pricing rules (loaded from `config/pricing.toml`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricingConfig {
    #[serde(default = "default_threshold")]
    pub free_shipping_threshold: i64,
    #[serde(default = "default_flat_rate")]
    pub flat_shipping_rate: i64,
    #[serde(default)]
    pub tax: TaxTable,
}

fn default_threshold() -> i64 {
    DEFAULT_FREE_SHIPPING_THRESHOLD
}

fn default_flat_rate() -> i64 {
    DEFAULT_FLAT_SHIPPING_RATE
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            free_shipping_threshold: DEFAULT_FREE_SHIPPING_THRESHOLD,
            flat_shipping_rate: DEFAULT_FLAT_SHIPPING_RATE,
            tax: TaxTable::default(),
        }
    }
}

impl PricingConfig {
    pub fn from_toml(toml_str: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(toml_str)
    }
}

/// The pricing engine. Holds only configuration; computing totals has no side effects.
#[derive(Debug, Clone, Default)]
pub struct PricingEngine {
    config: PricingConfig,
}

impl PricingEngine {
    pub fn new(config: PricingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PricingConfig {
        &self.config
    }

    /// Shipping profile carrying the configured rules for a destination
    pub fn shipping_profile(&self, jurisdiction: Option<String>) -> ShippingProfile {
        ShippingProfile {
            jurisdiction,
            free_shipping_threshold: self.config.free_shipping_threshold,
            flat_rate: self.config.flat_shipping_rate,
        }
    }

    /// Compute the totals breakdown for a set of lines and coupons
    pub fn compute_totals<'a, I>(
        &self,
        lines: &[CartLine],
        coupons: I,
        profile: &ShippingProfile,
    ) -> Totals
    where
        I: IntoIterator<Item = &'a Coupon>,
    {
        let mut subtotal = 0_i64;
        let mut items_discount = 0_i64;
        let mut has_prime_items = false;
        let mut all_lines_ship_free = true;

        for line in lines {
            let quantity = i64::from(line.quantity);
            subtotal += line.price * quantity;
            items_discount += (line.original_price - line.price) * quantity;
            has_prime_items |= line.is_prime;
            all_lines_ship_free &= line.is_free_shipping;
        }

        let coupon_discount: i64 = coupons
            .into_iter()
            .map(|coupon| coupon.discount_for(subtotal))
            .sum();

        let meets_threshold = subtotal >= profile.free_shipping_threshold;
        let qualifies_for_free_shipping = meets_threshold || has_prime_items || all_lines_ship_free;
        let shipping_cost = if qualifies_for_free_shipping {
            0
        } else {
            profile.flat_rate
        };
        let prime_discount = if has_prime_items && !meets_threshold {
            profile.flat_rate
        } else {
            0
        };

        let rate = self.config.tax.rate_for(profile.jurisdiction.as_deref());
        let estimated_tax = rate.apply(subtotal - coupon_discount).max(0);

        Totals {
            subtotal,
            items_discount,
            coupon_discount,
            shipping_cost,
            prime_discount,
            estimated_tax,
            grand_total: subtotal - coupon_discount + shipping_cost + estimated_tax,
            qualifies_for_free_shipping,
            has_prime_items,
        }
    }
}
