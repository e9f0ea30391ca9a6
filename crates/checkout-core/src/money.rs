//! # Money Types
//!
//! Amounts are always carried as integers in the smallest currency unit
//! (cents for USD). Rates are basis points so that every computation in the
//! pricing engine stays in integer arithmetic.

use serde::{Deserialize, Serialize};

/// Supported currencies (ISO 4217)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Currency {
    #[default]
    USD,
    EUR,
    GBP,
    EGP,
    JPY,
}

impl Currency {
    /// Returns the ISO 4217 currency code
    pub fn as_str(&self) -> &'static str {
        match self {
            Currency::USD => "usd",
            Currency::EUR => "eur",
            Currency::GBP => "gbp",
            Currency::EGP => "egp",
            Currency::JPY => "jpy",
        }
    }

    /// Upper-case code as most provider APIs expect it
    pub fn code(&self) -> String {
        self.as_str().to_uppercase()
    }

    /// Parse an ISO code, case-insensitive
    pub fn from_code(code: &str) -> Option<Self> {
        match code.to_ascii_lowercase().as_str() {
            "usd" => Some(Currency::USD),
            "eur" => Some(Currency::EUR),
            "gbp" => Some(Currency::GBP),
            "egp" => Some(Currency::EGP),
            "jpy" => Some(Currency::JPY),
            _ => None,
        }
    }

    /// Returns the number of decimal places for this currency
    /// (JPY has 0 decimals, the others have 2)
    pub fn decimal_places(&self) -> u32 {
        match self {
            Currency::JPY => 0,
            _ => 2,
        }
    }

    /// Render a minor-unit amount as a plain decimal string ("52.39")
    pub fn format_minor(&self, amount: i64) -> String {
        let places = self.decimal_places();
        if places == 0 {
            return amount.to_string();
        }
        let divisor = 10_i64.pow(places);
        let sign = if amount < 0 { "-" } else { "" };
        let abs = amount.unsigned_abs();
        format!(
            "{}{}.{:0width$}",
            sign,
            abs / divisor as u64,
            abs % divisor as u64,
            width = places as usize
        )
    }

    /// Parse a decimal string ("52.39", "52.4", "52") into minor units.
    ///
    /// Returns `None` for malformed input or more fractional digits than the
    /// currency carries.
    pub fn parse_minor(&self, value: &str) -> Option<i64> {
        let value = value.trim();
        let (negative, digits) = match value.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, value),
        };
        let (whole, fraction) = match digits.split_once('.') {
            Some((w, f)) => (w, f),
            None => (digits, ""),
        };
        let places = self.decimal_places() as usize;
        if whole.is_empty()
            || fraction.len() > places
            || !whole.bytes().all(|b| b.is_ascii_digit())
            || !fraction.bytes().all(|b| b.is_ascii_digit())
        {
            return None;
        }
        let whole: i64 = whole.parse().ok()?;
        let mut padded = fraction.to_string();
        while padded.len() < places {
            padded.push('0');
        }
        let fraction: i64 = if padded.is_empty() { 0 } else { padded.parse().ok()? };
        let amount = whole
            .checked_mul(10_i64.pow(places as u32))?
            .checked_add(fraction)?;
        Some(if negative { -amount } else { amount })
    }

    fn symbol(&self) -> &'static str {
        match self {
            Currency::USD => "$",
            Currency::EUR => "€",
            Currency::GBP => "£",
            Currency::EGP => "E£",
            Currency::JPY => "¥",
        }
    }
}

impl std::fmt::Display for Currency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Price with amount in smallest currency unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Price {
    /// Amount in smallest currency unit (cents for USD)
    pub amount: i64,
    /// Currency
    pub currency: Currency,
}

impl Price {
    /// Create a price from smallest unit (cents)
    pub fn from_cents(amount: i64, currency: Currency) -> Self {
        Self { amount, currency }
    }

    /// Format for display (e.g., "$10.00")
    pub fn display(&self) -> String {
        format!(
            "{}{}",
            self.currency.symbol(),
            self.currency.format_minor(self.amount)
        )
    }
}

/// A percentage expressed in basis points (`850` = 8.5%)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Rate(u32);

impl Rate {
    pub const ZERO: Rate = Rate(0);

    /// Create from basis points
    pub const fn from_bps(bps: u32) -> Self {
        Rate(bps)
    }

    pub fn bps(&self) -> u32 {
        self.0
    }

    /// Apply the rate to an amount, rounding half away from zero
    pub fn apply(&self, amount: i64) -> i64 {
        let product = i128::from(amount) * i128::from(self.0);
        let quotient = product / 10_000;
        let remainder = product % 10_000;
        let rounded = if remainder.abs() * 2 >= 10_000 {
            quotient + product.signum()
        } else {
            quotient
        };
        rounded as i64
    }
}

impl std::fmt::Display for Rate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{:02}%", self.0 / 100, self.0 % 100)
    }
}
