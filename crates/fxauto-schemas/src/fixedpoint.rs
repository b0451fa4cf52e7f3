//! Fixed-point price and pip types.
//!
//! All price quantities in this system use a 1e-6 fixed-point representation
//! stored as `i64` so that decision code never touches float rounding. Pips
//! are a distinct newtype so a price difference and a pip count can never be
//! confused with each other by the type system.

use serde::{Deserialize, Serialize};
use std::ops::{Add, Sub};

/// A price in 1e-6 units of the quote currency (e.g. JPY). `PriceMicros::new(15060_000_000)`
/// represents 150.60.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PriceMicros(i64);

impl PriceMicros {
    pub const ZERO: PriceMicros = PriceMicros(0);

    #[inline]
    pub const fn new(raw: i64) -> Self {
        PriceMicros(raw)
    }

    /// Construct from a decimal price (e.g. `150.60`). Lossy beyond 1e-6.
    pub fn from_f64(price: f64) -> Self {
        PriceMicros((price * 1_000_000.0).round() as i64)
    }

    #[inline]
    pub const fn raw(self) -> i64 {
        self.0
    }

    pub fn to_f64(self) -> f64 {
        self.0 as f64 / 1_000_000.0
    }

    /// Distance to `other` expressed in pips, given `pip_scale` (100 for JPY crosses).
    pub fn pips_to(self, other: PriceMicros, pip_scale: i64) -> Pips {
        let diff_units = other.0 - self.0;
        // 1 unit of quote currency = 1_000_000 micros; 1 pip = 1/pip_scale units.
        Pips((diff_units * pip_scale) / 1_000_000)
    }

    pub fn mid(bid: PriceMicros, ask: PriceMicros) -> PriceMicros {
        PriceMicros((bid.0 + ask.0) / 2)
    }
}

impl Add for PriceMicros {
    type Output = PriceMicros;
    fn add(self, rhs: PriceMicros) -> PriceMicros {
        PriceMicros(self.0 + rhs.0)
    }
}

impl Sub for PriceMicros {
    type Output = PriceMicros;
    fn sub(self, rhs: PriceMicros) -> PriceMicros {
        PriceMicros(self.0 - rhs.0)
    }
}

impl std::fmt::Display for PriceMicros {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.6}", self.to_f64())
    }
}

/// A signed pip count. Positive is favourable movement relative to whatever
/// direction the caller is measuring against.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Pips(i64);

impl Pips {
    pub const ZERO: Pips = Pips(0);

    #[inline]
    pub const fn new(v: i64) -> Self {
        Pips(v)
    }

    #[inline]
    pub const fn raw(self) -> i64 {
        self.0
    }

    pub fn abs(self) -> Pips {
        Pips(self.0.abs())
    }

    /// Convert a pip distance back to a price delta (micros) at the given scale.
    pub fn to_price_delta(self, pip_scale: i64) -> PriceMicros {
        PriceMicros((self.0 * 1_000_000) / pip_scale)
    }
}

impl Add for Pips {
    type Output = Pips;
    fn add(self, rhs: Pips) -> Pips {
        Pips(self.0 + rhs.0)
    }
}

impl Sub for Pips {
    type Output = Pips;
    fn sub(self, rhs: Pips) -> Pips {
        Pips(self.0 - rhs.0)
    }
}
