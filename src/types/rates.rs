//! Currency conversion interface.
//!
//! The coordinator stores and forwards raw values quoted in the service's
//! base currency (USD). Rendering code looks up a multiplier through
//! [`RateLookup`] and applies it with the `converted` helpers on the payload
//! types.

use serde::{Deserialize, Serialize};

/// Currency the service quotes every price in.
pub const BASE_CURRENCY: &str = "usd";

/// A multiplier from the base currency to `currency`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeRate {
    pub currency: String,
    pub rate: f64,
}

/// Source of exchange-rate multipliers, implemented by the rate-fetching
/// collaborator.
pub trait RateLookup {
    /// Multiplier for `currency`, or `None` if unknown.
    fn rate(&self, currency: &str) -> Option<f64>;

    /// Multiplier for `currency`, falling back to the identity rate.
    fn rate_or_base(&self, currency: &str) -> f64 {
        self.rate(currency).unwrap_or(1.0)
    }
}

/// An in-memory list of rates, e.g. the response of the rates endpoint.
#[derive(Debug, Clone, Default)]
pub struct RateTable {
    rates: Vec<ExchangeRate>,
}

impl RateTable {
    pub fn new(rates: Vec<ExchangeRate>) -> Self {
        Self { rates }
    }

    pub fn rates(&self) -> &[ExchangeRate] {
        &self.rates
    }
}

impl RateLookup for RateTable {
    fn rate(&self, currency: &str) -> Option<f64> {
        if currency.eq_ignore_ascii_case(BASE_CURRENCY) {
            return Some(
                self.rates
                    .iter()
                    .find(|r| r.currency.eq_ignore_ascii_case(BASE_CURRENCY))
                    .map_or(1.0, |r| r.rate),
            );
        }
        self.rates
            .iter()
            .find(|r| r.currency.eq_ignore_ascii_case(currency))
            .map(|r| r.rate)
    }
}
