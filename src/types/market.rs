#![allow(missing_docs)]
//! Market data payload types carried by feed updates.
//!
//! Ranked feeds carry [`AssetSnapshot`] lists, asset feeds carry
//! [`PricePoint`] histories. Values are stored exactly as received (quoted in
//! the service's base currency); see [`crate::types::rates`] for conversion.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{FeedError, Result};
use crate::types::feed::{Feed, FeedKind};

// ---------------------------------------------------------------------------
// Asset snapshot
// ---------------------------------------------------------------------------

/// Market snapshot of one asset in a ranked feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetSnapshot {
    pub id: String,
    pub symbol: String,
    pub name: String,
    /// Logo URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    pub current_price: f64,
    pub market_cap: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub market_cap_rank: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fully_diluted_valuation: Option<f64>,
    pub total_volume: f64,
    pub high_24h: f64,
    pub low_24h: f64,
    /// Absolute 24h change.
    pub price_change_24h: f64,
    /// Relative 24h change, in percent.
    pub price_change_percentage_24h: f64,
    pub last_updated: DateTime<Utc>,
}

impl AssetSnapshot {
    /// Copy with every monetary field multiplied by `rate`.
    ///
    /// The percentage change is currency-independent and left untouched.
    pub fn converted(&self, rate: f64) -> Self {
        Self {
            current_price: self.current_price * rate,
            market_cap: self.market_cap * rate,
            fully_diluted_valuation: self.fully_diluted_valuation.map(|v| v * rate),
            total_volume: self.total_volume * rate,
            high_24h: self.high_24h * rate,
            low_24h: self.low_24h * rate,
            price_change_24h: self.price_change_24h * rate,
            ..self.clone()
        }
    }
}

// ---------------------------------------------------------------------------
// Price point
// ---------------------------------------------------------------------------

/// One `(timestamp, price)` sample of an asset's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    /// Asset the sample belongs to (the service repeats it on every point).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Unix timestamp in seconds.
    pub timestamp: i64,
    pub price: f64,
}

impl PricePoint {
    pub fn new(timestamp: i64, price: f64) -> Self {
        Self {
            id: None,
            timestamp,
            price,
        }
    }

    /// Copy with the price multiplied by `rate`.
    pub fn converted(&self, rate: f64) -> Self {
        Self {
            price: self.price * rate,
            ..self.clone()
        }
    }
}

// ---------------------------------------------------------------------------
// Payload
// ---------------------------------------------------------------------------

/// The body of one feed update.
///
/// On the wire a ranked payload is `{"cryptos": [...]}` (a bare array is also
/// accepted) and a history payload is `{"data": [...]}`.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Ranked(Vec<AssetSnapshot>),
    History(Vec<PricePoint>),
}

impl Payload {
    /// The payload's shape.
    pub fn kind(&self) -> FeedKind {
        match self {
            Self::Ranked(_) => FeedKind::Ranked,
            Self::History(_) => FeedKind::History,
        }
    }

    /// Number of entries (assets or samples).
    pub fn len(&self) -> usize {
        match self {
            Self::Ranked(assets) => assets.len(),
            Self::History(points) => points.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The ranked assets, if this is a ranked payload.
    pub fn assets(&self) -> Option<&[AssetSnapshot]> {
        match self {
            Self::Ranked(assets) => Some(assets),
            Self::History(_) => None,
        }
    }

    /// The history samples, if this is a history payload.
    pub fn points(&self) -> Option<&[PricePoint]> {
        match self {
            Self::History(points) => Some(points),
            Self::Ranked(_) => None,
        }
    }

    /// Validate the payload against `feed` and bring it into the feed's
    /// canonical form: ranked lists are cut to the feed capacity and history
    /// samples are ordered by timestamp.
    pub fn normalize_for(self, feed: &Feed) -> Result<Self> {
        if self.kind() != feed.kind() {
            return Err(FeedError::Protocol(format!(
                "{feed} expects a {:?} payload, got {:?}",
                feed.kind(),
                self.kind()
            )));
        }

        Ok(match self {
            Self::Ranked(mut assets) => {
                if let Some(cap) = feed.capacity() {
                    assets.truncate(cap);
                }
                Self::Ranked(assets)
            }
            Self::History(mut points) => {
                points.sort_by_key(|p| p.timestamp);
                Self::History(points)
            }
        })
    }

    /// Copy with all monetary values multiplied by `rate`.
    pub fn converted(&self, rate: f64) -> Self {
        match self {
            Self::Ranked(assets) => Self::Ranked(assets.iter().map(|a| a.converted(rate)).collect()),
            Self::History(points) => {
                Self::History(points.iter().map(|p| p.converted(rate)).collect())
            }
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum WirePayload {
    Ranked { cryptos: Vec<AssetSnapshot> },
    History { data: Vec<PricePoint> },
    RankedList(Vec<AssetSnapshot>),
}

#[derive(Serialize)]
struct RankedRef<'a> {
    cryptos: &'a [AssetSnapshot],
}

#[derive(Serialize)]
struct HistoryRef<'a> {
    data: &'a [PricePoint],
}

impl<'de> Deserialize<'de> for Payload {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        Ok(match WirePayload::deserialize(deserializer)? {
            WirePayload::Ranked { cryptos } | WirePayload::RankedList(cryptos) => {
                Self::Ranked(cryptos)
            }
            WirePayload::History { data } => Self::History(data),
        })
    }
}

impl Serialize for Payload {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Self::Ranked(assets) => RankedRef { cryptos: assets }.serialize(serializer),
            Self::History(points) => HistoryRef { data: points }.serialize(serializer),
        }
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn asset(id: &str, rank: u32, price: f64) -> AssetSnapshot {
        AssetSnapshot {
            id: id.to_owned(),
            symbol: id.chars().take(3).collect(),
            name: id.to_owned(),
            image: None,
            current_price: price,
            market_cap: price * 1_000.0,
            market_cap_rank: Some(rank),
            fully_diluted_valuation: None,
            total_volume: price * 10.0,
            high_24h: price * 1.1,
            low_24h: price * 0.9,
            price_change_24h: price * 0.01,
            price_change_percentage_24h: 1.0,
            last_updated: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
        }
    }

    pub fn ranked(n: usize) -> Payload {
        Payload::Ranked(
            (0..n)
                .map(|i| asset(&format!("coin{i}"), i as u32 + 1, 100.0 - i as f64))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn accepts_all_wire_shapes() {
        let snapshot = serde_json::to_value(asset("bitcoin", 1, 65_000.0)).unwrap();

        let wrapped: Payload =
            serde_json::from_value(serde_json::json!({ "cryptos": [snapshot.clone()] })).unwrap();
        let bare: Payload = serde_json::from_value(serde_json::json!([snapshot])).unwrap();
        assert_eq!(wrapped, bare);
        assert_eq!(wrapped.kind(), FeedKind::Ranked);

        let history: Payload = serde_json::from_value(serde_json::json!({
            "data": [{ "id": "bitcoin", "timestamp": 1_700_000_000, "price": 65_000.5 }]
        }))
        .unwrap();
        assert_eq!(history.points().unwrap()[0].price, 65_000.5);
    }

    #[test]
    fn parses_service_timestamps() {
        let json = r#"{
            "id": "bitcoin", "symbol": "btc", "name": "Bitcoin",
            "image": "https://example.invalid/btc.png",
            "current_price": 65000.0, "market_cap": 1.2e12, "market_cap_rank": 1,
            "fully_diluted_valuation": null, "total_volume": 3.1e10,
            "high_24h": 66000.0, "low_24h": 64000.0,
            "price_change_24h": -120.5, "price_change_percentage_24h": -0.18,
            "last_updated": "2024-05-01T12:00:00.000Z"
        }"#;
        let snapshot: AssetSnapshot = serde_json::from_str(json).unwrap();
        assert_eq!(snapshot.market_cap_rank, Some(1));
        assert_eq!(snapshot.fully_diluted_valuation, None);
        assert_eq!(snapshot.last_updated.timestamp(), 1_714_564_800);
    }

    #[test]
    fn normalize_truncates_and_sorts() {
        let top = ranked(8).normalize_for(&Feed::top()).unwrap();
        assert_eq!(top.len(), 5);

        let history = Payload::History(vec![PricePoint::new(30, 3.0), PricePoint::new(10, 1.0)])
            .normalize_for(&Feed::asset("btc").unwrap())
            .unwrap();
        let stamps: Vec<_> = history.points().unwrap().iter().map(|p| p.timestamp).collect();
        assert_eq!(stamps, vec![10, 30]);
    }

    #[test]
    fn normalize_rejects_kind_mismatch() {
        let err = ranked(2).normalize_for(&Feed::asset("btc").unwrap()).unwrap_err();
        assert!(matches!(err, FeedError::Protocol(_)));
    }

    #[test]
    fn conversion_leaves_percentages_alone() {
        let eur = asset("bitcoin", 1, 100.0).converted(0.5);
        assert_eq!(eur.current_price, 50.0);
        assert!((eur.high_24h - 55.0).abs() < 1e-9);
        assert_eq!(eur.price_change_percentage_24h, 1.0);
    }
}
