use chrono::{DateTime, Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One OHLC candle. Candles in a session are equal-duration and ordered by
/// `open_time`; the replay logic is interval-agnostic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
}

impl Candle {
    /// Whether the candle's `[low, high]` range contains `price`.
    pub fn contains(&self, price: Decimal) -> bool {
        self.low <= price && price <= self.high
    }
}

/// The replayed session: a fixed window starting at the configured open hour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionWindow {
    pub open_hour_utc: u32,
    pub hours: u32,
    pub interval_minutes: u32,
}

impl SessionWindow {
    pub fn start(&self, date: NaiveDate) -> DateTime<Utc> {
        date.and_hms_opt(self.open_hour_utc, 0, 0)
            .expect("session open hour out of range")
            .and_utc()
    }

    pub fn end(&self, date: NaiveDate) -> DateTime<Utc> {
        self.start(date) + Duration::hours(i64::from(self.hours))
    }

    pub fn candles_per_session(&self) -> u32 {
        self.hours * 60 / self.interval_minutes.max(1)
    }
}

impl Default for SessionWindow {
    fn default() -> Self {
        Self {
            open_hour_utc: 7,
            hours: 8,
            interval_minutes: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeframeAnalysis {
    pub trend: String,
    pub key_support: Vec<Decimal>,
    pub key_resistance: Vec<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Volatility {
    pub atr_daily_pips: Decimal,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EconomicEvent {
    pub time_utc: DateTime<Utc>,
    pub name: String,
    pub impact: String,
}

/// Structured market context handed to the generator. The rest of the
/// pipeline treats this as opaque data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub pair: String,
    pub current_price: Decimal,
    pub current_time_utc: DateTime<Utc>,
    pub timeframes: BTreeMap<String, TimeframeAnalysis>,
    pub volatility: Volatility,
    pub economic_events: Vec<EconomicEvent>,
    pub intermarket: BTreeMap<String, String>,
}
