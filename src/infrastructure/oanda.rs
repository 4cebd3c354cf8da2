use crate::domain::market::{
    Candle, MarketSnapshot, SessionWindow, TimeframeAnalysis, Volatility,
};
use crate::domain::ports::MarketDataProvider;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{RetryTransientMiddleware, policies::ExponentialBackoff};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, warn};

/// Market data adapter over the OANDA v20 candles REST API. Only candle
/// history is consumed; the snapshot is assembled locally from it.
pub struct OandaMarketDataProvider {
    client: ClientWithMiddleware,
    api_base_url: String,
    api_key: String,
    pair: String,
    pip_scale: Decimal,
    /// Instruments whose Daily trend is included as intermarket context.
    intermarket_instruments: Vec<String>,
}

#[derive(Deserialize)]
struct CandlesResponse {
    #[serde(default)]
    candles: Vec<OandaCandle>,
}

#[derive(Deserialize)]
struct OandaCandle {
    time: String,
    #[serde(default)]
    complete: bool,
    mid: Option<OandaMid>,
}

#[derive(Deserialize)]
struct OandaMid {
    o: String,
    h: String,
    l: String,
    c: String,
}

impl OandaMarketDataProvider {
    pub fn new(
        api_base_url: String,
        api_key: String,
        pair: String,
        pip_scale: Decimal,
        intermarket_instruments: Vec<String>,
        timeout_secs: u64,
    ) -> Self {
        // Candle reads are idempotent and a snapshot needs several of them,
        // so retry hard and keep connections pooled across the burst.
        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(3);
        let inner = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .pool_max_idle_per_host(4)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client: ClientBuilder::new(inner)
                .with(RetryTransientMiddleware::new_with_policy(retry_policy))
                .build(),
            api_base_url,
            api_key,
            pair,
            pip_scale,
            intermarket_instruments,
        }
    }

    async fn fetch_candles(
        &self,
        instrument: &str,
        granularity: &str,
        query: &[(&str, String)],
    ) -> Result<Vec<Candle>> {
        let url = format!(
            "{}/v3/instruments/{}/candles",
            self.api_base_url,
            oanda_instrument(instrument)
        );

        let mut params = vec![
            ("granularity", granularity.to_string()),
            ("price", "M".to_string()),
        ];
        params.extend(query.iter().map(|(k, v)| (*k, v.clone())));

        let response = self
            .client
            .get(&url)
            .query(&params)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .context("OANDA candles request failed")?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            anyhow::bail!("OANDA candles HTTP {}: {}", status, detail);
        }

        let parsed: CandlesResponse = response
            .json()
            .await
            .context("Unreadable OANDA candles response")?;

        let mut candles = Vec::with_capacity(parsed.candles.len());
        for raw in parsed.candles {
            if !raw.complete {
                continue;
            }
            let Some(mid) = raw.mid else { continue };
            let open_time = DateTime::parse_from_rfc3339(&raw.time)
                .with_context(|| format!("Bad candle timestamp: {}", raw.time))?
                .with_timezone(&Utc);
            candles.push(Candle {
                open_time,
                open: Decimal::from_str(&mid.o)?,
                high: Decimal::from_str(&mid.h)?,
                low: Decimal::from_str(&mid.l)?,
                close: Decimal::from_str(&mid.c)?,
            });
        }
        debug!(
            "OandaMarketDataProvider: {} {} candles for {}",
            candles.len(),
            granularity,
            instrument
        );
        Ok(candles)
    }

    async fn timeframe_analysis(&self, granularity: &str) -> Result<TimeframeAnalysis> {
        let candles = self
            .fetch_candles(&self.pair, granularity, &[("count", "60".to_string())])
            .await?;
        Ok(analyze_timeframe(&candles))
    }
}

#[async_trait]
impl MarketDataProvider for OandaMarketDataProvider {
    async fn fetch_snapshot(&self, now: DateTime<Utc>) -> Result<MarketSnapshot> {
        let daily = self
            .fetch_candles(&self.pair, "D", &[("count", "30".to_string())])
            .await?;
        let current_price = daily
            .last()
            .map(|c| c.close)
            .context("No daily candles for snapshot")?;

        let mut timeframes = BTreeMap::new();
        timeframes.insert("Daily".to_string(), analyze_timeframe(&daily));
        timeframes.insert("H4".to_string(), self.timeframe_analysis("H4").await?);
        timeframes.insert("H1".to_string(), self.timeframe_analysis("H1").await?);

        let mut intermarket = BTreeMap::new();
        for instrument in &self.intermarket_instruments {
            match self
                .fetch_candles(instrument, "D", &[("count", "30".to_string())])
                .await
            {
                Ok(candles) => {
                    intermarket.insert(instrument.clone(), analyze_timeframe(&candles).trend);
                }
                Err(e) => warn!(
                    "OandaMarketDataProvider: intermarket fetch for {} failed: {:#}",
                    instrument, e
                ),
            }
        }

        Ok(MarketSnapshot {
            pair: self.pair.clone(),
            current_price,
            current_time_utc: now,
            timeframes,
            volatility: Volatility {
                atr_daily_pips: atr_pips(&daily, 14, self.pip_scale),
                extra: BTreeMap::new(),
            },
            // The economic calendar is a separate collaborator; this adapter
            // ships an empty list rather than a partial one.
            economic_events: Vec::new(),
            intermarket,
        })
    }

    async fn fetch_session_ohlc(
        &self,
        date: NaiveDate,
        window: &SessionWindow,
    ) -> Result<Vec<Candle>> {
        let granularity = granularity_for(window.interval_minutes);
        self.fetch_candles(
            &self.pair,
            granularity,
            &[
                ("from", window.start(date).to_rfc3339()),
                ("to", window.end(date).to_rfc3339()),
            ],
        )
        .await
    }
}

/// EURUSD -> EUR_USD; instruments already underscored pass through.
fn oanda_instrument(pair: &str) -> String {
    if pair.contains('_') || pair.len() != 6 {
        return pair.to_string();
    }
    format!("{}_{}", &pair[..3], &pair[3..])
}

fn granularity_for(interval_minutes: u32) -> &'static str {
    match interval_minutes {
        1 => "M1",
        5 => "M5",
        15 => "M15",
        30 => "M30",
        60 => "H1",
        other => {
            warn!("No OANDA granularity for {}m candles, using M5", other);
            "M5"
        }
    }
}

/// Trend by close vs. simple moving average, levels from the recent extremes.
fn analyze_timeframe(candles: &[Candle]) -> TimeframeAnalysis {
    let Some(last) = candles.last() else {
        return TimeframeAnalysis {
            trend: "unknown".to_string(),
            key_support: Vec::new(),
            key_resistance: Vec::new(),
        };
    };

    let lookback = &candles[candles.len().saturating_sub(20)..];
    let sma: Decimal = lookback.iter().map(|c| c.close).sum::<Decimal>()
        / Decimal::from(lookback.len().max(1));

    let trend = if last.close > sma {
        "bullish"
    } else if last.close < sma {
        "bearish"
    } else {
        "flat"
    };

    let mut lows: Vec<Decimal> = lookback.iter().map(|c| c.low).collect();
    lows.sort();
    let mut highs: Vec<Decimal> = lookback.iter().map(|c| c.high).collect();
    highs.sort();

    TimeframeAnalysis {
        trend: trend.to_string(),
        key_support: lows.into_iter().take(2).collect(),
        key_resistance: highs.into_iter().rev().take(2).collect(),
    }
}

/// Average true range over the trailing `period`, in pips.
fn atr_pips(candles: &[Candle], period: usize, pip_scale: Decimal) -> Decimal {
    if candles.len() < 2 {
        return Decimal::ZERO;
    }
    let ranges: Vec<Decimal> = candles
        .windows(2)
        .map(|w| {
            let (prev, cur) = (&w[0], &w[1]);
            (cur.high - cur.low)
                .max((cur.high - prev.close).abs())
                .max((cur.low - prev.close).abs())
        })
        .collect();
    let tail = &ranges[ranges.len().saturating_sub(period)..];
    let sum: Decimal = tail.iter().copied().sum();
    sum / Decimal::from(tail.len().max(1)) * pip_scale
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn candle(i: i64, low: Decimal, high: Decimal, close: Decimal) -> Candle {
        Candle {
            open_time: DateTime::from_timestamp(1_730_000_000 + i * 300, 0).unwrap(),
            open: close,
            high,
            low,
            close,
        }
    }

    #[test]
    fn test_instrument_formatting() {
        assert_eq!(oanda_instrument("EURUSD"), "EUR_USD");
        assert_eq!(oanda_instrument("EUR_USD"), "EUR_USD");
        assert_eq!(oanda_instrument("XAUUSD"), "XAU_USD");
        assert_eq!(oanda_instrument("SPX500"), "SPX_500");
        assert_eq!(oanda_instrument("US30USD"), "US30USD");
    }

    #[test]
    fn test_granularity_mapping() {
        assert_eq!(granularity_for(1), "M1");
        assert_eq!(granularity_for(5), "M5");
        assert_eq!(granularity_for(15), "M15");
        assert_eq!(granularity_for(7), "M5");
    }

    #[test]
    fn test_trend_detection() {
        let rising: Vec<Candle> = (0..30)
            .map(|i| {
                let p = dec!(1.08) + Decimal::from(i) * dec!(0.001);
                candle(i, p - dec!(0.0005), p + dec!(0.0005), p)
            })
            .collect();
        let analysis = analyze_timeframe(&rising);
        assert_eq!(analysis.trend, "bullish");
        assert_eq!(analysis.key_support.len(), 2);
        assert_eq!(analysis.key_resistance.len(), 2);
        assert!(analysis.key_resistance[0] > analysis.key_support[0]);

        assert_eq!(analyze_timeframe(&[]).trend, "unknown");
    }

    #[test]
    fn test_atr_in_pips() {
        // Constant 10-pip candles with no gaps: ATR is exactly 10 pips.
        let flat: Vec<Candle> = (0..20)
            .map(|i| candle(i, dec!(1.0800), dec!(1.0810), dec!(1.0805)))
            .collect();
        assert_eq!(atr_pips(&flat, 14, dec!(10000)), dec!(10));
        assert_eq!(atr_pips(&flat[..1], 14, dec!(10000)), Decimal::ZERO);
    }

    #[test]
    fn test_oanda_candle_parsing() {
        let raw = r#"{
            "candles": [
                {"time": "2025-10-29T07:00:00.000000000Z", "complete": true,
                 "mid": {"o": "1.0843", "h": "1.0855", "l": "1.0842", "c": "1.0850"}},
                {"time": "2025-10-29T07:05:00.000000000Z", "complete": false,
                 "mid": {"o": "1.0850", "h": "1.0852", "l": "1.0848", "c": "1.0851"}}
            ]
        }"#;
        let parsed: CandlesResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.candles.len(), 2);
        assert!(parsed.candles[0].complete);
        assert!(!parsed.candles[1].complete);
        assert_eq!(parsed.candles[0].mid.as_ref().unwrap().h, "1.0855");
    }
}
