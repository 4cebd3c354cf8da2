use crate::domain::errors::LlmError;
use crate::domain::market::{
    Candle, MarketSnapshot, SessionWindow, TimeframeAnalysis, Volatility,
};
use crate::domain::ports::{
    BundleHandle, GenerationConfig, LlmClient, LlmResponse, MarketDataProvider, Notifier,
    StateBundleStore,
};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::info;

// ===== LLM =====

/// Scripted LLM for tests and mock-mode demo runs. Queued responses are
/// served in order; once the queue is empty the canned fallback text (when
/// configured) is returned, otherwise a transport error.
pub struct MockLlmClient {
    responses: Mutex<VecDeque<Result<LlmResponse, LlmError>>>,
    fallback_text: Option<String>,
    calls: Mutex<Vec<String>>,
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            fallback_text: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Demo-mode client: always answers with a plausible bullish plan around
    /// `base_price`. The same JSON doubles as a (no-op) reflection response.
    pub fn with_canned_plan(base_price: Decimal) -> Self {
        let zone_low = base_price - Decimal::new(5, 4);
        let zone_high = base_price + Decimal::new(5, 4);
        let text = format!(
            r#"{{
  "date": "1970-01-01",
  "bias": "bullish",
  "entry_zone": [{}, {}],
  "stop_loss": {},
  "take_profit_1": {},
  "take_profit_2": null,
  "position_size_pct": 1.0,
  "risk_reward": "1:2",
  "rationale": "Canned mock plan for demo runs.",
  "playbook_entries_used": [],
  "confidence": "medium",
  "insights": [],
  "market_regime_notes": "mock"
}}"#,
            zone_low,
            zone_high,
            base_price - Decimal::new(25, 4),
            base_price + Decimal::new(55, 4),
        );
        Self {
            responses: Mutex::new(VecDeque::new()),
            fallback_text: Some(text),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn push_response(&self, response: LlmResponse) {
        self.responses.lock().unwrap().push_back(Ok(response));
    }

    pub fn push_error(&self, error: LlmError) {
        self.responses.lock().unwrap().push_back(Err(error));
    }

    /// User prompts seen so far, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl Default for MockLlmClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn generate(
        &self,
        _system_prompt: &str,
        user_prompt: &str,
        _config: &GenerationConfig,
    ) -> Result<LlmResponse, LlmError> {
        self.calls.lock().unwrap().push(user_prompt.to_string());
        if let Some(scripted) = self.responses.lock().unwrap().pop_front() {
            return scripted;
        }
        match &self.fallback_text {
            Some(text) => Ok(LlmResponse::completed(text.clone(), "STOP")),
            None => Err(LlmError::Transport {
                reason: "mock queue exhausted".to_string(),
            }),
        }
    }
}

// ===== Market data =====

/// Deterministic synthetic market data: a seeded random walk around
/// `base_price`, so mock-mode runs replay identically for a given date.
pub struct MockMarketDataProvider {
    pair: String,
    base_price: Decimal,
}

impl MockMarketDataProvider {
    pub fn new(pair: String, base_price: Decimal) -> Self {
        Self { pair, base_price }
    }

    fn walk(seed: u64, steps: u32) -> Vec<i64> {
        // Hand-rolled LCG: mock sessions must replay identically per date.
        let mut offsets = Vec::with_capacity(steps as usize);
        let mut level: i64 = 0;
        for i in 0..u64::from(steps) {
            let s = (seed + i).wrapping_mul(1_103_515_245).wrapping_add(12_345);
            let step = ((s / 65_536) % 21) as i64 - 10; // -10..=10 pips
            level += step;
            offsets.push(level);
        }
        offsets
    }
}

#[async_trait]
impl MarketDataProvider for MockMarketDataProvider {
    async fn fetch_snapshot(&self, now: DateTime<Utc>) -> Result<MarketSnapshot> {
        let mut timeframes = BTreeMap::new();
        for tf in ["Daily", "H4", "H1"] {
            timeframes.insert(
                tf.to_string(),
                TimeframeAnalysis {
                    trend: "bullish".to_string(),
                    key_support: vec![self.base_price - Decimal::new(50, 4)],
                    key_resistance: vec![self.base_price + Decimal::new(60, 4)],
                },
            );
        }
        Ok(MarketSnapshot {
            pair: self.pair.clone(),
            current_price: self.base_price,
            current_time_utc: now,
            timeframes,
            volatility: Volatility {
                atr_daily_pips: Decimal::from(80),
                extra: BTreeMap::new(),
            },
            economic_events: Vec::new(),
            intermarket: BTreeMap::from([("DXY".to_string(), "bearish".to_string())]),
        })
    }

    async fn fetch_session_ohlc(
        &self,
        date: NaiveDate,
        window: &SessionWindow,
    ) -> Result<Vec<Candle>> {
        let steps = window.candles_per_session();
        let seed = u64::from(date.year() as u32) * 10_000
            + u64::from(date.month()) * 100
            + u64::from(date.day());
        let offsets = Self::walk(seed, steps);

        let pip = Decimal::new(1, 4);
        let start = window.start(date);
        let mut candles = Vec::with_capacity(offsets.len());
        let mut prev = self.base_price;
        for (i, offset) in offsets.iter().enumerate() {
            let close = self.base_price + Decimal::from(*offset) * pip;
            let open = prev;
            let high = open.max(close) + pip;
            let low = open.min(close) - pip;
            candles.push(Candle {
                open_time: start
                    + Duration::minutes(i64::from(window.interval_minutes) * i as i64),
                open,
                high,
                low,
                close,
            });
            prev = close;
        }
        info!(
            "MockMarketDataProvider: synthesized {} candles for {}",
            candles.len(),
            date
        );
        Ok(candles)
    }
}

// ===== Notifier =====

#[derive(Default)]
pub struct MockNotifier {
    sent: Mutex<Vec<String>>,
}

impl MockNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for MockNotifier {
    async fn send(&self, message: &str) -> Result<()> {
        self.sent.lock().unwrap().push(message.to_string());
        Ok(())
    }
}

// ===== Bundle store =====

type StoredBundle = (DateTime<Utc>, Vec<(PathBuf, Vec<u8>)>);

/// In-memory bundle store for tests: uploads capture the tree as bytes,
/// downloads materialize it.
#[derive(Default)]
pub struct InMemoryBundleStore {
    bundles: Mutex<BTreeMap<String, StoredBundle>>,
}

impl InMemoryBundleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn keys(&self) -> Vec<String> {
        self.bundles.lock().unwrap().keys().cloned().collect()
    }

    fn collect_files(root: &Path, dir: &Path, out: &mut Vec<(PathBuf, Vec<u8>)>) -> Result<()> {
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                Self::collect_files(root, &entry.path(), out)?;
            } else {
                let rel = entry
                    .path()
                    .strip_prefix(root)
                    .expect("entry under root")
                    .to_path_buf();
                out.push((rel, std::fs::read(entry.path())?));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl StateBundleStore for InMemoryBundleStore {
    async fn latest(&self) -> Result<Option<BundleHandle>> {
        Ok(self
            .bundles
            .lock()
            .unwrap()
            .iter()
            .max_by_key(|(_, (created_at, _))| *created_at)
            .map(|(key, (created_at, _))| BundleHandle {
                key: key.clone(),
                created_at: *created_at,
            }))
    }

    async fn download(&self, handle: &BundleHandle, dest: &Path) -> Result<()> {
        let bundles = self.bundles.lock().unwrap();
        let (_, files) = bundles
            .get(&handle.key)
            .ok_or_else(|| anyhow::anyhow!("no such bundle: {}", handle.key))?;
        for (rel, bytes) in files {
            let target = dest.join(rel);
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(target, bytes)?;
        }
        Ok(())
    }

    async fn upload(&self, src: &Path, key: &str, created_at: DateTime<Utc>) -> Result<()> {
        let mut files = Vec::new();
        Self::collect_files(src, src, &mut files)?;
        self.bundles
            .lock()
            .unwrap()
            .insert(key.to_string(), (created_at, files));
        Ok(())
    }

    async fn prune_older_than(&self, horizon: DateTime<Utc>) -> Result<usize> {
        let mut bundles = self.bundles.lock().unwrap();
        let before = bundles.len();
        bundles.retain(|_, (created_at, _)| *created_at >= horizon);
        Ok(before - bundles.len())
    }
}
