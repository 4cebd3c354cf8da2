use crate::domain::market::SessionWindow;
use crate::domain::ports::{GenerationConfig, SafetyPosture, SafetyThreshold};
use anyhow::{Context, Result};
use chrono::{Datelike, NaiveDate};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Mock,
    Live,
}

impl FromStr for Mode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mock" => Ok(Mode::Mock),
            "live" => Ok(Mode::Live),
            _ => anyhow::bail!("Invalid MODE: {}. Must be 'mock' or 'live'", s),
        }
    }
}

impl FromStr for SafetyThreshold {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "block_none" => Ok(SafetyThreshold::BlockNone),
            "block_low" => Ok(SafetyThreshold::BlockLow),
            "block_medium" => Ok(SafetyThreshold::BlockMedium),
            "block_high" => Ok(SafetyThreshold::BlockHigh),
            _ => anyhow::bail!(
                "Invalid safety threshold: {}. Must be one of block_none, block_low, \
                 block_medium, block_high",
                s
            ),
        }
    }
}

/// Every on-disk location the pipeline touches, rooted at one working
/// directory. Threaded through the components explicitly; nothing in the
/// core reads process-wide paths.
#[derive(Debug, Clone)]
pub struct Paths {
    pub root: PathBuf,
}

impl Paths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn data_dir(&self) -> PathBuf {
        self.root.join("data")
    }

    pub fn playbook_file(&self) -> PathBuf {
        self.data_dir().join("playbook.json")
    }

    pub fn history_dir(&self) -> PathBuf {
        self.data_dir().join("history")
    }

    pub fn history_snapshot_file(&self, version: &str) -> PathBuf {
        self.history_dir()
            .join(format!("playbook_v{}.json", version))
    }

    pub fn session_root(&self) -> PathBuf {
        self.root.join("trading_session")
    }

    pub fn session_dir(&self, date: NaiveDate) -> PathBuf {
        self.session_root().join(date.format("%Y_%m_%d").to_string())
    }

    pub fn plan_file(&self, date: NaiveDate) -> PathBuf {
        self.session_dir(date).join("trading_plan.json")
    }

    pub fn trade_log_file(&self, date: NaiveDate) -> PathBuf {
        self.session_dir(date).join("trade_log.json")
    }

    pub fn debug_dir(&self, date: NaiveDate) -> PathBuf {
        self.session_dir(date).join("debug")
    }

    pub fn reflections_dir(&self) -> PathBuf {
        self.root.join("weekly_reflections")
    }

    pub fn reflection_file(&self, date: NaiveDate) -> PathBuf {
        self.reflections_dir().join(format!(
            "{}_W{:02}_reflection.json",
            date.iso_week().year(),
            date.iso_week().week()
        ))
    }

    pub fn artifact_summary_file(&self) -> PathBuf {
        self.root.join("artifact_summary.json")
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub mode: Mode,
    pub pair: String,
    /// Pip scale per instrument, e.g. EURUSD -> 10000, USDJPY -> 100.
    pub pip_scales: HashMap<String, Decimal>,
    pub session_open_hour_utc: u32,
    pub session_window_hours: u32,
    pub candle_interval_minutes: u32,
    // LLM
    pub gemini_api_key: String,
    pub gemini_model: String,
    pub gemini_base_url: String,
    pub llm_temperature: f64,
    pub llm_max_output_tokens: u32,
    pub llm_timeout_secs: u64,
    pub safety_posture: SafetyPosture,
    // Market data
    pub oanda_api_key: String,
    pub oanda_api_base_url: String,
    pub data_timeout_secs: u64,
    // Reflection / curation
    pub max_insights: usize,
    pub prune_min_harmful: u32,
    pub prune_harmful_margin: u32,
    // State bundles
    pub work_dir: PathBuf,
    pub bundle_dir: PathBuf,
    pub bundle_retention_days: i64,
    // Notifications
    pub telegram_bot_token: Option<String>,
    pub telegram_chat_id: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let mode_str = env::var("MODE").unwrap_or_else(|_| "mock".to_string());
        let mode = Mode::from_str(&mode_str)?;

        let pair = env::var("PAIR").unwrap_or_else(|_| "EURUSD".to_string());

        let pip_scales_str =
            env::var("PIP_SCALES").unwrap_or_else(|_| "EURUSD:10000,GBPUSD:10000,USDJPY:100".to_string());
        let pip_scales = parse_pip_scales(&pip_scales_str)?;

        let session_open_hour_utc = env::var("SESSION_OPEN_HOUR_UTC")
            .unwrap_or_else(|_| "7".to_string())
            .parse::<u32>()
            .context("Failed to parse SESSION_OPEN_HOUR_UTC")?;
        if session_open_hour_utc > 23 {
            anyhow::bail!(
                "SESSION_OPEN_HOUR_UTC must be 0-23, got {}",
                session_open_hour_utc
            );
        }

        let session_window_hours = env::var("SESSION_WINDOW_HOURS")
            .unwrap_or_else(|_| "8".to_string())
            .parse::<u32>()
            .context("Failed to parse SESSION_WINDOW_HOURS")?;

        let candle_interval_minutes = env::var("CANDLE_INTERVAL_MINUTES")
            .unwrap_or_else(|_| "5".to_string())
            .parse::<u32>()
            .context("Failed to parse CANDLE_INTERVAL_MINUTES")?;
        if candle_interval_minutes == 0 {
            anyhow::bail!("CANDLE_INTERVAL_MINUTES must be positive");
        }

        let gemini_api_key = env::var("GEMINI_API_KEY").unwrap_or_default();
        if matches!(mode, Mode::Live) && gemini_api_key.is_empty() {
            anyhow::bail!("GEMINI_API_KEY is required in live mode");
        }
        let gemini_model =
            env::var("GEMINI_MODEL").unwrap_or_else(|_| "gemini-2.0-flash".to_string());
        let gemini_base_url = env::var("GEMINI_BASE_URL")
            .unwrap_or_else(|_| "https://generativelanguage.googleapis.com".to_string());

        let llm_temperature = env::var("LLM_TEMPERATURE")
            .unwrap_or_else(|_| "0.4".to_string())
            .parse::<f64>()
            .context("Failed to parse LLM_TEMPERATURE")?;
        if !(0.0..=1.0).contains(&llm_temperature) {
            anyhow::bail!("LLM_TEMPERATURE must be within 0.0-1.0, got {}", llm_temperature);
        }

        let llm_max_output_tokens = env::var("LLM_MAX_OUTPUT_TOKENS")
            .unwrap_or_else(|_| "4096".to_string())
            .parse::<u32>()
            .context("Failed to parse LLM_MAX_OUTPUT_TOKENS")?;

        let llm_timeout_secs = env::var("LLM_TIMEOUT_SECS")
            .unwrap_or_else(|_| "60".to_string())
            .parse::<u64>()
            .context("Failed to parse LLM_TIMEOUT_SECS")?;

        let safety_str = env::var("SAFETY_POSTURE").unwrap_or_else(|_| "block_high".to_string());
        let threshold = SafetyThreshold::from_str(&safety_str)?;
        let safety_posture = SafetyPosture {
            harassment: threshold,
            hate_speech: threshold,
            sexually_explicit: threshold,
            dangerous_content: threshold,
        };

        let oanda_api_key = env::var("OANDA_API_KEY").unwrap_or_default();
        let oanda_api_base_url = env::var("OANDA_API_BASE_URL")
            .unwrap_or_else(|_| "https://api-fxpractice.oanda.com".to_string());

        let data_timeout_secs = env::var("DATA_TIMEOUT_SECS")
            .unwrap_or_else(|_| "30".to_string())
            .parse::<u64>()
            .context("Failed to parse DATA_TIMEOUT_SECS")?;

        let max_insights = env::var("MAX_INSIGHTS")
            .unwrap_or_else(|_| "5".to_string())
            .parse::<usize>()
            .context("Failed to parse MAX_INSIGHTS")?;

        let prune_min_harmful = env::var("PRUNE_MIN_HARMFUL")
            .unwrap_or_else(|_| "3".to_string())
            .parse::<u32>()
            .context("Failed to parse PRUNE_MIN_HARMFUL")?;

        let prune_harmful_margin = env::var("PRUNE_HARMFUL_MARGIN")
            .unwrap_or_else(|_| "2".to_string())
            .parse::<u32>()
            .context("Failed to parse PRUNE_HARMFUL_MARGIN")?;

        let work_dir = PathBuf::from(env::var("WORK_DIR").unwrap_or_else(|_| "state".to_string()));
        let bundle_dir =
            PathBuf::from(env::var("BUNDLE_DIR").unwrap_or_else(|_| "bundles".to_string()));

        let bundle_retention_days = env::var("BUNDLE_RETENTION_DAYS")
            .unwrap_or_else(|_| "14".to_string())
            .parse::<i64>()
            .context("Failed to parse BUNDLE_RETENTION_DAYS")?;

        let telegram_bot_token = env::var("TELEGRAM_BOT_TOKEN").ok().filter(|s| !s.is_empty());
        let telegram_chat_id = env::var("TELEGRAM_CHAT_ID").ok().filter(|s| !s.is_empty());

        Ok(Self {
            mode,
            pair,
            pip_scales,
            session_open_hour_utc,
            session_window_hours,
            candle_interval_minutes,
            gemini_api_key,
            gemini_model,
            gemini_base_url,
            llm_temperature,
            llm_max_output_tokens,
            llm_timeout_secs,
            safety_posture,
            oanda_api_key,
            oanda_api_base_url,
            data_timeout_secs,
            max_insights,
            prune_min_harmful,
            prune_harmful_margin,
            work_dir,
            bundle_dir,
            bundle_retention_days,
            telegram_bot_token,
            telegram_chat_id,
        })
    }

    pub fn session_window(&self) -> SessionWindow {
        SessionWindow {
            open_hour_utc: self.session_open_hour_utc,
            hours: self.session_window_hours,
            interval_minutes: self.candle_interval_minutes,
        }
    }

    /// Pip scale for the configured pair; 4-decimal convention by default.
    pub fn pip_scale(&self) -> Decimal {
        self.pip_scales
            .get(&self.pair)
            .copied()
            .unwrap_or_else(|| Decimal::from(10_000))
    }

    pub fn generation_config(&self) -> GenerationConfig {
        GenerationConfig {
            temperature: self.llm_temperature,
            max_output_tokens: self.llm_max_output_tokens,
            safety: self.safety_posture,
        }
    }

    pub fn paths(&self) -> Paths {
        Paths::new(&self.work_dir)
    }
}

fn parse_pip_scales(s: &str) -> Result<HashMap<String, Decimal>> {
    let mut scales = HashMap::new();
    for part in s.split(',').filter(|p| !p.trim().is_empty()) {
        let (pair, scale) = part
            .split_once(':')
            .with_context(|| format!("Invalid PIP_SCALES segment: {}", part))?;
        let scale = Decimal::from_str(scale.trim())
            .with_context(|| format!("Invalid pip scale for {}: {}", pair, scale))?;
        scales.insert(pair.trim().to_uppercase(), scale);
    }
    Ok(scales)
}

/// Pip scale lookup for an arbitrary instrument against a scale map.
pub fn pip_scale_for(scales: &HashMap<String, Decimal>, pair: &str) -> Decimal {
    scales
        .get(&pair.to_uppercase())
        .copied()
        .unwrap_or_else(|| Decimal::from(10_000))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_parse_pip_scales() {
        let scales = parse_pip_scales("EURUSD:10000, USDJPY:100").unwrap();
        assert_eq!(scales["EURUSD"], dec!(10000));
        assert_eq!(scales["USDJPY"], dec!(100));
        assert_eq!(pip_scale_for(&scales, "eurusd"), dec!(10000));
        // Unknown instruments fall back to the 4-decimal convention.
        assert_eq!(pip_scale_for(&scales, "AUDUSD"), dec!(10000));
    }

    #[test]
    fn test_parse_pip_scales_rejects_garbage() {
        assert!(parse_pip_scales("EURUSD=10000").is_err());
        assert!(parse_pip_scales("EURUSD:lots").is_err());
    }

    #[test]
    fn test_paths_layout() {
        let paths = Paths::new("/tmp/state");
        let date = NaiveDate::from_ymd_opt(2025, 10, 29).unwrap();
        assert_eq!(
            paths.playbook_file(),
            PathBuf::from("/tmp/state/data/playbook.json")
        );
        assert_eq!(
            paths.history_snapshot_file("1.3"),
            PathBuf::from("/tmp/state/data/history/playbook_v1.3.json")
        );
        assert_eq!(
            paths.plan_file(date),
            PathBuf::from("/tmp/state/trading_session/2025_10_29/trading_plan.json")
        );
        assert_eq!(
            paths.reflection_file(date),
            PathBuf::from("/tmp/state/weekly_reflections/2025_W44_reflection.json")
        );
    }

    #[test]
    fn test_mode_from_str() {
        assert!(matches!("mock".parse::<Mode>().unwrap(), Mode::Mock));
        assert!(matches!("LIVE".parse::<Mode>().unwrap(), Mode::Live));
        assert!("paper".parse::<Mode>().is_err());
    }
}
