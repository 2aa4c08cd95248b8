use crate::scheduler::DEFAULT_BACKOFF;
use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Kline resolutions the exchange accepts for `/market/history/kline`.
pub const SUPPORTED_PERIODS: &[&str] = &[
    "1min", "5min", "15min", "30min", "60min", "4hour", "1day", "1week", "1mon", "1year",
];

// CONFIGURATION STRUCTS
// Every field has a default so a partial (or missing) config file still loads.

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct KlineConfig {
    pub base_url: String,
    pub size: usize,                // candles requested per fetch, exchange caps at 2000
    pub timeout_secs: Option<u64>,  // None keeps requests unbounded
}

impl Default for KlineConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.huobi.pro".to_string(),
            size: 2000,
            timeout_secs: None,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ScheduleConfig {
    pub refresh_interval_secs: u64, // 0 = one cycle then stop
    pub backoff_secs: u64,
    pub stagger_millis: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            refresh_interval_secs: 300,
            backoff_secs: DEFAULT_BACKOFF.as_secs(),
            stagger_millis: 1000,
        }
    }
}

impl ScheduleConfig {
    pub fn backoff(&self) -> Duration {
        Duration::from_secs(self.backoff_secs)
    }

    pub fn stagger(&self) -> Duration {
        Duration::from_millis(self.stagger_millis)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ForecastConfig {
    pub horizon_periods: usize,
    pub uncertainty_samples: usize,
    pub interval_width: f64,
    pub seed: Option<u64>,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            horizon_periods: 7 * 24,
            uncertainty_samples: 1000,
            interval_width: 0.8,
            seed: None,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub symbols: Vec<String>,
    pub periods: Vec<String>,
    pub data_dir: PathBuf,
    // Nested structs organize the config logically
    pub klines: KlineConfig,
    pub schedule: ScheduleConfig,
    pub forecast: ForecastConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            symbols: ["btcusdt", "ethusdt", "eosusdt", "neousdt", "htusdt"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            periods: ["15min", "60min", "1day"].iter().map(|s| s.to_string()).collect(),
            data_dir: PathBuf::from("data"),
            klines: KlineConfig::default(),
            schedule: ScheduleConfig::default(),
            forecast: ForecastConfig::default(),
        }
    }
}

/// One (symbol, period) pair tracked for the life of the process.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RefreshTarget {
    pub symbol: String,
    pub period: String,
    pub refresh_interval_secs: u64,
}

impl RefreshTarget {
    pub fn new(symbol: impl Into<String>, period: impl Into<String>, refresh_interval_secs: u64) -> Self {
        Self {
            symbol: symbol.into(),
            period: period.into(),
            refresh_interval_secs,
        }
    }

    /// Same target, but run a single cycle instead of looping.
    pub fn one_shot(mut self) -> Self {
        self.refresh_interval_secs = 0;
        self
    }
}

impl std::fmt::Display for RefreshTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.symbol, self.period)
    }
}

impl AppConfig {
    /// Reads and validates a JSON config file, or returns the validated
    /// defaults when no path is given.
    pub async fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => {
                let content = tokio::fs::read(path)
                    .await
                    .with_context(|| format!("Failed to read config file {}", path.display()))?;
                serde_json::from_slice(&content)
                    .with_context(|| format!("Failed to parse config file {}", path.display()))?
            }
            None => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.symbols.is_empty() {
            bail!("symbol allow-list is empty");
        }
        if self.periods.is_empty() {
            bail!("period allow-list is empty");
        }
        for symbol in &self.symbols {
            let well_formed = !symbol.is_empty()
                && symbol
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit());
            if !well_formed {
                bail!("symbol {symbol:?} must be lowercase ASCII alphanumerics");
            }
        }
        for period in &self.periods {
            if !SUPPORTED_PERIODS.contains(&period.as_str()) {
                bail!("period {period:?} is not one of {}", SUPPORTED_PERIODS.join(", "));
            }
        }
        if self.schedule.backoff_secs == 0 {
            bail!("schedule.backoff_secs must be positive");
        }
        let width = self.forecast.interval_width;
        if !(width > 0.0 && width < 1.0) {
            bail!("forecast.interval_width must be in (0, 1), got {width}");
        }
        Ok(())
    }

    /// Every symbol x period combination, in allow-list order.
    pub fn targets(&self) -> Vec<RefreshTarget> {
        self.symbols
            .iter()
            .flat_map(|symbol| {
                self.periods.iter().map(move |period| {
                    RefreshTarget::new(
                        symbol.clone(),
                        period.clone(),
                        self.schedule.refresh_interval_secs,
                    )
                })
            })
            .collect()
    }

    /// Resolves a user-supplied pair against the allow-lists. Symbols are
    /// matched case-insensitively.
    pub fn target(&self, symbol: &str, period: &str) -> Result<RefreshTarget> {
        let symbol = symbol.to_lowercase();
        if !self.symbols.contains(&symbol) {
            bail!("symbol {symbol:?} is not tracked");
        }
        if !self.periods.iter().any(|p| p == period) {
            bail!("period {period:?} is not tracked");
        }
        Ok(RefreshTarget::new(
            symbol,
            period,
            self.schedule.refresh_interval_secs,
        ))
    }
}
