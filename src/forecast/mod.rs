//! Trend forecasting over a fetched candle series.
//!
//! Observations are placed one calendar day apart, ending on the UTC day of
//! the newest candle, whatever the series' real period is. Display labels
//! are rebuilt from the real sample interval instead, so for sub-daily
//! periods the model's time axis and the labels disagree. Artifacts already
//! in circulation were produced this way.

pub mod seasonality;
pub mod trend;
pub mod uncertainty;

use crate::config::ForecastConfig;
use crate::error::ForecastError;
use crate::klines::Series;
use chrono::DateTime;
use serde::{Deserialize, Serialize};

const SECONDS_PER_DAY: i64 = 24 * 60 * 60;
const LABEL_FORMAT: &str = "%m-%d %H:%M";

/// Published forecast for one (symbol, period).
///
/// `labels`, `trend`, `trend_upper_width` and `trend_lower` cover the history
/// plus the horizon; `origin` covers the history only.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ForecastResult {
    #[serde(rename = "ds")]
    pub labels: Vec<String>,
    pub trend: Vec<f64>,
    /// Band width (upper minus lower), not the upper bound itself.
    #[serde(rename = "trend_upper")]
    pub trend_upper_width: Vec<f64>,
    pub trend_lower: Vec<f64>,
    pub origin: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ForecastSettings {
    pub uncertainty_samples: usize,
    pub interval_width: f64,
    pub seed: Option<u64>,
}

impl Default for ForecastSettings {
    fn default() -> Self {
        Self::from(&ForecastConfig::default())
    }
}

impl From<&ForecastConfig> for ForecastSettings {
    fn from(config: &ForecastConfig) -> Self {
        Self {
            uncertainty_samples: config.uncertainty_samples,
            interval_width: config.interval_width,
            seed: config.seed,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ForecastEngine {
    settings: ForecastSettings,
}

impl ForecastEngine {
    pub fn new(settings: ForecastSettings) -> Self {
        Self { settings }
    }

    /// Fits the trend to `series` and extends it `horizon_periods` steps past
    /// the newest candle.
    pub fn forecast(&self, series: &Series, horizon_periods: usize) -> Result<ForecastResult, ForecastError> {
        let n = series.len();
        if n < 2 {
            return Err(ForecastError::InsufficientData { points: n });
        }

        let origin = series.closes();
        if let Some(index) = origin.iter().position(|c| !c.is_finite()) {
            return Err(ForecastError::NonFiniteInput { index });
        }

        let newest = series.candles[n - 1].timestamp;
        let first_day = newest.div_euclid(SECONDS_PER_DAY) - (n as i64 - 1);
        let span = (n - 1) as f64;
        let total = n + horizon_periods;

        let t_history: Vec<f64> = (0..n).map(|i| i as f64 / span).collect();
        let t_all: Vec<f64> = (0..total).map(|i| i as f64 / span).collect();
        let days: Vec<f64> = (0..n).map(|i| (first_day + i as i64) as f64).collect();

        let y_scale = origin.iter().fold(0.0_f64, |acc, c| acc.max(c.abs()));
        let y_scale = if y_scale == 0.0 { 1.0 } else { y_scale };
        let scaled: Vec<f64> = origin.iter().map(|c| c / y_scale).collect();

        let seasonal = seasonality::fourier_features(&days, &seasonality::auto_seasonalities(span));
        let model = trend::fit(&t_history, &scaled, seasonal.view())?;

        let band = uncertainty::simulate_band(
            &model,
            &t_all,
            self.settings.uncertainty_samples,
            self.settings.interval_width,
            self.settings.seed,
        );

        let trend = t_all.iter().map(|&t| model.trend_at(t) * y_scale).collect();
        let trend_lower = band.lower.iter().map(|v| v * y_scale).collect();
        let trend_upper_width = band
            .upper
            .iter()
            .zip(&band.lower)
            .map(|(upper, lower)| (upper - lower) * y_scale)
            .collect();

        let anchor = series.candles[0].timestamp;
        let labels = (0..total)
            .map(|i| format_label(anchor + i as i64 * series.interval_secs))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(ForecastResult {
            labels,
            trend,
            trend_upper_width,
            trend_lower,
            origin,
        })
    }
}

fn format_label(ts: i64) -> Result<String, ForecastError> {
    DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format(LABEL_FORMAT).to_string())
        .ok_or(ForecastError::TimestampOutOfRange(ts))
}
