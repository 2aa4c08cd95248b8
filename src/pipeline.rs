//! The concrete refresh cycle: fetch candles, fit, publish.

use crate::config::{AppConfig, RefreshTarget};
use crate::error::{CycleError, ForecastError};
use crate::forecast::{ForecastEngine, ForecastSettings};
use crate::klines::MarketDataClient;
use crate::scheduler::{RefreshCycle, SchedulerState, Stage, StateSender};
use crate::storage_utils::ResultStore;
use anyhow::{Context, Result};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct ForecastPipeline {
    client: MarketDataClient,
    engine: ForecastEngine,
    store: ResultStore,
    history_size: usize,
    horizon_periods: usize,
}

impl ForecastPipeline {
    pub fn new(
        client: MarketDataClient,
        engine: ForecastEngine,
        store: ResultStore,
        history_size: usize,
        horizon_periods: usize,
    ) -> Self {
        Self {
            client,
            engine,
            store,
            history_size,
            horizon_periods,
        }
    }

    pub async fn from_config(config: &AppConfig) -> Result<Self> {
        let client = MarketDataClient::new(&config.klines).context("Failed to build HTTP client")?;
        let store = ResultStore::new(&config.data_dir)
            .await
            .with_context(|| format!("Failed to prepare data directory {}", config.data_dir.display()))?;

        Ok(Self::new(
            client,
            ForecastEngine::new(ForecastSettings::from(&config.forecast)),
            store,
            config.klines.size,
            config.forecast.horizon_periods,
        ))
    }

    pub fn store(&self) -> &ResultStore {
        &self.store
    }
}

impl RefreshCycle for ForecastPipeline {
    async fn run_cycle(&self, target: &RefreshTarget, state: &StateSender) -> Result<(), CycleError> {
        let series = self
            .client
            .fetch(&target.symbol, &target.period, self.history_size)
            .await?;
        debug!(%target, candles = series.len(), interval_secs = series.interval_secs, "candles fetched");

        state.send_replace(SchedulerState::Running(Stage::Forecasting));
        // Fitting is CPU-bound; keep it off the async workers.
        let engine = self.engine.clone();
        let horizon = self.horizon_periods;
        let result = tokio::task::spawn_blocking(move || engine.forecast(&series, horizon))
            .await
            .map_err(|e| ForecastError::Worker(e.to_string()))??;

        state.send_replace(SchedulerState::Running(Stage::Publishing));
        self.store
            .publish(&target.symbol, &target.period, &result)
            .await?;
        Ok(())
    }
}
