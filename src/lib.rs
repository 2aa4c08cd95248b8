//! Periodic candle-to-forecast refresh pipeline.
//!
//! One background worker per (symbol, period) fetches recent candles from
//! the exchange, fits a trend forecast, and atomically replaces that key's
//! JSON artifact on disk. Presentation code only ever reads the artifacts.

pub mod config;
pub mod error;
pub mod forecast;
pub mod klines;
pub mod pipeline;
pub mod scheduler;
pub mod status;
pub mod storage_utils;
pub mod supervisor;

pub use config::{AppConfig, RefreshTarget};
pub use error::{CycleError, FetchError, ForecastError, StoreError};
pub use forecast::{ForecastEngine, ForecastResult, ForecastSettings};
pub use klines::{Candle, MarketDataClient, Series};
pub use pipeline::ForecastPipeline;
pub use scheduler::{RefreshCycle, RefreshScheduler, SchedulerState};
pub use storage_utils::ResultStore;
pub use supervisor::PipelineSupervisor;
