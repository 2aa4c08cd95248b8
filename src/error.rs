use crate::scheduler::Stage;

/// Failures while retrieving candles from the exchange.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected HTTP status {0}")]
    Status(reqwest::StatusCode),

    #[error("exchange rejected request: {0}")]
    Api(String),

    #[error("malformed kline payload: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("need at least 2 candles to infer the sample interval, got {got}")]
    InsufficientData { got: usize },
}

/// Failures while fitting the trend model or assembling its output.
#[derive(Debug, thiserror::Error)]
pub enum ForecastError {
    #[error("need at least 2 observations to fit a trend, got {points}")]
    InsufficientData { points: usize },

    #[error("close at position {index} is not a finite number")]
    NonFiniteInput { index: usize },

    #[error("trend fit did not converge after {iterations} iterations")]
    NotConverged { iterations: usize },

    #[error("timestamp {0} cannot be represented as a date")]
    TimestampOutOfRange(i64),

    #[error("forecast worker failed: {0}")]
    Worker(String),
}

/// Failures while reading or writing forecast artifacts.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("artifact I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("artifact encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Outcome of a failed refresh cycle, whichever stage it failed in.
#[derive(Debug, thiserror::Error)]
pub enum CycleError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Forecast(#[from] ForecastError),

    #[error(transparent)]
    Publish(#[from] StoreError),
}

impl CycleError {
    pub fn stage(&self) -> Stage {
        match self {
            Self::Fetch(_) => Stage::Fetching,
            Self::Forecast(_) => Stage::Forecasting,
            Self::Publish(_) => Stage::Publishing,
        }
    }
}
