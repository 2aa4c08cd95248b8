//! Fourier seasonality regressors on the calendar-day axis.

use ndarray::{Array2, ShapeBuilder};
use std::f64::consts::PI;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Seasonality {
    pub name: &'static str,
    pub period_days: f64,
    pub order: usize,
}

pub const YEARLY: Seasonality = Seasonality {
    name: "yearly",
    period_days: 365.25,
    order: 10,
};

pub const WEEKLY: Seasonality = Seasonality {
    name: "weekly",
    period_days: 7.0,
    order: 3,
};

/// Seasonalities worth fitting for a history spanning `span_days` of
/// one-observation-per-day data. A cycle needs two full repetitions in the
/// history before it is modelled.
pub fn auto_seasonalities(span_days: f64) -> Vec<Seasonality> {
    let mut enabled = Vec::new();
    if span_days >= 2.0 * YEARLY.period_days.floor() {
        enabled.push(YEARLY);
    }
    if span_days >= 2.0 * WEEKLY.period_days {
        enabled.push(WEEKLY);
    }
    enabled
}

/// Feature matrix with columns `sin(2πkd/P), cos(2πkd/P)` for k = 1..=order,
/// per seasonality, evaluated at absolute day numbers `days`. Column-major so
/// each regressor is contiguous.
pub fn fourier_features(days: &[f64], seasonalities: &[Seasonality]) -> Array2<f64> {
    let width: usize = seasonalities.iter().map(|s| 2 * s.order).sum();
    let mut features = Array2::zeros((days.len(), width).f());

    let mut col = 0;
    for seasonality in seasonalities {
        for k in 1..=seasonality.order {
            let angular = 2.0 * PI * k as f64 / seasonality.period_days;
            for (row, &day) in days.iter().enumerate() {
                features[[row, col]] = (angular * day).sin();
                features[[row, col + 1]] = (angular * day).cos();
            }
            col += 2;
        }
    }
    features
}
