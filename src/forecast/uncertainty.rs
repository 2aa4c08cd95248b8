//! Trend uncertainty by simulating future changepoints.

use super::trend::{TrendModel, piecewise_linear};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Exp, Poisson};

#[derive(Debug, Clone, PartialEq)]
pub struct TrendBand {
    pub lower: Vec<f64>,
    pub upper: Vec<f64>,
}

impl TrendBand {
    fn flat(point: Vec<f64>) -> Self {
        Self {
            lower: point.clone(),
            upper: point,
        }
    }
}

/// Quantile of an ascending slice, interpolating linearly between ranks.
pub fn quantile(sorted: &[f64], q: f64) -> f64 {
    let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64)
}

/// Lower/upper trend bounds at each `t`. Points inside the history
/// (`t <= 1`) have zero width; beyond it, each sample draws
/// `Poisson(S * (T - 1))` new changepoints uniformly in `(1, T]` with
/// Laplace-distributed slope changes sized like the fitted ones.
pub fn simulate_band(
    model: &TrendModel,
    t: &[f64],
    samples: usize,
    interval_width: f64,
    seed: Option<u64>,
) -> TrendBand {
    let point: Vec<f64> = t.iter().map(|&x| model.trend_at(x)).collect();

    let t_max = t.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let future_span = t_max - 1.0;
    let rate = model.changepoints.len() as f64 * future_span;
    if samples == 0 || !(rate > 0.0) {
        return TrendBand::flat(point);
    }

    let mean_delta = model.deltas.iter().map(|d| d.abs()).sum::<f64>() / model.deltas.len() as f64;
    let (Ok(poisson), Ok(magnitude)) = (Poisson::new(rate), Exp::new(1.0 / (mean_delta + 1e-8)))
    else {
        return TrendBand::flat(point);
    };

    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let future: Vec<usize> = (0..t.len()).filter(|&i| t[i] > 1.0).collect();
    let mut draws: Vec<Vec<f64>> = vec![Vec::with_capacity(samples); future.len()];

    for _ in 0..samples {
        let n_new = poisson.sample(&mut rng) as usize;

        let mut new_changepoints: Vec<f64> = (0..n_new)
            .map(|_| 1.0 + rng.gen_range(0.0..1.0) * future_span)
            .collect();
        new_changepoints.sort_by(f64::total_cmp);

        let changepoints: Vec<f64> = model
            .changepoints
            .iter()
            .copied()
            .chain(new_changepoints)
            .collect();
        let deltas: Vec<f64> = model
            .deltas
            .iter()
            .copied()
            .chain((0..n_new).map(|_| {
                let size = magnitude.sample(&mut rng);
                if rng.gen_bool(0.5) { size } else { -size }
            }))
            .collect();

        for (slot, &i) in future.iter().enumerate() {
            draws[slot].push(piecewise_linear(t[i], model.k, model.m, &changepoints, &deltas));
        }
    }

    let lower_q = (1.0 - interval_width) / 2.0;
    let upper_q = (1.0 + interval_width) / 2.0;

    let mut band = TrendBand::flat(point);
    for (slot, &i) in future.iter().enumerate() {
        let sorted = &mut draws[slot];
        sorted.sort_by(f64::total_cmp);
        band.lower[i] = quantile(sorted, lower_q);
        band.upper[i] = quantile(sorted, upper_q);
    }
    band
}
