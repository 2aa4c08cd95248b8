//! Piecewise-linear trend with Laplace-regularised changepoints, fitted
//! jointly with seasonal regressors by maximum a posteriori.
//!
//! Inputs are expected pre-scaled: `t` in [0, 1] over the history, `y`
//! divided by its absolute maximum.

use crate::error::ForecastError;
use ndarray::{Array1, Array2, ArrayView2, ShapeBuilder, s};

const N_CHANGEPOINTS: usize = 25;
const CHANGEPOINT_RANGE: f64 = 0.8;

const TREND_PRIOR_SCALE: f64 = 5.0;
const CHANGEPOINT_PRIOR_SCALE: f64 = 0.05;
const SEASONALITY_PRIOR_SCALE: f64 = 10.0;
const SIGMA_PRIOR_SCALE: f64 = 0.5;

const MIN_SIGMA_SQ: f64 = 1e-16;
const TOLERANCE: f64 = 1e-9;
const SIGMA_TOLERANCE: f64 = 1e-6;
const KKT_TOLERANCE: f64 = 1e-9;
const RIDGE: f64 = 1e-10;
pub const MAX_ITERATIONS: usize = 200;
const MAX_ACTIVE_SET_STEPS: usize = 2_000;

#[derive(Debug, Clone, PartialEq)]
pub struct TrendModel {
    pub k: f64,
    pub m: f64,
    pub changepoints: Vec<f64>,
    pub deltas: Vec<f64>,
    pub betas: Vec<f64>,
    pub sigma: f64,
    pub iterations: usize,
}

impl TrendModel {
    pub fn trend_at(&self, t: f64) -> f64 {
        piecewise_linear(t, self.k, self.m, &self.changepoints, &self.deltas)
    }
}

/// Base slope `k` and offset `m`, with each changepoint `s` at or before `t`
/// bending the slope by its delta while keeping the line continuous.
pub fn piecewise_linear(t: f64, k: f64, m: f64, changepoints: &[f64], deltas: &[f64]) -> f64 {
    let mut slope = k;
    let mut offset = m;
    for (&s, &delta) in changepoints.iter().zip(deltas) {
        if t >= s {
            slope += delta;
            offset -= s * delta;
        }
    }
    slope * t + offset
}

/// Evenly spaced changepoints over the first 80% of the history.
pub fn changepoints(t: &[f64]) -> Vec<f64> {
    let hist_size = (t.len() as f64 * CHANGEPOINT_RANGE).floor() as usize;
    let count = N_CHANGEPOINTS.min(hist_size.saturating_sub(1));
    if count == 0 {
        return Vec::new();
    }

    let last = (hist_size - 1) as f64;
    (1..=count)
        .map(|i| t[(last * i as f64 / count as f64).round_ties_even() as usize])
        .collect()
}

#[derive(Debug, Clone, Copy)]
enum Prior {
    Normal(f64),
    Laplace(f64),
}

impl Prior {
    fn penalty(self, x: f64) -> f64 {
        match self {
            Prior::Normal(scale) => x * x / (2.0 * scale * scale),
            Prior::Laplace(scale) => x.abs() / scale,
        }
    }

    /// Curvature the prior adds to the coefficient's diagonal.
    fn precision(self) -> f64 {
        match self {
            Prior::Normal(scale) => 1.0 / (scale * scale),
            Prior::Laplace(_) => 0.0,
        }
    }

    /// Weight of the coefficient's absolute value.
    fn l1_weight(self) -> f64 {
        match self {
            Prior::Normal(_) => 0.0,
            Prior::Laplace(scale) => 1.0 / scale,
        }
    }
}

/// Posterior mode of sigma^2 for fixed coefficients under the half-normal prior.
fn noise_variance(rss: f64, n: usize) -> f64 {
    let n = n as f64;
    (2.0 * rss / (n + (n * n + 16.0 * rss).sqrt())).max(MIN_SIGMA_SQ)
}

fn objective(rss: f64, sigma_sq: f64, n: usize, theta: &Array1<f64>, priors: &[Prior]) -> f64 {
    let likelihood = rss / (2.0 * sigma_sq) + 0.5 * n as f64 * sigma_sq.ln();
    let sigma_prior = sigma_sq / (2.0 * SIGMA_PRIOR_SCALE * SIGMA_PRIOR_SCALE);
    let coefficient_prior: f64 = theta
        .iter()
        .zip(priors)
        .map(|(&x, prior)| prior.penalty(x))
        .sum();
    likelihood + sigma_prior + coefficient_prior
}

/// `½θᵀHθ − bᵀθ + Σ λ_j |θ_j|`
fn penalized_quadratic(hessian: &Array2<f64>, b: &Array1<f64>, lambda: &[f64], theta: &Array1<f64>) -> f64 {
    let l1: f64 = theta.iter().zip(lambda).map(|(x, l)| l * x.abs()).sum();
    0.5 * theta.dot(&hessian.dot(theta)) - b.dot(theta) + l1
}

/// Solves `a x = rhs` for symmetric positive definite `a` via `a = L Lᵀ`.
/// The diagonal is inflated by a relative `RIDGE` to survive the near
/// collinearity of neighbouring changepoint ramps.
fn cholesky_solve(a: &Array2<f64>, rhs: &Array1<f64>) -> Option<Array1<f64>> {
    let n = a.nrows();
    let mut l = Array2::<f64>::zeros((n, n));

    for i in 0..n {
        for j in 0..=i {
            let mut sum = 0.0;
            for k in 0..j {
                sum += l[[i, k]] * l[[j, k]];
            }

            if i == j {
                let diag = a[[i, i]] * (1.0 + RIDGE) - sum;
                if diag.is_nan() || diag <= 0.0 {
                    return None;
                }
                l[[i, j]] = diag.sqrt();
            } else {
                l[[i, j]] = (a[[i, j]] - sum) / l[[j, j]];
            }
        }
    }

    let mut z = Array1::<f64>::zeros(n);
    for i in 0..n {
        let mut sum = 0.0;
        for j in 0..i {
            sum += l[[i, j]] * z[j];
        }
        z[i] = (rhs[i] - sum) / l[[i, i]];
    }

    let mut x = Array1::<f64>::zeros(n);
    for i in (0..n).rev() {
        let mut sum = 0.0;
        for j in (i + 1)..n {
            sum += l[[j, i]] * x[j];
        }
        x[i] = (z[i] - sum) / l[[i, i]];
    }

    x.iter().all(|v| v.is_finite()).then_some(x)
}

fn sign_of(x: f64) -> f64 {
    if x == 0.0 { 0.0 } else { x.signum() }
}

/// Exact minimiser of `½θᵀHθ − bᵀθ + Σ λ_j |θ_j|` by feature-sign search,
/// warm-started from `theta`.
///
/// Coefficients with `λ_j = 0` are always active. Each step solves the smooth
/// problem on the active set with the current signs held fixed, then keeps
/// whichever of that solution or the points where a coefficient first
/// crosses zero scores lowest. Once a full step lands, the inactive
/// coefficient that most violates optimality joins the set; none left means
/// the optimum. Returns `None` if a subsystem is singular or the search
/// fails to settle.
fn feature_sign_search(
    hessian: &Array2<f64>,
    b: &Array1<f64>,
    lambda: &[f64],
    mut theta: Array1<f64>,
) -> Option<Array1<f64>> {
    let p = theta.len();
    let penalized: Vec<bool> = lambda.iter().map(|&l| l > 0.0).collect();
    let mut active: Vec<bool> = (0..p).map(|j| !penalized[j] || theta[j] != 0.0).collect();
    let mut signs: Vec<f64> = (0..p)
        .map(|j| if penalized[j] { sign_of(theta[j]) } else { 0.0 })
        .collect();
    let tolerance = |j: usize| KKT_TOLERANCE * (1.0 + lambda[j] + b[j].abs());

    let mut full_step = false;
    for _ in 0..MAX_ACTIVE_SET_STEPS {
        if full_step {
            let gradient = hessian.dot(&theta) - b;
            let entering = (0..p)
                .filter(|&j| penalized[j] && !active[j])
                .map(|j| (j, gradient[j].abs() - lambda[j]))
                .filter(|&(j, excess)| excess > tolerance(j))
                .max_by(|x, y| x.1.total_cmp(&y.1));

            let Some((j, _)) = entering else {
                return Some(theta);
            };
            active[j] = true;
            signs[j] = -gradient[j].signum();
        }

        let indices: Vec<usize> = (0..p).filter(|&j| active[j]).collect();
        let sub_hessian = Array2::from_shape_fn((indices.len(), indices.len()), |(r, c)| {
            hessian[[indices[r], indices[c]]]
        });
        let rhs: Array1<f64> = indices.iter().map(|&j| b[j] - lambda[j] * signs[j]).collect();
        let solved = cholesky_solve(&sub_hessian, &rhs)?;

        let mut target = theta.clone();
        for (&j, &x) in indices.iter().zip(&solved) {
            target[j] = x;
        }

        let mut best_value = penalized_quadratic(hessian, b, lambda, &target);
        let mut best = None;
        for &j in &indices {
            if penalized[j] && theta[j] * target[j] < 0.0 {
                let fraction = theta[j] / (theta[j] - target[j]);
                let mut point = &theta + &((&target - &theta) * fraction);
                point[j] = 0.0;
                let value = penalized_quadratic(hessian, b, lambda, &point);
                if value < best_value {
                    best_value = value;
                    best = Some(point);
                }
            }
        }

        full_step = best.is_none();
        theta = best.unwrap_or(target);

        for &j in &indices {
            if penalized[j] {
                let sign = sign_of(theta[j]);
                // Solved against the wrong sign; solve again before growing the set.
                if sign != 0.0 && sign != signs[j] {
                    full_step = false;
                }
                signs[j] = sign;
                active[j] = theta[j] != 0.0;
            }
        }
    }

    None
}

/// Fits the model by alternating two exact block updates: the coefficients
/// for fixed noise, then the noise in closed form, until both settle.
pub fn fit(t: &[f64], y: &[f64], seasonal: ArrayView2<f64>) -> Result<TrendModel, ForecastError> {
    let n = t.len();
    if n < 2 || y.len() != n || seasonal.nrows() != n {
        return Err(ForecastError::InsufficientData { points: n.min(y.len()) });
    }

    let changepoints = changepoints(t);
    let n_cp = changepoints.len();
    let n_seasonal = seasonal.ncols();
    let p = 2 + n_cp + n_seasonal;

    let mut design = Array2::<f64>::zeros((n, p).f());
    for (row, &ti) in t.iter().enumerate() {
        design[[row, 0]] = ti;
        design[[row, 1]] = 1.0;
        for (j, &s) in changepoints.iter().enumerate() {
            if ti >= s {
                design[[row, 2 + j]] = ti - s;
            }
        }
    }
    design.slice_mut(s![.., 2 + n_cp..]).assign(&seasonal);

    let mut priors = vec![Prior::Normal(TREND_PRIOR_SCALE); 2];
    priors.extend(std::iter::repeat_n(Prior::Laplace(CHANGEPOINT_PRIOR_SCALE), n_cp));
    priors.extend(std::iter::repeat_n(Prior::Normal(SEASONALITY_PRIOR_SCALE), n_seasonal));

    let observed = Array1::from(y.to_vec());
    let gram = design.t().dot(&design);
    let xty = design.t().dot(&observed);

    let mut theta = Array1::<f64>::zeros(p);
    let mut sigma_sq = 1.0;
    let mut previous: Option<f64> = None;

    for iteration in 1..=MAX_ITERATIONS {
        // Both blocks are scaled by sigma^2 so the data term keeps unit weight.
        let mut hessian = gram.clone();
        for (j, prior) in priors.iter().enumerate() {
            hessian[[j, j]] += sigma_sq * prior.precision();
        }
        let lambda: Vec<f64> = priors.iter().map(|prior| sigma_sq * prior.l1_weight()).collect();

        theta = feature_sign_search(&hessian, &xty, &lambda, theta)
            .ok_or(ForecastError::NotConverged { iterations: iteration })?;

        let residual = &observed - &design.dot(&theta);
        let rss = residual.dot(&residual);
        let updated = noise_variance(rss, n);
        let current = objective(rss, updated, n, &theta, &priors);
        if !current.is_finite() {
            return Err(ForecastError::NotConverged { iterations: iteration });
        }

        let sigma_settled = (updated - sigma_sq).abs() <= SIGMA_TOLERANCE * updated;
        sigma_sq = updated;
        let objective_settled =
            previous.is_some_and(|prev| (prev - current).abs() <= TOLERANCE * current.abs().max(1.0));

        if sigma_settled && objective_settled {
            return Ok(TrendModel {
                k: theta[0],
                m: theta[1],
                deltas: theta.slice(s![2..2 + n_cp]).to_vec(),
                betas: theta.slice(s![2 + n_cp..]).to_vec(),
                changepoints,
                sigma: sigma_sq.sqrt(),
                iterations: iteration,
            });
        }
        previous = Some(current);
    }

    Err(ForecastError::NotConverged { iterations: MAX_ITERATIONS })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn unit_axis(n: usize) -> Vec<f64> {
        (0..n).map(|i| i as f64 / (n - 1) as f64).collect()
    }

    #[test]
    fn test_changepoints_cover_first_eighty_percent() {
        let t = unit_axis(100);
        let cps = changepoints(&t);

        assert_eq!(cps.len(), 25);
        // hist_size = 80, so indices are round(79 * i / 25)
        assert_eq!(cps[0], t[3]);
        assert_eq!(cps[24], t[79]);
        assert!(cps.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_short_history_gets_fewer_changepoints() {
        assert!(changepoints(&unit_axis(2)).is_empty());
        assert_eq!(changepoints(&unit_axis(10)).len(), 7);
    }

    #[test]
    fn test_piecewise_linear_bends_continuously() {
        let cps = [0.5];
        let deltas = [2.0];
        assert!((piecewise_linear(0.25, 1.0, 0.0, &cps, &deltas) - 0.25).abs() < 1e-12);
        assert!((piecewise_linear(0.5, 1.0, 0.0, &cps, &deltas) - 0.5).abs() < 1e-12);
        assert!((piecewise_linear(1.0, 1.0, 0.0, &cps, &deltas) - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_fit_recovers_straight_line() {
        let t = unit_axis(30);
        let y: Vec<f64> = t.iter().map(|&x| 0.4 + 0.5 * x).collect();
        let model = fit(&t, &y, Array2::zeros((30, 0)).view()).unwrap();

        assert!((model.k - 0.5).abs() < 1e-3, "k = {}", model.k);
        assert!((model.m - 0.4).abs() < 1e-3, "m = {}", model.m);
        assert!(model.deltas.iter().all(|d| d.abs() < 1e-3));
    }

    #[test]
    fn test_fit_follows_a_kink() {
        let t = unit_axis(60);
        let y: Vec<f64> = t
            .iter()
            .map(|&x| if x < 0.5 { 0.2 + 0.2 * x } else { 0.3 + 1.2 * (x - 0.5) })
            .collect();
        let model = fit(&t, &y, Array2::zeros((60, 0)).view()).unwrap();

        for (&x, &target) in t.iter().zip(&y) {
            assert!((model.trend_at(x) - target).abs() < 0.05);
        }
        let total_bend: f64 = model.deltas.iter().sum();
        assert!(total_bend > 0.5, "slope change = {total_bend}");
    }

    #[test]
    fn test_fit_rejects_single_point() {
        let err = fit(&[0.0], &[1.0], Array2::zeros((1, 0)).view()).unwrap_err();
        assert!(matches!(err, ForecastError::InsufficientData { points: 1 }));
    }

    #[test]
    fn test_feature_sign_search_matches_soft_threshold() {
        // Diagonal problem: each penalised coordinate is soft(b, λ) / h.
        let hessian = Array2::from_diag(&Array1::from(vec![2.0, 2.0, 4.0]));
        let b = Array1::from(vec![3.0, 0.5, -2.0]);
        let lambda = [1.0, 1.0, 0.0];

        let theta = feature_sign_search(&hessian, &b, &lambda, Array1::zeros(3)).unwrap();
        assert!((theta[0] - 1.0).abs() < 1e-8);
        assert_eq!(theta[1], 0.0);
        assert!((theta[2] + 0.5).abs() < 1e-8);
    }

    #[test]
    fn test_feature_sign_search_drops_coefficient_that_changes_sign() {
        let hessian = Array2::from_diag(&Array1::from(vec![1.0, 1.0]));
        let b = Array1::from(vec![0.2, 5.0]);
        let lambda = [0.5, 0.5];

        // Warm start on the wrong side of zero for the first coordinate.
        let start = Array1::from(vec![-3.0, 1.0]);
        let theta = feature_sign_search(&hessian, &b, &lambda, start).unwrap();
        assert_eq!(theta[0], 0.0);
        assert!((theta[1] - 4.5).abs() < 1e-8);
    }

    fn noisy_walk(n: usize, seed: u64) -> Vec<f64> {
        use rand::{Rng, SeedableRng, rngs::StdRng};

        let mut rng = StdRng::seed_from_u64(seed);
        let mut price = 30_000.0;
        let raw: Vec<f64> = (0..n)
            .map(|_| {
                price *= 1.0 + rng.gen_range(-0.02..0.02);
                price
            })
            .collect();
        let scale = raw.iter().fold(0.0_f64, |acc, v| acc.max(v.abs()));
        raw.iter().map(|v| v / scale).collect()
    }

    fn assert_settled(model: &TrendModel) {
        assert!(model.iterations < MAX_ITERATIONS);
        assert!(model.sigma.is_finite() && model.sigma > 0.0);
        assert!(model.k.is_finite() && model.m.is_finite());
        assert!(model.deltas.iter().chain(&model.betas).all(|v| v.is_finite()));
    }

    #[test]
    fn test_fit_converges_on_noisy_histories() {
        for (n, seed) in [(100, 1), (200, 2), (500, 3), (1000, 4), (2000, 5)] {
            let model = fit(&unit_axis(n), &noisy_walk(n, seed), Array2::zeros((n, 0)).view())
                .unwrap_or_else(|e| panic!("n = {n}: {e}"));
            assert_eq!(model.deltas.len(), 25);
            assert_settled(&model);
        }
    }

    #[test]
    fn test_fit_converges_with_weekly_and_yearly_terms() {
        use crate::forecast::seasonality::{WEEKLY, YEARLY, fourier_features};

        let n = 2000;
        let days: Vec<f64> = (0..n).map(|d| 17_000.0 + d as f64).collect();
        let seasonal = fourier_features(&days, &[YEARLY, WEEKLY]);
        let model = fit(&unit_axis(n), &noisy_walk(n, 9), seasonal.view()).unwrap();

        assert_eq!(model.betas.len(), 26);
        assert_settled(&model);
    }
}
