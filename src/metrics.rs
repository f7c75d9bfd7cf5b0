//! Two-sample distance measures used by the drift scorer.
//!
//! Every function here is pure. Inputs too small or malformed for a measure
//! produce [`MetricUnavailable`] instead of a number; the scorer treats that
//! as "skip this metric", never as a failed run.

pub const DEFAULT_BINS: usize = 20;
pub const DEFAULT_MMD_GAMMA: f64 = 1.0;

const HISTOGRAM_EPSILON: f64 = 1e-10;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MetricUnavailable {
    #[error("sample set is empty")]
    EmptySample,

    #[error("histogram needs at least one bin")]
    ZeroBins,

    #[error("need at least {required} vectors per side, got {actual}")]
    TooFewVectors { required: usize, actual: usize },

    #[error("vector dimensions differ: {expected} vs {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KsResult {
    pub statistic: f64,
    pub pvalue: f64,
}

/// `D(p || q)` over equal-width histograms sharing one set of edges that
/// spans both samples. Not symmetric; pass (baseline, current).
pub fn kl_divergence(p: &[f64], q: &[f64], bins: usize) -> Result<f64, MetricUnavailable> {
    if p.is_empty() || q.is_empty() {
        return Err(MetricUnavailable::EmptySample);
    }
    if bins == 0 {
        return Err(MetricUnavailable::ZeroBins);
    }

    let (low, high) = histogram_range(p.iter().chain(q.iter()).copied());
    let p_hist = normalized_histogram(p, bins, low, high);
    let q_hist = normalized_histogram(q, bins, low, high);

    let divergence = p_hist
        .iter()
        .zip(q_hist.iter())
        .map(|(p_i, q_i)| p_i * (p_i / q_i).ln())
        .sum::<f64>();

    // Gibbs' inequality; only rounding can push this below zero.
    Ok(divergence.max(0.0))
}

fn histogram_range(values: impl Iterator<Item = f64>) -> (f64, f64) {
    let (low, high) = values.fold((f64::INFINITY, f64::NEG_INFINITY), |(low, high), value| {
        (low.min(value), high.max(value))
    });

    if low == high {
        (low - 0.5, high + 0.5)
    } else {
        (low, high)
    }
}

fn normalized_histogram(values: &[f64], bins: usize, low: f64, high: f64) -> Vec<f64> {
    let width = (high - low) / bins as f64;
    let mut counts = vec![0_f64; bins];

    for value in values {
        if *value < low || *value > high {
            continue;
        }
        let index = (((*value - low) / width) as usize).min(bins - 1);
        counts[index] += 1.0;
    }

    let total = counts.iter().sum::<f64>();
    let scale = if total > 0.0 { total * width } else { 1.0 };
    let mut hist = counts
        .into_iter()
        .map(|count| count / scale + HISTOGRAM_EPSILON)
        .collect::<Vec<f64>>();

    let norm = hist.iter().sum::<f64>();
    for value in &mut hist {
        *value /= norm;
    }
    hist
}

/// First Wasserstein distance between two empirical 1-D distributions.
pub fn wasserstein_distance(u: &[f64], v: &[f64]) -> Result<f64, MetricUnavailable> {
    if u.is_empty() || v.is_empty() {
        return Err(MetricUnavailable::EmptySample);
    }

    let u_sorted = sorted(u);
    let v_sorted = sorted(v);
    let mut all = u_sorted.iter().chain(v_sorted.iter()).copied().collect::<Vec<f64>>();
    all.sort_by(f64::total_cmp);

    let mut distance = 0.0_f64;
    for window in all.windows(2) {
        let delta = window[1] - window[0];
        if delta == 0.0 {
            continue;
        }
        let u_cdf = empirical_cdf(&u_sorted, window[0]);
        let v_cdf = empirical_cdf(&v_sorted, window[0]);
        distance += (u_cdf - v_cdf).abs() * delta;
    }

    Ok(distance)
}

/// Two-sided two-sample Kolmogorov-Smirnov test. The p-value uses the
/// asymptotic Kolmogorov distribution with Stephens' small-sample correction.
pub fn ks_two_sample(p: &[f64], q: &[f64]) -> Result<KsResult, MetricUnavailable> {
    if p.is_empty() || q.is_empty() {
        return Err(MetricUnavailable::EmptySample);
    }

    let p_sorted = sorted(p);
    let q_sorted = sorted(q);

    let statistic = p_sorted
        .iter()
        .chain(q_sorted.iter())
        .map(|point| (empirical_cdf(&p_sorted, *point) - empirical_cdf(&q_sorted, *point)).abs())
        .fold(0.0_f64, f64::max);

    let m = p.len() as f64;
    let n = q.len() as f64;
    let effective = (m * n / (m + n)).sqrt();
    let lambda = (effective + 0.12 + 0.11 / effective) * statistic;

    Ok(KsResult {
        statistic,
        pvalue: kolmogorov_survival(lambda),
    })
}

fn kolmogorov_survival(lambda: f64) -> f64 {
    if lambda <= 0.0 {
        return 1.0;
    }

    let exponent = -2.0 * lambda * lambda;
    let mut sign = 2.0_f64;
    let mut sum = 0.0_f64;
    let mut previous = 0.0_f64;

    for j in 1..=100 {
        let j = f64::from(j);
        let term = sign * (exponent * j * j).exp();
        sum += term;
        if term.abs() <= 0.001 * previous || term.abs() <= 1e-8 * sum {
            return sum.clamp(0.0, 1.0);
        }
        sign = -sign;
        previous = term.abs();
    }

    // Series fails to converge only for tiny lambda, where the tail is 1.
    1.0
}

fn sorted(values: &[f64]) -> Vec<f64> {
    let mut out = values.to_vec();
    out.sort_by(f64::total_cmp);
    out
}

fn empirical_cdf(sorted_values: &[f64], point: f64) -> f64 {
    let below = sorted_values.partition_point(|value| *value <= point);
    below as f64 / sorted_values.len() as f64
}

/// Unbiased MMD estimate with an RBF kernel `exp(-gamma * |x - y|^2)`.
/// Self-similarity terms on the diagonal are excluded.
pub fn mmd_rbf(x: &[Vec<f64>], y: &[Vec<f64>], gamma: f64) -> Result<f64, MetricUnavailable> {
    check_vectors(x, y)?;
    if x.len() < 2 || y.len() < 2 {
        return Err(MetricUnavailable::TooFewVectors {
            required: 2,
            actual: x.len().min(y.len()),
        });
    }
    let m = x.len() as f64;
    let n = y.len() as f64;

    let xx = off_diagonal_kernel_sum(x, gamma) / (m * (m - 1.0));
    let yy = off_diagonal_kernel_sum(y, gamma) / (n * (n - 1.0));
    let xy = x
        .iter()
        .map(|left| {
            y.iter()
                .map(|right| rbf(left, right, gamma))
                .sum::<f64>()
        })
        .sum::<f64>()
        / (m * n);

    let squared = xx + yy - 2.0 * xy;
    Ok(squared.max(0.0).sqrt())
}

fn off_diagonal_kernel_sum(vectors: &[Vec<f64>], gamma: f64) -> f64 {
    let mut sum = 0.0_f64;
    for (index, left) in vectors.iter().enumerate() {
        for right in &vectors[index + 1..] {
            sum += rbf(left, right, gamma);
        }
    }
    2.0 * sum
}

fn rbf(left: &[f64], right: &[f64], gamma: f64) -> f64 {
    let squared = left
        .iter()
        .zip(right.iter())
        .map(|(a, b)| (a - b) * (a - b))
        .sum::<f64>();
    (-gamma * squared).exp()
}

/// Shared dimension of two non-empty vector sets.
pub fn check_vectors(x: &[Vec<f64>], y: &[Vec<f64>]) -> Result<usize, MetricUnavailable> {
    let first = x
        .first()
        .or_else(|| y.first())
        .ok_or(MetricUnavailable::EmptySample)?;
    if x.is_empty() || y.is_empty() {
        return Err(MetricUnavailable::EmptySample);
    }

    let dim = first.len();
    if dim == 0 {
        return Err(MetricUnavailable::EmptySample);
    }
    for vector in x.iter().chain(y.iter()) {
        if vector.len() != dim {
            return Err(MetricUnavailable::DimensionMismatch {
                expected: dim,
                actual: vector.len(),
            });
        }
    }
    Ok(dim)
}

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

pub fn mean_vector(vectors: &[Vec<f64>]) -> Vec<f64> {
    let Some(first) = vectors.first() else {
        return Vec::new();
    };

    let mut out = vec![0_f64; first.len()];
    for vector in vectors {
        for (slot, value) in out.iter_mut().zip(vector.iter()) {
            *slot += value;
        }
    }
    let count = vectors.len() as f64;
    for slot in &mut out {
        *slot /= count;
    }
    out
}

/// Euclidean norm of the difference between the two mean vectors.
pub fn mean_shift(x: &[Vec<f64>], y: &[Vec<f64>]) -> f64 {
    mean_vector(x)
        .iter()
        .zip(mean_vector(y).iter())
        .map(|(a, b)| (a - b) * (a - b))
        .sum::<f64>()
        .sqrt()
}

/// Population variance over every component of every vector.
pub fn flat_variance(vectors: &[Vec<f64>]) -> f64 {
    let values = vectors.iter().flatten().copied().collect::<Vec<f64>>();
    let Some(center) = mean(&values) else {
        return 0.0;
    };
    values
        .iter()
        .map(|value| (value - center) * (value - center))
        .sum::<f64>()
        / values.len() as f64
}

/// `|current - reference| / reference`, zero for a zero reference.
pub fn variance_ratio(reference: f64, current: f64) -> f64 {
    if reference > 0.0 {
        (current - reference).abs() / reference
    } else {
        0.0
    }
}

/// Per-file quality in [0, 100] from sharpness and noise level.
pub fn quality_score(sharpness: f64, noise_level: f64) -> f64 {
    let sharp_term = (sharpness / 100.0).min(1.0) * 0.6;
    let noise_term = (1.0 - noise_level / 50.0).max(0.0) * 0.4;
    ((sharp_term + noise_term) * 100.0).clamp(0.0, 100.0)
}
