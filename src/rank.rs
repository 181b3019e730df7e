// rank.rs
//
// Choosing how many regional components carry signal, using random matrix
// theory thresholds on the singular values of the centered region matrix.
//
// Both methods estimate the noise level from the median singular value, so
// they need the median of the Marcenko-Pastur law for the region's aspect
// ratio. That median has no closed form; it is found by bisection on the
// law's CDF, integrated with Simpson's rule after the substitution
// x = a + (b - a) sin^2(theta), which removes the square-root singularities
// at the support edges.

use std::f64::consts::PI;
use std::fmt;
use std::str::FromStr;

use log::debug;
use serde::{Serialize, Serializer};
use statrs::statistics::{Data, Median};

use crate::error::RegionalPcaError;

const SIMPSON_INTERVALS: usize = 256;
const MEDIAN_BISECTION_STEPS: usize = 60;

/// Rank selection method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RankMethod {
    /// Gavish-Donoho optimal hard threshold, noise level unknown.
    #[default]
    Gd,
    /// Marcenko-Pastur bulk edge.
    Mp,
}

impl RankMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            RankMethod::Gd => "gd",
            RankMethod::Mp => "mp",
        }
    }
}

impl FromStr for RankMethod {
    type Err = RegionalPcaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gd" | "gavish-donoho" => Ok(RankMethod::Gd),
            "mp" | "marcenko-pastur" | "marchenko-pastur" => Ok(RankMethod::Mp),
            _ => Err(RegionalPcaError::UnknownMethod(s.to_string())),
        }
    }
}

impl fmt::Display for RankMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for RankMethod {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Outcome of rank selection for one region.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RankEstimate {
    /// Number of retained components, always >= 1.
    pub k: usize,
    /// Singular values strictly above this were counted as signal.
    pub threshold: f64,
    /// min(sites, samples) / max(sites, samples).
    pub aspect_ratio: f64,
    /// Region has fewer than two sites; no decomposition is meaningful.
    pub degenerate: bool,
}

impl RankEstimate {
    pub fn degenerate() -> Self {
        Self {
            k: 1,
            threshold: 0.0,
            aspect_ratio: 0.0,
            degenerate: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RankEstimator {
    method: RankMethod,
}

impl RankEstimator {
    pub fn new(method: RankMethod) -> Self {
        Self { method }
    }

    pub fn method(&self) -> RankMethod {
        self.method
    }

    /// `singular_values` are those of the centered `n_sites x n_samples`
    /// region matrix, in any order.
    ///
    /// Centering each site across samples leaves `n_samples - 1` degrees of
    /// freedom, so the noise law is taken on `n_sites x (n_samples - 1)` and
    /// only the largest `min(n_sites, n_samples - 1)` values enter the median.
    pub fn estimate(&self, n_sites: usize, n_samples: usize, singular_values: &[f64]) -> RankEstimate {
        if n_sites < 2 {
            return RankEstimate::degenerate();
        }

        let effective_samples = n_samples.saturating_sub(1).max(1);
        let small_dim = n_sites.min(effective_samples);
        let large_dim = n_sites.max(effective_samples);
        let max_k = n_sites.min(n_samples).saturating_sub(1).max(1);
        let aspect_ratio = small_dim as f64 / large_dim as f64;

        let largest = singular_values.iter().copied().fold(0.0_f64, f64::max);
        let zero_tolerance = largest * large_dim as f64 * f64::EPSILON;
        let non_zero = singular_values.iter().filter(|&&s| s > zero_tolerance).count();
        if singular_values.is_empty() || !(largest > f64::MIN_POSITIVE) || non_zero == 0 {
            debug!(
                "All singular values are numerically zero ({} x {}); keeping one component.",
                n_sites, n_samples
            );
            return RankEstimate {
                k: 1,
                threshold: zero_tolerance,
                aspect_ratio,
                degenerate: false,
            };
        }

        let mut spectrum = singular_values.to_vec();
        spectrum.sort_by(|a, b| b.total_cmp(a));
        spectrum.truncate(small_dim);
        let median_singular_value = Data::new(spectrum).median();
        let coefficient = match self.method {
            RankMethod::Gd => gavish_donoho_coefficient(aspect_ratio),
            RankMethod::Mp => marcenko_pastur_edge_coefficient(aspect_ratio),
        };
        let threshold = (coefficient * median_singular_value).max(zero_tolerance);

        let signal_count = singular_values.iter().filter(|&&s| s > threshold).count();
        let k = signal_count.clamp(1, max_k);

        RankEstimate {
            k,
            threshold,
            aspect_ratio,
            degenerate: false,
        }
    }
}

// --- Marcenko-Pastur Law ---

fn support(beta: f64) -> (f64, f64) {
    let root = beta.sqrt();
    ((1.0 - root).powi(2), (1.0 + root).powi(2))
}

fn clamp_beta(beta: f64) -> f64 {
    beta.clamp(1e-9, 1.0)
}

/// Marcenko-Pastur density in the theta parameterization, already multiplied
/// by dx/dtheta.
fn theta_density(theta: f64, lower: f64, upper: f64, beta: f64) -> f64 {
    let sin2 = theta.sin().powi(2);
    let cos2 = theta.cos().powi(2);
    let width = upper - lower;
    let x = lower + width * sin2;
    if x <= f64::MIN_POSITIVE {
        // beta == 1: the 1/x pole cancels against sin^2.
        width * cos2 / (PI * beta)
    } else {
        width * width * sin2 * cos2 / (PI * beta * x)
    }
}

/// CDF of the Marcenko-Pastur law with ratio `beta` in (0, 1] and unit variance.
pub fn marcenko_pastur_cdf(x: f64, beta: f64) -> f64 {
    let beta = clamp_beta(beta);
    let (lower, upper) = support(beta);
    if x <= lower {
        return 0.0;
    }
    if x >= upper {
        return 1.0;
    }

    let theta_max = ((x - lower) / (upper - lower)).sqrt().asin();
    let h = theta_max / SIMPSON_INTERVALS as f64;
    let mut acc = theta_density(0.0, lower, upper, beta) + theta_density(theta_max, lower, upper, beta);
    for i in 1..SIMPSON_INTERVALS {
        let weight = if i % 2 == 1 { 4.0 } else { 2.0 };
        acc += weight * theta_density(i as f64 * h, lower, upper, beta);
    }
    (acc * h / 3.0).clamp(0.0, 1.0)
}

/// Median of the Marcenko-Pastur law with ratio `beta` in (0, 1].
pub fn marcenko_pastur_median(beta: f64) -> f64 {
    let beta = clamp_beta(beta);
    let (mut lo, mut hi) = support(beta);
    for _ in 0..MEDIAN_BISECTION_STEPS {
        let mid = 0.5 * (lo + hi);
        if marcenko_pastur_cdf(mid, beta) < 0.5 {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    0.5 * (lo + hi)
}

// --- Thresholds ---

/// Optimal hard threshold for singular values when the noise level is known,
/// in units of sqrt(n) * sigma: lambda*(beta) from Gavish & Donoho (2014).
pub fn optimal_threshold_lambda(beta: f64) -> f64 {
    let beta = clamp_beta(beta);
    let inner = 8.0 * beta / ((beta + 1.0) + (beta * beta + 14.0 * beta + 1.0).sqrt());
    (2.0 * (beta + 1.0) + inner).sqrt()
}

/// omega(beta) = lambda*(beta) / sqrt(mu_beta): threshold coefficient applied
/// to the median singular value when the noise level must be estimated.
pub fn gavish_donoho_coefficient(beta: f64) -> f64 {
    optimal_threshold_lambda(beta) / marcenko_pastur_median(beta).sqrt()
}

/// Cubic approximation of omega(beta) published with the method, accurate to
/// about 0.02 on (0, 1].
pub fn gavish_donoho_coefficient_approx(beta: f64) -> f64 {
    let beta = clamp_beta(beta);
    0.56 * beta.powi(3) - 0.95 * beta.powi(2) + 1.82 * beta + 1.43
}

/// Bulk edge (1 + sqrt(gamma)) divided by sqrt(mu_gamma): the largest singular
/// value pure noise produces, relative to the median singular value.
pub fn marcenko_pastur_edge_coefficient(gamma: f64) -> f64 {
    let gamma = clamp_beta(gamma);
    (1.0 + gamma.sqrt()) / marcenko_pastur_median(gamma).sqrt()
}
