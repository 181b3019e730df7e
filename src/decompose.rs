// decompose.rs

use log::{debug, warn};
use nalgebra::DMatrix;
use ndarray::{s, Array1, Array2, ArrayView2, Axis};

use crate::assemble::{RegionResult, SkipReason, SkippedRegion};
use crate::rank::{RankEstimate, RankEstimator, RankMethod};

const SVD_MAX_ITERATIONS: usize = 10_000;

/// Thin SVD `x = u * diag(s) * vt` with singular values in descending order.
#[derive(Debug, Clone)]
pub struct ThinSvd {
    /// rows x r
    pub u: Array2<f64>,
    /// r
    pub s: Array1<f64>,
    /// r x cols
    pub vt: Array2<f64>,
}

impl ThinSvd {
    /// Returns `None` when the iteration does not converge.
    pub fn compute(x: ArrayView2<'_, f64>) -> Option<Self> {
        Self::compute_with_limit(x, SVD_MAX_ITERATIONS)
    }

    /// As [`ThinSvd::compute`], giving up after `max_iterations` QR sweeps.
    /// Zero means no limit.
    pub fn compute_with_limit(x: ArrayView2<'_, f64>, max_iterations: usize) -> Option<Self> {
        let (n_rows, n_cols) = x.dim();
        let matrix = DMatrix::from_fn(n_rows, n_cols, |i, j| x[[i, j]]);
        let svd = matrix.try_svd(true, true, f64::EPSILON, max_iterations)?;
        let u = svd.u?;
        let vt = svd.v_t?;
        let singular_values = svd.singular_values;

        let rank = singular_values.len();
        let mut order: Vec<usize> = (0..rank).collect();
        order.sort_by(|&a, &b| {
            singular_values[b]
                .total_cmp(&singular_values[a])
                .then(a.cmp(&b))
        });

        let u = Array2::from_shape_fn((n_rows, rank), |(i, j)| u[(i, order[j])]);
        let s = Array1::from_shape_fn(rank, |j| singular_values[order[j]]);
        let vt = Array2::from_shape_fn((rank, n_cols), |(j, c)| vt[(order[j], c)]);
        Some(Self { u, s, vt })
    }

    /// Flips each singular pair so the largest-magnitude entry of its left
    /// vector is positive; ties go to the lowest row.
    pub fn fix_signs(&mut self) {
        for j in 0..self.s.len() {
            let column = self.u.column(j);
            let mut pivot = 0;
            let mut pivot_abs = f64::NEG_INFINITY;
            for (i, value) in column.iter().enumerate() {
                if value.abs() > pivot_abs {
                    pivot = i;
                    pivot_abs = value.abs();
                }
            }
            if !column.is_empty() && column[pivot] < 0.0 {
                self.u.column_mut(j).mapv_inplace(|v| -v);
                self.vt.row_mut(j).mapv_inplace(|v| -v);
            }
        }
    }
}

/// Subtracts each site's mean across samples. Returns the centered copy and
/// the means.
pub fn center_sites(x: ArrayView2<'_, f64>) -> (Array2<f64>, Array1<f64>) {
    let means = x
        .mean_axis(Axis(1))
        .unwrap_or_else(|| Array1::zeros(x.nrows()));
    let mut centered = x.to_owned();
    for (mut row, &mean) in centered.axis_iter_mut(Axis(0)).zip(means.iter()) {
        row -= mean;
    }
    (centered, means)
}

fn percent_variance(singular_values: &Array1<f64>, k: usize) -> Array1<f64> {
    let total: f64 = singular_values.iter().map(|s| s * s).sum();
    if !(total > 0.0) {
        return Array1::zeros(k);
    }
    singular_values
        .slice(s![..k])
        .mapv(|s| 100.0 * s * s / total)
}

/// Centers a region, factorizes it, picks its rank and projects the samples
/// onto the retained directions.
#[derive(Debug, Clone, Copy)]
pub struct RegionDecomposer {
    estimator: RankEstimator,
    max_iterations: usize,
}

impl Default for RegionDecomposer {
    fn default() -> Self {
        Self::new(RankMethod::default())
    }
}

impl RegionDecomposer {
    pub fn new(method: RankMethod) -> Self {
        Self {
            estimator: RankEstimator::new(method),
            max_iterations: SVD_MAX_ITERATIONS,
        }
    }

    /// Caps the SVD iteration count; regions that do not converge within it
    /// are skipped as `decomposition_failed`.
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn method(&self) -> RankMethod {
        self.estimator.method()
    }

    /// `local` is the region's sites x samples block, rows parallel to `site_ids`.
    pub fn decompose(
        &self,
        region_id: &str,
        site_ids: &[String],
        local: ArrayView2<'_, f64>,
    ) -> Result<RegionResult, SkippedRegion> {
        let (n_sites, n_samples) = local.dim();
        let skip = |reason: SkipReason| {
            warn!("Region {} skipped: {}.", region_id, reason);
            SkippedRegion::new(region_id, reason)
        };

        if local.iter().any(|v| !v.is_finite()) {
            return Err(skip(SkipReason::NonFiniteValues));
        }

        let (centered, _means) = center_sites(local);
        if centered.iter().any(|v| !v.is_finite()) {
            return Err(skip(SkipReason::NonFiniteValues));
        }

        if n_sites < 2 {
            return Ok(self.single_site(region_id, site_ids, local, &centered));
        }

        let mut svd = ThinSvd::compute_with_limit(centered.view(), self.max_iterations).ok_or_else(|| skip(SkipReason::DecompositionFailed))?;
        if svd.s.iter().any(|v| !v.is_finite()) {
            return Err(skip(SkipReason::DecompositionFailed));
        }
        svd.fix_signs();

        let singular_values = svd.s.to_vec();
        let rank = self.estimator.estimate(n_sites, n_samples, &singular_values);
        let k = rank.k.min(svd.s.len()).max(1);

        let loadings = svd.u.slice(s![.., ..k]).t().to_owned();
        let scores = loadings.dot(&centered);

        debug!(
            "Region {}: {} sites x {} samples, k = {} (threshold {:.4}, aspect ratio {:.3}).",
            region_id, n_sites, n_samples, k, rank.threshold, rank.aspect_ratio
        );

        Ok(RegionResult {
            region_id: region_id.to_string(),
            site_ids: site_ids.to_vec(),
            k,
            scores,
            loadings,
            percent_variance: percent_variance(&svd.s, k),
            singular_values: svd.s,
            rank: RankEstimate { k, ..rank },
            method: self.method(),
        })
    }

    /// One site: the region's only component is the site itself.
    fn single_site(
        &self,
        region_id: &str,
        site_ids: &[String],
        local: ArrayView2<'_, f64>,
        centered: &Array2<f64>,
    ) -> RegionResult {
        let norm = centered.iter().map(|v| v * v).sum::<f64>().sqrt();
        debug!("Region {} has a single site; passing it through as its own component.", region_id);
        RegionResult {
            region_id: region_id.to_string(),
            site_ids: site_ids.to_vec(),
            k: 1,
            scores: local.to_owned(),
            loadings: Array2::ones((1, 1)),
            singular_values: Array1::from_elem(1, norm),
            percent_variance: Array1::from_elem(1, 100.0),
            rank: RankEstimate::degenerate(),
            method: self.method(),
        }
    }
}
