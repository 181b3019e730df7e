// pipeline.rs

use std::time::Instant;

use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};
use rayon::prelude::*;

use crate::aggregate::RegionAggregator;
use crate::assemble::{RegionResult, RegionalPcaResult, ResultAssembler, SkippedRegion};
use crate::decompose::RegionDecomposer;
use crate::error::{RegionalPcaError, Result};
use crate::matrix::MeasurementMatrix;
use crate::rank::RankMethod;
use crate::region_map::RegionMap;

/// Regional PCA over every region of a [`RegionMap`].
///
/// ```no_run
/// # use regional_pca::{RegionalPca, RankMethod, MeasurementMatrix, RegionMap};
/// # fn run(matrix: &MeasurementMatrix, map: &RegionMap) -> regional_pca::Result<()> {
/// let result = RegionalPca::builder()
///     .method(RankMethod::Mp)
///     .build()
///     .compute(matrix, map)?;
/// println!("{} regional PCs", result.n_components());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct RegionalPca {
    method: RankMethod,
    show_progress: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RegionalPcaBuilder {
    method: RankMethod,
    show_progress: bool,
}

impl RegionalPcaBuilder {
    pub fn method(mut self, method: RankMethod) -> Self {
        self.method = method;
        self
    }

    pub fn show_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    pub fn build(self) -> RegionalPca {
        RegionalPca {
            method: self.method,
            show_progress: self.show_progress,
        }
    }
}

impl RegionalPca {
    pub fn builder() -> RegionalPcaBuilder {
        RegionalPcaBuilder::default()
    }

    pub fn new(method: RankMethod) -> Self {
        Self::builder().method(method).build()
    }

    pub fn method(&self) -> RankMethod {
        self.method
    }

    /// Regions are decomposed in parallel on the current rayon pool; the
    /// matrix is only read, each region works on its own copy of its rows.
    pub fn compute(&self, matrix: &MeasurementMatrix, region_map: &RegionMap) -> Result<RegionalPcaResult> {
        let start_time = Instant::now();
        if matrix.n_sites() == 0 {
            return Err(RegionalPcaError::EmptyInput(
                "measurement matrix has no sites".to_string(),
            ));
        }
        if region_map.is_empty() {
            warn!("Region map is empty; no regional components will be produced.");
        }
        info!(
            "Computing regional PCs for {} sites x {} samples over {} map entries (method: {}).",
            matrix.n_sites(),
            matrix.n_samples(),
            region_map.len(),
            self.method
        );

        let aggregation = RegionAggregator::new(matrix).aggregate(region_map);
        let decomposer = RegionDecomposer::new(self.method);
        let progress = self.progress_bar(aggregation.blocks.len() as u64);

        let outcomes: Vec<std::result::Result<RegionResult, SkippedRegion>> = aggregation
            .blocks
            .par_iter()
            .map(|block| {
                let local = matrix.select_rows(&block.rows);
                let outcome = decomposer.decompose(&block.region_id, &block.site_ids, local.view());
                progress.inc(1);
                outcome
            })
            .collect();
        progress.finish_and_clear();

        let result = ResultAssembler::new(matrix.sample_ids().to_vec(), self.method).assemble(
            outcomes,
            aggregation.skipped,
            aggregation.dropped_site_links,
        );
        info!(
            "Regional PCA finished in {:.2?}: {} components from {} regions, {} regions skipped.",
            start_time.elapsed(),
            result.n_components(),
            result.regions.len(),
            result.skipped_regions.len()
        );
        Ok(result)
    }

    fn progress_bar(&self, len: u64) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }
        let style = ProgressStyle::default_bar()
            .template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} regions ({percent}%) ETA: {eta}",
            )
            .map(|style| style.progress_chars("=> "))
            .unwrap_or_else(|_| ProgressStyle::default_bar());
        ProgressBar::new(len).with_style(style)
    }
}

/// Regional PCs of `matrix` over the regions of `region_map`.
pub fn compute(
    matrix: &MeasurementMatrix,
    region_map: &RegionMap,
    method: RankMethod,
) -> Result<RegionalPcaResult> {
    RegionalPca::new(method).compute(matrix, region_map)
}
