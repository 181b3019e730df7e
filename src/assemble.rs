// assemble.rs

use std::collections::BTreeMap;
use std::fmt;

use log::info;
use ndarray::{s, Array1, Array2};
use serde::Serialize;

use crate::rank::{RankEstimate, RankMethod};

// --- Per-Region Outcomes ---

/// Why a region produced no components.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SkipReason {
    /// None of the region's mapped sites are rows of the matrix.
    NoSitesInMatrix,
    /// The region's values (or their centered form) contain inf.
    NonFiniteValues,
    /// The SVD did not converge.
    DecompositionFailed,
}

impl SkipReason {
    pub fn code(&self) -> &'static str {
        match self {
            SkipReason::NoSitesInMatrix => "no_sites_in_matrix",
            SkipReason::NonFiniteValues => "non_finite_values",
            SkipReason::DecompositionFailed => "decomposition_failed",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedRegion {
    pub region_id: String,
    pub reason: SkipReason,
}

impl SkippedRegion {
    pub fn new(region_id: impl Into<String>, reason: SkipReason) -> Self {
        Self {
            region_id: region_id.into(),
            reason,
        }
    }
}

/// Components of one region.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionResult {
    pub region_id: String,
    /// Sites in loading-column order.
    pub site_ids: Vec<String>,
    pub k: usize,
    /// k x samples; row i is component i + 1.
    pub scores: Array2<f64>,
    /// k x sites; row i holds the site weights of component i + 1.
    pub loadings: Array2<f64>,
    /// All singular values of the centered region matrix, descending.
    pub singular_values: Array1<f64>,
    /// Share of the region's total variance carried by each retained component, in percent.
    pub percent_variance: Array1<f64>,
    pub rank: RankEstimate,
    pub method: RankMethod,
}

impl RegionResult {
    pub fn n_sites(&self) -> usize {
        self.site_ids.len()
    }

    pub fn component_labels(&self) -> Vec<String> {
        (1..=self.k)
            .map(|i| component_label(&self.region_id, i))
            .collect()
    }
}

pub fn component_label(region_id: &str, index: usize) -> String {
    format!("{}-PC{}", region_id, index)
}

// --- Genome-Wide Result ---

#[derive(Debug, Clone, PartialEq)]
pub struct RegionalPcaResult {
    /// (sum of k over regions) x samples.
    pub regional_components: Array2<f64>,
    /// Row labels of `regional_components`, `<region_id>-PC<i>`.
    pub component_labels: Vec<String>,
    pub sample_ids: Vec<String>,
    /// Per-region loadings, singular values and ranks, in output order.
    pub regions: Vec<RegionResult>,
    pub skipped_regions: Vec<SkippedRegion>,
    pub method: RankMethod,
    /// Region map entries whose site was absent from the matrix.
    pub dropped_site_links: usize,
}

impl RegionalPcaResult {
    pub fn component_counts(&self) -> Vec<(&str, usize)> {
        self.regions
            .iter()
            .map(|region| (region.region_id.as_str(), region.k))
            .collect()
    }

    pub fn region(&self, region_id: &str) -> Option<&RegionResult> {
        self.regions.iter().find(|region| region.region_id == region_id)
    }

    pub fn loadings(&self, region_id: &str) -> Option<&Array2<f64>> {
        self.region(region_id).map(|region| &region.loadings)
    }

    pub fn n_components(&self) -> usize {
        self.regional_components.nrows()
    }

    pub fn summary(&self) -> RunSummary {
        let mut skipped_by_reason: BTreeMap<&'static str, usize> = BTreeMap::new();
        for skipped in &self.skipped_regions {
            *skipped_by_reason.entry(skipped.reason.code()).or_default() += 1;
        }
        RunSummary {
            method: self.method,
            n_samples: self.sample_ids.len(),
            n_regions: self.regions.len(),
            n_components: self.n_components(),
            n_single_site_regions: self.regions.iter().filter(|r| r.rank.degenerate).count(),
            n_skipped_regions: self.skipped_regions.len(),
            skipped_by_reason,
            dropped_site_links: self.dropped_site_links,
        }
    }
}

/// Run-level counts, serialized to the `summary.json` output.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub method: RankMethod,
    pub n_samples: usize,
    pub n_regions: usize,
    pub n_components: usize,
    pub n_single_site_regions: usize,
    pub n_skipped_regions: usize,
    pub skipped_by_reason: BTreeMap<&'static str, usize>,
    pub dropped_site_links: usize,
}

// --- Assembly ---

pub struct ResultAssembler {
    sample_ids: Vec<String>,
    method: RankMethod,
}

impl ResultAssembler {
    pub fn new(sample_ids: Vec<String>, method: RankMethod) -> Self {
        Self { sample_ids, method }
    }

    /// `outcomes` must already be in output region order. Regions skipped
    /// before decomposition come first in `skipped_regions`, then failures in
    /// region order.
    pub fn assemble(
        self,
        outcomes: Vec<Result<RegionResult, SkippedRegion>>,
        mut skipped_regions: Vec<SkippedRegion>,
        dropped_site_links: usize,
    ) -> RegionalPcaResult {
        let mut regions = Vec::with_capacity(outcomes.len());
        for outcome in outcomes {
            match outcome {
                Ok(region) => regions.push(region),
                Err(skipped) => skipped_regions.push(skipped),
            }
        }

        let n_samples = self.sample_ids.len();
        let total_components: usize = regions.iter().map(|region| region.k).sum();
        let mut regional_components = Array2::<f64>::zeros((total_components, n_samples));
        let mut component_labels = Vec::with_capacity(total_components);

        let mut offset = 0;
        for region in &regions {
            regional_components
                .slice_mut(s![offset..offset + region.k, ..])
                .assign(&region.scores);
            component_labels.extend(region.component_labels());
            offset += region.k;
        }

        info!(
            "Assembled {} regional components from {} regions ({} skipped).",
            total_components,
            regions.len(),
            skipped_regions.len()
        );

        RegionalPcaResult {
            regional_components,
            component_labels,
            sample_ids: self.sample_ids,
            regions,
            skipped_regions,
            method: self.method,
            dropped_site_links,
        }
    }
}
