// aggregate.rs

use std::collections::{HashMap, HashSet};

use log::{debug, info, warn};

use crate::assemble::{SkipReason, SkippedRegion};
use crate::matrix::MeasurementMatrix;
use crate::region_map::RegionMap;

/// The rows of one region, resolved against the measurement matrix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionBlock {
    pub region_id: String,
    /// Site ids in map order; parallel to `rows`.
    pub site_ids: Vec<String>,
    /// Row indices into the measurement matrix.
    pub rows: Vec<usize>,
}

impl RegionBlock {
    pub fn n_sites(&self) -> usize {
        self.rows.len()
    }
}

#[derive(Debug, Clone, Default)]
pub struct AggregationReport {
    /// Blocks in first-seen region order.
    pub blocks: Vec<RegionBlock>,
    /// Map links whose site id is not a matrix row.
    pub dropped_site_links: usize,
    /// Distinct site ids from the map missing in the matrix.
    pub missing_site_ids: usize,
    pub skipped: Vec<SkippedRegion>,
}

/// Groups matrix rows by region using a [`RegionMap`].
pub struct RegionAggregator<'a> {
    matrix: &'a MeasurementMatrix,
}

impl<'a> RegionAggregator<'a> {
    pub fn new(matrix: &'a MeasurementMatrix) -> Self {
        Self { matrix }
    }

    pub fn aggregate(&self, region_map: &RegionMap) -> AggregationReport {
        let mut order: Vec<&str> = Vec::new();
        let mut block_index: HashMap<&str, usize> = HashMap::new();
        let mut site_ids: Vec<Vec<String>> = Vec::new();
        let mut rows: Vec<Vec<usize>> = Vec::new();

        let mut dropped_site_links = 0usize;
        let mut missing: HashSet<&str> = HashSet::new();

        for link in region_map {
            let slot = *block_index.entry(link.region_id.as_str()).or_insert_with(|| {
                order.push(link.region_id.as_str());
                site_ids.push(Vec::new());
                rows.push(Vec::new());
                order.len() - 1
            });

            match self.matrix.site_row(&link.site_id) {
                Some(row) => {
                    site_ids[slot].push(link.site_id.clone());
                    rows[slot].push(row);
                }
                None => {
                    dropped_site_links += 1;
                    missing.insert(link.site_id.as_str());
                }
            }
        }

        let mut blocks = Vec::with_capacity(order.len());
        let mut skipped = Vec::new();
        for ((region_id, region_sites), region_rows) in order.into_iter().zip(site_ids).zip(rows) {
            if region_rows.is_empty() {
                debug!("Region {} has no sites present in the matrix; skipping.", region_id);
                skipped.push(SkippedRegion::new(region_id, SkipReason::NoSitesInMatrix));
                continue;
            }
            blocks.push(RegionBlock {
                region_id: region_id.to_string(),
                site_ids: region_sites,
                rows: region_rows,
            });
        }

        if dropped_site_links > 0 {
            warn!(
                "Dropped {} region map entries ({} distinct site ids) whose sites are absent from the measurement matrix.",
                dropped_site_links,
                missing.len()
            );
        }
        if !skipped.is_empty() {
            warn!(
                "{} regions have no sites present in the matrix and will be skipped.",
                skipped.len()
            );
        }
        info!(
            "Aggregated {} map entries into {} regions ({} skipped).",
            region_map.len(),
            blocks.len(),
            skipped.len()
        );

        AggregationReport {
            blocks,
            dropped_site_links,
            missing_site_ids: missing.len(),
            skipped,
        }
    }
}
