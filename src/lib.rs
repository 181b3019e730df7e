// lib.rs

//! Regional principal components over per-site DNA methylation measurements.
//!
//! Sites are linked to annotation regions (from a precomputed map or by
//! interval overlap), each region's sites x samples block is centered and
//! factorized, and a data-driven number of components per region is kept
//! using a Gavish-Donoho or Marcenko-Pastur singular value threshold.

pub mod aggregate;
pub mod assemble;
pub mod decompose;
pub mod error;
pub mod intervals;
pub mod matrix;
pub mod pipeline;
pub mod rank;
pub mod region_map;
pub mod tables;

pub use aggregate::{AggregationReport, RegionAggregator, RegionBlock};
pub use assemble::{
    component_label, RegionResult, RegionalPcaResult, ResultAssembler, RunSummary, SkipReason,
    SkippedRegion,
};
pub use decompose::{center_sites, RegionDecomposer, ThinSvd};
pub use error::{RegionalPcaError, Result};
pub use intervals::{
    GenomicInterval, OverlapEngine, OverlapPair, Overlaps, Region, Site, SiteKey, Strand,
};
pub use matrix::MeasurementMatrix;
pub use pipeline::{compute, RegionalPca, RegionalPcaBuilder};
pub use rank::{RankEstimate, RankEstimator, RankMethod};
pub use region_map::{RegionMap, RegionMapBuilder, RegionSiteLink};
