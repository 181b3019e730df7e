// error.rs

use thiserror::Error;

/// Errors raised by the regional PCA library.
///
/// Problems confined to a single region never surface here; they are recorded
/// as [`crate::SkippedRegion`] entries and the run continues.
#[derive(Debug, Error)]
pub enum RegionalPcaError {
    #[error("Malformed interval '{id}' on {chrom}: start {start} > end {end}")]
    MalformedInterval {
        id: String,
        chrom: String,
        start: u64,
        end: u64,
    },

    #[error("All {count} {kind} intervals are malformed (start > end); nothing to overlap")]
    AllIntervalsMalformed { kind: &'static str, count: usize },

    #[error("Identifier collision: {0}")]
    IdentifierCollision(String),

    #[error("Duplicate {kind} identifier '{id}'")]
    DuplicateIdentifier { kind: &'static str, id: String },

    #[error("Missing value for site '{site}' in sample '{sample}'; the measurement matrix must be complete (impute upstream)")]
    MissingValue { site: String, sample: String },

    #[error("Dimension mismatch: {0}")]
    DimensionMismatch(String),

    #[error("Empty input: {0}")]
    EmptyInput(String),

    #[error("Site key '{0}' is not of the form chrom_start_end[_name]")]
    InvalidSiteKey(String),

    #[error("Unknown rank method '{0}' (expected 'gd' or 'mp')")]
    UnknownMethod(String),

    #[error("Invalid table {path}: {message}")]
    InvalidTable { path: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

pub type Result<T> = std::result::Result<T, RegionalPcaError>;
