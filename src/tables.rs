// tables.rs
//
// Tab-separated inputs: the measurement matrix, site/region position tables
// and a precomputed region map. Gzipped files are detected by magic bytes.

use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

use flate2::read::MultiGzDecoder;
use log::{debug, info};
use ndarray::Array2;
use serde::Deserialize;

use crate::error::{RegionalPcaError, Result};
use crate::intervals::{Region, Site, Strand};
use crate::matrix::MeasurementMatrix;
use crate::region_map::{RegionMap, RegionSiteLink};

const MISSING_TOKENS: [&str; 5] = ["", "na", "nan", "null", "."];

fn invalid(path: &Path, message: impl Into<String>) -> RegionalPcaError {
    RegionalPcaError::InvalidTable {
        path: path.display().to_string(),
        message: message.into(),
    }
}

pub fn is_gzipped<P: AsRef<Path>>(path: P) -> Result<bool> {
    let mut file = File::open(path)?;
    let mut buffer = [0u8; 2];
    match file.read_exact(&mut buffer) {
        Ok(()) => Ok(buffer == [0x1f, 0x8b]),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(RegionalPcaError::Io(e)),
    }
}

fn open_table(path: &Path) -> Result<csv::Reader<Box<dyn BufRead>>> {
    let file = File::open(path)?;
    let reader: Box<dyn BufRead> = if is_gzipped(path)? {
        Box::new(BufReader::new(MultiGzDecoder::new(file)))
    } else {
        Box::new(BufReader::new(file))
    };
    Ok(csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .trim(csv::Trim::All)
        .from_reader(reader))
}

fn is_missing_token(field: &str) -> bool {
    MISSING_TOKENS
        .iter()
        .any(|token| field.eq_ignore_ascii_case(token))
}

/// Header: corner label then sample ids. Rows: site id then one value per sample.
pub fn read_measurement_matrix<P: AsRef<Path>>(path: P) -> Result<MeasurementMatrix> {
    let path = path.as_ref();
    info!("Reading measurement matrix from {}", path.display());
    let mut reader = open_table(path)?;

    let headers = reader.headers()?.clone();
    if headers.len() < 2 {
        return Err(invalid(path, "header must hold a site id column and at least one sample"));
    }
    let sample_ids: Vec<String> = headers.iter().skip(1).map(str::to_string).collect();

    let mut site_ids = Vec::new();
    let mut values = Vec::new();
    for (line_idx, record) in reader.records().enumerate() {
        let record = record?;
        let site = record
            .get(0)
            .ok_or_else(|| invalid(path, format!("line {} is empty", line_idx + 2)))?
            .to_string();
        for (field, sample) in record.iter().skip(1).zip(sample_ids.iter()) {
            if is_missing_token(field) {
                return Err(RegionalPcaError::MissingValue {
                    site,
                    sample: sample.clone(),
                });
            }
            let value = field.parse::<f64>().map_err(|e| {
                invalid(
                    path,
                    format!("site '{}', sample '{}': '{}' is not a number ({})", site, sample, field, e),
                )
            })?;
            values.push(value);
        }
        site_ids.push(site);
    }

    let values = Array2::from_shape_vec((site_ids.len(), sample_ids.len()), values)
        .map_err(|e| invalid(path, e.to_string()))?;
    let matrix = MeasurementMatrix::new(site_ids, sample_ids, values)?;
    info!(
        "Loaded {} sites x {} samples from {}",
        matrix.n_sites(),
        matrix.n_samples(),
        path.display()
    );
    Ok(matrix)
}

#[derive(Debug, Deserialize)]
struct IntervalRecord {
    #[serde(alias = "name", alias = "gene_id", alias = "site_id", alias = "region_id")]
    id: String,
    #[serde(alias = "chr", alias = "chromosome", alias = "seqnames")]
    chrom: String,
    start: u64,
    end: u64,
    #[serde(default)]
    strand: Option<String>,
}

impl IntervalRecord {
    fn strand(&self) -> Strand {
        self.strand
            .as_deref()
            .and_then(|s| s.parse::<Strand>().ok())
            .unwrap_or_default()
    }
}

fn read_interval_records(path: &Path) -> Result<Vec<IntervalRecord>> {
    let mut reader = open_table(path)?;
    let mut records = Vec::new();
    for record in reader.deserialize() {
        let record: IntervalRecord = record?;
        records.push(record);
    }
    debug!("Read {} intervals from {}", records.len(), path.display());
    Ok(records)
}

/// Columns `id, chrom, start, end` and optional `strand`.
pub fn read_sites<P: AsRef<Path>>(path: P) -> Result<Vec<Site>> {
    let path = path.as_ref();
    info!("Reading site positions from {}", path.display());
    Ok(read_interval_records(path)?
        .into_iter()
        .map(|r| {
            let strand = r.strand();
            Site::new(r.id, r.chrom, r.start, r.end, strand)
        })
        .collect())
}

/// Columns `id, chrom, start, end` and optional `strand`.
pub fn read_regions<P: AsRef<Path>>(path: P) -> Result<Vec<Region>> {
    let path = path.as_ref();
    info!("Reading region positions from {}", path.display());
    Ok(read_interval_records(path)?
        .into_iter()
        .map(|r| {
            let strand = r.strand();
            Region::new(r.id, r.chrom, r.start, r.end, strand)
        })
        .collect())
}

/// Sites parsed from composite `chrom_start_end[_name]` matrix row keys.
pub fn sites_from_matrix_keys(matrix: &MeasurementMatrix) -> Result<Vec<Site>> {
    matrix
        .site_ids()
        .iter()
        .map(|key| Site::from_key(key))
        .collect()
}

#[derive(Debug, Deserialize)]
struct RegionMapRecord {
    #[serde(alias = "gene_id", alias = "region")]
    region_id: String,
    #[serde(alias = "cpg_id", alias = "site")]
    site_id: String,
}

/// Columns `region_id, site_id`.
pub fn read_region_map<P: AsRef<Path>>(path: P) -> Result<RegionMap> {
    let path = path.as_ref();
    info!("Reading region map from {}", path.display());
    let mut reader = open_table(path)?;
    let mut links = Vec::new();
    for record in reader.deserialize() {
        let record: RegionMapRecord = record?;
        links.push(RegionSiteLink::new(record.region_id, record.site_id));
    }
    let region_map = RegionMap::new(links);
    info!(
        "Region map holds {} links over {} regions.",
        region_map.len(),
        region_map.region_ids().len()
    );
    Ok(region_map)
}
