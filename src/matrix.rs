// matrix.rs

use std::collections::HashMap;

use log::debug;
use ndarray::{Array2, ArrayView1, ArrayView2, Axis};

use crate::error::{RegionalPcaError, Result};

/// Sites x samples measurement matrix (beta values or M-values).
///
/// Site and sample ids are unique and every value is present. Values are
/// never modified after construction; region processing works on copies.
#[derive(Debug, Clone, PartialEq)]
pub struct MeasurementMatrix {
    site_ids: Vec<String>,
    sample_ids: Vec<String>,
    values: Array2<f64>,
    site_index: HashMap<String, usize>,
}

impl MeasurementMatrix {
    pub fn new(site_ids: Vec<String>, sample_ids: Vec<String>, values: Array2<f64>) -> Result<Self> {
        let (n_rows, n_cols) = values.dim();
        if n_rows != site_ids.len() || n_cols != sample_ids.len() {
            return Err(RegionalPcaError::DimensionMismatch(format!(
                "values are {} x {} but {} site ids and {} sample ids were given",
                n_rows,
                n_cols,
                site_ids.len(),
                sample_ids.len()
            )));
        }
        if n_cols == 0 {
            return Err(RegionalPcaError::EmptyInput(
                "measurement matrix has no samples".to_string(),
            ));
        }

        let mut sample_seen: HashMap<&str, usize> = HashMap::with_capacity(n_cols);
        for (idx, sample) in sample_ids.iter().enumerate() {
            if sample_seen.insert(sample.as_str(), idx).is_some() {
                return Err(RegionalPcaError::DuplicateIdentifier {
                    kind: "sample",
                    id: sample.clone(),
                });
            }
        }

        let mut site_index: HashMap<String, usize> = HashMap::with_capacity(n_rows);
        for (idx, site) in site_ids.iter().enumerate() {
            if site_index.insert(site.clone(), idx).is_some() {
                return Err(RegionalPcaError::DuplicateIdentifier {
                    kind: "site",
                    id: site.clone(),
                });
            }
        }

        if let Some(((row, col), _)) = values.indexed_iter().find(|(_, v)| v.is_nan()) {
            return Err(RegionalPcaError::MissingValue {
                site: site_ids[row].clone(),
                sample: sample_ids[col].clone(),
            });
        }

        debug!("MeasurementMatrix: {} sites x {} samples.", n_rows, n_cols);
        Ok(Self {
            site_ids,
            sample_ids,
            values,
            site_index,
        })
    }

    /// Builds a matrix from site-major rows.
    pub fn from_rows(
        site_ids: Vec<String>,
        sample_ids: Vec<String>,
        rows: Vec<Vec<f64>>,
    ) -> Result<Self> {
        let n_samples = sample_ids.len();
        let mut flat = Vec::with_capacity(rows.len() * n_samples);
        for (idx, row) in rows.iter().enumerate() {
            if row.len() != n_samples {
                return Err(RegionalPcaError::DimensionMismatch(format!(
                    "row {} ('{}') has {} values, expected {}",
                    idx,
                    site_ids.get(idx).map(String::as_str).unwrap_or("?"),
                    row.len(),
                    n_samples
                )));
            }
            flat.extend_from_slice(row);
        }
        let values = Array2::from_shape_vec((rows.len(), n_samples), flat)
            .map_err(|e| RegionalPcaError::DimensionMismatch(e.to_string()))?;
        Self::new(site_ids, sample_ids, values)
    }

    pub fn n_sites(&self) -> usize {
        self.site_ids.len()
    }

    pub fn n_samples(&self) -> usize {
        self.sample_ids.len()
    }

    pub fn site_ids(&self) -> &[String] {
        &self.site_ids
    }

    pub fn sample_ids(&self) -> &[String] {
        &self.sample_ids
    }

    pub fn values(&self) -> ArrayView2<'_, f64> {
        self.values.view()
    }

    pub fn site_row(&self, site_id: &str) -> Option<usize> {
        self.site_index.get(site_id).copied()
    }

    pub fn row(&self, row: usize) -> ArrayView1<'_, f64> {
        self.values.row(row)
    }

    /// Owned copy of the given rows, in the given order.
    pub fn select_rows(&self, rows: &[usize]) -> Array2<f64> {
        self.values.select(Axis(0), rows)
    }
}
