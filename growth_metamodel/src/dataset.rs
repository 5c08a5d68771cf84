/// dataset.rs — Hierarchical data structure
///
/// Joins per-initial-age simulator output (`ResultSet`) into the single
/// observation vector grouped by `(initialAge, outputType)`. Each simulator
/// output corresponds to exactly one `initialAge` (one `ResultSet` per
/// initial age), so grouping by initial age after filtering to one output
/// type reduces to one `DataBlock` per ResultSet that carries rows for that
/// output type.
use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::error::{MetaModelError, Result};

/// One row of a `ResultSet`'s table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultRow {
    #[serde(rename = "DateYr")]
    pub date_yr: i64,
    #[serde(rename = "OutputType")]
    pub output_type: String,
    #[serde(rename = "Estimate")]
    pub estimate: f64,
    #[serde(rename = "Variance")]
    pub variance: Option<f64>,
    #[serde(rename = "NbPlots")]
    pub nb_plots: u32,
    #[serde(rename = "VarianceEstimatorType")]
    pub variance_estimator_type: String,
}

/// The external `ResultSet` input contract, owned concretely here since the
/// upstream growth simulator is out of scope for this crate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultSet {
    pub initial_age: f64,
    pub rows: Vec<ResultRow>,
    pub nb_plots: u32,
    pub nb_realizations: u32,
    pub climate_change_scenario: String,
    pub growth_model: String,
}

impl ResultSet {
    /// Unique output-type names, in first-seen order.
    pub fn output_types(&self) -> Vec<String> {
        let mut seen = ahash::AHashSet::default();
        let mut out = Vec::new();
        for row in &self.rows {
            if seen.insert(row.output_type.clone()) {
                out.push(row.output_type.clone());
            }
        }
        out
    }

    pub fn is_compatible(&self, other: &ResultSet) -> bool {
        self.growth_model == other.growth_model
            && self.nb_realizations == other.nb_realizations
            && self.climate_change_scenario == other.climate_change_scenario
    }

    /// Diagonal residual covariance contributed by this ResultSet's rows for
    /// `output_type`, in row order. `None` if any matching row lacks a
    /// variance estimate (i.e. variance must be estimated as a model
    /// parameter instead).
    pub fn compute_var_cov_error_term(&self, output_type: &str) -> Option<Array2<f64>> {
        let variances: Vec<f64> = self
            .rows
            .iter()
            .filter(|r| r.output_type == output_type)
            .map(|r| r.variance)
            .collect::<Option<Vec<f64>>>()?;
        let k = variances.len();
        let mut m = Array2::zeros((k, k));
        for (i, v) in variances.into_iter().enumerate() {
            m[[i, i]] = v;
        }
        Some(m)
    }
}

/// Accumulates compatible `ResultSet`s during a meta-model's data-entry
/// phase, enforcing the cross-set compatibility invariant.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResultSetCollection {
    sets: Vec<ResultSet>,
}

impl ResultSetCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, rs: ResultSet) -> Result<()> {
        if let Some(first) = self.sets.first() {
            if !first.is_compatible(&rs) {
                return Err(MetaModelError::IncompatibleScriptResult(format!(
                    "ResultSet for initialAge={} is incompatible with the group (simulator={}, realizations={}, scenario={})",
                    rs.initial_age, first.growth_model, first.nb_realizations, first.climate_change_scenario
                )));
            }
        }
        self.sets.push(rs);
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    pub fn sets(&self) -> &[ResultSet] {
        &self.sets
    }
}

/// One `(initialAge, outputType)` bucket of repeated measurements.
#[derive(Debug, Clone)]
pub struct DataBlock {
    pub initial_age: f64,
    pub output_type: String,
    /// Stratum age per row: `initialAge + yearsSinceStart`.
    pub ages: Vec<f64>,
    pub time_since_start: Vec<f64>,
    pub y: Vec<f64>,
    pub nb_plots: f64,
    /// Fixed diagonal residual variance per row, if the simulator supplied
    /// one; `None` means this block's variance is a model parameter.
    pub fixed_variance: Option<Vec<f64>>,
}

impl DataBlock {
    pub fn size(&self) -> usize {
        self.y.len()
    }
}

pub struct HierarchicalDataset {
    pub blocks: Vec<DataBlock>,
    pub minimum_stratum_age: f64,
    /// Block-diagonal join of each block's fixed residual covariance, only
    /// if every block supplied one.
    pub global_residual_cov: Option<Array2<f64>>,
}

impl HierarchicalDataset {
    pub fn build(collection: &ResultSetCollection, output_type: &str) -> Result<Self> {
        let known: Vec<String> = collection
            .sets()
            .iter()
            .flat_map(|rs| rs.output_types())
            .collect();
        if !known.iter().any(|t| t == output_type) {
            return Err(MetaModelError::UnknownOutputType(output_type.to_string()));
        }

        let mut blocks = Vec::new();
        let mut fixed_cov_blocks = Vec::new();
        let mut all_fixed = true;

        for rs in collection.sets() {
            let matching: Vec<&ResultRow> = rs
                .rows
                .iter()
                .filter(|r| r.output_type == output_type)
                .collect();
            if matching.is_empty() {
                continue;
            }

            let ages = matching
                .iter()
                .map(|r| rs.initial_age + r.date_yr as f64)
                .collect();
            let time_since_start = matching.iter().map(|r| r.date_yr as f64).collect();
            let y = matching.iter().map(|r| r.estimate).collect();
            let nb_plots = matching[0].nb_plots as f64;

            let fixed_variance = matching
                .iter()
                .map(|r| r.variance)
                .collect::<Option<Vec<f64>>>();
            if fixed_variance.is_none() {
                all_fixed = false;
            }

            if let Some(cov) = rs.compute_var_cov_error_term(output_type) {
                fixed_cov_blocks.push(cov);
            }

            blocks.push(DataBlock {
                initial_age: rs.initial_age,
                output_type: output_type.to_string(),
                ages,
                time_since_start,
                y,
                nb_plots,
                fixed_variance,
            });
        }

        let minimum_stratum_age = blocks
            .iter()
            .map(|b| b.initial_age)
            .fold(f64::INFINITY, f64::min);

        let global_residual_cov = if all_fixed && fixed_cov_blocks.len() == blocks.len() {
            Some(crate::linalg::block_diagonal(&fixed_cov_blocks))
        } else {
            None
        };

        Ok(HierarchicalDataset {
            blocks,
            minimum_stratum_age,
            global_residual_cov,
        })
    }
}
