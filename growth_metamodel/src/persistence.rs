/// persistence.rs — Saved meta-model forms
///
/// The on-disk format itself is an external collaborator's concern (XML in
/// the original forestry application); what this module owns is the
/// in-process JSON shape a caller can round-trip through, plus the metadata
/// one-liners that travel alongside a persisted fit. `SavedMetaModel` keeps
/// the thinned MCMC sample; `SavedMetaModelLight` drops it, matching the
/// full-vs-light distinction in a meta-model's lifecycle.
use chrono::{DateTime, Utc};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use crate::coordinator::{ComparisonRow, FittedMetaModel};
use crate::error::{MetaModelError, Result};
use crate::growth::ModelForm;

/// Growth block of the persisted form: provenance of the simulator run
/// this meta-model was fitted from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrowthMetadata {
    pub geo_domain: String,
    pub data_source: String,
    pub data_source_years: String,
    pub nb_realizations: u32,
    pub climate_change_option: String,
    pub growth_model: String,
    pub upscaling: String,
    pub nb_plots: u32,
}

/// Fit block of the persisted form: identifies which fit this is.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitMetadata {
    pub time_stamp: DateTime<Utc>,
    pub output_type: String,
    pub fit_model: String,
    pub stratum_group: String,
    pub leading_species: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavedMetaModel {
    pub form: String,
    pub schema_names: Vec<String>,
    pub n_fixed_effects: usize,
    pub mixed: bool,
    pub final_parameter_estimates: Vec<f64>,
    pub parameter_covariance: Vec<Vec<f64>>,
    pub thinned_sample: Vec<Vec<f64>>,
    pub log_pseudo_marginal_likelihood: f64,
    pub comparison: Vec<ComparisonRow>,
    pub growth: GrowthMetadata,
    pub fit: FitMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavedMetaModelLight {
    pub form: String,
    pub schema_names: Vec<String>,
    pub n_fixed_effects: usize,
    pub mixed: bool,
    pub final_parameter_estimates: Vec<f64>,
    pub parameter_covariance: Vec<Vec<f64>>,
    pub log_pseudo_marginal_likelihood: f64,
    pub comparison: Vec<ComparisonRow>,
    pub growth: GrowthMetadata,
    pub fit: FitMetadata,
}

impl SavedMetaModel {
    pub fn from_fitted(model: &FittedMetaModel, growth: GrowthMetadata, fit: FitMetadata) -> Self {
        SavedMetaModel {
            form: model.form().to_string(),
            schema_names: model.schema_names(),
            n_fixed_effects: model.n_fixed_effects(),
            mixed: model.mixed(),
            final_parameter_estimates: model.final_parameter_estimates().to_vec(),
            parameter_covariance: matrix_to_rows(model.parameter_covariance()),
            thinned_sample: Vec::new(),
            log_pseudo_marginal_likelihood: model.log_pseudo_marginal_likelihood(),
            comparison: model.comparison_table().to_vec(),
            growth,
            fit,
        }
    }

    pub fn to_light(&self) -> SavedMetaModelLight {
        SavedMetaModelLight {
            form: self.form.clone(),
            schema_names: self.schema_names.clone(),
            n_fixed_effects: self.n_fixed_effects,
            mixed: self.mixed,
            final_parameter_estimates: self.final_parameter_estimates.clone(),
            parameter_covariance: self.parameter_covariance.clone(),
            log_pseudo_marginal_likelihood: self.log_pseudo_marginal_likelihood,
            comparison: self.comparison.clone(),
            growth: self.growth.clone(),
            fit: self.fit.clone(),
        }
    }
}

fn matrix_to_rows(m: &Array2<f64>) -> Vec<Vec<f64>> {
    (0..m.nrows()).map(|i| m.row(i).to_vec()).collect()
}

fn rows_to_matrix(rows: &[Vec<f64>]) -> Array2<f64> {
    let k = rows.len();
    let mut out = Array2::zeros((k, k));
    for (i, row) in rows.iter().enumerate() {
        for (j, v) in row.iter().enumerate() {
            out[[i, j]] = *v;
        }
    }
    out
}

/// Rehydrate a `predict`/`predictionVariance`-capable view from a saved
/// model, without needing the original blocks or MCMC sample. This is
/// deliberately a standalone function rather than a full `FittedMetaModel`
/// constructor: the saved form has already thrown away the data blocks
/// that `fit` needed, and predicting never touches them again.
pub struct RehydratedModel {
    form: ModelForm,
    n_fixed_effects: usize,
    final_parameter_estimates: Array1<f64>,
    parameter_covariance: Array2<f64>,
    reg_lag_index: Option<usize>,
    sigma_u_index: Option<usize>,
}

impl RehydratedModel {
    pub fn from_saved(saved: &SavedMetaModel) -> Result<Self> {
        let form: ModelForm = saved
            .form
            .parse()
            .map_err(|_| MetaModelError::Configuration(format!("unrecognized saved form: {}", saved.form)))?;
        let reg_lag_index = saved
            .schema_names
            .iter()
            .position(|n| n == crate::schema::REG_LAG_NAME);
        let sigma_u_index = saved
            .schema_names
            .iter()
            .position(|n| n == crate::schema::SIGMA_U_NAME);

        Ok(RehydratedModel {
            form,
            n_fixed_effects: saved.n_fixed_effects,
            final_parameter_estimates: Array1::from(saved.final_parameter_estimates.clone()),
            parameter_covariance: rows_to_matrix(&saved.parameter_covariance),
            reg_lag_index,
            sigma_u_index,
        })
    }

    pub fn from_light(saved: &SavedMetaModelLight) -> Result<Self> {
        let form: ModelForm = saved
            .form
            .parse()
            .map_err(|_| MetaModelError::Configuration(format!("unrecognized saved form: {}", saved.form)))?;
        let reg_lag_index = saved
            .schema_names
            .iter()
            .position(|n| n == crate::schema::REG_LAG_NAME);
        let sigma_u_index = saved
            .schema_names
            .iter()
            .position(|n| n == crate::schema::SIGMA_U_NAME);

        Ok(RehydratedModel {
            form,
            n_fixed_effects: saved.n_fixed_effects,
            final_parameter_estimates: Array1::from(saved.final_parameter_estimates.clone()),
            parameter_covariance: rows_to_matrix(&saved.parameter_covariance),
            reg_lag_index,
            sigma_u_index,
        })
    }

    pub fn predict(&self, age_yr: f64, _time_since_start: f64) -> f64 {
        let b: Vec<f64> = (0..self.n_fixed_effects)
            .map(|i| self.final_parameter_estimates[i])
            .collect();
        let reg_lag = self.reg_lag_index.map(|i| self.final_parameter_estimates[i]);
        match crate::growth::effective_age(age_yr, reg_lag) {
            Some(t) => self.form.predict_raw(t, 0.0, &b),
            None => 0.0,
        }
    }

    pub fn predict_variance(&self, age_yr: f64, _time_since_start: f64, include_random_effect: bool) -> f64 {
        let b: Vec<f64> = (0..self.n_fixed_effects)
            .map(|i| self.final_parameter_estimates[i])
            .collect();
        let reg_lag = self.reg_lag_index.map(|i| self.final_parameter_estimates[i]);
        let t = match crate::growth::effective_age(age_yr, reg_lag) {
            Some(t) => t,
            None => return 0.0,
        };
        let grad = self.form.gradient_raw(t, 0.0, &b);
        let mut var = 0.0;
        for i in 0..self.n_fixed_effects {
            for j in 0..self.n_fixed_effects {
                var += grad[i] * self.parameter_covariance[[i, j]] * grad[j];
            }
        }
        if include_random_effect && self.form.mixed {
            if let Some(sigma_u) = self.sigma_u_index.map(|i| self.final_parameter_estimates[i]) {
                var += grad[0] * grad[0] * sigma_u * sigma_u;
            }
        }
        var
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_growth() -> GrowthMetadata {
        GrowthMetadata {
            geo_domain: "QC".into(),
            data_source: "Artemis2009".into(),
            data_source_years: "2000-2020".into(),
            nb_realizations: 100,
            climate_change_option: "baseline".into(),
            growth_model: "Artemis2009".into(),
            upscaling: "none".into(),
            nb_plots: 40,
        }
    }

    fn dummy_fit() -> FitMetadata {
        FitMetadata {
            time_stamp: DateTime::<Utc>::from_timestamp(0, 0).unwrap(),
            output_type: "AliveVolume_AllSpecies".into(),
            fit_model: "ChapmanRichards".into(),
            stratum_group: "RS38".into(),
            leading_species: "SAB".into(),
        }
    }

    #[test]
    fn light_round_trip_preserves_point_estimate_and_covariance() {
        let names = vec!["b1".to_string(), "b2".to_string(), "rho".to_string()];
        let saved = SavedMetaModel {
            form: "Exponential".to_string(),
            schema_names: names,
            n_fixed_effects: 2,
            mixed: false,
            final_parameter_estimates: vec![120.0, 0.02, 0.5],
            parameter_covariance: vec![
                vec![1.0, 0.0, 0.0],
                vec![0.0, 0.0001, 0.0],
                vec![0.0, 0.0, 0.001],
            ],
            thinned_sample: vec![vec![120.0, 0.02, 0.5]; 10],
            log_pseudo_marginal_likelihood: -42.0,
            comparison: Vec::new(),
            growth: dummy_growth(),
            fit: dummy_fit(),
        };
        let light = saved.to_light();

        let full_model = RehydratedModel::from_saved(&saved).unwrap();
        let light_model = RehydratedModel::from_light(&light).unwrap();

        for age in [0.0, 10.0, 30.0, 60.0] {
            assert_eq!(full_model.predict(age, 0.0), light_model.predict(age, 0.0));
            assert_eq!(
                full_model.predict_variance(age, 0.0, false),
                light_model.predict_variance(age, 0.0, false)
            );
        }
    }

    #[test]
    fn json_round_trip_preserves_all_fields() {
        let saved = SavedMetaModel {
            form: "ChapmanRichards".to_string(),
            schema_names: vec!["b1".into(), "b2".into(), "b3".into(), "rho".into()],
            n_fixed_effects: 3,
            mixed: false,
            final_parameter_estimates: vec![120.0, 0.05, 1.3, 0.6],
            parameter_covariance: vec![vec![0.0; 4]; 4],
            thinned_sample: Vec::new(),
            log_pseudo_marginal_likelihood: -12.5,
            comparison: Vec::new(),
            growth: dummy_growth(),
            fit: dummy_fit(),
        };
        let json = serde_json::to_string(&saved).unwrap();
        let back: SavedMetaModel = serde_json::from_str(&json).unwrap();
        assert_eq!(saved.final_parameter_estimates, back.final_parameter_estimates);
        assert_eq!(saved.form, back.form);
    }
}
