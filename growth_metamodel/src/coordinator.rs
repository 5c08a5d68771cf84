/// coordinator.rs — Model coordinator
///
/// Runs one `CandidateModel` per requested form on its own OS thread (the
/// MCMC chain is pure CPU work with no I/O to await, so a thread pool buys
/// nothing over `std::thread::spawn`), joins them all, ranks by LPML, and
/// promotes the winner to a read-only `FittedMetaModel`. Monte Carlo
/// ensemble generation afterwards uses `rayon` instead, since that workload
/// is an embarrassingly parallel batch of independent draws rather than a
/// handful of long-lived sequential chains.
use std::sync::Mutex;
use std::thread;

use ndarray::{Array1, Array2};
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::block::BlockLikelihood;
use crate::candidate::CandidateModel;
use crate::dataset::HierarchicalDataset;
use crate::error::{MetaModelError, Result};
use crate::growth::{effective_age, ModelForm};
use crate::priors::PriorHandler;
use crate::sampler::{run_chain, SamplerConfig, SamplerResult};
use crate::schema::{ParamConfigEntry, ParamSchema};

/// One candidate to fit: a model form plus an optional parameter
/// configuration override (`None` uses the form's defaults).
pub struct CandidateSpec {
    pub form: ModelForm,
    pub param_config: Option<Vec<ParamConfigEntry>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComparisonRow {
    pub form_name: String,
    pub definition: String,
    pub converged: bool,
    pub acceptance_rate: f64,
    pub log_pseudo_marginal_likelihood: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarianceOutput {
    None,
    ParamEst,
    ParamEstRe,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PredictionRow {
    pub age_yr: f64,
    pub pred: f64,
    pub variance: Option<f64>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MonteCarloRow {
    pub realization_id: usize,
    pub subject_id: usize,
    pub age_yr: f64,
    pub pred: f64,
}

fn default_param_config(form: ModelForm) -> Vec<ParamConfigEntry> {
    form.effect_names()
        .iter()
        .zip(form.default_starting_values())
        .map(|(name, start)| ParamConfigEntry {
            parameter: (*name).to_string(),
            starting_value: start,
            distribution: "Uniform".to_string(),
            dist_parms: vec![0.0, start.abs().max(1.0) * 50.0],
        })
        .collect()
}

fn build_candidate(
    spec: &CandidateSpec,
    dataset: &HierarchicalDataset,
    variance_estimated: bool,
) -> Result<CandidateModel> {
    let reg_lag_active = dataset.minimum_stratum_age <= 10.0;
    let n_blocks = dataset.blocks.len();
    let owned_config;
    let configs: &[ParamConfigEntry] = match &spec.param_config {
        Some(c) => c,
        None => {
            owned_config = default_param_config(spec.form);
            &owned_config
        }
    };

    let schema = ParamSchema::build(spec.form, variance_estimated, reg_lag_active, n_blocks, configs)?;
    let priors = PriorHandler::new(&schema);
    let blocks: Vec<BlockLikelihood> = dataset
        .blocks
        .iter()
        .cloned()
        .map(BlockLikelihood::new)
        .collect();

    Ok(CandidateModel { form: spec.form, schema, priors, blocks })
}

/// Fits every candidate concurrently and returns the winning, read-only
/// meta-model plus the full comparison table.
pub fn fit(
    dataset: &HierarchicalDataset,
    candidates: &[CandidateSpec],
    config: &crate::config::FitConfig,
) -> Result<FittedMetaModel> {
    let variance_estimated =
        config.force_estimate_residual_variance || dataset.global_residual_cov.is_none();

    info!(n_candidates = candidates.len(), n_blocks = dataset.blocks.len(), variance_estimated, "starting fit");

    let handles: Vec<_> = candidates
        .iter()
        .enumerate()
        .map(|(seed, spec)| {
            let built = build_candidate(spec, dataset, variance_estimated);
            let form = spec.form;
            let cfg = config.sampler.clone();
            thread::spawn(move || -> (ModelForm, Result<(CandidateModel, SamplerResult)>) {
                match built {
                    Ok(mut candidate) => {
                        let mut rng = rand::rngs::StdRng::seed_from_u64(seed as u64);
                        let result = run_chain(&mut candidate, &cfg, &mut rng);
                        (form, Ok((candidate, result)))
                    }
                    Err(e) => (form, Err(e)),
                }
            })
        })
        .collect();

    let mut comparison = Vec::with_capacity(handles.len());
    let mut best: Option<(CandidateModel, SamplerResult)> = None;

    for handle in handles {
        let (form, outcome) = handle.join().expect("sampler worker thread panicked");
        match outcome {
            Ok((candidate, result)) => {
                comparison.push(ComparisonRow {
                    form_name: form.to_string(),
                    definition: form.definition(),
                    converged: result.has_converged,
                    acceptance_rate: result.acceptance_rate,
                    log_pseudo_marginal_likelihood: result.log_pseudo_marginal_likelihood,
                });
                if result.has_converged {
                    let is_better = match &best {
                        Some((_, b)) => result.log_pseudo_marginal_likelihood > b.log_pseudo_marginal_likelihood,
                        None => true,
                    };
                    if is_better {
                        best = Some((candidate, result));
                    }
                }
            }
            Err(e) => return Err(e),
        }
    }

    comparison.sort_by(|a, b| {
        b.log_pseudo_marginal_likelihood
            .partial_cmp(&a.log_pseudo_marginal_likelihood)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let (candidate, result) = best.ok_or(MetaModelError::NoCandidateConverged)?;

    info!(
        winner = %candidate.form,
        lpml = result.log_pseudo_marginal_likelihood,
        n_converged = comparison.iter().filter(|c| c.converged).count(),
        "fit concluded"
    );

    Ok(FittedMetaModel {
        form: candidate.form,
        schema: candidate.schema,
        final_parameter_estimates: result.final_parameter_estimates,
        parameter_covariance: result.parameter_covariance,
        thinned_sample: result.thinned_sample,
        log_pseudo_marginal_likelihood: result.log_pseudo_marginal_likelihood,
        comparison,
        variance_guard: Mutex::new(()),
    })
}

/// The winning candidate's read-only, thread-safe prediction surface.
pub struct FittedMetaModel {
    form: ModelForm,
    schema: ParamSchema,
    final_parameter_estimates: Array1<f64>,
    parameter_covariance: Array2<f64>,
    thinned_sample: Vec<Array1<f64>>,
    log_pseudo_marginal_likelihood: f64,
    comparison: Vec<ComparisonRow>,
    /// Serializes `predict_variance`'s access to the covariance submatrix
    /// so the public call is atomic from the caller's perspective.
    /// Prediction itself reads only immutable state and needs no lock.
    variance_guard: Mutex<()>,
}

impl FittedMetaModel {
    #[cfg(test)]
    pub(crate) fn for_test(
        form: ModelForm,
        schema: ParamSchema,
        final_parameter_estimates: Array1<f64>,
        parameter_covariance: Array2<f64>,
        log_pseudo_marginal_likelihood: f64,
    ) -> Self {
        FittedMetaModel {
            form,
            schema,
            final_parameter_estimates,
            parameter_covariance,
            thinned_sample: Vec::new(),
            log_pseudo_marginal_likelihood,
            comparison: Vec::new(),
            variance_guard: Mutex::new(()),
        }
    }

    pub fn form(&self) -> ModelForm {
        self.form
    }

    pub fn comparison_table(&self) -> &[ComparisonRow] {
        &self.comparison
    }

    pub fn log_pseudo_marginal_likelihood(&self) -> f64 {
        self.log_pseudo_marginal_likelihood
    }

    pub fn final_parameter_estimates(&self) -> &Array1<f64> {
        &self.final_parameter_estimates
    }

    pub fn parameter_covariance(&self) -> &Array2<f64> {
        &self.parameter_covariance
    }

    pub fn schema_names(&self) -> Vec<String> {
        (0..self.schema.len()).map(|i| self.schema.name_at(i).to_string()).collect()
    }

    pub fn n_fixed_effects(&self) -> usize {
        self.schema.n_fixed_effects
    }

    pub fn mixed(&self) -> bool {
        self.schema.mixed
    }

    fn fixed_effects(&self) -> Vec<f64> {
        self.schema
            .fixed_effect_indices()
            .map(|i| self.final_parameter_estimates[i])
            .collect()
    }

    fn reg_lag(&self) -> Option<f64> {
        self.schema
            .index_of(crate::schema::REG_LAG_NAME)
            .map(|i| self.final_parameter_estimates[i])
    }

    fn sigma_u(&self) -> Option<f64> {
        self.schema
            .index_of(crate::schema::SIGMA_U_NAME)
            .map(|i| self.final_parameter_estimates[i])
    }

    /// `predict(ageYr, timeSinceStart)`: deterministic point estimate at
    /// `u = 0` with the regeneration lag applied.
    pub fn predict(&self, age_yr: f64, _time_since_start: f64) -> f64 {
        let b = self.fixed_effects();
        match effective_age(age_yr, self.reg_lag()) {
            Some(t) => self.form.predict_raw(t, 0.0, &b),
            None => 0.0,
        }
    }

    /// `predictionVariance(age, time, includeRandomEffect)`.
    pub fn predict_variance(&self, age_yr: f64, _time_since_start: f64, include_random_effect: bool) -> f64 {
        let _guard = self.variance_guard.lock().expect("variance guard poisoned");

        let b = self.fixed_effects();
        let t = match effective_age(age_yr, self.reg_lag()) {
            Some(t) => t,
            None => return 0.0,
        };

        let grad = self.form.gradient_raw(t, 0.0, &b);
        let n_fixed = self.schema.n_fixed_effects;
        let mut var = 0.0;
        for i in 0..n_fixed {
            for j in 0..n_fixed {
                var += grad[i] * self.parameter_covariance[[i, j]] * grad[j];
            }
        }

        if include_random_effect && self.form.mixed {
            if let Some(sigma_u) = self.sigma_u() {
                var += grad[0] * grad[0] * sigma_u * sigma_u;
            }
        }

        var
    }

    pub fn predictions(&self, ages: &[f64], time_since_start: f64, variance_output: VarianceOutput) -> Vec<PredictionRow> {
        ages.iter()
            .map(|&age| {
                let pred = self.predict(age, time_since_start);
                let variance = match variance_output {
                    VarianceOutput::None => None,
                    VarianceOutput::ParamEst => Some(self.predict_variance(age, time_since_start, false)),
                    VarianceOutput::ParamEstRe => Some(self.predict_variance(age, time_since_start, true)),
                };
                PredictionRow { age_yr: age, pred, variance }
            })
            .collect()
    }

    /// `monteCarloPredictions(ages, time, nbSubjects, nbRealizations)`:
    /// draws fixed effects from `N(finalParameterEstimates, parameterCovariance)`
    /// over the fixed-effects subspace, plus one `u ~ N(0, sigma_u^2)` per
    /// subject for mixed forms. One row per `(realization, subject, age)`.
    pub fn monte_carlo_predictions(
        &self,
        ages: &[f64],
        _time_since_start: f64,
        nb_subjects: usize,
        nb_realizations: usize,
    ) -> Vec<MonteCarloRow> {
        let n_fixed = self.schema.n_fixed_effects;
        let mut fixed_cov = Array2::zeros((n_fixed, n_fixed));
        for i in 0..n_fixed {
            for j in 0..n_fixed {
                fixed_cov[[i, j]] = self.parameter_covariance[[i, j]];
            }
        }
        let chol = crate::linalg::cholesky_lower(&fixed_cov);
        let mean = self.fixed_effects();
        let reg_lag = self.reg_lag();
        let sigma_u = self.sigma_u();

        (0..nb_realizations)
            .into_par_iter()
            .flat_map_iter(|realization_id| {
                let mut rng = rand::rngs::StdRng::seed_from_u64(realization_id as u64);
                let z: Vec<f64> = (0..n_fixed)
                    .map(|_| Normal::new(0.0, 1.0).unwrap().sample(&mut rng))
                    .collect();
                let mut b = mean.clone();
                for i in 0..n_fixed {
                    let mut delta = 0.0;
                    for j in 0..=i {
                        delta += chol[[i, j]] * z[j];
                    }
                    b[i] += delta;
                }

                let mut rows = Vec::with_capacity(nb_subjects * ages.len());
                for subject_id in 0..nb_subjects {
                    let u = if self.form.mixed {
                        match sigma_u {
                            Some(s) if s > 0.0 => Normal::new(0.0, s).unwrap().sample(&mut rng),
                            _ => 0.0,
                        }
                    } else {
                        0.0
                    };
                    for &age in ages {
                        let pred = match effective_age(age, reg_lag) {
                            Some(t) => self.form.predict_raw(t, u, &b),
                            None => 0.0,
                        };
                        rows.push(MonteCarloRow {
                            realization_id,
                            subject_id,
                            age_yr: age,
                            pred,
                        });
                    }
                }
                rows
            })
            .collect()
    }
}
