/// candidate.rs — One candidate growth-model instance
///
/// Bundles the pieces the sampler needs to evaluate a posterior: a growth
/// form, its parameter schema, prior handler, and owned block likelihoods.
/// One `CandidateModel` is built per entry in the coordinator's candidate
/// set and handed to exactly one sampler worker — nothing here is shared
/// across threads.
use ndarray::Array1;

use crate::block::BlockLikelihood;
use crate::error::Result;
use crate::growth::ModelForm;
use crate::priors::PriorHandler;
use crate::schema::{ParamSchema, REG_LAG_NAME};

pub struct CandidateModel {
    pub form: ModelForm,
    pub schema: ParamSchema,
    pub priors: PriorHandler,
    pub blocks: Vec<BlockLikelihood>,
}

impl CandidateModel {
    pub fn reg_lag(&self, parms: &Array1<f64>) -> Option<f64> {
        self.schema.index_of(REG_LAG_NAME).map(|i| parms[i])
    }

    fn block_random_effect(&self, parms: &Array1<f64>, block_idx: usize) -> f64 {
        if self.schema.mixed {
            parms[self.schema.random_effect_index(block_idx)]
        } else {
            0.0
        }
    }

    /// Recomputes every block's cached covariance for `parms`, then sums
    /// the per-block log-likelihoods. Propagates `NegativeQuadraticForm` up
    /// unchanged — callers decide how to treat it (the sampler treats it as
    /// a terminal non-convergence signal).
    pub fn log_likelihood(&mut self, parms: &Array1<f64>) -> Result<f64> {
        let rho_idx = self.schema.index_of(crate::schema::RHO_NAME).unwrap();
        let rho = parms[rho_idx];
        let sigma2 = self
            .schema
            .index_of(crate::schema::SIGMA2_RES_NAME)
            .map(|i| parms[i]);
        let reg_lag = self.reg_lag(parms);

        let b: Vec<f64> = self.schema.fixed_effect_indices().map(|i| parms[i]).collect();

        let mut total = 0.0;
        for (idx, block) in self.blocks.iter_mut().enumerate() {
            block.update_cov(rho, sigma2);
            let u = if self.schema.mixed {
                parms[self.schema.random_effect_index(idx)]
            } else {
                0.0
            };
            total += block.log_likelihood(self.form, reg_lag, u, &b, idx)?;
        }
        Ok(total)
    }

    pub fn log_prior(&self, parms: &Array1<f64>) -> f64 {
        self.priors.log_prior(parms, &self.schema)
    }

    /// Per-block log-likelihood vector at `parms`, used by the LPML (CPO)
    /// estimator. Assumes `log_likelihood` (or an equivalent `update_cov`
    /// pass) has already been called for this `parms`, since it reuses each
    /// block's cached covariance.
    pub fn per_block_log_likelihood(&self, parms: &Array1<f64>) -> Result<Vec<f64>> {
        let reg_lag = self.reg_lag(parms);
        let b: Vec<f64> = self.schema.fixed_effect_indices().map(|i| parms[i]).collect();
        self.blocks
            .iter()
            .enumerate()
            .map(|(idx, block)| {
                let u = self.block_random_effect(parms, idx);
                block.log_likelihood(self.form, reg_lag, u, &b, idx)
            })
            .collect()
    }
}
