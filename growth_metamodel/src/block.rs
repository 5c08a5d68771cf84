/// block.rs — Data-block wrapper
///
/// Wraps one `DataBlock` with its residual covariance and caches the pieces
/// that only change when the parameter vector changes: `V^-1` and the
/// additive log-normalizing constant. The cache is owned per-instance (one
/// per sampler worker) — nothing here is shared across threads.
use ndarray::{Array1, Array2};

use crate::dataset::DataBlock;
use crate::error::{MetaModelError, Result};
use crate::growth::{effective_age, ModelForm};
use crate::linalg;

#[derive(Debug, Clone)]
pub struct BlockLikelihood {
    pub block: DataBlock,
    residual_std: Array1<f64>,
    v_inv: Array2<f64>,
    ln_constant: f64,
}

impl BlockLikelihood {
    pub fn new(block: DataBlock) -> Self {
        let k = block.size();
        let residual_std = match &block.fixed_variance {
            Some(v) => Array1::from(v.iter().map(|x| x.sqrt()).collect::<Vec<_>>()),
            None => Array1::zeros(k),
        };
        BlockLikelihood {
            block,
            residual_std,
            v_inv: Array2::zeros((k, k)),
            ln_constant: 0.0,
        }
    }

    pub fn size(&self) -> usize {
        self.block.size()
    }

    /// Recompute `V^-1` and `lnConstant` for the current `rho` and (if this
    /// block's variance is estimated) `sigma2_res`.
    ///
    /// `varCovFullCorr` is the outer product of per-row residual standard
    /// deviations; its inverse (entrywise reciprocal of that outer product)
    /// combines with the AR(1) correlation inverse through a Hadamard
    /// product to give `V^-1`, avoiding a general k x k matrix inversion.
    pub fn update_cov(&mut self, rho: f64, sigma2_res: Option<f64>) {
        let k = self.size();
        if self.block.fixed_variance.is_none() {
            let sigma2 = sigma2_res.expect("variance-estimated block requires sigma2_res");
            let std = (sigma2 / self.block.nb_plots).sqrt();
            self.residual_std = Array1::from_elem(k, std);
        }

        let var_cov_full_corr_inv = Array2::from_shape_fn((k, k), |(i, j)| {
            1.0 / (self.residual_std[i] * self.residual_std[j])
        });
        let r_inv = linalg::ar1_inverse(k, rho);
        self.v_inv = linalg::hadamard(&var_cov_full_corr_inv, &r_inv);

        let log_det_r = linalg::ar1_log_det(k, rho);
        let log_det_v = 2.0 * self.residual_std.iter().map(|s| s.ln()).sum::<f64>() + log_det_r;
        self.ln_constant = -0.5 * k as f64 * (2.0 * std::f64::consts::PI).ln() - 0.5 * log_det_v;
    }

    pub fn ln_constant(&self) -> f64 {
        self.ln_constant
    }

    /// Residual vector `y - mu(u)` at the current fixed effects, applying
    /// the regeneration lag if active. Entries for ages at or below the lag
    /// predict 0.
    fn residuals(&self, form: ModelForm, reg_lag: Option<f64>, u: f64, b: &[f64]) -> Array1<f64> {
        let mu: Vec<f64> = self
            .block
            .ages
            .iter()
            .map(|&age| match effective_age(age, reg_lag) {
                Some(t) => form.predict_raw(t, u, b),
                None => 0.0,
            })
            .collect();
        Array1::from(self.block.y.clone()) - Array1::from(mu)
    }

    /// `lnConstant - 1/2 * (y - mu(u))^T V^-1 (y - mu(u))`. Fails with
    /// `NegativeQuadraticForm` if the quadratic form comes out negative,
    /// which signals numerical breakdown of the cached covariance.
    /// `block_index` is only used to annotate the error.
    pub fn log_likelihood(
        &self,
        form: ModelForm,
        reg_lag: Option<f64>,
        u: f64,
        b: &[f64],
        block_index: usize,
    ) -> Result<f64> {
        let resid = self.residuals(form, reg_lag, u, b);
        let quad = linalg::quadratic_form(&resid, &self.v_inv);
        if quad < 0.0 {
            return Err(MetaModelError::NegativeQuadraticForm { block_index });
        }
        Ok(self.ln_constant - 0.5 * quad)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::growth::FormKind;

    fn block(ages: Vec<f64>, y: Vec<f64>, fixed_variance: Option<Vec<f64>>) -> DataBlock {
        let n = ages.len();
        DataBlock {
            initial_age: ages[0],
            output_type: "V".to_string(),
            time_since_start: (0..n).map(|i| i as f64).collect(),
            ages,
            y,
            nb_plots: 20.0,
            fixed_variance,
        }
    }

    #[test]
    fn degenerate_single_row_block_is_one_dim_gaussian() {
        let b = block(vec![50.0], vec![10.0], Some(vec![4.0]));
        let mut bl = BlockLikelihood::new(b);
        bl.update_cov(0.9, None);
        // k=1: ln_constant should equal the standard 1-D Gaussian normalizer.
        let expected = -0.5 * (2.0 * std::f64::consts::PI).ln() - 0.5 * 4.0_f64.ln();
        assert!((bl.ln_constant() - expected).abs() < 1e-9);
    }

    #[test]
    fn log_likelihood_never_exceeds_ln_constant() {
        let b = block(
            vec![10.0, 11.0, 12.0, 13.0],
            vec![1.0, 2.0, 3.5, 5.0],
            Some(vec![1.0, 1.0, 1.0, 1.0]),
        );
        let mut bl = BlockLikelihood::new(b);
        bl.update_cov(0.9, None);
        let form = ModelForm { kind: FormKind::ChapmanRichards, mixed: false };
        let ll = bl
            .log_likelihood(form, None, 0.0, &[100.0, 0.05, 1.3], 0)
            .unwrap();
        assert!(ll <= bl.ln_constant() + 1e-9);
    }

    #[test]
    fn variance_estimated_block_rescales_with_sigma2() {
        let b = block(vec![10.0, 11.0, 12.0], vec![1.0, 2.0, 3.0], None);
        let mut bl = BlockLikelihood::new(b);
        bl.update_cov(0.9, Some(2.0));
        assert!(bl.ln_constant().is_finite());
    }
}
