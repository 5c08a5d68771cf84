/// priors.rs — Prior handler
///
/// One uniform density per scalar parameter (fixed effects, `rho`,
/// `sigma_u`, `sigma2_res`, `regLag`), and a hierarchical Gaussian prior for
/// each per-block random-effect draw: `u_i ~ N(0, sigma_u^2)`. The
/// log-density is the single quantity the sampler needs; out-of-bounds
/// scalar values (or a non-positive `sigma_u`) contribute `-infinity`, which
/// the Metropolis acceptance ratio turns into an automatic rejection.
use ndarray::Array1;
use statrs::distribution::{Continuous, Normal};

use crate::schema::{ParamSchema, SIGMA_U_NAME};

#[derive(Debug, Clone)]
pub struct PriorHandler {
    mixed: bool,
}

impl PriorHandler {
    pub fn new(schema: &ParamSchema) -> Self {
        PriorHandler { mixed: schema.mixed }
    }

    /// `log p(parms)` — sum of the scalar uniform log-densities plus, for
    /// mixed models, the hierarchical `N(0, sigma_u^2)` log-density of every
    /// random-effect draw.
    pub fn log_prior(&self, parms: &Array1<f64>, schema: &ParamSchema) -> f64 {
        let mut lp = 0.0;

        for i in 0..schema.n_scalar() {
            let bounds = schema.scalar_bounds[i];
            if parms[i] < bounds.lower || parms[i] > bounds.upper {
                return f64::NEG_INFINITY;
            }
            lp += -(bounds.upper - bounds.lower).ln();
        }

        if self.mixed {
            let sigma_u = parms[schema.index_of(SIGMA_U_NAME).expect("mixed schema has sigma_u")];
            if sigma_u <= 0.0 {
                return f64::NEG_INFINITY;
            }
            let dist = match Normal::new(0.0, sigma_u) {
                Ok(d) => d,
                Err(_) => return f64::NEG_INFINITY,
            };
            for b in 0..schema.n_blocks {
                let u = parms[schema.random_effect_index(b)];
                lp += dist.ln_pdf(u);
            }
        }

        lp
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::growth::{FormKind, ModelForm};
    use crate::schema::ParamConfigEntry;

    fn cfg(name: &str, start: f64, lo: f64, hi: f64) -> ParamConfigEntry {
        ParamConfigEntry {
            parameter: name.to_string(),
            starting_value: start,
            distribution: "Uniform".to_string(),
            dist_parms: vec![lo, hi],
        }
    }

    #[test]
    fn out_of_bounds_scalar_is_neg_infinity() {
        let form = ModelForm { kind: FormKind::Exponential, mixed: false };
        let configs = vec![cfg("b1", 100.0, 0.0, 500.0), cfg("b2", 0.02, 0.0, 1.0)];
        let schema = ParamSchema::build(form, false, false, 1, &configs).unwrap();
        let priors = PriorHandler::new(&schema);
        let mut parms = schema.starting_values.clone();
        let rho_idx = schema.index_of(crate::schema::RHO_NAME).unwrap();
        parms[rho_idx] = 5.0; // outside (0.01, 0.99) default bound
        assert_eq!(priors.log_prior(&parms, &schema), f64::NEG_INFINITY);
    }

    #[test]
    fn mixed_model_random_effects_contribute_finite_density_at_zero() {
        let form = ModelForm { kind: FormKind::Exponential, mixed: true };
        let configs = vec![cfg("b1", 100.0, 0.0, 500.0), cfg("b2", 0.02, 0.0, 1.0)];
        let schema = ParamSchema::build(form, false, false, 2, &configs).unwrap();
        let priors = PriorHandler::new(&schema);
        let parms = schema.starting_values.clone();
        assert!(priors.log_prior(&parms, &schema).is_finite());
    }
}
