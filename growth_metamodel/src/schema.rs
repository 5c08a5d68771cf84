/// schema.rs — Parameter schema
///
/// Owns the single `name -> index` map that every other component treats as
/// ground truth for where a given scalar lives in the dense parameter
/// vector. Layout: fixed effects, then `rho`, then (if mixed) `sigma_u`,
/// then (if variance estimated) `sigma2_res`, then (if active) `regLag`,
/// then one random-effect draw per block.
use ahash::AHashMap;
use ndarray::Array1;
use serde::{Deserialize, Serialize};

use crate::error::{MetaModelError, Result};
use crate::growth::ModelForm;

pub const RHO_NAME: &str = "rho";
pub const SIGMA_U_NAME: &str = "sigma_u";
pub const SIGMA2_RES_NAME: &str = "sigma2_res";
pub const REG_LAG_NAME: &str = "regLag";

/// One entry of the wire-format parameter configuration
/// (`ParamConfig`): `{Parameter, StartingValue, Distribution, DistParms}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamConfigEntry {
    #[serde(rename = "Parameter")]
    pub parameter: String,
    #[serde(rename = "StartingValue")]
    pub starting_value: f64,
    #[serde(rename = "Distribution")]
    pub distribution: String,
    #[serde(rename = "DistParms")]
    pub dist_parms: Vec<f64>,
}

impl ParamConfigEntry {
    fn uniform_bounds(&self) -> Result<(f64, f64)> {
        if self.distribution != "Uniform" {
            return Err(MetaModelError::Configuration(format!(
                "unsupported distribution '{}' for parameter '{}' — only Uniform is recognized",
                self.distribution, self.parameter
            )));
        }
        if self.dist_parms.len() != 2 {
            return Err(MetaModelError::Configuration(format!(
                "Uniform distribution for '{}' requires exactly [lower, upper]",
                self.parameter
            )));
        }
        Ok((self.dist_parms[0], self.dist_parms[1]))
    }
}

/// A validated uniform prior bound, independent of the wire format.
#[derive(Debug, Clone, Copy)]
pub struct UniformBounds {
    pub lower: f64,
    pub upper: f64,
}

#[derive(Debug, Clone)]
pub struct ParamSchema {
    /// Full ordered parameter names, including per-block random-effect slots.
    names: Vec<String>,
    index: AHashMap<String, usize>,
    pub n_fixed_effects: usize,
    pub mixed: bool,
    pub variance_estimated: bool,
    pub reg_lag_active: bool,
    pub n_blocks: usize,
    /// Uniform bounds for every scalar (non-random-effect) parameter, in
    /// the same order as the leading `names` entries.
    pub scalar_bounds: Vec<UniformBounds>,
    pub starting_values: Array1<f64>,
}

impl ParamSchema {
    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn name_at(&self, i: usize) -> &str {
        &self.names[i]
    }

    pub fn n_scalar(&self) -> usize {
        self.len() - self.n_random_effects()
    }

    pub fn n_random_effects(&self) -> usize {
        if self.mixed {
            self.n_blocks
        } else {
            0
        }
    }

    pub fn fixed_effect_indices(&self) -> std::ops::Range<usize> {
        0..self.n_fixed_effects
    }

    pub fn random_effect_index(&self, block: usize) -> usize {
        debug_assert!(self.mixed && block < self.n_blocks);
        self.n_scalar() + block
    }

    /// Build the schema for one growth-model instance.
    ///
    /// `param_configs` may omit any of the reserved scalar names (`rho`,
    /// `sigma_u`, `sigma2_res`, `regLag`) — those are declared nuisance
    /// parameters and receive sensible default uniform priors and starting
    /// values when absent. Every fixed-effect name the form reports via
    /// `effect_names()` MUST be present, or this fails with
    /// `ConfigurationError`.
    pub fn build(
        form: ModelForm,
        variance_estimated: bool,
        reg_lag_active: bool,
        n_blocks: usize,
        param_configs: &[ParamConfigEntry],
    ) -> Result<Self> {
        let mut names = Vec::new();
        let mut scalar_bounds = Vec::new();
        let mut starting = Vec::new();

        let by_name: AHashMap<&str, &ParamConfigEntry> = param_configs
            .iter()
            .map(|c| (c.parameter.as_str(), c))
            .collect();

        for effect in form.effect_names() {
            let entry = by_name.get(*effect).ok_or_else(|| {
                MetaModelError::Configuration(format!(
                    "missing required parameter '{effect}' for model form {form}"
                ))
            })?;
            let (lower, upper) = entry.uniform_bounds()?;
            names.push((*effect).to_string());
            scalar_bounds.push(UniformBounds { lower, upper });
            starting.push(entry.starting_value);
        }
        let n_fixed_effects = names.len();

        push_scalar(
            &mut names,
            &mut scalar_bounds,
            &mut starting,
            RHO_NAME,
            &by_name,
            UniformBounds { lower: 0.01, upper: 0.99 },
            0.5,
        )?;

        if form.mixed {
            push_scalar(
                &mut names,
                &mut scalar_bounds,
                &mut starting,
                SIGMA_U_NAME,
                &by_name,
                UniformBounds { lower: 1e-6, upper: 1000.0 },
                1.0,
            )?;
        }

        if variance_estimated {
            push_scalar(
                &mut names,
                &mut scalar_bounds,
                &mut starting,
                SIGMA2_RES_NAME,
                &by_name,
                UniformBounds { lower: 1e-8, upper: 1e8 },
                1.0,
            )?;
        }

        if reg_lag_active {
            push_scalar(
                &mut names,
                &mut scalar_bounds,
                &mut starting,
                REG_LAG_NAME,
                &by_name,
                UniformBounds { lower: 0.0, upper: 10.0 },
                1.0,
            )?;
        }

        if form.mixed {
            for b in 0..n_blocks {
                names.push(format!("u[{b}]"));
                starting.push(0.0);
            }
        }

        let index = names
            .iter()
            .enumerate()
            .map(|(i, n)| (n.clone(), i))
            .collect();

        Ok(ParamSchema {
            names,
            index,
            n_fixed_effects,
            mixed: form.mixed,
            variance_estimated,
            reg_lag_active,
            n_blocks,
            scalar_bounds,
            starting_values: Array1::from(starting),
        })
    }

    /// Per-dimension Metropolis proposal variance.
    ///
    /// - fixed effects and other plain scalar nuisance parameters (`rho`,
    ///   `sigma2_res`): `(parms[i] * coef_var)^2`
    /// - `sigma_u` itself: same rule (it is a plain scalar).
    /// - random-effect draws: `(sigma_u * coef_var)^2` — raw realizations
    ///   have no natural scale of their own, so they borrow `sigma_u`'s.
    /// - `regLag`: `(10 * coef_var)^2`, based on its fixed upper bound.
    pub fn sampler_variance(&self, parms: &Array1<f64>, coef_var: f64) -> Array1<f64> {
        let sigma_u = self
            .index_of(SIGMA_U_NAME)
            .map(|i| parms[i])
            .unwrap_or(0.0);
        let reg_lag_idx = self.index_of(REG_LAG_NAME);

        let mut var = Array1::zeros(self.len());
        for i in 0..self.n_scalar() {
            var[i] = if Some(i) == reg_lag_idx {
                (10.0 * coef_var).powi(2)
            } else {
                (parms[i] * coef_var).powi(2)
            };
        }
        for i in self.n_scalar()..self.len() {
            var[i] = (sigma_u * coef_var).powi(2);
        }
        var
    }
}

fn push_scalar(
    names: &mut Vec<String>,
    bounds: &mut Vec<UniformBounds>,
    starting: &mut Vec<f64>,
    name: &str,
    by_name: &AHashMap<&str, &ParamConfigEntry>,
    default_bounds: UniformBounds,
    default_start: f64,
) -> Result<()> {
    let (b, start) = match by_name.get(name) {
        Some(entry) => {
            let (lower, upper) = entry.uniform_bounds()?;
            (UniformBounds { lower, upper }, entry.starting_value)
        }
        None => (default_bounds, default_start),
    };
    names.push(name.to_string());
    bounds.push(b);
    starting.push(start);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::growth::FormKind;

    fn cfg(name: &str, start: f64, lo: f64, hi: f64) -> ParamConfigEntry {
        ParamConfigEntry {
            parameter: name.to_string(),
            starting_value: start,
            distribution: "Uniform".to_string(),
            dist_parms: vec![lo, hi],
        }
    }

    #[test]
    fn layout_matches_spec_order_for_mixed_young_stratum() {
        let form = ModelForm { kind: FormKind::ChapmanRichards, mixed: true };
        let configs = vec![
            cfg("b1", 100.0, 0.0, 500.0),
            cfg("b2", 0.05, 0.0, 1.0),
            cfg("b3", 1.5, 0.0, 5.0),
        ];
        let schema = ParamSchema::build(form, true, true, 2, &configs).unwrap();
        assert_eq!(schema.name_at(0), "b1");
        assert_eq!(schema.name_at(1), "b2");
        assert_eq!(schema.name_at(2), "b3");
        assert_eq!(schema.name_at(3), RHO_NAME);
        assert_eq!(schema.name_at(4), SIGMA_U_NAME);
        assert_eq!(schema.name_at(5), SIGMA2_RES_NAME);
        assert_eq!(schema.name_at(6), REG_LAG_NAME);
        assert_eq!(schema.name_at(7), "u[0]");
        assert_eq!(schema.name_at(8), "u[1]");
        assert_eq!(schema.len(), 9);
    }

    #[test]
    fn missing_fixed_effect_is_configuration_error() {
        let form = ModelForm { kind: FormKind::Exponential, mixed: false };
        let configs = vec![cfg("b1", 100.0, 0.0, 500.0)];
        let err = ParamSchema::build(form, false, false, 1, &configs).unwrap_err();
        assert!(matches!(err, MetaModelError::Configuration(_)));
    }

    #[test]
    fn unsupported_distribution_name_fails() {
        let mut bad = cfg("b1", 100.0, 0.0, 500.0);
        bad.distribution = "Normal".to_string();
        let form = ModelForm { kind: FormKind::Exponential, mixed: false };
        let configs = vec![bad, cfg("b2", 0.02, 0.0, 1.0)];
        let err = ParamSchema::build(form, false, false, 1, &configs).unwrap_err();
        assert!(matches!(err, MetaModelError::Configuration(_)));
    }

    #[test]
    fn sampler_variance_uses_sigma_u_for_random_effects_and_upper_bound_for_reg_lag() {
        let form = ModelForm { kind: FormKind::Exponential, mixed: true };
        let configs = vec![cfg("b1", 100.0, 0.0, 500.0), cfg("b2", 0.02, 0.0, 1.0)];
        let schema = ParamSchema::build(form, false, true, 1, &configs).unwrap();
        let mut parms = schema.starting_values.clone();
        let sigma_u_idx = schema.index_of(SIGMA_U_NAME).unwrap();
        parms[sigma_u_idx] = 2.0;
        let var = schema.sampler_variance(&parms, 0.1);
        let reg_lag_idx = schema.index_of(REG_LAG_NAME).unwrap();
        assert!((var[reg_lag_idx] - (10.0 * 0.1f64).powi(2)).abs() < 1e-12);
        let u_idx = schema.random_effect_index(0);
        assert!((var[u_idx] - (2.0 * 0.1f64).powi(2)).abs() < 1e-12);
    }
}
