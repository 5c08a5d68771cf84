/// config.rs — Fitting configuration
///
/// A fitting library has no process environment of its own to read — the
/// caller (façade, CLI, batch job) owns `.env`/CLI-flag parsing and hands
/// this crate a plain value. `FitConfig` groups the sampler tuning knobs
/// with the flag that changes the shape of the parameter schema itself
/// (`force_estimate_residual_variance` is a per-meta-model setting, never a
/// process-wide switch).
use serde::{Deserialize, Serialize};

use crate::sampler::SamplerConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitConfig {
    pub sampler: SamplerConfig,
    /// Force residual variance to be estimated as a model parameter even
    /// when the simulator supplied an estimator variance per observation.
    pub force_estimate_residual_variance: bool,
}

impl Default for FitConfig {
    fn default() -> Self {
        FitConfig {
            sampler: SamplerConfig::default(),
            force_estimate_residual_variance: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_round_trips_through_json() {
        let cfg = FitConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let back: FitConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg.sampler.nb_burn_in, back.sampler.nb_burn_in);
        assert_eq!(
            cfg.force_estimate_residual_variance,
            back.force_estimate_residual_variance
        );
    }
}
