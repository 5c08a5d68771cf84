/// growth.rs — Growth-model family
///
/// A tagged sum over the four closed-form growth curves, each with a plain
/// and a `WithRandomEffect` variant. Prediction and gradient are pure
/// functions of `(age, u, fixed effects)` — no block or sampler state leaks
/// in here, callers pass the current parameter vector explicitly.
use std::fmt;
use std::str::FromStr;

use crate::error::{MetaModelError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FormKind {
    ChapmanRichards,
    ChapmanRichardsDerivative,
    Exponential,
    ModifiedChapmanRichardsDerivative,
}

impl FormKind {
    /// Ordered names of the fixed-effect parameters for this form.
    pub fn effect_names(&self) -> &'static [&'static str] {
        match self {
            FormKind::ChapmanRichards => &["b1", "b2", "b3"],
            FormKind::ChapmanRichardsDerivative => &["b1", "b2", "b3"],
            FormKind::Exponential => &["b1", "b2"],
            FormKind::ModifiedChapmanRichardsDerivative => &["b1", "b2", "b3", "b4"],
        }
    }

    fn base_name(&self) -> &'static str {
        match self {
            FormKind::ChapmanRichards => "ChapmanRichards",
            FormKind::ChapmanRichardsDerivative => "ChapmanRichardsDerivative",
            FormKind::Exponential => "Exponential",
            FormKind::ModifiedChapmanRichardsDerivative => "ModifiedChapmanRichardsDerivative",
        }
    }
}

/// One growth-model variant: a base form, optionally carrying a per-block
/// random effect `u`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModelForm {
    pub kind: FormKind,
    pub mixed: bool,
}

impl ModelForm {
    pub const ALL: [ModelForm; 8] = [
        ModelForm { kind: FormKind::ChapmanRichards, mixed: false },
        ModelForm { kind: FormKind::ChapmanRichards, mixed: true },
        ModelForm { kind: FormKind::ChapmanRichardsDerivative, mixed: false },
        ModelForm { kind: FormKind::ChapmanRichardsDerivative, mixed: true },
        ModelForm { kind: FormKind::Exponential, mixed: false },
        ModelForm { kind: FormKind::Exponential, mixed: true },
        ModelForm { kind: FormKind::ModifiedChapmanRichardsDerivative, mixed: false },
        ModelForm { kind: FormKind::ModifiedChapmanRichardsDerivative, mixed: true },
    ];

    pub fn effect_names(&self) -> &'static [&'static str] {
        self.kind.effect_names()
    }

    /// One-line textual form of the prediction formula, shown in the
    /// model-coordinator's comparison-table reports.
    pub fn definition(&self) -> String {
        let formula = match self.kind {
            FormKind::ChapmanRichards => "(b1+u)*(1-exp(-b2*t))^b3",
            FormKind::ChapmanRichardsDerivative => "(b1+u)*exp(-b2*t)*(1-exp(-b2*t))^b3",
            FormKind::Exponential => "(b1+u)*exp(-b2*t)",
            FormKind::ModifiedChapmanRichardsDerivative => "(b1+u)*exp(-b2*t)*(1-exp(-b3*t))^b4",
        };
        format!("{}: {}", self, formula)
    }

    /// Prediction at a single (already reg-lag-adjusted) age `t`, given the
    /// random effect draw `u` (0.0 for non-mixed evaluation) and the fixed
    /// effects in `b` (ordered per `effect_names()`).
    pub fn predict_raw(&self, t: f64, u: f64, b: &[f64]) -> f64 {
        match self.kind {
            FormKind::ChapmanRichards => {
                let (b1, b2, b3) = (b[0], b[1], b[2]);
                (b1 + u) * (1.0 - (-b2 * t).exp()).powf(b3)
            }
            FormKind::ChapmanRichardsDerivative => {
                let (b1, b2, b3) = (b[0], b[1], b[2]);
                (b1 + u) * (-b2 * t).exp() * (1.0 - (-b2 * t).exp()).powf(b3)
            }
            FormKind::Exponential => {
                let (b1, b2) = (b[0], b[1]);
                (b1 + u) * (-b2 * t).exp()
            }
            FormKind::ModifiedChapmanRichardsDerivative => {
                let (b1, b2, b3, b4) = (b[0], b[1], b[2], b[3]);
                (b1 + u) * (-b2 * t).exp() * (1.0 - (-b3 * t).exp()).powf(b4)
            }
        }
    }

    /// Closed-form gradient of `predict_raw` with respect to the fixed
    /// effects, in `effect_names()` order.
    pub fn gradient_raw(&self, t: f64, u: f64, b: &[f64]) -> Vec<f64> {
        match self.kind {
            FormKind::ChapmanRichards => {
                let (b1, b2, b3) = (b[0], b[1], b[2]);
                let _ = b1;
                let base = 1.0 - (-b2 * t).exp();
                let d_b1 = base.powf(b3);
                let d_b2 = if base > 0.0 {
                    (b1 + u) * b3 * base.powf(b3 - 1.0) * t * (-b2 * t).exp()
                } else {
                    0.0
                };
                let d_b3 = if base > 0.0 {
                    (b1 + u) * base.powf(b3) * base.ln()
                } else {
                    0.0
                };
                vec![d_b1, d_b2, d_b3]
            }
            FormKind::ChapmanRichardsDerivative => {
                let (b1, b2, b3) = (b[0], b[1], b[2]);
                let e = (-b2 * t).exp();
                let base = 1.0 - e;
                let d_b1 = e * base.powf(b3);
                let d_b2 = if base > 0.0 {
                    (b1 + u) * t * e * base.powf(b3 - 1.0) * (b3 * e - base)
                } else {
                    0.0
                };
                let d_b3 = if base > 0.0 {
                    (b1 + u) * e * base.powf(b3) * base.ln()
                } else {
                    0.0
                };
                vec![d_b1, d_b2, d_b3]
            }
            FormKind::Exponential => {
                let (b1, b2) = (b[0], b[1]);
                let e = (-b2 * t).exp();
                let d_b1 = e;
                let d_b2 = -(b1 + u) * t * e;
                vec![d_b1, d_b2]
            }
            FormKind::ModifiedChapmanRichardsDerivative => {
                let (b1, b2, b3, b4) = (b[0], b[1], b[2], b[3]);
                let e2 = (-b2 * t).exp();
                let e3 = (-b3 * t).exp();
                let base = 1.0 - e3;
                let d_b1 = e2 * base.powf(b4);
                let d_b2 = -(b1 + u) * t * e2 * base.powf(b4);
                let d_b3 = if base > 0.0 {
                    (b1 + u) * e2 * b4 * base.powf(b4 - 1.0) * t * e3
                } else {
                    0.0
                };
                let d_b4 = if base > 0.0 {
                    (b1 + u) * e2 * base.powf(b4) * base.ln()
                } else {
                    0.0
                };
                vec![d_b1, d_b2, d_b3, d_b4]
            }
        }
    }

    /// Default starting values for the fixed effects, in `effect_names()`
    /// order. These are deliberately mild (slow growth, long half-life) so
    /// that the sampler's initial grid search has a sane neighbourhood to
    /// explore regardless of the candidate's units.
    pub fn default_starting_values(&self) -> Vec<f64> {
        match self.kind {
            FormKind::ChapmanRichards => vec![100.0, 0.05, 1.5],
            FormKind::ChapmanRichardsDerivative => vec![100.0, 0.05, 1.5],
            FormKind::Exponential => vec![100.0, 0.02],
            FormKind::ModifiedChapmanRichardsDerivative => vec![100.0, 0.05, 0.05, 1.5],
        }
    }
}

impl fmt::Display for ModelForm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.mixed {
            write!(f, "{}WithRandomEffect", self.kind.base_name())
        } else {
            write!(f, "{}", self.kind.base_name())
        }
    }
}

impl FromStr for ModelForm {
    type Err = MetaModelError;

    fn from_str(s: &str) -> Result<Self> {
        ModelForm::ALL
            .iter()
            .find(|f| f.to_string() == s)
            .copied()
            .ok_or_else(|| MetaModelError::Configuration(format!("unsupported model form: {s}")))
    }
}

/// Apply the regeneration-lag shift, per spec: prediction and its gradient
/// are evaluated at `age - reg_lag`; ages at or below the lag predict 0 with
/// a zero gradient.
pub fn effective_age(age: f64, reg_lag: Option<f64>) -> Option<f64> {
    let a = age - reg_lag.unwrap_or(0.0);
    if a <= 0.0 {
        None
    } else {
        Some(a)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chapman_richards_zero_at_zero_age() {
        let form = ModelForm { kind: FormKind::ChapmanRichards, mixed: false };
        let mu = form.predict_raw(0.0, 0.0, &[120.0, 0.05, 1.3]);
        assert!(mu.abs() < 1e-12);
    }

    #[test]
    fn chapman_richards_monotone_nondecreasing_in_age() {
        let form = ModelForm { kind: FormKind::ChapmanRichards, mixed: false };
        let b = [120.0, 0.05, 1.3];
        let mut prev = form.predict_raw(0.0, 0.0, &b);
        for age in (1..200).map(|a| a as f64) {
            let cur = form.predict_raw(age, 0.0, &b);
            assert!(cur + 1e-9 >= prev, "age={age} cur={cur} prev={prev}");
            prev = cur;
        }
    }

    #[test]
    fn exponential_monotone_nonincreasing_in_age() {
        let form = ModelForm { kind: FormKind::Exponential, mixed: false };
        let b = [120.0, 0.02];
        let mut prev = form.predict_raw(0.0, 0.0, &b);
        for age in (1..200).map(|a| a as f64) {
            let cur = form.predict_raw(age, 0.0, &b);
            assert!(cur <= prev + 1e-9, "age={age} cur={cur} prev={prev}");
            prev = cur;
        }
    }

    #[test]
    fn reg_lag_absent_matches_lag_zero() {
        assert_eq!(effective_age(50.0, None), effective_age(50.0, Some(0.0)));
    }

    #[test]
    fn reg_lag_boundary_returns_none_at_or_below_lag() {
        assert_eq!(effective_age(8.0, Some(8.0)), None);
        assert_eq!(effective_age(5.0, Some(8.0)), None);
        assert!(effective_age(9.0, Some(8.0)).is_some());
    }

    #[test]
    fn display_and_parse_round_trip_all_forms() {
        for form in ModelForm::ALL.iter() {
            let s = form.to_string();
            let parsed: ModelForm = s.parse().unwrap();
            assert_eq!(parsed, *form);
        }
    }

    #[test]
    fn unsupported_form_name_is_configuration_error() {
        let err = "NotAForm".parse::<ModelForm>().unwrap_err();
        matches!(err, MetaModelError::Configuration(_));
    }
}
