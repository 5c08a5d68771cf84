/// error.rs — Typed failure modes for the fitting engine
///
/// Mirrors the error kinds that matter at the library boundary. Everything
/// that happens *inside* a sampler worker (a negative quadratic form, a
/// diverging chain) is trapped there and reported as non-convergence — it
/// never reaches these variants. Only pre-fit configuration problems and
/// post-fit usage mistakes surface here.
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MetaModelError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("incompatible ResultSet: {0}")]
    IncompatibleScriptResult(String),

    #[error("unknown output type: {0}")]
    UnknownOutputType(String),

    #[error("negative quadratic form in block log-likelihood (block {block_index})")]
    NegativeQuadraticForm { block_index: usize },

    #[error("no candidate model converged")]
    NoCandidateConverged,

    /// Prediction was requested before a successful fit. In this crate a
    /// `FittedMetaModel` only comes into existence as the return value of
    /// `coordinator::fit`, so there is no handle to call `predict` on
    /// before fitting has succeeded — this variant exists for callers that
    /// build their own pre-fit placeholder (e.g. a registry entry reserved
    /// before its fit completes) and need a typed way to reject prediction
    /// against it.
    #[error("meta-model has not been fitted")]
    NotFitted,
}

pub type Result<T> = std::result::Result<T, MetaModelError>;
