pub mod block;
pub mod candidate;
pub mod config;
pub mod coordinator;
pub mod dataset;
pub mod error;
pub mod growth;
pub mod linalg;
pub mod persistence;
pub mod priors;
pub mod registry;
pub mod sampler;
pub mod schema;

pub use coordinator::{CandidateSpec, FittedMetaModel, PredictionRow, VarianceOutput};
pub use dataset::{HierarchicalDataset, ResultSet, ResultSetCollection};
pub use error::{MetaModelError, Result};
pub use growth::ModelForm;
pub use registry::StratumGroupRegistry;
pub use schema::ParamConfigEntry;
