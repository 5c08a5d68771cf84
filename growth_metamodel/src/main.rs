/// main.rs — Fit-and-predict demo entry point
///
/// Loads a `ResultSetCollection` from a JSON file (the shape a caller would
/// otherwise get by adapting the upstream simulator's `ScriptResult`
/// objects), fits a candidate set of growth forms for one output type, and
/// prints the winning model's comparison table and a handful of
/// predictions. This is a demo harness, not the library surface — real
/// callers drive `growth_metamodel::coordinator::fit` directly.
use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;

use growth_metamodel::config::FitConfig;
use growth_metamodel::coordinator::{fit, CandidateSpec, VarianceOutput};
use growth_metamodel::dataset::{HierarchicalDataset, ResultSetCollection};
use growth_metamodel::growth::ModelForm;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut args = std::env::args().skip(1);
    let input_path: PathBuf = args
        .next()
        .context("usage: fit_metamodel <result_sets.json> <output_type>")?
        .into();
    let output_type = args.next().context("missing output_type argument")?;

    info!(path = %input_path.display(), output_type, "loading result sets");
    let raw = fs::read_to_string(&input_path)
        .with_context(|| format!("reading {}", input_path.display()))?;
    let collection: ResultSetCollection =
        serde_json::from_str(&raw).context("parsing result set collection")?;

    let dataset = HierarchicalDataset::build(&collection, &output_type)?;
    info!(n_blocks = dataset.blocks.len(), minimum_stratum_age = dataset.minimum_stratum_age, "assembled hierarchical dataset");

    let candidates = vec![
        CandidateSpec { form: ModelForm { kind: growth_metamodel::growth::FormKind::Exponential, mixed: false }, param_config: None },
        CandidateSpec { form: ModelForm { kind: growth_metamodel::growth::FormKind::Exponential, mixed: true }, param_config: None },
    ];

    let config = FitConfig::default();
    let model = fit(&dataset, &candidates, &config)?;

    info!(winner = %model.form(), lpml = model.log_pseudo_marginal_likelihood(), "fit converged");
    for row in model.comparison_table() {
        info!(
            form = row.form_name,
            definition = row.definition,
            converged = row.converged,
            acceptance_rate = row.acceptance_rate,
            lpml = row.log_pseudo_marginal_likelihood,
            "candidate"
        );
    }

    let ages = [10.0, 30.0, 60.0, 90.0, 120.0];
    let predictions = model.predictions(&ages, 0.0, VarianceOutput::ParamEst);
    for row in predictions {
        println!("age={:.1} pred={:.4} variance={:?}", row.age_yr, row.pred, row.variance);
    }

    Ok(())
}
