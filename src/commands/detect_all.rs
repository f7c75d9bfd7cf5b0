use anyhow::Result;
use chrono::Utc;

use crate::cli::DetectAllArgs;
use crate::config::{DriftOverrides, Params};
use crate::pipeline::run_drift_all;

use super::detect::summary_line;
use super::open_store;

pub fn run(args: DetectAllArgs) -> Result<()> {
    let params = Params::load(&args.params)?;
    let settings = params.drift_settings(&DriftOverrides::from(&args.thresholds))?;
    let datasets = params.all_datasets()?;
    let mut store = open_store(&args.cache_root)?;

    let batch = run_drift_all(&mut store, &datasets, &settings, Utc::now());
    for outcome in &batch.completed {
        println!("{}", summary_line(&outcome.report));
    }
    batch.ensure_success()
}
