pub mod analyze;
pub mod detect;
pub mod detect_all;
pub mod rebaseline;
pub mod status;

use anyhow::Result;

use crate::cli::{CommonArgs, ThresholdArgs};
use crate::config::{DatasetTarget, DriftOverrides, Params};
use crate::store::{CACHE_DB_FILENAME, SqliteCacheStore};

fn open_store(cache_root: &std::path::Path) -> Result<SqliteCacheStore> {
    SqliteCacheStore::open(&cache_root.join(CACHE_DB_FILENAME))
}

fn resolve_dataset(common: &CommonArgs) -> Result<(Params, DatasetTarget)> {
    let params = Params::load(&common.params)?;
    let dataset = params.dataset(common.dataset.as_deref(), common.data_dir.as_deref())?;
    Ok((params, dataset))
}

impl From<&ThresholdArgs> for DriftOverrides {
    fn from(args: &ThresholdArgs) -> Self {
        Self {
            threshold_warning: args.threshold_warning,
            threshold_critical: args.threshold_critical,
        }
    }
}
