use anyhow::Result;

use crate::baseline;
use crate::cli::RebaselineArgs;
use crate::store::dataset_id;

use super::{open_store, resolve_dataset};

pub fn run(args: RebaselineArgs) -> Result<()> {
    let (_, dataset) = resolve_dataset(&args.common)?;
    let mut store = open_store(&args.common.cache_root)?;

    let outcome = baseline::rebaseline(&mut store, &dataset_id(&dataset.root), &dataset.name)?;
    println!(
        "{}: baseline replaced ({} -> {} files, {} embeddings)",
        dataset.name, outcome.previous_files, outcome.new_files, outcome.new_embeddings
    );
    Ok(())
}
