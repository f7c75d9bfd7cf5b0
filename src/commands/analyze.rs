use anyhow::Result;
use chrono::Utc;
use tracing::info;

use crate::cli::AnalyzeArgs;
use crate::pipeline::run_analysis;
use crate::source::JsonExportSource;

use super::{open_store, resolve_dataset};

pub fn run(args: AnalyzeArgs) -> Result<()> {
    let (_, dataset) = resolve_dataset(&args.common)?;
    let mut store = open_store(&args.common.cache_root)?;
    let source = JsonExportSource::new(args.export_dir);

    info!(
        dataset = %dataset.name,
        export_dir = %source.export_dir(&dataset).display(),
        "analysis requested"
    );

    let summary = run_analysis(&mut store, &source, &dataset, Utc::now())?;
    println!(
        "{}: {} files, {} embeddings (dim {}), {} orphans removed",
        summary.dataset,
        summary.num_files,
        summary.num_embeddings,
        summary.embedding_dim,
        summary.orphans_removed
    );
    Ok(())
}
