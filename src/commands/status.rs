use anyhow::Result;
use tracing::{info, warn};

use crate::baseline;
use crate::cli::StatusArgs;
use crate::model::SnapshotLabel;
use crate::store::{CACHE_DB_FILENAME, CacheStore, dataset_id};
use crate::timeline::Timeline;

use super::{open_store, resolve_dataset};

pub fn run(args: StatusArgs) -> Result<()> {
    let (_, dataset) = resolve_dataset(&args.common)?;
    let db_path = args.common.cache_root.join(CACHE_DB_FILENAME);

    info!(
        dataset = %dataset.name,
        root = %dataset.root.display(),
        cache = %db_path.display(),
        "status requested"
    );

    if db_path.exists() {
        let store = open_store(&args.common.cache_root)?;
        let id = dataset_id(&dataset.root);
        let state = baseline::load_state(&store, &id)?;

        for label in [
            SnapshotLabel::Attributes,
            SnapshotLabel::Embeddings,
            SnapshotLabel::AttributesBaseline,
            SnapshotLabel::EmbeddingsBaseline,
        ] {
            let entries = store.get(&id, label)?.len();
            info!(label = %label, entries, "cache label");
        }
        println!("{}: {}", dataset.name, state.as_str());
    } else {
        warn!(path = %db_path.display(), "feature cache missing");
    }

    let timeline = Timeline::in_dir(&dataset.drift_dir());
    match timeline.last()? {
        Some(row) => info!(
            timestamp = %row.timestamp,
            overall_score = row.overall_score,
            status = %row.status,
            files_added = row.files_added,
            files_removed = row.files_removed,
            "last drift run"
        ),
        None => warn!(path = %timeline.path().display(), "no drift runs recorded"),
    }

    Ok(())
}
