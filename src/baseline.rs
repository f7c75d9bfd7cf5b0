use tracing::{info, warn};

use crate::error::DriftError;
use crate::model::{Snapshot, SnapshotLabel, SnapshotSet};
use crate::store::CacheStore;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BaselineState {
    NoBaseline,
    HasBaseline,
}

impl BaselineState {
    pub fn of(baseline_attributes: &Snapshot) -> Self {
        if baseline_attributes.is_empty() {
            Self::NoBaseline
        } else {
            Self::HasBaseline
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::NoBaseline => "NO_BASELINE",
            Self::HasBaseline => "HAS_BASELINE",
        }
    }
}

pub fn load_state(store: &dyn CacheStore, dataset_id: &str) -> Result<BaselineState, DriftError> {
    let baseline = store.get(dataset_id, SnapshotLabel::AttributesBaseline)?;
    Ok(BaselineState::of(&baseline))
}

/// Loads the current attribute and embedding snapshots. An empty attribute
/// snapshot means nothing was ever analyzed for the dataset.
pub fn load_current(
    store: &dyn CacheStore,
    dataset_id: &str,
    dataset: &str,
) -> Result<SnapshotSet, DriftError> {
    let attributes = store.get(dataset_id, SnapshotLabel::Attributes)?;
    if attributes.is_empty() {
        return Err(DriftError::NoData {
            dataset: dataset.to_string(),
        });
    }
    let embeddings = store.get(dataset_id, SnapshotLabel::Embeddings)?;
    Ok(SnapshotSet {
        attributes,
        embeddings,
    })
}

pub fn load_baseline(store: &dyn CacheStore, dataset_id: &str) -> Result<SnapshotSet, DriftError> {
    Ok(SnapshotSet {
        attributes: store.get(dataset_id, SnapshotLabel::AttributesBaseline)?,
        embeddings: store.get(dataset_id, SnapshotLabel::EmbeddingsBaseline)?,
    })
}

/// First-run bootstrap: freezes `current` as the baseline. Refuses to run
/// once a baseline exists so a drift run can never overwrite it.
pub fn promote(
    store: &mut dyn CacheStore,
    dataset_id: &str,
    dataset: &str,
    current: &SnapshotSet,
) -> Result<usize, DriftError> {
    if current.attributes.is_empty() {
        return Err(DriftError::NoData {
            dataset: dataset.to_string(),
        });
    }
    if load_state(store, dataset_id)? == BaselineState::HasBaseline {
        return Err(DriftError::config_invalid(
            "baseline",
            format!("dataset {dataset} already has a baseline; use rebaseline to replace it"),
        ));
    }

    store.put(
        dataset_id,
        SnapshotLabel::AttributesBaseline,
        &current.attributes,
    )?;
    if !current.embeddings.is_empty() {
        store.put(
            dataset_id,
            SnapshotLabel::EmbeddingsBaseline,
            &current.embeddings,
        )?;
    }

    info!(
        dataset = %dataset,
        files = current.attributes.len(),
        embeddings = current.embeddings.len(),
        "baseline created from current snapshot"
    );
    Ok(current.attributes.len())
}

/// Undoes `promote` by clearing both baseline labels.
pub fn discard(
    store: &mut dyn CacheStore,
    dataset_id: &str,
    dataset: &str,
) -> Result<(), DriftError> {
    let empty = Snapshot::new();
    store.put(dataset_id, SnapshotLabel::AttributesBaseline, &empty)?;
    store.put(dataset_id, SnapshotLabel::EmbeddingsBaseline, &empty)?;
    warn!(dataset = %dataset, "baseline discarded");
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RebaselineOutcome {
    pub previous_files: usize,
    pub new_files: usize,
    pub new_embeddings: usize,
}

/// Explicit operator reset: replaces both baseline labels with the current
/// snapshots, whether or not a baseline existed.
pub fn rebaseline(
    store: &mut dyn CacheStore,
    dataset_id: &str,
    dataset: &str,
) -> Result<RebaselineOutcome, DriftError> {
    let current = load_current(store, dataset_id, dataset)?;
    let previous = store.get(dataset_id, SnapshotLabel::AttributesBaseline)?;

    store.put(
        dataset_id,
        SnapshotLabel::AttributesBaseline,
        &current.attributes,
    )?;
    store.put(
        dataset_id,
        SnapshotLabel::EmbeddingsBaseline,
        &current.embeddings,
    )?;

    if previous.is_empty() {
        warn!(dataset = %dataset, "rebaseline ran without an existing baseline");
    }

    let outcome = RebaselineOutcome {
        previous_files: previous.len(),
        new_files: current.attributes.len(),
        new_embeddings: current.embeddings.len(),
    };
    info!(
        dataset = %dataset,
        previous_files = outcome.previous_files,
        new_files = outcome.new_files,
        new_embeddings = outcome.new_embeddings,
        "baseline replaced"
    );
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::model::FeatureRecord;
    use crate::store::MemoryCacheStore;

    use super::*;

    fn snapshot(keys: &[&str]) -> Snapshot {
        keys.iter()
            .map(|key| {
                (
                    key.to_string(),
                    FeatureRecord::from_iter([("size", json!(1.0))]),
                )
            })
            .collect()
    }

    fn set(keys: &[&str]) -> SnapshotSet {
        SnapshotSet {
            attributes: snapshot(keys),
            embeddings: Snapshot::new(),
        }
    }

    #[test]
    fn state_follows_baseline_presence() {
        assert_eq!(BaselineState::of(&Snapshot::new()), BaselineState::NoBaseline);
        assert_eq!(BaselineState::of(&snapshot(&["a"])), BaselineState::HasBaseline);
    }

    #[test]
    fn promote_copies_current_and_skips_empty_embeddings() {
        let mut store = MemoryCacheStore::default();
        let files = promote(&mut store, "ds", "main", &set(&["a", "b"])).unwrap();

        assert_eq!(files, 2);
        assert_eq!(load_state(&store, "ds").unwrap(), BaselineState::HasBaseline);
        assert_eq!(store.writes, vec![SnapshotLabel::AttributesBaseline]);
    }

    #[test]
    fn promote_refuses_to_overwrite_existing_baseline() {
        let mut store = MemoryCacheStore::default();
        promote(&mut store, "ds", "main", &set(&["a"])).unwrap();

        let err = promote(&mut store, "ds", "main", &set(&["x", "y"])).unwrap_err();
        assert!(matches!(err, DriftError::ConfigInvalid { .. }));
        let baseline = load_baseline(&store, "ds").unwrap();
        assert_eq!(baseline.attributes.keys().collect::<Vec<_>>(), vec!["a"]);
    }

    #[test]
    fn promote_without_current_is_no_data() {
        let mut store = MemoryCacheStore::default();
        let err = promote(&mut store, "ds", "main", &SnapshotSet::default()).unwrap_err();
        assert!(matches!(err, DriftError::NoData { .. }));
        assert!(store.writes.is_empty());
    }

    #[test]
    fn discard_returns_dataset_to_no_baseline() {
        let mut store = MemoryCacheStore::default();
        promote(&mut store, "ds", "main", &set(&["a", "b"])).unwrap();

        discard(&mut store, "ds", "main").unwrap();
        assert_eq!(load_state(&store, "ds").unwrap(), BaselineState::NoBaseline);
        assert!(load_baseline(&store, "ds").unwrap().embeddings.is_empty());
        promote(&mut store, "ds", "main", &set(&["c"])).unwrap();
    }

    #[test]
    fn rebaseline_replaces_existing_baseline() {
        let mut store = MemoryCacheStore::default();
        store
            .put("ds", SnapshotLabel::AttributesBaseline, &snapshot(&["old"]))
            .unwrap();
        store
            .put("ds", SnapshotLabel::Attributes, &snapshot(&["new1", "new2"]))
            .unwrap();

        let outcome = rebaseline(&mut store, "ds", "main").unwrap();
        assert_eq!(
            outcome,
            RebaselineOutcome {
                previous_files: 1,
                new_files: 2,
                new_embeddings: 0
            }
        );
        let baseline = load_baseline(&store, "ds").unwrap();
        assert_eq!(
            baseline.attributes.keys().collect::<Vec<_>>(),
            vec!["new1", "new2"]
        );
    }

    #[test]
    fn rebaseline_without_current_fails() {
        let mut store = MemoryCacheStore::default();
        assert!(matches!(
            rebaseline(&mut store, "ds", "main"),
            Err(DriftError::NoData { .. })
        ));
    }
}
