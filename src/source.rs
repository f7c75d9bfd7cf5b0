use std::path::{Path, PathBuf};

use anyhow::{Result, bail};
use serde::Deserialize;
use tracing::{debug, info};

use crate::config::DatasetTarget;
use crate::model::{Snapshot, SnapshotSet};
use crate::util::read_json;

pub const ATTRIBUTES_EXPORT: &str = "attributes.json";
pub const EMBEDDINGS_EXPORT: &str = "embeddings.json";
pub const CLUSTERS_EXPORT: &str = "clusters.json";

/// Producer of per-file features for a dataset. Extraction itself happens
/// elsewhere; implementations only hand over finished snapshots.
pub trait FeatureSource {
    fn load(&self, dataset: &DatasetTarget) -> Result<SnapshotSet>;

    /// Cluster count from the engine's clustering pass, when it ran.
    fn cluster_count(&self, _dataset: &DatasetTarget) -> Result<Option<usize>> {
        Ok(None)
    }
}

#[derive(Debug, Deserialize)]
struct ClusterExport {
    n_clusters: usize,
}

/// Reads JSON exports (`file name -> record` objects) written by the feature
/// engine. The attribute export is required, the embedding export optional.
#[derive(Debug, Clone, Default)]
pub struct JsonExportSource {
    export_dir: Option<PathBuf>,
}

impl JsonExportSource {
    pub fn new(export_dir: Option<PathBuf>) -> Self {
        Self { export_dir }
    }

    pub fn export_dir(&self, dataset: &DatasetTarget) -> PathBuf {
        self.export_dir
            .clone()
            .unwrap_or_else(|| dataset.analysis_dir().join("features"))
    }
}

impl FeatureSource for JsonExportSource {
    fn load(&self, dataset: &DatasetTarget) -> Result<SnapshotSet> {
        let dir = self.export_dir(dataset);
        let attributes_path = dir.join(ATTRIBUTES_EXPORT);
        if !attributes_path.exists() {
            bail!(
                "attribute export missing for dataset {}: {}",
                dataset.name,
                attributes_path.display()
            );
        }

        let attributes: Snapshot = read_json(&attributes_path)?;
        let embeddings = read_optional(&dir.join(EMBEDDINGS_EXPORT))?;

        info!(
            dataset = %dataset.name,
            attributes = attributes.len(),
            embeddings = embeddings.len(),
            source = %dir.display(),
            "loaded feature exports"
        );

        Ok(SnapshotSet {
            attributes,
            embeddings,
        })
    }

    fn cluster_count(&self, dataset: &DatasetTarget) -> Result<Option<usize>> {
        let path = self.export_dir(dataset).join(CLUSTERS_EXPORT);
        if !path.exists() {
            debug!(path = %path.display(), "no clustering export");
            return Ok(None);
        }
        let export: ClusterExport = read_json(&path)?;
        Ok(Some(export.n_clusters))
    }
}

fn read_optional(path: &Path) -> Result<Snapshot> {
    if path.exists() {
        read_json(path)
    } else {
        debug!(path = %path.display(), "optional feature export not present");
        Ok(Snapshot::new())
    }
}
