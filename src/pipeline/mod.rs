//! Per-dataset drift and analysis runs.
//!
//! A drift run is gated on the baseline: with no baseline the current
//! snapshot is promoted and nothing is scored. Otherwise the current snapshot
//! is cleaned against the files on disk, scored against the baseline, and the
//! report plus one timeline row are written. Callers must serialize runs per
//! dataset; nothing here locks the cache or the output directory.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use crate::baseline::{self, BaselineState};
use crate::config::{DatasetTarget, DriftSettings};
use crate::metrics::mean;
use crate::model::{
    ATTR_EMBEDDING, ATTR_HEIGHT, ATTR_SIZE, ATTR_WIDTH, AnalysisSummary, DriftReport,
    SnapshotLabel, SnapshotSet,
};
use crate::source::FeatureSource;
use crate::store::{CacheStore, dataset_id};
use crate::timeline::Timeline;
use crate::util::{ensure_directory, run_timestamp, write_json_pretty};
use crate::validator::{count_orphans, discover_present_files, validate};

pub const LATEST_REPORT_FILENAME: &str = "metrics.json";

#[derive(Debug, Clone)]
pub struct DriftOutcome {
    pub report: DriftReport,
    pub report_path: PathBuf,
}

pub fn run_drift(
    store: &mut dyn CacheStore,
    dataset: &DatasetTarget,
    settings: &DriftSettings,
    output_dir: &Path,
    now: DateTime<Utc>,
) -> Result<DriftOutcome> {
    let id = dataset_id(&dataset.root);
    let timestamp = run_timestamp(now);
    let timeline = Timeline::in_dir(output_dir);

    info!(dataset = %dataset.name, root = %dataset.root.display(), "starting drift detection");

    let mut current = baseline::load_current(store, &id, &dataset.name)?;
    let reference = baseline::load_baseline(store, &id)?;

    if BaselineState::of(&reference.attributes) == BaselineState::NoBaseline {
        warn!(dataset = %dataset.name, "no baseline found; promoting current snapshot");
        ensure_directory(output_dir)?;
        let num_files = baseline::promote(store, &id, &dataset.name, &current)?;
        let report = DriftReport::baseline_created(&dataset.name, &timestamp, num_files);

        // The baseline must never outlive a failed BASELINE_CREATED record.
        let report_path = match publish(output_dir, &timeline, &report) {
            Ok(path) => path,
            Err(err) => {
                if let Err(rollback) = baseline::discard(store, &id, &dataset.name) {
                    error!(dataset = %dataset.name, error = %rollback, "failed to discard baseline");
                }
                return Err(err.context(format!(
                    "failed to record baseline creation for dataset {}",
                    dataset.name
                )));
            }
        };
        return Ok(DriftOutcome {
            report,
            report_path,
        });
    }

    let present = discover_present_files(&dataset.root, &dataset.formats)
        .with_context(|| format!("failed to list files for dataset {}", dataset.name))?;
    let orphans_removed = clean_current(store, &id, &mut current, &present)?;
    let orphans_in_baseline = count_orphans(&reference.attributes, &present);
    if orphans_in_baseline > 0 {
        info!(
            dataset = %dataset.name,
            orphans = orphans_in_baseline,
            "baseline references files no longer on disk; counted as removed"
        );
    }

    let mut report = crate::scorer::score(
        &dataset.name,
        &timestamp,
        &reference,
        &current,
        settings,
    );
    report.orphans_removed_current = orphans_removed;
    report.orphans_detected_baseline = orphans_in_baseline;

    let report_path = publish(output_dir, &timeline, &report)?;

    info!(
        dataset = %dataset.name,
        status = %report.status,
        overall_score = report.overall_score,
        files_added = report.files_added,
        files_removed = report.files_removed,
        report = %report_path.display(),
        "drift detection complete"
    );

    Ok(DriftOutcome {
        report,
        report_path,
    })
}

/// Drops orphans from both current snapshots and writes back whichever
/// changed. Returns the number of attribute entries removed.
fn clean_current(
    store: &mut dyn CacheStore,
    id: &str,
    current: &mut SnapshotSet,
    present: &std::collections::HashSet<String>,
) -> Result<usize> {
    let removed_attributes = validate(&mut current.attributes, present);
    let removed_embeddings = validate(&mut current.embeddings, present);

    if removed_attributes > 0 {
        store.put(id, SnapshotLabel::Attributes, &current.attributes)?;
    }
    if removed_embeddings > 0 {
        store.put(id, SnapshotLabel::Embeddings, &current.embeddings)?;
    }
    if removed_attributes + removed_embeddings > 0 {
        info!(
            attributes = removed_attributes,
            embeddings = removed_embeddings,
            "removed orphan cache entries"
        );
    }

    Ok(removed_attributes)
}

fn publish(output_dir: &Path, timeline: &Timeline, report: &DriftReport) -> Result<PathBuf> {
    let report_path = write_report(output_dir, report)?;
    timeline.append(&report.timeline_row())?;
    Ok(report_path)
}

/// Writes the latest report and a timestamped copy; returns the copy's path.
pub fn write_report(output_dir: &Path, report: &DriftReport) -> Result<PathBuf> {
    let keyed_path = keyed_report_path(&output_dir.join("reports"), &report.timestamp);
    write_json_pretty(&keyed_path, report)?;
    write_json_pretty(&output_dir.join(LATEST_REPORT_FILENAME), report)?;
    Ok(keyed_path)
}

/// `drift_<ts>.json`, or `drift_<ts>_<n>.json` when runs share a second.
fn keyed_report_path(reports_dir: &Path, timestamp: &str) -> PathBuf {
    let mut path = reports_dir.join(format!("drift_{timestamp}.json"));
    let mut suffix = 1;
    while path.exists() {
        path = reports_dir.join(format!("drift_{timestamp}_{suffix}.json"));
        suffix += 1;
    }
    path
}

/// Outcome of a multi-dataset drift pass.
#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub completed: Vec<DriftOutcome>,
    pub failed: Vec<String>,
}

impl BatchOutcome {
    pub fn ensure_success(&self) -> Result<()> {
        if self.failed.is_empty() {
            return Ok(());
        }
        bail!(
            "drift detection failed for {} of {} datasets: {}",
            self.failed.len(),
            self.failed.len() + self.completed.len(),
            self.failed.join(", ")
        );
    }
}

/// Runs every dataset in order into its own drift directory. A failing
/// dataset is logged and recorded; the remaining datasets still run.
pub fn run_drift_all(
    store: &mut dyn CacheStore,
    datasets: &[DatasetTarget],
    settings: &DriftSettings,
    now: DateTime<Utc>,
) -> BatchOutcome {
    info!(datasets = datasets.len(), "drift detection for all datasets");

    let mut batch = BatchOutcome::default();
    for dataset in datasets {
        match run_drift(store, dataset, settings, &dataset.drift_dir(), now) {
            Ok(outcome) => batch.completed.push(outcome),
            Err(err) => {
                error!(dataset = %dataset.name, error = %err, "drift detection failed");
                batch.failed.push(dataset.name.clone());
            }
        }
    }
    batch
}

/// Imports a fresh feature batch into the current labels, dropping entries
/// for files that are no longer on disk, and writes an analysis summary.
pub fn run_analysis(
    store: &mut dyn CacheStore,
    source: &dyn FeatureSource,
    dataset: &DatasetTarget,
    now: DateTime<Utc>,
) -> Result<AnalysisSummary> {
    let id = dataset_id(&dataset.root);
    let mut batch = source.load(dataset)?;

    let present = discover_present_files(&dataset.root, &dataset.formats)
        .with_context(|| format!("failed to list files for dataset {}", dataset.name))?;
    let orphans_removed = validate(&mut batch.attributes, &present);
    validate(&mut batch.embeddings, &present);

    store.put(&id, SnapshotLabel::Attributes, &batch.attributes)?;
    store.put(&id, SnapshotLabel::Embeddings, &batch.embeddings)?;

    let num_clusters = source.cluster_count(dataset)?.unwrap_or(0);
    let summary = summarize(
        &dataset.name,
        &run_timestamp(now),
        &batch,
        orphans_removed,
        num_clusters,
    );
    write_json_pretty(&dataset.current_dir().join(LATEST_REPORT_FILENAME), &summary)?;

    info!(
        dataset = %summary.dataset,
        num_files = summary.num_files,
        avg_size = summary.avg_size,
        avg_width = summary.avg_width,
        avg_height = summary.avg_height,
        num_embeddings = summary.num_embeddings,
        embedding_dim = summary.embedding_dim,
        num_clusters = summary.num_clusters,
        orphans_removed = summary.orphans_removed,
        "analysis snapshot stored"
    );

    Ok(summary)
}

pub fn summarize(
    dataset: &str,
    timestamp: &str,
    batch: &SnapshotSet,
    orphans_removed: usize,
    num_clusters: usize,
) -> AnalysisSummary {
    let average = |name: &str| {
        let values = batch
            .attributes
            .values()
            .filter_map(|record| record.scalar(name))
            .collect::<Vec<f64>>();
        mean(&values).unwrap_or(0.0)
    };
    let embeddings = batch
        .embeddings
        .values()
        .filter_map(|record| record.vector(ATTR_EMBEDDING))
        .collect::<Vec<Vec<f64>>>();

    AnalysisSummary {
        dataset: dataset.to_string(),
        timestamp: timestamp.to_string(),
        num_files: batch.attributes.len(),
        avg_size: average(ATTR_SIZE),
        avg_width: average(ATTR_WIDTH),
        avg_height: average(ATTR_HEIGHT),
        num_embeddings: embeddings.len(),
        embedding_dim: embeddings.first().map(Vec::len).unwrap_or(0),
        num_clusters,
        orphans_removed,
    }
}
