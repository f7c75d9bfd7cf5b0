//! Turns a baseline/current snapshot pair into a classified [`DriftReport`].

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, info};

use crate::config::DriftSettings;
use crate::metrics::{
    MetricUnavailable, check_vectors, flat_variance, kl_divergence, ks_two_sample, mean,
    mean_shift, mmd_rbf, variance_ratio, wasserstein_distance,
};
use crate::model::{
    ATTR_EMBEDDING, ATTR_NOISE_LEVEL, ATTR_QUALITY, ATTR_SHARPNESS, ATTR_SIZE, DriftMetricResult,
    DriftReport, DriftStatus, DriftWeights, EmbeddingDriftResult, FileDelta, QualityDrift,
    REPORT_VERSION, Snapshot, SnapshotSet, Thresholds,
};

pub const TRACKED_ATTRIBUTES: [&str; 4] = [ATTR_SIZE, ATTR_NOISE_LEVEL, ATTR_SHARPNESS, ATTR_QUALITY];

/// Mean quality movement (in points) that flips the quality label.
const QUALITY_SHIFT_POINTS: f64 = 10.0;

pub fn score(
    dataset: &str,
    timestamp: &str,
    baseline: &SnapshotSet,
    current: &SnapshotSet,
    settings: &DriftSettings,
) -> DriftReport {
    let delta = FileDelta::between(&baseline.attributes, &current.attributes);
    info!(
        dataset = %dataset,
        added = delta.added.len(),
        removed = delta.removed.len(),
        common = delta.common.len(),
        baseline_total = baseline.attributes.len(),
        current_total = current.attributes.len(),
        "file changes"
    );

    let mut attributes = BTreeMap::new();
    for name in TRACKED_ATTRIBUTES {
        match attribute_drift(name, &delta.common, baseline, current, settings.bins) {
            Ok(result) => {
                info!(
                    attribute = name,
                    kl = result.kl_divergence,
                    wasserstein = result.wasserstein_distance,
                    ks_pvalue = result.ks_pvalue.unwrap_or(f64::NAN),
                    "attribute drift"
                );
                attributes.insert(name.to_string(), result);
            }
            Err(reason) => debug!(attribute = name, reason = %reason, "attribute metric unavailable"),
        }
    }

    let embedding = if baseline.embeddings.is_empty() || current.embeddings.is_empty() {
        debug!("embedding snapshot missing on one side; skipping embedding drift");
        None
    } else {
        match embedding_drift(&baseline.embeddings, &current.embeddings, settings.mmd_gamma) {
            Ok(result) => {
                info!(
                    mmd = result.mmd,
                    mean_shift = result.mean_shift,
                    variance_change = result.variance_change,
                    "embedding drift"
                );
                Some(result)
            }
            Err(reason) => {
                debug!(reason = %reason, "embedding metric unavailable");
                None
            }
        }
    };

    let overall_score = aggregate(&attributes, embedding.as_ref(), &settings.weights);
    let status = classify(overall_score, &settings.thresholds);
    let quality_drift = attributes
        .get(ATTR_QUALITY)
        .and_then(|result| result.mean_change)
        .map(quality_label);

    DriftReport {
        report_version: REPORT_VERSION,
        dataset: dataset.to_string(),
        timestamp: timestamp.to_string(),
        status,
        overall_score,
        quality_drift,
        num_files: None,
        files_added: delta.added.len(),
        files_removed: delta.removed.len(),
        files_common: delta.common.len(),
        files_total_baseline: baseline.attributes.len(),
        files_total_current: current.attributes.len(),
        orphans_removed_current: 0,
        orphans_detected_baseline: 0,
        attributes,
        embedding,
        weights: Some(settings.weights),
        thresholds: Some(settings.thresholds),
    }
}

fn collect_samples(name: &str, files: &BTreeSet<String>, snapshot: &Snapshot) -> Vec<f64> {
    files
        .iter()
        .filter_map(|file| snapshot.get(file)?.attribute(name))
        .collect()
}

fn attribute_drift(
    name: &str,
    common: &BTreeSet<String>,
    baseline: &SnapshotSet,
    current: &SnapshotSet,
    bins: usize,
) -> Result<DriftMetricResult, MetricUnavailable> {
    let reference = collect_samples(name, common, &baseline.attributes);
    let observed = collect_samples(name, common, &current.attributes);

    let kl = kl_divergence(&reference, &observed, bins)?;
    let wasserstein = wasserstein_distance(&reference, &observed)?;
    let ks = if name == ATTR_SIZE {
        Some(ks_two_sample(&reference, &observed)?)
    } else {
        None
    };
    let mean_change = match (mean(&reference), mean(&observed)) {
        (Some(before), Some(after)) => Some(after - before),
        _ => None,
    };

    Ok(DriftMetricResult {
        kl_divergence: kl,
        wasserstein_distance: wasserstein,
        ks_statistic: ks.map(|result| result.statistic),
        ks_pvalue: ks.map(|result| result.pvalue),
        mean_change,
        baseline_samples: reference.len(),
        current_samples: observed.len(),
    })
}

fn collect_embeddings(snapshot: &Snapshot) -> Vec<Vec<f64>> {
    snapshot
        .values()
        .filter_map(|record| record.vector(ATTR_EMBEDDING))
        .collect()
}

fn embedding_drift(
    baseline: &Snapshot,
    current: &Snapshot,
    gamma: f64,
) -> Result<EmbeddingDriftResult, MetricUnavailable> {
    let reference = collect_embeddings(baseline);
    let observed = collect_embeddings(current);
    check_vectors(&reference, &observed)?;

    let mmd = mmd_rbf(&reference, &observed, gamma)?;
    let baseline_variance = flat_variance(&reference);
    let current_variance = flat_variance(&observed);

    Ok(EmbeddingDriftResult {
        mmd,
        mean_shift: mean_shift(&reference, &observed),
        variance_change: variance_ratio(baseline_variance, current_variance),
        baseline_variance,
        current_variance,
        baseline_count: reference.len(),
        current_count: observed.len(),
    })
}

/// Weighted sum of per-attribute KL terms and the embedding MMD. Metrics
/// that could not be computed contribute nothing.
pub fn aggregate(
    attributes: &BTreeMap<String, DriftMetricResult>,
    embedding: Option<&EmbeddingDriftResult>,
    weights: &DriftWeights,
) -> f64 {
    let attribute_part = attributes
        .iter()
        .map(|(name, result)| weights.for_attribute(name) * result.kl_divergence)
        .sum::<f64>();
    let embedding_part = embedding
        .map(|result| weights.embedding * result.mmd)
        .unwrap_or(0.0);
    attribute_part + embedding_part
}

pub fn classify(overall: f64, thresholds: &Thresholds) -> DriftStatus {
    if overall > thresholds.critical {
        DriftStatus::Critical
    } else if overall > thresholds.warning {
        DriftStatus::Warning
    } else {
        DriftStatus::Normal
    }
}

pub fn quality_label(mean_change: f64) -> QualityDrift {
    if mean_change < -QUALITY_SHIFT_POINTS {
        QualityDrift::Degraded
    } else if mean_change > QUALITY_SHIFT_POINTS {
        QualityDrift::Improved
    } else {
        QualityDrift::Stable
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{Value, json};

    use crate::metrics::{DEFAULT_BINS, DEFAULT_MMD_GAMMA};
    use crate::model::FeatureRecord;

    use super::*;

    fn settings() -> DriftSettings {
        DriftSettings {
            thresholds: Thresholds {
                warning: 0.1,
                critical: 0.5,
            },
            weights: DriftWeights::default(),
            bins: DEFAULT_BINS,
            mmd_gamma: DEFAULT_MMD_GAMMA,
        }
    }

    fn snapshot(entries: &[(&str, Value)]) -> Snapshot {
        entries
            .iter()
            .map(|(key, value)| (key.to_string(), serde_json::from_value(value.clone()).unwrap()))
            .collect()
    }

    fn attributes_only(entries: &[(&str, Value)]) -> SnapshotSet {
        SnapshotSet {
            attributes: snapshot(entries),
            embeddings: Snapshot::new(),
        }
    }

    fn metric(kl: f64) -> DriftMetricResult {
        DriftMetricResult {
            kl_divergence: kl,
            wasserstein_distance: 0.0,
            ks_statistic: None,
            ks_pvalue: None,
            mean_change: None,
            baseline_samples: 1,
            current_samples: 1,
        }
    }

    #[test]
    fn all_zero_metrics_give_zero_and_normal() {
        let attributes = TRACKED_ATTRIBUTES
            .iter()
            .map(|name| (name.to_string(), metric(0.0)))
            .collect::<BTreeMap<_, _>>();
        let embedding = EmbeddingDriftResult {
            mmd: 0.0,
            mean_shift: 0.0,
            variance_change: 0.0,
            baseline_variance: 0.0,
            current_variance: 0.0,
            baseline_count: 2,
            current_count: 2,
        };

        let overall = aggregate(&attributes, Some(&embedding), &DriftWeights::default());
        assert_eq!(overall, 0.0);
        assert_eq!(classify(overall, &settings().thresholds), DriftStatus::Normal);
    }

    #[test]
    fn aggregate_applies_named_weights() {
        let mut attributes = BTreeMap::new();
        attributes.insert(ATTR_SIZE.to_string(), metric(2.0));
        attributes.insert(ATTR_QUALITY.to_string(), metric(1.0));
        let weights = DriftWeights {
            size: 0.3,
            noise_level: 0.0,
            sharpness: 0.0,
            quality: 0.1,
            embedding: 0.7,
        };

        let overall = aggregate(&attributes, None, &weights);
        assert!((overall - 0.7).abs() < 1e-12);
    }

    #[test]
    fn classification_is_strictly_above_thresholds() {
        let thresholds = settings().thresholds;
        assert_eq!(classify(0.1, &thresholds), DriftStatus::Normal);
        assert_eq!(classify(0.11, &thresholds), DriftStatus::Warning);
        assert_eq!(classify(0.5, &thresholds), DriftStatus::Warning);
        assert_eq!(classify(0.51, &thresholds), DriftStatus::Critical);
    }

    #[test]
    fn quality_label_uses_ten_point_band() {
        assert_eq!(quality_label(-10.5), QualityDrift::Degraded);
        assert_eq!(quality_label(-10.0), QualityDrift::Stable);
        assert_eq!(quality_label(4.0), QualityDrift::Stable);
        assert_eq!(quality_label(12.0), QualityDrift::Improved);
    }

    #[test]
    fn identical_snapshots_score_zero() {
        let side = attributes_only(&[
            ("fileA", json!({"size": 1.0})),
            ("fileB", json!({"size": 2.0})),
        ]);
        let report = score("main", "t0", &side, &side, &settings());

        assert_eq!(report.overall_score, 0.0);
        assert_eq!(report.status, DriftStatus::Normal);
        assert_eq!(report.files_added, 0);
        assert_eq!(report.files_removed, 0);
        assert_eq!(report.files_common, 2);
        let size = &report.attributes[ATTR_SIZE];
        assert_eq!(size.ks_statistic, Some(0.0));
        assert_eq!(size.mean_change, Some(0.0));
        assert!(!report.attributes.contains_key(ATTR_NOISE_LEVEL));
        assert_eq!(report.quality_drift, None);
    }

    #[test]
    fn missing_fields_skip_metrics_without_penalty() {
        let baseline = attributes_only(&[("a", json!({"size": 1.0})), ("b", json!({}))]);
        let current = attributes_only(&[("a", json!({"noise_level": 3.0})), ("b", json!({}))]);
        let report = score("main", "t0", &baseline, &current, &settings());

        assert!(report.attributes.is_empty());
        assert_eq!(report.overall_score, 0.0);
        assert_eq!(report.status, DriftStatus::Normal);
    }

    #[test]
    fn empty_common_set_reports_zero_with_counts() {
        let baseline = attributes_only(&[("a", json!({"size": 1.0}))]);
        let current = attributes_only(&[("b", json!({"size": 100.0}))]);
        let report = score("main", "t0", &baseline, &current, &settings());

        assert_eq!(report.files_common, 0);
        assert_eq!(report.files_added, 1);
        assert_eq!(report.files_removed, 1);
        assert_eq!(report.overall_score, 0.0);
        assert_eq!(report.status, DriftStatus::Normal);
    }

    #[test]
    fn quality_drop_is_labelled_degraded() {
        let baseline = attributes_only(&[
            ("a", json!({"sharpness": 90.0, "noise_level": 5.0})),
            ("b", json!({"sharpness": 80.0, "noise_level": 5.0})),
        ]);
        let current = attributes_only(&[
            ("a", json!({"sharpness": 20.0, "noise_level": 40.0})),
            ("b", json!({"sharpness": 10.0, "noise_level": 45.0})),
        ]);
        let report = score("main", "t0", &baseline, &current, &settings());

        assert_eq!(report.quality_drift, Some(QualityDrift::Degraded));
        assert!(report.attributes[ATTR_QUALITY].mean_change.unwrap() < -10.0);
        assert!(report.attributes[ATTR_SHARPNESS].ks_pvalue.is_none());
        assert!(report.overall_score > 0.0);
    }

    #[test]
    fn single_embedding_per_side_is_skipped() {
        let mut baseline = attributes_only(&[("a", json!({"size": 1.0}))]);
        let mut current = baseline.clone();
        baseline.embeddings = snapshot(&[("a", json!({"embedding": [0.0, 0.0]}))]);
        current.embeddings = snapshot(&[("a", json!({"embedding": [9.0, 9.0]}))]);

        let report = score("main", "t0", &baseline, &current, &settings());
        assert!(report.embedding.is_none());
        assert_eq!(report.overall_score, 0.0);
    }

    #[test]
    fn embedding_records_without_vectors_are_ignored() {
        let record = FeatureRecord::from_iter([("cluster", json!(3))]);
        let mut embeddings = Snapshot::new();
        embeddings.insert("a".to_string(), record);
        assert!(collect_embeddings(&embeddings).is_empty());
    }
}
