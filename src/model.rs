use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::metrics::quality_score;

pub const REPORT_VERSION: u32 = 1;

pub const ATTR_SIZE: &str = "size";
pub const ATTR_WIDTH: &str = "width";
pub const ATTR_HEIGHT: &str = "height";
pub const ATTR_NOISE_LEVEL: &str = "noise_level";
pub const ATTR_SHARPNESS: &str = "sharpness";
pub const ATTR_QUALITY: &str = "quality";
pub const ATTR_EMBEDDING: &str = "embedding";

/// Features of one source file as written by the feature engine. Fields the
/// scorer does not recognize are carried along untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureRecord(pub BTreeMap<String, Value>);

impl FeatureRecord {
    pub fn scalar(&self, name: &str) -> Option<f64> {
        self.0
            .get(name)
            .and_then(Value::as_f64)
            .filter(|value| value.is_finite())
    }

    pub fn vector(&self, name: &str) -> Option<Vec<f64>> {
        let items = self.0.get(name)?.as_array()?;
        if items.is_empty() {
            return None;
        }

        items
            .iter()
            .map(|item| item.as_f64().filter(|value| value.is_finite()))
            .collect()
    }

    /// Derived quality score, available when both sharpness and noise are.
    pub fn quality(&self) -> Option<f64> {
        let sharpness = self.scalar(ATTR_SHARPNESS)?;
        let noise = self.scalar(ATTR_NOISE_LEVEL)?;
        Some(quality_score(sharpness, noise))
    }

    /// Scalar lookup that also resolves the derived `quality` attribute.
    pub fn attribute(&self, name: &str) -> Option<f64> {
        if name == ATTR_QUALITY {
            self.quality()
        } else {
            self.scalar(name)
        }
    }
}

impl<K: Into<String>> FromIterator<(K, Value)> for FeatureRecord {
    fn from_iter<I: IntoIterator<Item = (K, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(key, value)| (key.into(), value)).collect())
    }
}

/// File name -> features for one dataset state.
pub type Snapshot = BTreeMap<String, FeatureRecord>;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum SnapshotLabel {
    Attributes,
    AttributesBaseline,
    Embeddings,
    EmbeddingsBaseline,
}

impl SnapshotLabel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Attributes => "attribute_analysis",
            Self::AttributesBaseline => "attribute_analysis_baseline",
            Self::Embeddings => "embedding_analysis",
            Self::EmbeddingsBaseline => "embedding_analysis_baseline",
        }
    }
}

impl fmt::Display for SnapshotLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Attribute and embedding snapshots for one side of a comparison.
#[derive(Debug, Clone, Default)]
pub struct SnapshotSet {
    pub attributes: Snapshot,
    pub embeddings: Snapshot,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DriftStatus {
    BaselineCreated,
    Normal,
    Warning,
    Critical,
}

impl DriftStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::BaselineCreated => "BASELINE_CREATED",
            Self::Normal => "NORMAL",
            Self::Warning => "WARNING",
            Self::Critical => "CRITICAL",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "BASELINE_CREATED" => Some(Self::BaselineCreated),
            "NORMAL" => Some(Self::Normal),
            "WARNING" => Some(Self::Warning),
            "CRITICAL" => Some(Self::Critical),
            _ => None,
        }
    }
}

impl fmt::Display for DriftStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QualityDrift {
    Degraded,
    Stable,
    Improved,
}

impl QualityDrift {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Degraded => "DEGRADED",
            Self::Stable => "STABLE",
            Self::Improved => "IMPROVED",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftMetricResult {
    pub kl_divergence: f64,
    pub wasserstein_distance: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ks_statistic: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ks_pvalue: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mean_change: Option<f64>,
    pub baseline_samples: usize,
    pub current_samples: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingDriftResult {
    pub mmd: f64,
    pub mean_shift: f64,
    pub variance_change: f64,
    pub baseline_variance: f64,
    pub current_variance: f64,
    pub baseline_count: usize,
    pub current_count: usize,
}

/// Relative contribution of each metric to the overall score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriftWeights {
    pub size: f64,
    pub noise_level: f64,
    pub sharpness: f64,
    pub quality: f64,
    pub embedding: f64,
}

impl Default for DriftWeights {
    fn default() -> Self {
        Self {
            size: 0.15,
            noise_level: 0.15,
            sharpness: 0.15,
            quality: 0.15,
            embedding: 0.40,
        }
    }
}

impl DriftWeights {
    pub fn for_attribute(&self, name: &str) -> f64 {
        match name {
            ATTR_SIZE => self.size,
            ATTR_NOISE_LEVEL => self.noise_level,
            ATTR_SHARPNESS => self.sharpness,
            ATTR_QUALITY => self.quality,
            _ => 0.0,
        }
    }

    pub fn entries(&self) -> [(&'static str, f64); 5] {
        [
            (ATTR_SIZE, self.size),
            (ATTR_NOISE_LEVEL, self.noise_level),
            (ATTR_SHARPNESS, self.sharpness),
            (ATTR_QUALITY, self.quality),
            (ATTR_EMBEDDING, self.embedding),
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    pub warning: f64,
    pub critical: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FileDelta {
    pub added: BTreeSet<String>,
    pub removed: BTreeSet<String>,
    pub common: BTreeSet<String>,
}

impl FileDelta {
    pub fn between(baseline: &Snapshot, current: &Snapshot) -> Self {
        let mut delta = Self::default();
        for key in current.keys() {
            if baseline.contains_key(key) {
                delta.common.insert(key.clone());
            } else {
                delta.added.insert(key.clone());
            }
        }
        for key in baseline.keys() {
            if !current.contains_key(key) {
                delta.removed.insert(key.clone());
            }
        }
        delta
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftReport {
    pub report_version: u32,
    pub dataset: String,
    pub timestamp: String,
    pub status: DriftStatus,
    pub overall_score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality_drift: Option<QualityDrift>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_files: Option<usize>,
    pub files_added: usize,
    pub files_removed: usize,
    pub files_common: usize,
    pub files_total_baseline: usize,
    pub files_total_current: usize,
    pub orphans_removed_current: usize,
    pub orphans_detected_baseline: usize,
    pub attributes: BTreeMap<String, DriftMetricResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<EmbeddingDriftResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weights: Option<DriftWeights>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thresholds: Option<Thresholds>,
}

impl DriftReport {
    pub fn baseline_created(dataset: &str, timestamp: &str, num_files: usize) -> Self {
        Self {
            report_version: REPORT_VERSION,
            dataset: dataset.to_string(),
            timestamp: timestamp.to_string(),
            status: DriftStatus::BaselineCreated,
            overall_score: 0.0,
            quality_drift: None,
            num_files: Some(num_files),
            files_added: 0,
            files_removed: 0,
            files_common: 0,
            files_total_baseline: num_files,
            files_total_current: num_files,
            orphans_removed_current: 0,
            orphans_detected_baseline: 0,
            attributes: BTreeMap::new(),
            embedding: None,
            weights: None,
            thresholds: None,
        }
    }

    pub fn timeline_row(&self) -> TimelineRow {
        TimelineRow {
            timestamp: self.timestamp.clone(),
            overall_score: self.overall_score,
            status: self.status,
            files_added: self.files_added,
            files_removed: self.files_removed,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TimelineRow {
    pub timestamp: String,
    pub overall_score: f64,
    pub status: DriftStatus,
    pub files_added: usize,
    pub files_removed: usize,
}

/// Per-dataset summary written after features are imported.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisSummary {
    pub dataset: String,
    pub timestamp: String,
    pub num_files: usize,
    pub avg_size: f64,
    pub avg_width: f64,
    pub avg_height: f64,
    pub num_embeddings: usize,
    pub embedding_dim: usize,
    pub num_clusters: usize,
    pub orphans_removed: usize,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn record(value: Value) -> FeatureRecord {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn feature_record_tolerates_unknown_and_non_numeric_fields() {
        let rec = record(json!({
            "size": 1.5,
            "format": "jpg",
            "embedding": [0.1, "x"],
            "sharpness": null
        }));

        assert_eq!(rec.scalar(ATTR_SIZE), Some(1.5));
        assert_eq!(rec.scalar("format"), None);
        assert_eq!(rec.scalar(ATTR_SHARPNESS), None);
        assert_eq!(rec.vector(ATTR_EMBEDDING), None);
        assert_eq!(rec.quality(), None);
    }

    #[test]
    fn quality_attribute_resolves_from_sharpness_and_noise() {
        let rec = record(json!({"sharpness": 100.0, "noise_level": 0.0}));
        assert_eq!(rec.attribute(ATTR_QUALITY), Some(100.0));
    }

    #[test]
    fn file_delta_splits_added_removed_common() {
        let mut baseline = Snapshot::new();
        baseline.insert("a.jpg".to_string(), FeatureRecord::default());
        baseline.insert("old.jpg".to_string(), FeatureRecord::default());
        let mut current = Snapshot::new();
        current.insert("a.jpg".to_string(), FeatureRecord::default());
        current.insert("new.jpg".to_string(), FeatureRecord::default());

        let delta = FileDelta::between(&baseline, &current);
        assert_eq!(delta.added.iter().collect::<Vec<_>>(), vec!["new.jpg"]);
        assert_eq!(delta.removed.iter().collect::<Vec<_>>(), vec!["old.jpg"]);
        assert_eq!(delta.common.iter().collect::<Vec<_>>(), vec!["a.jpg"]);
    }

    #[test]
    fn status_serializes_in_screaming_case() {
        let encoded = serde_json::to_string(&DriftStatus::BaselineCreated).unwrap();
        assert_eq!(encoded, "\"BASELINE_CREATED\"");
        assert_eq!(DriftStatus::parse("WARNING"), Some(DriftStatus::Warning));
        assert_eq!(DriftStatus::parse("bogus"), None);
    }
}
