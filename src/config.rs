use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use regex::Regex;
use serde::Deserialize;
use tracing::debug;

use crate::error::DriftError;
use crate::metrics::{DEFAULT_BINS, DEFAULT_MMD_GAMMA};
use crate::model::{DriftWeights, Thresholds};

pub const DEFAULT_PARAMS_PATH: &str = "params.toml";

/// Contents of the pipeline params file. Every field is optional at parse
/// time; required values are enforced when settings are resolved.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Params {
    pub analysis: AnalysisParams,
    pub drift: DriftParams,
    pub datasets: Vec<DatasetEntry>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AnalysisParams {
    pub data_dir: Option<PathBuf>,
    pub formats: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DriftParams {
    pub threshold_warning: Option<f64>,
    pub threshold_critical: Option<f64>,
    pub bins: Option<usize>,
    pub mmd_gamma: Option<f64>,
    pub weights: DriftWeights,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatasetEntry {
    pub name: String,
    pub path: PathBuf,
    #[serde(default)]
    pub formats: Option<Vec<String>>,
}

/// Command-line values that take precedence over the params file.
#[derive(Debug, Clone, Default)]
pub struct DriftOverrides {
    pub threshold_warning: Option<f64>,
    pub threshold_critical: Option<f64>,
}

/// Validated scoring configuration for one run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DriftSettings {
    pub thresholds: Thresholds,
    pub weights: DriftWeights,
    pub bins: usize,
    pub mmd_gamma: f64,
}

/// One dataset resolved to concrete paths.
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetTarget {
    pub name: String,
    pub root: PathBuf,
    pub formats: Vec<String>,
}

impl DatasetTarget {
    pub fn analysis_dir(&self) -> PathBuf {
        self.root.join("analysis")
    }

    pub fn drift_dir(&self) -> PathBuf {
        self.analysis_dir().join("drift")
    }

    pub fn current_dir(&self) -> PathBuf {
        self.analysis_dir().join("current")
    }
}

impl Params {
    /// Reads `path`; a missing file yields empty params so that everything can
    /// still be supplied on the command line.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "params file not found; using command-line values only");
            return Ok(Self::default());
        }

        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let params = Self::from_toml(&raw)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        Ok(params)
    }

    pub fn from_toml(raw: &str) -> Result<Self, DriftError> {
        toml::from_str(raw).map_err(|err| DriftError::config_invalid("params", err.to_string()))
    }

    pub fn drift_settings(&self, overrides: &DriftOverrides) -> Result<DriftSettings, DriftError> {
        let warning = overrides
            .threshold_warning
            .or(self.drift.threshold_warning)
            .ok_or_else(|| DriftError::config_missing("drift.threshold_warning"))?;
        let critical = overrides
            .threshold_critical
            .or(self.drift.threshold_critical)
            .ok_or_else(|| DriftError::config_missing("drift.threshold_critical"))?;

        if !warning.is_finite() || !critical.is_finite() || warning < 0.0 {
            return Err(DriftError::config_invalid(
                "drift.thresholds",
                "thresholds must be finite and non-negative",
            ));
        }
        if warning >= critical {
            return Err(DriftError::config_invalid(
                "drift.thresholds",
                format!("threshold_warning ({warning}) must be below threshold_critical ({critical})"),
            ));
        }

        let weights = self.drift.weights;
        for (name, weight) in weights.entries() {
            if !weight.is_finite() || weight < 0.0 {
                return Err(DriftError::config_invalid(
                    format!("drift.weights.{name}"),
                    "weights must be finite and non-negative",
                ));
            }
        }

        let bins = self.drift.bins.unwrap_or(DEFAULT_BINS);
        if bins == 0 {
            return Err(DriftError::config_invalid("drift.bins", "must be at least 1"));
        }

        let mmd_gamma = self.drift.mmd_gamma.unwrap_or(DEFAULT_MMD_GAMMA);
        if !mmd_gamma.is_finite() || mmd_gamma <= 0.0 {
            return Err(DriftError::config_invalid("drift.mmd_gamma", "must be positive"));
        }

        Ok(DriftSettings {
            thresholds: Thresholds { warning, critical },
            weights,
            bins,
            mmd_gamma,
        })
    }

    /// Resolves which dataset a single-dataset command works on. An explicit
    /// directory wins, then a named entry, then `analysis.data_dir`.
    pub fn dataset(
        &self,
        name: Option<&str>,
        data_dir: Option<&Path>,
    ) -> Result<DatasetTarget, DriftError> {
        if let Some(root) = data_dir {
            let name = name
                .map(ToOwned::to_owned)
                .or_else(|| {
                    root.file_name()
                        .and_then(|value| value.to_str())
                        .map(ToOwned::to_owned)
                })
                .unwrap_or_else(|| "default".to_string());
            return self.target(&name, root, None);
        }

        if let Some(name) = name {
            let entry = self
                .datasets
                .iter()
                .find(|entry| entry.name == name)
                .ok_or_else(|| {
                    DriftError::config_invalid("datasets", format!("unknown dataset: {name}"))
                })?;
            return self.target(&entry.name, &entry.path, entry.formats.as_deref());
        }

        let root = self
            .analysis
            .data_dir
            .as_deref()
            .ok_or_else(|| DriftError::config_missing("analysis.data_dir"))?;
        let name = root
            .file_name()
            .and_then(|value| value.to_str())
            .unwrap_or("default")
            .to_string();
        self.target(&name, root, None)
    }

    /// Every configured dataset, or the single `analysis.data_dir` dataset
    /// when the list is empty.
    pub fn all_datasets(&self) -> Result<Vec<DatasetTarget>, DriftError> {
        if self.datasets.is_empty() {
            return Ok(vec![self.dataset(None, None)?]);
        }

        self.datasets
            .iter()
            .map(|entry| self.target(&entry.name, &entry.path, entry.formats.as_deref()))
            .collect()
    }

    fn target(
        &self,
        name: &str,
        root: &Path,
        formats: Option<&[String]>,
    ) -> Result<DatasetTarget, DriftError> {
        validate_dataset_name(name)?;
        if root.as_os_str().is_empty() {
            return Err(DriftError::config_missing(format!("datasets.{name}.path")));
        }

        Ok(DatasetTarget {
            name: name.to_string(),
            root: root.to_path_buf(),
            formats: formats
                .map(<[String]>::to_vec)
                .unwrap_or_else(|| self.analysis.formats.clone()),
        })
    }
}

fn validate_dataset_name(name: &str) -> Result<(), DriftError> {
    let pattern = Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.-]*$")
        .map_err(|err| DriftError::config_invalid("datasets.name", err.to_string()))?;

    if pattern.is_match(name) {
        Ok(())
    } else {
        Err(DriftError::config_invalid(
            "datasets.name",
            format!("dataset name must be alphanumeric with _ . - only: {name:?}"),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"
        [analysis]
        data_dir = "datasets/main"
        formats = ["jpg", "png"]

        [drift]
        threshold_warning = 0.15
        threshold_critical = 0.3
        bins = 10

        [drift.weights]
        embedding = 0.5

        [[datasets]]
        name = "alpha"
        path = "datasets/alpha"

        [[datasets]]
        name = "beta"
        path = "datasets/beta"
        formats = ["tif"]
    "#;

    #[test]
    fn parses_full_params_file() {
        let params = Params::from_toml(FULL).unwrap();
        let settings = params.drift_settings(&DriftOverrides::default()).unwrap();

        assert_eq!(settings.thresholds, Thresholds { warning: 0.15, critical: 0.3 });
        assert_eq!(settings.bins, 10);
        assert_eq!(settings.mmd_gamma, DEFAULT_MMD_GAMMA);
        assert_eq!(settings.weights.embedding, 0.5);
        assert_eq!(settings.weights.size, DriftWeights::default().size);
    }

    #[test]
    fn missing_thresholds_are_reported_by_field() {
        let params = Params::from_toml("[drift]\nthreshold_warning = 0.1\n").unwrap();
        let err = params.drift_settings(&DriftOverrides::default()).unwrap_err();
        assert!(matches!(
            err,
            DriftError::ConfigMissing { ref field } if field == "drift.threshold_critical"
        ));
    }

    #[test]
    fn overrides_supply_and_replace_thresholds() {
        let params = Params::default();
        let overrides = DriftOverrides {
            threshold_warning: Some(0.2),
            threshold_critical: Some(0.4),
        };
        let settings = params.drift_settings(&overrides).unwrap();
        assert_eq!(settings.thresholds.warning, 0.2);
        assert_eq!(settings.thresholds.critical, 0.4);
    }

    #[test]
    fn misordered_thresholds_are_invalid() {
        let params =
            Params::from_toml("[drift]\nthreshold_warning = 0.5\nthreshold_critical = 0.2\n")
                .unwrap();
        assert!(matches!(
            params.drift_settings(&DriftOverrides::default()),
            Err(DriftError::ConfigInvalid { .. })
        ));
    }

    #[test]
    fn negative_weight_is_invalid() {
        let params = Params::from_toml(
            "[drift]\nthreshold_warning = 0.1\nthreshold_critical = 0.2\n[drift.weights]\nsize = -1.0\n",
        )
        .unwrap();
        let err = params.drift_settings(&DriftOverrides::default()).unwrap_err();
        assert!(matches!(
            err,
            DriftError::ConfigInvalid { ref field, .. } if field == "drift.weights.size"
        ));
    }

    #[test]
    fn dataset_resolution_order() {
        let params = Params::from_toml(FULL).unwrap();

        let default = params.dataset(None, None).unwrap();
        assert_eq!(default.name, "main");
        assert_eq!(default.formats, vec!["jpg", "png"]);

        let beta = params.dataset(Some("beta"), None).unwrap();
        assert_eq!(beta.root, PathBuf::from("datasets/beta"));
        assert_eq!(beta.formats, vec!["tif"]);
        assert_eq!(beta.drift_dir(), PathBuf::from("datasets/beta/analysis/drift"));

        let explicit = params.dataset(None, Some(Path::new("/data/gamma"))).unwrap();
        assert_eq!(explicit.name, "gamma");

        assert!(params.dataset(Some("missing"), None).is_err());
    }

    #[test]
    fn missing_data_dir_is_config_missing() {
        let err = Params::default().dataset(None, None).unwrap_err();
        assert!(matches!(
            err,
            DriftError::ConfigMissing { ref field } if field == "analysis.data_dir"
        ));
    }

    #[test]
    fn all_datasets_lists_entries() {
        let params = Params::from_toml(FULL).unwrap();
        let names = params
            .all_datasets()
            .unwrap()
            .into_iter()
            .map(|target| target.name)
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["alpha", "beta"]);
    }

    #[test]
    fn rejects_unsafe_dataset_names() {
        assert!(validate_dataset_name("main-2024.v1").is_ok());
        assert!(validate_dataset_name("../escape").is_err());
        assert!(validate_dataset_name("").is_err());
    }

    #[test]
    fn missing_params_file_loads_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let params = Params::load(&dir.path().join("params.toml")).unwrap();
        assert!(params.datasets.is_empty());
    }
}
