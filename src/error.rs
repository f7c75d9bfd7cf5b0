/// Fatal conditions of a drift run. Any of these aborts the run before a
/// report or timeline row is written.
#[derive(Debug, thiserror::Error)]
pub enum DriftError {
    #[error("required configuration missing: {field}")]
    ConfigMissing { field: String },

    #[error("invalid configuration for {field}: {message}")]
    ConfigInvalid { field: String, message: String },

    #[error("no current snapshot for dataset {dataset}; run analyze first")]
    NoData { dataset: String },

    #[error("cache {operation} failed for label {label}: {message}")]
    CacheIo {
        operation: &'static str,
        label: String,
        message: String,
    },
}

impl DriftError {
    pub fn config_missing(field: impl Into<String>) -> Self {
        Self::ConfigMissing {
            field: field.into(),
        }
    }

    pub fn config_invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConfigInvalid {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn cache_read(label: &str, err: impl std::fmt::Display) -> Self {
        Self::CacheIo {
            operation: "read",
            label: label.to_string(),
            message: err.to_string(),
        }
    }

    pub fn cache_write(label: &str, err: impl std::fmt::Display) -> Self {
        Self::CacheIo {
            operation: "write",
            label: label.to_string(),
            message: err.to_string(),
        }
    }
}
