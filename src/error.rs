//! Error taxonomy for the survival pipeline.
//!
//! Validation and fit failures abort the stage that raised them and are
//! surfaced as `Err` values. Convergence, calibration and extrapolation issues
//! are not errors; they travel as [`crate::warnings::PipelineWarning`] values
//! attached to results.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// A malformed or incomplete input record.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DataValidationError {
    #[error("record {row}: required column '{column}' is missing")]
    MissingColumn { row: usize, column: String },
    #[error("record {row}: column '{column}' has unparseable value '{value}'")]
    InvalidValue {
        row: usize,
        column: String,
        value: String,
    },
    #[error("record {row}: column '{column}' has unknown level '{level}'")]
    UnknownLevel {
        row: usize,
        column: String,
        level: String,
    },
    #[error("record {row}: column '{column}' must be {expected}")]
    WrongKind {
        row: usize,
        column: String,
        expected: &'static str,
    },
    #[error("record {row}: time must be finite and non-negative, found {time}")]
    InvalidTime { row: usize, time: f64 },
    #[error("column '{0}' has zero variance over the included records and cannot be standardized")]
    DegenerateScale(String),
    #[error("no records remain after preparation")]
    Empty,
}

/// The sampling service could not produce a usable draw set.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum FitFailureError {
    #[error("chains {chains:?} failed to initialize after {attempts} attempts")]
    ChainInitialization { chains: Vec<usize>, attempts: usize },
    #[error(
        "chains {chains:?} exceeded the divergence tolerance ({worst_fraction:.3} divergent, tolerance {tolerance:.3})"
    )]
    Divergence {
        chains: Vec<usize>,
        worst_fraction: f64,
        tolerance: f64,
    },
    #[error("sampling exceeded the time budget of {budget:?}")]
    Timeout { budget: Duration },
    #[error("invalid fit request: {0}")]
    InvalidRequest(String),
}

/// A prior configuration that cannot be used.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PriorError {
    #[error("prior for '{class}' has non-positive scale {scale}")]
    NonPositiveScale { class: &'static str, scale: f64 },
    #[error("prior for '{class}' has invalid hyperparameter: {reason}")]
    InvalidHyperparameter { class: &'static str, reason: String },
    #[error("shape prior must have non-negative support; set a lower bound >= 0 or use a positive family")]
    ShapeSupport,
}

/// Failure to read or write a cached draw set.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("could not serialize draw set: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("could not compute fit signature: {0}")]
    Signature(String),
}

/// Failure to load an analysis configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("could not parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Crate-level error returned by pipeline stages.
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("data validation failed: {0}")]
    DataValidation(#[from] DataValidationError),
    #[error("model fit failed: {0}")]
    FitFailure(#[from] FitFailureError),
    #[error("invalid prior: {0}")]
    Prior(#[from] PriorError),
    #[error("cache error: {0}")]
    Cache(#[from] CacheError),
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("auxiliary hazard model failed: {0}")]
    AuxiliaryModel(String),
    #[error("unknown parameter '{0}'")]
    UnknownParameter(String),
}
