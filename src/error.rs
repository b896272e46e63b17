//! Failure taxonomy for the detector.
//!
//! Plumbing returns `anyhow::Result`; these variants are attached where the
//! caller needs to tell failures apart (the camera alert, for instance).

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SmileError {
    /// One of the model files could not be read or initialised
    #[error("failed to load model {name}: {reason}")]
    ModelLoad { name: String, reason: String },

    /// Detection was requested before the models finished loading
    #[error("models are not loaded")]
    ModelsNotReady,

    /// Camera permission denied, or no usable device
    #[error("camera unavailable: {0}")]
    CameraUnavailable(String),

    /// Inference produced something we could not interpret
    #[error("detection failed: {0}")]
    Detection(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("failed to export {}: {reason}", .path.display())]
    Export { path: PathBuf, reason: String },
}

impl SmileError {
    pub fn model_load(name: &str, err: impl std::fmt::Display) -> Self {
        SmileError::ModelLoad {
            name: name.to_string(),
            reason: err.to_string(),
        }
    }

    /// True for failures the user has to act on (grant access, plug in a
    /// camera) rather than ones that only land in the log.
    pub fn needs_alert(&self) -> bool {
        matches!(self, SmileError::CameraUnavailable(_))
    }
}
