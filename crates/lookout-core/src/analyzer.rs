//! Detection/embedding capability consumed by the gallery builder and the
//! recognition loop. Model internals live behind this trait.

use crate::types::{DetectedFace, Frame};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnalyzerError {
    #[error("model unavailable: {0}")]
    ModelUnavailable(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("invalid frame: {0}")]
    InvalidFrame(String),
}

/// Finds faces in a frame and computes one embedding per face.
///
/// Implementations are shared across threads; inference backends that need
/// exclusive access should serialize internally (e.g. a mutex around the session).
pub trait FaceAnalyzer: Send + Sync {
    /// Make sure the underlying models are loaded. Called once per recognition
    /// session before the gallery is built.
    fn prepare(&self) -> Result<(), AnalyzerError> {
        Ok(())
    }

    /// Detect every face in `frame`. An empty result is not an error.
    fn analyze(&self, frame: &Frame) -> Result<Vec<DetectedFace>, AnalyzerError>;
}
