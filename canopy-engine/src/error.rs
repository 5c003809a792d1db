//! Engine error taxonomy
//!
//! Configuration errors are raised before any external mutation. Build, run
//! and rollout errors are fatal to their command but never trigger automatic
//! rollback of work already applied (uploaded pipeline versions stay
//! uploaded, canaries stay at 0% traffic). The dispatcher's messenger is the
//! single point converting these into operator-visible text.

use canopy_client::ClientError;
use thiserror::Error;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Bad or missing configuration; raised before touching any platform
    #[error("configuration error: {0}")]
    Config(String),

    /// A container image build failed; carries the image name and its logs
    #[error("failed while building container image: {image}\n{details}")]
    Build { image: String, details: String },

    /// Pipeline definition failed to compile
    #[error("pipeline compilation failed: {0}")]
    Compile(String),

    /// A run finished with a status other than Succeeded
    #[error("run error: {0}")]
    Run(String),

    /// Rollout failed; the endpoint is left as-is for operator inspection
    #[error("rollout error: {0}")]
    Rollout(String),

    /// Collaboration platform operation failed
    #[error("collaboration platform error: {0}")]
    Collab(String),

    /// An external platform call failed
    #[error(transparent)]
    Client(#[from] ClientError),

    /// Local I/O (archiving, temp files, sample input)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Terminal failure already reported through the messenger; callers
    /// propagate it to a non-zero exit without reporting again
    #[error("{0}")]
    Aborted(String),
}
