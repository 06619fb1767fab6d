//! Error types for dockname.

use thiserror::Error;

/// Failures talking to the container runtime.
///
/// Neither kind is fatal: daemon failures are retried with backoff and
/// malformed events are skipped.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The daemon could not be reached or rejected a request.
    #[error("Docker daemon unreachable: {0}")]
    DaemonUnreachable(#[from] bollard::errors::Error),

    /// An event record was missing a required field.
    #[error("Malformed event: {0}")]
    MalformedEvent(String),
}
