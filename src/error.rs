//! Error taxonomy for fit construction, predictor replacement, and
//! persistence.

use std::io;

/// Errors surfaced at the API boundary.
///
/// A rejected Metropolis-Hastings proposal is never an error; it leaves the
/// prior tree state standing.
#[derive(Debug, thiserror::Error)]
pub enum BartError {
    /// Invalid hyperparameters or mismatched array lengths. No partial fit
    /// is created.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// A replacement predictor column is incompatible with existing splits.
    #[error("incompatible predictor update: {0}")]
    Compatibility(String),

    /// File open, read, or write failure during save/load.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A saved fit file that cannot be interpreted.
    #[error("unrecognized file format: {0}")]
    Format(String),
}

impl BartError {
    pub(crate) fn config(message: impl Into<String>) -> Self {
        BartError::Configuration(message.into())
    }
}
