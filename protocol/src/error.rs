//! Error types for the DeRec core.
//!
//! Argument and state errors are raised synchronously and leave the secret
//! untouched. Transport failures never show up here: they are absorbed into
//! per-helper pairing status and per-version acknowledgments. The only
//! helper-related failure a caller sees is a version that could not reach
//! its quorum.

use thiserror::Error;

use crate::crypto::derivation::DerivationError;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, DeRecError>;

/// Every way a DeRec operation can fail.
#[derive(Debug, Error)]
pub enum DeRecError {
    /// Malformed identity, URL, payload or configuration. Nothing changed.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The operation is not allowed in the secret's current state (it has
    /// been closed).
    #[error("illegal state: {0}")]
    IllegalState(String),

    /// Key derivation failed. No partial key material is returned.
    #[error("key derivation failed: {0}")]
    Derivation(#[from] DerivationError),

    /// The version was recorded but too few helpers confirmed it before the
    /// deadline. The caller should retry or inspect the acknowledgment map.
    #[error("version {version} not safe: {confirmed} of {required} required confirmations")]
    UpdateNotSafe {
        /// The version number that was recorded.
        version: u64,
        /// Confirmations received before giving up.
        confirmed: usize,
        /// Confirmations the quorum rule required.
        required: usize,
    },

    /// The asynchronous update was superseded by a newer one (or the secret
    /// was closed while it was in flight).
    #[error("update of version {version} was canceled")]
    Canceled {
        /// The version number of the canceled update.
        version: u64,
    },
}

impl DeRecError {
    pub(crate) fn closed() -> Self {
        DeRecError::IllegalState("secret is closed".into())
    }
}
