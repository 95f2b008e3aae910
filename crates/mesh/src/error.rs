//! Error types for mesh operations.
//!
//! Variants follow how a failure is handled: transport failures are retried
//! on the next tick, verification and staleness failures drop one payload,
//! signing failures abort one send, store failures surface to the caller.

use mapmesh_core::DomainId;
use mapmesh_identity::{AuthorityError, SignError, VerifyError};
use thiserror::Error;

/// Errors that can occur in mesh operations.
#[derive(Debug, Error)]
pub enum MeshError {
    /// Peer or collaborator unreachable, or deadline exceeded
    #[error("Transport error: {0}")]
    Transport(String),

    /// Signature or chain invalid
    #[error("Verification failed: {0}")]
    Verify(#[from] VerifyError),

    /// Timestamp outside the accepted window
    #[error("Stale entry from {origin}: timestamp {timestamp}, now {now}")]
    Stale {
        origin: DomainId,
        timestamp: u64,
        now: u64,
    },

    /// No usable local key or chain
    #[error("Signing failed: {0}")]
    Sign(#[from] SignError),

    /// Durable storage failure
    #[error("Store error: {0}")]
    Store(#[from] rusqlite::Error),

    /// Payload could not be encoded or decoded
    #[error("Codec error: {0}")]
    Codec(String),

    /// Requester or inner record does not match the claimed domain
    #[error("Identity mismatch: expected {expected}, got {found}")]
    IdentityMismatch { expected: DomainId, found: DomainId },

    /// Payload decoded but is not the kind this step expects
    #[error("Unexpected payload: expected {expected}, got {found}")]
    UnexpectedPayload {
        expected: &'static str,
        found: &'static str,
    },

    /// Request arrived without the signature its message type requires
    #[error("Unsigned request")]
    Unsigned,

    /// Peer answered with a negative acknowledgment
    #[error("Rejected by peer: {0}")]
    Rejected(String),

    /// Local invariant broken (poisoned lock, task failure)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl MeshError {
    /// Whether the failed operation may succeed on the next scheduled tick.
    pub fn is_retryable(&self) -> bool {
        matches!(self, MeshError::Transport(_))
    }

    /// Reason string sent back in a negative acknowledgment.
    pub fn ack_reason(&self) -> &'static str {
        match self {
            MeshError::Verify(_) => "invalid signature",
            MeshError::Stale { .. } => "stale entry",
            MeshError::IdentityMismatch { .. } => "identity mismatch",
            MeshError::Codec(_) | MeshError::UnexpectedPayload { .. } => "malformed payload",
            MeshError::Unsigned => "unsigned request",
            _ => "internal error",
        }
    }
}

impl From<serde_json::Error> for MeshError {
    fn from(e: serde_json::Error) -> Self {
        MeshError::Codec(e.to_string())
    }
}

impl From<mapmesh_crypto::CryptoError> for MeshError {
    fn from(e: mapmesh_crypto::CryptoError) -> Self {
        MeshError::Codec(e.to_string())
    }
}

impl From<AuthorityError> for MeshError {
    fn from(e: AuthorityError) -> Self {
        match e {
            AuthorityError::NoActiveRoot { .. } => MeshError::Verify(VerifyError::ChainFetch(e)),
            other => MeshError::Transport(other.to_string()),
        }
    }
}

/// Result type for mesh operations.
pub type MeshResult<T> = Result<T, MeshError>;
