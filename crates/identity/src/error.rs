//! Error types for trust evaluation and signer selection.

use mapmesh_core::DomainId;
use thiserror::Error;

/// Structural or cryptographic failure of a single certificate chain.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChainError {
    #[error("Malformed chain: {0}")]
    Malformed(String),

    #[error("Certificate {serial} not valid at {now}")]
    Expired { serial: u64, now: u64 },

    #[error("Root of trust {isd}-{serial} not valid at {now}")]
    RootExpired { isd: u16, serial: u64, now: u64 },

    #[error("Issuer key {key_id} not listed in root of trust")]
    UnknownRootKey { key_id: String },

    #[error("Certificate {serial} has an invalid issuer signature")]
    BadSignature { serial: u64 },

    #[error("ISD mismatch: chain for ISD {chain}, root of trust for ISD {root}")]
    IsdMismatch { chain: u16, root: u16 },
}

/// Failures of the certificate authority collaborator.
#[derive(Debug, Clone, Error)]
pub enum AuthorityError {
    #[error("Certificate authority unavailable: {0}")]
    Unavailable(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Malformed response: {0}")]
    Malformed(String),

    #[error("No root of trust for ISD {isd} is active at {now}")]
    NoActiveRoot { isd: u16, now: u64 },
}

/// Why a signed blob was rejected. Every variant means "do not trust".
#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("Chain fetch failed: {0}")]
    ChainFetch(#[from] AuthorityError),

    #[error("No valid chain for {domain}: {reason}")]
    ChainInvalid { domain: DomainId, reason: String },

    #[error("Signature by {domain} does not verify")]
    SignatureInvalid { domain: DomainId },

    #[error("Signature claims {signer}, expected {claimed}")]
    DomainMismatch { claimed: DomainId, signer: DomainId },
}

/// Why no signing identity could be produced.
#[derive(Debug, Error)]
pub enum SignError {
    #[error("No private keys available")]
    NoKeysAvailable,

    #[error("No key of {domain} has a chain valid under the current or grace root of trust")]
    NoValidChain { domain: DomainId },

    #[error("Chain fetch failed: {0}")]
    ChainFetch(#[from] AuthorityError),
}

/// Errors loading trust material from disk.
#[derive(Debug, Error)]
pub enum MaterialError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
