//! Cryptographic primitives for MapMesh.
//!
//! - **Keys**: Ed25519 private key handles loaded from hex seed files,
//!   public keys and BLAKE3 subject key identifiers
//! - **Envelopes**: detachable signatures over opaque blobs
//!
//! Chain and root-of-trust evaluation lives in `mapmesh-identity`; this crate
//! only knows whether bytes were signed by a key.

pub mod envelope;
pub mod keys;

pub use envelope::{Signature, SignedEnvelope};
pub use keys::{load_key_dir, CryptoError, PrivateKeyHandle, PublicKey, Result, SubjectKeyId};
