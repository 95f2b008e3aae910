//! Trust model for MapMesh: certificates, roots of trust, and the two
//! operations every node needs from them.
//!
//! - [`TrustEngine::verify`] decides whether a signed blob is bound to a
//!   claimed domain, accepting chains under the current TRC or, during its
//!   grace period, under the previous one.
//! - [`SignerGenerator::generate`] picks the local key whose chain expires
//!   latest and produces a [`SigningIdentity`].
//!
//! Chains and TRCs come from a [`CertificateAuthority`] collaborator.

pub mod authority;
pub mod engine;
pub mod error;
pub mod pki;
pub mod signer;

pub use authority::{
    CertificateAuthority, RootOfTrustQuery, StaticCertificateAuthority, TrustMaterial,
};
pub use engine::{TrustAnchors, TrustEngine};
pub use error::{AuthorityError, ChainError, MaterialError, SignError, VerifyError};
pub use pki::{
    Certificate, CertificateChain, CertificateIssuer, RootAuthority, RootKey, RootOfTrust,
    RootOfTrustId,
};
pub use signer::{SignerGenerator, SigningIdentity};
