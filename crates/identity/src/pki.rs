//! Certificates, certificate chains and roots of trust.
//!
//! The hierarchy is deliberately shallow: a root of trust (TRC) lists the
//! root keys of an ISD, a CA certificate is signed by one of those keys, and
//! an AS certificate (the chain leaf) is signed by the CA.

use crate::error::ChainError;
use mapmesh_core::DomainId;
use mapmesh_crypto::envelope::hex_bytes;
use mapmesh_crypto::{PrivateKeyHandle, PublicKey, SubjectKeyId};
use serde::{Deserialize, Serialize};

/// Certificate binding a domain to a public key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Certificate {
    pub serial: u64,
    pub subject: DomainId,
    pub subject_key_id: SubjectKeyId,
    pub public_key: PublicKey,
    pub issuer: DomainId,
    pub issuer_key_id: SubjectKeyId,
    /// Not valid before (Unix seconds)
    pub not_before: u64,
    /// Not valid after (Unix seconds)
    pub not_after: u64,
    pub is_ca: bool,
    /// Issuer's Ed25519 signature over [`Certificate::signing_bytes`]
    #[serde(with = "hex_bytes")]
    pub signature: Vec<u8>,
}

#[derive(Serialize)]
struct CertificateBody<'a> {
    serial: u64,
    subject: &'a DomainId,
    subject_key_id: &'a SubjectKeyId,
    public_key: &'a PublicKey,
    issuer: &'a DomainId,
    issuer_key_id: &'a SubjectKeyId,
    not_before: u64,
    not_after: u64,
    is_ca: bool,
}

impl Certificate {
    /// Canonical encoding of every field except the signature.
    pub fn signing_bytes(&self) -> Vec<u8> {
        let body = CertificateBody {
            serial: self.serial,
            subject: &self.subject,
            subject_key_id: &self.subject_key_id,
            public_key: &self.public_key,
            issuer: &self.issuer,
            issuer_key_id: &self.issuer_key_id,
            not_before: self.not_before,
            not_after: self.not_after,
            is_ca: self.is_ca,
        };
        // Plain struct of strings and integers; serialization cannot fail.
        serde_json::to_vec(&body).unwrap_or_default()
    }

    pub fn is_valid_at(&self, now: u64) -> bool {
        self.not_before <= now && now <= self.not_after
    }

    fn verify_issued_by(&self, issuer_key: &PublicKey) -> Result<(), ChainError> {
        issuer_key
            .verify(&self.signing_bytes(), &self.signature)
            .map_err(|_| ChainError::BadSignature {
                serial: self.serial,
            })
    }
}

/// Leaf-first chain: `[AS certificate, CA certificate]`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct CertificateChain(Vec<Certificate>);

impl CertificateChain {
    pub fn new(leaf: Certificate, ca: Certificate) -> Self {
        Self(vec![leaf, ca])
    }

    pub fn certificates(&self) -> &[Certificate] {
        &self.0
    }

    pub fn leaf(&self) -> Option<&Certificate> {
        self.0.first()
    }

    pub fn ca(&self) -> Option<&Certificate> {
        self.0.get(1)
    }

    /// Validate the chain up to `root` at time `now`.
    ///
    /// Checks shape, validity periods, issuer linkage and both signatures.
    /// Does not decide whether `root` itself is an acceptable anchor.
    pub fn verify(&self, root: &RootOfTrust, now: u64) -> Result<(), ChainError> {
        let (leaf, ca) = match self.0.as_slice() {
            [leaf, ca] => (leaf, ca),
            other => {
                return Err(ChainError::Malformed(format!(
                    "expected 2 certificates, got {}",
                    other.len()
                )))
            }
        };
        if leaf.is_ca || !ca.is_ca {
            return Err(ChainError::Malformed(
                "chain must be [AS certificate, CA certificate]".to_string(),
            ));
        }
        if leaf.issuer != ca.subject || leaf.issuer_key_id != ca.subject_key_id {
            return Err(ChainError::Malformed(
                "leaf not issued by chain CA".to_string(),
            ));
        }
        if ca.subject.isd() != root.id.isd || leaf.subject.isd() != root.id.isd {
            return Err(ChainError::IsdMismatch {
                chain: leaf.subject.isd(),
                root: root.id.isd,
            });
        }
        for cert in [leaf, ca] {
            if !cert.is_valid_at(now) {
                return Err(ChainError::Expired {
                    serial: cert.serial,
                    now,
                });
            }
        }

        let root_key = root
            .root_key(&ca.issuer_key_id)
            .ok_or_else(|| ChainError::UnknownRootKey {
                key_id: ca.issuer_key_id.to_string(),
            })?;
        ca.verify_issued_by(&root_key.public_key)?;
        leaf.verify_issued_by(&ca.public_key)?;
        Ok(())
    }
}

/// Identifier of one TRC generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RootOfTrustId {
    pub isd: u16,
    pub base: u64,
    pub serial: u64,
}

impl std::fmt::Display for RootOfTrustId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ISD{}-B{}-S{}", self.isd, self.base, self.serial)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RootKey {
    pub key_id: SubjectKeyId,
    pub public_key: PublicKey,
}

/// Root of trust (TRC) for one ISD.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RootOfTrust {
    pub id: RootOfTrustId,
    pub not_before: u64,
    pub not_after: u64,
    /// Window after `not_before` during which the previous serial stays valid
    pub grace_period_secs: u64,
    pub roots: Vec<RootKey>,
}

impl RootOfTrust {
    pub fn is_valid_at(&self, now: u64) -> bool {
        self.not_before <= now && now <= self.not_after
    }

    /// End of the grace window this TRC opens for its predecessor.
    ///
    /// Base TRCs have no predecessor and therefore no grace window.
    pub fn grace_period_end(&self) -> Option<u64> {
        if self.id.serial > self.id.base && self.grace_period_secs > 0 {
            Some(self.not_before.saturating_add(self.grace_period_secs))
        } else {
            None
        }
    }

    pub fn in_grace_period(&self, now: u64) -> bool {
        matches!(self.grace_period_end(), Some(end) if self.not_before <= now && now < end)
    }

    /// Serial of the predecessor TRC, if any.
    pub fn previous_serial(&self) -> Option<u64> {
        (self.id.serial > self.id.base).then(|| self.id.serial - 1)
    }

    pub fn root_key(&self, key_id: &SubjectKeyId) -> Option<&RootKey> {
        self.roots.iter().find(|r| &r.key_id == key_id)
    }
}

/// Issuer of TRCs and CA certificates for one ISD.
#[derive(Debug, Clone)]
pub struct RootAuthority {
    domain: DomainId,
    key: PrivateKeyHandle,
}

impl RootAuthority {
    /// `domain` is the core AS holding the root key.
    pub fn new(domain: DomainId, key: PrivateKeyHandle) -> Self {
        Self { domain, key }
    }

    pub fn generate(domain: DomainId) -> Self {
        Self::new(domain, PrivateKeyHandle::generate())
    }

    pub fn domain(&self) -> DomainId {
        self.domain
    }

    /// TRC listing this authority's root key (plus any `extra_roots`).
    pub fn root_of_trust(
        &self,
        base: u64,
        serial: u64,
        not_before: u64,
        not_after: u64,
        grace_period_secs: u64,
        extra_roots: &[RootKey],
    ) -> RootOfTrust {
        let mut roots = vec![RootKey {
            key_id: self.key.key_id().clone(),
            public_key: self.key.public_key(),
        }];
        roots.extend_from_slice(extra_roots);
        RootOfTrust {
            id: RootOfTrustId {
                isd: self.domain.isd(),
                base,
                serial,
            },
            not_before,
            not_after,
            grace_period_secs,
            roots,
        }
    }

    pub fn root_key(&self) -> RootKey {
        RootKey {
            key_id: self.key.key_id().clone(),
            public_key: self.key.public_key(),
        }
    }

    /// Issue a CA certificate for `ca_key` and return an issuer that can
    /// sign AS certificates with it.
    pub fn issue_ca(
        &self,
        serial: u64,
        ca_key: PrivateKeyHandle,
        not_before: u64,
        not_after: u64,
    ) -> CertificateIssuer {
        let certificate = sign_certificate(
            &self.key,
            self.domain,
            serial,
            self.domain,
            &ca_key,
            not_before,
            not_after,
            true,
        );
        CertificateIssuer {
            certificate,
            key: ca_key,
        }
    }
}

/// CA that issues AS certificate chains.
#[derive(Debug, Clone)]
pub struct CertificateIssuer {
    certificate: Certificate,
    key: PrivateKeyHandle,
}

impl CertificateIssuer {
    pub fn certificate(&self) -> &Certificate {
        &self.certificate
    }

    /// Issue an AS certificate for `subject_key` and return the full chain.
    pub fn issue_chain(
        &self,
        serial: u64,
        subject: DomainId,
        subject_key: &PrivateKeyHandle,
        not_before: u64,
        not_after: u64,
    ) -> CertificateChain {
        let leaf = sign_certificate(
            &self.key,
            self.certificate.subject,
            serial,
            subject,
            subject_key,
            not_before,
            not_after,
            false,
        );
        CertificateChain::new(leaf, self.certificate.clone())
    }
}

#[allow(clippy::too_many_arguments)]
fn sign_certificate(
    issuer_key: &PrivateKeyHandle,
    issuer: DomainId,
    serial: u64,
    subject: DomainId,
    subject_key: &PrivateKeyHandle,
    not_before: u64,
    not_after: u64,
    is_ca: bool,
) -> Certificate {
    let mut cert = Certificate {
        serial,
        subject,
        subject_key_id: subject_key.key_id().clone(),
        public_key: subject_key.public_key(),
        issuer,
        issuer_key_id: issuer_key.key_id().clone(),
        not_before,
        not_after,
        is_ca,
        signature: Vec::new(),
    };
    cert.signature = issuer_key.sign(&cert.signing_bytes());
    cert
}
