//! Certificate authority collaborator.
//!
//! The trust engine and the signer only see the [`CertificateAuthority`]
//! trait. [`StaticCertificateAuthority`] serves material held in memory or
//! loaded from a JSON file; the mesh crate adds a remote client that asks a
//! CA node over the messenger.

use crate::error::{AuthorityError, MaterialError};
use crate::pki::{CertificateChain, RootOfTrust};
use async_trait::async_trait;
use mapmesh_core::DomainId;
use mapmesh_crypto::SubjectKeyId;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::RwLock;

/// Which TRC generation to fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootOfTrustQuery {
    pub isd: u16,
    /// `None` selects the latest serial
    pub serial: Option<u64>,
}

impl RootOfTrustQuery {
    pub fn latest(isd: u16) -> Self {
        Self { isd, serial: None }
    }

    pub fn serial(isd: u16, serial: u64) -> Self {
        Self {
            isd,
            serial: Some(serial),
        }
    }
}

#[async_trait]
pub trait CertificateAuthority: Send + Sync {
    /// All chains issued to `domain` for the key `subject_key_id`.
    async fn get_chains(
        &self,
        domain: DomainId,
        subject_key_id: &SubjectKeyId,
    ) -> Result<Vec<CertificateChain>, AuthorityError>;

    async fn get_root_of_trust(
        &self,
        query: RootOfTrustQuery,
    ) -> Result<RootOfTrust, AuthorityError>;
}

/// On-disk trust material: every known TRC and chain.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrustMaterial {
    #[serde(default)]
    pub roots_of_trust: Vec<RootOfTrust>,
    #[serde(default)]
    pub chains: Vec<CertificateChain>,
}

impl TrustMaterial {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, MaterialError> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), MaterialError> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

/// Certificate authority backed by in-memory trust material.
#[derive(Debug, Default)]
pub struct StaticCertificateAuthority {
    material: RwLock<TrustMaterial>,
}

impl StaticCertificateAuthority {
    pub fn new(material: TrustMaterial) -> Self {
        Self {
            material: RwLock::new(material),
        }
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, MaterialError> {
        let material = TrustMaterial::from_file(path)?;
        tracing::info!(
            roots_of_trust = material.roots_of_trust.len(),
            chains = material.chains.len(),
            "loaded trust material"
        );
        Ok(Self::new(material))
    }

    pub fn add_root_of_trust(&self, trc: RootOfTrust) {
        if let Ok(mut material) = self.material.write() {
            material.roots_of_trust.retain(|t| t.id != trc.id);
            material.roots_of_trust.push(trc);
        }
    }

    pub fn add_chain(&self, chain: CertificateChain) {
        if let Ok(mut material) = self.material.write() {
            material.chains.push(chain);
        }
    }

    pub fn snapshot(&self) -> TrustMaterial {
        self.material
            .read()
            .map(|m| m.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl CertificateAuthority for StaticCertificateAuthority {
    async fn get_chains(
        &self,
        domain: DomainId,
        subject_key_id: &SubjectKeyId,
    ) -> Result<Vec<CertificateChain>, AuthorityError> {
        let material = self
            .material
            .read()
            .map_err(|_| AuthorityError::Unavailable("trust material lock poisoned".to_string()))?;
        Ok(material
            .chains
            .iter()
            .filter(|chain| {
                chain
                    .leaf()
                    .map(|leaf| leaf.subject == domain && &leaf.subject_key_id == subject_key_id)
                    .unwrap_or(false)
            })
            .cloned()
            .collect())
    }

    async fn get_root_of_trust(
        &self,
        query: RootOfTrustQuery,
    ) -> Result<RootOfTrust, AuthorityError> {
        let material = self
            .material
            .read()
            .map_err(|_| AuthorityError::Unavailable("trust material lock poisoned".to_string()))?;
        let candidates = material
            .roots_of_trust
            .iter()
            .filter(|trc| trc.id.isd == query.isd);
        let found = match query.serial {
            Some(serial) => candidates.into_iter().find(|trc| trc.id.serial == serial),
            None => candidates.max_by_key(|trc| trc.id.serial),
        };
        found.cloned().ok_or_else(|| {
            AuthorityError::NotFound(format!(
                "root of trust for ISD {} serial {:?}",
                query.isd, query.serial
            ))
        })
    }
}
