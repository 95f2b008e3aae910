//! Signer selection: pick the key/chain pair that stays valid the longest.

use crate::engine::TrustEngine;
use crate::error::{AuthorityError, SignError};
use crate::pki::{CertificateChain, RootOfTrust, RootOfTrustId};
use mapmesh_core::{unix_now, DomainId};
use mapmesh_crypto::{PrivateKeyHandle, Signature, SignedEnvelope};
use std::sync::{Arc, RwLock};

/// Regenerate a cached identity this many seconds before it expires.
const RENEWAL_MARGIN_SECS: u64 = 60;

/// A private key together with the chain that vouches for it.
#[derive(Debug, Clone)]
pub struct SigningIdentity {
    pub domain: DomainId,
    pub key: PrivateKeyHandle,
    /// Position of `key` in the key set it was selected from
    pub key_index: usize,
    pub chain: CertificateChain,
    /// Earliest of leaf expiry and the anchoring TRC's (or grace window's) end
    pub bound_expiration: u64,
    pub root_of_trust_id: RootOfTrustId,
    pub in_grace_period: bool,
}

impl SigningIdentity {
    /// Sign `blob`. Pure; never fails.
    pub fn sign(&self, blob: &[u8]) -> Signature {
        Signature::create(
            &self.key,
            self.domain,
            self.root_of_trust_id.serial,
            unix_now(),
            blob,
        )
    }

    /// Sign `blob` and wrap both into an envelope.
    pub fn seal(&self, blob: Vec<u8>) -> SignedEnvelope {
        let signature = self.sign(&blob);
        SignedEnvelope::new(blob, signature)
    }

    pub fn is_usable_at(&self, now: u64) -> bool {
        self.bound_expiration > now
    }
}

/// Builds [`SigningIdentity`] values for one domain from a fixed key set.
pub struct SignerGenerator {
    domain: DomainId,
    keys: Vec<PrivateKeyHandle>,
    engine: Arc<TrustEngine>,
    cached: RwLock<Option<Arc<SigningIdentity>>>,
}

impl SignerGenerator {
    pub fn new(domain: DomainId, keys: Vec<PrivateKeyHandle>, engine: Arc<TrustEngine>) -> Self {
        Self {
            domain,
            keys,
            engine,
            cached: RwLock::new(None),
        }
    }

    pub fn domain(&self) -> DomainId {
        self.domain
    }

    /// Cached identity, regenerated when it is about to expire.
    pub async fn current(&self) -> Result<Arc<SigningIdentity>, SignError> {
        let now = unix_now();
        let cached = self.cached.read().ok().and_then(|c| c.clone());
        if let Some(identity) = cached {
            if identity.is_usable_at(now.saturating_add(RENEWAL_MARGIN_SECS)) {
                return Ok(identity);
            }
        }

        let identity = Arc::new(self.generate_at(now).await?);
        if let Ok(mut slot) = self.cached.write() {
            *slot = Some(identity.clone());
        }
        Ok(identity)
    }

    /// Select a fresh identity, ignoring any cached one.
    pub async fn generate(&self) -> Result<SigningIdentity, SignError> {
        self.generate_at(unix_now()).await
    }

    pub async fn generate_at(&self, now: u64) -> Result<SigningIdentity, SignError> {
        if self.keys.is_empty() {
            return Err(SignError::NoKeysAvailable);
        }

        let anchors = match self.engine.trust_anchors(self.domain.isd(), now).await {
            Ok(anchors) => anchors,
            Err(AuthorityError::NoActiveRoot { .. }) => {
                return Err(SignError::NoValidChain {
                    domain: self.domain,
                })
            }
            Err(e) => return Err(e.into()),
        };

        let mut candidates = Vec::with_capacity(self.keys.len());
        for (index, key) in self.keys.iter().enumerate() {
            let chains = self
                .engine
                .authority()
                .get_chains(self.domain, key.key_id())
                .await?;
            candidates.push((index, key, chains));
        }

        if let Some(identity) = self.select(&candidates, &anchors.current, None, now) {
            return Ok(identity);
        }
        if let Some(grace) = &anchors.grace {
            if let Some(identity) = self.select(&candidates, grace, Some(&anchors.current), now) {
                tracing::warn!(
                    domain = %self.domain,
                    root_of_trust = %grace.id,
                    "signing with chain anchored in grace-period root of trust"
                );
                return Ok(identity);
            }
        }
        Err(SignError::NoValidChain {
            domain: self.domain,
        })
    }

    /// Best pair under `anchor`. `current` is set when `anchor` is the grace
    /// TRC; its grace window then bounds the expiration.
    fn select(
        &self,
        candidates: &[(usize, &PrivateKeyHandle, Vec<CertificateChain>)],
        anchor: &RootOfTrust,
        current: Option<&RootOfTrust>,
        now: u64,
    ) -> Option<SigningIdentity> {
        let anchor_end = match current {
            Some(current) => current.grace_period_end()?,
            None => anchor.not_after,
        };

        let mut best: Option<(usize, &PrivateKeyHandle, &CertificateChain, u64)> = None;
        for (index, key, chains) in candidates {
            for chain in chains {
                let Some(leaf) = chain.leaf() else { continue };
                if leaf.public_key != key.public_key() {
                    continue;
                }
                if let Err(e) = chain.verify(anchor, now) {
                    tracing::debug!(key_index = index, error = %e, "chain rejected");
                    continue;
                }
                let expiry = leaf.not_after;
                // Strictly later wins, so the lower key index keeps ties.
                if best.map_or(true, |(_, _, _, best_expiry)| expiry > best_expiry) {
                    best = Some((*index, *key, chain, expiry));
                }
            }
        }

        let (key_index, key, chain, leaf_expiry) = best?;
        let bound_expiration = leaf_expiry.min(anchor_end);
        if bound_expiration <= now {
            return None;
        }
        Some(SigningIdentity {
            domain: self.domain,
            key: key.clone(),
            key_index,
            chain: chain.clone(),
            bound_expiration,
            root_of_trust_id: anchor.id,
            in_grace_period: current.is_some(),
        })
    }
}
