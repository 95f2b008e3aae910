//! Trust engine: decides whether a signed blob is bound to a domain.

use crate::authority::{CertificateAuthority, RootOfTrustQuery};
use crate::error::{AuthorityError, ChainError, VerifyError};
use crate::pki::{CertificateChain, RootOfTrust};
use mapmesh_core::{unix_now, DomainId};
use mapmesh_crypto::Signature;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// How long fetched roots of trust are reused before asking the CA again.
pub const DEFAULT_ANCHOR_TTL: Duration = Duration::from_secs(300);

/// Roots of trust currently acceptable for one ISD.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustAnchors {
    pub current: RootOfTrust,
    /// Predecessor, present only while `current` is in its grace period
    pub grace: Option<RootOfTrust>,
}

impl TrustAnchors {
    /// Anchors in order of preference.
    pub fn iter(&self) -> impl Iterator<Item = &RootOfTrust> {
        std::iter::once(&self.current).chain(self.grace.as_ref())
    }

    /// Whether `root` may anchor a chain at `now`. The current TRC must be
    /// inside its validity window; the predecessor only counts while the
    /// current TRC's grace window is open.
    pub fn check_window(&self, root: &RootOfTrust, now: u64) -> Result<(), ChainError> {
        let open = if root.id == self.current.id {
            root.is_valid_at(now)
        } else {
            self.current.in_grace_period(now)
        };
        if open {
            Ok(())
        } else {
            Err(ChainError::RootExpired {
                isd: root.id.isd,
                serial: root.id.serial,
                now,
            })
        }
    }
}

#[derive(Debug, Clone)]
struct CachedAnchors {
    anchors: TrustAnchors,
    fetched_at: u64,
    /// Activation time of a published successor that was skipped
    successor_activates: Option<u64>,
}

/// Verifies signatures against certificate chains and TRCs fetched from a
/// [`CertificateAuthority`].
pub struct TrustEngine {
    authority: Arc<dyn CertificateAuthority>,
    anchors: RwLock<HashMap<u16, CachedAnchors>>,
    anchor_ttl: Duration,
}

impl TrustEngine {
    pub fn new(authority: Arc<dyn CertificateAuthority>) -> Self {
        Self::with_anchor_ttl(authority, DEFAULT_ANCHOR_TTL)
    }

    pub fn with_anchor_ttl(authority: Arc<dyn CertificateAuthority>, anchor_ttl: Duration) -> Self {
        Self {
            authority,
            anchors: RwLock::new(HashMap::new()),
            anchor_ttl,
        }
    }

    pub fn authority(&self) -> &Arc<dyn CertificateAuthority> {
        &self.authority
    }

    /// Acceptable roots of trust for `isd` at `now`.
    ///
    /// The current anchor is the newest TRC whose `not_before` has passed;
    /// successors published ahead of activation are skipped. Fails with
    /// [`AuthorityError::NoActiveRoot`] when that TRC has expired or none is
    /// active yet. Cached entries are dropped once the TTL passes, the TRC
    /// (or its grace window) stops being valid or a skipped successor
    /// activates.
    pub async fn trust_anchors(&self, isd: u16, now: u64) -> Result<TrustAnchors, AuthorityError> {
        if let Some(cached) = self.cached_anchors(isd, now) {
            return Ok(cached);
        }

        let mut current = self
            .authority
            .get_root_of_trust(RootOfTrustQuery::latest(isd))
            .await?;
        let mut successor_activates = None;
        while current.not_before > now {
            let Some(previous) = current.previous_serial() else {
                return Err(AuthorityError::NoActiveRoot { isd, now });
            };
            tracing::debug!(
                isd,
                skipped = %current.id,
                activates = current.not_before,
                "root of trust not yet active"
            );
            successor_activates = Some(current.not_before);
            current = self
                .authority
                .get_root_of_trust(RootOfTrustQuery::serial(isd, previous))
                .await?;
        }
        if !current.is_valid_at(now) {
            tracing::warn!(isd, expired = %current.id, not_after = current.not_after, "root of trust expired");
            return Err(AuthorityError::NoActiveRoot { isd, now });
        }

        let grace = match current.previous_serial() {
            Some(serial) if current.in_grace_period(now) => Some(
                self.authority
                    .get_root_of_trust(RootOfTrustQuery::serial(isd, serial))
                    .await?,
            ),
            _ => None,
        };
        let anchors = TrustAnchors { current, grace };
        tracing::debug!(
            isd,
            current = %anchors.current.id,
            grace = anchors.grace.as_ref().map(|g| g.id.to_string()),
            "fetched trust anchors"
        );

        if let Ok(mut cache) = self.anchors.write() {
            cache.insert(
                isd,
                CachedAnchors {
                    anchors: anchors.clone(),
                    fetched_at: now,
                    successor_activates,
                },
            );
        }
        Ok(anchors)
    }

    fn cached_anchors(&self, isd: u16, now: u64) -> Option<TrustAnchors> {
        let cache = self.anchors.read().ok()?;
        let cached = cache.get(&isd)?;
        let fresh = now.saturating_sub(cached.fetched_at) < self.anchor_ttl.as_secs()
            && cached.successor_activates.map_or(true, |at| now < at);
        let still_valid = cached.anchors.current.is_valid_at(now)
            && (cached.anchors.grace.is_none() || cached.anchors.current.in_grace_period(now));
        (fresh && still_valid).then(|| cached.anchors.clone())
    }

    /// Drop cached anchors, e.g. after new trust material was installed.
    pub fn invalidate(&self) {
        if let Ok(mut cache) = self.anchors.write() {
            cache.clear();
        }
    }

    /// Verify that `signature` over `blob` was produced by `domain`.
    pub async fn verify(
        &self,
        domain: DomainId,
        blob: &[u8],
        signature: &Signature,
    ) -> Result<(), VerifyError> {
        self.verify_at(domain, blob, signature, unix_now()).await
    }

    pub async fn verify_at(
        &self,
        domain: DomainId,
        blob: &[u8],
        signature: &Signature,
        now: u64,
    ) -> Result<(), VerifyError> {
        if signature.signer != domain {
            return Err(VerifyError::DomainMismatch {
                claimed: domain,
                signer: signature.signer,
            });
        }

        let anchors = match self.trust_anchors(domain.isd(), now).await {
            Ok(anchors) => anchors,
            Err(e @ AuthorityError::NoActiveRoot { .. }) => {
                return Err(VerifyError::ChainInvalid {
                    domain,
                    reason: e.to_string(),
                })
            }
            Err(e) => return Err(e.into()),
        };
        let chains = self
            .authority
            .get_chains(domain, &signature.subject_key_id)
            .await?;
        let chain = select_valid_chain(&chains, &anchors, domain, now)?;

        let leaf = chain
            .leaf()
            .ok_or_else(|| VerifyError::ChainInvalid {
                domain,
                reason: "empty chain".to_string(),
            })?;
        signature
            .verify_raw(&leaf.public_key, blob)
            .map_err(|_| VerifyError::SignatureInvalid { domain })
    }
}

fn select_valid_chain<'a>(
    chains: &'a [CertificateChain],
    anchors: &TrustAnchors,
    domain: DomainId,
    now: u64,
) -> Result<&'a CertificateChain, VerifyError> {
    if chains.is_empty() {
        return Err(VerifyError::ChainInvalid {
            domain,
            reason: "no chains issued".to_string(),
        });
    }

    let mut last_error = String::new();
    for chain in chains {
        if chain.leaf().map(|l| l.subject) != Some(domain) {
            last_error = "chain subject does not match domain".to_string();
            continue;
        }
        for root in anchors.iter() {
            match anchors
                .check_window(root, now)
                .and_then(|()| chain.verify(root, now))
            {
                Ok(()) => return Ok(chain),
                Err(e) => last_error = e.to_string(),
            }
        }
    }
    Err(VerifyError::ChainInvalid {
        domain,
        reason: last_error,
    })
}
