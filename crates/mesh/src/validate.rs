//! Acceptance checks for a single origin-signed entry.

use crate::error::{MeshError, MeshResult};
use crate::message::{Payload, Request};
use crate::store::StoredEntry;
use mapmesh_core::{unix_now, DomainId, GossipConfig};
use mapmesh_crypto::SignedEnvelope;
use mapmesh_identity::TrustEngine;
use std::sync::Arc;

/// Checks freshness and both origin signatures of an entry.
pub struct EntryValidator {
    engine: Arc<TrustEngine>,
    validity_window_secs: u64,
    max_clock_skew_secs: u64,
}

impl EntryValidator {
    pub fn new(engine: Arc<TrustEngine>, config: &GossipConfig) -> Self {
        Self {
            engine,
            validity_window_secs: config.validity_window_secs,
            max_clock_skew_secs: config.max_clock_skew_secs,
        }
    }

    pub fn engine(&self) -> &Arc<TrustEngine> {
        &self.engine
    }

    /// Reject timestamps older than the validity window or too far ahead.
    pub fn check_freshness(&self, origin: DomainId, timestamp: u64, now: u64) -> MeshResult<()> {
        let too_old = timestamp.saturating_add(self.validity_window_secs) < now;
        let too_new = timestamp > now.saturating_add(self.max_clock_skew_secs);
        if too_old || too_new {
            return Err(MeshError::Stale {
                origin,
                timestamp,
                now,
            });
        }
        Ok(())
    }

    pub async fn validate(&self, signed: &SignedEnvelope) -> MeshResult<StoredEntry> {
        self.validate_at(signed, unix_now()).await
    }

    /// Decode, check freshness, then verify the entry envelope and the inner
    /// envelope against the entry's own origin domain.
    pub async fn validate_at(&self, signed: &SignedEnvelope, now: u64) -> MeshResult<StoredEntry> {
        let stored = StoredEntry::from_envelope(signed.clone())?;
        let entry = &stored.entry;
        let origin = entry.origin_domain;

        self.check_freshness(origin, entry.timestamp, now)?;
        self.engine
            .verify_at(origin, &signed.blob, &signed.signature, now)
            .await?;
        self.engine
            .verify_at(origin, &entry.payload.blob, &entry.payload.signature, now)
            .await?;

        if let Payload::Mapping(mapping) = Payload::open(&entry.payload)? {
            if mapping.domain != origin {
                return Err(MeshError::IdentityMismatch {
                    expected: origin,
                    found: mapping.domain,
                });
            }
        }
        Ok(stored)
    }
}

/// Verify `envelope` against `domain` and decode its payload.
pub async fn open_verified(
    engine: &TrustEngine,
    domain: DomainId,
    envelope: &SignedEnvelope,
) -> MeshResult<Payload> {
    engine
        .verify(domain, &envelope.blob, &envelope.signature)
        .await?;
    Payload::open(envelope)
}

/// Verify a signed request against the sender it claims.
pub async fn open_request(engine: &TrustEngine, request: &Request) -> MeshResult<Payload> {
    open_verified(engine, request.sender, request.signed()?).await
}
