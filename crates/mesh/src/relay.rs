//! Gossip relay: accepts entries from aggregators, exchanges them with other
//! relays and answers entry queries.

use crate::error::{MeshError, MeshResult};
use crate::gossip::GossipScheduler;
use crate::message::{EntryBatch, EntryQuery, EntryReceipt, MessageType, Payload, Reply, Request};
use crate::node::NodeContext;
use crate::periodic::spawn_periodic;
use crate::registry::{reject, RegistryClient};
use crate::store::{EntryStore, StoredEntry};
use crate::validate::{open_request, open_verified, EntryValidator};
use mapmesh_core::{DomainId, GossipConfig, PeerAddress, ServiceKind};
use mapmesh_crypto::SignedEnvelope;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

pub struct Relay {
    ctx: NodeContext,
    store: Arc<EntryStore>,
    validator: Arc<EntryValidator>,
    registry: Arc<RegistryClient>,
    gossip: Arc<GossipScheduler>,
    refresh_interval: Duration,
}

impl Relay {
    pub fn new(
        ctx: NodeContext,
        store: Arc<EntryStore>,
        registry_domain: DomainId,
        gossip: GossipConfig,
        refresh_interval: Duration,
    ) -> Self {
        let registry = Arc::new(ctx.registry_client(registry_domain));
        let validator = Arc::new(EntryValidator::new(ctx.engine.clone(), &gossip));
        let scheduler = Arc::new(GossipScheduler::new(
            ctx.messenger.clone(),
            store.clone(),
            registry.clone(),
            validator.clone(),
            ctx.signer.clone(),
            gossip,
        ));
        Self {
            ctx,
            store,
            validator,
            registry,
            gossip: scheduler,
            refresh_interval,
        }
    }

    pub fn store(&self) -> &Arc<EntryStore> {
        &self.store
    }

    pub fn gossip(&self) -> &Arc<GossipScheduler> {
        &self.gossip
    }

    pub fn registry(&self) -> &Arc<RegistryClient> {
        &self.registry
    }

    /// Accept an entry pushed by its own origin and return a signed receipt.
    pub async fn add_entry(&self, request: &Request) -> MeshResult<SignedEnvelope> {
        let envelope = request.signed()?;
        let stored = StoredEntry::from_envelope(envelope.clone())?;
        if stored.entry.origin_domain != request.sender {
            return Err(MeshError::IdentityMismatch {
                expected: request.sender,
                found: stored.entry.origin_domain,
            });
        }
        let stored = self.validator.validate(envelope).await?;
        let outcome = self.store.upsert(&stored)?;
        tracing::info!(
            origin = %stored.entry.origin_domain,
            entry_type = %stored.entry.entry_type,
            commit_id = %stored.entry.commit_id,
            ?outcome,
            "entry added by aggregator"
        );

        let receipt = Payload::EntryReceipt(EntryReceipt {
            origin_domain: stored.entry.origin_domain,
            entry_type: stored.entry.entry_type,
            commit_id: stored.entry.commit_id,
            outcome,
        });
        let identity = self.ctx.signer.current().await?;
        Ok(identity.seal(receipt.encode()?))
    }

    /// Stored entries matching the query, signed as one batch.
    pub async fn query(&self, request: &Request) -> MeshResult<SignedEnvelope> {
        let query = open_request(&self.ctx.engine, request)
            .await?
            .into_entry_query()?;
        let entries = self
            .store
            .get_by_filter(&query.entry_type, &query.origin_domain)?;
        tracing::debug!(
            sender = %request.sender,
            entry_type = %query.entry_type,
            origin = %query.origin_domain,
            matched = entries.len(),
            "entry query"
        );
        let batch = Payload::EntryBatch(EntryBatch {
            entries: entries.into_iter().map(|e| e.signed).collect(),
        });
        let identity = self.ctx.signer.current().await?;
        Ok(identity.seal(batch.encode()?))
    }

    /// Register `AddEntry`, `EntryQuery` and `GossipBatch` handlers.
    pub fn install(self: &Arc<Self>) {
        let relay = self.clone();
        self.ctx.messenger.add_handler(
            MessageType::AddEntry,
            Arc::new(move |request: Request| {
                let relay = relay.clone();
                async move {
                    match relay.add_entry(&request).await {
                        Ok(receipt) => Reply::Signed(receipt),
                        Err(e) => reject(&request, e),
                    }
                }
            }),
        );

        let relay = self.clone();
        self.ctx.messenger.add_handler(
            MessageType::EntryQuery,
            Arc::new(move |request: Request| {
                let relay = relay.clone();
                async move {
                    match relay.query(&request).await {
                        Ok(batch) => Reply::Signed(batch),
                        Err(e) => reject(&request, e),
                    }
                }
            }),
        );

        self.gossip.install();
    }

    /// Start the registration refresh and gossip loops.
    pub fn spawn(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        let registry = self.registry.clone();
        let registration = spawn_periodic("registration", self.refresh_interval, move || {
            let registry = registry.clone();
            async move {
                if let Err(e) = registry.add_self().await {
                    tracing::error!(registry = %registry.registry(), error = %e, "registration failed");
                }
            }
        });
        vec![registration, self.gossip.clone().spawn()]
    }
}

/// Ask the relay of `relay_domain` for entries matching `query`.
///
/// The batch must be signed by that relay; each entry is then validated on
/// its own and only the valid ones are returned.
pub async fn query_entries(
    ctx: &NodeContext,
    validator: &EntryValidator,
    relay_domain: DomainId,
    query: EntryQuery,
) -> MeshResult<Vec<StoredEntry>> {
    ctx.messenger
        .bind_current(&ctx.signer, &[MessageType::EntryQuery])
        .await?;
    let envelope = ctx
        .messenger
        .send(
            &Payload::EntryQuery(query),
            PeerAddress::new(relay_domain, ServiceKind::Relay),
            MessageType::EntryQuery,
        )
        .await?
        .into_signed()?;
    let batch = open_verified(&ctx.engine, relay_domain, &envelope)
        .await?
        .into_batch()?;

    let mut entries = Vec::with_capacity(batch.entries.len());
    for entry in &batch.entries {
        match validator.validate(entry).await {
            Ok(stored) => entries.push(stored),
            Err(e) => tracing::warn!(relay = %relay_domain, error = %e, "dropping queried entry"),
        }
    }
    Ok(entries)
}
