//! Mapping aggregator: publishes its own domain's reachability as a signed
//! entry through a relay, and pulls everyone else's into a local store.

use crate::error::{MeshError, MeshResult};
use crate::message::{Entry, EntryQuery, EntryReceipt, MappingRecord, MessageType, Payload};
use crate::node::NodeContext;
use crate::periodic::spawn_periodic;
use crate::reconcile::Outcome;
use crate::registry::RegistryClient;
use crate::relay::query_entries;
use crate::store::EntryStore;
use crate::validate::{open_verified, EntryValidator};
use mapmesh_core::{unix_now, AggregatorConfig, DomainId, GossipConfig, PeerAddress, ServiceKind};
use mapmesh_identity::SigningIdentity;
use rand::seq::SliceRandom;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;

pub struct Aggregator {
    ctx: NodeContext,
    registry: RegistryClient,
    store: Arc<EntryStore>,
    validator: EntryValidator,
    entry_type: String,
    prefixes: RwLock<Vec<String>>,
    push_interval: Duration,
    pull_interval: Duration,
}

impl Aggregator {
    pub fn new(
        ctx: NodeContext,
        registry_domain: DomainId,
        store: Arc<EntryStore>,
        gossip: &GossipConfig,
        config: &AggregatorConfig,
    ) -> Self {
        Self {
            registry: ctx.registry_client(registry_domain),
            validator: EntryValidator::new(ctx.engine.clone(), gossip),
            ctx,
            store,
            entry_type: gossip.entry_type.clone(),
            prefixes: RwLock::new(config.prefixes.clone()),
            push_interval: config.push_interval(),
            pull_interval: config.pull_interval(),
        }
    }

    /// Entries pulled from relays so far.
    pub fn store(&self) -> &Arc<EntryStore> {
        &self.store
    }

    pub fn prefixes(&self) -> Vec<String> {
        self.prefixes
            .read()
            .map(|p| p.clone())
            .unwrap_or_default()
    }

    /// Replace the announced prefixes; the next publish carries them.
    pub fn set_prefixes(&self, prefixes: Vec<String>) {
        if let Ok(mut held) = self.prefixes.write() {
            *held = prefixes;
        }
    }

    /// The entry for the current prefixes at `now`. The mapping is sealed as
    /// the inner envelope and the commit ID is derived from its bytes.
    pub fn build_entry(&self, identity: &SigningIdentity, now: u64) -> MeshResult<Entry> {
        let mapping = Payload::Mapping(MappingRecord {
            domain: identity.domain,
            prefixes: self.prefixes(),
            timestamp: now,
        });
        let inner = identity.seal(mapping.encode()?);
        Ok(Entry {
            origin_domain: identity.domain,
            entry_type: self.entry_type.clone(),
            timestamp: now,
            commit_id: inner.content_id()?,
            payload: inner,
        })
    }

    /// Push the current mapping to one relay chosen at random from the
    /// registry list and check its signed receipt.
    pub async fn publish(&self) -> MeshResult<EntryReceipt> {
        let relay = self.choose_relay().await?;

        let identity = self
            .ctx
            .messenger
            .bind_current(&self.ctx.signer, &[MessageType::AddEntry])
            .await?;
        let entry = self.build_entry(&identity, unix_now())?;
        let commit_id = entry.commit_id.clone();

        let envelope = self
            .ctx
            .messenger
            .send(
                &Payload::Entry(entry),
                PeerAddress::new(relay, ServiceKind::Relay),
                MessageType::AddEntry,
            )
            .await?
            .into_signed()?;
        let receipt = open_verified(&self.ctx.engine, relay, &envelope)
            .await?
            .into_receipt()?;
        if receipt.origin_domain != identity.domain || receipt.commit_id != commit_id {
            return Err(MeshError::Rejected(format!(
                "receipt from {relay} is for {} commit {}",
                receipt.origin_domain, receipt.commit_id
            )));
        }
        tracing::info!(
            relay = %relay,
            commit_id = %receipt.commit_id,
            outcome = ?receipt.outcome,
            "mapping published"
        );
        Ok(receipt)
    }

    /// Fetch every entry one registry-listed relay holds and reconcile the
    /// valid ones into the local store. Returns how many were inserted or
    /// replaced an older entry.
    pub async fn pull(&self) -> MeshResult<usize> {
        let relay = self.choose_relay().await?;
        let query = EntryQuery {
            entry_type: "%".to_string(),
            origin_domain: "*".to_string(),
        };
        let entries = query_entries(&self.ctx, &self.validator, relay, query).await?;

        let mut changed = 0;
        for entry in &entries {
            match self.store.upsert(entry)? {
                Outcome::Inserted | Outcome::Updated => changed += 1,
                Outcome::Discarded => {}
            }
        }
        tracing::info!(relay = %relay, received = entries.len(), changed, "entries pulled");
        Ok(changed)
    }

    async fn choose_relay(&self) -> MeshResult<DomainId> {
        let members = self.registry.fetch_list().await?;
        members
            .choose(&mut rand::thread_rng())
            .map(|m| m.domain)
            .ok_or_else(|| MeshError::Transport("registry lists no relays".to_string()))
    }

    /// Start the publish and pull loops; both run once immediately.
    pub fn spawn(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        let aggregator = self.clone();
        let publish = spawn_periodic("publish", self.push_interval, move || {
            let aggregator = aggregator.clone();
            async move {
                if let Err(e) = aggregator.publish().await {
                    tracing::error!(
                        domain = %aggregator.ctx.domain(),
                        error = %e,
                        "publish failed"
                    );
                }
            }
        });
        let aggregator = self.clone();
        let pull = spawn_periodic("pull", self.pull_interval, move || {
            let aggregator = aggregator.clone();
            async move {
                if let Err(e) = aggregator.pull().await {
                    tracing::warn!(
                        domain = %aggregator.ctx.domain(),
                        error = %e,
                        "pull failed"
                    );
                }
            }
        });
        vec![publish, pull]
    }
}
