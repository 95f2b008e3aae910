//! Gossip scheduler.
//!
//! Push path: on every tick, send all locally held entries to a random
//! subset of registered peers. Receive path: verify an inbound batch, then
//! validate and reconcile each entry on its own. Both run concurrently.

use crate::error::MeshResult;
use crate::message::{EntryBatch, MembershipRecord, MessageType, Payload, Reply, Request};
use crate::messenger::Messenger;
use crate::periodic::spawn_periodic;
use crate::reconcile::Outcome;
use crate::registry::{reject, RegistryClient};
use crate::store::EntryStore;
use crate::validate::{open_request, EntryValidator};
use mapmesh_core::{GossipConfig, PeerAddress, ServiceKind};
use mapmesh_identity::SignerGenerator;
use rand::seq::SliceRandom;
use std::sync::Arc;
use tokio::task::{JoinHandle, JoinSet};

/// Result of one push cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub entries: usize,
    pub peers: usize,
    pub delivered: usize,
}

/// Result of processing one inbound batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub inserted: usize,
    pub updated: usize,
    pub discarded: usize,
    pub rejected: usize,
}

impl BatchReport {
    pub fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Inserted => self.inserted += 1,
            Outcome::Updated => self.updated += 1,
            Outcome::Discarded => self.discarded += 1,
        }
    }
}

pub struct GossipScheduler {
    node_id: String,
    messenger: Arc<Messenger>,
    store: Arc<EntryStore>,
    registry: Arc<RegistryClient>,
    validator: Arc<EntryValidator>,
    signer: Arc<SignerGenerator>,
    config: GossipConfig,
}

impl GossipScheduler {
    pub fn new(
        messenger: Arc<Messenger>,
        store: Arc<EntryStore>,
        registry: Arc<RegistryClient>,
        validator: Arc<EntryValidator>,
        signer: Arc<SignerGenerator>,
        config: GossipConfig,
    ) -> Self {
        Self {
            node_id: registry.node_id().to_string(),
            messenger,
            store,
            registry,
            validator,
            signer,
            config,
        }
    }

    /// Up to `fanout` distinct peers from `members`, never this node.
    pub fn choose_peers(&self, members: &[MembershipRecord]) -> Vec<MembershipRecord> {
        let eligible: Vec<&MembershipRecord> = members
            .iter()
            .filter(|m| m.node_id != self.node_id)
            .collect();
        let mut rng = rand::thread_rng();
        eligible
            .choose_multiple(&mut rng, self.config.fanout)
            .map(|m| (*m).clone())
            .collect()
    }

    /// Run one push cycle. Fails only when the cycle cannot start: store
    /// unreadable, registry unreachable or no usable signing identity.
    pub async fn push_once(&self) -> MeshResult<CycleReport> {
        let entries = self.store.get_all()?;
        if entries.is_empty() {
            tracing::debug!(node_id = %self.node_id, "no entries held, skipping gossip cycle");
            return Ok(CycleReport::default());
        }

        let members = self.registry.fetch_list().await?;
        let peers = self.choose_peers(&members);
        let mut report = CycleReport {
            entries: entries.len(),
            peers: peers.len(),
            delivered: 0,
        };
        if peers.is_empty() {
            tracing::debug!(node_id = %self.node_id, "no eligible peers");
            return Ok(report);
        }

        self.messenger
            .bind_current(&self.signer, &[MessageType::GossipBatch])
            .await?;
        let batch = Arc::new(Payload::EntryBatch(EntryBatch {
            entries: entries.into_iter().map(|e| e.signed).collect(),
        }));

        let mut sends = JoinSet::new();
        for peer in peers {
            let messenger = self.messenger.clone();
            let batch = batch.clone();
            sends.spawn(async move {
                let to = PeerAddress::new(peer.domain, ServiceKind::Relay);
                let result = messenger
                    .send(&batch, to, MessageType::GossipBatch)
                    .await
                    .and_then(Reply::into_ack);
                (peer, result)
            });
        }
        while let Some(joined) = sends.join_next().await {
            match joined {
                Ok((_, Ok(()))) => report.delivered += 1,
                Ok((peer, Err(e))) => tracing::warn!(
                    peer = %peer.node_id,
                    domain = %peer.domain,
                    error = %e,
                    retryable = e.is_retryable(),
                    "gossip send failed"
                ),
                Err(e) => tracing::warn!(error = %e, "gossip send task failed"),
            }
        }

        tracing::info!(
            node_id = %self.node_id,
            entries = report.entries,
            peers = report.peers,
            delivered = report.delivered,
            "gossip cycle complete"
        );
        Ok(report)
    }

    /// Process an inbound batch. The outer envelope must verify against the
    /// sender; after that each entry stands or falls on its own.
    pub async fn receive_batch(&self, request: &Request) -> MeshResult<BatchReport> {
        let batch = open_request(self.validator.engine(), request)
            .await?
            .into_batch()?;

        let mut report = BatchReport::default();
        for envelope in &batch.entries {
            let stored = match self.validator.validate(envelope).await {
                Ok(stored) => stored,
                Err(e) => {
                    report.rejected += 1;
                    tracing::warn!(
                        from = %request.sender,
                        origin = %envelope.signer(),
                        error = %e,
                        "dropping gossiped entry"
                    );
                    continue;
                }
            };
            match self.store.upsert(&stored) {
                Ok(outcome) => {
                    report.record(outcome);
                    if outcome != Outcome::Discarded {
                        tracing::info!(
                            origin = %stored.entry.origin_domain,
                            entry_type = %stored.entry.entry_type,
                            commit_id = %stored.entry.commit_id,
                            ?outcome,
                            "entry reconciled"
                        );
                    }
                }
                Err(e) => {
                    report.rejected += 1;
                    tracing::warn!(
                        origin = %stored.entry.origin_domain,
                        error = %e,
                        "failed to store gossiped entry"
                    );
                }
            }
        }
        tracing::debug!(from = %request.sender, ?report, "batch processed");
        Ok(report)
    }

    /// Register the `GossipBatch` handler on the scheduler's messenger.
    pub fn install(self: &Arc<Self>) {
        let scheduler = self.clone();
        self.messenger.add_handler(
            MessageType::GossipBatch,
            Arc::new(move |request: Request| {
                let scheduler = scheduler.clone();
                async move {
                    match scheduler.receive_batch(&request).await {
                        Ok(_) => Reply::ok(),
                        Err(e) => reject(&request, e),
                    }
                }
            }),
        );
    }

    /// Push on the configured interval until the handle is aborted.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        let interval = self.config.interval();
        spawn_periodic("gossip", interval, move || {
            let scheduler = self.clone();
            async move {
                if let Err(e) = scheduler.push_once().await {
                    tracing::error!(node_id = %scheduler.node_id, error = %e, "gossip cycle aborted");
                }
            }
        })
    }
}
