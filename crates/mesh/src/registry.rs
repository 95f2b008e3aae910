//! Membership registry: the server side held by registry nodes and the
//! client every gossip node uses to register and discover peers.

use crate::error::{MeshError, MeshResult};
use crate::membership::MembershipStore;
use crate::message::{
    MembershipList, MembershipQuery, MembershipRecord, MessageType, Payload, Registration, Reply,
    Request,
};
use crate::messenger::Messenger;
use crate::validate::{open_request, open_verified};
use mapmesh_core::{DomainId, PeerAddress, ServiceKind};
use mapmesh_crypto::SignedEnvelope;
use mapmesh_identity::{SignerGenerator, TrustEngine};
use std::sync::Arc;

/// Talks to one registry on behalf of the local node.
pub struct RegistryClient {
    node_id: String,
    registry: PeerAddress,
    messenger: Arc<Messenger>,
    signer: Arc<SignerGenerator>,
    engine: Arc<TrustEngine>,
}

impl RegistryClient {
    pub fn new(
        node_id: impl Into<String>,
        registry_domain: DomainId,
        messenger: Arc<Messenger>,
        signer: Arc<SignerGenerator>,
        engine: Arc<TrustEngine>,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            registry: PeerAddress::new(registry_domain, ServiceKind::Registry),
            messenger,
            signer,
            engine,
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn registry(&self) -> PeerAddress {
        self.registry
    }

    /// Register this node under the signer's domain.
    pub async fn add_self(&self) -> MeshResult<()> {
        self.messenger
            .bind_current(&self.signer, &[MessageType::Register])
            .await?;
        let registration = Payload::Registration(Registration {
            node_id: self.node_id.clone(),
            domain: self.signer.domain(),
        });
        self.messenger
            .send(&registration, self.registry, MessageType::Register)
            .await?
            .into_ack()?;
        tracing::info!(node_id = %self.node_id, registry = %self.registry, "registered");
        Ok(())
    }

    /// Fetch the full membership list. The reply must be signed by the
    /// registry's own domain; otherwise nothing is returned.
    pub async fn fetch_list(&self) -> MeshResult<Vec<MembershipRecord>> {
        self.messenger
            .bind_current(&self.signer, &[MessageType::MembershipQuery])
            .await?;
        let query = Payload::MembershipQuery(MembershipQuery {
            domain: "*".to_string(),
        });
        let envelope = self
            .messenger
            .send(&query, self.registry, MessageType::MembershipQuery)
            .await?
            .into_signed()?;
        let list = open_verified(&self.engine, self.registry.domain, &envelope)
            .await?
            .into_membership_list()?;
        Ok(MembershipList::dedup(list.records).records)
    }

    /// Push `records` to the registry of `target`.
    pub async fn push_list(&self, target: DomainId, records: Vec<MembershipRecord>) -> MeshResult<()> {
        self.messenger
            .bind_current(&self.signer, &[MessageType::MembershipPush])
            .await?;
        let list = Payload::MembershipList(MembershipList { records });
        self.messenger
            .send(
                &list,
                PeerAddress::new(target, ServiceKind::Registry),
                MessageType::MembershipPush,
            )
            .await?
            .into_ack()
    }
}

/// Counts from one accepted membership push.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PushReport {
    pub inserted: usize,
    pub known: usize,
    pub rejected: usize,
}

/// Serves registrations and membership lists from a [`MembershipStore`].
pub struct RegistryServer {
    store: Arc<MembershipStore>,
    engine: Arc<TrustEngine>,
    signer: Arc<SignerGenerator>,
}

impl RegistryServer {
    pub fn new(
        store: Arc<MembershipStore>,
        engine: Arc<TrustEngine>,
        signer: Arc<SignerGenerator>,
    ) -> Self {
        Self {
            store,
            engine,
            signer,
        }
    }

    pub fn store(&self) -> &Arc<MembershipStore> {
        &self.store
    }

    /// Record a registration; true if the node ID was new.
    ///
    /// The registrant can only register itself. The signed request is kept
    /// as the record's `raw` so other registries can check it later.
    pub async fn register(&self, request: &Request) -> MeshResult<bool> {
        let registration = open_request(&self.engine, request)
            .await?
            .into_registration()?;
        if registration.domain != request.sender {
            return Err(MeshError::IdentityMismatch {
                expected: request.sender,
                found: registration.domain,
            });
        }
        let record = MembershipRecord {
            node_id: registration.node_id,
            domain: registration.domain,
            raw: Some(request.signed()?.to_bytes()?),
        };
        let inserted = self.store.register(&record)?;
        if inserted {
            tracing::info!(node_id = %record.node_id, domain = %record.domain, "node registered");
        } else {
            tracing::debug!(node_id = %record.node_id, "node already registered");
        }
        Ok(inserted)
    }

    /// Signed membership list matching the query's domain filter.
    pub async fn list(&self, request: &Request) -> MeshResult<SignedEnvelope> {
        let query = open_request(&self.engine, request)
            .await?
            .into_membership_query()?;
        let list = MembershipList::dedup(self.store.list(&query.domain)?);
        let identity = self.signer.current().await?;
        Ok(identity.seal(Payload::MembershipList(list).encode()?))
    }

    /// Merge a list pushed by another registry. Every record must carry the
    /// registration its node signed; records that don't verify are skipped.
    pub async fn accept_push(&self, request: &Request) -> MeshResult<PushReport> {
        let list = open_request(&self.engine, request)
            .await?
            .into_membership_list()?;
        let mut report = PushReport::default();
        for record in list.records {
            match self.check_record(&record).await {
                Ok(()) => {
                    if self.store.register(&record)? {
                        report.inserted += 1;
                    } else {
                        report.known += 1;
                    }
                }
                Err(e) => {
                    report.rejected += 1;
                    tracing::warn!(
                        node_id = %record.node_id,
                        domain = %record.domain,
                        from = %request.sender,
                        error = %e,
                        "dropping pushed membership record"
                    );
                }
            }
        }
        tracing::info!(
            from = %request.sender,
            inserted = report.inserted,
            known = report.known,
            rejected = report.rejected,
            "membership push merged"
        );
        Ok(report)
    }

    async fn check_record(&self, record: &MembershipRecord) -> MeshResult<()> {
        let raw = record.raw.as_deref().ok_or(MeshError::Unsigned)?;
        let envelope = SignedEnvelope::from_bytes(raw)?;
        let registration = open_verified(&self.engine, record.domain, &envelope)
            .await?
            .into_registration()?;
        if registration.node_id != record.node_id || registration.domain != record.domain {
            return Err(MeshError::IdentityMismatch {
                expected: registration.domain,
                found: record.domain,
            });
        }
        Ok(())
    }

    /// Register the `Register`, `MembershipQuery` and `MembershipPush`
    /// handlers on `messenger`.
    pub fn install(self: &Arc<Self>, messenger: &Messenger) {
        let server = self.clone();
        messenger.add_handler(
            MessageType::Register,
            Arc::new(move |request: Request| {
                let server = server.clone();
                async move {
                    match server.register(&request).await {
                        Ok(_) => Reply::ok(),
                        Err(e) => reject(&request, e),
                    }
                }
            }),
        );

        let server = self.clone();
        messenger.add_handler(
            MessageType::MembershipQuery,
            Arc::new(move |request: Request| {
                let server = server.clone();
                async move {
                    match server.list(&request).await {
                        Ok(envelope) => Reply::Signed(envelope),
                        Err(e) => reject(&request, e),
                    }
                }
            }),
        );

        let server = self.clone();
        messenger.add_handler(
            MessageType::MembershipPush,
            Arc::new(move |request: Request| {
                let server = server.clone();
                async move {
                    match server.accept_push(&request).await {
                        Ok(_) => Reply::ok(),
                        Err(e) => reject(&request, e),
                    }
                }
            }),
        );
    }
}

pub(crate) fn reject(request: &Request, error: MeshError) -> Reply {
    tracing::warn!(
        sender = %request.sender,
        message_type = %request.message_type,
        error = %error,
        "request rejected"
    );
    Reply::reject(&error)
}
