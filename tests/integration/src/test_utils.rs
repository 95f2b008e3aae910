//! Builders for multi-node MapMesh networks running in one process.

use mapmesh_core::{unix_now, AggregatorConfig, DomainId, GossipConfig, PeerAddress, PropagationConfig, ServiceKind};
use mapmesh_crypto::{PrivateKeyHandle, SignedEnvelope};
use mapmesh_identity::{
    CertificateIssuer, RootAuthority, SignerGenerator, SigningIdentity, StaticCertificateAuthority,
    TrustEngine,
};
use mapmesh_mesh::{
    Aggregator, Body, Entry, EntryBatch, EntryStore, LocalTransport, MappingRecord,
    MembershipStore, MessageType, Messenger, NodeContext, Payload, RegistryNode, Relay, Request,
    StaticTopology,
};
use std::sync::Arc;
use std::time::Duration;

pub const DAY: u64 = 24 * 60 * 60;
pub const REGISTRY: &str = "1-ff00:0:100";

pub fn domain(s: &str) -> DomainId {
    s.parse().expect("valid domain")
}

/// Install a test subscriber once; later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// One ISD worth of trust material plus an in-process transport.
///
/// Every node gets its own [`TrustEngine`]; they all read the same static
/// certificate authority.
pub struct TestNetwork {
    pub root: RootAuthority,
    pub ca: CertificateIssuer,
    pub authority: Arc<StaticCertificateAuthority>,
    pub transport: Arc<LocalTransport>,
    pub gossip: GossipConfig,
    next_serial: std::sync::atomic::AtomicU64,
}

impl TestNetwork {
    pub fn new() -> Self {
        init_tracing();
        let now = unix_now();
        let root = RootAuthority::generate(domain("1-ff00:0:1000"));
        let ca = root.issue_ca(1, PrivateKeyHandle::generate(), now - DAY, now + 365 * DAY);
        let authority = Arc::new(StaticCertificateAuthority::default());
        authority.add_root_of_trust(root.root_of_trust(1, 1, now - DAY, now + 365 * DAY, 0, &[]));
        Self {
            root,
            ca,
            authority,
            transport: LocalTransport::new(),
            gossip: GossipConfig::default(),
            next_serial: std::sync::atomic::AtomicU64::new(100),
        }
    }

    pub fn engine(&self) -> Arc<TrustEngine> {
        Arc::new(TrustEngine::new(self.authority.clone()))
    }

    /// Issue a chain for `key` valid from a day ago for `lifetime` seconds.
    pub fn certify(&self, domain: DomainId, key: &PrivateKeyHandle, lifetime: u64) {
        let now = unix_now();
        let serial = self
            .next_serial
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        self.authority
            .add_chain(self.ca.issue_chain(serial, domain, key, now - DAY, now + lifetime));
    }

    /// A signer for `domain` with one freshly certified key.
    pub fn signer(&self, domain_str: &str) -> Arc<SignerGenerator> {
        let domain = domain(domain_str);
        let key = PrivateKeyHandle::generate();
        self.certify(domain, &key, 30 * DAY);
        Arc::new(SignerGenerator::new(domain, vec![key], self.engine()))
    }

    pub async fn identity(&self, domain_str: &str) -> SigningIdentity {
        self.signer(domain_str)
            .generate()
            .await
            .expect("certified identity")
    }

    pub fn messenger(&self, domain_str: &str, service: ServiceKind) -> Arc<Messenger> {
        let messenger = Arc::new(Messenger::new(
            PeerAddress::new(domain(domain_str), service),
            self.transport.clone(),
            Duration::from_secs(2),
        ));
        self.transport.attach(&messenger);
        messenger
    }

    pub fn context(&self, node_id: &str, domain_str: &str, service: ServiceKind) -> NodeContext {
        let signer = self.signer(domain_str);
        NodeContext::new(
            node_id,
            self.messenger(domain_str, service),
            self.engine(),
            signer,
        )
    }

    /// Registry at `domain_str` propagating along `paths`.
    pub fn registry(&self, domain_str: &str, paths: &[Vec<DomainId>]) -> RegistryNode {
        let ctx = self.context(&format!("registry-{domain_str}"), domain_str, ServiceKind::Registry);
        let node = RegistryNode::new(
            ctx,
            Arc::new(MembershipStore::open_in_memory().expect("membership store")),
            Arc::new(StaticTopology::from_paths(domain(domain_str), paths)),
            PropagationConfig::default(),
        );
        node.install();
        node
    }

    /// Relay registered with the registry at `registry`.
    pub async fn relay(&self, node_id: &str, domain_str: &str, registry: &str) -> Arc<Relay> {
        let relay = Arc::new(Relay::new(
            self.context(node_id, domain_str, ServiceKind::Relay),
            Arc::new(EntryStore::open_in_memory().expect("entry store")),
            domain(registry),
            self.gossip.clone(),
            Duration::from_secs(600),
        ));
        relay.install();
        relay.registry().add_self().await.expect("registration");
        relay
    }

    pub fn aggregator(&self, domain_str: &str, prefixes: &[&str]) -> Arc<Aggregator> {
        Arc::new(Aggregator::new(
            self.context("aggregator", domain_str, ServiceKind::Aggregator),
            domain(REGISTRY),
            Arc::new(EntryStore::open_in_memory().expect("entry store")),
            &self.gossip,
            &AggregatorConfig {
                prefixes: prefixes.iter().map(|p| p.to_string()).collect(),
                ..AggregatorConfig::default()
            },
        ))
    }
}

impl Default for TestNetwork {
    fn default() -> Self {
        Self::new()
    }
}

/// Origin-signed entry envelope carrying a mapping for the identity's domain.
pub fn mapping_entry(identity: &SigningIdentity, timestamp: u64, commit_id: &str) -> SignedEnvelope {
    mapping_entry_for(identity, identity.domain, timestamp, commit_id)
}

/// Like [`mapping_entry`] but claiming `origin`, which need not be the
/// signer's domain.
pub fn mapping_entry_for(
    identity: &SigningIdentity,
    origin: DomainId,
    timestamp: u64,
    commit_id: &str,
) -> SignedEnvelope {
    let mapping = Payload::Mapping(MappingRecord {
        domain: origin,
        prefixes: vec!["203.0.113.0/24".to_string()],
        timestamp,
    });
    let inner = identity.seal(mapping.encode().expect("encode mapping"));
    let entry = Payload::Entry(Entry {
        origin_domain: origin,
        entry_type: "MAP".to_string(),
        timestamp,
        commit_id: commit_id.to_string(),
        payload: inner,
    });
    identity.seal(entry.encode().expect("encode entry"))
}

/// A gossip batch as relay `sender` would send it.
pub fn batch_request(sender: &SigningIdentity, entries: Vec<SignedEnvelope>) -> Request {
    let blob = Payload::EntryBatch(EntryBatch { entries })
        .encode()
        .expect("encode batch");
    Request {
        id: rand::random(),
        message_type: MessageType::GossipBatch,
        sender: sender.domain,
        body: Body::Signed(sender.seal(blob)),
    }
}

/// Poll `check` until it holds or a second passes.
pub async fn eventually<F: FnMut() -> bool>(mut check: F) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
