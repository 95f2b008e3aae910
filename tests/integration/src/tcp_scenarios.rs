//! The same flow as the in-process scenarios, over real sockets.

use crate::test_utils::*;
use mapmesh_core::{AggregatorConfig, GossipConfig, PeerAddress, PropagationConfig, ServiceKind};
use mapmesh_mesh::{
    serve_tcp, Aggregator, EntryStore, MembershipStore, Messenger, NodeContext, RegistryNode,
    Relay, StaticTopology, TcpTransport,
};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

const RELAY_A: &str = "1-ff00:0:110";
const RELAY_B: &str = "1-ff00:0:120";
const ORIGIN: &str = "1-ff00:0:1";

struct TcpNetwork {
    net: TestNetwork,
    peers: BTreeMap<PeerAddress, SocketAddr>,
    listeners: BTreeMap<PeerAddress, TcpListener>,
    servers: Vec<JoinHandle<()>>,
}

impl TcpNetwork {
    async fn new(nodes: &[(&str, ServiceKind)]) -> Self {
        let mut peers = BTreeMap::new();
        let mut listeners = BTreeMap::new();
        for (domain_str, service) in nodes {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let address = PeerAddress::new(domain(domain_str), *service);
            peers.insert(address, listener.local_addr().unwrap());
            listeners.insert(address, listener);
        }
        Self {
            net: TestNetwork::new(),
            peers,
            listeners,
            servers: Vec::new(),
        }
    }

    /// Context whose messenger dials the shared peer table and, when a
    /// listener was reserved for it, serves on that listener.
    fn context(&mut self, node_id: &str, domain_str: &str, service: ServiceKind) -> NodeContext {
        let local = PeerAddress::new(domain(domain_str), service);
        let messenger = Arc::new(Messenger::new(
            local,
            Arc::new(TcpTransport::new(self.peers.clone())),
            Duration::from_secs(2),
        ));
        if let Some(listener) = self.listeners.remove(&local) {
            let serving = messenger.clone();
            self.servers.push(tokio::spawn(async move {
                if let Err(e) = serve_tcp(listener, serving).await {
                    tracing::warn!(error = %e, "test server stopped");
                }
            }));
        }
        NodeContext::new(node_id, messenger, self.net.engine(), self.net.signer(domain_str))
    }

    async fn relay(&mut self, node_id: &str, domain_str: &str) -> Arc<Relay> {
        let relay = Arc::new(Relay::new(
            self.context(node_id, domain_str, ServiceKind::Relay),
            Arc::new(EntryStore::open_in_memory().unwrap()),
            domain(REGISTRY),
            self.net.gossip.clone(),
            Duration::from_secs(600),
        ));
        relay.install();
        relay.registry().add_self().await.unwrap();
        relay
    }
}

impl Drop for TcpNetwork {
    fn drop(&mut self) {
        for server in &self.servers {
            server.abort();
        }
    }
}

#[tokio::test]
async fn test_publish_and_gossip_over_tcp() {
    let mut tcp = TcpNetwork::new(&[
        (REGISTRY, ServiceKind::Registry),
        (RELAY_A, ServiceKind::Relay),
        (RELAY_B, ServiceKind::Relay),
    ])
    .await;

    let registry_ctx = tcp.context("registry", REGISTRY, ServiceKind::Registry);
    let registry = RegistryNode::new(
        registry_ctx,
        Arc::new(MembershipStore::open_in_memory().unwrap()),
        Arc::new(StaticTopology::new()),
        PropagationConfig::default(),
    );
    registry.install();

    let a = tcp.relay("relay-a", RELAY_A).await;
    let b = tcp.relay("relay-b", RELAY_B).await;
    assert_eq!(registry.server().store().get_all().unwrap().len(), 2);

    let aggregator = Aggregator::new(
        tcp.context("aggregator", ORIGIN, ServiceKind::Aggregator),
        domain(REGISTRY),
        Arc::new(EntryStore::open_in_memory().unwrap()),
        &GossipConfig::default(),
        &AggregatorConfig {
            prefixes: vec!["198.51.100.0/24".to_string()],
            ..AggregatorConfig::default()
        },
    );
    let receipt = aggregator.publish().await.unwrap();

    let (holder, other) = if a.store().is_empty().unwrap() {
        (b, a)
    } else {
        (a, b)
    };
    let cycle = holder.gossip().push_once().await.unwrap();
    assert_eq!(cycle.delivered, 1);

    let held = other
        .store()
        .lookup(domain(ORIGIN), "MAP")
        .unwrap()
        .expect("entry gossiped over tcp");
    assert_eq!(held.entry.commit_id, receipt.commit_id);
}

#[tokio::test]
async fn test_unknown_peer_is_transport_error() {
    let mut tcp = TcpNetwork::new(&[(RELAY_A, ServiceKind::Relay)]).await;
    let ctx = tcp.context("relay-a", RELAY_A, ServiceKind::Relay);

    // No registry in the peer table
    let err = ctx
        .registry_client(domain(REGISTRY))
        .add_self()
        .await
        .unwrap_err();
    assert!(err.is_retryable());
}
