//! Signer selection and verification across independent nodes.

use crate::test_utils::*;
use mapmesh_core::{unix_now, ServiceKind};
use mapmesh_crypto::PrivateKeyHandle;
use mapmesh_identity::{CertificateAuthority, SignerGenerator, TrustEngine};
use mapmesh_mesh::{
    CertificateService, EntryStore, MeshError, NodeContext, Relay, RemoteCertificateAuthority,
};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_nodes_with_same_material_pick_same_key() {
    let net = TestNetwork::new();
    let origin = domain("1-ff00:0:1");
    let keys = vec![
        PrivateKeyHandle::generate(),
        PrivateKeyHandle::generate(),
        PrivateKeyHandle::generate(),
    ];
    net.certify(origin, &keys[0], 10 * DAY);
    net.certify(origin, &keys[1], 20 * DAY);
    // keys[2] has no chain at all

    let first = SignerGenerator::new(origin, keys.clone(), net.engine());
    let second = SignerGenerator::new(origin, keys, net.engine());
    let now = unix_now();
    let a = first.generate_at(now).await.unwrap();
    let b = second.generate_at(now).await.unwrap();

    assert_eq!(a.key_index, 1);
    assert_eq!(a.key_index, b.key_index);
    assert_eq!(a.chain, b.chain);
    assert_eq!(a.bound_expiration, b.bound_expiration);
}

#[tokio::test]
async fn test_batch_from_foreign_root_rejected() {
    let net = TestNetwork::new();
    let _registry = net.registry(REGISTRY, &[]);
    let relay = net.relay("relay-a", "1-ff00:0:110", REGISTRY).await;

    // Same ISD and domains, but certified under an unrelated root
    let other = TestNetwork::new();
    let origin = other.identity("1-ff00:0:1").await;
    let sender = other.identity("1-ff00:0:111").await;

    let request = batch_request(&sender, vec![mapping_entry(&origin, unix_now(), "c1")]);
    let err = relay.gossip().receive_batch(&request).await.unwrap_err();
    assert!(matches!(err, MeshError::Verify(_)));
    assert!(relay.store().is_empty().unwrap());
}

#[tokio::test]
async fn test_relay_verifies_through_remote_authority() {
    // Setup: the registry domain also serves certificate queries
    let net = TestNetwork::new();
    let _registry = net.registry(REGISTRY, &[]);
    let ca_messenger = net.messenger(REGISTRY, ServiceKind::CertificateAuthority);
    let local: Arc<dyn CertificateAuthority> = net.authority.clone();
    Arc::new(CertificateService::new(local)).install(&ca_messenger);

    // The relay holds no trust material of its own
    let relay_domain = domain("1-ff00:0:110");
    let messenger = net.messenger("1-ff00:0:110", ServiceKind::Relay);
    let remote = Arc::new(RemoteCertificateAuthority::new(
        messenger.clone(),
        domain(REGISTRY),
    ));
    let engine = Arc::new(TrustEngine::new(remote));
    let key = PrivateKeyHandle::generate();
    net.certify(relay_domain, &key, 30 * DAY);
    let signer = Arc::new(SignerGenerator::new(relay_domain, vec![key], engine.clone()));
    let relay = Arc::new(Relay::new(
        NodeContext::new("relay-a", messenger, engine, signer),
        Arc::new(EntryStore::open_in_memory().unwrap()),
        domain(REGISTRY),
        net.gossip.clone(),
        Duration::from_secs(600),
    ));
    relay.install();
    relay.registry().add_self().await.unwrap();

    let origin = net.identity("1-ff00:0:1").await;
    let neighbour = net.identity("1-ff00:0:111").await;
    let report = relay
        .gossip()
        .receive_batch(&batch_request(
            &neighbour,
            vec![mapping_entry(&origin, unix_now(), "c1")],
        ))
        .await
        .unwrap();
    assert_eq!(report.inserted, 1);

    // Domains nobody certified stay unverifiable
    let unknown = TestNetwork::new().identity("1-ff00:0:2").await;
    let report = relay
        .gossip()
        .receive_batch(&batch_request(
            &neighbour,
            vec![mapping_entry(&unknown, unix_now(), "c2")],
        ))
        .await
        .unwrap();
    assert_eq!(report.rejected, 1);
}
