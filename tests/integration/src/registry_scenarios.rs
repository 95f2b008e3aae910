//! Membership registration and downstream propagation.

use crate::test_utils::*;
use mapmesh_core::{PeerAddress, ServiceKind};
use mapmesh_mesh::{MembershipList, MembershipRecord, MessageType, Payload, Reply};

#[tokio::test]
async fn test_first_registration_wins() {
    let net = TestNetwork::new();
    let registry = net.registry(REGISTRY, &[]);
    let _relay = net.relay("relay-a", "1-ff00:0:110", REGISTRY).await;

    // A second node claims the same ID from another domain
    let imposter = net.context("relay-a", "1-ff00:0:120", ServiceKind::Relay);
    imposter
        .registry_client(domain(REGISTRY))
        .add_self()
        .await
        .unwrap();

    let records = registry.server().store().get_all().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].domain, domain("1-ff00:0:110"));

    let listed = imposter
        .registry_client(domain(REGISTRY))
        .fetch_list()
        .await
        .unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].node_id, "relay-a");
}

#[tokio::test]
async fn test_membership_propagates_within_hop_bound() {
    // Setup: 100 -> 200 (1 hop), 100 -> 210 -> 300 (2 hops),
    // 100 -> 400 -> 500 -> 600 -> 700 (4 hops, beyond the default bound)
    let net = TestNetwork::new();
    let upstream = net.registry(
        REGISTRY,
        &[
            vec![domain("1-ff00:0:200")],
            vec![domain("1-ff00:0:210"), domain("1-ff00:0:300")],
            vec![
                domain("1-ff00:0:400"),
                domain("1-ff00:0:500"),
                domain("1-ff00:0:600"),
                domain("1-ff00:0:700"),
            ],
        ],
    );
    let near = net.registry("1-ff00:0:200", &[]);
    let mid = net.registry("1-ff00:0:300", &[]);
    let far = net.registry("1-ff00:0:700", &[]);
    let _relay = net.relay("relay-a", "1-ff00:0:110", REGISTRY).await;

    let targets = upstream.propagator().discover_downstream(3).await.unwrap();
    assert_eq!(targets, vec![domain("1-ff00:0:200"), domain("1-ff00:0:300")]);

    let report = upstream.propagator().run_once().await.unwrap();
    assert_eq!(report.targets, 2);
    assert_eq!(report.delivered, 2);

    for registry in [&near, &mid] {
        let records = registry.server().store().get_all().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].node_id, "relay-a");
    }
    assert!(far.server().store().get_all().unwrap().is_empty());

    // A relay registered downstream now sees the upstream relay as a peer
    let downstream_relay = net.relay("relay-b", "1-ff00:0:210", "1-ff00:0:200").await;
    let peers = downstream_relay.registry().fetch_list().await.unwrap();
    let mut ids: Vec<_> = peers.iter().map(|p| p.node_id.as_str()).collect();
    ids.sort_unstable();
    assert_eq!(ids, vec!["relay-a", "relay-b"]);
}

#[tokio::test]
async fn test_pushed_records_need_registrant_signature() {
    let net = TestNetwork::new();
    let registry = net.registry(REGISTRY, &[]);
    let pusher = net.context("registry-x", "1-ff00:0:900", ServiceKind::Registry);
    let identity = pusher
        .messenger
        .bind_current(&pusher.signer, &[MessageType::MembershipPush])
        .await
        .unwrap();
    assert_eq!(identity.domain, domain("1-ff00:0:900"));

    let unsigned = MembershipRecord {
        node_id: "ghost".to_string(),
        domain: domain("1-ff00:0:901"),
        raw: None,
    };
    let reply = pusher
        .messenger
        .send(
            &Payload::MembershipList(MembershipList {
                records: vec![unsigned],
            }),
            PeerAddress::new(domain(REGISTRY), ServiceKind::Registry),
            MessageType::MembershipPush,
        )
        .await
        .unwrap();

    // The push itself is accepted; the unverifiable record is dropped
    assert_eq!(reply, Reply::ok());
    assert!(registry.server().store().get_all().unwrap().is_empty());
}
