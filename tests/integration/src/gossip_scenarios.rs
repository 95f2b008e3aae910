//! Reconciliation and gossip between relays.

use crate::test_utils::*;
use mapmesh_core::{unix_now, ServiceKind};
use mapmesh_mesh::{query_entries, EntryQuery, EntryValidator, Outcome, Payload};

const ORIGIN: &str = "1-ff00:0:1";

#[tokio::test]
async fn test_newest_entry_survives_out_of_order_delivery() {
    // Setup: one registry, one relay, one origin, one gossiping neighbour
    let net = TestNetwork::new();
    let _registry = net.registry(REGISTRY, &[]);
    let relay = net.relay("relay-a", "1-ff00:0:110", REGISTRY).await;
    let origin = net.identity(ORIGIN).await;
    let neighbour = net.identity("1-ff00:0:111").await;
    let now = unix_now();

    let first = batch_request(&neighbour, vec![mapping_entry(&origin, now - 300, "c1")]);
    let report = relay.gossip().receive_batch(&first).await.unwrap();
    assert_eq!(report.inserted, 1);

    let newer = batch_request(&neighbour, vec![mapping_entry(&origin, now - 100, "c2")]);
    let report = relay.gossip().receive_batch(&newer).await.unwrap();
    assert_eq!(report.updated, 1);

    // Older than what is held: must not overwrite
    let late = batch_request(&neighbour, vec![mapping_entry(&origin, now - 200, "c3")]);
    let report = relay.gossip().receive_batch(&late).await.unwrap();
    assert_eq!(report.discarded, 1);

    let held = relay
        .store()
        .lookup(domain(ORIGIN), "MAP")
        .unwrap()
        .expect("entry held");
    assert_eq!(held.entry.commit_id, "c2");
    assert_eq!(held.entry.timestamp, now - 100);
}

#[tokio::test]
async fn test_relays_converge_regardless_of_order() {
    let net = TestNetwork::new();
    let _registry = net.registry(REGISTRY, &[]);
    let a = net.relay("relay-a", "1-ff00:0:110", REGISTRY).await;
    let b = net.relay("relay-b", "1-ff00:0:120", REGISTRY).await;
    let origin = net.identity(ORIGIN).await;
    let neighbour = net.identity("1-ff00:0:111").await;
    let now = unix_now();

    let old = mapping_entry(&origin, now - 60, "old");
    let new = mapping_entry(&origin, now - 30, "new");

    for envelope in [old.clone(), new.clone()] {
        a.gossip()
            .receive_batch(&batch_request(&neighbour, vec![envelope]))
            .await
            .unwrap();
    }
    for envelope in [new, old] {
        b.gossip()
            .receive_batch(&batch_request(&neighbour, vec![envelope]))
            .await
            .unwrap();
    }

    let on_a = a.store().lookup(domain(ORIGIN), "MAP").unwrap().unwrap();
    let on_b = b.store().lookup(domain(ORIGIN), "MAP").unwrap().unwrap();
    assert_eq!(on_a.entry.commit_id, "new");
    assert_eq!(on_a, on_b);
}

#[tokio::test]
async fn test_redelivery_is_idempotent() {
    let net = TestNetwork::new();
    let _registry = net.registry(REGISTRY, &[]);
    let relay = net.relay("relay-a", "1-ff00:0:110", REGISTRY).await;
    let origin = net.identity(ORIGIN).await;
    let neighbour = net.identity("1-ff00:0:111").await;

    let request = batch_request(&neighbour, vec![mapping_entry(&origin, unix_now(), "c1")]);
    let first = relay.gossip().receive_batch(&request).await.unwrap();
    let second = relay.gossip().receive_batch(&request).await.unwrap();

    assert_eq!(first.inserted, 1);
    assert_eq!(second.discarded, 1);
    assert_eq!(relay.store().len().unwrap(), 1);
}

#[tokio::test]
async fn test_batch_is_accepted_entry_by_entry() {
    let net = TestNetwork::new();
    let _registry = net.registry(REGISTRY, &[]);
    let relay = net.relay("relay-a", "1-ff00:0:110", REGISTRY).await;
    let good_one = net.identity("1-ff00:0:1").await;
    let good_two = net.identity("1-ff00:0:2").await;
    let mallory = net.identity("1-ff00:0:666").await;
    let neighbour = net.identity("1-ff00:0:111").await;
    let now = unix_now();

    // Mallory signs an entry claiming to come from 1-ff00:0:3
    let forged = mapping_entry_for(&mallory, domain("1-ff00:0:3"), now, "forged");
    let stale = mapping_entry(&good_two, now - 2 * DAY, "stale");
    let request = batch_request(
        &neighbour,
        vec![
            mapping_entry(&good_one, now, "a"),
            forged,
            stale,
            mapping_entry(&good_two, now, "b"),
        ],
    );

    let report = relay.gossip().receive_batch(&request).await.unwrap();
    assert_eq!(report.inserted, 2);
    assert_eq!(report.rejected, 2);
    assert!(relay.store().lookup(domain("1-ff00:0:3"), "MAP").unwrap().is_none());
    assert_eq!(
        relay
            .store()
            .lookup(domain("1-ff00:0:2"), "MAP")
            .unwrap()
            .unwrap()
            .entry
            .commit_id,
        "b"
    );
}

#[tokio::test]
async fn test_stale_entry_not_stored_on_empty_relay() {
    let net = TestNetwork::new();
    let _registry = net.registry(REGISTRY, &[]);
    let relay = net.relay("relay-a", "1-ff00:0:110", REGISTRY).await;
    let origin = net.identity(ORIGIN).await;
    let neighbour = net.identity("1-ff00:0:111").await;
    let now = unix_now();

    let too_old = mapping_entry(&origin, now - DAY - 60, "old");
    let too_new = mapping_entry(&origin, now + 3600, "future");
    let report = relay
        .gossip()
        .receive_batch(&batch_request(&neighbour, vec![too_old, too_new]))
        .await
        .unwrap();

    assert_eq!(report.rejected, 2);
    assert!(relay.store().is_empty().unwrap());
}

#[tokio::test]
async fn test_published_mapping_reaches_second_relay() {
    // Setup: registry, two relays, one aggregator
    let net = TestNetwork::new();
    let _registry = net.registry(REGISTRY, &[]);
    let a = net.relay("relay-a", "1-ff00:0:110", REGISTRY).await;
    let b = net.relay("relay-b", "1-ff00:0:120", REGISTRY).await;
    let aggregator = net.aggregator(ORIGIN, &["192.0.2.0/24"]);

    let receipt = aggregator.publish().await.unwrap();
    assert_eq!(receipt.outcome, Outcome::Inserted);

    // Whichever relay received it gossips it to the other
    let ((first, _), (second, second_domain)) = if a.store().is_empty().unwrap() {
        ((b, "1-ff00:0:120"), (a, "1-ff00:0:110"))
    } else {
        ((a, "1-ff00:0:110"), (b, "1-ff00:0:120"))
    };
    let cycle = first.gossip().push_once().await.unwrap();
    assert_eq!(cycle.peers, 1);
    assert_eq!(cycle.delivered, 1);

    let held = second
        .store()
        .lookup(domain(ORIGIN), "MAP")
        .unwrap()
        .expect("gossiped entry");
    assert_eq!(held.entry.commit_id, receipt.commit_id);
    let mapping = Payload::open(&held.entry.payload)
        .unwrap()
        .into_mapping()
        .unwrap();
    assert_eq!(mapping.prefixes, vec!["192.0.2.0/24".to_string()]);

    // A client query against the second relay sees the same entry
    let client = net.context("client", "1-ff00:0:9", ServiceKind::Aggregator);
    let validator = EntryValidator::new(net.engine(), &net.gossip);
    let found = query_entries(
        &client,
        &validator,
        domain(second_domain),
        EntryQuery {
            entry_type: "MAP".to_string(),
            origin_domain: "*".to_string(),
        },
    )
    .await
    .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].entry.commit_id, receipt.commit_id);
}

#[tokio::test]
async fn test_aggregator_pulls_mappings_of_other_domains() {
    // Setup: registry, two relays, two aggregators in different domains
    let net = TestNetwork::new();
    let _registry = net.registry(REGISTRY, &[]);
    let a = net.relay("relay-a", "1-ff00:0:110", REGISTRY).await;
    let b = net.relay("relay-b", "1-ff00:0:120", REGISTRY).await;
    let origin = net.aggregator(ORIGIN, &["192.0.2.0/24"]);
    let collector = net.aggregator("1-ff00:0:2", &["198.51.100.0/24"]);

    let receipt = origin.publish().await.unwrap();
    let first = if a.store().is_empty().unwrap() { &b } else { &a };
    first.gossip().push_once().await.unwrap();
    assert_eq!(a.store().len().unwrap(), 1);
    assert_eq!(b.store().len().unwrap(), 1);

    // Either relay can answer the pull
    assert_eq!(collector.pull().await.unwrap(), 1);
    let held = collector
        .store()
        .lookup(domain(ORIGIN), "MAP")
        .unwrap()
        .expect("pulled entry");
    assert_eq!(held.entry.commit_id, receipt.commit_id);
    assert!(collector.store().lookup(domain("1-ff00:0:2"), "MAP").unwrap().is_none());
}
