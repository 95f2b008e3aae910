//! MapMesh Mesh - trust-anchored gossip of mapping entries
//!
//! Every node runs one role on top of a shared [`NodeContext`] (messenger,
//! trust engine, signer).
//!
//! # Core Components
//!
//! - **Messenger**: typed, signed request/reply over a pluggable transport
//!   (in-process or TCP), every call deadline-bound
//! - **Entry Store & Reconciler**: one row per `(origin, entry type)`, newest
//!   timestamp wins
//! - **Validator**: freshness plus nested origin-signature checks
//! - **Gossip Scheduler**: periodic fanout push and partial-accept receive
//! - **Registry**: first-write-wins membership, signed lists, downstream
//!   propagation
//!
//! # Example Usage
//!
//! ```rust,ignore
//! let relay = Arc::new(Relay::new(ctx, store, registry_domain, gossip, refresh));
//! relay.install();
//! let tasks = relay.spawn();
//! ```

pub mod aggregator;
pub mod authority;
pub mod error;
pub mod gossip;
pub mod membership;
pub mod message;
pub mod messenger;
pub mod node;
pub mod periodic;
pub mod propagator;
pub mod reconcile;
pub mod registry;
pub mod registry_node;
pub mod relay;
pub mod store;
pub mod tcp;
pub mod validate;

// Re-export main types
pub use aggregator::Aggregator;
pub use authority::{CertificateService, RemoteCertificateAuthority};
pub use error::{MeshError, MeshResult};
pub use gossip::{BatchReport, CycleReport, GossipScheduler};
pub use membership::MembershipStore;
pub use message::{
    Ack, AckCode, Body, Entry, EntryBatch, EntryQuery, EntryReceipt, MappingRecord,
    MembershipList, MembershipRecord, MessageType, Payload, Registration, Reply, Request,
};
pub use messenger::{Handler, LocalTransport, Messenger, Transport};
pub use node::NodeContext;
pub use propagator::{PropagationReport, Propagator, Segment, StaticTopology, Topology};
pub use reconcile::{reconcile, EntryTable, Outcome};
pub use registry::{PushReport, RegistryClient, RegistryServer};
pub use registry_node::RegistryNode;
pub use relay::{query_entries, Relay};
pub use store::{EntryStore, StoredEntry};
pub use tcp::{serve_tcp, TcpTransport};
pub use validate::EntryValidator;
