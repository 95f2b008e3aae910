//! Shared per-node state every role server is built from.

use crate::messenger::Messenger;
use crate::registry::RegistryClient;
use mapmesh_core::DomainId;
use mapmesh_identity::{SignerGenerator, TrustEngine};
use std::sync::Arc;

/// Identity, trust and messaging handles of one node.
#[derive(Clone)]
pub struct NodeContext {
    pub node_id: String,
    pub messenger: Arc<Messenger>,
    pub engine: Arc<TrustEngine>,
    pub signer: Arc<SignerGenerator>,
}

impl NodeContext {
    pub fn new(
        node_id: impl Into<String>,
        messenger: Arc<Messenger>,
        engine: Arc<TrustEngine>,
        signer: Arc<SignerGenerator>,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            messenger,
            engine,
            signer,
        }
    }

    pub fn domain(&self) -> DomainId {
        self.signer.domain()
    }

    /// Client for the registry of `registry_domain`, acting as this node.
    pub fn registry_client(&self, registry_domain: DomainId) -> RegistryClient {
        RegistryClient::new(
            self.node_id.clone(),
            registry_domain,
            self.messenger.clone(),
            self.signer.clone(),
            self.engine.clone(),
        )
    }
}
