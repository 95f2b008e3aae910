//! Registry role: serves membership and propagates it downstream.

use crate::membership::MembershipStore;
use crate::node::NodeContext;
use crate::propagator::{Propagator, Topology};
use crate::registry::RegistryServer;
use mapmesh_core::PropagationConfig;
use std::sync::Arc;
use tokio::task::JoinHandle;

pub struct RegistryNode {
    ctx: NodeContext,
    server: Arc<RegistryServer>,
    propagator: Arc<Propagator>,
}

impl RegistryNode {
    pub fn new(
        ctx: NodeContext,
        store: Arc<MembershipStore>,
        topology: Arc<dyn Topology>,
        config: PropagationConfig,
    ) -> Self {
        let server = Arc::new(RegistryServer::new(
            store.clone(),
            ctx.engine.clone(),
            ctx.signer.clone(),
        ));
        // Pushes go out as this registry; its own client target is unused.
        let client = Arc::new(ctx.registry_client(ctx.domain()));
        let propagator = Arc::new(Propagator::new(
            ctx.domain(),
            topology,
            store,
            client,
            config,
        ));
        Self {
            ctx,
            server,
            propagator,
        }
    }

    pub fn server(&self) -> &Arc<RegistryServer> {
        &self.server
    }

    pub fn propagator(&self) -> &Arc<Propagator> {
        &self.propagator
    }

    pub fn install(&self) {
        self.server.install(&self.ctx.messenger);
    }

    /// Start the propagation loop.
    pub fn spawn(&self) -> JoinHandle<()> {
        self.propagator.clone().spawn()
    }
}
