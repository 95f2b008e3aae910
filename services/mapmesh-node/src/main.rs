use anyhow::{anyhow, bail, Context};
use mapmesh_core::{logging, DomainId, NodeConfig, PeerAddress, Role};
use mapmesh_crypto::load_key_dir;
use mapmesh_identity::{
    CertificateAuthority, SignerGenerator, StaticCertificateAuthority, TrustEngine,
};
use mapmesh_mesh::{
    serve_tcp, Aggregator, CertificateService, EntryStore, MembershipStore, Messenger,
    NodeContext, RegistryNode, Relay, RemoteCertificateAuthority, StaticTopology, TcpTransport,
};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

const NODE_PROTOCOL_VERSION: u32 = 1;

#[derive(Debug, Serialize)]
struct NodeVersionHandshake {
    version: &'static str,
    protocol_version: u32,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|arg| arg == "--version-json") {
        let handshake = NodeVersionHandshake {
            version: env!("CARGO_PKG_VERSION"),
            protocol_version: NODE_PROTOCOL_VERSION,
        };
        println!("{}", serde_json::to_string(&handshake)?);
        return Ok(());
    }

    let config_path = parse_config_path(&args)?;
    let config = NodeConfig::from_file(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    logging::init_from_config(&config.logging);

    tracing::info!(
        node_id = %config.general.id,
        domain = %config.general.domain,
        role = ?config.general.role,
        "starting mapmesh-node"
    );
    run(config).await
}

async fn run(config: NodeConfig) -> anyhow::Result<()> {
    let general = &config.general;
    if general.listen.is_none() && general.role != Role::Aggregator {
        bail!("general.listen must be set for the {:?} role", general.role);
    }
    let keys = load_key_dir(&general.key_dir)
        .with_context(|| format!("loading keys from {}", general.key_dir.display()))?;
    tracing::info!(keys = keys.len(), "private keys loaded");

    let local = PeerAddress::new(general.domain, general.role.service_kind());
    let transport = Arc::new(TcpTransport::new(config.peer_table()?));
    let messenger = Arc::new(Messenger::new(local, transport, general.request_timeout()));

    let static_authority = match &general.trust_material {
        Some(path) => Some(Arc::new(
            StaticCertificateAuthority::from_file(path)
                .with_context(|| format!("loading trust material from {}", path.display()))?,
        )),
        None => None,
    };
    let authority: Arc<dyn CertificateAuthority> = match &static_authority {
        Some(authority) => authority.clone(),
        None => {
            let remote = config
                .registry
                .domain
                .ok_or_else(|| anyhow!("general.trust_material or registry.domain must be set"))?;
            tracing::info!(authority = %remote, "using remote certificate authority");
            Arc::new(RemoteCertificateAuthority::new(messenger.clone(), remote))
        }
    };

    let engine = Arc::new(TrustEngine::new(authority));
    let signer = Arc::new(SignerGenerator::new(general.domain, keys, engine.clone()));
    let ctx = NodeContext::new(general.id.clone(), messenger.clone(), engine, signer);

    let mut tasks: Vec<JoinHandle<()>> = Vec::new();
    match general.role {
        Role::Aggregator => {
            let store = Arc::new(EntryStore::open(config.db_path())?);
            let aggregator = Arc::new(Aggregator::new(
                ctx,
                registry_domain(&config)?,
                store,
                &config.gossip,
                &config.aggregator,
            ));
            tasks.extend(aggregator.spawn());
        }
        Role::Relay => {
            let store = Arc::new(EntryStore::open(config.db_path())?);
            let relay = Arc::new(Relay::new(
                ctx,
                store,
                registry_domain(&config)?,
                config.gossip.clone(),
                config.registry.refresh_interval(),
            ));
            relay.install();
            tasks.extend(relay.spawn());
        }
        Role::Registry => {
            let store = Arc::new(MembershipStore::open(config.db_path())?);
            let topology = StaticTopology::from_paths(general.domain, &config.propagation.segments);
            let registry = RegistryNode::new(
                ctx,
                store,
                Arc::new(topology),
                config.propagation.clone(),
            );
            registry.install();
            if let Some(authority) = &static_authority {
                Arc::new(CertificateService::new(authority.clone())).install(&messenger);
                tracing::info!("serving certificate queries");
            }
            tasks.push(registry.spawn());
        }
    }

    let result = match general.listen {
        Some(addr) => {
            let listener = TcpListener::bind(addr)
                .await
                .with_context(|| format!("binding {addr}"))?;
            tokio::select! {
                served = serve_tcp(listener, messenger) => served.map_err(anyhow::Error::from),
                _ = tokio::signal::ctrl_c() => Ok(()),
            }
        }
        None => tokio::signal::ctrl_c().await.map_err(anyhow::Error::from),
    };

    tracing::info!("shutting down");
    for task in &tasks {
        task.abort();
    }
    result
}

fn registry_domain(config: &NodeConfig) -> anyhow::Result<DomainId> {
    config
        .registry
        .domain
        .ok_or_else(|| anyhow!("registry.domain must be set"))
}

fn parse_config_path(args: &[String]) -> anyhow::Result<PathBuf> {
    let mut args_iter = args.iter();
    while let Some(arg) = args_iter.next() {
        if arg == "--config" {
            if let Some(path) = args_iter.next() {
                return Ok(PathBuf::from(path));
            }
            bail!("--config was provided without a path");
        }
    }

    bail!("missing required --config <path> argument")
}
