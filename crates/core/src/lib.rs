//! Core functionality for the MapMesh mapping-publication network.
//!
//! This crate provides the fundamental types, configuration and logging used
//! across the MapMesh roles (aggregator, gossip relay, registry).

pub mod config;
pub mod error;
pub mod logging;
pub mod types;

pub use config::{
    AggregatorConfig, GeneralConfig, GossipConfig, LoggingConfig, NodeConfig, PropagationConfig,
    RegistryConfig, Role,
};
pub use error::{CoreError, Result};
pub use types::{unix_now, DomainId, PeerAddress, ServiceKind};
