//! Multi-node integration tests for MapMesh
//!
//! This test suite validates:
//! - Entry reconciliation across relays (newest wins, order independent)
//! - Partial acceptance of gossip batches and signature gating
//! - Registry first-write-wins membership and downstream propagation
//! - End-to-end publish, gossip and query over in-process and TCP transports

pub mod test_utils;

#[cfg(test)]
mod gossip_scenarios;

#[cfg(test)]
mod registry_scenarios;

#[cfg(test)]
mod trust_scenarios;

#[cfg(test)]
mod tcp_scenarios;
