//! Pushes a registry's membership list to the registries of nearby
//! downstream domains.

use crate::error::MeshResult;
use crate::membership::MembershipStore;
use crate::periodic::spawn_periodic;
use crate::registry::RegistryClient;
use async_trait::async_trait;
use mapmesh_core::{DomainId, PropagationConfig};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// A known path from a source domain, destination last. The source itself
/// is not listed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub hops: Vec<DomainId>,
}

impl Segment {
    pub fn new(hops: Vec<DomainId>) -> Self {
        Self { hops }
    }

    pub fn destination(&self) -> Option<DomainId> {
        self.hops.last().copied()
    }

    pub fn len(&self) -> usize {
        self.hops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hops.is_empty()
    }
}

/// Path information the propagator consults.
#[async_trait]
pub trait Topology: Send + Sync {
    /// Segments from `src` to `dst`; a wildcard `dst` asks for all of them.
    async fn get_segments(&self, src: DomainId, dst: DomainId) -> MeshResult<Vec<Segment>>;
}

/// Topology read from configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticTopology {
    segments: BTreeMap<DomainId, Vec<Segment>>,
}

impl StaticTopology {
    pub fn new() -> Self {
        Self::default()
    }

    /// Topology holding `paths` as segments from `src`.
    pub fn from_paths(src: DomainId, paths: &[Vec<DomainId>]) -> Self {
        let mut topology = Self::new();
        for path in paths {
            topology.add_segment(src, Segment::new(path.clone()));
        }
        topology
    }

    pub fn add_segment(&mut self, src: DomainId, segment: Segment) {
        self.segments.entry(src).or_default().push(segment);
    }
}

#[async_trait]
impl Topology for StaticTopology {
    async fn get_segments(&self, src: DomainId, dst: DomainId) -> MeshResult<Vec<Segment>> {
        let Some(segments) = self.segments.get(&src) else {
            return Ok(Vec::new());
        };
        Ok(segments
            .iter()
            .filter(|s| dst.is_wildcard() || s.destination() == Some(dst))
            .cloned()
            .collect())
    }
}

/// Counts from one propagation run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PropagationReport {
    pub targets: usize,
    pub delivered: usize,
}

pub struct Propagator {
    local: DomainId,
    topology: Arc<dyn Topology>,
    membership: Arc<MembershipStore>,
    client: Arc<RegistryClient>,
    config: PropagationConfig,
}

impl Propagator {
    pub fn new(
        local: DomainId,
        topology: Arc<dyn Topology>,
        membership: Arc<MembershipStore>,
        client: Arc<RegistryClient>,
        config: PropagationConfig,
    ) -> Self {
        Self {
            local,
            topology,
            membership,
            client,
            config,
        }
    }

    /// Domains whose shortest known segment from here has at most
    /// `hop_bound` hops, deduplicated and in ascending order.
    pub async fn discover_downstream(&self, hop_bound: u16) -> MeshResult<Vec<DomainId>> {
        let segments = self
            .topology
            .get_segments(self.local, DomainId::WILDCARD)
            .await?;

        let mut shortest: BTreeMap<DomainId, usize> = BTreeMap::new();
        for segment in &segments {
            let Some(dst) = segment.destination() else {
                continue;
            };
            let len = shortest.entry(dst).or_insert(usize::MAX);
            *len = (*len).min(segment.len());
        }

        let downstream: BTreeSet<DomainId> = shortest
            .into_iter()
            .filter(|(dst, len)| *len <= hop_bound as usize && *dst != self.local && !dst.is_wildcard())
            .map(|(dst, _)| dst)
            .collect();
        Ok(downstream.into_iter().collect())
    }

    /// Discover targets and push the local membership list to each. A
    /// failed target is logged and does not stop the others.
    pub async fn run_once(&self) -> MeshResult<PropagationReport> {
        let targets = self.discover_downstream(self.config.hop_bound).await?;
        let mut report = PropagationReport {
            targets: targets.len(),
            delivered: 0,
        };
        let records = self.membership.get_all()?;
        if records.is_empty() {
            tracing::debug!(local = %self.local, "membership empty, nothing to propagate");
            return Ok(report);
        }

        for target in targets {
            match self.client.push_list(target, records.clone()).await {
                Ok(()) => report.delivered += 1,
                Err(e) => tracing::warn!(
                    target = %target,
                    error = %e,
                    retryable = e.is_retryable(),
                    "membership push failed"
                ),
            }
        }
        tracing::info!(
            local = %self.local,
            records = records.len(),
            targets = report.targets,
            delivered = report.delivered,
            "propagation run complete"
        );
        Ok(report)
    }

    /// Run now and then on the configured interval.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        let interval = self.config.interval();
        spawn_periodic("propagation", interval, move || {
            let propagator = self.clone();
            async move {
                if let Err(e) = propagator.run_once().await {
                    tracing::error!(local = %propagator.local, error = %e, "propagation run aborted");
                }
            }
        })
    }
}
