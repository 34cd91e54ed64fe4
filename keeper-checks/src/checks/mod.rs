//! Check scenarios.
//!
//! Every scenario is an options struct implementing [`Check`]. The set of
//! scenarios is closed: [`CheckKind`] names them and [`CheckOptions`] holds
//! the typed options of one configured instance.
//!
//! | Kind | Verifies |
//! |------|----------|
//! | `balances` | accounting balances are symmetric and move on retrieval |
//! | `chunk-repair` | a chunk removed from its closest node is still retrievable |
//! | `file-retrieval` | multi-chunk files download byte-equal from other nodes |
//! | `full-connectivity` | every node is connected to every other node |
//! | `gc` | filling a store evicts unpinned chunks and keeps pinned ones |
//! | `kademlia` | bins below depth are populated, bins at depth are saturated |
//! | `local-pinning` | pinned chunks survive store filling |
//! | `peer-count` | every node has enough peers |
//! | `pingpong` | every node can reach every peer it reports |
//! | `pullsync` | the closest node's neighbourhood replicates uploads |
//! | `pushsync` | uploads sync and reach the closest node and enough replicas |
//! | `retrieval` | a chunk downloads byte-equal from another node |
//! | `settlements` | settlements are symmetric and debts stay below threshold |
//! | `smoke` | random bytes round-trip through upload, sync and download |
//! | `soc` | a signed single-owner chunk round-trips byte-identical |

mod balances;
mod chunkrepair;
mod fileretrieval;
mod fullconnectivity;
mod gc;
mod kademlia;
mod localpinning;
mod peercount;
mod pingpong;
mod pullsync;
mod pushsync;
mod retrieval;
mod settlements;
mod smoke;
mod soc;

pub use balances::BalancesOptions;
pub use chunkrepair::ChunkRepairOptions;
pub use fileretrieval::FileRetrievalOptions;
pub use fullconnectivity::FullConnectivityOptions;
pub use gc::GcOptions;
pub use kademlia::KademliaOptions;
pub use localpinning::{LocalPinningOptions, PinningMode};
pub use peercount::PeerCountOptions;
pub use pingpong::PingpongOptions;
pub use pullsync::PullsyncOptions;
pub use pushsync::PushsyncOptions;
pub use retrieval::RetrievalOptions;
pub use settlements::SettlementsOptions;
pub use smoke::SmokeOptions;
pub use soc::SocOptions;

use crate::assertions::AssertionFailure;
use crate::context::CheckContext;
use crate::error::{CheckError, Result};
use crate::topology::{Cluster, NodeGroup, NodeIdentity, DEFAULT_NODE_GROUP};
use crate::wait::wait_until;
use async_trait::async_trait;
use futures_util::future::join_all;
use keeper_types::Address;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// A runnable check scenario.
#[async_trait]
pub trait Check: Send + Sync {
    /// Run the scenario against `cluster`.
    async fn run(&self, ctx: &CheckContext, cluster: &Cluster) -> Result<()>;
}

/// Every known scenario.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CheckKind {
    /// Balance symmetry
    Balances,
    /// Chunk repair after local removal
    ChunkRepair,
    /// Multi-chunk file retrieval
    FileRetrieval,
    /// Full mesh between nodes
    FullConnectivity,
    /// Garbage collection
    Gc,
    /// Kademlia bin saturation
    Kademlia,
    /// Local pinning
    LocalPinning,
    /// Minimum peer count
    PeerCount,
    /// Peer round trips
    Pingpong,
    /// Neighbourhood replication
    Pullsync,
    /// Push-sync to the closest node
    Pushsync,
    /// Cross-node retrieval
    Retrieval,
    /// Settlement symmetry
    Settlements,
    /// Upload, sync and download round trip
    Smoke,
    /// Single-owner chunk round trip
    Soc,
}

/// Unknown check name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown check type: {0}")]
pub struct UnknownCheck(pub String);

impl CheckKind {
    /// All scenarios in name order.
    pub const ALL: [CheckKind; 15] = [
        CheckKind::Balances,
        CheckKind::ChunkRepair,
        CheckKind::FileRetrieval,
        CheckKind::FullConnectivity,
        CheckKind::Gc,
        CheckKind::Kademlia,
        CheckKind::LocalPinning,
        CheckKind::PeerCount,
        CheckKind::Pingpong,
        CheckKind::Pullsync,
        CheckKind::Pushsync,
        CheckKind::Retrieval,
        CheckKind::Settlements,
        CheckKind::Smoke,
        CheckKind::Soc,
    ];

    /// Configuration name.
    pub fn name(self) -> &'static str {
        match self {
            CheckKind::Balances => "balances",
            CheckKind::ChunkRepair => "chunk-repair",
            CheckKind::FileRetrieval => "file-retrieval",
            CheckKind::FullConnectivity => "full-connectivity",
            CheckKind::Gc => "gc",
            CheckKind::Kademlia => "kademlia",
            CheckKind::LocalPinning => "local-pinning",
            CheckKind::PeerCount => "peer-count",
            CheckKind::Pingpong => "pingpong",
            CheckKind::Pullsync => "pullsync",
            CheckKind::Pushsync => "pushsync",
            CheckKind::Retrieval => "retrieval",
            CheckKind::Settlements => "settlements",
            CheckKind::Smoke => "smoke",
            CheckKind::Soc => "soc",
        }
    }

    /// One-line description.
    pub fn description(self) -> &'static str {
        match self {
            CheckKind::Balances => "accounting balances are symmetric and change on retrieval",
            CheckKind::ChunkRepair => "a chunk removed from its closest node is still retrievable",
            CheckKind::FileRetrieval => "uploaded files download byte-equal from other nodes",
            CheckKind::FullConnectivity => "every node is connected to every other node",
            CheckKind::Gc => "filling a store evicts unpinned chunks and keeps pinned ones",
            CheckKind::Kademlia => "bins below depth are populated, bins at depth are saturated",
            CheckKind::LocalPinning => "pinned chunks survive store filling",
            CheckKind::PeerCount => "every node has at least the minimum number of peers",
            CheckKind::Pingpong => "every node can ping every peer it reports",
            CheckKind::Pullsync => "the closest node's neighbourhood replicates uploaded chunks",
            CheckKind::Pushsync => "uploads sync to the closest node and enough replicas",
            CheckKind::Retrieval => "a chunk downloads byte-equal from a different node",
            CheckKind::Settlements => "settlements are symmetric and debts stay below threshold",
            CheckKind::Smoke => "random bytes round-trip through upload, sync and download",
            CheckKind::Soc => "a signed single-owner chunk round-trips byte-identical",
        }
    }

    /// Options with every field at its default.
    pub fn default_options(self) -> CheckOptions {
        match self {
            CheckKind::Balances => CheckOptions::Balances(Default::default()),
            CheckKind::ChunkRepair => CheckOptions::ChunkRepair(Default::default()),
            CheckKind::FileRetrieval => CheckOptions::FileRetrieval(Default::default()),
            CheckKind::FullConnectivity => CheckOptions::FullConnectivity(Default::default()),
            CheckKind::Gc => CheckOptions::Gc(Default::default()),
            CheckKind::Kademlia => CheckOptions::Kademlia(Default::default()),
            CheckKind::LocalPinning => CheckOptions::LocalPinning(Default::default()),
            CheckKind::PeerCount => CheckOptions::PeerCount(Default::default()),
            CheckKind::Pingpong => CheckOptions::Pingpong(Default::default()),
            CheckKind::Pullsync => CheckOptions::Pullsync(Default::default()),
            CheckKind::Pushsync => CheckOptions::Pushsync(Default::default()),
            CheckKind::Retrieval => CheckOptions::Retrieval(Default::default()),
            CheckKind::Settlements => CheckOptions::Settlements(Default::default()),
            CheckKind::Smoke => CheckOptions::Smoke(Default::default()),
            CheckKind::Soc => CheckOptions::Soc(Default::default()),
        }
    }

    /// Decode this scenario's options. Missing fields take their defaults.
    pub fn decode_options<'de, D>(self, deserializer: D) -> std::result::Result<CheckOptions, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(match self {
            CheckKind::Balances => CheckOptions::Balances(Deserialize::deserialize(deserializer)?),
            CheckKind::ChunkRepair => {
                CheckOptions::ChunkRepair(Deserialize::deserialize(deserializer)?)
            }
            CheckKind::FileRetrieval => {
                CheckOptions::FileRetrieval(Deserialize::deserialize(deserializer)?)
            }
            CheckKind::FullConnectivity => {
                CheckOptions::FullConnectivity(Deserialize::deserialize(deserializer)?)
            }
            CheckKind::Gc => CheckOptions::Gc(Deserialize::deserialize(deserializer)?),
            CheckKind::Kademlia => CheckOptions::Kademlia(Deserialize::deserialize(deserializer)?),
            CheckKind::LocalPinning => {
                CheckOptions::LocalPinning(Deserialize::deserialize(deserializer)?)
            }
            CheckKind::PeerCount => CheckOptions::PeerCount(Deserialize::deserialize(deserializer)?),
            CheckKind::Pingpong => CheckOptions::Pingpong(Deserialize::deserialize(deserializer)?),
            CheckKind::Pullsync => CheckOptions::Pullsync(Deserialize::deserialize(deserializer)?),
            CheckKind::Pushsync => CheckOptions::Pushsync(Deserialize::deserialize(deserializer)?),
            CheckKind::Retrieval => CheckOptions::Retrieval(Deserialize::deserialize(deserializer)?),
            CheckKind::Settlements => {
                CheckOptions::Settlements(Deserialize::deserialize(deserializer)?)
            }
            CheckKind::Smoke => CheckOptions::Smoke(Deserialize::deserialize(deserializer)?),
            CheckKind::Soc => CheckOptions::Soc(Deserialize::deserialize(deserializer)?),
        })
    }
}

impl fmt::Display for CheckKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CheckKind {
    type Err = UnknownCheck;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        CheckKind::ALL
            .into_iter()
            .find(|kind| kind.name() == s)
            .ok_or_else(|| UnknownCheck(s.to_string()))
    }
}

/// Typed options of one configured check.
#[derive(Debug, Clone, PartialEq)]
pub enum CheckOptions {
    /// `balances`
    Balances(BalancesOptions),
    /// `chunk-repair`
    ChunkRepair(ChunkRepairOptions),
    /// `file-retrieval`
    FileRetrieval(FileRetrievalOptions),
    /// `full-connectivity`
    FullConnectivity(FullConnectivityOptions),
    /// `gc`
    Gc(GcOptions),
    /// `kademlia`
    Kademlia(KademliaOptions),
    /// `local-pinning`
    LocalPinning(LocalPinningOptions),
    /// `peer-count`
    PeerCount(PeerCountOptions),
    /// `pingpong`
    Pingpong(PingpongOptions),
    /// `pullsync`
    Pullsync(PullsyncOptions),
    /// `pushsync`
    Pushsync(PushsyncOptions),
    /// `retrieval`
    Retrieval(RetrievalOptions),
    /// `settlements`
    Settlements(SettlementsOptions),
    /// `smoke`
    Smoke(SmokeOptions),
    /// `soc`
    Soc(SocOptions),
}

impl CheckOptions {
    /// Scenario these options belong to.
    pub fn kind(&self) -> CheckKind {
        match self {
            CheckOptions::Balances(_) => CheckKind::Balances,
            CheckOptions::ChunkRepair(_) => CheckKind::ChunkRepair,
            CheckOptions::FileRetrieval(_) => CheckKind::FileRetrieval,
            CheckOptions::FullConnectivity(_) => CheckKind::FullConnectivity,
            CheckOptions::Gc(_) => CheckKind::Gc,
            CheckOptions::Kademlia(_) => CheckKind::Kademlia,
            CheckOptions::LocalPinning(_) => CheckKind::LocalPinning,
            CheckOptions::PeerCount(_) => CheckKind::PeerCount,
            CheckOptions::Pingpong(_) => CheckKind::Pingpong,
            CheckOptions::Pullsync(_) => CheckKind::Pullsync,
            CheckOptions::Pushsync(_) => CheckKind::Pushsync,
            CheckOptions::Retrieval(_) => CheckKind::Retrieval,
            CheckOptions::Settlements(_) => CheckKind::Settlements,
            CheckOptions::Smoke(_) => CheckKind::Smoke,
            CheckOptions::Soc(_) => CheckKind::Soc,
        }
    }

    /// Seed set on the check itself, if the scenario takes one.
    pub fn seed(&self) -> Option<i64> {
        match self {
            CheckOptions::Balances(o) => o.seed,
            CheckOptions::ChunkRepair(o) => o.seed,
            CheckOptions::FileRetrieval(o) => o.seed,
            CheckOptions::Gc(o) => o.seed,
            CheckOptions::LocalPinning(o) => o.seed,
            CheckOptions::Pullsync(o) => o.seed,
            CheckOptions::Pushsync(o) => o.seed,
            CheckOptions::Retrieval(o) => o.seed,
            CheckOptions::Settlements(o) => o.seed,
            CheckOptions::Smoke(o) => o.seed,
            CheckOptions::Soc(o) => o.seed,
            CheckOptions::FullConnectivity(_)
            | CheckOptions::Kademlia(_)
            | CheckOptions::PeerCount(_)
            | CheckOptions::Pingpong(_) => None,
        }
    }

    /// The scenario as a runnable check.
    pub fn as_check(&self) -> &dyn Check {
        match self {
            CheckOptions::Balances(o) => o,
            CheckOptions::ChunkRepair(o) => o,
            CheckOptions::FileRetrieval(o) => o,
            CheckOptions::FullConnectivity(o) => o,
            CheckOptions::Gc(o) => o,
            CheckOptions::Kademlia(o) => o,
            CheckOptions::LocalPinning(o) => o,
            CheckOptions::PeerCount(o) => o,
            CheckOptions::Pingpong(o) => o,
            CheckOptions::Pullsync(o) => o,
            CheckOptions::Pushsync(o) => o,
            CheckOptions::Retrieval(o) => o,
            CheckOptions::Settlements(o) => o,
            CheckOptions::Smoke(o) => o,
            CheckOptions::Soc(o) => o,
        }
    }
}

#[async_trait]
impl Check for CheckOptions {
    async fn run(&self, ctx: &CheckContext, cluster: &Cluster) -> Result<()> {
        self.as_check().run(ctx, cluster).await
    }
}

pub(crate) fn default_node_group() -> String {
    DEFAULT_NODE_GROUP.to_string()
}

pub(crate) fn millis(ms: u64) -> Duration {
    Duration::from_millis(ms)
}

pub(crate) fn secs(s: u64) -> Duration {
    Duration::from_secs(s)
}

/// Fail with an environment error when `group` is too small.
pub(crate) fn require_nodes(group: &NodeGroup, min: usize, check: &str) -> Result<()> {
    if group.len() < min {
        return Err(CheckError::Environment(format!(
            "{check} needs at least {min} nodes in group {}, found {}",
            group.name(),
            group.len()
        )));
    }
    Ok(())
}

/// Members of `group` holding `address` in their local store.
///
/// Nodes are queried concurrently; the result keeps group order.
pub(crate) async fn replica_holders<'g>(
    ctx: &CheckContext,
    group: &'g NodeGroup,
    address: &Address,
) -> Result<Vec<&'g NodeIdentity>> {
    let queries = group.nodes().iter().map(|node| async move {
        let held = group
            .invoke(ctx, node, |api| api.has_chunk(address))
            .await?;
        Ok::<_, CheckError>(held.then_some(node))
    });
    let mut holders = Vec::new();
    for result in join_all(queries).await {
        if let Some(node) = result? {
            holders.push(node);
        }
    }
    Ok(holders)
}

async fn tag_synced(
    ctx: &CheckContext,
    group: &NodeGroup,
    node: &NodeIdentity,
    uid: u32,
) -> Result<()> {
    let status = group.invoke(ctx, node, |api| api.tag(uid)).await?;
    if status.is_synced() {
        return Ok(());
    }
    Err(AssertionFailure::new(
        format!("tag {uid} synced"),
        "0 chunks outstanding",
        format!("{} of {} chunks outstanding", status.outstanding(), status.split),
    )
    .into())
}

/// Poll the upload tag `uid` on `node` until every chunk has synced.
pub(crate) async fn wait_for_tag(
    ctx: &CheckContext,
    group: &NodeGroup,
    node: &NodeIdentity,
    uid: u32,
    timeout: Duration,
    poll_interval: Duration,
) -> Result<()> {
    let attempts = wait_until(ctx, timeout, poll_interval, || {
        tag_synced(ctx, group, node, uid)
    })
    .await
    .map_err(|e| e.into_check_error(&format!("tag {uid} on {} to sync", node.name)))?;
    tracing::debug!(node = %node.name, uid, attempts, "Tag synced");
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_roundtrip() {
        for kind in CheckKind::ALL {
            assert_eq!(kind.name().parse::<CheckKind>().unwrap(), kind);
            assert_eq!(kind.default_options().kind(), kind);
        }
        assert_eq!(
            "file-retrieval".parse::<CheckKind>(),
            Ok(CheckKind::FileRetrieval)
        );
        assert_eq!(
            "manifest".parse::<CheckKind>(),
            Err(UnknownCheck("manifest".into()))
        );
    }

    #[test]
    fn serde_names_match() {
        for kind in CheckKind::ALL {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.name()));
        }
    }

    #[test]
    fn decode_fills_defaults() {
        let value: toml::Value = toml::from_str("chunks-per-node = 3\nseed = 5").unwrap();
        let options = CheckKind::Pushsync.decode_options(value).unwrap();
        match &options {
            CheckOptions::Pushsync(o) => {
                assert_eq!(o.chunks_per_node, 3);
                assert_eq!(o.node_group, "bee");
                assert_eq!(o.upload_node_count, PushsyncOptions::default().upload_node_count);
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert_eq!(options.seed(), Some(5));
    }

    #[test]
    fn decode_file_retrieval_options() {
        let value: toml::Value =
            toml::from_str("file-size = 2048\nfiles-per-node = 3\nfull = true").unwrap();
        match CheckKind::FileRetrieval.decode_options(value).unwrap() {
            CheckOptions::FileRetrieval(o) => {
                assert_eq!(o.file_size, 2048);
                assert_eq!(o.files_per_node, 3);
                assert!(o.full);
                assert_eq!(o.file_name, "file-retrieval");
                assert_eq!(o.upload_node_count, 1);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn decode_rejects_unknown_fields() {
        let value: toml::Value = toml::from_str("chunks-per-nod = 3").unwrap();
        assert!(CheckKind::Pushsync.decode_options(value).is_err());
    }

    #[test]
    fn seedless_checks() {
        assert_eq!(CheckKind::PeerCount.default_options().seed(), None);
        assert_eq!(CheckKind::Smoke.default_options().seed(), None);
    }
}
