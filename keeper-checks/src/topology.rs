//! Node groups under test.
//!
//! A [`NodeGroup`] is the read-only view a check works with: every member's
//! name and overlay, ordered by overlay ascending, plus the [`NodeApi`]
//! handle used to reach it. Groups are resolved once per run and shared
//! through a [`Cluster`].

use crate::client::{ClientError, HttpNodeClient, MockCluster, NodeApi, NodeEndpoint};
use crate::context::CheckContext;
use crate::error::{CheckError, Result};
use futures_util::future::join_all;
use keeper_types::{closest_index, Address, AddressError};
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Node group name used when none is configured.
pub const DEFAULT_NODE_GROUP: &str = "bee";

/// Errors from topology providers.
#[derive(Debug, Error)]
pub enum TopologyError {
    /// No group with this name
    #[error("unknown node group: {0}")]
    UnknownGroup(String),

    /// Client for a node could not be built
    #[error("node {node}: {source}")]
    Client {
        /// Node name
        node: String,
        /// Underlying client error
        #[source]
        source: ClientError,
    },
}

/// A node as handed over by a topology provider, before resolution.
#[derive(Clone)]
pub struct NodeMember {
    name: String,
    api: Arc<dyn NodeApi>,
}

impl NodeMember {
    /// Member `name` reached through `api`.
    pub fn new(name: impl Into<String>, api: Arc<dyn NodeApi>) -> Self {
        Self {
            name: name.into(),
            api,
        }
    }

    /// Node name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for NodeMember {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeMember").field("name", &self.name).finish()
    }
}

/// Name and overlay of a resolved node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeIdentity {
    /// Node name
    pub name: String,
    /// Overlay address reported by the node
    pub overlay: Address,
}

/// Resolved, overlay-ordered group of nodes.
pub struct NodeGroup {
    name: String,
    nodes: Vec<NodeIdentity>,
    clients: HashMap<String, Arc<dyn NodeApi>>,
}

impl NodeGroup {
    /// Ask every member for its overlay and order the group by it.
    ///
    /// Fails on an empty group, duplicate names, or a member that does not
    /// answer.
    pub async fn resolve(ctx: &CheckContext, name: &str, members: Vec<NodeMember>) -> Result<Self> {
        if members.is_empty() {
            return Err(CheckError::Environment(format!("node group {name} is empty")));
        }

        let lookups = members.iter().map(|member| async move {
            let addresses = ctx.bound(member.api.addresses()).await?;
            addresses.map_err(|e| {
                CheckError::Environment(format!("node {} unreachable: {e}", member.name))
            })
        });
        let results = join_all(lookups).await;

        let mut nodes = Vec::with_capacity(members.len());
        let mut clients = HashMap::with_capacity(members.len());
        for (member, result) in members.into_iter().zip(results) {
            let addresses = result?;
            if clients.contains_key(&member.name) {
                return Err(CheckError::Environment(format!(
                    "duplicate node {} in group {name}",
                    member.name
                )));
            }
            nodes.push(NodeIdentity {
                name: member.name.clone(),
                overlay: addresses.overlay,
            });
            clients.insert(member.name, member.api);
        }
        nodes.sort_by(|a, b| a.overlay.cmp(&b.overlay));

        tracing::info!(group = name, nodes = nodes.len(), "Resolved node group");
        Ok(Self {
            name: name.to_string(),
            nodes,
            clients,
        })
    }

    /// Group name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Members ordered by overlay ascending.
    pub fn nodes(&self) -> &[NodeIdentity] {
        &self.nodes
    }

    /// Overlays in group order.
    pub fn overlays(&self) -> Vec<Address> {
        self.nodes.iter().map(|n| n.overlay.clone()).collect()
    }

    /// Number of members.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the group has no members.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Member by name.
    pub fn node(&self, name: &str) -> Option<&NodeIdentity> {
        self.nodes.iter().find(|n| n.name == name)
    }

    /// Member by overlay.
    pub fn by_overlay(&self, overlay: &Address) -> Option<&NodeIdentity> {
        self.nodes.iter().find(|n| &n.overlay == overlay)
    }

    /// Member whose overlay is closest to `address`.
    pub fn closest_to(&self, address: &Address) -> std::result::Result<&NodeIdentity, AddressError> {
        let index = closest_index(address, self.nodes.iter().map(|n| &n.overlay))?;
        Ok(&self.nodes[index])
    }

    /// Run one operation against `node`, bounded by the check's deadline.
    pub async fn invoke<'a, T, F, Fut>(
        &'a self,
        ctx: &CheckContext,
        node: &NodeIdentity,
        op: F,
    ) -> Result<T>
    where
        F: FnOnce(&'a dyn NodeApi) -> Fut,
        Fut: Future<Output = std::result::Result<T, ClientError>>,
    {
        let api = self.clients.get(&node.name).ok_or_else(|| {
            CheckError::Environment(format!("node {} not in group {}", node.name, self.name))
        })?;
        ctx.bound(op(api.as_ref()))
            .await?
            .map_err(|e| CheckError::client(&node.name, e))
    }
}

impl std::fmt::Debug for NodeGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeGroup")
            .field("name", &self.name)
            .field("nodes", &self.nodes)
            .finish()
    }
}

/// Source of node group members.
pub trait TopologyProvider: Send + Sync {
    /// Names of all groups this provider knows.
    fn group_names(&self) -> Vec<String>;

    /// Members of `group`.
    fn members(&self, group: &str) -> std::result::Result<Vec<NodeMember>, TopologyError>;
}

/// Node groups listed in configuration, reached over HTTP.
#[derive(Debug, Clone)]
pub struct StaticTopology {
    groups: BTreeMap<String, Vec<NodeEndpoint>>,
    request_timeout: Duration,
}

impl StaticTopology {
    /// Provider for `groups` with a per-request timeout.
    pub fn new(groups: BTreeMap<String, Vec<NodeEndpoint>>, request_timeout: Duration) -> Self {
        Self {
            groups,
            request_timeout,
        }
    }
}

impl TopologyProvider for StaticTopology {
    fn group_names(&self) -> Vec<String> {
        self.groups.keys().cloned().collect()
    }

    fn members(&self, group: &str) -> std::result::Result<Vec<NodeMember>, TopologyError> {
        let endpoints = self
            .groups
            .get(group)
            .ok_or_else(|| TopologyError::UnknownGroup(group.to_string()))?;
        endpoints
            .iter()
            .map(|endpoint| {
                let client = HttpNodeClient::new(endpoint.clone(), self.request_timeout).map_err(
                    |source| TopologyError::Client {
                        node: endpoint.name.clone(),
                        source,
                    },
                )?;
                Ok(NodeMember::new(endpoint.name.clone(), Arc::new(client)))
            })
            .collect()
    }
}

impl TopologyProvider for MockCluster {
    fn group_names(&self) -> Vec<String> {
        vec![DEFAULT_NODE_GROUP.to_string()]
    }

    fn members(&self, group: &str) -> std::result::Result<Vec<NodeMember>, TopologyError> {
        if group == DEFAULT_NODE_GROUP {
            Ok(MockCluster::members(self))
        } else {
            Err(TopologyError::UnknownGroup(group.to_string()))
        }
    }
}

/// Resolved node groups shared by all checks of a run.
///
/// A group that fails to resolve is remembered with its reason; checks
/// asking for it fail with an environment error while checks on healthy
/// groups run normally.
#[derive(Debug, Default)]
pub struct Cluster {
    groups: BTreeMap<String, Arc<NodeGroup>>,
    unavailable: BTreeMap<String, String>,
}

impl Cluster {
    /// Cluster without groups.
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve every group the provider knows.
    pub async fn resolve(ctx: &CheckContext, provider: &dyn TopologyProvider) -> Self {
        let mut cluster = Self::new();
        for name in provider.group_names() {
            let resolved = match provider.members(&name) {
                Ok(members) => NodeGroup::resolve(ctx, &name, members).await,
                Err(e) => Err(CheckError::Environment(e.to_string())),
            };
            match resolved {
                Ok(group) => cluster.insert(group),
                Err(e) => {
                    tracing::warn!(group = %name, error = %e, "Node group unavailable");
                    cluster.mark_unavailable(&name, e.to_string());
                }
            }
        }
        cluster
    }

    /// Add or replace a group.
    pub fn insert(&mut self, group: NodeGroup) {
        self.unavailable.remove(&group.name);
        self.groups.insert(group.name.clone(), Arc::new(group));
    }

    /// Record that `name` could not be resolved.
    pub fn mark_unavailable(&mut self, name: &str, reason: impl Into<String>) {
        self.groups.remove(name);
        self.unavailable.insert(name.to_string(), reason.into());
    }

    /// Group by name.
    pub fn node_group(&self, name: &str) -> Result<Arc<NodeGroup>> {
        if let Some(group) = self.groups.get(name) {
            return Ok(group.clone());
        }
        Err(CheckError::Environment(match self.unavailable.get(name) {
            Some(reason) => format!("node group {name} unavailable: {reason}"),
            None => format!("unknown node group: {name}"),
        }))
    }

    /// Names of resolved groups.
    pub fn group_names(&self) -> Vec<&str> {
        self.groups.keys().map(String::as_str).collect()
    }

    /// Groups that failed to resolve, with the reason.
    pub fn unavailable(&self) -> impl Iterator<Item = (&str, &str)> {
        self.unavailable
            .iter()
            .map(|(name, reason)| (name.as_str(), reason.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checks::test_support::TwoGroups;
    use crate::client::UploadOptions;
    use keeper_types::{distance_cmp, Chunk};
    use std::cmp::Ordering;

    async fn group(cluster: &MockCluster) -> NodeGroup {
        let ctx = CheckContext::new("topology", 0);
        NodeGroup::resolve(&ctx, DEFAULT_NODE_GROUP, cluster.members())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn resolve_orders_by_overlay() {
        let cluster = MockCluster::with_nodes(5);
        let group = group(&cluster).await;
        assert_eq!(group.len(), 5);
        let overlays = group.overlays();
        let mut sorted = overlays.clone();
        sorted.sort();
        assert_eq!(overlays, sorted);
        let bee2 = group.node("bee-2").unwrap();
        assert_eq!(bee2.overlay, cluster.overlay(2));
        assert_eq!(group.by_overlay(&cluster.overlay(2)), Some(bee2));
    }

    #[tokio::test]
    async fn nodes_is_restartable() {
        let cluster = MockCluster::with_nodes(3);
        let group = group(&cluster).await;
        let first: Vec<_> = group.nodes().iter().map(|n| n.name.clone()).collect();
        let second: Vec<_> = group.nodes().iter().map(|n| n.name.clone()).collect();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn empty_group_is_environment_error() {
        let ctx = CheckContext::new("topology", 0);
        let err = NodeGroup::resolve(&ctx, "empty", Vec::new()).await.unwrap_err();
        assert!(matches!(err, CheckError::Environment(_)));
    }

    #[tokio::test]
    async fn unreachable_member_fails_resolution() {
        let cluster = MockCluster::with_nodes(3);
        cluster.fail_next(1, "connection refused");
        let ctx = CheckContext::new("topology", 0);
        let err = NodeGroup::resolve(&ctx, "bee", cluster.members())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("bee-1"));
    }

    #[tokio::test]
    async fn closest_to_matches_distance() {
        let cluster = MockCluster::with_nodes(6);
        let group = group(&cluster).await;
        let target = Address::from([0x5au8; 32]);
        let closest = group.closest_to(&target).unwrap();
        for node in group.nodes() {
            assert_ne!(
                distance_cmp(&target, &node.overlay, &closest.overlay).unwrap(),
                Ordering::Less
            );
        }
    }

    #[tokio::test]
    async fn invoke_maps_client_errors_to_node() {
        let cluster = MockCluster::with_nodes(2);
        let group = group(&cluster).await;
        let ctx = CheckContext::new("topology", 0);
        let node = group.node("bee-0").unwrap().clone();
        let chunk = Chunk::new(b"hello".to_vec()).unwrap();
        let options = UploadOptions::default();

        let address = group
            .invoke(&ctx, &node, |api| api.upload_chunk(&chunk, &options))
            .await
            .unwrap();
        assert_eq!(&address, chunk.address());

        cluster.fail_next(0, "reset");
        let err = group
            .invoke(&ctx, &node, |api| api.has_chunk(&address))
            .await
            .unwrap_err();
        match err {
            CheckError::Client { node, source } => {
                assert_eq!(node, "bee-0");
                assert_eq!(source, ClientError::ConnectionFailed("reset".into()));
            }
            other => panic!("unexpected: {other}"),
        }
    }

    #[tokio::test]
    async fn invoke_honours_cancellation() {
        let cluster = MockCluster::with_nodes(2);
        let group = group(&cluster).await;
        let ctx = CheckContext::new("topology", 0);
        ctx.cancellation().cancel();
        let node = group.nodes()[0].clone();
        let err = group
            .invoke(&ctx, &node, |api| api.peers())
            .await
            .unwrap_err();
        assert!(matches!(err, CheckError::Cancelled));
    }

    #[tokio::test]
    async fn cluster_resolves_provider_groups() {
        let mock = MockCluster::with_nodes(3);
        let ctx = CheckContext::new("topology", 0);
        let cluster = Cluster::resolve(&ctx, &mock).await;
        assert_eq!(cluster.group_names(), vec![DEFAULT_NODE_GROUP]);
        assert_eq!(cluster.unavailable().count(), 0);
        assert_eq!(cluster.node_group("bee").unwrap().len(), 3);
        assert!(matches!(
            cluster.node_group("light"),
            Err(CheckError::Environment(_))
        ));
    }

    #[tokio::test]
    async fn unreachable_group_is_recorded_not_fatal() {
        let topology = TwoGroups::new();
        topology.light.fail_next(0, "connection refused");
        let ctx = CheckContext::new("topology", 0);
        let cluster = Cluster::resolve(&ctx, &topology).await;

        assert_eq!(cluster.group_names(), vec!["bee"]);
        assert_eq!(cluster.node_group("bee").unwrap().len(), 3);
        let err = cluster.node_group("light").unwrap_err();
        assert!(matches!(err, CheckError::Environment(_)));
        assert!(err.to_string().contains("light unavailable"));
        assert!(err.to_string().contains("connection refused"));
        let unavailable: Vec<&str> = cluster.unavailable().map(|(name, _)| name).collect();
        assert_eq!(unavailable, vec!["light"]);
    }

    #[test]
    fn static_topology_builds_http_members() {
        let mut groups = BTreeMap::new();
        groups.insert(
            "bee".to_string(),
            vec![
                NodeEndpoint::local("bee-0", "127.0.0.1"),
                NodeEndpoint::local("bee-1", "127.0.0.2"),
            ],
        );
        let topology = StaticTopology::new(groups, Duration::from_secs(5));
        assert_eq!(topology.group_names(), vec!["bee".to_string()]);
        let members = topology.members("bee").unwrap();
        assert_eq!(members.len(), 2);
        assert_eq!(members[1].name(), "bee-1");
        assert!(matches!(
            topology.members("light"),
            Err(TopologyError::UnknownGroup(_))
        ));
    }
}
