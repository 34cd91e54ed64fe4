//! In-memory cluster for testing checks without live nodes.
//!
//! Models just enough of a storage network for every check to observe real
//! behaviour: push-sync to the closest nodes, retrieval with per-chunk
//! accounting and settlement, bounded local stores with eviction of
//! unpinned chunks, upload tags that sync after a number of polls, and
//! peer connectivity. Faults can be injected per node.

use super::types::{
    Addresses, Balance, Bin, Pong, Settlement, Settlements, TagStatus, Topology, UploadOptions,
};
use super::{ClientError, NodeApi};
use crate::topology::NodeMember;
use async_trait::async_trait;
use keeper_types::{distance_cmp, join, proximity, split, Address, Chunk, SingleOwnerChunk};
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};

/// Shape and behaviour of a mock cluster.
#[derive(Debug, Clone)]
pub struct MockClusterConfig {
    /// Number of nodes
    pub nodes: usize,
    /// Seed for overlay addresses
    pub seed: u64,
    /// Nodes closest to a chunk that receive it on upload
    pub replication: usize,
    /// Chunks each local store holds before evicting unpinned ones
    pub capacity: Option<usize>,
    /// Tag polls before an upload reports as synced
    pub sync_after_polls: u32,
    /// Accounting price of one retrieved chunk
    pub price_per_chunk: i128,
    /// Debt at which a node settles with its peer
    pub payment_threshold: i128,
    /// Reported neighbourhood depth
    pub depth: u8,
}

impl Default for MockClusterConfig {
    fn default() -> Self {
        Self {
            nodes: 4,
            seed: 0,
            replication: 2,
            capacity: None,
            sync_after_polls: 1,
            price_per_chunk: 10_000,
            payment_threshold: 1_000_000,
            depth: 0,
        }
    }
}

struct Stored {
    data: Vec<u8>,
    seq: u64,
}

#[derive(Default)]
struct NodeState {
    overlay: Address,
    store: HashMap<Address, Stored>,
    pins: HashMap<Address, Vec<Address>>,
    balances: HashMap<Address, i128>,
    received: HashMap<Address, i128>,
    sent: HashMap<Address, i128>,
    corrupt_downloads: bool,
    refuse_pings: bool,
    fail_next: Option<String>,
}

impl NodeState {
    fn is_pinned_chunk(&self, address: &Address) -> bool {
        self.pins.values().any(|tree| tree.contains(address))
    }
}

struct TagState {
    status: TagStatus,
    polls: u32,
}

struct MockClusterInner {
    config: MockClusterConfig,
    nodes: Vec<NodeState>,
    tags: HashMap<u32, TagState>,
    next_tag: u32,
    seq: u64,
    disconnected: HashSet<(usize, usize)>,
}

fn pair(a: usize, b: usize) -> (usize, usize) {
    (a.min(b), a.max(b))
}

fn bad_request(e: impl std::fmt::Display) -> ClientError {
    ClientError::Status {
        status: 400,
        body: e.to_string(),
    }
}

impl MockClusterInner {
    fn take_failure(&mut self, node: usize) -> Result<(), ClientError> {
        match self.nodes[node].fail_next.take() {
            Some(error) => Err(ClientError::ConnectionFailed(error)),
            None => Ok(()),
        }
    }

    fn index_of(&self, overlay: &Address) -> Option<usize> {
        self.nodes.iter().position(|n| &n.overlay == overlay)
    }

    fn connected(&self, a: usize, b: usize) -> bool {
        a != b && !self.disconnected.contains(&pair(a, b))
    }

    fn by_distance(&self, address: &Address) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.nodes.len()).collect();
        order.sort_by(|&a, &b| {
            distance_cmp(address, &self.nodes[a].overlay, &self.nodes[b].overlay)
                .unwrap_or(Ordering::Equal)
        });
        order
    }

    fn put(&mut self, node: usize, address: Address, data: Vec<u8>) {
        self.seq += 1;
        let seq = self.seq;
        let capacity = self.config.capacity;
        let state = &mut self.nodes[node];
        state.store.insert(address, Stored { data, seq });
        let Some(capacity) = capacity else {
            return;
        };
        while state.store.len() > capacity {
            let victim = state
                .store
                .iter()
                .filter(|(addr, _)| !state.is_pinned_chunk(addr))
                .min_by_key(|(_, stored)| stored.seq)
                .map(|(addr, _)| addr.clone());
            match victim {
                Some(addr) => {
                    state.store.remove(&addr);
                }
                None => break,
            }
        }
    }

    fn push_sync(&mut self, address: &Address, data: &[u8]) {
        let targets: Vec<usize> = self
            .by_distance(address)
            .into_iter()
            .take(self.config.replication)
            .collect();
        for target in targets {
            self.put(target, address.clone(), data.to_vec());
        }
    }

    fn record_upload(&mut self, tag: Option<u32>, chunks: u64) -> Result<(), ClientError> {
        let Some(uid) = tag else {
            return Ok(());
        };
        let state = self
            .tags
            .get_mut(&uid)
            .ok_or_else(|| ClientError::NotFound(format!("tag {uid}")))?;
        state.status.total += chunks;
        state.status.split += chunks;
        state.status.stored += chunks;
        state.status.sent += chunks;
        state.polls = 0;
        Ok(())
    }

    fn charge(&mut self, debtor: usize, creditor: usize) {
        let price = self.config.price_per_chunk;
        let creditor_overlay = self.nodes[creditor].overlay.clone();
        let debtor_overlay = self.nodes[debtor].overlay.clone();
        *self.nodes[debtor]
            .balances
            .entry(creditor_overlay.clone())
            .or_default() -= price;
        *self.nodes[creditor]
            .balances
            .entry(debtor_overlay.clone())
            .or_default() += price;

        let debt = -self.nodes[debtor].balances[&creditor_overlay];
        if debt > self.config.payment_threshold {
            *self.nodes[debtor]
                .sent
                .entry(creditor_overlay.clone())
                .or_default() += debt;
            *self.nodes[creditor]
                .received
                .entry(debtor_overlay.clone())
                .or_default() += debt;
            self.nodes[debtor].balances.insert(creditor_overlay, 0);
            self.nodes[creditor].balances.insert(debtor_overlay, 0);
        }
    }

    fn retrieve(&mut self, node: usize, address: &Address) -> Result<Vec<u8>, ClientError> {
        if let Some(stored) = self.nodes[node].store.get(address) {
            return Ok(stored.data.clone());
        }
        let holder = self
            .by_distance(address)
            .into_iter()
            .find(|&i| i != node && self.nodes[i].store.contains_key(address))
            .ok_or_else(|| ClientError::NotFound(address.to_string()))?;
        let data = self.nodes[holder].store[address].data.clone();
        self.charge(node, holder);
        self.put(node, address.clone(), data.clone());
        Ok(data)
    }

    // Walks the tree under `reference`, retrieving missing chunks.
    fn tree(&mut self, node: usize, reference: &Address) -> Result<(Vec<u8>, Vec<Address>), ClientError> {
        let mut visited = Vec::new();
        let mut missing = None;
        let data = join(reference, |address| {
            match self.retrieve(node, address) {
                Ok(data) => {
                    visited.push(address.clone());
                    Chunk::from_data(&data).ok()
                }
                Err(e) => {
                    missing = Some(e);
                    None
                }
            }
        });
        match (data, missing) {
            (Ok(data), _) => Ok((data, visited)),
            (Err(_), Some(e)) => Err(e),
            (Err(e), None) => Err(ClientError::InvalidResponse(e.to_string())),
        }
    }

    fn corrupt(&self, node: usize, mut data: Vec<u8>) -> Vec<u8> {
        if self.nodes[node].corrupt_downloads {
            if let Some(last) = data.last_mut() {
                *last ^= 0xff;
            }
        }
        data
    }
}

/// An in-memory cluster of mock nodes.
pub struct MockCluster {
    inner: Arc<Mutex<MockClusterInner>>,
}

impl MockCluster {
    /// Create a cluster with overlays derived from `config.seed`.
    pub fn new(config: MockClusterConfig) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
        let nodes = (0..config.nodes)
            .map(|_| {
                let mut overlay = [0u8; 32];
                rng.fill_bytes(&mut overlay);
                NodeState {
                    overlay: Address::from(overlay),
                    ..Default::default()
                }
            })
            .collect();
        Self {
            inner: Arc::new(Mutex::new(MockClusterInner {
                config,
                nodes,
                tags: HashMap::new(),
                next_tag: 1,
                seq: 0,
                disconnected: HashSet::new(),
            })),
        }
    }

    /// Create a cluster of `nodes` nodes with default behaviour.
    pub fn with_nodes(nodes: usize) -> Self {
        Self::new(MockClusterConfig {
            nodes,
            ..Default::default()
        })
    }

    /// Handle for node `index`.
    pub fn node(&self, index: usize) -> MockNode {
        MockNode {
            cluster: self.clone(),
            index,
        }
    }

    /// Group members named `bee-<index>`.
    pub fn members(&self) -> Vec<NodeMember> {
        let count = self.inner.lock().unwrap().nodes.len();
        (0..count)
            .map(|i| NodeMember::new(format!("bee-{i}"), Arc::new(self.node(i))))
            .collect()
    }

    /// Overlay of node `index`.
    pub fn overlay(&self, index: usize) -> Address {
        self.inner.lock().unwrap().nodes[index].overlay.clone()
    }

    /// Indices of nodes holding `address` locally.
    pub fn holders(&self, address: &Address) -> Vec<usize> {
        let inner = self.inner.lock().unwrap();
        (0..inner.nodes.len())
            .filter(|&i| inner.nodes[i].store.contains_key(address))
            .collect()
    }

    /// Cause the next operation on node `index` to fail.
    pub fn fail_next(&self, index: usize, error: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.nodes[index].fail_next = Some(error.to_string());
    }

    /// Flip the last byte of everything node `index` downloads.
    pub fn corrupt_downloads(&self, index: usize, corrupt: bool) {
        let mut inner = self.inner.lock().unwrap();
        inner.nodes[index].corrupt_downloads = corrupt;
    }

    /// Make node `index` ignore pings from its peers.
    pub fn refuse_pings(&self, index: usize, refuse: bool) {
        let mut inner = self.inner.lock().unwrap();
        inner.nodes[index].refuse_pings = refuse;
    }

    /// Drop the connection between two nodes.
    pub fn disconnect(&self, a: usize, b: usize) {
        let mut inner = self.inner.lock().unwrap();
        inner.disconnected.insert(pair(a, b));
    }

    /// Change how many closest nodes receive pushed chunks.
    pub fn set_replication(&self, replication: usize) {
        let mut inner = self.inner.lock().unwrap();
        inner.config.replication = replication;
    }

    /// Change the number of tag polls before an upload syncs.
    pub fn set_sync_after_polls(&self, polls: u32) {
        let mut inner = self.inner.lock().unwrap();
        inner.config.sync_after_polls = polls;
    }

    /// Shift node `index`'s view of its balance with `peer` only.
    pub fn skew_balance(&self, index: usize, peer: usize, delta: i128) {
        let mut inner = self.inner.lock().unwrap();
        let overlay = inner.nodes[peer].overlay.clone();
        *inner.nodes[index].balances.entry(overlay).or_default() += delta;
    }
}

impl Clone for MockCluster {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// One node of a [`MockCluster`].
#[derive(Clone)]
pub struct MockNode {
    cluster: MockCluster,
    index: usize,
}

impl MockNode {
    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MockClusterInner>, ClientError> {
        let mut inner = self.cluster.inner.lock().unwrap();
        inner.take_failure(self.index)?;
        Ok(inner)
    }
}

#[async_trait]
impl NodeApi for MockNode {
    async fn addresses(&self) -> Result<Addresses, ClientError> {
        let inner = self.lock()?;
        Ok(Addresses {
            overlay: inner.nodes[self.index].overlay.clone(),
            underlay: Vec::new(),
            ethereum: None,
        })
    }

    async fn upload_chunk(
        &self,
        chunk: &Chunk,
        options: &UploadOptions,
    ) -> Result<Address, ClientError> {
        let mut inner = self.lock()?;
        let address = chunk.address().clone();
        let data = chunk.data();
        inner.record_upload(options.tag, 1)?;
        inner.put(self.index, address.clone(), data.clone());
        if options.pin {
            inner.nodes[self.index]
                .pins
                .insert(address.clone(), vec![address.clone()]);
        }
        inner.push_sync(&address, &data);
        Ok(address)
    }

    async fn download_chunk(&self, address: &Address) -> Result<Vec<u8>, ClientError> {
        let mut inner = self.lock()?;
        let data = inner.retrieve(self.index, address)?;
        Ok(inner.corrupt(self.index, data))
    }

    async fn upload_bytes(
        &self,
        data: &[u8],
        options: &UploadOptions,
    ) -> Result<Address, ClientError> {
        let (root, chunks) = split(data).map_err(bad_request)?;
        let mut inner = self.lock()?;
        inner.record_upload(options.tag, chunks.len() as u64)?;
        let addresses: Vec<Address> = chunks.iter().map(|c| c.address().clone()).collect();
        if options.pin {
            inner.nodes[self.index]
                .pins
                .insert(root.clone(), addresses);
        }
        for chunk in chunks {
            let data = chunk.data();
            inner.put(self.index, chunk.address().clone(), data.clone());
            inner.push_sync(chunk.address(), &data);
        }
        Ok(root)
    }

    async fn download_bytes(&self, reference: &Address) -> Result<Vec<u8>, ClientError> {
        let mut inner = self.lock()?;
        let (data, _) = inner.tree(self.index, reference)?;
        Ok(inner.corrupt(self.index, data))
    }

    async fn upload_soc(
        &self,
        soc: &SingleOwnerChunk,
        options: &UploadOptions,
    ) -> Result<Address, ClientError> {
        soc.verify().map_err(bad_request)?;
        let mut inner = self.lock()?;
        let address = soc.address();
        let data = soc.data();
        inner.record_upload(options.tag, 1)?;
        inner.put(self.index, address.clone(), data.clone());
        inner.push_sync(&address, &data);
        Ok(address)
    }

    async fn has_chunk(&self, address: &Address) -> Result<bool, ClientError> {
        let inner = self.lock()?;
        Ok(inner.nodes[self.index].store.contains_key(address))
    }

    async fn remove_chunk(&self, address: &Address) -> Result<(), ClientError> {
        let mut inner = self.lock()?;
        inner.nodes[self.index]
            .store
            .remove(address)
            .map(|_| ())
            .ok_or_else(|| ClientError::NotFound(address.to_string()))
    }

    async fn create_tag(&self) -> Result<TagStatus, ClientError> {
        let mut inner = self.lock()?;
        let uid = inner.next_tag;
        inner.next_tag += 1;
        let status = TagStatus {
            uid,
            ..Default::default()
        };
        inner.tags.insert(
            uid,
            TagState {
                status: status.clone(),
                polls: 0,
            },
        );
        Ok(status)
    }

    async fn tag(&self, uid: u32) -> Result<TagStatus, ClientError> {
        let mut inner = self.lock()?;
        let sync_after = inner.config.sync_after_polls;
        let state = inner
            .tags
            .get_mut(&uid)
            .ok_or_else(|| ClientError::NotFound(format!("tag {uid}")))?;
        state.polls = state.polls.saturating_add(1);
        if state.polls >= sync_after {
            state.status.synced = state.status.split.saturating_sub(state.status.seen);
        }
        Ok(state.status.clone())
    }

    async fn pin(&self, reference: &Address) -> Result<(), ClientError> {
        let mut inner = self.lock()?;
        let (_, tree) = inner.tree(self.index, reference)?;
        inner.nodes[self.index].pins.insert(reference.clone(), tree);
        Ok(())
    }

    async fn unpin(&self, reference: &Address) -> Result<(), ClientError> {
        let mut inner = self.lock()?;
        inner.nodes[self.index]
            .pins
            .remove(reference)
            .map(|_| ())
            .ok_or_else(|| ClientError::NotFound(reference.to_string()))
    }

    async fn is_pinned(&self, reference: &Address) -> Result<bool, ClientError> {
        let inner = self.lock()?;
        Ok(inner.nodes[self.index].pins.contains_key(reference))
    }

    async fn balances(&self) -> Result<Vec<Balance>, ClientError> {
        let inner = self.lock()?;
        let own = &inner.nodes[self.index];
        Ok(inner
            .nodes
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != self.index)
            .map(|(_, peer)| Balance {
                peer: peer.overlay.clone(),
                balance: own.balances.get(&peer.overlay).copied().unwrap_or(0),
            })
            .collect())
    }

    async fn settlements(&self) -> Result<Settlements, ClientError> {
        let inner = self.lock()?;
        let own = &inner.nodes[self.index];
        let peers: HashSet<&Address> = own.received.keys().chain(own.sent.keys()).collect();
        let mut settlements: Vec<Settlement> = peers
            .into_iter()
            .map(|peer| Settlement {
                peer: peer.clone(),
                received: own.received.get(peer).copied().unwrap_or(0),
                sent: own.sent.get(peer).copied().unwrap_or(0),
            })
            .collect();
        settlements.sort_by(|a, b| a.peer.cmp(&b.peer));
        Ok(Settlements {
            total_received: own.received.values().sum(),
            total_sent: own.sent.values().sum(),
            settlements,
        })
    }

    async fn peers(&self) -> Result<Vec<Address>, ClientError> {
        let inner = self.lock()?;
        Ok((0..inner.nodes.len())
            .filter(|&i| inner.connected(self.index, i))
            .map(|i| inner.nodes[i].overlay.clone())
            .collect())
    }

    async fn topology(&self) -> Result<Topology, ClientError> {
        let inner = self.lock()?;
        let base = inner.nodes[self.index].overlay.clone();
        let mut bins: BTreeMap<String, Bin> = BTreeMap::new();
        let mut population = 0;
        let mut connected = 0;
        for (i, peer) in inner.nodes.iter().enumerate() {
            if i == self.index {
                continue;
            }
            let po = proximity(&base, &peer.overlay).map_err(bad_request)?;
            let bin = bins.entry(format!("bin_{po}")).or_default();
            bin.population += 1;
            population += 1;
            if inner.connected(self.index, i) {
                bin.connected += 1;
                bin.connected_peers.push(peer.overlay.clone());
                connected += 1;
            } else {
                bin.disconnected_peers.push(peer.overlay.clone());
            }
        }
        Ok(Topology {
            base_addr: base,
            population,
            connected,
            depth: inner.config.depth,
            bins,
        })
    }

    async fn ping(&self, peer: &Address) -> Result<Pong, ClientError> {
        let inner = self.lock()?;
        match inner.index_of(peer) {
            Some(i) if inner.connected(self.index, i) && !inner.nodes[i].refuse_pings => Ok(Pong {
                rtt: "1.5ms".into(),
            }),
            Some(_) => Err(ClientError::Timeout),
            None => Err(ClientError::NotFound(format!("peer {peer}"))),
        }
    }
}
