//! Values reported by nodes.

use keeper_types::Address;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

/// Options attached to an upload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadOptions {
    /// Tag tracking the upload
    pub tag: Option<u32>,
    /// Pin the content on the uploading node
    pub pin: bool,
    /// Postage batch paying for the upload
    pub batch_id: Option<String>,
}

impl UploadOptions {
    /// Track the upload with `tag`.
    pub fn with_tag(mut self, tag: u32) -> Self {
        self.tag = Some(tag);
        self
    }

    /// Pin the uploaded content.
    pub fn pinned(mut self) -> Self {
        self.pin = true;
        self
    }
}

/// Node addresses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Addresses {
    /// Overlay address (position in the address space)
    pub overlay: Address,
    /// Underlay multiaddresses
    #[serde(default)]
    pub underlay: Vec<String>,
    /// Ethereum address of the node
    #[serde(default)]
    pub ethereum: Option<String>,
}

/// Progress of an upload tag.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TagStatus {
    /// Tag identifier
    pub uid: u32,
    /// Total chunks expected
    pub total: u64,
    /// Chunks produced by splitting
    pub split: u64,
    /// Chunks already present locally
    pub seen: u64,
    /// Chunks stored locally
    pub stored: u64,
    /// Chunks sent to the network
    pub sent: u64,
    /// Chunks acknowledged as synced
    pub synced: u64,
}

impl TagStatus {
    /// Chunks still waiting to be synced.
    pub fn outstanding(&self) -> u64 {
        self.split.saturating_sub(self.seen + self.synced)
    }

    /// Whether every split chunk is seen or synced.
    pub fn is_synced(&self) -> bool {
        self.split > 0 && self.outstanding() == 0
    }
}

/// Accounting balance with one peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    /// Peer overlay
    pub peer: Address,
    /// Positive when the peer owes this node
    #[serde(deserialize_with = "amount")]
    pub balance: i128,
}

/// Settled amounts with one peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settlement {
    /// Peer overlay
    pub peer: Address,
    /// Amount received from the peer
    #[serde(deserialize_with = "amount")]
    pub received: i128,
    /// Amount sent to the peer
    #[serde(deserialize_with = "amount")]
    pub sent: i128,
}

/// All settlements of a node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settlements {
    /// Sum of received amounts
    #[serde(default, deserialize_with = "amount")]
    pub total_received: i128,
    /// Sum of sent amounts
    #[serde(default, deserialize_with = "amount")]
    pub total_sent: i128,
    /// Per-peer settlements
    #[serde(default)]
    pub settlements: Vec<Settlement>,
}

impl Settlements {
    /// Settlement with `peer`, if any.
    pub fn with_peer(&self, peer: &Address) -> Option<&Settlement> {
        self.settlements.iter().find(|s| &s.peer == peer)
    }
}

/// One proximity bin of a Kademlia table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Bin {
    /// Known peers in the bin
    pub population: u64,
    /// Connected peers in the bin
    pub connected: u64,
    /// Overlays of connected peers
    #[serde(deserialize_with = "peer_list")]
    pub connected_peers: Vec<Address>,
    /// Overlays of known but disconnected peers
    #[serde(deserialize_with = "peer_list")]
    pub disconnected_peers: Vec<Address>,
}

/// Kademlia view of a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Topology {
    /// Overlay of the reporting node
    pub base_addr: Address,
    /// Known peers
    #[serde(default)]
    pub population: u64,
    /// Connected peers
    #[serde(default)]
    pub connected: u64,
    /// Neighbourhood depth
    #[serde(default)]
    pub depth: u8,
    /// Bins keyed `bin_<po>`
    #[serde(default)]
    pub bins: BTreeMap<String, Bin>,
}

impl Topology {
    /// Bin for proximity order `po`.
    pub fn bin(&self, po: u8) -> Option<&Bin> {
        self.bins.get(&format!("bin_{po}"))
    }

    /// Bins in proximity order.
    pub fn ordered_bins(&self) -> Vec<(u8, &Bin)> {
        let mut bins: Vec<(u8, &Bin)> = self
            .bins
            .iter()
            .filter_map(|(key, bin)| {
                key.strip_prefix("bin_")
                    .and_then(|po| po.parse().ok())
                    .map(|po| (po, bin))
            })
            .collect();
        bins.sort_by_key(|(po, _)| *po);
        bins
    }
}

/// Result of a ping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pong {
    /// Round-trip time as reported by the node, e.g. `1.2ms`
    pub rtt: String,
}

// Amounts arrive as JSON numbers from older nodes and as decimal strings
// from newer ones.
fn amount<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i128, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Int(i64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Int(v) => Ok(i128::from(v)),
        Raw::Text(s) => s.parse().map_err(serde::de::Error::custom),
    }
}

fn peer_list<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<Address>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Entry {
        Plain(Address),
        Detailed { address: Address },
    }

    let entries: Option<Vec<Entry>> = Option::deserialize(deserializer)?;
    Ok(entries
        .unwrap_or_default()
        .into_iter()
        .map(|entry| match entry {
            Entry::Plain(address) | Entry::Detailed { address } => address,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_outstanding_saturates() {
        let tag = TagStatus {
            split: 4,
            seen: 3,
            synced: 3,
            ..Default::default()
        };
        assert_eq!(tag.outstanding(), 0);
        assert!(tag.is_synced());
    }

    #[test]
    fn tag_not_synced_before_split() {
        let tag = TagStatus::default();
        assert!(!tag.is_synced());
        let pending = TagStatus {
            split: 10,
            synced: 9,
            ..Default::default()
        };
        assert_eq!(pending.outstanding(), 1);
        assert!(!pending.is_synced());
    }

    #[test]
    fn balances_accept_numbers_and_strings() {
        let json = r#"[{"peer":"aa","balance":-12},{"peer":"bb","balance":"340282366920938463463"}]"#;
        let balances: Vec<Balance> = serde_json::from_str(json).unwrap();
        assert_eq!(balances[0].balance, -12);
        assert_eq!(balances[1].balance, 340_282_366_920_938_463_463);
    }

    #[test]
    fn topology_parses_both_peer_shapes() {
        let json = r#"{
            "baseAddr": "00ff",
            "population": 3,
            "connected": 2,
            "depth": 1,
            "bins": {
                "bin_0": {"population": 2, "connected": 1, "connectedPeers": ["80aa"], "disconnectedPeers": null},
                "bin_1": {"population": 1, "connected": 1, "connectedPeers": [{"address": "40bb"}]}
            }
        }"#;
        let topology: Topology = serde_json::from_str(json).unwrap();
        assert_eq!(topology.depth, 1);
        assert_eq!(
            topology.bin(0).unwrap().connected_peers,
            vec!["80aa".parse::<Address>().unwrap()]
        );
        assert_eq!(
            topology.bin(1).unwrap().connected_peers,
            vec!["40bb".parse::<Address>().unwrap()]
        );
        assert!(topology.bin(0).unwrap().disconnected_peers.is_empty());
        let order: Vec<u8> = topology.ordered_bins().iter().map(|(po, _)| *po).collect();
        assert_eq!(order, vec![0, 1]);
    }

    #[test]
    fn settlements_lookup_by_peer() {
        let json = r#"{"totalReceived":"5","totalSent":0,"settlements":[{"peer":"01","received":5,"sent":"0"}]}"#;
        let settlements: Settlements = serde_json::from_str(json).unwrap();
        assert_eq!(settlements.total_received, 5);
        let peer: Address = "01".parse().unwrap();
        assert_eq!(settlements.with_peer(&peer).unwrap().received, 5);
    }
}
