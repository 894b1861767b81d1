//! # Topology Builder
//!
//! Rebuilds the graph view from the stored records. [`build`] is pure and
//! does no caching; [`snapshot`] is the convenience that scans a store first.
//!
//! The JSON form is an array of nodes using the field names the topology
//! viewer reads:
//!
//! ```json
//! [{"name":"R1","interfaces":[{"name":"Gi0/0/0/0","ipv4":"10.0.0.1/31",
//!   "isisNeighbours":[{"ipv4":"10.0.0.0"}]}]}]
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::model::{Ipv4Address, Record, ResourceKind};
use crate::store::StateStore;

/// Derived view of every device, its addressed interfaces, and the IS-IS
/// neighbors seen on each of them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TopologySnapshot {
    pub nodes: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub name: String,
    pub interfaces: Vec<Interface>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Interface {
    pub name: String,
    pub ipv4: Ipv4Address,
    pub isis_neighbours: Vec<Neighbor>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Neighbor {
    pub ipv4: Ipv4Address,
}

impl TopologySnapshot {
    pub fn node(&self, name: &str) -> Option<&Node> {
        self.nodes.iter().find(|node| node.name == name)
    }
}

impl Node {
    pub fn interface(&self, name: &str) -> Option<&Interface> {
        self.interfaces.iter().find(|iface| iface.name == name)
    }
}

/// Builds a snapshot from interface and neighbor records.
///
/// One node per device that has at least one interface record. A neighbor
/// whose local interface has no interface record is left out. Records of
/// the wrong kind in either slice are ignored.
pub fn build(interfaces: &[Record], neighbors: &[Record]) -> TopologySnapshot {
    let mut nodes: BTreeMap<&str, Node> = BTreeMap::new();
    for record in interfaces {
        let Record::Interface(iface) = record else {
            continue;
        };
        nodes
            .entry(iface.device.as_str())
            .or_insert_with(|| Node {
                name: iface.device.clone(),
                interfaces: Vec::new(),
            })
            .interfaces
            .push(Interface {
                name: iface.interface.clone(),
                ipv4: iface.ipv4,
                isis_neighbours: Vec::new(),
            });
    }

    for record in neighbors {
        let Record::Neighbor(nbr) = record else {
            continue;
        };
        let attached = nodes
            .get_mut(nbr.device.as_str())
            .and_then(|node| node.interfaces.iter_mut().find(|i| i.name == nbr.local_interface));
        if let Some(iface) = attached {
            iface.isis_neighbours.push(Neighbor { ipv4: nbr.neighbor_ipv4 });
        }
    }

    TopologySnapshot {
        nodes: nodes.into_values().collect(),
    }
}

/// Scans both tables of `store` and builds a snapshot.
pub async fn snapshot<S: StateStore>(store: &S) -> Result<TopologySnapshot, StoreError> {
    let interfaces = store.records(ResourceKind::Interface).await?;
    let neighbors = store.records(ResourceKind::Neighbor).await?;
    Ok(build(&interfaces, &neighbors))
}
