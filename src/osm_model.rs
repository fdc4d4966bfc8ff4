use geo::Coord;
use std::collections::BTreeMap;
use std::fmt::Display;

#[derive(Debug, Default, Clone, Copy, Eq, PartialEq, PartialOrd, Ord, Hash)]
pub struct OsmNodeId(pub i64);

impl Display for OsmNodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Default, Clone, Copy, Eq, PartialEq, PartialOrd, Ord, Hash)]
pub struct OsmWayId(pub i64);

impl Display for OsmWayId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier assigned by the spatial store on insert.
#[derive(Debug, Default, Clone, Copy, Eq, PartialEq, PartialOrd, Ord, Hash)]
pub struct StoreId(pub i64);

impl Display for StoreId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct OsmNode {
    pub id: OsmNodeId,
    /// x is longitude, y is latitude (WGS84)
    pub coordinate: Coord<f64>,
}

impl OsmNode {
    pub fn new(id: i64, lng: f64, lat: f64) -> Self {
        Self {
            id: OsmNodeId(id),
            coordinate: Coord { x: lng, y: lat },
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct OsmWay {
    pub id: OsmWayId,
    pub refs: Vec<OsmNodeId>,
    pub tags: BTreeMap<String, String>,
}

impl OsmWay {
    pub fn new(id: i64, refs: &[i64], tags: &[(&str, &str)]) -> Self {
        Self {
            id: OsmWayId(id),
            refs: refs.iter().map(|r| OsmNodeId(*r)).collect(),
            tags: tags
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    pub fn highway(&self) -> Option<&str> {
        self.tags.get("highway").map(String::as_str)
    }

    pub fn name(&self) -> Option<&str> {
        self.tags.get("name").map(String::as_str)
    }

    pub fn is_oneway(&self) -> bool {
        self.tags.get("oneway").is_some_and(|v| v == "yes")
    }

    /// Only ways carrying a road classification take part in the network.
    pub fn is_road(&self) -> bool {
        self.highway().is_some()
    }
}

/// Road-relevant subset of decoded map data.
///
/// Ordered maps keep every downstream stage deterministic: segment order and the
/// order in which the store hands out ids both follow source id order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RoadNetwork {
    pub nodes: BTreeMap<OsmNodeId, OsmNode>,
    pub ways: BTreeMap<OsmWayId, OsmWay>,
}

impl RoadNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, node: OsmNode) {
        self.nodes.insert(node.id, node);
    }

    /// Ways without a road tag are ignored.
    pub fn add_way(&mut self, way: OsmWay) -> bool {
        if !way.is_road() {
            return false;
        }
        self.ways.insert(way.id, way);
        true
    }

    pub fn coordinate(&self, id: &OsmNodeId) -> Option<Coord<f64>> {
        self.nodes.get(id).map(|n| n.coordinate)
    }
}
