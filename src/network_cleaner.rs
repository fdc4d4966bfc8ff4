use log::info;
use std::collections::HashSet;
use std::time::Instant;

use crate::osm_model::{OsmNodeId, OsmWayId, RoadNetwork};

/// Counts gathered while cleaning. Diagnostic only.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanReport {
    pub nodes_before: usize,
    pub ways_before: usize,
    pub available_nodes: usize,
    pub referenced_nodes: usize,
    pub invalid_nodes: usize,
    pub valid_nodes: usize,
    pub unused_nodes: usize,
    pub incomplete_ways: usize,
    /// Nodes only referenced by ways that were dropped as incomplete
    pub orphaned_nodes: usize,
    pub way_node_refs: usize,
    pub nodes_after: usize,
    pub ways_after: usize,
}

impl CleanReport {
    pub fn log(&self) {
        info!("Before:");
        info!("- nodes: {}", self.nodes_before);
        info!("- ways: {}", self.ways_before);
        info!("Cleaning up:");
        info!("- available nodes: {}", self.available_nodes);
        info!("- referenced nodes: {}", self.referenced_nodes);
        info!("- invalid nodes: {}", self.invalid_nodes);
        info!("- valid nodes: {}", self.valid_nodes);
        info!("- unused nodes: {}", self.unused_nodes);
        info!("- incomplete ways: {}", self.incomplete_ways);
        info!("- orphaned nodes: {}", self.orphaned_nodes);
        info!("- way nodes count: {}", self.way_node_refs);
        info!("After:");
        info!("- nodes: {}", self.nodes_after);
        info!("- ways: {}", self.ways_after);
    }
}

/// Drops ways with a missing ref or fewer than two refs, then every node no
/// remaining way references.
pub fn clean(network: RoadNetwork) -> (RoadNetwork, CleanReport) {
    let start_time = Instant::now();
    let RoadNetwork {
        mut nodes,
        mut ways,
    } = network;

    let mut report = CleanReport {
        nodes_before: nodes.len(),
        ways_before: ways.len(),
        ..Default::default()
    };

    // Non-road ways never take part, whatever put them into the mapping.
    ways.retain(|_, way| way.is_road());

    let referenced: HashSet<OsmNodeId> = ways
        .values()
        .flat_map(|way| way.refs.iter().copied())
        .collect();
    let available: HashSet<OsmNodeId> = nodes.keys().copied().collect();

    let invalid: HashSet<OsmNodeId> = referenced.difference(&available).copied().collect();
    report.available_nodes = available.len();
    report.referenced_nodes = referenced.len();
    report.invalid_nodes = invalid.len();
    report.valid_nodes = referenced.len() - invalid.len();

    let before_unused = nodes.len();
    nodes.retain(|id, _| referenced.contains(id));
    report.unused_nodes = before_unused - nodes.len();

    let incomplete: Vec<OsmWayId> = ways
        .iter()
        .filter(|(_, way)| way.refs.len() <= 1 || way.refs.iter().any(|r| invalid.contains(r)))
        .map(|(id, _)| *id)
        .collect();
    report.way_node_refs = ways.values().map(|w| w.refs.len()).sum();
    report.incomplete_ways = incomplete.len();
    for id in &incomplete {
        ways.remove(id);
    }

    if !incomplete.is_empty() {
        let still_referenced: HashSet<OsmNodeId> = ways
            .values()
            .flat_map(|way| way.refs.iter().copied())
            .collect();
        let before_orphans = nodes.len();
        nodes.retain(|id, _| still_referenced.contains(id));
        report.orphaned_nodes = before_orphans - nodes.len();
    }

    report.nodes_after = nodes.len();
    report.ways_after = ways.len();
    report.log();
    info!("Network cleaned in {:?}", start_time.elapsed());

    (RoadNetwork { nodes, ways }, report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::osm_model::{OsmNode, OsmWay};

    fn road(id: i64, refs: &[i64]) -> OsmWay {
        OsmWay::new(id, refs, &[("highway", "residential")])
    }

    fn network(nodes: &[(i64, f64, f64)], ways: Vec<OsmWay>) -> RoadNetwork {
        let mut n = RoadNetwork::new();
        for (id, lng, lat) in nodes {
            n.add_node(OsmNode::new(*id, *lng, *lat));
        }
        for w in ways {
            n.add_way(w);
        }
        n
    }

    fn assert_consistent(network: &RoadNetwork) {
        for way in network.ways.values() {
            assert!(way.refs.len() > 1, "way {} too short", way.id);
            for r in &way.refs {
                assert!(network.nodes.contains_key(r), "way {} has dangling ref {}", way.id, r);
            }
        }
    }

    #[test]
    fn incomplete_way_and_its_nodes_are_dropped() {
        let input = network(&[(1, 0.0, 0.0), (2, 1.0, 1.0)], vec![road(10, &[1, 2, 3])]);
        let (cleaned, report) = clean(input);

        assert!(cleaned.nodes.is_empty());
        assert!(cleaned.ways.is_empty());
        assert_eq!(report.invalid_nodes, 1);
        assert_eq!(report.incomplete_ways, 1);
        assert_eq!(report.unused_nodes, 0);
        assert_eq!(report.orphaned_nodes, 2);
    }

    #[test]
    fn unused_nodes_are_dropped() {
        let input = network(
            &[(1, 0.0, 0.0), (2, 0.0, 0.001), (99, 5.0, 5.0)],
            vec![road(10, &[1, 2])],
        );
        let (cleaned, report) = clean(input);

        assert_eq!(cleaned.nodes.len(), 2);
        assert!(!cleaned.nodes.contains_key(&OsmNodeId(99)));
        assert_eq!(report.unused_nodes, 1);
        assert_eq!(report.nodes_after, 2);
        assert_eq!(report.ways_after, 1);
    }

    #[test]
    fn single_ref_and_empty_ways_are_dropped() {
        let input = network(
            &[(1, 0.0, 0.0), (2, 0.0, 0.001), (3, 0.0, 0.002)],
            vec![road(10, &[1, 2]), road(11, &[3]), road(12, &[])],
        );
        let (cleaned, report) = clean(input);

        assert_eq!(cleaned.ways.keys().copied().collect::<Vec<_>>(), vec![OsmWayId(10)]);
        assert_eq!(report.incomplete_ways, 2);
        // node 3 was only referenced by the single-node way
        assert!(!cleaned.nodes.contains_key(&OsmNodeId(3)));
        assert_consistent(&cleaned);
    }

    #[test]
    fn shared_node_survives_when_one_user_is_dropped() {
        let input = network(
            &[(1, 0.0, 0.0), (2, 0.0, 0.001), (3, 0.001, 0.001)],
            vec![road(10, &[1, 2]), road(11, &[2, 3, 4])],
        );
        let (cleaned, _) = clean(input);

        assert_eq!(cleaned.ways.len(), 1);
        assert!(cleaned.nodes.contains_key(&OsmNodeId(2)));
        assert!(!cleaned.nodes.contains_key(&OsmNodeId(3)));
        assert_consistent(&cleaned);
    }

    #[test]
    fn empty_input_gives_empty_output() {
        let (cleaned, report) = clean(RoadNetwork::new());
        assert!(cleaned.nodes.is_empty());
        assert!(cleaned.ways.is_empty());
        assert_eq!(report, CleanReport::default());
    }

    #[test]
    fn cleaning_is_idempotent() {
        let input = network(
            &[(1, 0.0, 0.0), (2, 0.0, 0.001), (3, 0.001, 0.001), (4, 1.0, 1.0)],
            vec![road(10, &[1, 2, 3]), road(11, &[3, 5])],
        );
        let (once, _) = clean(input);
        let (twice, report) = clean(once.clone());
        assert_eq!(once, twice);
        assert_eq!(report.incomplete_ways, 0);
        assert_eq!(report.unused_nodes, 0);
    }
}
