use log::{debug, info};
use rayon::prelude::*;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Instant;

use crate::error::{PipelineError, Result};
use crate::osm_model::{OsmNodeId, OsmWay, OsmWayId};

/// Contiguous piece of a way between two intersections (or the whole way).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Segment {
    pub way_id: OsmWayId,
    /// Zero-based position within the parent way
    pub index: usize,
    /// Number of segments the parent way was split into
    pub size: usize,
    pub refs: Vec<OsmNodeId>,
}

/// Stable position of a segment inside a [`SegmentArena`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SegmentSlot(pub usize);

/// All segments of a network, with the ordered slots owned by each way.
#[derive(Clone, Debug, Default)]
pub struct SegmentArena {
    segments: Vec<Segment>,
    by_way: BTreeMap<OsmWayId, Vec<SegmentSlot>>,
}

impl SegmentArena {
    fn push_way(&mut self, way_id: OsmWayId, pieces: Vec<Vec<OsmNodeId>>) {
        let size = pieces.len();
        let slots = self.by_way.entry(way_id).or_default();
        for (index, refs) in pieces.into_iter().enumerate() {
            slots.push(SegmentSlot(self.segments.len()));
            self.segments.push(Segment {
                way_id,
                index,
                size,
                refs,
            });
        }
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (SegmentSlot, &Segment)> {
        self.segments
            .iter()
            .enumerate()
            .map(|(i, s)| (SegmentSlot(i), s))
    }

    /// Slots of a way in segment index order. Empty for unknown ways.
    pub fn slots_of(&self, way_id: OsmWayId) -> &[SegmentSlot] {
        self.by_way.get(&way_id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn segments_of(&self, way_id: OsmWayId) -> impl Iterator<Item = &Segment> {
        self.slots_of(way_id)
            .iter()
            .filter_map(|slot| self.segments.get(slot.0))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SegmentationReport {
    pub shared_nodes: usize,
    /// Ways with at least one interior intersection
    pub split_ways: usize,
    pub segments: usize,
}

/// Node ids referenced more than once across all ways.
///
/// A way revisiting one of its own nodes counts that node twice.
pub fn shared_nodes<'a>(ways: impl IntoIterator<Item = &'a OsmWay>) -> HashSet<OsmNodeId> {
    let mut ref_count: HashMap<OsmNodeId, usize> = HashMap::new();
    for way in ways {
        for node in &way.refs {
            *ref_count.entry(*node).or_insert(0) += 1;
        }
    }
    ref_count
        .into_iter()
        .filter(|(_, count)| *count > 1)
        .map(|(node, _)| node)
        .collect()
}

/// Interior positions (endpoints excluded) holding a shared node, ascending.
pub fn split_positions(refs: &[OsmNodeId], shared: &HashSet<OsmNodeId>) -> Vec<usize> {
    if refs.len() < 3 {
        return Vec::new();
    }
    (1..refs.len() - 1)
        .filter(|&i| shared.contains(&refs[i]))
        .collect()
}

/// Splits one way at its interior shared nodes. Consecutive pieces overlap by
/// exactly the boundary node.
pub fn split_way(way: &OsmWay, shared: &HashSet<OsmNodeId>) -> Result<Vec<Vec<OsmNodeId>>> {
    let positions = split_positions(&way.refs, shared);
    let mut pieces = Vec::with_capacity(positions.len() + 1);
    let mut last = 0;
    for p in positions {
        pieces.push(way.refs[last..=p].to_vec());
        last = p;
    }
    pieces.push(way.refs.get(last..).map(<[_]>::to_vec).unwrap_or_default());

    if let Some((index, piece)) = pieces.iter().enumerate().find(|(_, p)| p.len() <= 1) {
        return Err(PipelineError::InvariantViolation(format!(
            "way {} produced segment {} with {} node(s)",
            way.id,
            index,
            piece.len()
        )));
    }
    Ok(pieces)
}

/// Partitions every way into intersection-bounded segments.
pub fn segment_ways(
    ways: &BTreeMap<OsmWayId, OsmWay>,
) -> Result<(SegmentArena, SegmentationReport)> {
    let start_time = Instant::now();
    let shared = shared_nodes(ways.values());

    let way_list: Vec<&OsmWay> = ways.values().collect();
    let pieces: Vec<Vec<Vec<OsmNodeId>>> = way_list
        .par_iter()
        .map(|way| split_way(way, &shared))
        .collect::<Result<Vec<_>>>()?;

    let mut arena = SegmentArena::default();
    let mut split_ways = 0;
    for (way, way_pieces) in way_list.iter().zip(pieces) {
        if way_pieces.len() > 1 {
            split_ways += 1;
        }
        arena.push_way(way.id, way_pieces);
    }

    let report = SegmentationReport {
        shared_nodes: shared.len(),
        split_ways,
        segments: arena.len(),
    };
    info!("Shared nodes: {}", report.shared_nodes);
    info!("Shared ways: {}", report.split_ways);
    info!("Segments: {}", report.segments);
    debug!("Segmentation finished in {:?}", start_time.elapsed());

    Ok((arena, report))
}
