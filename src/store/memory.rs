use async_trait::async_trait;
use geo::{BoundingRect, Closest, ClosestPoint, Distance, Euclidean, LineString, Point};
use rstar::{AABB, PointDistance, RTree, RTreeObject};
use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::{
    NearestSegment, NodeRow, SegmentNodeRow, SegmentRow, SpatialStore, WayNodeRow, WayRow,
};
use crate::error::{PipelineError, Result};
use crate::osm_model::{OsmNodeId, OsmWayId, StoreId};

// Wrapper for a stored segment to make it compatible with RTree
struct IndexedSegment {
    segment_id: StoreId,
    osm_way_id: OsmWayId,
    geometry: LineString<f64>,
    envelope: AABB<[f64; 2]>,
}

impl IndexedSegment {
    fn new(segment_id: StoreId, osm_way_id: OsmWayId, geometry: LineString<f64>) -> Self {
        let envelope = match geometry.bounding_rect() {
            Some(rect) => AABB::from_corners(
                [rect.min().x, rect.min().y],
                [rect.max().x, rect.max().y],
            ),
            None => AABB::from_point([0.0, 0.0]),
        };
        Self {
            segment_id,
            osm_way_id,
            geometry,
            envelope,
        }
    }

    fn project(&self, point: Point<f64>) -> Option<Point<f64>> {
        match self.geometry.closest_point(&point) {
            Closest::Intersection(p) | Closest::SinglePoint(p) => Some(p),
            Closest::Indeterminate => None,
        }
    }

    fn distance_to(&self, point: Point<f64>) -> f64 {
        self.project(point)
            .map(|p| Euclidean.distance(&point, &p))
            .unwrap_or(f64::INFINITY)
    }
}

impl RTreeObject for IndexedSegment {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

impl PointDistance for IndexedSegment {
    fn distance_2(&self, point: &[f64; 2]) -> f64 {
        let d = self.distance_to(Point::new(point[0], point[1]));
        d * d
    }
}

#[derive(Default)]
struct MemoryState {
    nodes: BTreeMap<StoreId, NodeRow>,
    node_osm_ids: HashSet<OsmNodeId>,
    ways: BTreeMap<StoreId, WayRow>,
    way_osm_ids: HashSet<OsmWayId>,
    way_nodes: Vec<WayNodeRow>,
    segments: BTreeMap<StoreId, SegmentRow>,
    segment_nodes: Vec<SegmentNodeRow>,
    index: RTree<IndexedSegment>,
}

fn next_id<V>(table: &BTreeMap<StoreId, V>, offset: usize) -> StoreId {
    let last = table.keys().next_back().map(|id| id.0).unwrap_or(0);
    StoreId(last + 1 + offset as i64)
}

/// R-tree backed stand-in for the PostGIS store. Ids start at 1 per table and
/// distances are planar, in degrees.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn node_count(&self) -> usize {
        self.state().nodes.len()
    }

    pub fn way_count(&self) -> usize {
        self.state().ways.len()
    }

    pub fn node(&self, id: StoreId) -> Option<NodeRow> {
        self.state().nodes.get(&id).cloned()
    }

    pub fn way(&self, id: StoreId) -> Option<WayRow> {
        self.state().ways.get(&id).cloned()
    }

    pub fn way_nodes(&self) -> Vec<WayNodeRow> {
        self.state().way_nodes.clone()
    }

    pub fn segments(&self) -> Vec<(StoreId, SegmentRow)> {
        self.state()
            .segments
            .iter()
            .map(|(id, row)| (*id, row.clone()))
            .collect()
    }

    pub fn segment_nodes(&self) -> Vec<SegmentNodeRow> {
        self.state().segment_nodes.clone()
    }
}

#[async_trait]
impl SpatialStore for MemoryStore {
    async fn insert_nodes(&self, rows: &[NodeRow]) -> Result<Vec<StoreId>> {
        let mut state = self.state();
        let mut seen = HashSet::new();
        for row in rows {
            if state.node_osm_ids.contains(&row.osm_id) || !seen.insert(row.osm_id) {
                return Err(PipelineError::StoreWriteFailure(format!(
                    "duplicate node osm_id {}",
                    row.osm_id
                )));
            }
        }
        let ids: Vec<StoreId> = (0..rows.len()).map(|i| next_id(&state.nodes, i)).collect();
        for (id, row) in ids.iter().zip(rows) {
            state.node_osm_ids.insert(row.osm_id);
            state.nodes.insert(*id, row.clone());
        }
        Ok(ids)
    }

    async fn insert_ways(&self, rows: &[WayRow]) -> Result<Vec<StoreId>> {
        let mut state = self.state();
        let mut seen = HashSet::new();
        for row in rows {
            if state.way_osm_ids.contains(&row.osm_id) || !seen.insert(row.osm_id) {
                return Err(PipelineError::StoreWriteFailure(format!(
                    "duplicate way osm_id {}",
                    row.osm_id
                )));
            }
        }
        let ids: Vec<StoreId> = (0..rows.len()).map(|i| next_id(&state.ways, i)).collect();
        for (id, row) in ids.iter().zip(rows) {
            state.way_osm_ids.insert(row.osm_id);
            state.ways.insert(*id, row.clone());
        }
        Ok(ids)
    }

    async fn insert_way_nodes(&self, rows: &[WayNodeRow]) -> Result<()> {
        let mut state = self.state();
        if let Some(row) = rows
            .iter()
            .find(|r| !state.ways.contains_key(&r.way_id) || !state.nodes.contains_key(&r.node_id))
        {
            return Err(PipelineError::StoreWriteFailure(format!(
                "way node row references missing way {} or node {}",
                row.way_id, row.node_id
            )));
        }
        state.way_nodes.extend_from_slice(rows);
        Ok(())
    }

    async fn insert_segments(&self, rows: &[SegmentRow]) -> Result<Vec<StoreId>> {
        let mut state = self.state();
        if let Some(row) = rows.iter().find(|r| !state.ways.contains_key(&r.way_id)) {
            return Err(PipelineError::StoreWriteFailure(format!(
                "segment row references missing way {}",
                row.way_id
            )));
        }
        let ids: Vec<StoreId> = (0..rows.len())
            .map(|i| next_id(&state.segments, i))
            .collect();
        for (id, row) in ids.iter().zip(rows) {
            state.index.insert(IndexedSegment::new(
                *id,
                row.osm_way_id,
                row.geometry.clone(),
            ));
            state.segments.insert(*id, row.clone());
        }
        Ok(ids)
    }

    async fn insert_segment_nodes(&self, rows: &[SegmentNodeRow]) -> Result<()> {
        let mut state = self.state();
        if let Some(row) = rows.iter().find(|r| {
            !state.segments.contains_key(&r.segment_id) || !state.nodes.contains_key(&r.node_id)
        }) {
            return Err(PipelineError::StoreWriteFailure(format!(
                "segment node row references missing segment {} or node {}",
                row.segment_id, row.node_id
            )));
        }
        state.segment_nodes.extend_from_slice(rows);
        Ok(())
    }

    async fn nearest_segment(&self, point: Point<f64>) -> Result<Option<NearestSegment>> {
        let state = self.state();
        let mut candidates = state
            .index
            .nearest_neighbor_iter_with_distance_2(&[point.x(), point.y()]);

        let Some((first, best_d2)) = candidates.next() else {
            return Ok(None);
        };
        let mut best = first;
        for (other, d2) in candidates {
            if d2 > best_d2 {
                break;
            }
            if other.segment_id < best.segment_id {
                best = other;
            }
        }

        Ok(Some(NearestSegment {
            segment_id: best.segment_id,
            osm_way_id: best.osm_way_id,
            distance: best_d2.sqrt(),
        }))
    }

    async fn closest_point_on_segment(
        &self,
        segment_id: StoreId,
        point: Point<f64>,
    ) -> Result<Point<f64>> {
        let state = self.state();
        let row = state.segments.get(&segment_id).ok_or_else(|| {
            PipelineError::StoreReadFailure(format!("segment {segment_id} not found"))
        })?;
        match row.geometry.closest_point(&point) {
            Closest::Intersection(p) | Closest::SinglePoint(p) => Ok(p),
            Closest::Indeterminate => Err(PipelineError::StoreReadFailure(format!(
                "segment {segment_id} has no closest point"
            ))),
        }
    }

    async fn segment_geometry(&self, segment_id: StoreId) -> Result<LineString<f64>> {
        self.state()
            .segments
            .get(&segment_id)
            .map(|row| row.geometry.clone())
            .ok_or_else(|| {
                PipelineError::StoreReadFailure(format!("segment {segment_id} not found"))
            })
    }

    async fn segment_count(&self) -> Result<u64> {
        Ok(self.state().segments.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{Coord, line_string};

    async fn store_with_way() -> (MemoryStore, StoreId) {
        let store = MemoryStore::new();
        let way_ids = store
            .insert_ways(&[WayRow {
                osm_id: OsmWayId(1),
                name: None,
                highway: Some(String::from("residential")),
                oneway: false,
                path: line_string![(x: 0.0, y: 0.0), (x: 2.0, y: 0.0)],
            }])
            .await
            .unwrap();
        (store, way_ids[0])
    }

    fn segment(way_id: StoreId, osm: i64, index: i32, geometry: LineString<f64>) -> SegmentRow {
        SegmentRow {
            way_id,
            osm_way_id: OsmWayId(osm),
            index,
            size: 1,
            name: None,
            highway: Some(String::from("residential")),
            oneway: false,
            geometry,
        }
    }

    #[tokio::test]
    async fn ids_are_sequential_across_batches() {
        let store = MemoryStore::new();
        let first = store
            .insert_nodes(&[
                NodeRow { osm_id: OsmNodeId(10), coordinate: Coord { x: 0.0, y: 0.0 } },
                NodeRow { osm_id: OsmNodeId(11), coordinate: Coord { x: 1.0, y: 0.0 } },
            ])
            .await
            .unwrap();
        let second = store
            .insert_nodes(&[NodeRow { osm_id: OsmNodeId(12), coordinate: Coord { x: 2.0, y: 0.0 } }])
            .await
            .unwrap();
        assert_eq!(first, vec![StoreId(1), StoreId(2)]);
        assert_eq!(second, vec![StoreId(3)]);
    }

    #[tokio::test]
    async fn duplicate_osm_id_fails() {
        let store = MemoryStore::new();
        let row = NodeRow { osm_id: OsmNodeId(10), coordinate: Coord { x: 0.0, y: 0.0 } };
        store.insert_nodes(&[row.clone()]).await.unwrap();
        assert!(matches!(
            store.insert_nodes(&[row]).await,
            Err(PipelineError::StoreWriteFailure(_))
        ));
        assert_eq!(store.node_count(), 1);
    }

    #[tokio::test]
    async fn join_rows_need_existing_parents() {
        let (store, way_id) = store_with_way().await;
        let result = store
            .insert_way_nodes(&[WayNodeRow { way_id, node_id: StoreId(42), index: 0, size: 1 }])
            .await;
        assert!(matches!(result, Err(PipelineError::StoreWriteFailure(_))));
    }

    #[tokio::test]
    async fn empty_store_has_no_nearest() {
        let store = MemoryStore::new();
        assert!(store.nearest_segment(Point::new(0.0, 0.0)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn nearest_prefers_closest_then_lowest_id() {
        let (store, way_id) = store_with_way().await;
        let ids = store
            .insert_segments(&[
                segment(way_id, 1, 0, line_string![(x: 0.0, y: 1.0), (x: 2.0, y: 1.0)]),
                segment(way_id, 1, 1, line_string![(x: 0.0, y: -1.0), (x: 2.0, y: -1.0)]),
                segment(way_id, 1, 2, line_string![(x: 0.0, y: 0.5), (x: 2.0, y: 0.5)]),
            ])
            .await
            .unwrap();

        let near = store.nearest_segment(Point::new(1.0, 0.4)).await.unwrap().unwrap();
        assert_eq!(near.segment_id, ids[2]);
        assert!((near.distance - 0.1).abs() < 1e-9);

        let near = store.nearest_segment(Point::new(1.0, 0.0)).await.unwrap().unwrap();
        assert_eq!(near.segment_id, ids[2]);
        let far = store.nearest_segment(Point::new(1.0, -5.0)).await.unwrap().unwrap();
        assert_eq!(far.segment_id, ids[1]);

        // 0.75 from both y = -1.0 and y = 0.5
        let tie = store.nearest_segment(Point::new(1.0, -0.25)).await.unwrap().unwrap();
        assert_eq!(tie.segment_id, ids[1]);
    }

    #[tokio::test]
    async fn equidistant_segments_resolve_to_lowest_id() {
        let (store, way_id) = store_with_way().await;
        let ids = store
            .insert_segments(&[
                segment(way_id, 1, 0, line_string![(x: 0.0, y: 1.0), (x: 2.0, y: 1.0)]),
                segment(way_id, 1, 1, line_string![(x: 0.0, y: -1.0), (x: 2.0, y: -1.0)]),
            ])
            .await
            .unwrap();
        let tie = store.nearest_segment(Point::new(1.0, 0.0)).await.unwrap().unwrap();
        assert_eq!(tie.segment_id, ids[0]);
        assert_eq!(tie.osm_way_id, OsmWayId(1));
    }

    #[tokio::test]
    async fn closest_point_projects_onto_segment() {
        let (store, way_id) = store_with_way().await;
        let ids = store
            .insert_segments(&[segment(
                way_id,
                1,
                0,
                line_string![(x: 0.0, y: 0.0), (x: 2.0, y: 0.0)],
            )])
            .await
            .unwrap();
        let p = store
            .closest_point_on_segment(ids[0], Point::new(1.5, 3.0))
            .await
            .unwrap();
        assert_eq!(p, Point::new(1.5, 0.0));
        assert!(matches!(
            store.segment_geometry(StoreId(999)).await,
            Err(PipelineError::StoreReadFailure(_))
        ));
    }
}
