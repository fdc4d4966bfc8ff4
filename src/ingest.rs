use geo::{Coord, LineString};
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info};
use std::collections::HashMap;
use std::fmt::Display;
use std::hash::Hash;
use std::time::Instant;

use crate::error::{PipelineError, Result};
use crate::intersection_processor::SegmentArena;
use crate::osm_model::{OsmNodeId, OsmWayId, RoadNetwork, StoreId};
use crate::store::{NodeRow, SegmentNodeRow, SegmentRow, SpatialStore, WayNodeRow, WayRow};

/// Source id to store id for one entity kind, valid for a single import.
#[derive(Debug)]
pub struct IdMap<K> {
    kind: &'static str,
    ids: HashMap<K, StoreId>,
}

impl<K: Eq + Hash + Copy + Display> IdMap<K> {
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            ids: HashMap::new(),
        }
    }

    /// Pairs submitted keys with the ids the store returned for them.
    pub fn record(&mut self, keys: &[K], ids: &[StoreId]) -> Result<()> {
        if keys.len() != ids.len() {
            return Err(PipelineError::StoreWriteFailure(format!(
                "submitted {} {} rows, store returned {} ids",
                keys.len(),
                self.kind,
                ids.len()
            )));
        }
        self.ids.extend(keys.iter().copied().zip(ids.iter().copied()));
        Ok(())
    }

    pub fn get(&self, key: K) -> Result<StoreId> {
        self.ids.get(&key).copied().ok_or_else(|| {
            PipelineError::InvariantViolation(format!("no store id for {} {}", self.kind, key))
        })
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Rows written per table, plus the number of store calls it took.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportReport {
    pub nodes: usize,
    pub ways: usize,
    pub way_nodes: usize,
    pub segments: usize,
    pub segment_nodes: usize,
    pub flushes: usize,
}

impl ImportReport {
    pub fn log(&self) {
        info!("Imported:");
        info!("- nodes: {}", self.nodes);
        info!("- ways: {}", self.ways);
        info!("- way nodes: {}", self.way_nodes);
        info!("- segments: {}", self.segments);
        info!("- segment nodes: {}", self.segment_nodes);
        info!("- store flushes: {}", self.flushes);
    }
}

fn to_i32(value: usize, what: &str) -> Result<i32> {
    i32::try_from(value)
        .map_err(|_| PipelineError::InvariantViolation(format!("{what} {value} exceeds i32")))
}

fn coordinates(network: &RoadNetwork, refs: &[OsmNodeId]) -> Result<LineString<f64>> {
    let coords = refs
        .iter()
        .map(|id| {
            network.coordinate(id).ok_or_else(|| {
                PipelineError::InvariantViolation(format!("node {id} is not in the network"))
            })
        })
        .collect::<Result<Vec<Coord<f64>>>>()?;
    Ok(LineString::new(coords))
}

// Phases: nodes, ways, way nodes, segments, segment nodes. Later phases key
// their rows by ids handed out in earlier ones.
pub struct NetworkImporter<'a, S: SpatialStore + ?Sized> {
    store: &'a S,
    batch_size: usize,
    show_progress: bool,
}

impl<'a, S: SpatialStore + ?Sized> NetworkImporter<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self {
            store,
            batch_size: 10_000,
            show_progress: false,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    fn progress_bar(&self, len: usize, phase: &'static str) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new(len as u64);
        let style = ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} ({eta}) - {msg}")
            .map(|s| s.progress_chars("##-"))
            .unwrap_or_else(|_| ProgressStyle::default_bar());
        pb.set_style(style);
        pb.set_message(phase);
        pb
    }

    /// Writes `network` and its segmentation. `arena` must have been computed
    /// from the same network.
    pub async fn import(&self, network: &RoadNetwork, arena: &SegmentArena) -> Result<ImportReport> {
        let start_time = Instant::now();
        let mut report = ImportReport::default();

        let node_ids = self.import_nodes(network, &mut report).await?;
        let way_ids = self.import_ways(network, &mut report).await?;
        self.import_way_nodes(network, &node_ids, &way_ids, &mut report)
            .await?;
        let segment_ids = self
            .import_segments(network, arena, &way_ids, &mut report)
            .await?;
        self.import_segment_nodes(arena, &node_ids, &segment_ids, &mut report)
            .await?;

        info!("Import finished in {:?}", start_time.elapsed());
        Ok(report)
    }

    async fn import_nodes(
        &self,
        network: &RoadNetwork,
        report: &mut ImportReport,
    ) -> Result<IdMap<OsmNodeId>> {
        let phase_start = Instant::now();
        let pb = self.progress_bar(network.nodes.len(), "nodes");
        let mut node_ids = IdMap::new("node");

        let mut nodes = network.nodes.values();
        loop {
            let chunk: Vec<NodeRow> = nodes
                .by_ref()
                .take(self.batch_size)
                .map(|n| NodeRow {
                    osm_id: n.id,
                    coordinate: n.coordinate,
                })
                .collect();
            if chunk.is_empty() {
                break;
            }
            let ids = self.store.insert_nodes(&chunk).await?;
            let keys: Vec<OsmNodeId> = chunk.iter().map(|r| r.osm_id).collect();
            node_ids.record(&keys, &ids)?;
            report.flushes += 1;
            pb.inc(chunk.len() as u64);
        }

        pb.finish_and_clear();
        report.nodes = node_ids.len();
        info!(
            "Imported {} nodes in {:?}",
            report.nodes,
            phase_start.elapsed()
        );
        Ok(node_ids)
    }

    async fn import_ways(
        &self,
        network: &RoadNetwork,
        report: &mut ImportReport,
    ) -> Result<IdMap<OsmWayId>> {
        let phase_start = Instant::now();
        let pb = self.progress_bar(network.ways.len(), "ways");
        let mut way_ids = IdMap::new("way");

        let mut ways = network.ways.values();
        loop {
            let chunk = ways
                .by_ref()
                .take(self.batch_size)
                .map(|w| {
                    Ok(WayRow {
                        osm_id: w.id,
                        name: w.name().map(String::from),
                        highway: w.highway().map(String::from),
                        oneway: w.is_oneway(),
                        path: coordinates(network, &w.refs)?,
                    })
                })
                .collect::<Result<Vec<WayRow>>>()?;
            if chunk.is_empty() {
                break;
            }
            let ids = self.store.insert_ways(&chunk).await?;
            let keys: Vec<OsmWayId> = chunk.iter().map(|r| r.osm_id).collect();
            way_ids.record(&keys, &ids)?;
            report.flushes += 1;
            pb.inc(chunk.len() as u64);
        }

        pb.finish_and_clear();
        report.ways = way_ids.len();
        info!("Imported {} ways in {:?}", report.ways, phase_start.elapsed());
        Ok(way_ids)
    }

    async fn import_way_nodes(
        &self,
        network: &RoadNetwork,
        node_ids: &IdMap<OsmNodeId>,
        way_ids: &IdMap<OsmWayId>,
        report: &mut ImportReport,
    ) -> Result<()> {
        let phase_start = Instant::now();
        let total: usize = network.ways.values().map(|w| w.refs.len()).sum();
        let pb = self.progress_bar(total, "way nodes");

        let mut rows = network.ways.values().flat_map(|w| {
            let size = w.refs.len();
            w.refs
                .iter()
                .enumerate()
                .map(move |(index, node)| (w.id, *node, index, size))
        });
        loop {
            let chunk = rows
                .by_ref()
                .take(self.batch_size)
                .map(|(way, node, index, size)| {
                    Ok(WayNodeRow {
                        way_id: way_ids.get(way)?,
                        node_id: node_ids.get(node)?,
                        index: to_i32(index, "way node index")?,
                        size: to_i32(size, "way size")?,
                    })
                })
                .collect::<Result<Vec<WayNodeRow>>>()?;
            if chunk.is_empty() {
                break;
            }
            self.store.insert_way_nodes(&chunk).await?;
            report.way_nodes += chunk.len();
            report.flushes += 1;
            pb.inc(chunk.len() as u64);
        }

        pb.finish_and_clear();
        info!(
            "Imported {} way nodes in {:?}",
            report.way_nodes,
            phase_start.elapsed()
        );
        Ok(())
    }

    /// Returns segment store ids indexed by arena slot.
    async fn import_segments(
        &self,
        network: &RoadNetwork,
        arena: &SegmentArena,
        way_ids: &IdMap<OsmWayId>,
        report: &mut ImportReport,
    ) -> Result<Vec<StoreId>> {
        let phase_start = Instant::now();
        let pb = self.progress_bar(arena.len(), "segments");
        let mut segment_ids = Vec::with_capacity(arena.len());

        let mut segments = arena.iter();
        loop {
            let chunk = segments
                .by_ref()
                .take(self.batch_size)
                .map(|(_, segment)| {
                    let way = network.ways.get(&segment.way_id).ok_or_else(|| {
                        PipelineError::InvariantViolation(format!(
                            "segment of unknown way {}",
                            segment.way_id
                        ))
                    })?;
                    Ok(SegmentRow {
                        way_id: way_ids.get(segment.way_id)?,
                        osm_way_id: segment.way_id,
                        index: to_i32(segment.index, "segment index")?,
                        size: to_i32(segment.size, "segment count")?,
                        name: way.name().map(String::from),
                        highway: way.highway().map(String::from),
                        oneway: way.is_oneway(),
                        geometry: coordinates(network, &segment.refs)?,
                    })
                })
                .collect::<Result<Vec<SegmentRow>>>()?;
            if chunk.is_empty() {
                break;
            }
            let ids = self.store.insert_segments(&chunk).await?;
            if ids.len() != chunk.len() {
                return Err(PipelineError::StoreWriteFailure(format!(
                    "submitted {} segment rows, store returned {} ids",
                    chunk.len(),
                    ids.len()
                )));
            }
            segment_ids.extend(ids);
            report.flushes += 1;
            pb.inc(chunk.len() as u64);
        }

        pb.finish_and_clear();
        report.segments = segment_ids.len();
        info!(
            "Imported {} segments in {:?}",
            report.segments,
            phase_start.elapsed()
        );
        Ok(segment_ids)
    }

    async fn import_segment_nodes(
        &self,
        arena: &SegmentArena,
        node_ids: &IdMap<OsmNodeId>,
        segment_ids: &[StoreId],
        report: &mut ImportReport,
    ) -> Result<()> {
        let phase_start = Instant::now();
        let total: usize = arena.iter().map(|(_, s)| s.refs.len()).sum();
        let pb = self.progress_bar(total, "segment nodes");

        let mut rows = arena.iter().flat_map(|(slot, segment)| {
            let size = segment.refs.len();
            segment
                .refs
                .iter()
                .enumerate()
                .map(move |(index, node)| (slot, *node, index, size))
        });
        loop {
            let chunk = rows
                .by_ref()
                .take(self.batch_size)
                .map(|(slot, node, index, size)| {
                    let segment_id = segment_ids.get(slot.0).copied().ok_or_else(|| {
                        PipelineError::InvariantViolation(format!(
                            "no store id for segment slot {}",
                            slot.0
                        ))
                    })?;
                    Ok(SegmentNodeRow {
                        segment_id,
                        node_id: node_ids.get(node)?,
                        index: to_i32(index, "segment node index")?,
                        size: to_i32(size, "segment size")?,
                    })
                })
                .collect::<Result<Vec<SegmentNodeRow>>>()?;
            if chunk.is_empty() {
                break;
            }
            self.store.insert_segment_nodes(&chunk).await?;
            report.segment_nodes += chunk.len();
            report.flushes += 1;
            pb.inc(chunk.len() as u64);
        }

        pb.finish_and_clear();
        debug!("segment node rows: {}", report.segment_nodes);
        info!(
            "Imported {} segment nodes in {:?}",
            report.segment_nodes,
            phase_start.elapsed()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intersection_processor::segment_ways;
    use crate::network_cleaner::clean;
    use crate::osm_model::{OsmNode, OsmWay};
    use crate::store::{MemoryStore, NearestSegment};
    use async_trait::async_trait;
    use geo::Point;
    use std::sync::Mutex;

    fn crossing() -> RoadNetwork {
        let mut network = RoadNetwork::new();
        for (id, lng, lat) in [
            (1, 0.0, 0.0),
            (2, 1.0, 0.0),
            (3, 2.0, 0.0),
            (4, 3.0, 0.0),
            (5, 4.0, 0.0),
            (6, 2.0, 1.0),
            (7, 2.0, -1.0),
        ] {
            network.add_node(OsmNode::new(id, lng, lat));
        }
        network.add_way(OsmWay::new(
            10,
            &[1, 2, 3, 4, 5],
            &[("highway", "primary"), ("name", "Main Street"), ("oneway", "yes")],
        ));
        network.add_way(OsmWay::new(20, &[6, 3, 7], &[("highway", "residential")]));
        network
    }

    /// Delegates to a memory store while recording every flush, optionally
    /// failing one phase or returning a short id list.
    struct RecordingStore {
        inner: MemoryStore,
        flushes: Mutex<Vec<(&'static str, usize)>>,
        fail_on: Option<&'static str>,
        drop_last_id: bool,
    }

    impl RecordingStore {
        fn new() -> Self {
            Self {
                inner: MemoryStore::new(),
                flushes: Mutex::new(Vec::new()),
                fail_on: None,
                drop_last_id: false,
            }
        }

        fn record(&self, phase: &'static str, rows: usize) -> Result<()> {
            self.flushes.lock().unwrap().push((phase, rows));
            if self.fail_on == Some(phase) {
                return Err(PipelineError::StoreWriteFailure(format!("{phase} rejected")));
            }
            Ok(())
        }

        fn phases(&self) -> Vec<&'static str> {
            let mut phases: Vec<&'static str> =
                self.flushes.lock().unwrap().iter().map(|(p, _)| *p).collect();
            phases.dedup();
            phases
        }

        fn sizes(&self, phase: &str) -> Vec<usize> {
            self.flushes
                .lock()
                .unwrap()
                .iter()
                .filter(|(p, _)| *p == phase)
                .map(|(_, n)| *n)
                .collect()
        }
    }

    #[async_trait]
    impl SpatialStore for RecordingStore {
        async fn insert_nodes(&self, rows: &[NodeRow]) -> Result<Vec<StoreId>> {
            self.record("nodes", rows.len())?;
            let mut ids = self.inner.insert_nodes(rows).await?;
            if self.drop_last_id {
                ids.pop();
            }
            Ok(ids)
        }

        async fn insert_ways(&self, rows: &[WayRow]) -> Result<Vec<StoreId>> {
            self.record("ways", rows.len())?;
            self.inner.insert_ways(rows).await
        }

        async fn insert_way_nodes(&self, rows: &[WayNodeRow]) -> Result<()> {
            self.record("way_nodes", rows.len())?;
            self.inner.insert_way_nodes(rows).await
        }

        async fn insert_segments(&self, rows: &[SegmentRow]) -> Result<Vec<StoreId>> {
            self.record("segments", rows.len())?;
            self.inner.insert_segments(rows).await
        }

        async fn insert_segment_nodes(&self, rows: &[SegmentNodeRow]) -> Result<()> {
            self.record("segment_nodes", rows.len())?;
            self.inner.insert_segment_nodes(rows).await
        }

        async fn nearest_segment(&self, point: Point<f64>) -> Result<Option<NearestSegment>> {
            self.inner.nearest_segment(point).await
        }

        async fn closest_point_on_segment(
            &self,
            segment_id: StoreId,
            point: Point<f64>,
        ) -> Result<Point<f64>> {
            self.inner.closest_point_on_segment(segment_id, point).await
        }

        async fn segment_geometry(&self, segment_id: StoreId) -> Result<LineString<f64>> {
            self.inner.segment_geometry(segment_id).await
        }

        async fn segment_count(&self) -> Result<u64> {
            self.inner.segment_count().await
        }
    }

    #[tokio::test]
    async fn phases_run_in_dependency_order() {
        let (network, _) = clean(crossing());
        let (arena, _) = segment_ways(&network.ways).unwrap();
        let store = RecordingStore::new();

        let report = NetworkImporter::new(&store)
            .import(&network, &arena)
            .await
            .unwrap();

        assert_eq!(
            store.phases(),
            vec!["nodes", "ways", "way_nodes", "segments", "segment_nodes"]
        );
        assert_eq!(report.nodes, 7);
        assert_eq!(report.ways, 2);
        assert_eq!(report.way_nodes, 8);
        // both ways split at node 3
        assert_eq!(report.segments, 4);
        assert_eq!(report.segment_nodes, 3 + 3 + 2 + 2);
        assert_eq!(report.flushes, 5);
    }

    #[tokio::test]
    async fn small_batches_keep_ids_consistent() {
        let (network, _) = clean(crossing());
        let (arena, _) = segment_ways(&network.ways).unwrap();
        let store = RecordingStore::new();

        let report = NetworkImporter::new(&store)
            .with_batch_size(3)
            .import(&network, &arena)
            .await
            .unwrap();

        assert_eq!(store.sizes("nodes"), vec![3, 3, 1]);
        assert_eq!(store.sizes("ways"), vec![2]);
        assert_eq!(store.sizes("way_nodes"), vec![3, 3, 2]);
        assert_eq!(store.sizes("segments"), vec![3, 1]);
        assert_eq!(store.sizes("segment_nodes"), vec![3, 3, 3, 1]);
        assert_eq!(report.flushes, 13);

        // every join row points at the node it was built from
        let ways = store.inner.way_nodes();
        let way_10: Vec<i64> = ways
            .iter()
            .filter(|r| store.inner.way(r.way_id).unwrap().osm_id == OsmWayId(10))
            .map(|r| store.inner.node(r.node_id).unwrap().osm_id.0)
            .collect();
        assert_eq!(way_10, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn segment_rows_carry_way_tags_and_geometry() {
        let (network, _) = clean(crossing());
        let (arena, _) = segment_ways(&network.ways).unwrap();
        let store = MemoryStore::new();
        NetworkImporter::new(&store)
            .import(&network, &arena)
            .await
            .unwrap();

        let segments = store.segments();
        let (_, first) = &segments[0];
        assert_eq!(first.osm_way_id, OsmWayId(10));
        assert_eq!((first.index, first.size), (0, 2));
        assert_eq!(first.name.as_deref(), Some("Main Street"));
        assert!(first.oneway);
        assert_eq!(
            first.geometry,
            LineString::from(vec![(0.0, 0.0), (1.0, 0.0), (2.0, 0.0)])
        );

        let (second_id, second) = &segments[1];
        assert_eq!((second.index, second.size), (1, 2));
        let rows: Vec<_> = store
            .segment_nodes()
            .into_iter()
            .filter(|r| r.segment_id == *second_id)
            .collect();
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|r| r.size == 3));
        assert_eq!(store.node(rows[0].node_id).unwrap().osm_id, OsmNodeId(3));
    }

    #[tokio::test]
    async fn store_failure_aborts_later_phases() {
        let (network, _) = clean(crossing());
        let (arena, _) = segment_ways(&network.ways).unwrap();
        let store = RecordingStore {
            fail_on: Some("segments"),
            ..RecordingStore::new()
        };

        let result = NetworkImporter::new(&store).import(&network, &arena).await;
        assert!(matches!(result, Err(PipelineError::StoreWriteFailure(_))));
        assert!(store.sizes("segment_nodes").is_empty());
    }

    #[tokio::test]
    async fn short_id_list_is_a_write_failure() {
        let (network, _) = clean(crossing());
        let (arena, _) = segment_ways(&network.ways).unwrap();
        let store = RecordingStore {
            drop_last_id: true,
            ..RecordingStore::new()
        };

        let result = NetworkImporter::new(&store).import(&network, &arena).await;
        assert!(matches!(result, Err(PipelineError::StoreWriteFailure(_))));
        assert_eq!(store.phases(), vec!["nodes"]);
    }

    #[tokio::test]
    async fn segments_of_unknown_ways_are_invariant_violations() {
        let (network, _) = clean(crossing());
        let mut other = network.clone();
        other
            .ways
            .insert(OsmWayId(30), OsmWay::new(30, &[1, 6], &[("highway", "service")]));
        let (arena, _) = segment_ways(&other.ways).unwrap();

        let store = MemoryStore::new();
        let result = NetworkImporter::new(&store).import(&network, &arena).await;
        assert!(matches!(result, Err(PipelineError::InvariantViolation(_))));
    }

    #[tokio::test]
    async fn empty_network_writes_nothing() {
        let store = RecordingStore::new();
        let report = NetworkImporter::new(&store)
            .import(&RoadNetwork::new(), &SegmentArena::default())
            .await
            .unwrap();
        assert_eq!(report, ImportReport::default());
        assert!(store.phases().is_empty());
    }

    #[test]
    fn id_map_reports_missing_keys() {
        let mut ids = IdMap::new("node");
        ids.record(&[OsmNodeId(1)], &[StoreId(7)]).unwrap();
        assert_eq!(ids.get(OsmNodeId(1)).unwrap(), StoreId(7));
        assert!(matches!(
            ids.get(OsmNodeId(2)),
            Err(PipelineError::InvariantViolation(_))
        ));
        assert!(matches!(
            ids.record(&[OsmNodeId(2), OsmNodeId(3)], &[StoreId(8)]),
            Err(PipelineError::StoreWriteFailure(_))
        ));
    }
}
