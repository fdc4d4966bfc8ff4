pub mod memory;
pub mod postgis;
pub mod wkt_codec;

use async_trait::async_trait;
use geo::{Coord, LineString, Point};

use crate::error::Result;
use crate::osm_model::{OsmNodeId, OsmWayId, StoreId};

pub use memory::MemoryStore;
pub use postgis::PostgisStore;

#[derive(Debug, Clone, PartialEq)]
pub struct NodeRow {
    pub osm_id: OsmNodeId,
    pub coordinate: Coord<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WayRow {
    pub osm_id: OsmWayId,
    pub name: Option<String>,
    pub highway: Option<String>,
    pub oneway: bool,
    pub path: LineString<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WayNodeRow {
    pub way_id: StoreId,
    pub node_id: StoreId,
    pub index: i32,
    pub size: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SegmentRow {
    /// Store id of the parent way
    pub way_id: StoreId,
    pub osm_way_id: OsmWayId,
    pub index: i32,
    pub size: i32,
    pub name: Option<String>,
    pub highway: Option<String>,
    pub oneway: bool,
    pub geometry: LineString<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentNodeRow {
    pub segment_id: StoreId,
    pub node_id: StoreId,
    pub index: i32,
    pub size: i32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NearestSegment {
    pub segment_id: StoreId,
    pub osm_way_id: OsmWayId,
    /// Planar distance in the store's coordinate units (degrees for SRID 4326)
    pub distance: f64,
}

/// Insert methods return store ids in submission order.
#[async_trait]
pub trait SpatialStore: Send + Sync {
    async fn insert_nodes(&self, rows: &[NodeRow]) -> Result<Vec<StoreId>>;

    async fn insert_ways(&self, rows: &[WayRow]) -> Result<Vec<StoreId>>;

    async fn insert_way_nodes(&self, rows: &[WayNodeRow]) -> Result<()>;

    async fn insert_segments(&self, rows: &[SegmentRow]) -> Result<Vec<StoreId>>;

    async fn insert_segment_nodes(&self, rows: &[SegmentNodeRow]) -> Result<()>;

    /// Segment with minimum distance to `point`; equidistant segments resolve to
    /// the lowest segment id. `None` when the store holds no segments.
    async fn nearest_segment(&self, point: Point<f64>) -> Result<Option<NearestSegment>>;

    async fn closest_point_on_segment(
        &self,
        segment_id: StoreId,
        point: Point<f64>,
    ) -> Result<Point<f64>>;

    async fn segment_geometry(&self, segment_id: StoreId) -> Result<LineString<f64>>;

    async fn segment_count(&self) -> Result<u64>;
}
