use async_trait::async_trait;
use geo::{LineString, Point};
use log::trace;
use sea_orm::{ConnectionTrait, DbBackend, DbErr, QueryResult, Statement, Value};
use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;

use super::wkt_codec::{line_wkt, parse_line, parse_point, point_wkt};
use super::{
    NearestSegment, NodeRow, SegmentNodeRow, SegmentRow, SpatialStore, WayNodeRow, WayRow,
};
use crate::error::{PipelineError, Result};
use crate::osm_model::{OsmWayId, StoreId};

/// Postgres refuses statements with more bind parameters than this.
const MAX_BIND_PARAMS: usize = 65_535;

const NODE_ROW: &str = "(?, ST_GeomFromText(?, 4326))";
const WAY_ROW: &str = "(?, ?, ?, ?, ST_GeomFromText(?, 4326))";
const WAY_NODE_ROW: &str = "(?, ?, ?, ?)";
const SEGMENT_ROW: &str = "(?, ?, ?, ?, ?, ?, ?, ST_GeomFromText(?, 4326))";
const SEGMENT_NODE_ROW: &str = "(?, ?, ?, ?)";

/// Repeats `row_template` `rows` times and numbers every `?` as `$1..$n`.
fn values_clause(row_template: &str, rows: usize) -> String {
    let mut out = String::new();
    let mut n = 0;
    for r in 0..rows {
        if r > 0 {
            out.push_str(", ");
        }
        for ch in row_template.chars() {
            if ch == '?' {
                n += 1;
                out.push('$');
                out.push_str(&n.to_string());
            } else {
                out.push(ch);
            }
        }
    }
    out
}

fn columns(row_template: &str) -> usize {
    row_template.matches('?').count()
}

fn write_err(e: DbErr) -> PipelineError {
    PipelineError::StoreWriteFailure(e.to_string())
}

fn read_err(e: DbErr) -> PipelineError {
    PipelineError::StoreReadFailure(e.to_string())
}

/// Lines up `RETURNING` rows with the submitted rows by natural key. The store
/// is free to return rows in any order, but every key must come back exactly
/// once.
fn order_ids<K>(submitted: &[&K], returned: Vec<(K, StoreId)>) -> Result<Vec<StoreId>>
where
    K: Eq + Hash + Debug,
{
    if returned.len() != submitted.len() {
        return Err(PipelineError::StoreWriteFailure(format!(
            "submitted {} rows, store returned {} ids",
            submitted.len(),
            returned.len()
        )));
    }

    let mut by_key = HashMap::with_capacity(returned.len());
    for (key, id) in returned {
        if by_key.contains_key(&key) {
            return Err(PipelineError::StoreWriteFailure(format!(
                "store returned row {key:?} twice"
            )));
        }
        by_key.insert(key, id);
    }

    submitted
        .iter()
        .map(|key| {
            by_key.get(*key).copied().ok_or_else(|| {
                PipelineError::StoreWriteFailure(format!("no id returned for row {key:?}"))
            })
        })
        .collect()
}

/// PostGIS-backed store. Works on a plain connection or inside a transaction;
/// the caller owns commit/rollback.
pub struct PostgisStore<'a, C: ConnectionTrait> {
    db: &'a C,
}

impl<'a, C: ConnectionTrait> PostgisStore<'a, C> {
    pub fn new(db: &'a C) -> Self {
        Self { db }
    }

    fn statement(sql: String, values: Vec<Value>) -> Statement {
        Statement::from_sql_and_values(DbBackend::Postgres, sql, values)
    }

    async fn insert_plain(
        &self,
        insert: &str,
        row_template: &str,
        rows: Vec<Vec<Value>>,
    ) -> Result<()> {
        let per_statement = MAX_BIND_PARAMS / columns(row_template);
        for chunk in rows.chunks(per_statement) {
            let sql = format!("{insert} VALUES {}", values_clause(row_template, chunk.len()));
            let values: Vec<Value> = chunk.iter().flatten().cloned().collect();
            self.db
                .execute(Self::statement(sql, values))
                .await
                .map_err(write_err)?;
        }
        Ok(())
    }

    /// Inserts rows with `RETURNING` and hands back the new ids in submission
    /// order, matched up by a natural key rather than trusting row order.
    async fn insert_returning<K, F>(
        &self,
        insert: &str,
        row_template: &str,
        returning: &str,
        rows: Vec<(K, Vec<Value>)>,
        key_of: F,
    ) -> Result<Vec<StoreId>>
    where
        K: Eq + Hash + Debug + Send + Sync,
        F: Fn(&QueryResult) -> std::result::Result<K, DbErr> + Send + Sync,
    {
        let per_statement = MAX_BIND_PARAMS / columns(row_template);
        let mut ids = Vec::with_capacity(rows.len());

        for chunk in rows.chunks(per_statement) {
            let sql = format!(
                "{insert} VALUES {} RETURNING {returning}",
                values_clause(row_template, chunk.len())
            );
            let values: Vec<Value> = chunk.iter().flat_map(|(_, v)| v.iter().cloned()).collect();
            let returned = self
                .db
                .query_all(Self::statement(sql, values))
                .await
                .map_err(write_err)?;

            let returned = returned
                .iter()
                .map(|row| {
                    let id: i64 = row.try_get("", "id")?;
                    Ok((key_of(row)?, StoreId(id)))
                })
                .collect::<std::result::Result<Vec<_>, DbErr>>()
                .map_err(write_err)?;
            let submitted: Vec<&K> = chunk.iter().map(|(key, _)| key).collect();
            ids.extend(order_ids(&submitted, returned)?);
            trace!("inserted {} rows: {}", chunk.len(), insert);
        }

        Ok(ids)
    }
}

#[async_trait]
impl<C: ConnectionTrait> SpatialStore for PostgisStore<'_, C> {
    async fn insert_nodes(&self, rows: &[NodeRow]) -> Result<Vec<StoreId>> {
        let rows = rows
            .iter()
            .map(|r| {
                let values: Vec<Value> = vec![
                    r.osm_id.0.into(),
                    point_wkt(Point::from(r.coordinate)).into(),
                ];
                (r.osm_id.0, values)
            })
            .collect();
        self.insert_returning(
            "INSERT INTO mm_node (osm_id, coord)",
            NODE_ROW,
            "id, osm_id",
            rows,
            |row| row.try_get::<i64>("", "osm_id"),
        )
        .await
    }

    async fn insert_ways(&self, rows: &[WayRow]) -> Result<Vec<StoreId>> {
        let rows = rows
            .iter()
            .map(|r| {
                let values: Vec<Value> = vec![
                    r.osm_id.0.into(),
                    r.name.clone().into(),
                    r.highway.clone().into(),
                    r.oneway.into(),
                    line_wkt(&r.path.0).into(),
                ];
                (r.osm_id.0, values)
            })
            .collect();
        self.insert_returning(
            "INSERT INTO mm_way (osm_id, name, highway, oneway, path)",
            WAY_ROW,
            "id, osm_id",
            rows,
            |row| row.try_get::<i64>("", "osm_id"),
        )
        .await
    }

    async fn insert_way_nodes(&self, rows: &[WayNodeRow]) -> Result<()> {
        let rows = rows
            .iter()
            .map(|r| {
                vec![
                    r.way_id.0.into(),
                    r.node_id.0.into(),
                    r.index.into(),
                    r.size.into(),
                ]
            })
            .collect();
        self.insert_plain(
            r#"INSERT INTO mm_way_node (way_id, node_id, "index", size)"#,
            WAY_NODE_ROW,
            rows,
        )
        .await
    }

    async fn insert_segments(&self, rows: &[SegmentRow]) -> Result<Vec<StoreId>> {
        let rows = rows
            .iter()
            .map(|r| {
                let values: Vec<Value> = vec![
                    r.way_id.0.into(),
                    r.osm_way_id.0.into(),
                    r.index.into(),
                    r.size.into(),
                    r.name.clone().into(),
                    r.highway.clone().into(),
                    r.oneway.into(),
                    line_wkt(&r.geometry.0).into(),
                ];
                ((r.osm_way_id.0, r.index), values)
            })
            .collect();
        self.insert_returning(
            r#"INSERT INTO mm_segment (way_id, osm_id, "index", size, name, highway, oneway, geometry)"#,
            SEGMENT_ROW,
            r#"id, osm_id, "index""#,
            rows,
            |row| Ok((row.try_get::<i64>("", "osm_id")?, row.try_get::<i32>("", "index")?)),
        )
        .await
    }

    async fn insert_segment_nodes(&self, rows: &[SegmentNodeRow]) -> Result<()> {
        let rows = rows
            .iter()
            .map(|r| {
                vec![
                    r.segment_id.0.into(),
                    r.node_id.0.into(),
                    r.index.into(),
                    r.size.into(),
                ]
            })
            .collect();
        self.insert_plain(
            r#"INSERT INTO mm_segment_node (segment_id, node_id, "index", size)"#,
            SEGMENT_NODE_ROW,
            rows,
        )
        .await
    }

    async fn nearest_segment(&self, point: Point<f64>) -> Result<Option<NearestSegment>> {
        // `<->` orders by exact geometry distance on PostGIS >= 2.2, and the
        // GiST index on mm_segment.geometry keeps this from scanning the table.
        let sql = r#"
            SELECT id, osm_id, ST_Distance(geometry, ST_GeomFromText($1, 4326)) AS distance
            FROM mm_segment
            ORDER BY geometry <-> ST_GeomFromText($1, 4326) ASC, id ASC
            LIMIT 1
        "#;
        let row = self
            .db
            .query_one(Self::statement(sql.to_string(), vec![point_wkt(point).into()]))
            .await
            .map_err(read_err)?;

        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(NearestSegment {
            segment_id: StoreId(row.try_get("", "id").map_err(read_err)?),
            osm_way_id: OsmWayId(row.try_get("", "osm_id").map_err(read_err)?),
            distance: row.try_get("", "distance").map_err(read_err)?,
        }))
    }

    async fn closest_point_on_segment(
        &self,
        segment_id: StoreId,
        point: Point<f64>,
    ) -> Result<Point<f64>> {
        let sql = r#"
            SELECT ST_AsText(ST_ClosestPoint(geometry, ST_GeomFromText($1, 4326))) AS wkt
            FROM mm_segment
            WHERE id = $2
        "#;
        let row = self
            .db
            .query_one(Self::statement(
                sql.to_string(),
                vec![point_wkt(point).into(), segment_id.0.into()],
            ))
            .await
            .map_err(read_err)?
            .ok_or_else(|| {
                PipelineError::StoreReadFailure(format!("segment {segment_id} not found"))
            })?;
        let text: String = row.try_get("", "wkt").map_err(read_err)?;
        parse_point(&text)
    }

    async fn segment_geometry(&self, segment_id: StoreId) -> Result<LineString<f64>> {
        let sql = "SELECT ST_AsText(geometry) AS wkt FROM mm_segment WHERE id = $1";
        let row = self
            .db
            .query_one(Self::statement(sql.to_string(), vec![segment_id.0.into()]))
            .await
            .map_err(read_err)?
            .ok_or_else(|| {
                PipelineError::StoreReadFailure(format!("segment {segment_id} not found"))
            })?;
        let text: String = row.try_get("", "wkt").map_err(read_err)?;
        parse_line(&text)
    }

    async fn segment_count(&self) -> Result<u64> {
        let sql = "SELECT COUNT(*) AS count FROM mm_segment";
        let row = self
            .db
            .query_one(Self::statement(sql.to_string(), vec![]))
            .await
            .map_err(read_err)?;
        let count: i64 = match row {
            Some(row) => row.try_get("", "count").map_err(read_err)?,
            None => 0,
        };
        Ok(count as u64)
    }
}
