use async_trait::async_trait;
use geo::{LineString, Point};
use log::{debug, warn};
use serde::Serialize;
use serde_json::{Value, json};
use std::time::Duration;

use crate::error::{PipelineError, Result};
use crate::mapmatcher::MatchList;
use crate::store::SpatialStore;

/// Leaflet-style path options understood by the map viewer.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DrawStyle {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weight: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub radius: Option<u32>,
    #[serde(rename = "fillOpacity", skip_serializing_if = "Option::is_none")]
    pub fill_opacity: Option<f64>,
}

impl DrawStyle {
    pub fn color(color: &str) -> Self {
        Self {
            color: Some(color.to_string()),
            ..Self::default()
        }
    }

    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = Some(weight);
        self
    }

    pub fn with_radius(mut self, radius: u32) -> Self {
        self.radius = Some(radius);
        self
    }

    pub fn with_fill_opacity(mut self, fill_opacity: f64) -> Self {
        self.fill_opacity = Some(fill_opacity);
        self
    }
}

/// Fire-and-forget drawing calls. Implementations swallow their own failures.
#[async_trait]
pub trait DrawingSink: Send + Sync {
    async fn draw_line(&self, points: &[Point<f64>], style: &DrawStyle);

    async fn draw_point(&self, point: Point<f64>, style: &DrawStyle);

    async fn draw_points(&self, points: &[Point<f64>], style: &DrawStyle);
}

pub struct NoopDrawingSink;

#[async_trait]
impl DrawingSink for NoopDrawingSink {
    async fn draw_line(&self, _points: &[Point<f64>], _style: &DrawStyle) {}

    async fn draw_point(&self, _point: Point<f64>, _style: &DrawStyle) {}

    async fn draw_points(&self, _points: &[Point<f64>], _style: &DrawStyle) {}
}

/// Viewer coordinates are `[lat, lng]`.
fn lat_lng(point: &Point<f64>) -> [f64; 2] {
    [point.y(), point.x()]
}

/// Builds the `param` form field: `[coordinates, style]` as JSON.
pub fn command_param(coordinates: Value, style: &DrawStyle) -> String {
    json!([coordinates, style]).to_string()
}

/// Posts `cmd`/`param` form requests to a map viewer's update endpoint.
pub struct HttpDrawingSink {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpDrawingSink {
    pub fn new(endpoint: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| PipelineError::Configuration(format!("http client init failed: {e}")))?;
        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
        })
    }

    async fn call(&self, cmd: &str, param: String) {
        let response = self
            .client
            .post(&self.endpoint)
            .form(&[("cmd", cmd), ("param", param.as_str())])
            .send()
            .await;
        match response {
            Ok(response) if response.status().is_success() => {
                debug!("{} sent to {}", cmd, self.endpoint);
            }
            Ok(response) => {
                warn!("{} rejected by {}: HTTP {}", cmd, self.endpoint, response.status());
            }
            Err(e) => warn!("{} to {} failed: {}", cmd, self.endpoint, e),
        }
    }
}

#[async_trait]
impl DrawingSink for HttpDrawingSink {
    async fn draw_line(&self, points: &[Point<f64>], style: &DrawStyle) {
        let coords: Vec<[f64; 2]> = points.iter().map(lat_lng).collect();
        self.call("drawLine", command_param(json!(coords), style))
            .await;
    }

    async fn draw_point(&self, point: Point<f64>, style: &DrawStyle) {
        self.call("drawPoint", command_param(json!(lat_lng(&point)), style))
            .await;
    }

    async fn draw_points(&self, points: &[Point<f64>], style: &DrawStyle) {
        let coords: Vec<[f64; 2]> = points.iter().map(lat_lng).collect();
        self.call("drawPoints", command_param(json!(coords), style))
            .await;
    }
}

fn line_coordinates(line: &LineString<f64>) -> Vec<[f64; 2]> {
    line.coords().map(|c| [c.x, c.y]).collect()
}

/// FeatureCollection of matched segments in match order.
pub async fn matches_to_geojson<S: SpatialStore + ?Sized>(
    store: &S,
    matches: &MatchList,
) -> Result<Value> {
    let mut features = Vec::with_capacity(matches.len());

    for (order, matched) in matches.iter().enumerate() {
        let geometry = store.segment_geometry(matched.segment_id).await?;
        features.push(json!({
            "type": "Feature",
            "properties": {
                "segment_id": matched.segment_id.0,
                "osm_way_id": matched.osm_way_id.0,
                "order": order,
            },
            "geometry": {
                "type": "LineString",
                "coordinates": line_coordinates(&geometry)
            }
        }));
    }

    Ok(json!({
        "type": "FeatureCollection",
        "features": features
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapmatcher::SegmentMatch;
    use crate::osm_model::{OsmWayId, StoreId};
    use crate::store::{MemoryStore, SegmentRow, WayRow};
    use geo::line_string;

    #[test]
    fn style_uses_viewer_option_names() {
        let style = DrawStyle::color("blue")
            .with_radius(7)
            .with_weight(1)
            .with_fill_opacity(0.4);
        assert_eq!(
            serde_json::to_value(&style).unwrap(),
            json!({"color": "blue", "weight": 1, "radius": 7, "fillOpacity": 0.4})
        );
        assert_eq!(
            serde_json::to_value(DrawStyle::color("red")).unwrap(),
            json!({"color": "red"})
        );
    }

    #[test]
    fn param_swaps_to_lat_lng() {
        let param = command_param(json!(lat_lng(&Point::new(106.8, -6.2))), &DrawStyle::color("blue"));
        assert_eq!(param, r#"[[-6.2,106.8],{"color":"blue"}]"#);
    }

    #[tokio::test]
    async fn unreachable_viewer_does_not_fail() {
        let sink = HttpDrawingSink::new("http://127.0.0.1:9/update").unwrap();
        sink.draw_point(Point::new(0.0, 0.0), &DrawStyle::default()).await;
        sink.draw_line(&[Point::new(0.0, 0.0), Point::new(1.0, 1.0)], &DrawStyle::default())
            .await;
    }

    #[tokio::test]
    async fn geojson_lists_matches_in_order() {
        let store = MemoryStore::new();
        let way_ids = store
            .insert_ways(&[WayRow {
                osm_id: OsmWayId(5),
                name: None,
                highway: Some(String::from("primary")),
                oneway: false,
                path: line_string![(x: 0.0, y: 0.0), (x: 2.0, y: 0.0)],
            }])
            .await
            .unwrap();
        let segment = |index, geometry| SegmentRow {
            way_id: way_ids[0],
            osm_way_id: OsmWayId(5),
            index,
            size: 2,
            name: None,
            highway: Some(String::from("primary")),
            oneway: false,
            geometry,
        };
        let ids = store
            .insert_segments(&[
                segment(0, line_string![(x: 0.0, y: 0.0), (x: 1.0, y: 0.0)]),
                segment(1, line_string![(x: 1.0, y: 0.0), (x: 2.0, y: 0.0)]),
            ])
            .await
            .unwrap();

        let mut matches = MatchList::default();
        matches.push(SegmentMatch { segment_id: ids[1], osm_way_id: OsmWayId(5) });
        matches.push(SegmentMatch { segment_id: ids[0], osm_way_id: OsmWayId(5) });

        let geojson = matches_to_geojson(&store, &matches).await.unwrap();
        let features = geojson["features"].as_array().unwrap();
        assert_eq!(features.len(), 2);
        assert_eq!(features[0]["properties"]["segment_id"], json!(ids[1].0));
        assert_eq!(features[0]["properties"]["order"], json!(0));
        assert_eq!(
            features[0]["geometry"]["coordinates"],
            json!([[1.0, 0.0], [2.0, 0.0]])
        );

        matches.push(SegmentMatch { segment_id: StoreId(99), osm_way_id: OsmWayId(5) });
        assert!(matches_to_geojson(&store, &matches).await.is_err());
    }
}
