use geo::{Coord, LineString, Point};
use wkt::{ToWkt, TryFromWkt};

use crate::error::{PipelineError, Result};

// SRID 4326, x is longitude
pub fn point_wkt(point: Point<f64>) -> String {
    point.wkt_string()
}

pub fn line_wkt(coords: &[Coord<f64>]) -> String {
    LineString::from(coords.to_vec()).wkt_string()
}

pub fn parse_point(text: &str) -> Result<Point<f64>> {
    Point::try_from_wkt_str(text).map_err(|e| PipelineError::InvalidWkt(format!("{text}: {e}")))
}

pub fn parse_line(text: &str) -> Result<LineString<f64>> {
    LineString::try_from_wkt_str(text)
        .map_err(|e| PipelineError::InvalidWkt(format!("{text}: {e}")))
}
