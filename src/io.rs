use geo::Point;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::error::{PipelineError, Result};

/// Reads a GPS track: one `lng lat` fix per line, whitespace separated.
/// Blank lines are skipped.
pub fn parse_track<R: BufRead>(reader: R) -> Result<Vec<Point<f64>>> {
    let mut points = Vec::new();
    for (i, bytes) in reader.split(b'\n').enumerate() {
        let line_no = i + 1;
        let line = String::from_utf8(bytes?).map_err(|_| {
            PipelineError::MalformedInput(format!("line {line_no}: not valid UTF-8"))
        })?;
        let fields: Vec<&str> = line.split_whitespace().collect();
        match fields.as_slice() {
            [] => continue,
            [lng, lat] => {
                let lng = parse_coordinate(lng, line_no)?;
                let lat = parse_coordinate(lat, line_no)?;
                points.push(Point::new(lng, lat));
            }
            _ => {
                return Err(PipelineError::MalformedInput(format!(
                    "line {line_no}: expected `lng lat`, found {} field(s)",
                    fields.len()
                )));
            }
        }
    }
    Ok(points)
}

fn parse_coordinate(field: &str, line_no: usize) -> Result<f64> {
    match field.parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(value),
        _ => Err(PipelineError::MalformedInput(format!(
            "line {line_no}: `{field}` is not a coordinate"
        ))),
    }
}

pub fn read_track_file(path: &Path) -> Result<Vec<Point<f64>>> {
    let file = File::open(path)?;
    parse_track(BufReader::new(file))
}
