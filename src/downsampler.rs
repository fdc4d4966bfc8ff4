use geo::Point;
use log::trace;

const EARTH_RADIUS_KM: f64 = 6371.0;

/// Drops fixes that sit closer than `min_distance_m` to the last accepted one.
///
/// Distances use the equirectangular approximation, which is cheap and accurate
/// enough for consecutive GPS fixes a few hundred meters apart.
#[derive(Debug, Clone)]
pub struct Downsampler {
    min_distance_m: f64,
    last: Option<Point<f64>>,
}

impl Default for Downsampler {
    fn default() -> Self {
        Self::new(100.0)
    }
}

impl Downsampler {
    pub fn new(min_distance_m: f64) -> Self {
        Self {
            min_distance_m,
            last: None,
        }
    }

    /// Meters between two `(lng, lat)` points in degrees.
    pub fn distance(from: Point<f64>, to: Point<f64>) -> f64 {
        let (lat1, lng1) = (from.y().to_radians(), from.x().to_radians());
        let (lat2, lng2) = (to.y().to_radians(), to.x().to_radians());
        let x = (lng2 - lng1) * ((lat1 + lat2) / 2.0).cos();
        let y = lat2 - lat1;
        (x * x + y * y).sqrt() * EARTH_RADIUS_KM * 1000.0
    }

    /// Whether `point` is kept. Accepted points become the new reference.
    pub fn accept(&mut self, point: Point<f64>) -> bool {
        let Some(last) = self.last else {
            self.last = Some(point);
            return true;
        };

        let distance = Self::distance(last, point);
        if distance >= self.min_distance_m {
            self.last = Some(point);
            return true;
        }
        trace!("dropping fix {:?}, {:.1}m from last accepted", point, distance);
        false
    }
}
