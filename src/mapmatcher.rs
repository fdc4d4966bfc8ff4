use geo::Point;
use log::{debug, info, warn};
use std::collections::HashSet;
use std::time::Instant;

use crate::config::{MatchConfig, NoCandidatePolicy};
use crate::debug::{DrawStyle, DrawingSink};
use crate::downsampler::Downsampler;
use crate::error::{PipelineError, Result};
use crate::osm_model::{OsmWayId, StoreId};
use crate::store::SpatialStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SegmentMatch {
    pub segment_id: StoreId,
    pub osm_way_id: OsmWayId,
}

/// Matched segments in first-visit order, without repeats.
#[derive(Debug, Clone, Default)]
pub struct MatchList {
    items: Vec<SegmentMatch>,
    seen: HashSet<StoreId>,
}

impl MatchList {
    /// Appends `item` unless its segment is already listed. Returns whether it
    /// was added.
    pub fn push(&mut self, item: SegmentMatch) -> bool {
        if !self.seen.insert(item.segment_id) {
            return false;
        }
        self.items.push(item);
        true
    }

    pub fn iter(&self) -> impl Iterator<Item = &SegmentMatch> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn as_slice(&self) -> &[SegmentMatch] {
        &self.items
    }

    pub fn segment_ids(&self) -> Vec<StoreId> {
        self.items.iter().map(|m| m.segment_id).collect()
    }
}

#[derive(Debug, Clone, Default)]
pub struct MatchOutcome {
    pub matches: MatchList,
    /// Fixes offered to the matcher
    pub total: usize,
    /// Fixes that passed the downsampler
    pub accepted: usize,
    /// Accepted fixes left unmatched because the store had no segment
    pub skipped: usize,
}

impl MatchOutcome {
    pub fn log(&self) {
        info!("Matched:");
        info!("- fixes: {}", self.total);
        info!("- accepted fixes: {}", self.accepted);
        info!("- skipped fixes: {}", self.skipped);
        info!("- segments: {}", self.matches.len());
    }
}

fn fix_style() -> DrawStyle {
    DrawStyle::color("blue")
        .with_radius(7)
        .with_weight(1)
        .with_fill_opacity(0.4)
}

fn segment_style() -> DrawStyle {
    DrawStyle::color("red")
}

fn segment_nodes_style() -> DrawStyle {
    DrawStyle::color("green").with_radius(2)
}

fn projection_style() -> DrawStyle {
    DrawStyle::color("blue").with_weight(5)
}

pub struct MapMatcher<'a, S: SpatialStore + ?Sized, D: DrawingSink + ?Sized> {
    store: &'a S,
    sink: &'a D,
    config: MatchConfig,
}

impl<'a, S: SpatialStore + ?Sized, D: DrawingSink + ?Sized> MapMatcher<'a, S, D> {
    pub fn new(store: &'a S, sink: &'a D, config: MatchConfig) -> Self {
        Self {
            store,
            sink,
            config,
        }
    }

    pub async fn match_track(&self, points: &[Point<f64>]) -> Result<MatchOutcome> {
        let start_time = Instant::now();
        let mut downsampler = Downsampler::new(self.config.min_distance_m);
        let mut outcome = MatchOutcome {
            total: points.len(),
            ..MatchOutcome::default()
        };

        for &fix in points {
            if !downsampler.accept(fix) {
                continue;
            }
            outcome.accepted += 1;
            self.match_fix(fix, &mut outcome).await?;
        }

        info!(
            "Matched {} of {} fixes onto {} segments in {:?}",
            outcome.accepted - outcome.skipped,
            outcome.total,
            outcome.matches.len(),
            start_time.elapsed()
        );
        Ok(outcome)
    }

    async fn match_fix(&self, fix: Point<f64>, outcome: &mut MatchOutcome) -> Result<()> {
        self.sink.draw_point(fix, &fix_style()).await;

        let Some(nearest) = self.store.nearest_segment(fix).await? else {
            return match self.config.on_no_candidate {
                NoCandidatePolicy::Skip => {
                    warn!("no segment for fix ({}, {}), skipping", fix.x(), fix.y());
                    outcome.skipped += 1;
                    Ok(())
                }
                NoCandidatePolicy::Abort => Err(PipelineError::NoCandidateSegment {
                    lng: fix.x(),
                    lat: fix.y(),
                }),
            };
        };

        let is_new = outcome.matches.push(SegmentMatch {
            segment_id: nearest.segment_id,
            osm_way_id: nearest.osm_way_id,
        });
        if is_new {
            let geometry = self.store.segment_geometry(nearest.segment_id).await?;
            let nodes: Vec<Point<f64>> = geometry.points().collect();
            self.sink.draw_line(&nodes, &segment_style()).await;
            self.sink.draw_points(&nodes, &segment_nodes_style()).await;
        }

        let closest = self
            .store
            .closest_point_on_segment(nearest.segment_id, fix)
            .await?;
        self.sink
            .draw_line(&[fix, closest], &projection_style())
            .await;

        debug!(
            "{} / {} => {} {} => {}",
            outcome.accepted,
            outcome.total,
            fix.x(),
            fix.y(),
            nearest.osm_way_id
        );
        Ok(())
    }
}
