use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info};
use osmpbf::{Element, ElementReader};
use std::collections::BTreeSet;
use std::path::Path;
use std::time::Instant;

use crate::error::Result;
use crate::osm_model::{OsmNode, OsmNodeId, OsmWay, OsmWayId, RoadNetwork};

/// Collects the road-relevant subset of a PBF file.
pub struct OsmProcessor {
    highway_filter: Option<BTreeSet<String>>,
    show_progress: bool,
}

impl OsmProcessor {
    pub fn new() -> Self {
        Self {
            highway_filter: None,
            show_progress: true,
        }
    }

    pub fn with_highway_filter(mut self, highway_filter: Option<BTreeSet<String>>) -> Self {
        self.highway_filter = highway_filter;
        self
    }

    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    /// Every node and every way with an accepted `highway` tag. Relations are skipped.
    pub fn read_pbf(&self, pbf_path: &Path) -> Result<RoadNetwork> {
        let start_time = Instant::now();
        info!("Reading road network from {}", pbf_path.display());

        let pb = if self.show_progress {
            ProgressBar::new_spinner()
        } else {
            ProgressBar::hidden()
        };
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("[{elapsed_precise}] {spinner} {pos} elements - Extracting elements")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );

        let reader = ElementReader::from_path(pbf_path)?;
        let mut network = RoadNetwork::new();
        let mut skipped_ways = 0usize;

        reader.for_each(|element| {
            pb.inc(1);
            match element {
                Element::Node(node) => {
                    network.add_node(OsmNode::new(node.id(), node.lon(), node.lat()));
                }
                Element::DenseNode(node) => {
                    network.add_node(OsmNode::new(node.id(), node.lon(), node.lat()));
                }
                Element::Way(way) => {
                    let highway = way
                        .tags()
                        .find(|(key, _)| *key == "highway")
                        .map(|(_, value)| value);

                    let accepted = match (highway, &self.highway_filter) {
                        (None, _) => false,
                        (Some(_), None) => true,
                        (Some(h), Some(filter)) => filter.contains(h),
                    };
                    if !accepted {
                        skipped_ways += 1;
                        return;
                    }

                    network.add_way(OsmWay {
                        id: OsmWayId(way.id()),
                        refs: way.refs().map(OsmNodeId).collect(),
                        tags: way
                            .tags()
                            .map(|(k, v)| (k.to_string(), v.to_string()))
                            .collect(),
                    });
                }
                _ => {}
            }
        })?;

        pb.finish_and_clear();
        debug!("Skipped {} ways without an accepted highway tag", skipped_ways);
        info!(
            "Read {} nodes and {} highway ways in {:?}",
            network.nodes.len(),
            network.ways.len(),
            start_time.elapsed()
        );

        Ok(network)
    }
}

impl Default for OsmProcessor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;

    #[test]
    fn missing_file_is_a_pbf_error() {
        let result = OsmProcessor::new()
            .with_progress(false)
            .read_pbf(Path::new("/nonexistent/road.osm.pbf"));
        assert!(matches!(result, Err(PipelineError::Pbf { .. })));
    }
}
