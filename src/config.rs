use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;

use crate::error::{PipelineError, Result};

/// Top level run configuration, read from a `.json` file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub import: ImportConfig,
    pub matching: MatchConfig,
    pub draw: DrawConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportConfig {
    /// Rows buffered per entity kind before a store flush
    pub batch_size: usize,
    /// Restrict collected ways to these `highway` values. `None` keeps every road.
    pub highway_filter: Option<BTreeSet<String>>,
    /// Show a progress bar per persistence phase
    pub show_progress: bool,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            batch_size: 10_000,
            highway_filter: None,
            show_progress: true,
        }
    }
}

/// What the matcher does with a fix when the store has no segment to offer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoCandidatePolicy {
    /// Log, count the fix as skipped and continue with the next one
    Skip,
    /// Stop the run with `NoCandidateSegment`
    #[default]
    Abort,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchConfig {
    /// Minimum spacing between consecutive accepted fixes (meters)
    pub min_distance_m: f64,
    pub on_no_candidate: NoCandidatePolicy,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            min_distance_m: 100.0,
            on_no_candidate: NoCandidatePolicy::Abort,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DrawConfig {
    /// Map viewer update endpoint
    pub endpoint: String,
}

impl Default for DrawConfig {
    fn default() -> Self {
        Self {
            endpoint: String::from("http://localhost:8000/update"),
        }
    }
}

impl RunConfig {
    pub fn validate(&self) -> Result<()> {
        if self.import.batch_size == 0 {
            return Err(PipelineError::Configuration(String::from(
                "import.batch_size must be greater than zero",
            )));
        }
        let d = self.matching.min_distance_m;
        if !d.is_finite() || d < 0.0 {
            return Err(PipelineError::Configuration(format!(
                "matching.min_distance_m must be a non-negative number, found {d}"
            )));
        }
        Ok(())
    }

    /// Defaults when no file is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let conf = match path {
            None => RunConfig::default(),
            Some(p) => {
                log::info!("reading run configuration from {}", p.display());
                RunConfig::try_from(p)?
            }
        };
        conf.validate()?;
        Ok(conf)
    }
}

impl TryFrom<&Path> for RunConfig {
    type Error = PipelineError;

    fn try_from(f: &Path) -> std::result::Result<Self, Self::Error> {
        if f.extension().is_some_and(|ext| ext == "json") {
            let s = std::fs::read_to_string(f).map_err(|e| {
                PipelineError::Configuration(format!("failure reading {}: {e}", f.display()))
            })?;
            serde_json::from_str(&s).map_err(|e| {
                PipelineError::Configuration(format!("failure decoding {}: {e}", f.display()))
            })
        } else {
            Err(PipelineError::Configuration(format!(
                "unsupported file type: {}",
                f.display()
            )))
        }
    }
}
