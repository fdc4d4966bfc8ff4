use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("malformed input: {0}")]
    MalformedInput(String),
    #[error("invariant violated: {0}")]
    InvariantViolation(String),
    #[error("failure writing to store: {0}")]
    StoreWriteFailure(String),
    #[error("failure reading from store: {0}")]
    StoreReadFailure(String),
    #[error("no candidate segment for fix ({lng}, {lat}): store holds no segments")]
    NoCandidateSegment { lng: f64, lat: f64 },
    #[error("invalid run configuration: {0}")]
    Configuration(String),
    #[error("unable to convert WKT into geometry: {0}")]
    InvalidWkt(String),
    #[error("failure reading .pbf file: {source}")]
    Pbf {
        #[from]
        source: osmpbf::Error,
    },
    #[error("i/o failure: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, PipelineError>;
