pub mod config;
pub mod debug;
pub mod downsampler;
pub mod error;
pub mod ingest;
pub mod intersection_processor;
pub mod io;
pub mod mapmatcher;
pub mod network_cleaner;
pub mod osm_model;
pub mod osm_preprocessing;
pub mod store;
