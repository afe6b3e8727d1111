pub mod cli;
pub mod commands;
pub mod contour;
pub mod cosmology;
pub mod crossmatch;
pub mod db;
pub mod duplicates;
pub mod error;
pub mod fetch;
pub mod models;
pub mod morphology;
pub mod pipeline;
pub mod radio_image;
pub mod utils;
pub mod wcs;

// Re-export commonly used items
pub use error::{ContourError, FetchError, PipelineError, PipelineResult};
pub use models::{CatalogEntry, ConsensusRecord, Subject, Survey};
pub use pipeline::{build_catalog, Collaborators, MergeEngine, PipelineConfig};
