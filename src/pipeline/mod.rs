//! Ingestion pipeline pieces: admission, preprocessing and mesh scheduling

pub mod ingestion;
pub mod preprocess;
pub mod scheduler;

pub use ingestion::{IngestOutcome, IngestionClock, Stream};
pub use preprocess::preprocess;
pub use scheduler::MeshUpdateTimer;
