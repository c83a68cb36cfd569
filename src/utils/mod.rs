//! Data loading and artifact persistence

pub mod artifacts;
pub mod data_loader;

pub use artifacts::{ArtifactStore, LocalArtifactStore};
pub use data_loader::{load_file, DataSource, DateRange, PartitionedSource};
