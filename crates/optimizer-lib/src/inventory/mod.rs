//! Inventory pipeline
//!
//! Pulls the fleet from a [`CloudAdapter`](crate::cloud::CloudAdapter) and
//! publishes an immutable [`ResourceSnapshot`](crate::models::ResourceSnapshot)
//! together with the metrics and suggestions derived from it. Readers clone
//! an `Arc` to the current value and never block a refresh for longer than
//! the pointer copy.

mod cache;
mod pipeline;

pub use cache::SnapshotCache;
pub use pipeline::{InventoryPipeline, PipelineConfig, RefreshOutcome, SuggestionSet};
