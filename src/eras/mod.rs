//! Listening-history eras: segmentation, summaries and the pipeline tying them together.

pub mod model;
pub mod pipeline;
pub mod segment;
pub mod summarize;

pub use model::{Era, FeatureKind};
pub use pipeline::{EraPipeline, FeatureProvider, TrackStore};
pub use segment::SegmentationPolicy;
