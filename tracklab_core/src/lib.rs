//! TrackLab Core - Spot/Track Graph and Feature Aggregation
//!
//! This library holds detected spots and their links as one graph and keeps
//! three derived views of it consistent under editing:
//! 1. **Tracks**: connected components with stable integer indices
//! 2. **Features**: named numbers per spot, link and track, computed by
//!    pluggable analyzers in parallel
//! 3. **Visibility**: threshold filters over track features, failing closed
//!    on values that were never computed
//!
//! Segmentation and linking stay outside; see [`collaborators`].

pub mod analyzers;
pub mod collaborators;
pub mod error;
pub mod export;
pub mod model;
pub mod settings;
pub mod snapshot;
pub mod spot;
pub mod tracklab_features;
pub mod tracklab_filter;
pub mod tracklab_graph;
pub mod tracklab_tracks;
pub mod values;

// Re-export key types for convenience
pub use collaborators::{LinkProposal, LinkingOutcome, SegmentationOutcome, Segmenter, Tracker};
pub use error::{EntityRef, ModelError};
pub use export::StatsTables;
pub use model::{Model, ModelHandle};
pub use settings::{SegmenterSettings, SegmenterType, Settings, SettingsError, TrackerSettings};
pub use snapshot::ModelSnapshot;
pub use spot::{Spot, SpotId};
pub use tracklab_features::{
    Analyzer, AnalyzerError, CancelToken, ComputationReport, FeatureAnalyzer, FeatureModel, FeatureTarget,
};
pub use tracklab_filter::{FeatureFilter, FilterDirection, FilterEngine};
pub use tracklab_graph::{Edge, EdgeKey, TrackGraph};
pub use tracklab_tracks::{RebuildSummary, Track, TrackIndex, TrackModel};
pub use values::{FeatureMap, FeatureValue};
