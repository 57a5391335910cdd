//! Error types for the TrackLab model.

use std::fmt;

use thiserror::Error;

use crate::spot::SpotId;
use crate::tracklab_graph::EdgeKey;
use crate::tracklab_tracks::TrackIndex;

/// A reference to something the model can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityRef {
    Spot(SpotId),
    Edge(EdgeKey),
    Track(TrackIndex),
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityRef::Spot(id) => write!(f, "spot {}", id),
            EntityRef::Edge(key) => write!(f, "edge {}", key),
            EntityRef::Track(index) => write!(f, "track {}", index),
        }
    }
}

/// Errors raised by model operations.
///
/// Topology errors are fatal to the attempted operation only; the model
/// stays consistent and usable.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ModelError {
    /// An entity with this identifier is already present
    #[error("Duplicate entity: {0}")]
    DuplicateEntity(EntityRef),

    /// The referenced entity does not exist
    #[error("Not found: {0}")]
    NotFound(EntityRef),

    /// Self-loop or duplicate link
    #[error("Invalid edge {source_id} -> {target_id}: {reason}")]
    InvalidEdge {
        source_id: SpotId,
        target_id: SpotId,
        reason: String,
    },

    /// A feature name is already owned by another analyzer or catalog
    #[error("Feature '{feature}' is already declared by '{owner}'")]
    FeatureConflict { feature: String, owner: String },

    /// An analyzer with this key is already registered
    #[error("Analyzer already registered: {0}")]
    DuplicateAnalyzer(String),

    /// No analyzer registered under this key
    #[error("Unknown analyzer: {0}")]
    UnknownAnalyzer(String),

    /// The identifier would leave the id counter nothing to hand out
    #[error("Spot id {0} is out of range")]
    IdOutOfRange(SpotId),

    /// An external collaborator (segmenter, tracker) failed
    #[error("Collaborator error: {0}")]
    Collaborator(String),
}

impl ModelError {
    /// Creates an invalid-edge error.
    pub fn invalid_edge(source_id: SpotId, target_id: SpotId, reason: impl Into<String>) -> Self {
        Self::InvalidEdge {
            source_id,
            target_id,
            reason: reason.into(),
        }
    }

    /// Creates a collaborator error.
    pub fn collaborator(msg: impl fmt::Display) -> Self {
        Self::Collaborator(msg.to_string())
    }
}
