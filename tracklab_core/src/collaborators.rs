//! Seams to the external segmenter and tracker.
//!
//! Neither runs inside the core. The model ingests segmenter output as-is and
//! applies tracker proposals one by one, rejecting those that would break the
//! graph invariants.

use std::fmt;

use crate::error::ModelError;
use crate::settings::{SegmenterSettings, TrackerSettings};
use crate::spot::{Spot, SpotId};
use crate::tracklab_graph::{EdgeKey, TrackGraph};

/// Turns one frame of raw data into spot candidates.
pub trait Segmenter: Send + Sync {
    /// Raw per-frame input (an image, a point list, ...)
    type Frame: Sync;

    type Error: fmt::Display;

    fn segment(
        &self,
        settings: &SegmenterSettings,
        frame_index: usize,
        frame: &Self::Frame,
    ) -> Result<Vec<Spot>, Self::Error>;
}

/// Proposes links between spots already in the graph.
pub trait Tracker: Send + Sync {
    type Error: fmt::Display;

    fn link(&self, settings: &TrackerSettings, graph: &TrackGraph) -> Result<Vec<LinkProposal>, Self::Error>;
}

/// A link the tracker would like to add.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinkProposal {
    pub source: SpotId,
    pub target: SpotId,

    /// Link cost; `None` means the Euclidean distance between the spots
    pub weight: Option<f64>,
}

impl LinkProposal {
    pub fn new(source: SpotId, target: SpotId) -> Self {
        Self {
            source,
            target,
            weight: None,
        }
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = Some(weight);
        self
    }
}

/// Result of applying a batch of proposals.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LinkingOutcome {
    /// Edges that were added
    pub accepted: Vec<EdgeKey>,

    /// Proposals refused by the graph, with the reason
    pub rejected: Vec<(LinkProposal, ModelError)>,
}

impl LinkingOutcome {
    pub fn is_clean(&self) -> bool {
        self.rejected.is_empty()
    }
}

/// Result of ingesting segmenter output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SegmentationOutcome {
    /// Spots added, in frame order
    pub added: Vec<SpotId>,

    /// Spot count per frame index
    pub per_frame: Vec<(usize, usize)>,
}
