//! Nearest-neighbour linker.
//!
//! Greedy and deterministic:
//! 1. Frame-to-frame: for every pair of consecutive frames, candidate links
//!    within `linking_max_distance` are accepted shortest first
//! 2. Gap closing: track ends are joined to track starts up to
//!    `max_frame_gap` frames later, within `gap_closing_max_distance`
//!
//! Every spot gets at most one forward and one backward link, counting the
//! links already in the graph. Ties are broken by spot id.

use std::collections::BTreeSet;
use thiserror::Error;
use tracing::debug;
use tracklab_core::{LinkProposal, Spot, SpotId, TrackGraph, Tracker, TrackerSettings};

#[derive(Debug, Error, PartialEq)]
pub enum LinkError {
    #[error("invalid tracker settings: {0}")]
    InvalidSettings(String),
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NearestNeighborLinker;

struct Candidate {
    distance: f64,
    source: SpotId,
    target: SpotId,
}

/// Spots that already have a forward (resp. backward) link.
#[derive(Default)]
struct Occupancy {
    forward: BTreeSet<SpotId>,
    backward: BTreeSet<SpotId>,
}

impl Occupancy {
    fn from_graph(graph: &TrackGraph) -> Self {
        let mut occupancy = Self::default();
        for edge in graph.edges() {
            occupancy.forward.insert(edge.source());
            occupancy.backward.insert(edge.target());
        }
        occupancy
    }

    fn is_free(&self, source: SpotId, target: SpotId) -> bool {
        !self.forward.contains(&source) && !self.backward.contains(&target)
    }

    fn take(&mut self, source: SpotId, target: SpotId) {
        self.forward.insert(source);
        self.backward.insert(target);
    }
}

fn candidates(graph: &TrackGraph, from: usize, to: usize, max_distance: f64, occupancy: &Occupancy) -> Vec<Candidate> {
    let max_sq = max_distance * max_distance;
    let targets: Vec<&Spot> = graph.spots_in_frame(to).collect();

    let mut out = Vec::new();
    for source in graph.spots_in_frame(from) {
        if occupancy.forward.contains(&source.id()) {
            continue;
        }
        for target in &targets {
            if occupancy.backward.contains(&target.id()) {
                continue;
            }
            let d2 = source.squared_distance_to(target);
            if d2 <= max_sq {
                out.push(Candidate {
                    distance: d2.sqrt(),
                    source: source.id(),
                    target: target.id(),
                });
            }
        }
    }

    out.sort_by(|a, b| {
        a.distance
            .total_cmp(&b.distance)
            .then(a.source.cmp(&b.source))
            .then(a.target.cmp(&b.target))
    });
    out
}

fn accept(candidates: Vec<Candidate>, occupancy: &mut Occupancy, proposals: &mut Vec<LinkProposal>) -> usize {
    let mut accepted = 0;
    for c in candidates {
        if occupancy.is_free(c.source, c.target) {
            occupancy.take(c.source, c.target);
            proposals.push(LinkProposal::new(c.source, c.target).with_weight(c.distance));
            accepted += 1;
        }
    }
    accepted
}

impl Tracker for NearestNeighborLinker {
    type Error = LinkError;

    fn link(&self, settings: &TrackerSettings, graph: &TrackGraph) -> Result<Vec<LinkProposal>, LinkError> {
        if !(settings.linking_max_distance >= 0.0) || !(settings.gap_closing_max_distance >= 0.0) {
            return Err(LinkError::InvalidSettings("distances must be non-negative".to_string()));
        }
        if settings.max_frame_gap == 0 {
            return Err(LinkError::InvalidSettings("max_frame_gap must be at least 1".to_string()));
        }

        let frames: Vec<usize> = graph.frames().into_iter().collect();
        let mut occupancy = Occupancy::from_graph(graph);
        let mut proposals = Vec::new();

        // Frame-to-frame
        let mut linked = 0;
        for pair in frames.windows(2) {
            if pair[1] != pair[0] + 1 {
                continue;
            }
            let batch = candidates(graph, pair[0], pair[1], settings.linking_max_distance, &occupancy);
            linked += accept(batch, &mut occupancy, &mut proposals);
        }

        // Gap closing
        let mut closed = 0;
        for gap in 2..=settings.max_frame_gap {
            for from in &frames {
                let batch = candidates(graph, *from, from + gap, settings.gap_closing_max_distance, &occupancy);
                closed += accept(batch, &mut occupancy, &mut proposals);
            }
        }

        debug!("Linker proposed {} frame-to-frame links and {} gap closings", linked, closed);
        Ok(proposals)
    }
}
