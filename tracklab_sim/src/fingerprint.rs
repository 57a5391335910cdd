//! Identifier-independent fingerprint of a model.
//!
//! Spot ids come from a process-wide counter, so two runs over the same input
//! never share ids. The fingerprint replaces every id by the spot's rank in
//! (frame, x, y, z) order and records floats bit for bit; two runs are
//! identical iff their fingerprints are equal.

use std::collections::HashMap;
use tracklab_core::{FeatureMap, Model, SpotId};

type Cells = Vec<(String, u64)>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    /// (frame, coordinates, features) in rank order
    spots: Vec<(usize, [u64; 3], Cells)>,

    /// (source rank, target rank, weight, features), sorted
    edges: Vec<(usize, usize, u64, Cells)>,

    /// (index, member ranks, features, visible) by index
    tracks: Vec<(usize, Vec<usize>, Cells, bool)>,
}

fn cells(values: &FeatureMap) -> Cells {
    values.iter().map(|(name, v)| (name.to_string(), v.to_bits())).collect()
}

impl Fingerprint {
    pub fn of(model: &mut Model) -> Self {
        let visible = model.visible_track_indices();
        let graph = model.graph();

        let mut ordered: Vec<_> = graph.spots().collect();
        ordered.sort_by(|a, b| {
            let (pa, pb) = (a.position(), b.position());
            a.frame()
                .cmp(&b.frame())
                .then(pa.x.total_cmp(&pb.x))
                .then(pa.y.total_cmp(&pb.y))
                .then(pa.z.total_cmp(&pb.z))
                .then(a.id().cmp(&b.id()))
        });
        let rank: HashMap<SpotId, usize> = ordered.iter().enumerate().map(|(i, s)| (s.id(), i)).collect();

        let spots = ordered
            .iter()
            .map(|s| {
                let p = s.position();
                (s.frame(), [p.x.to_bits(), p.y.to_bits(), p.z.to_bits()], cells(s.features()))
            })
            .collect();

        let mut edges: Vec<_> = graph
            .edges()
            .filter_map(|e| {
                let source = *rank.get(&e.source())?;
                let target = *rank.get(&e.target())?;
                Some((source, target, e.weight().to_bits(), cells(e.features())))
            })
            .collect();
        edges.sort();

        let tracks = model
            .track_model()
            .tracks()
            .map(|t| {
                let mut members: Vec<usize> = t.spots.iter().filter_map(|id| rank.get(id).copied()).collect();
                members.sort_unstable();
                let values = model
                    .feature_model()
                    .track_feature_values(t.index)
                    .map(cells)
                    .unwrap_or_default();
                (t.index.0, members, values, visible.contains(&t.index))
            })
            .collect();

        Self { spots, edges, tracks }
    }

    pub fn spot_count(&self) -> usize {
        self.spots.len()
    }

    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }
}
