//! The "TRACKS" Engine - stable indices over connected components
//!
//! A track is not stored in the graph; it is a connected component observed
//! at some generation. This module assigns each component an integer index
//! and keeps that index stable across rebuilds as long as the component's
//! member set is exactly unchanged:
//!
//! 1. Components whose canonical member set was indexed before keep their index.
//! 2. Every other component receives the smallest index not held by a
//!    surviving component and not already handed out in this pass.
//! 3. Indices of components that disappeared are free again.
//!
//! Partial overlap (a split or a merge) never inherits an index.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use tracing::debug;

use crate::error::{EntityRef, ModelError};
use crate::spot::SpotId;
use crate::tracklab_graph::{EdgeKey, TrackGraph};

/// Stable integer identifier of a track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackIndex(pub usize);

impl fmt::Display for TrackIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Member spots and edges of one component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Track {
    pub index: TrackIndex,
    pub spots: BTreeSet<SpotId>,
    pub edges: BTreeSet<EdgeKey>,
}

impl Track {
    pub fn spot_count(&self) -> usize {
        self.spots.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }
}

/// What changed during a rebuild.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RebuildSummary {
    /// Indices kept by components with an unchanged member set
    pub reused: BTreeSet<TrackIndex>,

    /// Indices handed to new or changed components
    pub assigned: BTreeSet<TrackIndex>,

    /// Indices whose component no longer exists (and were not reassigned)
    pub retired: BTreeSet<TrackIndex>,

    /// Reused indices whose edge set changed (a cycle lost or gained a link)
    pub rewired: BTreeSet<TrackIndex>,
}

impl RebuildSummary {
    /// Indices whose previous feature values no longer describe their component.
    pub fn invalidated(&self) -> impl Iterator<Item = TrackIndex> + '_ {
        self.assigned
            .iter()
            .chain(self.retired.iter())
            .chain(self.rewired.iter())
            .copied()
    }
}

/// Track index, membership and visibility flags.
#[derive(Debug, Clone, Default)]
pub struct TrackModel {
    /// Canonical member list → index, from the last rebuild
    index_by_members: HashMap<Vec<SpotId>, TrackIndex>,

    /// Current tracks by index
    tracks: BTreeMap<TrackIndex, Track>,

    /// Spot → owning track
    track_of_spot: HashMap<SpotId, TrackIndex>,

    /// Visibility flag per track
    visibility: BTreeMap<TrackIndex, bool>,

    /// Graph generation the index was built from
    built_generation: Option<u64>,
}

impl TrackModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when the graph changed since the last rebuild (or none happened yet).
    pub fn is_stale(&self, graph: &TrackGraph) -> bool {
        self.built_generation != Some(graph.generation())
    }

    pub fn built_generation(&self) -> Option<u64> {
        self.built_generation
    }

    /// Recomputes components and (re)assigns indices.
    ///
    /// New and reused tracks start visible; visibility is refined later by
    /// filter evaluation.
    pub fn rebuild_track_index(&mut self, graph: &TrackGraph) -> RebuildSummary {
        let components: Vec<Vec<SpotId>> = graph
            .connected_components()
            .map(|c| c.into_iter().collect())
            .collect();

        // Pass 1: exact-match reuse
        let mut slots: Vec<Option<TrackIndex>> = components
            .iter()
            .map(|members| self.index_by_members.get(members).copied())
            .collect();

        let mut taken: BTreeSet<TrackIndex> = slots.iter().flatten().copied().collect();
        let reused = taken.clone();

        // Pass 2: smallest unused index for everything else
        let mut assigned = BTreeSet::new();
        let mut candidate = 0;
        for slot in slots.iter_mut().filter(|s| s.is_none()) {
            while taken.contains(&TrackIndex(candidate)) {
                candidate += 1;
            }
            let index = TrackIndex(candidate);
            taken.insert(index);
            assigned.insert(index);
            *slot = Some(index);
        }

        let retired: BTreeSet<TrackIndex> = self
            .tracks
            .keys()
            .filter(|index| !taken.contains(index))
            .copied()
            .collect();

        // Rebuild derived maps
        let previous_visibility = std::mem::take(&mut self.visibility);
        let previous_tracks = std::mem::take(&mut self.tracks);
        self.index_by_members.clear();
        self.track_of_spot.clear();
        let mut rewired = BTreeSet::new();

        for (members, slot) in components.into_iter().zip(slots) {
            let Some(index) = slot else { continue };

            let spots: BTreeSet<SpotId> = members.iter().copied().collect();
            let edges: BTreeSet<EdgeKey> = members
                .iter()
                .flat_map(|id| graph.edges_of(*id).map(|e| e.key()))
                .collect();

            for id in &members {
                self.track_of_spot.insert(*id, index);
            }

            if reused.contains(&index) && previous_tracks.get(&index).map_or(true, |t| t.edges != edges) {
                rewired.insert(index);
            }

            let visible = if reused.contains(&index) {
                previous_visibility.get(&index).copied().unwrap_or(true)
            } else {
                true
            };
            self.visibility.insert(index, visible);
            self.tracks.insert(index, Track { index, spots, edges });
            self.index_by_members.insert(members, index);
        }

        self.built_generation = Some(graph.generation());

        debug!(
            "Track index rebuilt at generation {}: {} tracks ({} reused, {} rewired, {} assigned, {} retired)",
            graph.generation(),
            self.tracks.len(),
            reused.len(),
            rewired.len(),
            assigned.len(),
            retired.len()
        );

        RebuildSummary {
            reused,
            assigned,
            retired,
            rewired,
        }
    }

    /// Forgets every index, including the reuse map.
    pub fn clear(&mut self) {
        let previous_tracks = std::mem::take(&mut self.tracks);
        self.index_by_members.clear();
        self.track_of_spot.clear();
        let mut rewired: BTreeSet<TrackIndex> = BTreeSet::new();
        self.visibility.clear();
        self.built_generation = None;
    }

    // ========================================================================
    // ACCESSORS
    // ========================================================================

    pub fn track(&self, index: TrackIndex) -> Result<&Track, ModelError> {
        self.tracks
            .get(&index)
            .ok_or(ModelError::NotFound(EntityRef::Track(index)))
    }

    pub fn tracks(&self) -> impl Iterator<Item = &Track> {
        self.tracks.values()
    }

    pub fn track_indices(&self) -> impl Iterator<Item = TrackIndex> + '_ {
        self.tracks.keys().copied()
    }

    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }

    pub fn track_spots(&self, index: TrackIndex) -> Result<&BTreeSet<SpotId>, ModelError> {
        self.track(index).map(|t| &t.spots)
    }

    pub fn track_edges(&self, index: TrackIndex) -> Result<&BTreeSet<EdgeKey>, ModelError> {
        self.track(index).map(|t| &t.edges)
    }

    /// The track a spot belongs to, as of the last rebuild.
    pub fn track_of(&self, spot: SpotId) -> Option<TrackIndex> {
        self.track_of_spot.get(&spot).copied()
    }

    // ========================================================================
    // VISIBILITY
    // ========================================================================

    pub fn set_track_visibility(&mut self, index: TrackIndex, visible: bool) -> Result<(), ModelError> {
        let flag = self
            .visibility
            .get_mut(&index)
            .ok_or(ModelError::NotFound(EntityRef::Track(index)))?;
        *flag = visible;
        Ok(())
    }

    pub fn is_visible(&self, index: TrackIndex) -> Result<bool, ModelError> {
        self.visibility
            .get(&index)
            .copied()
            .ok_or(ModelError::NotFound(EntityRef::Track(index)))
    }

    /// Replaces every flag: indices in `visible` are shown, all others hidden.
    pub fn apply_visibility(&mut self, visible: &BTreeSet<TrackIndex>) {
        for (index, flag) in self.visibility.iter_mut() {
            *flag = visible.contains(index);
        }
    }

    /// Indices currently flagged visible.
    pub fn visible_track_indices(&self) -> BTreeSet<TrackIndex> {
        self.visibility
            .iter()
            .filter(|(_, visible)| **visible)
            .map(|(index, _)| *index)
            .collect()
    }
}
