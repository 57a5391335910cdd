//! The "GRAPH" Engine - spots and their accepted links
//!
//! An undirected, weighted, simple graph:
//! - vertices are [`Spot`]s keyed by their [`SpotId`]
//! - edges are accepted frame-to-frame links keyed by their unordered endpoint pair
//! - every topology mutation bumps a generation counter so dependent views
//!   (track index, visibility cache) can detect staleness without recomputing
//!
//! All maps are ordered, which makes iteration and component enumeration
//! deterministic for identical input.

use serde::{Deserialize, Serialize};
use std::collections::{btree_map, BTreeMap, BTreeSet, HashSet, VecDeque};
use std::fmt;

use crate::error::{EntityRef, ModelError};
use crate::spot::{Spot, SpotId};
use crate::values::{FeatureMap, FeatureValue};

// ============================================================================
// EDGES
// ============================================================================

/// Unordered endpoint pair identifying an edge. The smaller id is stored first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EdgeKey {
    lower: SpotId,
    upper: SpotId,
}

impl EdgeKey {
    pub fn new(a: SpotId, b: SpotId) -> Self {
        if a <= b {
            Self { lower: a, upper: b }
        } else {
            Self { lower: b, upper: a }
        }
    }

    #[inline]
    pub fn lower(&self) -> SpotId {
        self.lower
    }

    #[inline]
    pub fn upper(&self) -> SpotId {
        self.upper
    }

    pub fn contains(&self, id: SpotId) -> bool {
        self.lower == id || self.upper == id
    }

    /// The opposite endpoint, if `id` is one of the two.
    pub fn opposite(&self, id: SpotId) -> Option<SpotId> {
        if id == self.lower {
            Some(self.upper)
        } else if id == self.upper {
            Some(self.lower)
        } else {
            None
        }
    }
}

impl fmt::Display for EdgeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({} : {})", self.lower, self.upper)
    }
}

/// An accepted link between two spots.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Edge {
    key: EdgeKey,

    /// Endpoint in the earlier frame (ties broken by id)
    source: SpotId,

    /// Endpoint in the later frame
    target: SpotId,

    /// Linking cost; defaults to the inter-spot distance
    weight: f64,

    /// Sparse edge feature values
    features: FeatureMap,
}

impl Edge {
    #[inline]
    pub fn key(&self) -> EdgeKey {
        self.key
    }

    #[inline]
    pub fn source(&self) -> SpotId {
        self.source
    }

    #[inline]
    pub fn target(&self) -> SpotId {
        self.target
    }

    #[inline]
    pub fn weight(&self) -> f64 {
        self.weight
    }

    pub fn feature(&self, name: &str) -> FeatureValue {
        self.features.get(name)
    }

    pub fn features(&self) -> &FeatureMap {
        &self.features
    }
}

impl fmt::Display for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({} : {})", self.source, self.target)
    }
}

// ============================================================================
// TRACK GRAPH
// ============================================================================

/// Owning store of spots and links.
#[derive(Debug, Clone, Default)]
pub struct TrackGraph {
    /// All vertices
    spots: BTreeMap<SpotId, Spot>,

    /// Neighbour sets, one entry per vertex (possibly empty)
    adjacency: BTreeMap<SpotId, BTreeSet<SpotId>>,

    /// All edges by endpoint pair
    edges: BTreeMap<EdgeKey, Edge>,

    /// Incremented on every topology mutation
    generation: u64,
}

impl TrackGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current topology version.
    #[inline]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    fn bump(&mut self) {
        self.generation += 1;
    }

    // ========================================================================
    // TOPOLOGY MUTATION
    // ========================================================================

    /// Inserts a vertex.
    pub fn add_spot(&mut self, spot: Spot) -> Result<SpotId, ModelError> {
        let id = spot.id();
        if self.spots.contains_key(&id) {
            return Err(ModelError::DuplicateEntity(EntityRef::Spot(id)));
        }
        self.spots.insert(id, spot);
        self.adjacency.insert(id, BTreeSet::new());
        self.bump();
        Ok(id)
    }

    /// Removes a vertex together with all its incident edges.
    pub fn remove_spot(&mut self, id: SpotId) -> Result<Spot, ModelError> {
        let spot = self
            .spots
            .remove(&id)
            .ok_or(ModelError::NotFound(EntityRef::Spot(id)))?;

        if let Some(neighbors) = self.adjacency.remove(&id) {
            for other in neighbors {
                self.edges.remove(&EdgeKey::new(id, other));
                if let Some(set) = self.adjacency.get_mut(&other) {
                    set.remove(&id);
                }
            }
        }

        self.bump();
        Ok(spot)
    }

    /// Inserts an edge between two existing, distinct, not yet linked spots.
    pub fn add_edge(&mut self, a: SpotId, b: SpotId, weight: f64) -> Result<EdgeKey, ModelError> {
        let spot_a = self.spots.get(&a).ok_or(ModelError::NotFound(EntityRef::Spot(a)))?;
        let spot_b = self.spots.get(&b).ok_or(ModelError::NotFound(EntityRef::Spot(b)))?;

        if a == b {
            return Err(ModelError::invalid_edge(a, b, "self-loop"));
        }

        let key = EdgeKey::new(a, b);
        if self.edges.contains_key(&key) {
            return Err(ModelError::invalid_edge(a, b, "edge already exists"));
        }

        let (source, target) = if (spot_a.frame(), a) <= (spot_b.frame(), b) {
            (a, b)
        } else {
            (b, a)
        };

        self.edges.insert(
            key,
            Edge {
                key,
                source,
                target,
                weight,
                features: FeatureMap::new(),
            },
        );
        self.adjacency.entry(a).or_default().insert(b);
        self.adjacency.entry(b).or_default().insert(a);

        self.bump();
        Ok(key)
    }

    /// Removes the edge between `a` and `b`.
    pub fn remove_edge(&mut self, a: SpotId, b: SpotId) -> Result<Edge, ModelError> {
        self.remove_edge_by_key(EdgeKey::new(a, b))
    }

    pub fn remove_edge_by_key(&mut self, key: EdgeKey) -> Result<Edge, ModelError> {
        let edge = self
            .edges
            .remove(&key)
            .ok_or(ModelError::NotFound(EntityRef::Edge(key)))?;

        if let Some(set) = self.adjacency.get_mut(&key.lower) {
            set.remove(&key.upper);
        }
        if let Some(set) = self.adjacency.get_mut(&key.upper) {
            set.remove(&key.lower);
        }

        self.bump();
        Ok(edge)
    }

    /// Drops every spot and edge. The generation keeps counting.
    pub fn clear(&mut self) {
        self.spots.clear();
        self.adjacency.clear();
        self.edges.clear();
        self.bump();
    }

    // ========================================================================
    // FEATURE STORAGE (no topology change)
    // ========================================================================

    pub(crate) fn spot_features_mut(&mut self, id: SpotId) -> Option<&mut FeatureMap> {
        self.spots.get_mut(&id).map(Spot::features_mut)
    }

    pub(crate) fn edge_features_mut(&mut self, key: EdgeKey) -> Option<&mut FeatureMap> {
        self.edges.get_mut(&key).map(|e| &mut e.features)
    }

    // ========================================================================
    // ACCESSORS
    // ========================================================================

    pub fn spot(&self, id: SpotId) -> Option<&Spot> {
        self.spots.get(&id)
    }

    pub fn contains_spot(&self, id: SpotId) -> bool {
        self.spots.contains_key(&id)
    }

    /// All spots in ascending id order.
    pub fn spots(&self) -> impl Iterator<Item = &Spot> {
        self.spots.values()
    }

    pub fn spot_ids(&self) -> impl Iterator<Item = SpotId> + '_ {
        self.spots.keys().copied()
    }

    pub fn spots_in_frame(&self, frame: usize) -> impl Iterator<Item = &Spot> {
        self.spots.values().filter(move |s| s.frame() == frame)
    }

    /// The distinct frame indices that hold at least one spot.
    pub fn frames(&self) -> BTreeSet<usize> {
        self.spots.values().map(Spot::frame).collect()
    }

    pub fn edge(&self, key: EdgeKey) -> Option<&Edge> {
        self.edges.get(&key)
    }

    pub fn edge_between(&self, a: SpotId, b: SpotId) -> Option<&Edge> {
        self.edges.get(&EdgeKey::new(a, b))
    }

    pub fn contains_edge(&self, key: EdgeKey) -> bool {
        self.edges.contains_key(&key)
    }

    /// All edges in ascending key order.
    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges.values()
    }

    pub fn edge_keys(&self) -> impl Iterator<Item = EdgeKey> + '_ {
        self.edges.keys().copied()
    }

    /// Edges touching `id`.
    pub fn edges_of(&self, id: SpotId) -> impl Iterator<Item = &Edge> {
        self.neighbors(id)
            .filter_map(move |other| self.edges.get(&EdgeKey::new(id, other)))
    }

    /// Neighbour ids of `id` (empty if `id` is unknown).
    pub fn neighbors(&self, id: SpotId) -> impl Iterator<Item = SpotId> + '_ {
        self.adjacency
            .get(&id)
            .into_iter()
            .flat_map(|set| set.iter().copied())
    }

    pub fn degree(&self, id: SpotId) -> usize {
        self.adjacency.get(&id).map_or(0, BTreeSet::len)
    }

    pub fn spot_count(&self) -> usize {
        self.spots.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spots.is_empty()
    }

    /// Lazily enumerates connected components, ordered by their minimum spot id.
    pub fn connected_components(&self) -> Components<'_> {
        Components {
            graph: self,
            cursor: self.adjacency.keys(),
            visited: HashSet::new(),
        }
    }

    /// Checks the structural invariants: every edge joins two present, distinct
    /// spots, adjacency is symmetric and mirrors the edge set exactly.
    pub fn is_consistent(&self) -> bool {
        if self.adjacency.len() != self.spots.len() {
            return false;
        }

        for (key, edge) in &self.edges {
            if key.lower == key.upper
                || !self.spots.contains_key(&key.lower)
                || !self.spots.contains_key(&key.upper)
                || edge.key != *key
            {
                return false;
            }
        }

        let mut half_edges = 0;
        for (id, neighbors) in &self.adjacency {
            if !self.spots.contains_key(id) {
                return false;
            }
            for other in neighbors {
                if !self.edges.contains_key(&EdgeKey::new(*id, *other)) {
                    return false;
                }
                half_edges += 1;
            }
        }

        half_edges == 2 * self.edges.len()
    }
}

// ============================================================================
// CONNECTED COMPONENTS
// ============================================================================

/// Iterator over connected components; see [`TrackGraph::connected_components`].
///
/// Vertices are scanned in ascending id order and each unvisited one seeds a
/// breadth-first search, so the seed is always the component's minimum id.
pub struct Components<'g> {
    graph: &'g TrackGraph,
    cursor: btree_map::Keys<'g, SpotId, BTreeSet<SpotId>>,
    visited: HashSet<SpotId>,
}

impl Iterator for Components<'_> {
    type Item = BTreeSet<SpotId>;

    fn next(&mut self) -> Option<Self::Item> {
        let seed = loop {
            let candidate = *self.cursor.next()?;
            if !self.visited.contains(&candidate) {
                break candidate;
            }
        };

        let mut component = BTreeSet::new();
        let mut queue = VecDeque::from([seed]);
        self.visited.insert(seed);

        while let Some(id) = queue.pop_front() {
            component.insert(id);
            for other in self.graph.neighbors(id) {
                if self.visited.insert(other) {
                    queue.push_back(other);
                }
            }
        }

        Some(component)
    }
}

// ============================================================================
// TESTS
// ============================================================================
