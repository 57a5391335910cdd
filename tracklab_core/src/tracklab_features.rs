//! The "FEATURES" Engine - analyzer registry and feature computation
//!
//! Features are named numbers attached to spots, edges and tracks. They are
//! produced by analyzers registered at runtime; each analyzer declares the
//! names it produces, and a name belongs to exactly one catalog.
//!
//! Computation batches run one entity per task on the rayon pool:
//! 1. Every selected analyzer runs against the entity (read-only graph access)
//! 2. Failures are recorded per (analyzer, entity) and never abort the batch
//! 3. Results are written back sequentially once all tasks are done
//!
//! The cancel token is checked before each entity starts; an entity that has
//! started always finishes.

use rayon::prelude::*;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::error::{EntityRef, ModelError};
use crate::spot::{Spot, SpotId};
use crate::tracklab_graph::{Edge, EdgeKey, TrackGraph};
use crate::tracklab_tracks::{Track, TrackIndex, TrackModel};
use crate::values::{FeatureMap, FeatureValue};

// ============================================================================
// ANALYZERS
// ============================================================================

/// Which kind of entity a feature describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FeatureTarget {
    Spot,
    Edge,
    Track,
}

impl fmt::Display for FeatureTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeatureTarget::Spot => f.write_str("spot"),
            FeatureTarget::Edge => f.write_str("edge"),
            FeatureTarget::Track => f.write_str("track"),
        }
    }
}

/// Failure of one analyzer on one entity.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AnalyzerError {
    #[error("{0}")]
    Failed(String),

    #[error("missing input: {0}")]
    MissingInput(String),

    #[error("undeclared feature '{0}' in analyzer output")]
    UndeclaredFeature(String),
}

impl AnalyzerError {
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }
}

/// A feature-computation capability for entities of type `E`.
///
/// `compute` must be a pure function of the entity and the graph: the same
/// input always gives the same output.
pub trait FeatureAnalyzer<E>: Send + Sync {
    /// Unique registry key
    fn key(&self) -> &str;

    /// Feature names this analyzer produces, in column order
    fn features(&self) -> Vec<String>;

    fn compute(&self, entity: &E, graph: &TrackGraph) -> Result<FeatureMap, AnalyzerError>;
}

/// A registered analyzer of any target.
#[derive(Clone)]
pub enum Analyzer {
    Spot(Arc<dyn FeatureAnalyzer<Spot>>),
    Edge(Arc<dyn FeatureAnalyzer<Edge>>),
    Track(Arc<dyn FeatureAnalyzer<Track>>),
}

impl Analyzer {
    pub fn spot(analyzer: impl FeatureAnalyzer<Spot> + 'static) -> Self {
        Self::Spot(Arc::new(analyzer))
    }

    pub fn edge(analyzer: impl FeatureAnalyzer<Edge> + 'static) -> Self {
        Self::Edge(Arc::new(analyzer))
    }

    pub fn track(analyzer: impl FeatureAnalyzer<Track> + 'static) -> Self {
        Self::Track(Arc::new(analyzer))
    }

    pub fn key(&self) -> &str {
        match self {
            Analyzer::Spot(a) => a.key(),
            Analyzer::Edge(a) => a.key(),
            Analyzer::Track(a) => a.key(),
        }
    }

    pub fn target(&self) -> FeatureTarget {
        match self {
            Analyzer::Spot(_) => FeatureTarget::Spot,
            Analyzer::Edge(_) => FeatureTarget::Edge,
            Analyzer::Track(_) => FeatureTarget::Track,
        }
    }

    pub fn features(&self) -> Vec<String> {
        match self {
            Analyzer::Spot(a) => a.features(),
            Analyzer::Edge(a) => a.features(),
            Analyzer::Track(a) => a.features(),
        }
    }
}

impl fmt::Debug for Analyzer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Analyzer")
            .field("target", &self.target())
            .field("key", &self.key())
            .finish()
    }
}

// ============================================================================
// CANCELLATION
// ============================================================================

/// Shared flag for cooperative cancellation between entities.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

// ============================================================================
// REPORTS
// ============================================================================

/// One recorded analyzer failure.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalyzerFailure {
    pub analyzer: String,
    pub entity: EntityRef,
    pub error: AnalyzerError,
}

impl fmt::Display for AnalyzerFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed on {}: {}", self.analyzer, self.entity, self.error)
    }
}

/// Outcome of one computation batch.
#[derive(Debug, Clone, PartialEq)]
pub struct ComputationReport {
    pub target: FeatureTarget,

    /// Entities requested
    pub entities: usize,

    /// Entities processed (possibly with failures)
    pub computed: usize,

    /// Entities not started because of cancellation
    pub skipped: usize,

    /// Per (analyzer, entity) failures
    pub failures: Vec<AnalyzerFailure>,

    /// Whether the token was cancelled during the batch
    pub cancelled: bool,
}

impl ComputationReport {
    fn empty(target: FeatureTarget) -> Self {
        Self {
            target,
            entities: 0,
            computed: 0,
            skipped: 0,
            failures: Vec::new(),
            cancelled: false,
        }
    }

    /// No failures and nothing skipped.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && self.skipped == 0
    }

    /// Entities with at least one recorded failure.
    pub fn failed_entities(&self) -> Vec<EntityRef> {
        let mut out: Vec<EntityRef> = Vec::new();
        for failure in &self.failures {
            if !out.contains(&failure.entity) {
                out.push(failure.entity);
            }
        }
        out
    }
}

/// Per-entity result of a batch task.
enum EntityOutcome<K> {
    Done {
        key: K,
        values: FeatureMap,
        cleared: Vec<String>,
        failures: Vec<AnalyzerFailure>,
    },
    Skipped,
}

/// Runs `analyzers` over `items` in parallel. Pure: nothing is written here.
fn run_batch<E, K>(
    analyzers: &[Arc<dyn FeatureAnalyzer<E>>],
    items: &[(K, &E)],
    graph: &TrackGraph,
    cancel: &CancelToken,
    entity_ref: fn(K) -> EntityRef,
) -> Vec<EntityOutcome<K>>
where
    E: Sync,
    K: Copy + Send + Sync,
{
    items
        .par_iter()
        .map(|(key, entity)| {
            if cancel.is_cancelled() {
                return EntityOutcome::Skipped;
            }

            let mut values = FeatureMap::new();
            let mut cleared = Vec::new();
            let mut failures = Vec::new();

            for analyzer in analyzers {
                let declared = analyzer.features();
                match analyzer.compute(entity, graph) {
                    Ok(output) => {
                        for (name, value) in output.iter() {
                            if declared.iter().any(|d| d == name) {
                                values.insert(name, value);
                            } else {
                                failures.push(AnalyzerFailure {
                                    analyzer: analyzer.key().to_string(),
                                    entity: entity_ref(*key),
                                    error: AnalyzerError::UndeclaredFeature(name.to_string()),
                                });
                            }
                        }
                    }
                    Err(error) => {
                        // Stale values from an earlier run must not survive a failure
                        cleared.extend(declared);
                        failures.push(AnalyzerFailure {
                            analyzer: analyzer.key().to_string(),
                            entity: entity_ref(*key),
                            error,
                        });
                    }
                }
            }

            EntityOutcome::Done {
                key: *key,
                values,
                cleared,
                failures,
            }
        })
        .collect()
}

// ============================================================================
// FEATURE MODEL
// ============================================================================

/// Catalogs, analyzers, track values and computation reports.
#[derive(Default)]
pub struct FeatureModel {
    /// Spot feature names in declaration order
    spot_catalog: Vec<String>,
    edge_catalog: Vec<String>,
    track_catalog: Vec<String>,

    /// Feature name → (catalog, declaring owner)
    owners: HashMap<String, (FeatureTarget, String)>,

    spot_analyzers: Vec<Arc<dyn FeatureAnalyzer<Spot>>>,
    edge_analyzers: Vec<Arc<dyn FeatureAnalyzer<Edge>>>,
    track_analyzers: Vec<Arc<dyn FeatureAnalyzer<Track>>>,

    /// Track feature values by index
    track_values: BTreeMap<TrackIndex, FeatureMap>,

    /// Last report per target
    last_reports: BTreeMap<FeatureTarget, ComputationReport>,

    /// Incremented whenever stored values change
    revision: u64,
}

impl fmt::Debug for FeatureModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeatureModel")
            .field("spot_features", &self.spot_catalog)
            .field("edge_features", &self.edge_catalog)
            .field("track_features", &self.track_catalog)
            .field("spot_analyzers", &self.analyzer_keys(FeatureTarget::Spot))
            .field("edge_analyzers", &self.analyzer_keys(FeatureTarget::Edge))
            .field("track_analyzers", &self.analyzer_keys(FeatureTarget::Track))
            .field("tracks_with_values", &self.track_values.len())
            .field("revision", &self.revision)
            .finish()
    }
}

impl FeatureModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Changes whenever a stored value is written or dropped.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    // ========================================================================
    // REGISTRATION
    // ========================================================================

    /// Declares feature names without an analyzer (e.g. detector-provided values).
    pub fn declare_features(
        &mut self,
        target: FeatureTarget,
        owner: &str,
        names: &[&str],
    ) -> Result<(), ModelError> {
        let names: Vec<String> = names.iter().map(|n| n.to_string()).collect();
        self.check_free(owner, &names)?;
        self.claim(target, owner, names);
        Ok(())
    }

    /// Adds an analyzer to its catalog.
    pub fn register_analyzer(&mut self, analyzer: Analyzer) -> Result<(), ModelError> {
        let key = analyzer.key().to_string();
        if self.has_analyzer(&key) {
            return Err(ModelError::DuplicateAnalyzer(key));
        }

        let names = analyzer.features();
        self.check_free(&key, &names)?;
        self.claim(analyzer.target(), &key, names);

        debug!("Registered {} analyzer '{}'", analyzer.target(), key);

        match analyzer {
            Analyzer::Spot(a) => self.spot_analyzers.push(a),
            Analyzer::Edge(a) => self.edge_analyzers.push(a),
            Analyzer::Track(a) => self.track_analyzers.push(a),
        }
        Ok(())
    }

    fn has_analyzer(&self, key: &str) -> bool {
        self.spot_analyzers.iter().any(|a| a.key() == key)
            || self.edge_analyzers.iter().any(|a| a.key() == key)
            || self.track_analyzers.iter().any(|a| a.key() == key)
    }

    fn check_free(&self, owner: &str, names: &[String]) -> Result<(), ModelError> {
        for (i, name) in names.iter().enumerate() {
            if let Some((_, existing)) = self.owners.get(name) {
                return Err(ModelError::FeatureConflict {
                    feature: name.clone(),
                    owner: existing.clone(),
                });
            }
            if names[..i].contains(name) {
                return Err(ModelError::FeatureConflict {
                    feature: name.clone(),
                    owner: owner.to_string(),
                });
            }
        }
        Ok(())
    }

    fn claim(&mut self, target: FeatureTarget, owner: &str, names: Vec<String>) {
        for name in names {
            self.owners.insert(name.clone(), (target, owner.to_string()));
            self.catalog_mut(target).push(name);
        }
    }

    fn catalog_mut(&mut self, target: FeatureTarget) -> &mut Vec<String> {
        match target {
            FeatureTarget::Spot => &mut self.spot_catalog,
            FeatureTarget::Edge => &mut self.edge_catalog,
            FeatureTarget::Track => &mut self.track_catalog,
        }
    }

    /// Keys of registered analyzers for one target, in registration order.
    pub fn analyzer_keys(&self, target: FeatureTarget) -> Vec<&str> {
        match target {
            FeatureTarget::Spot => self.spot_analyzers.iter().map(|a| a.key()).collect(),
            FeatureTarget::Edge => self.edge_analyzers.iter().map(|a| a.key()).collect(),
            FeatureTarget::Track => self.track_analyzers.iter().map(|a| a.key()).collect(),
        }
    }

    // ========================================================================
    // CATALOGS
    // ========================================================================

    /// Spot feature names in registration order.
    pub fn spot_features(&self) -> &[String] {
        &self.spot_catalog
    }

    pub fn edge_features(&self) -> &[String] {
        &self.edge_catalog
    }

    pub fn track_features(&self) -> &[String] {
        &self.track_catalog
    }

    /// Which catalog a name belongs to, if any.
    pub fn target_of(&self, feature: &str) -> Option<FeatureTarget> {
        self.owners.get(feature).map(|(target, _)| *target)
    }

    // ========================================================================
    // LOOKUPS
    // ========================================================================

    pub fn get_spot_feature(&self, spot: &Spot, name: &str) -> FeatureValue {
        spot.feature(name)
    }

    pub fn get_edge_feature(&self, edge: &Edge, name: &str) -> FeatureValue {
        edge.feature(name)
    }

    pub fn get_track_feature(&self, index: TrackIndex, name: &str) -> FeatureValue {
        self.track_values
            .get(&index)
            .map_or(FeatureValue::Unknown, |values| values.get(name))
    }

    /// All stored values of one track.
    pub fn track_feature_values(&self, index: TrackIndex) -> Option<&FeatureMap> {
        self.track_values.get(&index)
    }

    pub fn last_report(&self, target: FeatureTarget) -> Option<&ComputationReport> {
        self.last_reports.get(&target)
    }

    // ========================================================================
    // COMPUTATION
    // ========================================================================

    fn select<E>(
        registered: &[Arc<dyn FeatureAnalyzer<E>>],
        keys: Option<&[&str]>,
    ) -> Result<Vec<Arc<dyn FeatureAnalyzer<E>>>, ModelError> {
        match keys {
            None => Ok(registered.to_vec()),
            Some(keys) => keys
                .iter()
                .map(|key| {
                    registered
                        .iter()
                        .find(|a| a.key() == *key)
                        .cloned()
                        .ok_or_else(|| ModelError::UnknownAnalyzer(key.to_string()))
                })
                .collect(),
        }
    }

    fn finish<K>(
        &mut self,
        target: FeatureTarget,
        outcomes: Vec<EntityOutcome<K>>,
        cancel: &CancelToken,
        mut write: impl FnMut(&mut Self, K, FeatureMap, Vec<String>),
    ) -> ComputationReport {
        let mut report = ComputationReport::empty(target);
        report.entities = outcomes.len();

        for outcome in outcomes {
            match outcome {
                EntityOutcome::Done {
                    key,
                    values,
                    cleared,
                    failures,
                } => {
                    report.computed += 1;
                    for failure in &failures {
                        warn!("{}", failure);
                    }
                    report.failures.extend(failures);
                    if !values.is_empty() || !cleared.is_empty() {
                        write(self, key, values, cleared);
                        self.revision += 1;
                    }
                }
                EntityOutcome::Skipped => report.skipped += 1,
            }
        }
        report.cancelled = cancel.is_cancelled();

        info!(
            "Computed {} features: {}/{} entities, {} failures{}",
            target,
            report.computed,
            report.entities,
            report.failures.len(),
            if report.cancelled { " (cancelled)" } else { "" }
        );

        self.last_reports.insert(target, report.clone());
        report
    }

    /// Runs spot analyzers over `spots`, writing into the spots' value maps.
    ///
    /// Only names produced in this batch are overwritten; names of an analyzer
    /// that failed on a spot are cleared on that spot.
    pub fn compute_spot_features(
        &mut self,
        graph: &mut TrackGraph,
        spots: &[SpotId],
        analyzer_keys: Option<&[&str]>,
        cancel: &CancelToken,
    ) -> Result<ComputationReport, ModelError> {
        let analyzers = Self::select(&self.spot_analyzers, analyzer_keys)?;

        let outcomes = {
            let shared: &TrackGraph = graph;
            let items = spots
                .iter()
                .map(|id| {
                    shared
                        .spot(*id)
                        .map(|spot| (*id, spot))
                        .ok_or(ModelError::NotFound(EntityRef::Spot(*id)))
                })
                .collect::<Result<Vec<_>, _>>()?;
            if analyzers.is_empty() {
                Vec::new()
            } else {
                run_batch(&analyzers, &items, shared, cancel, EntityRef::Spot)
            }
        };

        Ok(self.finish(FeatureTarget::Spot, outcomes, cancel, |_, id, values, cleared| {
            if let Some(map) = graph.spot_features_mut(id) {
                for name in &cleared {
                    map.remove(name);
                }
                map.merge(values);
            }
        }))
    }

    /// Runs edge analyzers over `edges`.
    pub fn compute_edge_features(
        &mut self,
        graph: &mut TrackGraph,
        edges: &[EdgeKey],
        analyzer_keys: Option<&[&str]>,
        cancel: &CancelToken,
    ) -> Result<ComputationReport, ModelError> {
        let analyzers = Self::select(&self.edge_analyzers, analyzer_keys)?;

        let outcomes = {
            let shared: &TrackGraph = graph;
            let items = edges
                .iter()
                .map(|key| {
                    shared
                        .edge(*key)
                        .map(|edge| (*key, edge))
                        .ok_or(ModelError::NotFound(EntityRef::Edge(*key)))
                })
                .collect::<Result<Vec<_>, _>>()?;
            if analyzers.is_empty() {
                Vec::new()
            } else {
                run_batch(&analyzers, &items, shared, cancel, EntityRef::Edge)
            }
        };

        Ok(self.finish(FeatureTarget::Edge, outcomes, cancel, |_, key, values, cleared| {
            if let Some(map) = graph.edge_features_mut(key) {
                for name in &cleared {
                    map.remove(name);
                }
                map.merge(values);
            }
        }))
    }

    /// Runs track analyzers over the given track indices.
    ///
    /// `tracks` must be up to date with `graph`; the model facade rebuilds it
    /// before calling this.
    pub fn compute_track_features(
        &mut self,
        graph: &TrackGraph,
        tracks: &TrackModel,
        indices: &[TrackIndex],
        analyzer_keys: Option<&[&str]>,
        cancel: &CancelToken,
    ) -> Result<ComputationReport, ModelError> {
        let analyzers = Self::select(&self.track_analyzers, analyzer_keys)?;

        let items = indices
            .iter()
            .map(|index| tracks.track(*index).map(|track| (*index, track)))
            .collect::<Result<Vec<_>, _>>()?;
        let outcomes = if analyzers.is_empty() {
            Vec::new()
        } else {
            run_batch(&analyzers, &items, graph, cancel, EntityRef::Track)
        };

        Ok(self.finish(FeatureTarget::Track, outcomes, cancel, |this, index, values, cleared| {
            let map = this.track_values.entry(index).or_default();
            for name in &cleared {
                map.remove(name);
            }
            map.merge(values);
        }))
    }

    // ========================================================================
    // INVALIDATION
    // ========================================================================

    /// Drops the stored values of the given tracks.
    pub fn invalidate_tracks(&mut self, indices: impl IntoIterator<Item = TrackIndex>) {
        let mut changed = false;
        for index in indices {
            changed |= self.track_values.remove(&index).is_some();
        }
        if changed {
            self.revision += 1;
        }
    }

    /// Drops every track value.
    pub fn clear_track_values(&mut self) {
        if !self.track_values.is_empty() {
            self.track_values.clear();
            self.revision += 1;
        }
    }

    /// Replaces the stored values of one track (snapshot import).
    pub(crate) fn restore_track_values(&mut self, index: TrackIndex, values: FeatureMap) {
        self.track_values.insert(index, values);
        self.revision += 1;
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector3;
    use std::collections::BTreeSet;

    /// AREA = x * 10, fails for one chosen spot.
    struct AreaAnalyzer {
        poison: Option<SpotId>,
    }

    impl FeatureAnalyzer<Spot> for AreaAnalyzer {
        fn key(&self) -> &str {
            "area"
        }

        fn features(&self) -> Vec<String> {
            vec!["AREA".to_string()]
        }

        fn compute(&self, spot: &Spot, _graph: &TrackGraph) -> Result<FeatureMap, AnalyzerError> {
            if Some(spot.id()) == self.poison {
                return Err(AnalyzerError::failed("segmentation mask is empty"));
            }
            Ok(FeatureMap::new().with("AREA", spot.position().x * 10.0))
        }
    }

    /// Cancels the token when it reaches a chosen spot.
    struct TripwireAnalyzer {
        trigger: SpotId,
        token: CancelToken,
    }

    impl FeatureAnalyzer<Spot> for TripwireAnalyzer {
        fn key(&self) -> &str {
            "tripwire"
        }

        fn features(&self) -> Vec<String> {
            vec!["SEEN".to_string()]
        }

        fn compute(&self, spot: &Spot, _graph: &TrackGraph) -> Result<FeatureMap, AnalyzerError> {
            if spot.id() == self.trigger {
                self.token.cancel();
            }
            Ok(FeatureMap::new().with("SEEN", 1.0))
        }
    }

    struct SpanAnalyzer;

    impl FeatureAnalyzer<Track> for SpanAnalyzer {
        fn key(&self) -> &str {
            "span"
        }

        fn features(&self) -> Vec<String> {
            vec!["SPAN".to_string()]
        }

        fn compute(&self, track: &Track, graph: &TrackGraph) -> Result<FeatureMap, AnalyzerError> {
            let frames: BTreeSet<usize> = track
                .spots
                .iter()
                .filter_map(|id| graph.spot(*id).map(Spot::frame))
                .collect();
            let first = frames.first().ok_or(AnalyzerError::MissingInput("spots".into()))?;
            let last = frames.last().ok_or(AnalyzerError::MissingInput("spots".into()))?;
            Ok(FeatureMap::new().with("SPAN", (last - first) as f64))
        }
    }

    struct SloppyAnalyzer;

    impl FeatureAnalyzer<Edge> for SloppyAnalyzer {
        fn key(&self) -> &str {
            "sloppy"
        }

        fn features(&self) -> Vec<String> {
            vec!["COST".to_string()]
        }

        fn compute(&self, edge: &Edge, _graph: &TrackGraph) -> Result<FeatureMap, AnalyzerError> {
            Ok(FeatureMap::new()
                .with("COST", edge.weight())
                .with("EXTRA", 1.0))
        }
    }

    fn five_spots() -> (TrackGraph, Vec<SpotId>) {
        let mut graph = TrackGraph::new();
        let ids = (0..5)
            .map(|i| graph.add_spot(Spot::new(Vector3::new(i as f64, 0.0, 0.0), i)).unwrap())
            .collect();
        (graph, ids)
    }

    #[test]
    fn test_failure_is_isolated_to_one_spot() {
        let (mut graph, ids) = five_spots();
        let mut fm = FeatureModel::new();
        fm.register_analyzer(Analyzer::spot(AreaAnalyzer { poison: Some(ids[2]) }))
            .unwrap();

        let report = fm
            .compute_spot_features(&mut graph, &ids, None, &CancelToken::new())
            .unwrap();

        assert_eq!(report.entities, 5);
        assert_eq!(report.computed, 5);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failed_entities(), vec![EntityRef::Spot(ids[2])]);

        let computed = ids
            .iter()
            .filter(|id| graph.spot(**id).unwrap().feature("AREA").is_known())
            .count();
        assert_eq!(computed, 4);
        assert_eq!(graph.spot(ids[2]).unwrap().feature("AREA"), FeatureValue::Unknown);
    }

    #[test]
    fn test_recomputation_is_idempotent() {
        let (mut graph, ids) = five_spots();
        let mut fm = FeatureModel::new();
        fm.register_analyzer(Analyzer::spot(AreaAnalyzer { poison: None })).unwrap();

        let cancel = CancelToken::new();
        fm.compute_spot_features(&mut graph, &ids, None, &cancel).unwrap();
        let first: Vec<FeatureMap> = graph.spots().map(|s| s.features().clone()).collect();

        fm.compute_spot_features(&mut graph, &ids, None, &cancel).unwrap();
        let second: Vec<FeatureMap> = graph.spots().map(|s| s.features().clone()).collect();

        assert_eq!(first, second);
        assert_eq!(graph.spot(ids[3]).unwrap().feature("AREA"), FeatureValue::Known(30.0));
    }

    #[test]
    fn test_only_computed_names_are_overwritten() {
        let (mut graph, ids) = five_spots();
        graph.spot_features_mut(ids[0]).unwrap().insert("QUALITY", 12.0);

        let mut fm = FeatureModel::new();
        fm.register_analyzer(Analyzer::spot(AreaAnalyzer { poison: None })).unwrap();
        fm.compute_spot_features(&mut graph, &ids[..1], None, &CancelToken::new())
            .unwrap();

        let spot = graph.spot(ids[0]).unwrap();
        assert_eq!(spot.feature("QUALITY"), FeatureValue::Known(12.0));
        assert_eq!(spot.feature("AREA"), FeatureValue::Known(0.0));
    }

    #[test]
    fn test_unregistered_feature_is_unknown() {
        let (graph, ids) = five_spots();
        let fm = FeatureModel::new();
        let spot = graph.spot(ids[0]).unwrap();

        assert_eq!(fm.get_spot_feature(spot, "never_registered"), FeatureValue::Unknown);
        assert_eq!(fm.get_track_feature(TrackIndex(0), "never_registered"), FeatureValue::Unknown);
    }

    #[test]
    fn test_catalogs_keep_registration_order() {
        let mut fm = FeatureModel::new();
        fm.declare_features(FeatureTarget::Spot, "detector", &["QUALITY", "RADIUS"])
            .unwrap();
        fm.register_analyzer(Analyzer::spot(AreaAnalyzer { poison: None })).unwrap();
        fm.register_analyzer(Analyzer::track(SpanAnalyzer)).unwrap();

        assert_eq!(fm.spot_features(), &["QUALITY", "RADIUS", "AREA"]);
        assert_eq!(fm.track_features(), &["SPAN"]);
        assert!(fm.edge_features().is_empty());
        assert_eq!(fm.target_of("SPAN"), Some(FeatureTarget::Track));
    }

    #[test]
    fn test_feature_name_belongs_to_one_catalog() {
        let mut fm = FeatureModel::new();
        fm.declare_features(FeatureTarget::Track, "manual", &["AREA"]).unwrap();

        let err = fm
            .register_analyzer(Analyzer::spot(AreaAnalyzer { poison: None }))
            .unwrap_err();
        assert_eq!(
            err,
            ModelError::FeatureConflict {
                feature: "AREA".to_string(),
                owner: "manual".to_string()
            }
        );
        assert!(fm.analyzer_keys(FeatureTarget::Spot).is_empty());
    }

    #[test]
    fn test_duplicate_and_unknown_analyzer_keys() {
        let (mut graph, ids) = five_spots();
        let mut fm = FeatureModel::new();
        fm.register_analyzer(Analyzer::track(SpanAnalyzer)).unwrap();
        assert_eq!(
            fm.register_analyzer(Analyzer::track(SpanAnalyzer)),
            Err(ModelError::DuplicateAnalyzer("span".to_string()))
        );

        let err = fm
            .compute_spot_features(&mut graph, &ids, Some(&["span"]), &CancelToken::new())
            .unwrap_err();
        assert_eq!(err, ModelError::UnknownAnalyzer("span".to_string()));
    }

    #[test]
    fn test_missing_spot_is_reported_before_work() {
        let (mut graph, ids) = five_spots();
        let stray = Spot::new(Vector3::zeros(), 0).id();
        let mut fm = FeatureModel::new();
        fm.register_analyzer(Analyzer::spot(AreaAnalyzer { poison: None })).unwrap();

        let err = fm
            .compute_spot_features(&mut graph, &[ids[0], stray], None, &CancelToken::new())
            .unwrap_err();
        assert_eq!(err, ModelError::NotFound(EntityRef::Spot(stray)));
        assert_eq!(graph.spot(ids[0]).unwrap().feature("AREA"), FeatureValue::Unknown);
    }

    #[test]
    fn test_pre_cancelled_batch_skips_everything() {
        let (mut graph, ids) = five_spots();
        let mut fm = FeatureModel::new();
        fm.register_analyzer(Analyzer::spot(AreaAnalyzer { poison: None })).unwrap();

        let cancel = CancelToken::new();
        cancel.cancel();
        let report = fm.compute_spot_features(&mut graph, &ids, None, &cancel).unwrap();

        assert!(report.cancelled);
        assert_eq!(report.computed, 0);
        assert_eq!(report.skipped, 5);
        assert!(graph.spots().all(|s| s.feature("AREA").is_unknown()));
    }

    #[test]
    fn test_cancellation_between_entities() {
        let (mut graph, ids) = five_spots();
        let cancel = CancelToken::new();
        let mut fm = FeatureModel::new();
        fm.register_analyzer(Analyzer::spot(TripwireAnalyzer {
            trigger: ids[2],
            token: cancel.clone(),
        }))
        .unwrap();

        // A single worker visits entities in order
        let pool = rayon::ThreadPoolBuilder::new().num_threads(1).build().unwrap();
        let report = pool
            .install(|| fm.compute_spot_features(&mut graph, &ids, None, &cancel))
            .unwrap();

        assert!(report.cancelled);
        assert_eq!(report.computed, 3);
        assert_eq!(report.skipped, 2);
        // The entity that tripped the flag still completed
        assert_eq!(graph.spot(ids[2]).unwrap().feature("SEEN"), FeatureValue::Known(1.0));
        assert_eq!(graph.spot(ids[3]).unwrap().feature("SEEN"), FeatureValue::Unknown);
    }

    #[test]
    fn test_undeclared_output_is_rejected() {
        let mut graph = TrackGraph::new();
        let a = graph.add_spot(Spot::new(Vector3::zeros(), 0)).unwrap();
        let b = graph.add_spot(Spot::new(Vector3::new(1.0, 0.0, 0.0), 1)).unwrap();
        let key = graph.add_edge(a, b, 2.0).unwrap();

        let mut fm = FeatureModel::new();
        fm.register_analyzer(Analyzer::edge(SloppyAnalyzer)).unwrap();
        let report = fm
            .compute_edge_features(&mut graph, &[key], None, &CancelToken::new())
            .unwrap();

        let edge = graph.edge(key).unwrap();
        assert_eq!(edge.feature("COST"), FeatureValue::Known(2.0));
        assert_eq!(edge.feature("EXTRA"), FeatureValue::Unknown);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(
            report.failures[0].error,
            AnalyzerError::UndeclaredFeature("EXTRA".to_string())
        );
    }

    #[test]
    fn test_track_features_and_invalidation() {
        let (mut graph, ids) = five_spots();
        graph.add_edge(ids[0], ids[1], 1.0).unwrap();
        graph.add_edge(ids[1], ids[2], 1.0).unwrap();

        let mut tracks = TrackModel::new();
        tracks.rebuild_track_index(&graph);
        let index = tracks.track_of(ids[0]).unwrap();
        let all: Vec<TrackIndex> = tracks.track_indices().collect();

        let mut fm = FeatureModel::new();
        fm.register_analyzer(Analyzer::track(SpanAnalyzer)).unwrap();
        let report = fm
            .compute_track_features(&graph, &tracks, &all, None, &CancelToken::new())
            .unwrap();
        assert!(report.is_clean());
        assert_eq!(fm.get_track_feature(index, "SPAN"), FeatureValue::Known(2.0));

        let revision = fm.revision();
        fm.invalidate_tracks([index]);
        assert!(fm.revision() > revision);
        assert_eq!(fm.get_track_feature(index, "SPAN"), FeatureValue::Unknown);

        assert!(matches!(
            fm.compute_track_features(&graph, &tracks, &[TrackIndex(99)], None, &CancelToken::new()),
            Err(ModelError::NotFound(EntityRef::Track(TrackIndex(99))))
        ));
    }
}
