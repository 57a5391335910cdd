//! The Model facade - single owner of graph, tracks, features and filters
//!
//! Every topology edit goes through here. The facade keeps the derived views
//! honest:
//! 1. The track index is rebuilt lazily, when track work finds it stale
//! 2. Track feature values die with the index they were computed for
//! 3. Visibility is re-evaluated when the graph generation, the feature
//!    revision or the filter revision moved since the last evaluation
//!
//! Cross-thread use goes through [`ModelHandle`], which serialises edits on one
//! mutex and keeps slow segmentation outside it.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

use crate::analyzers::stock_analyzers;
use crate::collaborators::{LinkingOutcome, SegmentationOutcome, Segmenter, Tracker};
use crate::error::{EntityRef, ModelError};
use crate::settings::{SegmenterSettings, Settings};
use crate::spot::{Spot, SpotId, QUALITY, RADIUS};
use crate::tracklab_features::{Analyzer, CancelToken, ComputationReport, FeatureModel, FeatureTarget};
use crate::tracklab_filter::{FeatureFilter, FilterDirection, FilterEngine};
use crate::tracklab_graph::{Edge, EdgeKey, TrackGraph};
use crate::tracklab_tracks::{RebuildSummary, TrackIndex, TrackModel};
use crate::values::FeatureValue;

/// Catalog owner of the detector-provided spot features.
pub const DETECTOR: &str = "detector";

/// (graph generation, feature revision, filter revision)
type VisibilityKey = (u64, u64, u64);

/// Aggregate of the whole tracking state.
#[derive(Debug)]
pub struct Model {
    pub(crate) settings: Settings,
    pub(crate) graph: TrackGraph,
    pub(crate) tracks: TrackModel,
    pub(crate) features: FeatureModel,
    pub(crate) filters: FilterEngine,

    /// Shared with callers that want to interrupt feature computation
    cancel: CancelToken,

    /// Inputs of the last filter evaluation
    visibility_key: Option<VisibilityKey>,
}

impl Default for Model {
    fn default() -> Self {
        Self::new(Settings::default())
    }
}

impl Model {
    /// Creates an empty model. `QUALITY` and `RADIUS` are in the spot catalog
    /// from the start.
    pub fn new(settings: Settings) -> Self {
        let mut features = FeatureModel::new();
        if let Err(e) = features.declare_features(FeatureTarget::Spot, DETECTOR, &[QUALITY, RADIUS]) {
            // Cannot clash in a fresh catalog
            warn!("Detector features not declared: {}", e);
        }

        Self {
            settings,
            graph: TrackGraph::new(),
            tracks: TrackModel::new(),
            features,
            filters: FilterEngine::new(),
            cancel: CancelToken::new(),
            visibility_key: None,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Replaces the settings. Already registered analyzers keep the
    /// calibration they were built with.
    pub fn set_settings(&mut self, settings: Settings) {
        self.settings = settings;
    }

    pub fn graph(&self) -> &TrackGraph {
        &self.graph
    }

    pub fn track_model(&self) -> &TrackModel {
        &self.tracks
    }

    pub fn feature_model(&self) -> &FeatureModel {
        &self.features
    }

    pub fn filter_engine(&self) -> &FilterEngine {
        &self.filters
    }

    /// Token checked between entities by every feature computation.
    ///
    /// A cancelled token stays cancelled until [`CancelToken::reset`] or
    /// [`Model::clear`].
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    // ========================================================================
    // TOPOLOGY
    // ========================================================================

    pub fn add_spot(&mut self, spot: Spot) -> Result<SpotId, ModelError> {
        self.graph.add_spot(spot)
    }

    /// Adds a batch of spots. Nothing is added if any id is already present
    /// or repeated within the batch.
    pub fn add_spots(&mut self, spots: impl IntoIterator<Item = Spot>) -> Result<Vec<SpotId>, ModelError> {
        let spots: Vec<Spot> = spots.into_iter().collect();

        let mut seen = BTreeSet::new();
        for spot in &spots {
            if self.graph.contains_spot(spot.id()) || !seen.insert(spot.id()) {
                return Err(ModelError::DuplicateEntity(EntityRef::Spot(spot.id())));
            }
        }

        spots.into_iter().map(|spot| self.graph.add_spot(spot)).collect()
    }

    /// Removes a spot and its links.
    pub fn remove_spot(&mut self, id: SpotId) -> Result<Spot, ModelError> {
        self.graph.remove_spot(id)
    }

    /// Links two spots. Without a weight, the Euclidean distance is used.
    pub fn add_edge(&mut self, a: SpotId, b: SpotId, weight: Option<f64>) -> Result<EdgeKey, ModelError> {
        let weight = match weight {
            Some(w) => w,
            None => {
                let sa = self.graph.spot(a).ok_or(ModelError::NotFound(EntityRef::Spot(a)))?;
                let sb = self.graph.spot(b).ok_or(ModelError::NotFound(EntityRef::Spot(b)))?;
                sa.distance_to(sb)
            }
        };
        self.graph.add_edge(a, b, weight)
    }

    pub fn remove_edge(&mut self, a: SpotId, b: SpotId) -> Result<Edge, ModelError> {
        self.graph.remove_edge(a, b)
    }

    /// Drops topology, the track index, track values and visibility, and
    /// resets the cancel token.
    ///
    /// Analyzers, filters and settings survive.
    pub fn clear(&mut self) {
        self.cancel.reset();
        self.graph.clear();
        self.tracks.clear();
        self.features.clear_track_values();
        self.visibility_key = None;
        debug!("Model cleared (generation {})", self.graph.generation());
    }

    // ========================================================================
    // COLLABORATORS
    // ========================================================================

    /// Runs the segmenter over `frames` (frame index = position) and ingests
    /// every spot. A failing frame aborts the whole call before ingestion.
    pub fn exec_segmentation<S: Segmenter>(
        &mut self,
        segmenter: &S,
        frames: &[S::Frame],
    ) -> Result<SegmentationOutcome, ModelError> {
        let batches = run_segmenter(segmenter, &self.settings.segmenter_settings, frames)?;
        self.ingest(batches)
    }

    fn ingest(&mut self, batches: Vec<(usize, Vec<Spot>)>) -> Result<SegmentationOutcome, ModelError> {
        let per_frame: Vec<(usize, usize)> = batches.iter().map(|(f, spots)| (*f, spots.len())).collect();
        let added = self.add_spots(batches.into_iter().flat_map(|(_, spots)| spots))?;

        info!("Segmentation added {} spots over {} frames", added.len(), per_frame.len());
        Ok(SegmentationOutcome { added, per_frame })
    }

    /// Asks the tracker for link proposals and applies them in order.
    ///
    /// Proposals the graph refuses (missing spot, self-loop, duplicate) are
    /// collected as rejections; the rest of the batch is still applied.
    pub fn exec_tracking<T: Tracker>(&mut self, tracker: &T) -> Result<LinkingOutcome, ModelError> {
        let proposals = tracker
            .link(&self.settings.tracker_settings, &self.graph)
            .map_err(ModelError::collaborator)?;

        let mut outcome = LinkingOutcome::default();
        for proposal in proposals {
            match self.add_edge(proposal.source, proposal.target, proposal.weight) {
                Ok(key) => outcome.accepted.push(key),
                Err(e) => {
                    warn!("Rejected link {} -> {}: {}", proposal.source, proposal.target, e);
                    outcome.rejected.push((proposal, e));
                }
            }
        }

        info!(
            "Tracking accepted {} links, rejected {}",
            outcome.accepted.len(),
            outcome.rejected.len()
        );
        Ok(outcome)
    }

    // ========================================================================
    // FEATURES
    // ========================================================================

    pub fn register_analyzer(&mut self, analyzer: Analyzer) -> Result<(), ModelError> {
        self.features.register_analyzer(analyzer)
    }

    /// Registers every stock analyzer, calibrated with the current settings.
    pub fn register_stock_analyzers(&mut self) -> Result<(), ModelError> {
        for analyzer in stock_analyzers(&self.settings) {
            self.features.register_analyzer(analyzer)?;
        }
        Ok(())
    }

    pub fn compute_spot_features(
        &mut self,
        spots: &[SpotId],
        analyzer_keys: Option<&[&str]>,
    ) -> Result<ComputationReport, ModelError> {
        self.features
            .compute_spot_features(&mut self.graph, spots, analyzer_keys, &self.cancel)
    }

    pub fn compute_edge_features(
        &mut self,
        edges: &[EdgeKey],
        analyzer_keys: Option<&[&str]>,
    ) -> Result<ComputationReport, ModelError> {
        self.features
            .compute_edge_features(&mut self.graph, edges, analyzer_keys, &self.cancel)
    }

    /// Runs track analyzers, rebuilding the track index first if stale.
    pub fn compute_track_features(
        &mut self,
        indices: &[TrackIndex],
        analyzer_keys: Option<&[&str]>,
    ) -> Result<ComputationReport, ModelError> {
        self.refresh_tracks();
        self.features
            .compute_track_features(&self.graph, &self.tracks, indices, analyzer_keys, &self.cancel)
    }

    /// Spot, edge and track features for every entity, with every analyzer.
    pub fn compute_all_features(&mut self) -> Result<Vec<ComputationReport>, ModelError> {
        let spots: Vec<SpotId> = self.graph.spot_ids().collect();
        let edges: Vec<EdgeKey> = self.graph.edge_keys().collect();

        let spot_report = self.compute_spot_features(&spots, None)?;
        let edge_report = self.compute_edge_features(&edges, None)?;

        self.refresh_tracks();
        let indices: Vec<TrackIndex> = self.tracks.track_indices().collect();
        let track_report = self.compute_track_features(&indices, None)?;

        Ok(vec![spot_report, edge_report, track_report])
    }

    pub fn spot_feature(&self, id: SpotId, name: &str) -> FeatureValue {
        self.graph
            .spot(id)
            .map_or(FeatureValue::Unknown, |spot| self.features.get_spot_feature(spot, name))
    }

    pub fn edge_feature(&self, key: EdgeKey, name: &str) -> FeatureValue {
        self.graph
            .edge(key)
            .map_or(FeatureValue::Unknown, |edge| self.features.get_edge_feature(edge, name))
    }

    pub fn track_feature(&self, index: TrackIndex, name: &str) -> FeatureValue {
        self.features.get_track_feature(index, name)
    }

    // ========================================================================
    // TRACKS
    // ========================================================================

    /// Rebuilds the track index now and drops values of changed tracks.
    pub fn rebuild_track_index(&mut self) -> RebuildSummary {
        let summary = self.tracks.rebuild_track_index(&self.graph);
        self.features.invalidate_tracks(summary.invalidated());
        summary
    }

    fn refresh_tracks(&mut self) {
        if self.tracks.is_stale(&self.graph) {
            self.rebuild_track_index();
        }
    }

    pub fn track_indices(&mut self) -> Vec<TrackIndex> {
        self.refresh_tracks();
        self.tracks.track_indices().collect()
    }

    pub fn track_spots(&mut self, index: TrackIndex) -> Result<&BTreeSet<SpotId>, ModelError> {
        self.refresh_tracks();
        self.tracks.track_spots(index)
    }

    pub fn track_edges(&mut self, index: TrackIndex) -> Result<&BTreeSet<EdgeKey>, ModelError> {
        self.refresh_tracks();
        self.tracks.track_edges(index)
    }

    pub fn track_of(&mut self, spot: SpotId) -> Option<TrackIndex> {
        self.refresh_tracks();
        self.tracks.track_of(spot)
    }

    /// Overrides one flag. The override holds until the next filter
    /// evaluation, which happens once the graph, the values or the filters
    /// change.
    pub fn set_track_visibility(&mut self, index: TrackIndex, visible: bool) -> Result<(), ModelError> {
        self.refresh_visibility();
        self.tracks.set_track_visibility(index, visible)
    }

    pub fn is_visible(&mut self, index: TrackIndex) -> Result<bool, ModelError> {
        self.refresh_visibility();
        self.tracks.is_visible(index)
    }

    /// Indices of the visible tracks, re-evaluating filters when stale.
    pub fn visible_track_indices(&mut self) -> BTreeSet<TrackIndex> {
        self.refresh_visibility();
        self.tracks.visible_track_indices()
    }

    fn refresh_visibility(&mut self) {
        self.refresh_tracks();

        let key = (
            self.graph.generation(),
            self.features.revision(),
            self.filters.revision(),
        );
        if self.visibility_key == Some(key) {
            return;
        }

        let visible = self.filters.evaluate(&self.tracks, &self.features);
        debug!(
            "Filters evaluated: {}/{} tracks visible",
            visible.len(),
            self.tracks.track_count()
        );
        self.tracks.apply_visibility(&visible);
        self.visibility_key = Some(key);
    }

    // ========================================================================
    // FILTERS
    // ========================================================================

    pub fn add_filter(&mut self, feature: impl Into<String>, threshold: f64, direction: FilterDirection) {
        self.filters.add_filter(feature, threshold, direction);
    }

    pub fn add_track_filter(&mut self, filter: FeatureFilter) {
        self.filters.add_track_filter(filter);
    }

    pub fn remove_filter(&mut self, filter: &FeatureFilter) -> bool {
        self.filters.remove_filter(filter)
    }

    pub fn clear_filters(&mut self) {
        self.filters.clear_filters();
    }

    pub fn filters(&self) -> &[FeatureFilter] {
        self.filters.filters()
    }

    pub fn add_spot_filter(&mut self, filter: FeatureFilter) {
        self.filters.add_spot_filter(filter);
    }

    pub fn remove_spot_filter(&mut self, filter: &FeatureFilter) -> bool {
        self.filters.remove_spot_filter(filter)
    }

    pub fn clear_spot_filters(&mut self) {
        self.filters.clear_spot_filters();
    }

    /// Spots passing every spot filter.
    pub fn filtered_spots(&self) -> BTreeSet<SpotId> {
        self.filters.evaluate_spots(&self.graph)
    }
}

fn run_segmenter<S: Segmenter>(
    segmenter: &S,
    settings: &SegmenterSettings,
    frames: &[S::Frame],
) -> Result<Vec<(usize, Vec<Spot>)>, ModelError> {
    frames
        .iter()
        .enumerate()
        .map(|(index, frame)| {
            segmenter
                .segment(settings, index, frame)
                .map(|spots| (index, spots))
                .map_err(|e| ModelError::collaborator(format!("frame {}: {}", index, e)))
        })
        .collect()
}

// ============================================================================
// SHARED HANDLE
// ============================================================================

/// A model shared between threads. All edits are serialised on one lock.
#[derive(Debug, Clone)]
pub struct ModelHandle {
    inner: Arc<Mutex<Model>>,
}

impl ModelHandle {
    pub fn new(model: Model) -> Self {
        Self {
            inner: Arc::new(Mutex::new(model)),
        }
    }

    /// Locks the model. A panic in another holder does not make the model
    /// unreachable; topology edits are atomic per call.
    pub fn lock(&self) -> MutexGuard<'_, Model> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs `f` with exclusive access.
    pub fn with<R>(&self, f: impl FnOnce(&mut Model) -> R) -> R {
        f(&mut self.lock())
    }

    /// Runs the segmenter without holding the lock, then ingests under it.
    pub fn exec_segmentation<S: Segmenter>(
        &self,
        segmenter: &S,
        frames: &[S::Frame],
    ) -> Result<SegmentationOutcome, ModelError> {
        let settings = self.lock().settings.segmenter_settings.clone();
        let batches = run_segmenter(segmenter, &settings, frames)?;
        self.lock().ingest(batches)
    }

    pub fn exec_tracking<T: Tracker>(&self, tracker: &T) -> Result<LinkingOutcome, ModelError> {
        self.lock().exec_tracking(tracker)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::LinkProposal;
    use crate::settings::TrackerSettings;
    use crate::tracklab_features::{AnalyzerError, FeatureAnalyzer};
    use crate::tracklab_tracks::Track;
    use crate::values::FeatureMap;
    use nalgebra::Vector3;
    use std::fmt;
    use std::thread;

    struct SizeAnalyzer;

    impl FeatureAnalyzer<Track> for SizeAnalyzer {
        fn key(&self) -> &str {
            "size"
        }

        fn features(&self) -> Vec<String> {
            vec!["SIZE".to_string()]
        }

        fn compute(&self, track: &Track, _graph: &TrackGraph) -> Result<FeatureMap, AnalyzerError> {
            Ok(FeatureMap::new().with("SIZE", track.spot_count() as f64))
        }
    }

    struct LinkTally;

    impl FeatureAnalyzer<Track> for LinkTally {
        fn key(&self) -> &str {
            "links"
        }

        fn features(&self) -> Vec<String> {
            vec!["LINKS".to_string()]
        }

        fn compute(&self, track: &Track, _graph: &TrackGraph) -> Result<FeatureMap, AnalyzerError> {
            Ok(FeatureMap::new().with("LINKS", track.edge_count() as f64))
        }
    }

    /// One spot per (x, y) pair in each frame.
    struct PointSegmenter;

    #[derive(Debug)]
    struct EmptyFrame;

    impl fmt::Display for EmptyFrame {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("empty frame")
        }
    }

    impl Segmenter for PointSegmenter {
        type Frame = Vec<(f64, f64)>;
        type Error = EmptyFrame;

        fn segment(
            &self,
            settings: &SegmenterSettings,
            frame_index: usize,
            frame: &Self::Frame,
        ) -> Result<Vec<Spot>, EmptyFrame> {
            if frame.is_empty() {
                return Err(EmptyFrame);
            }
            Ok(frame
                .iter()
                .map(|(x, y)| {
                    Spot::detected(Vector3::new(*x, *y, 0.0), frame_index, settings.expected_radius, 1.0)
                })
                .collect())
        }
    }

    /// Links spot i of frame 0 to spot i of frame 1, plus a bogus self-loop.
    struct ZipTracker;

    impl Tracker for ZipTracker {
        type Error = String;

        fn link(&self, _settings: &TrackerSettings, graph: &TrackGraph) -> Result<Vec<LinkProposal>, String> {
            let first: Vec<SpotId> = graph.spots_in_frame(0).map(Spot::id).collect();
            let second: Vec<SpotId> = graph.spots_in_frame(1).map(Spot::id).collect();
            let mut proposals: Vec<LinkProposal> = first
                .iter()
                .zip(&second)
                .map(|(a, b)| LinkProposal::new(*a, *b))
                .collect();
            proposals.push(LinkProposal::new(first[0], first[0]));
            Ok(proposals)
        }
    }

    fn three_pairs(model: &mut Model) -> (Vec<SpotId>, Vec<SpotId>) {
        let first: Vec<SpotId> = (0..3)
            .map(|i| model.add_spot(Spot::new(Vector3::new(i as f64, 0.0, 0.0), 0)).unwrap())
            .collect();
        let second: Vec<SpotId> = (0..3)
            .map(|i| model.add_spot(Spot::new(Vector3::new(i as f64, 1.0, 0.0), 1)).unwrap())
            .collect();
        for (a, b) in first.iter().zip(&second) {
            model.add_edge(*a, *b, None).unwrap();
        }
        (first, second)
    }

    fn indices(set: &[usize]) -> BTreeSet<TrackIndex> {
        set.iter().map(|i| TrackIndex(*i)).collect()
    }

    #[test]
    fn test_detector_features_are_declared() {
        let model = Model::default();
        assert_eq!(model.feature_model().spot_features(), &[QUALITY, RADIUS]);
    }

    #[test]
    fn test_default_edge_weight_is_distance() {
        let mut model = Model::default();
        let a = model.add_spot(Spot::new(Vector3::zeros(), 0)).unwrap();
        let b = model.add_spot(Spot::new(Vector3::new(3.0, 4.0, 0.0), 1)).unwrap();
        let key = model.add_edge(a, b, None).unwrap();

        assert_eq!(model.graph().edge(key).unwrap().weight(), 5.0);

        let stray = Spot::new(Vector3::zeros(), 0).id();
        assert_eq!(
            model.add_edge(a, stray, None),
            Err(ModelError::NotFound(EntityRef::Spot(stray)))
        );
    }

    #[test]
    fn test_add_spots_is_all_or_nothing() {
        let mut model = Model::default();
        let existing = Spot::new(Vector3::zeros(), 0);
        model.add_spot(existing.clone()).unwrap();

        let batch = vec![Spot::new(Vector3::zeros(), 1), existing];
        assert!(matches!(model.add_spots(batch), Err(ModelError::DuplicateEntity(_))));
        assert_eq!(model.graph().spot_count(), 1);
    }

    #[test]
    fn test_split_scenario() {
        let mut model = Model::default();
        let (first, second) = three_pairs(&mut model);

        assert_eq!(model.visible_track_indices(), indices(&[0, 1, 2]));
        let kept: Vec<TrackIndex> = [0, 2].iter().map(|i| model.track_of(first[*i]).unwrap()).collect();

        model.remove_edge(first[1], second[1]).unwrap();
        assert_eq!(model.track_indices().len(), 4);
        assert_eq!(model.track_of(first[0]), Some(kept[0]));
        assert_eq!(model.track_of(first[2]), Some(kept[1]));

        let halves: BTreeSet<TrackIndex> = [first[1], second[1]]
            .iter()
            .map(|id| model.track_of(*id).unwrap())
            .collect();
        assert_eq!(halves, indices(&[1, 3]));
        for index in halves {
            assert_eq!(model.track_spots(index).unwrap().len(), 1);
        }
    }

    #[test]
    fn test_filter_on_unknown_feature_hides_everything() {
        let mut model = Model::default();
        three_pairs(&mut model);

        model.add_filter("area", 10.0, FilterDirection::Above);
        assert!(model.visible_track_indices().is_empty());

        model.clear_filters();
        assert_eq!(model.visible_track_indices().len(), 3);
    }

    #[test]
    fn test_visibility_follows_feature_changes() {
        let mut model = Model::default();
        let (first, second) = three_pairs(&mut model);
        model.register_analyzer(Analyzer::track(SizeAnalyzer)).unwrap();
        model.add_track_filter(FeatureFilter::above("SIZE", 2.0));

        // Nothing computed yet
        assert!(model.visible_track_indices().is_empty());

        let all = model.track_indices();
        model.compute_track_features(&all, None).unwrap();
        assert_eq!(model.visible_track_indices(), indices(&[0, 1, 2]));

        // Splitting drops the values of the changed tracks
        model.remove_edge(first[1], second[1]).unwrap();
        let visible = model.visible_track_indices();
        assert_eq!(visible.len(), 2);
        assert!(!visible.contains(&model.track_of(first[1]).unwrap()));
    }

    #[test]
    fn test_cycle_edit_drops_track_values() {
        let mut model = Model::default();
        let a = model.add_spot(Spot::new(Vector3::zeros(), 0)).unwrap();
        let b = model.add_spot(Spot::new(Vector3::new(1.0, 0.0, 0.0), 1)).unwrap();
        let c = model.add_spot(Spot::new(Vector3::new(0.0, 1.0, 0.0), 2)).unwrap();
        model.add_edge(a, b, None).unwrap();
        model.add_edge(b, c, None).unwrap();
        model.add_edge(a, c, None).unwrap();
        model.register_analyzer(Analyzer::track(LinkTally)).unwrap();
        model.add_track_filter(FeatureFilter::above("LINKS", 3.0));

        let all = model.track_indices();
        model.compute_track_features(&all, None).unwrap();
        assert_eq!(model.visible_track_indices(), indices(&[0]));

        // Same members, one link fewer: the index stays, the values go
        model.remove_edge(a, c).unwrap();
        assert_eq!(model.track_indices(), vec![TrackIndex(0)]);
        assert_eq!(model.track_feature(TrackIndex(0), "LINKS"), FeatureValue::Unknown);
        assert!(model.visible_track_indices().is_empty());

        let all = model.track_indices();
        model.compute_track_features(&all, None).unwrap();
        assert_eq!(model.track_feature(TrackIndex(0), "LINKS"), FeatureValue::Known(2.0));
    }

    #[test]
    fn test_clear_resets_cancellation() {
        let mut model = Model::default();
        three_pairs(&mut model);
        model.register_analyzer(Analyzer::track(SizeAnalyzer)).unwrap();

        model.cancel_token().cancel();
        let reports = model.compute_all_features().unwrap();
        assert!(reports.iter().all(|r| r.cancelled));

        model.clear();
        assert!(!model.cancel_token().is_cancelled());
        three_pairs(&mut model);
        let reports = model.compute_all_features().unwrap();
        assert!(reports.iter().all(|r| !r.cancelled && r.skipped == 0));
        assert_eq!(model.track_feature(TrackIndex(0), "SIZE"), FeatureValue::Known(2.0));
    }

    #[test]
    fn test_manual_visibility_override() {
        let mut model = Model::default();
        three_pairs(&mut model);

        model.set_track_visibility(TrackIndex(1), false).unwrap();
        assert!(!model.is_visible(TrackIndex(1)).unwrap());
        assert_eq!(model.visible_track_indices(), indices(&[0, 2]));

        assert_eq!(
            model.set_track_visibility(TrackIndex(9), true),
            Err(ModelError::NotFound(EntityRef::Track(TrackIndex(9))))
        );
    }

    #[test]
    fn test_compute_all_features_with_stock_analyzers() {
        let mut model = Model::default();
        let (first, _) = three_pairs(&mut model);
        model.register_stock_analyzers().unwrap();

        let reports = model.compute_all_features().unwrap();
        assert_eq!(reports.len(), 3);
        assert!(reports.iter().all(ComputationReport::is_clean));

        let index = model.track_of(first[0]).unwrap();
        assert_eq!(
            model.track_feature(index, crate::analyzers::NUMBER_SPOTS),
            FeatureValue::Known(2.0)
        );
        assert_eq!(
            model.spot_feature(first[0], crate::analyzers::LINK_COUNT),
            FeatureValue::Known(1.0)
        );
    }

    #[test]
    fn test_clear_keeps_analyzers_and_filters() {
        let mut model = Model::default();
        three_pairs(&mut model);
        model.register_analyzer(Analyzer::track(SizeAnalyzer)).unwrap();
        model.add_filter("SIZE", 1.0, FilterDirection::Above);
        model.compute_all_features().unwrap();

        model.clear();
        assert!(model.graph().is_empty());
        assert!(model.track_indices().is_empty());
        assert_eq!(model.track_feature(TrackIndex(0), "SIZE"), FeatureValue::Unknown);
        assert_eq!(model.filters().len(), 1);
        assert_eq!(model.feature_model().analyzer_keys(FeatureTarget::Track), vec!["size"]);
    }

    #[test]
    fn test_segmentation_and_tracking() {
        let mut model = Model::default();
        let frames = vec![vec![(0.0, 0.0), (10.0, 0.0)], vec![(0.5, 0.0), (10.5, 0.0)]];

        let segmented = model.exec_segmentation(&PointSegmenter, &frames).unwrap();
        assert_eq!(segmented.added.len(), 4);
        assert_eq!(segmented.per_frame, vec![(0, 2), (1, 2)]);

        let linked = model.exec_tracking(&ZipTracker).unwrap();
        assert_eq!(linked.accepted.len(), 2);
        assert_eq!(linked.rejected.len(), 1);
        assert!(matches!(linked.rejected[0].1, ModelError::InvalidEdge { .. }));
        assert_eq!(model.track_indices().len(), 2);
    }

    #[test]
    fn test_failed_frame_ingests_nothing() {
        let mut model = Model::default();
        let frames = vec![vec![(0.0, 0.0)], vec![]];

        let err = model.exec_segmentation(&PointSegmenter, &frames).unwrap_err();
        assert!(matches!(err, ModelError::Collaborator(_)));
        assert!(model.graph().is_empty());
    }

    #[test]
    fn test_filtered_spots() {
        let mut model = Model::default();
        let bright = model
            .add_spot(Spot::detected(Vector3::zeros(), 0, 1.0, 20.0))
            .unwrap();
        model.add_spot(Spot::detected(Vector3::zeros(), 0, 1.0, 2.0)).unwrap();

        model.add_spot_filter(FeatureFilter::above(QUALITY, 10.0));
        assert_eq!(model.filtered_spots(), BTreeSet::from([bright]));
    }

    #[test]
    fn test_handle_serialises_edits_across_threads() {
        let handle = ModelHandle::new(Model::default());

        let workers: Vec<_> = (0..4)
            .map(|t| {
                let handle = handle.clone();
                thread::spawn(move || {
                    for f in 0..10 {
                        let frames = vec![vec![(t as f64, f as f64)]];
                        handle.exec_segmentation(&PointSegmenter, &frames).unwrap();
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        let model = handle.lock();
        assert_eq!(model.graph().spot_count(), 40);
        assert!(model.graph().is_consistent());
    }
}
