//! The "FILTER" Engine - threshold predicates over feature values
//!
//! A track is visible iff it passes every active track filter. Evaluation
//! fails closed: a filter on a feature the track has no value for rejects the
//! track, and so does a `NaN` value. With no filters, every track is visible.
//!
//! Spot filters work the same way against spot feature values.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::spot::SpotId;
use crate::tracklab_features::FeatureModel;
use crate::tracklab_graph::TrackGraph;
use crate::tracklab_tracks::{TrackIndex, TrackModel};
use crate::values::FeatureValue;

/// Which side of the threshold passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterDirection {
    /// value >= threshold
    Above,
    /// value <= threshold
    Below,
}

/// One threshold predicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureFilter {
    pub feature: String,
    pub threshold: f64,
    pub direction: FilterDirection,
}

impl FeatureFilter {
    pub fn new(feature: impl Into<String>, threshold: f64, direction: FilterDirection) -> Self {
        Self {
            feature: feature.into(),
            threshold,
            direction,
        }
    }

    pub fn above(feature: impl Into<String>, threshold: f64) -> Self {
        Self::new(feature, threshold, FilterDirection::Above)
    }

    pub fn below(feature: impl Into<String>, threshold: f64) -> Self {
        Self::new(feature, threshold, FilterDirection::Below)
    }

    /// Whether a value passes. `Unknown` and `NaN` never do.
    pub fn accepts(&self, value: FeatureValue) -> bool {
        match value {
            FeatureValue::Unknown => false,
            FeatureValue::Known(v) => match self.direction {
                FilterDirection::Above => v >= self.threshold,
                FilterDirection::Below => v <= self.threshold,
            },
        }
    }
}

impl fmt::Display for FeatureFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self.direction {
            FilterDirection::Above => ">=",
            FilterDirection::Below => "<=",
        };
        write!(f, "{} {} {}", self.feature, op, self.threshold)
    }
}

/// Active filters and their evaluation.
#[derive(Debug, Clone, Default)]
pub struct FilterEngine {
    track_filters: Vec<FeatureFilter>,
    spot_filters: Vec<FeatureFilter>,

    /// Incremented on every filter change
    revision: u64,
}

impl FilterEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    // ========================================================================
    // TRACK FILTERS
    // ========================================================================

    pub fn add_filter(&mut self, feature: impl Into<String>, threshold: f64, direction: FilterDirection) {
        self.add_track_filter(FeatureFilter::new(feature, threshold, direction));
    }

    pub fn add_track_filter(&mut self, filter: FeatureFilter) {
        self.track_filters.push(filter);
        self.revision += 1;
    }

    /// Removes the first filter equal to `filter`. Returns whether one was found.
    pub fn remove_filter(&mut self, filter: &FeatureFilter) -> bool {
        match self.track_filters.iter().position(|f| f == filter) {
            Some(pos) => {
                self.track_filters.remove(pos);
                self.revision += 1;
                true
            }
            None => false,
        }
    }

    pub fn clear_filters(&mut self) {
        if !self.track_filters.is_empty() {
            self.track_filters.clear();
            self.revision += 1;
        }
    }

    pub fn filters(&self) -> &[FeatureFilter] {
        &self.track_filters
    }

    /// Indices of the tracks in `tracks` that pass every filter.
    pub fn evaluate(&self, tracks: &TrackModel, features: &FeatureModel) -> BTreeSet<TrackIndex> {
        tracks
            .track_indices()
            .filter(|index| {
                self.track_filters
                    .iter()
                    .all(|f| f.accepts(features.get_track_feature(*index, &f.feature)))
            })
            .collect()
    }

    // ========================================================================
    // SPOT FILTERS
    // ========================================================================

    pub fn add_spot_filter(&mut self, filter: FeatureFilter) {
        self.spot_filters.push(filter);
        self.revision += 1;
    }

    pub fn remove_spot_filter(&mut self, filter: &FeatureFilter) -> bool {
        match self.spot_filters.iter().position(|f| f == filter) {
            Some(pos) => {
                self.spot_filters.remove(pos);
                self.revision += 1;
                true
            }
            None => false,
        }
    }

    pub fn clear_spot_filters(&mut self) {
        if !self.spot_filters.is_empty() {
            self.spot_filters.clear();
            self.revision += 1;
        }
    }

    pub fn spot_filters(&self) -> &[FeatureFilter] {
        &self.spot_filters
    }

    /// Ids of the spots that pass every spot filter.
    pub fn evaluate_spots(&self, graph: &TrackGraph) -> BTreeSet<SpotId> {
        graph
            .spots()
            .filter(|spot| self.spot_filters.iter().all(|f| f.accepts(spot.feature(&f.feature))))
            .map(|spot| spot.id())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spot::Spot;
    use crate::tracklab_features::{Analyzer, AnalyzerError, CancelToken, FeatureAnalyzer};
    use crate::tracklab_tracks::Track;
    use crate::values::FeatureMap;
    use nalgebra::Vector3;

    /// SIZE = number of spots in the track.
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

    /// Tracks of size 1, 2 and 3.
    fn setup() -> (TrackGraph, TrackModel, FeatureModel) {
        let mut graph = TrackGraph::new();
        for len in 1..=3usize {
            let ids: Vec<SpotId> = (0..len)
                .map(|f| graph.add_spot(Spot::new(Vector3::new(len as f64, 0.0, 0.0), f)).unwrap())
                .collect();
            for pair in ids.windows(2) {
                graph.add_edge(pair[0], pair[1], 1.0).unwrap();
            }
        }
        let mut tracks = TrackModel::new();
        tracks.rebuild_track_index(&graph);
        (graph, tracks, FeatureModel::new())
    }

    fn compute_sizes(graph: &TrackGraph, tracks: &TrackModel, features: &mut FeatureModel) {
        features.register_analyzer(Analyzer::track(SizeAnalyzer)).unwrap();
        let all: Vec<TrackIndex> = tracks.track_indices().collect();
        features
            .compute_track_features(graph, tracks, &all, None, &CancelToken::new())
            .unwrap();
    }

    #[test]
    fn test_accepts_directions() {
        let above = FeatureFilter::above("AREA", 10.0);
        assert!(above.accepts(FeatureValue::Known(10.0)));
        assert!(above.accepts(FeatureValue::Known(11.0)));
        assert!(!above.accepts(FeatureValue::Known(9.9)));

        let below = FeatureFilter::below("AREA", 10.0);
        assert!(below.accepts(FeatureValue::Known(10.0)));
        assert!(!below.accepts(FeatureValue::Known(10.1)));
    }

    #[test]
    fn test_unknown_and_nan_fail_closed() {
        for filter in [FeatureFilter::above("AREA", 0.0), FeatureFilter::below("AREA", 0.0)] {
            assert!(!filter.accepts(FeatureValue::Unknown));
            assert!(!filter.accepts(FeatureValue::Known(f64::NAN)));
        }
    }

    #[test]
    fn test_no_filters_shows_everything() {
        let (_graph, tracks, features) = setup();
        let engine = FilterEngine::new();
        assert_eq!(engine.evaluate(&tracks, &features).len(), 3);
    }

    #[test]
    fn test_uncomputed_feature_hides_every_track() {
        let (_graph, tracks, features) = setup();
        let mut engine = FilterEngine::new();
        engine.add_filter("area", 10.0, FilterDirection::Above);

        assert!(engine.evaluate(&tracks, &features).is_empty());
    }

    #[test]
    fn test_filters_are_anded_in_any_order() {
        let (graph, tracks, mut features) = setup();
        compute_sizes(&graph, &tracks, &mut features);

        let mut forward = FilterEngine::new();
        forward.add_track_filter(FeatureFilter::above("SIZE", 2.0));
        forward.add_track_filter(FeatureFilter::below("SIZE", 2.0));

        let mut backward = FilterEngine::new();
        backward.add_track_filter(FeatureFilter::below("SIZE", 2.0));
        backward.add_track_filter(FeatureFilter::above("SIZE", 2.0));

        let visible = forward.evaluate(&tracks, &features);
        assert_eq!(visible, backward.evaluate(&tracks, &features));
        assert_eq!(visible.len(), 1);

        let index = *visible.iter().next().unwrap();
        assert_eq!(tracks.track_spots(index).unwrap().len(), 2);
    }

    #[test]
    fn test_remove_filter_bumps_revision() {
        let mut engine = FilterEngine::new();
        let filter = FeatureFilter::above("SIZE", 2.0);
        engine.add_track_filter(filter.clone());
        let revision = engine.revision();

        assert!(engine.remove_filter(&filter));
        assert!(engine.revision() > revision);
        assert!(!engine.remove_filter(&filter));
        assert!(engine.filters().is_empty());
    }

    #[test]
    fn test_spot_filters() {
        let mut graph = TrackGraph::new();
        let bright = graph
            .add_spot(Spot::detected(Vector3::zeros(), 0, 1.0, 50.0))
            .unwrap();
        graph.add_spot(Spot::detected(Vector3::zeros(), 0, 1.0, 5.0)).unwrap();
        graph.add_spot(Spot::new(Vector3::zeros(), 0)).unwrap();

        let mut engine = FilterEngine::new();
        assert_eq!(engine.evaluate_spots(&graph).len(), 3);

        engine.add_spot_filter(FeatureFilter::above(crate::spot::QUALITY, 10.0));
        assert_eq!(engine.evaluate_spots(&graph), BTreeSet::from([bright]));
    }
}
