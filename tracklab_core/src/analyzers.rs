//! Stock analyzers.
//!
//! Examples of the analyzer contract covering the usual position, motion and
//! topology features. Each one is a pure function of its entity and the graph.

use crate::settings::Settings;
use crate::spot::Spot;
use crate::tracklab_features::{Analyzer, AnalyzerError, FeatureAnalyzer};
use crate::tracklab_graph::{Edge, TrackGraph};
use crate::tracklab_tracks::Track;
use crate::values::FeatureMap;

pub const POSITION_X: &str = "POSITION_X";
pub const POSITION_Y: &str = "POSITION_Y";
pub const POSITION_Z: &str = "POSITION_Z";
pub const POSITION_T: &str = "POSITION_T";
pub const LINK_COUNT: &str = "LINK_COUNT";

pub const DISPLACEMENT: &str = "DISPLACEMENT";
pub const VELOCITY: &str = "VELOCITY";
pub const EDGE_TIME: &str = "EDGE_TIME";

pub const NUMBER_SPOTS: &str = "NUMBER_SPOTS";
pub const NUMBER_GAPS: &str = "NUMBER_GAPS";
pub const NUMBER_SPLITS: &str = "NUMBER_SPLITS";
pub const NUMBER_MERGES: &str = "NUMBER_MERGES";

pub const TRACK_START: &str = "TRACK_START";
pub const TRACK_STOP: &str = "TRACK_STOP";
pub const TRACK_DURATION: &str = "TRACK_DURATION";
pub const TRACK_DISPLACEMENT: &str = "TRACK_DISPLACEMENT";

pub const TRACK_MEAN_SPEED: &str = "TRACK_MEAN_SPEED";
pub const TRACK_MAX_SPEED: &str = "TRACK_MAX_SPEED";

/// Every stock analyzer, calibrated with the settings' frame interval.
pub fn stock_analyzers(settings: &Settings) -> Vec<Analyzer> {
    let dt = settings.frame_interval;
    vec![
        Analyzer::spot(SpotPositionAnalyzer::new(dt)),
        Analyzer::spot(SpotDegreeAnalyzer),
        Analyzer::edge(EdgeVelocityAnalyzer::new(dt)),
        Analyzer::track(TrackBranchingAnalyzer),
        Analyzer::track(TrackDurationAnalyzer::new(dt)),
        Analyzer::track(TrackSpeedAnalyzer::new(dt)),
    ]
}

fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|n| n.to_string()).collect()
}

fn endpoints<'g>(edge: &Edge, graph: &'g TrackGraph) -> Result<(&'g Spot, &'g Spot), AnalyzerError> {
    let source = graph
        .spot(edge.source())
        .ok_or_else(|| AnalyzerError::MissingInput(format!("spot {}", edge.source())))?;
    let target = graph
        .spot(edge.target())
        .ok_or_else(|| AnalyzerError::MissingInput(format!("spot {}", edge.target())))?;
    Ok((source, target))
}

fn member_spots<'g>(track: &Track, graph: &'g TrackGraph) -> Result<Vec<&'g Spot>, AnalyzerError> {
    track
        .spots
        .iter()
        .map(|id| {
            graph
                .spot(*id)
                .ok_or_else(|| AnalyzerError::MissingInput(format!("spot {}", id)))
        })
        .collect()
}

// ============================================================================
// SPOT ANALYZERS
// ============================================================================

/// Coordinates and time of a spot.
#[derive(Debug, Clone)]
pub struct SpotPositionAnalyzer {
    frame_interval: f64,
}

impl SpotPositionAnalyzer {
    pub fn new(frame_interval: f64) -> Self {
        Self { frame_interval }
    }
}

impl FeatureAnalyzer<Spot> for SpotPositionAnalyzer {
    fn key(&self) -> &str {
        "spot_position"
    }

    fn features(&self) -> Vec<String> {
        names(&[POSITION_X, POSITION_Y, POSITION_Z, POSITION_T])
    }

    fn compute(&self, spot: &Spot, _graph: &TrackGraph) -> Result<FeatureMap, AnalyzerError> {
        let p = spot.position();
        Ok(FeatureMap::new()
            .with(POSITION_X, p.x)
            .with(POSITION_Y, p.y)
            .with(POSITION_Z, p.z)
            .with(POSITION_T, spot.frame() as f64 * self.frame_interval))
    }
}

/// Number of links touching a spot.
#[derive(Debug, Clone, Copy)]
pub struct SpotDegreeAnalyzer;

impl FeatureAnalyzer<Spot> for SpotDegreeAnalyzer {
    fn key(&self) -> &str {
        "spot_degree"
    }

    fn features(&self) -> Vec<String> {
        names(&[LINK_COUNT])
    }

    fn compute(&self, spot: &Spot, graph: &TrackGraph) -> Result<FeatureMap, AnalyzerError> {
        Ok(FeatureMap::new().with(LINK_COUNT, graph.degree(spot.id()) as f64))
    }
}

// ============================================================================
// EDGE ANALYZERS
// ============================================================================

/// Displacement, velocity and mean time of a link.
#[derive(Debug, Clone)]
pub struct EdgeVelocityAnalyzer {
    frame_interval: f64,
}

impl EdgeVelocityAnalyzer {
    pub fn new(frame_interval: f64) -> Self {
        Self { frame_interval }
    }
}

impl FeatureAnalyzer<Edge> for EdgeVelocityAnalyzer {
    fn key(&self) -> &str {
        "edge_velocity"
    }

    fn features(&self) -> Vec<String> {
        names(&[DISPLACEMENT, VELOCITY, EDGE_TIME])
    }

    fn compute(&self, edge: &Edge, graph: &TrackGraph) -> Result<FeatureMap, AnalyzerError> {
        let (source, target) = endpoints(edge, graph)?;
        let displacement = source.distance_to(target);
        let frames = target.frame().abs_diff(source.frame());
        let elapsed = frames as f64 * self.frame_interval;
        if elapsed <= 0.0 {
            return Err(AnalyzerError::failed(format!(
                "no time elapses along {} (frames {} and {})",
                edge.key(),
                source.frame(),
                target.frame()
            )));
        }

        let mean_frame = (source.frame() + target.frame()) as f64 / 2.0;
        Ok(FeatureMap::new()
            .with(DISPLACEMENT, displacement)
            .with(VELOCITY, displacement / elapsed)
            .with(EDGE_TIME, mean_frame * self.frame_interval))
    }
}

// ============================================================================
// TRACK ANALYZERS
// ============================================================================

/// Spot count, gaps, splits and merges.
///
/// A gap is a link spanning more than one frame. A split is a spot with more
/// than one link to later frames; a merge is one with more than one link from
/// earlier frames.
#[derive(Debug, Clone, Copy)]
pub struct TrackBranchingAnalyzer;

impl FeatureAnalyzer<Track> for TrackBranchingAnalyzer {
    fn key(&self) -> &str {
        "track_branching"
    }

    fn features(&self) -> Vec<String> {
        names(&[NUMBER_SPOTS, NUMBER_GAPS, NUMBER_SPLITS, NUMBER_MERGES])
    }

    fn compute(&self, track: &Track, graph: &TrackGraph) -> Result<FeatureMap, AnalyzerError> {
        let mut gaps = 0usize;
        for key in &track.edges {
            let edge = graph
                .edge(*key)
                .ok_or_else(|| AnalyzerError::MissingInput(format!("edge {}", key)))?;
            let (source, target) = endpoints(edge, graph)?;
            if target.frame().abs_diff(source.frame()) > 1 {
                gaps += 1;
            }
        }

        let mut splits = 0usize;
        let mut merges = 0usize;
        for spot in member_spots(track, graph)? {
            let mut forward = 0;
            let mut backward = 0;
            for neighbor in graph.neighbors(spot.id()).filter_map(|id| graph.spot(id)) {
                if neighbor.frame() > spot.frame() {
                    forward += 1;
                } else if neighbor.frame() < spot.frame() {
                    backward += 1;
                }
            }
            if forward > 1 {
                splits += 1;
            }
            if backward > 1 {
                merges += 1;
            }
        }

        Ok(FeatureMap::new()
            .with(NUMBER_SPOTS, track.spot_count() as f64)
            .with(NUMBER_GAPS, gaps as f64)
            .with(NUMBER_SPLITS, splits as f64)
            .with(NUMBER_MERGES, merges as f64))
    }
}

/// Start, stop, duration and net displacement.
///
/// Displacement is measured between the first and the last spot in time
/// (ties broken by spot id).
#[derive(Debug, Clone)]
pub struct TrackDurationAnalyzer {
    frame_interval: f64,
}

impl TrackDurationAnalyzer {
    pub fn new(frame_interval: f64) -> Self {
        Self { frame_interval }
    }
}

impl FeatureAnalyzer<Track> for TrackDurationAnalyzer {
    fn key(&self) -> &str {
        "track_duration"
    }

    fn features(&self) -> Vec<String> {
        names(&[TRACK_START, TRACK_STOP, TRACK_DURATION, TRACK_DISPLACEMENT])
    }

    fn compute(&self, track: &Track, graph: &TrackGraph) -> Result<FeatureMap, AnalyzerError> {
        let spots = member_spots(track, graph)?;
        let first = spots
            .iter()
            .min_by_key(|s| (s.frame(), s.id()))
            .ok_or_else(|| AnalyzerError::MissingInput("track has no spots".to_string()))?;
        let last = spots
            .iter()
            .max_by_key(|s| (s.frame(), std::cmp::Reverse(s.id())))
            .ok_or_else(|| AnalyzerError::MissingInput("track has no spots".to_string()))?;

        let start = first.frame() as f64 * self.frame_interval;
        let stop = last.frame() as f64 * self.frame_interval;
        Ok(FeatureMap::new()
            .with(TRACK_START, start)
            .with(TRACK_STOP, stop)
            .with(TRACK_DURATION, stop - start)
            .with(TRACK_DISPLACEMENT, first.distance_to(last)))
    }
}

/// Mean and maximum link speed. Single-spot tracks get no values.
#[derive(Debug, Clone)]
pub struct TrackSpeedAnalyzer {
    frame_interval: f64,
}

impl TrackSpeedAnalyzer {
    pub fn new(frame_interval: f64) -> Self {
        Self { frame_interval }
    }
}

impl FeatureAnalyzer<Track> for TrackSpeedAnalyzer {
    fn key(&self) -> &str {
        "track_speed"
    }

    fn features(&self) -> Vec<String> {
        names(&[TRACK_MEAN_SPEED, TRACK_MAX_SPEED])
    }

    fn compute(&self, track: &Track, graph: &TrackGraph) -> Result<FeatureMap, AnalyzerError> {
        let mut speeds = Vec::with_capacity(track.edge_count());
        for key in &track.edges {
            let edge = graph
                .edge(*key)
                .ok_or_else(|| AnalyzerError::MissingInput(format!("edge {}", key)))?;
            let (source, target) = endpoints(edge, graph)?;
            let elapsed = target.frame().abs_diff(source.frame()) as f64 * self.frame_interval;
            if elapsed > 0.0 {
                speeds.push(source.distance_to(target) / elapsed);
            }
        }

        if speeds.is_empty() {
            return Ok(FeatureMap::new());
        }

        let mean = speeds.iter().sum::<f64>() / speeds.len() as f64;
        let max = speeds.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        Ok(FeatureMap::new()
            .with(TRACK_MEAN_SPEED, mean)
            .with(TRACK_MAX_SPEED, max))
    }
}
