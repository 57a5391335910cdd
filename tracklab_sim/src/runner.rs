//! Scenario runner - executes pipeline scenarios against the model.
//!
//! Every scenario renders its frames once, then runs the full pipeline
//! (clear, segment, link, compute features) several times on the same model.
//! All repetitions must produce the same fingerprint.

use crate::error::SimError;
use crate::fingerprint::Fingerprint;
use crate::linker::NearestNeighborLinker;
use crate::oracle::{Oracle, SyntheticFrame};
use crate::scenarios::ScenarioId;
use crate::segmenter::SyntheticSegmenter;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;
use tracing::{debug, info, warn};
use tracklab_core::analyzers::NUMBER_GAPS;
use tracklab_core::{EdgeKey, Model, Settings, SpotId, StatsTables, TrackIndex};

/// Results from running a scenario.
#[derive(Debug, Clone)]
pub struct ScenarioResult {
    /// Scenario that was run
    pub scenario: ScenarioId,

    /// Seed used
    pub seed: u64,

    /// Whether scenario passed all assertions
    pub passed: bool,

    /// Frames rendered
    pub frames: usize,

    /// Pipeline repetitions executed
    pub repetitions: usize,

    /// Spots in the model at the end
    pub final_spot_count: usize,

    /// Tracks in the model at the end
    pub final_track_count: usize,

    /// Failure message if any
    pub failure_reason: Option<String>,

    /// Metrics collected during run
    pub metrics: ScenarioMetrics,

    /// Statistics tables of the last repetition
    pub stats: Option<StatsTables>,
}

/// Metrics collected during scenario execution.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScenarioMetrics {
    /// Blobs produced by particles
    pub particle_blobs: u64,

    /// Clutter blobs rendered
    pub clutter_blobs: u64,

    /// Spots ingested by the last repetition
    pub spots_detected: u64,

    /// Blobs the segmenter dropped
    pub blobs_rejected: u64,

    pub links_accepted: u64,
    pub links_rejected: u64,

    pub tracks: u64,
    pub visible_tracks: u64,

    /// (analyzer, entity) failures over all batches of the last repetition
    pub analyzer_failures: u64,

    /// Sum of NUMBER_GAPS over all tracks
    pub gaps_closed: u64,

    /// Link edits applied (EditStorm only)
    pub edits: u64,

    /// Mean wall time of one pipeline repetition
    pub secs_per_repetition: f64,
}

/// Final state of a scenario run that completed without a hard error.
struct Outcome {
    spots: usize,
    tracks: usize,
    stats: StatsTables,
}

fn check(condition: bool, msg: impl FnOnce() -> String) -> Result<(), SimError> {
    if condition {
        Ok(())
    } else {
        Err(SimError::Check(msg()))
    }
}

/// Runs pipeline scenarios.
pub struct ScenarioRunner {
    /// Configuration seed
    seed: u64,

    /// Frames per scenario
    frames: usize,

    /// Pipeline repetitions (raised to the scenario minimum)
    repeats: usize,

    /// Edits applied by EditStorm
    edits: usize,

    settings: Settings,
}

impl ScenarioRunner {
    /// Creates a new scenario runner.
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            frames: 30,
            repeats: 3,
            edits: 12,
            settings: Settings::default(),
        }
    }

    /// Sets the number of frames.
    pub fn with_frames(mut self, frames: usize) -> Self {
        self.frames = frames;
        self
    }

    /// Sets the number of pipeline repetitions.
    pub fn with_repeats(mut self, repeats: usize) -> Self {
        self.repeats = repeats;
        self
    }

    /// Sets the number of EditStorm edits.
    pub fn with_edits(mut self, edits: usize) -> Self {
        self.edits = edits;
        self
    }

    /// Sets the pipeline settings.
    pub fn with_settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    /// Repetitions actually executed for `scenario`.
    pub fn repeats_for(&self, scenario: ScenarioId) -> usize {
        self.repeats.max(scenario.min_repeats())
    }

    /// Runs a scenario and returns the result.
    pub fn run(&self, scenario: ScenarioId) -> ScenarioResult {
        info!("Starting scenario: {} (seed={})", scenario.name(), self.seed);

        let mut metrics = ScenarioMetrics::default();
        let outcome = self.run_checked(scenario, &mut metrics);

        let (passed, failure_reason, spots, tracks, stats) = match outcome {
            Ok(o) => {
                info!(
                    "✓ {} complete: {} spots, {} tracks, {:.4}s per repetition",
                    scenario.name(),
                    o.spots,
                    o.tracks,
                    metrics.secs_per_repetition
                );
                (true, None, o.spots, o.tracks, Some(o.stats))
            }
            Err(e) => {
                warn!("{} failed: {}", scenario.name(), e);
                (false, Some(e.to_string()), 0, 0, None)
            }
        };

        ScenarioResult {
            scenario,
            seed: self.seed,
            passed,
            frames: self.frames,
            repetitions: self.repeats_for(scenario),
            final_spot_count: spots,
            final_track_count: tracks,
            failure_reason,
            metrics,
            stats,
        }
    }

    fn run_checked(&self, scenario: ScenarioId, metrics: &mut ScenarioMetrics) -> Result<Outcome, SimError> {
        if self.frames < 2 {
            return Err(SimError::InvalidConfig(format!("need at least 2 frames, got {}", self.frames)));
        }

        let config = scenario.oracle_config();
        let particles = config.particles;
        let frames = Oracle::new(self.seed, config)?.generate(self.frames);
        metrics.particle_blobs = frames.iter().map(|f| f.particle_blobs() as u64).sum();
        metrics.clutter_blobs = frames.iter().map(|f| f.clutter_blobs() as u64).sum();

        let mut model = Model::new(self.settings.clone());
        model.register_stock_analyzers()?;

        let reference = self.run_repetitions(scenario, &mut model, &frames, metrics)?;

        check(model.graph().is_consistent(), || "graph is inconsistent".to_string())?;
        check(metrics.analyzer_failures == 0, || {
            format!("{} analyzer failures", metrics.analyzer_failures)
        })?;

        match scenario {
            ScenarioId::Sparse | ScenarioId::Repeat => {
                check(metrics.links_rejected == 0, || {
                    format!("{} links rejected", metrics.links_rejected)
                })?;
                self.check_one_track_per_particle(&mut model, particles)?;
                for index in model.track_indices() {
                    let size = model.track_spots(index)?.len();
                    check(size == self.frames, || {
                        format!("track {} holds {} spots, expected {}", index, size, self.frames)
                    })?;
                }
            }
            ScenarioId::Crowded => {
                check(metrics.spots_detected == metrics.particle_blobs, || {
                    format!(
                        "{} spots detected from {} particle blobs and {} clutter blobs",
                        metrics.spots_detected, metrics.particle_blobs, metrics.clutter_blobs
                    )
                })?;
            }
            ScenarioId::Blinking => {
                self.check_one_track_per_particle(&mut model, particles)?;
                check(metrics.gaps_closed > 0, || "no gap was closed".to_string())?;
            }
            ScenarioId::EditStorm => {
                self.run_edit_storm(&mut model, &reference, metrics)?;
            }
        }

        let stats = StatsTables::collect(&mut model)?;
        Ok(Outcome {
            spots: model.graph().spot_count(),
            tracks: model.track_model().track_count(),
            stats,
        })
    }

    /// Runs the pipeline repeatedly and returns the first fingerprint.
    fn run_repetitions(
        &self,
        scenario: ScenarioId,
        model: &mut Model,
        frames: &[SyntheticFrame],
        metrics: &mut ScenarioMetrics,
    ) -> Result<Fingerprint, SimError> {
        let repeats = self.repeats_for(scenario);
        let mut reference: Option<Fingerprint> = None;
        let mut elapsed = 0.0;

        for repetition in 0..repeats {
            let start = Instant::now();
            let fingerprint = self.run_pipeline(model, frames, metrics)?;
            elapsed += start.elapsed().as_secs_f64();

            debug!(
                "  repetition {} | spots={} | tracks={}",
                repetition,
                fingerprint.spot_count(),
                fingerprint.track_count()
            );

            match &reference {
                None => reference = Some(fingerprint),
                Some(first) => check(*first == fingerprint, || {
                    format!("repetition {} differs from repetition 0", repetition)
                })?,
            }
        }

        metrics.secs_per_repetition = elapsed / repeats as f64;
        reference.ok_or_else(|| SimError::InvalidConfig("at least one repetition is required".to_string()))
    }

    /// Clear, segment, link, compute. Returns the fingerprint of the result.
    fn run_pipeline(
        &self,
        model: &mut Model,
        frames: &[SyntheticFrame],
        metrics: &mut ScenarioMetrics,
    ) -> Result<Fingerprint, SimError> {
        model.clear();

        let segmentation = model.exec_segmentation(&SyntheticSegmenter, frames)?;
        let linking = model.exec_tracking(&NearestNeighborLinker)?;
        let reports = model.compute_all_features()?;

        let total_blobs = metrics.particle_blobs + metrics.clutter_blobs;
        metrics.spots_detected = segmentation.added.len() as u64;
        metrics.blobs_rejected = total_blobs.saturating_sub(metrics.spots_detected);
        metrics.links_accepted = linking.accepted.len() as u64;
        metrics.links_rejected = linking.rejected.len() as u64;
        metrics.analyzer_failures = reports.iter().map(|r| r.failures.len() as u64).sum();

        let indices = model.track_indices();
        metrics.tracks = indices.len() as u64;
        metrics.visible_tracks = model.visible_track_indices().len() as u64;
        metrics.gaps_closed = indices
            .iter()
            .filter_map(|i| model.track_feature(*i, NUMBER_GAPS).known())
            .sum::<f64>() as u64;

        Ok(Fingerprint::of(model))
    }

    fn check_one_track_per_particle(&self, model: &mut Model, particles: usize) -> Result<(), SimError> {
        let tracks = model.track_indices().len();
        check(tracks == particles, || {
            format!("{} tracks for {} particles", tracks, particles)
        })
    }

    /// Removes random links one at a time, checking index stability after
    /// each rebuild, then restores them in reverse order and expects the
    /// unedited fingerprint back.
    fn run_edit_storm(
        &self,
        model: &mut Model,
        reference: &Fingerprint,
        metrics: &mut ScenarioMetrics,
    ) -> Result<(), SimError> {
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed.wrapping_mul(0x9e3779b97f4a7c15));
        let mut removed: Vec<(SpotId, SpotId, f64)> = Vec::new();

        for _ in 0..self.edits {
            let keys: Vec<EdgeKey> = model.graph().edge_keys().collect();
            if keys.is_empty() {
                break;
            }
            let key = keys[rng.gen_range(0..keys.len())];
            let before = memberships(model);

            let Some(edge) = model.graph().edge(key) else {
                continue;
            };
            let (source, target) = (edge.source(), edge.target());
            let edge = model.remove_edge(source, target)?;
            removed.push((source, target, edge.weight()));
            metrics.edits += 1;

            let after = memberships(model);
            check(model.graph().is_consistent(), || {
                format!("graph inconsistent after unlinking {} -> {}", source, target)
            })?;
            for (members, index) in &after {
                if let Some(previous) = before.get(members) {
                    check(previous == index, || {
                        format!("untouched track moved from index {} to {}", previous, index)
                    })?;
                }
            }
        }

        for (source, target, weight) in removed.into_iter().rev() {
            model.add_edge(source, target, Some(weight))?;
            model.rebuild_track_index();
        }
        model.compute_all_features()?;

        check(Fingerprint::of(model) == *reference, || {
            "relinking did not restore the unedited model".to_string()
        })
    }
}

/// Member set of every track, keyed to its index, after a refresh.
fn memberships(model: &mut Model) -> BTreeMap<BTreeSet<SpotId>, TrackIndex> {
    model.track_indices();
    model
        .track_model()
        .tracks()
        .map(|t| (t.spots.clone(), t.index))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runner() -> ScenarioRunner {
        ScenarioRunner::new(42).with_frames(8).with_repeats(2)
    }

    #[test]
    fn test_sparse_passes() {
        let result = runner().run(ScenarioId::Sparse);
        assert!(result.passed, "{:?}", result.failure_reason);
        assert_eq!(result.final_track_count, 10);
        assert_eq!(result.final_spot_count, 80);
        assert_eq!(result.metrics.links_accepted, 70);

        let stats = result.stats.unwrap();
        assert_eq!(stats.tracks.rows.len(), 10);
        assert_eq!(stats.spots.rows.len(), 80);
    }

    #[test]
    fn test_crowded_rejects_clutter() {
        let result = runner().run(ScenarioId::Crowded);
        assert!(result.passed, "{:?}", result.failure_reason);
        assert_eq!(result.metrics.clutter_blobs, 8 * 40);
        assert_eq!(result.metrics.blobs_rejected, result.metrics.clutter_blobs);
    }

    #[test]
    fn test_blinking_closes_gaps() {
        let result = runner().run(ScenarioId::Blinking);
        assert!(result.passed, "{:?}", result.failure_reason);
        assert_eq!(result.final_track_count, 20);
        assert!(result.metrics.gaps_closed > 0);
    }

    #[test]
    fn test_repeat_uses_scenario_minimum() {
        let result = runner().run(ScenarioId::Repeat);
        assert!(result.passed, "{:?}", result.failure_reason);
        assert_eq!(result.repetitions, 15);
        assert!(result.metrics.secs_per_repetition >= 0.0);
    }

    #[test]
    fn test_edit_storm_keeps_indices() {
        let result = runner().with_edits(6).run(ScenarioId::EditStorm);
        assert!(result.passed, "{:?}", result.failure_reason);
        assert_eq!(result.metrics.edits, 6);
        assert_eq!(result.final_track_count, 10);
    }

    #[test]
    fn test_median_filter_off_fails_crowded() {
        let mut settings = Settings::default();
        settings.segmenter_settings.use_median_filter = false;

        let result = runner().with_settings(settings).run(ScenarioId::Crowded);
        assert!(!result.passed);
        assert!(result.stats.is_none());
        assert!(result.failure_reason.unwrap().contains("clutter"));
    }

    #[test]
    fn test_single_frame_is_rejected() {
        let result = ScenarioRunner::new(1).with_frames(1).run(ScenarioId::Sparse);
        assert!(!result.passed);
    }
}
