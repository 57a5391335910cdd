//! JSON exporter for scenario runs.
//!
//! Writes the run summary together with the three statistics tables of the
//! last repetition.

use serde::Serialize;
use std::fs::File;
use std::io::Write;
use tracklab_core::{Settings, StatsTables};

use crate::runner::{ScenarioMetrics, ScenarioResult};

/// Complete export of one scenario run.
#[derive(Debug, Clone, Serialize)]
pub struct RunExport {
    /// Scenario name
    pub scenario: String,

    /// Seed used
    pub seed: u64,

    pub frames: usize,
    pub repetitions: usize,

    /// Settings the pipeline ran with
    pub settings: Settings,

    pub passed: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,

    pub metrics: ScenarioMetrics,

    /// Statistics tables; absent when the run failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<StatsTables>,
}

impl RunExport {
    /// Builds the export from a finished run.
    pub fn new(result: &ScenarioResult, settings: &Settings) -> Self {
        Self {
            scenario: result.scenario.name().to_string(),
            seed: result.seed,
            frames: result.frames,
            repetitions: result.repetitions,
            settings: settings.clone(),
            passed: result.passed,
            failure_reason: result.failure_reason.clone(),
            metrics: result.metrics.clone(),
            stats: result.stats.clone(),
        }
    }

    /// Writes to a JSON file.
    pub fn write_to_file(&self, path: &str) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }
}
