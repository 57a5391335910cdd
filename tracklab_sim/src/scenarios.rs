//! Pipeline scenarios for deterministic simulation.

use crate::oracle::OracleConfig;

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioId {
    /// SIM-001: Well separated particles, no clutter
    Sparse,

    /// SIM-002: Dense field with speckle clutter
    Crowded,

    /// SIM-003: Particles missing from single frames
    Blinking,

    /// SIM-004: Many full-pipeline repetitions from a cleared model
    Repeat,

    /// SIM-005: Random link edits between rebuilds
    EditStorm,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::Sparse,
            ScenarioId::Crowded,
            ScenarioId::Blinking,
            ScenarioId::Repeat,
            ScenarioId::EditStorm,
        ]
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::Sparse => "sparse",
            ScenarioId::Crowded => "crowded",
            ScenarioId::Blinking => "blinking",
            ScenarioId::Repeat => "repeat",
            ScenarioId::EditStorm => "edit_storm",
        }
    }

    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::Sparse => "10 particles, one track each, no rejected links",
            ScenarioId::Crowded => "64 particles and 40 clutter blobs per frame, median filter removes all clutter",
            ScenarioId::Blinking => "20 particles blinking out of single frames, gap closing restores one track each",
            ScenarioId::Repeat => "15 pipeline repetitions, identical fingerprints, time per repetition",
            ScenarioId::EditStorm => "Random unlink/relink edits, untouched tracks keep their index",
        }
    }

    /// Ground truth setup for the scenario.
    pub fn oracle_config(&self) -> OracleConfig {
        match self {
            ScenarioId::Sparse | ScenarioId::Repeat | ScenarioId::EditStorm => OracleConfig::default(),
            ScenarioId::Crowded => OracleConfig {
                particles: 64,
                spacing: 30.0,
                clutter_per_frame: 40,
                ..Default::default()
            },
            ScenarioId::Blinking => OracleConfig {
                particles: 20,
                blink_probability: 0.15,
                ..Default::default()
            },
        }
    }

    /// Minimum number of pipeline repetitions.
    pub fn min_repeats(&self) -> usize {
        match self {
            ScenarioId::Repeat => 15,
            _ => 2,
        }
    }
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ScenarioId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sparse" | "sim-001" => Ok(ScenarioId::Sparse),
            "crowded" | "sim-002" => Ok(ScenarioId::Crowded),
            "blinking" | "sim-003" => Ok(ScenarioId::Blinking),
            "repeat" | "sim-004" => Ok(ScenarioId::Repeat),
            "edit_storm" | "editstorm" | "sim-005" => Ok(ScenarioId::EditStorm),
            _ => Err(format!("Unknown scenario: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_parse_back() {
        for scenario in ScenarioId::all() {
            assert_eq!(scenario.name().parse::<ScenarioId>(), Ok(scenario));
        }
        assert_eq!("SIM-003".parse::<ScenarioId>(), Ok(ScenarioId::Blinking));
        assert!("time_warp".parse::<ScenarioId>().is_err());
    }
}
