//! Pipeline settings.
//!
//! Plain serde structs with defaults. They describe how the external
//! segmenter and tracker should be configured and carry the physical
//! calibration (frame interval, units) that analyzers need.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

// ============================================================================
// SEGMENTER
// ============================================================================

/// Detection algorithm variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmenterType {
    /// Laplacian of Gaussian
    Log,
    /// Difference of Gaussians
    Dog,
    /// Local maxima without scale filtering
    PeakPicker,
    /// No automatic detection; spots are added by hand
    Manual,
}

impl SegmenterType {
    pub fn all() -> [SegmenterType; 4] {
        [
            SegmenterType::Log,
            SegmenterType::Dog,
            SegmenterType::PeakPicker,
            SegmenterType::Manual,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            SegmenterType::Log => "log",
            SegmenterType::Dog => "dog",
            SegmenterType::PeakPicker => "peak_picker",
            SegmenterType::Manual => "manual",
        }
    }

    /// Default settings for this variant.
    pub fn create_settings(&self) -> SegmenterSettings {
        let base = SegmenterSettings::default();
        match self {
            SegmenterType::Log => base,
            SegmenterType::Dog => SegmenterSettings {
                use_median_filter: false,
                ..base
            },
            SegmenterType::PeakPicker => SegmenterSettings {
                expected_radius: 2.0,
                threshold: 10.0,
                ..base
            },
            SegmenterType::Manual => SegmenterSettings {
                threshold: 0.0,
                use_median_filter: false,
                ..base
            },
        }
    }
}

impl FromStr for SegmenterType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SegmenterType::all()
            .into_iter()
            .find(|t| t.name() == s)
            .ok_or_else(|| format!("Unknown segmenter type: {}", s))
    }
}

impl fmt::Display for SegmenterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Configuration handed to the segmenter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmenterSettings {
    /// Expected object radius in space units (default: 5.0)
    pub expected_radius: f64,

    /// Minimum quality for a detection to be kept (default: 0.0)
    pub threshold: f64,

    /// Median-filter frames before detection (default: true)
    pub use_median_filter: bool,

    /// Unit of `expected_radius`
    pub space_units: String,
}

impl Default for SegmenterSettings {
    fn default() -> Self {
        Self {
            expected_radius: 5.0,
            threshold: 0.0,
            use_median_filter: true,
            space_units: "µm".to_string(),
        }
    }
}

impl fmt::Display for SegmenterSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Segmenter settings:")?;
        writeln!(f, "  expected radius: {} {}", self.expected_radius, self.space_units)?;
        writeln!(f, "  threshold: {}", self.threshold)?;
        write!(f, "  median filter: {}", self.use_median_filter)
    }
}

// ============================================================================
// TRACKER
// ============================================================================

/// Configuration handed to the tracker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerSettings {
    /// Maximum distance for frame-to-frame links (default: 15.0)
    pub linking_max_distance: f64,

    /// Maximum distance for links across skipped frames (default: 15.0)
    pub gap_closing_max_distance: f64,

    /// Largest frame gap a link may bridge; 1 means adjacent frames only (default: 2)
    pub max_frame_gap: usize,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            linking_max_distance: 15.0,
            gap_closing_max_distance: 15.0,
            max_frame_gap: 2,
        }
    }
}

impl fmt::Display for TrackerSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Tracker settings:")?;
        writeln!(f, "  linking max distance: {}", self.linking_max_distance)?;
        writeln!(f, "  gap closing max distance: {}", self.gap_closing_max_distance)?;
        write!(f, "  max frame gap: {}", self.max_frame_gap)
    }
}

// ============================================================================
// SETTINGS
// ============================================================================

/// Everything a pipeline run needs besides the data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub segmenter_type: SegmenterType,
    pub segmenter_settings: SegmenterSettings,
    pub tracker_settings: TrackerSettings,

    /// Time between frames, in time units (default: 1.0)
    pub frame_interval: f64,

    pub space_units: String,
    pub time_units: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            segmenter_type: SegmenterType::Log,
            segmenter_settings: SegmenterType::Log.create_settings(),
            tracker_settings: TrackerSettings::default(),
            frame_interval: 1.0,
            space_units: "µm".to_string(),
            time_units: "frame".to_string(),
        }
    }
}

impl Settings {
    /// Switches the segmenter variant, keeping radius, threshold, median flag
    /// and units from the current settings.
    pub fn with_segmenter_type(mut self, segmenter_type: SegmenterType) -> Self {
        let old = self.segmenter_settings;
        let mut fresh = segmenter_type.create_settings();
        fresh.expected_radius = old.expected_radius;
        fresh.space_units = old.space_units;
        fresh.threshold = old.threshold;
        fresh.use_median_filter = old.use_median_filter;

        self.segmenter_type = segmenter_type;
        self.segmenter_settings = fresh;
        self
    }

    pub fn with_tracker_settings(mut self, tracker_settings: TrackerSettings) -> Self {
        self.tracker_settings = tracker_settings;
        self
    }

    pub fn with_frame_interval(mut self, frame_interval: f64) -> Self {
        self.frame_interval = frame_interval;
        self
    }

    pub fn from_json_str(json: &str) -> Result<Self, SettingsError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json_pretty(&self) -> Result<String, SettingsError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let text = fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), SettingsError> {
        fs::write(path, self.to_json_pretty()?)?;
        Ok(())
    }
}

impl fmt::Display for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Settings:")?;
        writeln!(f, "  segmenter: {}", self.segmenter_type)?;
        writeln!(f, "  frame interval: {} {}", self.frame_interval, self.time_units)?;
        write!(f, "  space units: {}", self.space_units)
    }
}

/// Errors while loading or saving settings.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Settings I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Settings JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
