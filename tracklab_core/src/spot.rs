//! Spots: single detections in one frame.
//!
//! A spot's identity is fixed at creation and drawn from a process-wide
//! counter, so an identifier is never handed out twice, even after the spot
//! has been deleted from a graph.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::ModelError;
use crate::values::{FeatureMap, FeatureValue};

/// Detector-provided quality score.
pub const QUALITY: &str = "QUALITY";

/// Detector-provided radius estimate, in space units.
pub const RADIUS: &str = "RADIUS";

static NEXT_SPOT_ID: AtomicU64 = AtomicU64::new(0);

/// Globally unique spot identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SpotId(pub u64);

impl SpotId {
    fn next() -> Self {
        SpotId(NEXT_SPOT_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Makes sure the counter never hands out `id` (or anything below it) again.
    fn reserve(id: SpotId) -> Result<(), ModelError> {
        let next = id.0.checked_add(1).ok_or(ModelError::IdOutOfRange(id))?;
        NEXT_SPOT_ID.fetch_max(next, Ordering::Relaxed);
        Ok(())
    }
}

impl fmt::Display for SpotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A detected object in one frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Spot {
    id: SpotId,

    /// Human-readable label (defaults to `ID<n>`)
    name: String,

    /// Position in space units; 2-D data keeps z = 0
    position: Vector3<f64>,

    /// Acquisition time point
    frame: usize,

    /// Sparse feature values
    features: FeatureMap,
}

impl Spot {
    /// Creates a spot with a fresh identifier.
    pub fn new(position: Vector3<f64>, frame: usize) -> Self {
        let id = SpotId::next();
        Self {
            id,
            name: format!("ID{}", id.0),
            position,
            frame,
            features: FeatureMap::new(),
        }
    }

    /// Creates a spot as produced by a detector: position, radius and quality.
    pub fn detected(position: Vector3<f64>, frame: usize, radius: f64, quality: f64) -> Self {
        Self::new(position, frame)
            .with_feature(RADIUS, radius)
            .with_feature(QUALITY, quality)
    }

    /// Rebuilds a spot with a known identifier (e.g. from a snapshot).
    ///
    /// The global counter is advanced past `id`, so spots created afterwards
    /// cannot collide with it.
    pub fn restore(
        id: SpotId,
        name: impl Into<String>,
        position: Vector3<f64>,
        frame: usize,
        features: FeatureMap,
    ) -> Result<Self, ModelError> {
        SpotId::reserve(id)?;
        Ok(Self {
            id,
            name: name.into(),
            position,
            frame,
            features,
        })
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_feature(mut self, name: impl Into<String>, value: f64) -> Self {
        self.features.insert(name, value);
        self
    }

    #[inline]
    pub fn id(&self) -> SpotId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn position(&self) -> Vector3<f64> {
        self.position
    }

    #[inline]
    pub fn frame(&self) -> usize {
        self.frame
    }

    /// Looks up a feature value; `Unknown` if not computed.
    pub fn feature(&self, name: &str) -> FeatureValue {
        self.features.get(name)
    }

    pub fn features(&self) -> &FeatureMap {
        &self.features
    }

    /// Value map access for the feature model; topology is unaffected.
    pub(crate) fn features_mut(&mut self) -> &mut FeatureMap {
        &mut self.features
    }

    /// Euclidean distance to another spot.
    pub fn distance_to(&self, other: &Spot) -> f64 {
        (self.position - other.position).norm()
    }

    pub fn squared_distance_to(&self, other: &Spot) -> f64 {
        (self.position - other.position).norm_squared()
    }
}

impl fmt::Display for Spot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (id={}, frame={}, x={:.3}, y={:.3}, z={:.3})",
            self.name, self.id, self.frame, self.position.x, self.position.y, self.position.z
        )
    }
}
