//! Synthetic segmenter: turns rendered blobs into spots.
//!
//! Quality is the blob intensity. With the median filter on, blobs smaller
//! than half the expected radius are treated as speckle and dropped before
//! thresholding.

use thiserror::Error;
use tracklab_core::{SegmenterSettings, Segmenter, Spot};

use crate::oracle::SyntheticFrame;

#[derive(Debug, Error, PartialEq)]
pub enum SegmentError {
    #[error("frame {frame} holds a blob at a non-finite position")]
    NonFinite { frame: usize },

    #[error("expected radius must be positive, got {0}")]
    BadRadius(f64),
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SyntheticSegmenter;

impl Segmenter for SyntheticSegmenter {
    type Frame = SyntheticFrame;
    type Error = SegmentError;

    fn segment(
        &self,
        settings: &SegmenterSettings,
        frame_index: usize,
        frame: &SyntheticFrame,
    ) -> Result<Vec<Spot>, SegmentError> {
        if !(settings.expected_radius > 0.0) {
            return Err(SegmentError::BadRadius(settings.expected_radius));
        }

        let min_radius = if settings.use_median_filter {
            settings.expected_radius * 0.5
        } else {
            0.0
        };

        let mut spots = Vec::new();
        for blob in &frame.blobs {
            if !blob.position.iter().all(|c| c.is_finite()) {
                return Err(SegmentError::NonFinite { frame: frame_index });
            }
            if blob.radius < min_radius || blob.intensity < settings.threshold {
                continue;
            }
            spots.push(Spot::detected(blob.position, frame_index, blob.radius, blob.intensity));
        }
        Ok(spots)
    }
}
