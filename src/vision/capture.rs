//! Face capture debounce, cropping, and camera retry backoff

use std::time::Duration;

use image::RgbImage;
use image::codecs::jpeg::JpegEncoder;

use super::analyzer::{BoundingBox, Detection};
use super::camera::Frame;
use crate::{Error, Result};

/// JPEG quality for face crops
const JPEG_QUALITY: u8 = 90;

/// Face capture parameters
#[derive(Debug, Clone, Copy)]
pub struct CaptureConfig {
    /// Minimum face box side in pixels
    pub min_face_size: f32,
    /// Accepted width/height ratio range (inclusive)
    pub min_aspect: f32,
    pub max_aspect: f32,
    /// Consecutive qualifying frames before capture
    pub frames_threshold: u32,
    /// Extra margin around the face box, as a fraction of its size
    pub padding: f32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            min_face_size: 40.0,
            min_aspect: 0.5,
            max_aspect: 2.0,
            frames_threshold: 5,
            padding: 0.2,
        }
    }
}

impl CaptureConfig {
    /// Sanity filter for a detection box
    #[must_use]
    pub fn qualifies(&self, detection: &Detection) -> bool {
        let b = detection.bounding_box;
        let aspect = b.aspect_ratio();
        b.width >= self.min_face_size
            && b.height >= self.min_face_size
            && (self.min_aspect..=self.max_aspect).contains(&aspect)
    }

    /// Best qualifying detection, by confidence
    #[must_use]
    pub fn best_face(&self, detections: &[Detection]) -> Option<Detection> {
        detections
            .iter()
            .filter(|d| self.qualifies(d))
            .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
            .copied()
    }
}

/// Where the tracker is in the capture protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackStage {
    /// No consistent face
    Searching,
    /// Consecutive detections accumulating
    Tracking,
    /// Capture fired; waiting for the identity to clear
    Captured,
}

/// Result of feeding one frame to the tracker
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TrackStep {
    /// Tracker is captured; the frame was ignored
    Ignored,
    /// No qualifying face: counter reset
    Lost,
    /// Qualifying face seen this many frames in a row
    Tracking(u32),
    /// Threshold reached: crop this box now
    Capture(BoundingBox),
}

/// Temporal debounce over per-frame detections
#[derive(Debug, Clone)]
pub struct FaceTracker {
    config: CaptureConfig,
    stage: TrackStage,
    consecutive: u32,
}

impl FaceTracker {
    #[must_use]
    pub const fn new(config: CaptureConfig) -> Self {
        Self {
            config,
            stage: TrackStage::Searching,
            consecutive: 0,
        }
    }

    #[must_use]
    pub const fn stage(&self) -> TrackStage {
        self.stage
    }

    #[must_use]
    pub const fn consecutive_frames(&self) -> u32 {
        self.consecutive
    }

    #[must_use]
    pub const fn config(&self) -> &CaptureConfig {
        &self.config
    }

    /// Feed the detections of one frame
    pub fn observe(&mut self, detections: &[Detection]) -> TrackStep {
        if self.stage == TrackStage::Captured {
            return TrackStep::Ignored;
        }

        let Some(face) = self.config.best_face(detections) else {
            if self.consecutive > 0 {
                tracing::debug!(frames = self.consecutive, "face lost");
            }
            self.consecutive = 0;
            self.stage = TrackStage::Searching;
            return TrackStep::Lost;
        };

        self.consecutive = self.consecutive.saturating_add(1);

        if self.consecutive >= self.config.frames_threshold {
            self.stage = TrackStage::Captured;
            tracing::debug!(frames = self.consecutive, "face stable, capturing");
            TrackStep::Capture(face.bounding_box)
        } else {
            self.stage = TrackStage::Tracking;
            TrackStep::Tracking(self.consecutive)
        }
    }

    /// Descriptor extraction failed: keep tracking, counter untouched
    pub fn descriptor_failed(&mut self) {
        if self.stage == TrackStage::Captured {
            self.stage = TrackStage::Tracking;
        }
    }

    /// Back to searching with a zero counter
    pub const fn reset(&mut self) {
        self.stage = TrackStage::Searching;
        self.consecutive = 0;
    }
}

/// Departure detection while an identity is locked in
#[derive(Debug, Clone)]
pub struct PresenceWatch {
    absence_frames: u32,
    misses: u32,
}

impl PresenceWatch {
    #[must_use]
    pub const fn new(absence_frames: u32) -> Self {
        Self {
            absence_frames,
            misses: 0,
        }
    }

    /// Feed one presence sample; true once the face counts as gone
    pub fn observe(&mut self, face_present: bool) -> bool {
        if face_present {
            self.misses = 0;
            return false;
        }
        self.misses = self.misses.saturating_add(1);
        self.misses >= self.absence_frames.max(1)
    }

    pub const fn reset(&mut self) {
        self.misses = 0;
    }
}

/// Crop a frame to a face box enlarged by `padding` on every side
///
/// # Errors
///
/// Returns error if the padded box does not overlap the frame
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub fn crop_face(frame: &Frame, bounding_box: BoundingBox, padding: f32) -> Result<Frame> {
    let pad_x = bounding_box.width * padding;
    let pad_y = bounding_box.height * padding;

    let frame_w = frame.width() as f32;
    let frame_h = frame.height() as f32;

    let left = (bounding_box.x - pad_x).clamp(0.0, frame_w);
    let top = (bounding_box.y - pad_y).clamp(0.0, frame_h);
    let right = (bounding_box.x + bounding_box.width + pad_x).clamp(0.0, frame_w);
    let bottom = (bounding_box.y + bounding_box.height + pad_y).clamp(0.0, frame_h);

    let width = (right - left).floor() as u32;
    let height = (bottom - top).floor() as u32;
    if width == 0 || height == 0 {
        return Err(Error::Image("face box outside frame".to_string()));
    }

    let cropped =
        image::imageops::crop_imm(&frame.image, left as u32, top as u32, width, height).to_image();

    Ok(Frame {
        image: cropped,
        captured_at: frame.captured_at,
    })
}

/// Encode an image as JPEG
///
/// # Errors
///
/// Returns error if encoding fails
pub fn encode_jpeg(image: &RgbImage) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, JPEG_QUALITY)
        .encode_image(image)
        .map_err(|e| Error::Image(e.to_string()))?;
    Ok(buf)
}

/// Exponential retry delay for camera access
#[derive(Debug, Clone)]
pub struct CameraBackoff {
    base: Duration,
    cap: Duration,
    advisory_after: u32,
    failures: u32,
}

impl CameraBackoff {
    #[must_use]
    pub const fn new(base: Duration, cap: Duration, advisory_after: u32) -> Self {
        Self {
            base,
            cap,
            advisory_after,
            failures: 0,
        }
    }

    /// Record a failed grab and return the delay before the next attempt
    pub fn record_failure(&mut self) -> Duration {
        self.failures = self.failures.saturating_add(1);
        let shift = (self.failures - 1).min(16);
        self.base.saturating_mul(1 << shift).min(self.cap)
    }

    /// Record a successful grab; true if this ends a failure streak
    pub const fn record_success(&mut self) -> bool {
        let recovered = self.failures > 0;
        self.failures = 0;
        recovered
    }

    /// Whether failures have repeated enough to tell the user
    #[must_use]
    pub const fn should_advise(&self) -> bool {
        self.failures >= self.advisory_after
    }

    #[must_use]
    pub const fn failures(&self) -> u32 {
        self.failures
    }
}

impl Default for CameraBackoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(100), Duration::from_secs(1), 3)
    }
}
