//! Camera sampling and face capture
//!
//! Frames are pulled from the camera on a timer, run through the face
//! detector, and debounced by [`FaceTracker`] until a single high-quality
//! crop is taken for descriptor extraction.

mod analyzer;
mod camera;
mod capture;

pub use analyzer::{BoundingBox, Detection, FaceAnalyzer, RemoteFaceAnalyzer};
pub use camera::{Camera, Frame, SnapshotCamera};
pub use capture::{
    CameraBackoff, CaptureConfig, FaceTracker, PresenceWatch, TrackStage, TrackStep, crop_face,
    encode_jpeg,
};
