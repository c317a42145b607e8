//! candor-hw — frame sources for the analysis pipeline.
//!
//! Provides V4L2 camera capture, image-sequence playback and (with the
//! `ffmpeg` feature) video file decoding, all as grayscale
//! [`FrameSource`](candor_core::sampling::FrameSource)s.

pub mod camera;
pub mod image_sequence;
pub mod pixel;
pub mod source;
#[cfg(feature = "ffmpeg")]
pub mod video;

pub use camera::{Camera, CameraError, CameraStream, DeviceInfo, PixelFormat};
pub use image_sequence::ImageSequence;
pub use source::{open_media, SourceError};
