//! Opening recorded media by path.

use crate::image_sequence::{is_image_path, ImageSequence};
use candor_core::sampling::FrameSource;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("media not found: {0}")]
    NotFound(PathBuf),
    #[error("no images in directory: {0}")]
    NoImages(PathBuf),
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("video decode failed: {0}")]
    Decode(String),
    #[error("video files need the `ffmpeg` feature: {0}")]
    VideoUnsupported(PathBuf),
}

impl SourceError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Frame source for a directory of stills, a single image, or a video file.
pub fn open_media(path: &Path) -> Result<Box<dyn FrameSource>, SourceError> {
    if path.is_dir() {
        return Ok(Box::new(ImageSequence::from_dir(path)?));
    }
    if !path.exists() {
        return Err(SourceError::NotFound(path.to_path_buf()));
    }
    if is_image_path(path) {
        return Ok(Box::new(ImageSequence::single(path)?));
    }
    open_video(path)
}

#[cfg(feature = "ffmpeg")]
fn open_video(path: &Path) -> Result<Box<dyn FrameSource>, SourceError> {
    Ok(Box::new(crate::video::VideoSource::open(path)?))
}

#[cfg(not(feature = "ffmpeg"))]
fn open_video(path: &Path) -> Result<Box<dyn FrameSource>, SourceError> {
    Err(SourceError::VideoUnsupported(path.to_path_buf()))
}
