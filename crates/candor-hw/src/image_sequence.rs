//! Image files as a frame source.
//!
//! A directory of stills (sorted by file name) or a single image stands in
//! for a recording: each file is one frame, decoded to grayscale on demand.

use crate::source::SourceError;
use candor_core::frame::Frame;
use candor_core::sampling::{FrameSource, FrameSourceError};
use std::path::{Path, PathBuf};

const IMAGE_EXTENSIONS: [&str; 6] = ["png", "jpg", "jpeg", "bmp", "webp", "tiff"];

/// True if the path has an image file extension this source can decode.
pub fn is_image_path(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

pub struct ImageSequence {
    files: Vec<PathBuf>,
    position: usize,
    skipped: usize,
}

impl ImageSequence {
    /// Every image file directly inside `dir`, in file-name order.
    pub fn from_dir(dir: &Path) -> Result<Self, SourceError> {
        let entries = std::fs::read_dir(dir).map_err(|e| SourceError::io(dir, e))?;

        let mut files = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| SourceError::io(dir, e))?.path();
            if path.is_file() && is_image_path(&path) {
                files.push(path);
            }
        }
        if files.is_empty() {
            return Err(SourceError::NoImages(dir.to_path_buf()));
        }
        files.sort();

        tracing::info!(dir = %dir.display(), frames = files.len(), "opened image sequence");
        Ok(Self::from_files(files))
    }

    /// A one-frame sequence.
    pub fn single(path: &Path) -> Result<Self, SourceError> {
        if !path.is_file() {
            return Err(SourceError::NotFound(path.to_path_buf()));
        }
        Ok(Self::from_files(vec![path.to_path_buf()]))
    }

    fn from_files(files: Vec<PathBuf>) -> Self {
        Self {
            files,
            position: 0,
            skipped: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Files that could not be decoded so far.
    pub fn skipped(&self) -> usize {
        self.skipped
    }
}

impl FrameSource for ImageSequence {
    fn next_frame(&mut self) -> Result<Option<Frame>, FrameSourceError> {
        while let Some(path) = self.files.get(self.position) {
            let index = self.position;
            self.position += 1;

            let bytes = std::fs::read(path)
                .map_err(|e| FrameSourceError::Read(format!("{}: {e}", path.display())))?;

            // Undecodable stills are dropped like unreadable video frames.
            match Frame::decode(&bytes) {
                Ok(frame) => return Ok(Some(frame.with_index(index))),
                Err(e) => {
                    self.skipped += 1;
                    tracing::warn!(path = %path.display(), error = %e, "skipping undecodable image");
                }
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_image(dir: &Path, name: &str, value: u8) -> PathBuf {
        let path = dir.join(name);
        image::GrayImage::from_pixel(32, 24, image::Luma([value])).save(&path).unwrap();
        path
    }

    fn drain(source: &mut ImageSequence) -> Vec<Frame> {
        let mut frames = Vec::new();
        while let Some(frame) = source.next_frame().unwrap() {
            frames.push(frame);
        }
        frames
    }

    #[test]
    fn test_directory_in_name_order() {
        let dir = tempfile::tempdir().unwrap();
        write_image(dir.path(), "frame_002.png", 20);
        write_image(dir.path(), "frame_000.png", 0);
        write_image(dir.path(), "frame_001.png", 10);
        std::fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();

        let mut source = ImageSequence::from_dir(dir.path()).unwrap();
        assert_eq!(source.len(), 3);

        let frames = drain(&mut source);
        let firsts: Vec<u8> = frames.iter().map(|f| f.data()[0]).collect();
        assert_eq!(firsts, vec![0, 10, 20]);
        let indices: Vec<usize> = frames.iter().map(|f| f.index()).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        assert_eq!((frames[0].width(), frames[0].height()), (32, 24));
    }

    #[test]
    fn test_corrupt_image_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        write_image(dir.path(), "a.png", 50);
        std::fs::write(dir.path().join("b.png"), b"not a png").unwrap();
        write_image(dir.path(), "c.png", 90);

        let mut source = ImageSequence::from_dir(dir.path()).unwrap();
        let frames = drain(&mut source);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1].index(), 2);
        assert_eq!(source.skipped(), 1);
    }

    #[test]
    fn test_empty_directory_rejected() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            ImageSequence::from_dir(dir.path()),
            Err(SourceError::NoImages(_))
        ));
    }

    #[test]
    fn test_single_image() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_image(dir.path(), "still.jpg", 128);
        let mut source = ImageSequence::single(&path).unwrap();
        assert_eq!(drain(&mut source).len(), 1);
        assert!(source.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_image_extension_check() {
        assert!(is_image_path(Path::new("a/B.PNG")));
        assert!(is_image_path(Path::new("x.jpeg")));
        assert!(!is_image_path(Path::new("clip.mp4")));
        assert!(!is_image_path(Path::new("noext")));
    }
}
