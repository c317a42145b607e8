//! Stride sampling over a pull-based frame source.
//!
//! Only every Nth frame reaches the models. Each sampled frame passes the
//! face gate before it is scored; per-frame model trouble is logged and
//! skipped, while session-store failures end the run. Samples already
//! recorded stay in the session whatever way the run ends.

use crate::analyzer::{Analyzer, EmotionScorer, FaceLocator};
use crate::frame::{Frame, FrameError};
use crate::session::{SessionError, SessionStore};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

/// Default sampling interval: analyse one frame in ten.
pub const DEFAULT_STRIDE: usize = 10;

#[derive(Error, Debug)]
pub enum FrameSourceError {
    #[error("frame source read failed: {0}")]
    Read(String),
    #[error(transparent)]
    Frame(#[from] FrameError),
}

#[derive(Error, Debug)]
pub enum StreamError {
    #[error("stride must be at least 1")]
    InvalidStride,
    #[error(transparent)]
    Source(#[from] FrameSourceError),
    #[error(transparent)]
    Session(#[from] SessionError),
}

/// Produces frames one at a time until the source is exhausted.
pub trait FrameSource {
    /// Next frame, or `None` at end of stream.
    fn next_frame(&mut self) -> Result<Option<Frame>, FrameSourceError>;
}

/// Adapts any frame iterator (e.g. a `Vec<Frame>`) into a [`FrameSource`].
pub struct IterSource<I>(pub I);

impl<I: Iterator<Item = Frame>> FrameSource for IterSource<I> {
    fn next_frame(&mut self) -> Result<Option<Frame>, FrameSourceError> {
        Ok(self.0.next())
    }
}

/// Sampling interval; always ≥ 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "usize", into = "usize")]
pub struct Stride(usize);

impl Stride {
    pub fn new(n: usize) -> Result<Self, StreamError> {
        if n == 0 {
            return Err(StreamError::InvalidStride);
        }
        Ok(Self(n))
    }

    pub fn get(self) -> usize {
        self.0
    }

    /// Whether the `position`-th frame of a run (0-based) is analysed.
    pub fn samples(self, position: usize) -> bool {
        position % self.0 == 0
    }
}

impl Default for Stride {
    fn default() -> Self {
        Self(DEFAULT_STRIDE)
    }
}

impl TryFrom<usize> for Stride {
    type Error = StreamError;

    fn try_from(n: usize) -> Result<Self, Self::Error> {
        Self::new(n)
    }
}

impl From<Stride> for usize {
    fn from(s: Stride) -> usize {
        s.0
    }
}

/// Counters for one run over a frame source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamStats {
    pub session_id: String,
    pub frames_read: usize,
    pub frames_sampled: usize,
    /// Sampled frames where the locator found no face.
    pub no_face: usize,
    /// Sampled frames the scorer could not analyse.
    pub unavailable: usize,
    /// Sampled frames skipped because a model call failed.
    pub failures: usize,
    pub samples_recorded: usize,
    pub cancelled: bool,
}

/// Pull frames from `source`, analyse every `stride`-th one and record the
/// results into `session_id`.
///
/// The stride counter belongs to this run alone. Setting `cancel` stops the
/// run after the current frame and returns the counters so far.
pub fn run_stream<A, S>(
    source: &mut S,
    analyzer: &mut A,
    store: &SessionStore,
    session_id: &str,
    stride: Stride,
    cancel: &AtomicBool,
) -> Result<StreamStats, StreamError>
where
    A: Analyzer + ?Sized,
    S: FrameSource + ?Sized,
{
    // Fail before touching the source if the session is unknown.
    store.info(session_id)?;

    let mut stats = StreamStats {
        session_id: session_id.to_string(),
        ..StreamStats::default()
    };
    let mut position = 0usize;

    loop {
        if cancel.load(Ordering::Relaxed) {
            stats.cancelled = true;
            tracing::info!(session_id, frames = stats.frames_read, "stream cancelled");
            break;
        }

        let Some(frame) = source.next_frame()? else {
            break;
        };
        stats.frames_read += 1;
        let sampled = stride.samples(position);
        position += 1;
        if !sampled {
            continue;
        }
        stats.frames_sampled += 1;

        // Highest-confidence face first; scoring reuses it instead of detecting again.
        let face = match analyzer.locate(&frame) {
            Ok(faces) => match faces.first() {
                Some(face) => *face,
                None => {
                    stats.no_face += 1;
                    continue;
                }
            },
            Err(e) => {
                stats.failures += 1;
                tracing::warn!(session_id, frame = frame.index(), error = %e, "face location failed; skipping frame");
                continue;
            }
        };

        match analyzer.score_face(&frame, &face) {
            Ok(Some(sample)) => {
                tracing::debug!(session_id, frame = frame.index(), dominant = %sample.dominant, "frame analysed");
                store.record(session_id, sample)?;
                stats.samples_recorded += 1;
            }
            Ok(None) => stats.unavailable += 1,
            Err(e) => {
                stats.failures += 1;
                tracing::warn!(session_id, frame = frame.index(), error = %e, "emotion scoring failed; skipping frame");
            }
        }
    }

    tracing::info!(
        session_id,
        frames_read = stats.frames_read,
        sampled = stats.frames_sampled,
        recorded = stats.samples_recorded,
        "stream finished"
    );
    Ok(stats)
}
