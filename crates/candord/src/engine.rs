use candor_core::analyzer::{AnalysisError, Analyzer};
use candor_core::frame::{Frame, FrameError};
use candor_core::sampling::{run_stream, Stride, StreamError, StreamStats};
use candor_core::session::SessionStore;
use candor_core::types::{EmotionSample, FaceBox};
use candor_hw::{open_media, Camera, CameraError, SourceError};
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("invalid image: {0}")]
    Frame(#[from] FrameError),
    #[error("analysis failed: {0}")]
    Analysis(#[from] AnalysisError),
    #[error(transparent)]
    Stream(#[from] StreamError),
    #[error("media error: {0}")]
    Source(#[from] SourceError),
    #[error("camera error: {0}")]
    Camera(#[from] CameraError),
    #[error("no camera available")]
    CameraUnavailable,
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Where a stream run pulls its frames from.
#[derive(Debug, Clone)]
pub enum Media {
    /// Image directory, single image, or (with `ffmpeg`) video file on the daemon host.
    Path(PathBuf),
    /// The daemon's camera, for a bounded duration.
    Camera(Duration),
}

/// Messages sent from D-Bus handlers to the engine thread.
enum EngineRequest {
    AnalyzeFrame {
        image: Vec<u8>,
        reply: oneshot::Sender<Result<Option<EmotionSample>, EngineError>>,
    },
    DetectFaces {
        image: Vec<u8>,
        reply: oneshot::Sender<Result<Vec<FaceBox>, EngineError>>,
    },
    RunStream {
        session_id: String,
        media: Media,
        cancel: Arc<AtomicBool>,
        reply: oneshot::Sender<Result<StreamStats, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    async fn call<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T, EngineError>>) -> EngineRequest,
    ) -> Result<T, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(build(reply_tx))
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Decode an uploaded image and score its most prominent face.
    ///
    /// `Ok(None)` means there was nothing to analyse.
    pub async fn analyze_frame(&self, image: Vec<u8>) -> Result<Option<EmotionSample>, EngineError> {
        self.call(|reply| EngineRequest::AnalyzeFrame { image, reply }).await
    }

    /// Decode an uploaded image and locate every face in it.
    pub async fn detect_faces(&self, image: Vec<u8>) -> Result<Vec<FaceBox>, EngineError> {
        self.call(|reply| EngineRequest::DetectFaces { image, reply }).await
    }

    /// Sample `media` into `session_id` until it ends or `cancel` is set.
    pub async fn run_stream(
        &self,
        session_id: String,
        media: Media,
        cancel: Arc<AtomicBool>,
    ) -> Result<StreamStats, EngineError> {
        self.call(|reply| EngineRequest::RunStream {
            session_id,
            media,
            cancel,
            reply,
        })
        .await
    }
}

/// State owned by the engine thread.
struct Engine {
    analyzer: Box<dyn Analyzer>,
    camera: Option<Camera>,
    store: Arc<SessionStore>,
    stride: Stride,
    warmup_frames: usize,
}

/// Spawn the engine on a dedicated OS thread.
///
/// The analyzer (and camera, if any) move onto the thread and are only ever
/// touched there, so inference and capture never block the async runtime.
/// Requests are served one at a time in arrival order.
pub fn spawn_engine(
    analyzer: Box<dyn Analyzer>,
    camera: Option<Camera>,
    store: Arc<SessionStore>,
    stride: Stride,
    warmup_frames: usize,
) -> Result<EngineHandle, EngineError> {
    let mut engine = Engine {
        analyzer,
        camera,
        store,
        stride,
        warmup_frames,
    };
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(8);

    std::thread::Builder::new()
        .name("candor-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::AnalyzeFrame { image, reply } => {
                        let _ = reply.send(engine.analyze_frame(&image));
                    }
                    EngineRequest::DetectFaces { image, reply } => {
                        let _ = reply.send(engine.detect_faces(&image));
                    }
                    EngineRequest::RunStream {
                        session_id,
                        media,
                        cancel,
                        reply,
                    } => {
                        let _ = reply.send(engine.run_stream(&session_id, media, &cancel));
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx })
}

impl Engine {
    fn analyze_frame(&mut self, image: &[u8]) -> Result<Option<EmotionSample>, EngineError> {
        let frame = Frame::decode(image)?;
        let sample = self.analyzer.score(&frame)?;
        tracing::debug!(
            width = frame.width(),
            height = frame.height(),
            analyzed = sample.is_some(),
            "frame analysed"
        );
        Ok(sample)
    }

    fn detect_faces(&mut self, image: &[u8]) -> Result<Vec<FaceBox>, EngineError> {
        let frame = Frame::decode(image)?;
        let faces = self.analyzer.locate(&frame)?;
        tracing::debug!(faces = faces.len(), "faces located");
        Ok(faces)
    }

    fn run_stream(&mut self, session_id: &str, media: Media, cancel: &AtomicBool) -> Result<StreamStats, EngineError> {
        // Unknown sessions fail before any media is opened.
        self.store
            .info(session_id)
            .map_err(|e| EngineError::Stream(e.into()))?;

        match media {
            Media::Path(path) => {
                tracing::info!(session_id, path = %path.display(), "analysing recorded media");
                let mut source = open_media(&path)?;
                Ok(run_stream(
                    &mut *source,
                    &mut *self.analyzer,
                    &self.store,
                    session_id,
                    self.stride,
                    cancel,
                )?)
            }
            Media::Camera(duration) => {
                let camera = self.camera.as_ref().ok_or(EngineError::CameraUnavailable)?;
                tracing::info!(session_id, device = %camera.device_path, secs = duration.as_secs(), "capturing from camera");
                let mut stream = camera.stream(duration, self.warmup_frames)?;
                Ok(run_stream(
                    &mut stream,
                    &mut *self.analyzer,
                    &self.store,
                    session_id,
                    self.stride,
                    cancel,
                )?)
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use candor_core::analyzer::{AnalysisError, EmotionScorer, FaceLocator};
    use candor_core::frame::Frame;
    use candor_core::types::{EmotionSample, FaceBox};
    use chrono::Utc;
    use std::io::Cursor;

    /// Treats any frame brighter than mid-grey as containing one face.
    pub struct BrightnessAnalyzer;

    fn is_bright(frame: &Frame) -> bool {
        frame.data().first().copied().unwrap_or(0) > 127
    }

    impl FaceLocator for BrightnessAnalyzer {
        fn locate(&mut self, frame: &Frame) -> Result<Vec<FaceBox>, AnalysisError> {
            Ok(if is_bright(frame) {
                vec![FaceBox { x: 0, y: 0, width: frame.width(), height: frame.height() }]
            } else {
                Vec::new()
            })
        }
    }

    impl EmotionScorer for BrightnessAnalyzer {
        fn score(&mut self, frame: &Frame) -> Result<Option<EmotionSample>, AnalysisError> {
            if !is_bright(frame) {
                return Ok(None);
            }
            let scores = [("happiness".to_string(), 75.0), ("neutral".to_string(), 25.0)].into();
            Ok(EmotionSample::from_scores(scores, Utc::now()))
        }
    }

    /// A 16×16 PNG filled with one grey level.
    pub fn png(value: u8) -> Vec<u8> {
        let mut out = Cursor::new(Vec::new());
        image::GrayImage::from_pixel(16, 16, image::Luma([value]))
            .write_to(&mut out, image::ImageFormat::Png)
            .unwrap();
        out.into_inner()
    }
}
