use crate::engine::{EngineError, EngineHandle, Media};
use candor_core::insight::{InsightGenerator, InsightOutcome};
use candor_core::report::{export_report_cancellable, ReportError};
use candor_core::sampling::{StreamError, StreamStats};
use candor_core::session::{SessionError, SessionStore};
use candor_hw::SourceError;
use serde::Serialize;
use serde_json::json;
use std::future::Future;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use zbus::fdo;
use zbus::interface;

pub const BUS_NAME: &str = "org.candor.Analyzer1";
pub const OBJECT_PATH: &str = "/org/candor/Analyzer1";

/// Service knobs taken from the daemon configuration.
pub struct ServiceSettings {
    pub report_path: PathBuf,
    pub analysis_timeout: Duration,
    pub insight_timeout: Duration,
    pub capture_seconds: u64,
    pub stride: usize,
    /// Camera device in use, `None` if capture is unavailable.
    pub camera: Option<String>,
}

/// D-Bus interface for the Candor analysis daemon.
///
/// Bus name: org.candor.Analyzer1
/// Object path: /org/candor/Analyzer1
pub struct CandorService {
    engine: EngineHandle,
    store: Arc<SessionStore>,
    insights: Arc<InsightGenerator>,
    settings: ServiceSettings,
    /// Cancel flag of the stream run in progress, if any.
    active_stream: Mutex<Option<Arc<AtomicBool>>>,
}

impl CandorService {
    pub fn new(
        engine: EngineHandle,
        store: Arc<SessionStore>,
        insights: Arc<InsightGenerator>,
        settings: ServiceSettings,
    ) -> Self {
        Self {
            engine,
            store,
            insights,
            settings,
            active_stream: Mutex::new(None),
        }
    }

    async fn stream(&self, session_id: &str, media: Media, limit: Duration) -> fdo::Result<String> {
        if !self.store.contains(session_id) {
            return Err(session_error(SessionError::NotFound(session_id.to_string())));
        }

        let cancel = Arc::new(AtomicBool::new(false));
        *self.active_slot() = Some(Arc::clone(&cancel));

        let run = self.engine.run_stream(session_id.to_string(), media, Arc::clone(&cancel));
        let result = tokio::time::timeout(limit, run).await;

        {
            let mut slot = self.active_slot();
            if slot.as_ref().is_some_and(|active| Arc::ptr_eq(active, &cancel)) {
                *slot = None;
            }
        }

        let stats: StreamStats = match result {
            Ok(stats) => stats.map_err(engine_error)?,
            Err(_) => {
                // The engine stops at the next frame; recorded samples stay.
                cancel.store(true, Ordering::SeqCst);
                tracing::warn!(session_id, secs = limit.as_secs(), "stream run timed out");
                return Err(fdo::Error::TimedOut(format!(
                    "analysis exceeded {}s; samples recorded so far are kept",
                    limit.as_secs()
                )));
            }
        };
        to_json(&stats)
    }

    fn active_slot(&self) -> std::sync::MutexGuard<'_, Option<Arc<AtomicBool>>> {
        self.active_stream.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[interface(name = "org.candor.Analyzer1")]
impl CandorService {
    /// Open a new session for an interview question.
    async fn start_session(&self, question: &str) -> fdo::Result<String> {
        let info = self.store.start(question);
        to_json(&json!({
            "session_id": info.session_id,
            "question": info.question,
            "started_at": info.started_at,
        }))
    }

    /// Score one uploaded image; record the sample when `session_id` is set.
    async fn analyze_frame(&self, image: Vec<u8>, session_id: &str) -> fdo::Result<String> {
        if !session_id.is_empty() && !self.store.contains(session_id) {
            return Err(session_error(SessionError::NotFound(session_id.to_string())));
        }

        let analysis = self.engine.analyze_frame(image);
        let sample = bounded(self.settings.analysis_timeout, analysis).await?;

        let Some(sample) = sample else {
            return to_json(&json!({ "analyzed": false }));
        };

        let mut body = json!({
            "analyzed": true,
            "emotions": sample.emotions,
            "dominant": sample.dominant,
            "timestamp": sample.timestamp,
        });
        if !session_id.is_empty() {
            let count = self.store.record(session_id, sample).map_err(session_error)?;
            body["session_id"] = json!(session_id);
            body["sample_count"] = json!(count);
        }
        to_json(&body)
    }

    /// Locate faces in one uploaded image.
    async fn detect_faces(&self, image: Vec<u8>) -> fdo::Result<String> {
        let faces = bounded(self.settings.analysis_timeout, self.engine.detect_faces(image)).await?;
        to_json(&json!({
            "faces_detected": faces.len(),
            "faces": faces,
        }))
    }

    /// Sample an image directory or video file on this host into a session.
    async fn analyze_video(&self, session_id: &str, path: &str) -> fdo::Result<String> {
        tracing::info!(session_id, path, "analyze video requested");
        let media = Media::Path(PathBuf::from(path));
        self.stream(session_id, media, self.settings.analysis_timeout).await
    }

    /// Sample the daemon's camera into a session; `seconds == 0` uses the default.
    async fn capture(&self, session_id: &str, seconds: u32) -> fdo::Result<String> {
        let secs = if seconds == 0 {
            self.settings.capture_seconds
        } else {
            u64::from(seconds)
        };
        tracing::info!(session_id, secs, "capture requested");
        let duration = Duration::from_secs(secs);
        self.stream(session_id, Media::Camera(duration), duration + self.settings.analysis_timeout)
            .await
    }

    /// Stop the stream run in progress. Returns false if none was running.
    async fn stop_capture(&self) -> bool {
        match self.active_slot().as_ref() {
            Some(cancel) => {
                cancel.store(true, Ordering::SeqCst);
                tracing::info!("stream stop requested");
                true
            }
            None => false,
        }
    }

    /// Current statistics for a session.
    async fn session_summary(&self, session_id: &str) -> fdo::Result<String> {
        let summary = self.store.summarize(session_id).map_err(session_error)?;
        to_json(&summary)
    }

    /// Narrative insights for a session's current samples.
    async fn generate_insights(&self, session_id: &str) -> fdo::Result<String> {
        let snapshot = self.store.insight_input(session_id).map_err(session_error)?;
        let summary = snapshot.summary();

        let outcome = match snapshot.current_insights() {
            Some(text) => InsightOutcome::Generated {
                text: text.to_string(),
            },
            None => {
                let insights = Arc::clone(&self.insights);
                let question = summary.question.clone();
                let stats = summary.summary.clone();
                let call = tokio::task::spawn_blocking(move || insights.generate(&question, &stats));
                let outcome = match tokio::time::timeout(self.settings.insight_timeout, call).await {
                    Ok(Ok(outcome)) => outcome,
                    Ok(Err(e)) => InsightOutcome::Failed {
                        error: format!("insight task failed: {e}"),
                    },
                    Err(_) => InsightOutcome::Failed {
                        error: format!(
                            "text generation exceeded {}s",
                            self.settings.insight_timeout.as_secs()
                        ),
                    },
                };
                if let InsightOutcome::Generated { text } = &outcome {
                    self.store
                        .store_insights(session_id, text.clone(), snapshot.samples.len())
                        .map_err(session_error)?;
                }
                outcome
            }
        };

        let mut body = json!({
            "session_id": summary.session_id,
            "question": summary.question,
            "summary": summary.summary,
        });
        match outcome {
            InsightOutcome::Generated { text } => {
                body["status"] = json!("generated");
                body["insights"] = json!(text);
            }
            InsightOutcome::NotConfigured => {
                body["status"] = json!("not_configured");
                body["error"] = json!("text generation is not configured");
            }
            InsightOutcome::Failed { error } => {
                body["status"] = json!("failed");
                body["error"] = json!(error);
            }
        }
        to_json(&body)
    }

    /// Every session, ordered by start time.
    async fn list_sessions(&self) -> fdo::Result<String> {
        let sessions = self.store.list();
        to_json(&json!({
            "total_sessions": sessions.len(),
            "sessions": sessions,
        }))
    }

    /// Remove a session and its samples.
    async fn delete_session(&self, session_id: &str) -> fdo::Result<bool> {
        self.store.delete(session_id).map_err(session_error)?;
        Ok(true)
    }

    /// Write the report for all sessions with samples to the configured path.
    async fn export_report(&self) -> fdo::Result<String> {
        let store = Arc::clone(&self.store);
        let insights = Arc::clone(&self.insights);
        let path = self.settings.report_path.clone();

        // One insight call per session at most, plus slack for the write.
        let sessions = store.len() as u32;
        let limit = self.settings.insight_timeout * (sessions + 1);

        let cancel = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancel);
        let task = tokio::task::spawn_blocking(move || export_report_cancellable(&store, &insights, &path, &flag));
        let report = match tokio::time::timeout(limit, task).await {
            Ok(Ok(result)) => result.map_err(report_error)?,
            Ok(Err(e)) => return Err(fdo::Error::Failed(format!("export task failed: {e}"))),
            Err(_) => {
                // The blocking task cannot be aborted; it stops before writing.
                cancel.store(true, Ordering::SeqCst);
                tracing::warn!(secs = limit.as_secs(), "report export timed out");
                return Err(fdo::Error::TimedOut(format!(
                    "report export exceeded {}s; nothing was written",
                    limit.as_secs()
                )));
            }
        };
        to_json(&report)
    }

    /// Return daemon status information.
    async fn status(&self) -> fdo::Result<String> {
        to_json(&json!({
            "status": "healthy",
            "version": env!("CARGO_PKG_VERSION"),
            "timestamp": chrono::Utc::now(),
            "text_generation_configured": self.insights.is_configured(),
            "camera": self.settings.camera.as_deref().unwrap_or("unavailable"),
            "stride": self.settings.stride,
            "sessions": self.store.len(),
            "report_path": self.settings.report_path.display().to_string(),
        }))
    }
}

/// Await an engine call, bounded by `limit`.
async fn bounded<T>(limit: Duration, call: impl Future<Output = Result<T, EngineError>>) -> fdo::Result<T> {
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result.map_err(engine_error),
        Err(_) => Err(fdo::Error::TimedOut(format!(
            "analysis exceeded {}s",
            limit.as_secs()
        ))),
    }
}

fn to_json<T: Serialize>(value: &T) -> fdo::Result<String> {
    serde_json::to_string(value).map_err(|e| fdo::Error::Failed(format!("serialization failed: {e}")))
}

fn session_error(e: SessionError) -> fdo::Error {
    match e {
        SessionError::NotFound(_) => fdo::Error::UnknownObject(e.to_string()),
        SessionError::Empty(_) => fdo::Error::Failed(e.to_string()),
    }
}

fn report_error(e: ReportError) -> fdo::Error {
    tracing::error!(error = %e, "report export failed");
    fdo::Error::Failed(e.to_string())
}

fn engine_error(e: EngineError) -> fdo::Error {
    match e {
        EngineError::Frame(_) => fdo::Error::InvalidArgs(e.to_string()),
        EngineError::Stream(StreamError::Session(s)) => session_error(s),
        EngineError::Stream(StreamError::InvalidStride) => fdo::Error::InvalidArgs(e.to_string()),
        EngineError::Source(SourceError::NotFound(_) | SourceError::NoImages(_)) => {
            fdo::Error::FileNotFound(e.to_string())
        }
        EngineError::Source(SourceError::VideoUnsupported(_)) | EngineError::CameraUnavailable => {
            fdo::Error::NotSupported(e.to_string())
        }
        other => {
            tracing::error!(error = %other, "engine request failed");
            fdo::Error::Failed(other.to_string())
        }
    }
}
