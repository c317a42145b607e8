//! candor-core — interview emotion analysis engine.
//!
//! SCRFD locates faces and a FER+ classifier scores emotions, both via ONNX
//! Runtime on the CPU. Samples are grouped into question sessions, summarised,
//! narrated by a text-generation service and exported as JSON reports.

pub mod analyzer;
pub mod classifier;
pub mod crop;
pub mod detector;
pub mod frame;
pub mod insight;
pub mod report;
pub mod sampling;
pub mod session;
pub mod summary;
pub mod types;

pub use analyzer::{AnalysisError, Analyzer, EmotionScorer, FaceLocator, OnnxAnalyzer};
pub use frame::{Frame, FrameError};
pub use insight::{GeminiClient, InsightGenerator, InsightOutcome, TextGenerator};
pub use report::{export_report, export_report_cancellable, Report, ReportError};
pub use sampling::{run_stream, FrameSource, FrameSourceError, Stride, StreamError, StreamStats};
pub use session::{SessionError, SessionInfo, SessionStore, SessionSummary};
pub use types::{EmotionSample, EmotionScores, EmotionStats, EmotionSummary, FaceBox};
