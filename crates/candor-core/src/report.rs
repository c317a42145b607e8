//! JSON report export.
//!
//! A report covers every session holding at least one sample. It is written
//! to a temp file next to the destination and renamed over it, so readers
//! see either the previous report or the new one, never a partial write.

use crate::insight::{InsightGenerator, InsightOutcome};
use crate::session::{SessionSnapshot, SessionStore};
use crate::summary::round2;
use crate::types::EmotionSummary;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("report I/O at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("report serialization: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("report export cancelled")]
    Cancelled,
}

impl ReportError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionReport {
    pub session_id: String,
    pub question: String,
    pub duration_secs: f64,
    /// Session start time.
    pub timestamp: DateTime<Utc>,
    pub summary: EmotionSummary,
    pub sample_count: usize,
    pub insights: InsightOutcome,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub generated_at: DateTime<Utc>,
    pub total_sessions: usize,
    pub sessions: Vec<SessionReport>,
}

impl Report {
    /// Parse a previously exported report.
    pub fn load(path: &Path) -> Result<Self, ReportError> {
        let bytes = std::fs::read(path).map_err(|e| ReportError::io(path, e))?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// Insight for one session, reusing the cached text when it is still current.
fn session_insights(
    store: &SessionStore,
    insights: &InsightGenerator,
    snapshot: &SessionSnapshot,
    cancel: &AtomicBool,
) -> Result<InsightOutcome, ReportError> {
    if let Some(text) = snapshot.current_insights() {
        return Ok(InsightOutcome::Generated {
            text: text.to_string(),
        });
    }

    if cancel.load(Ordering::SeqCst) {
        return Err(ReportError::Cancelled);
    }
    let summary = snapshot.summary();
    let outcome = insights.generate(&snapshot.info.question, &summary.summary);
    if cancel.load(Ordering::SeqCst) {
        return Err(ReportError::Cancelled);
    }
    if let InsightOutcome::Generated { text } = &outcome {
        // Session may have been deleted meanwhile; the report still carries the text.
        let _ = store.store_insights(&snapshot.info.session_id, text.clone(), snapshot.samples.len());
    }
    Ok(outcome)
}

/// Assemble a report from the store's current state.
///
/// Insight generation may block on the network; call off the async runtime.
/// Once `cancel` is set no further insight is requested or cached.
pub fn build_report(
    store: &SessionStore,
    insights: &InsightGenerator,
    cancel: &AtomicBool,
) -> Result<Report, ReportError> {
    let mut sessions = Vec::new();
    for snapshot in store.snapshots_with_samples() {
        let insights = session_insights(store, insights, &snapshot, cancel)?;
        let summary = snapshot.summary();
        sessions.push(SessionReport {
            insights,
            session_id: summary.session_id,
            question: summary.question,
            duration_secs: round2(snapshot.duration_secs()),
            timestamp: summary.started_at,
            summary: summary.summary,
            sample_count: summary.sample_count,
        });
    }

    Ok(Report {
        generated_at: Utc::now(),
        total_sessions: sessions.len(),
        sessions,
    })
}

/// Write `report` as pretty JSON, atomically replacing `destination`.
///
/// If `cancel` is set before the rename, the temp file is discarded and
/// `destination` is left as it was.
pub fn write_report(report: &Report, destination: &Path, cancel: &AtomicBool) -> Result<(), ReportError> {
    let dir = match destination.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir).map_err(|e| ReportError::io(&dir, e))?;

    let json = serde_json::to_vec_pretty(report)?;

    let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(|e| ReportError::io(&dir, e))?;
    tmp.write_all(&json).map_err(|e| ReportError::io(tmp.path(), e))?;
    tmp.as_file().sync_all().map_err(|e| ReportError::io(tmp.path(), e))?;
    if cancel.load(Ordering::SeqCst) {
        return Err(ReportError::Cancelled);
    }
    tmp.persist(destination)
        .map_err(|e| ReportError::io(destination, e.error))?;

    tracing::info!(
        path = %destination.display(),
        sessions = report.total_sessions,
        bytes = json.len(),
        "report written"
    );
    Ok(())
}

/// Build and write a report in one step.
pub fn export_report(
    store: &SessionStore,
    insights: &InsightGenerator,
    destination: &Path,
) -> Result<Report, ReportError> {
    export_report_cancellable(store, insights, destination, &AtomicBool::new(false))
}

/// [`export_report`] that gives up, writing nothing, once `cancel` is set.
pub fn export_report_cancellable(
    store: &SessionStore,
    insights: &InsightGenerator,
    destination: &Path,
    cancel: &AtomicBool,
) -> Result<Report, ReportError> {
    let report = build_report(store, insights, cancel)?;
    write_report(&report, destination, cancel)?;
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::insight::test_support::FakeText;
    use crate::session::test_support::sample_at;
    use crate::types::EmotionStats;
    use chrono::{Duration, TimeZone};

    fn populated_store() -> (SessionStore, String, String) {
        let store = SessionStore::new();
        let t0 = Utc.with_ymd_and_hms(2026, 3, 2, 10, 0, 0).unwrap();
        let with_samples = store.start_at("Why do you want to work here?", t0);
        for (i, (happy, neutral)) in [(80.0, 20.0), (60.0, 40.0), (70.0, 30.0)].into_iter().enumerate() {
            let at = t0 + Duration::milliseconds(1000 + 1250 * i as i64);
            store
                .record(&with_samples.session_id, sample_at(&[("happy", happy), ("neutral", neutral)], at))
                .unwrap();
        }
        let empty = store.start_at("Tell me about yourself", t0 + Duration::seconds(10));
        (store, with_samples.session_id, empty.session_id)
    }

    #[test]
    fn test_export_round_trip_skips_empty_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("nested/reports/interview.json");
        let (store, id, empty_id) = populated_store();

        let report = export_report(&store, &InsightGenerator::disabled(), &dest).unwrap();
        assert_eq!(report.total_sessions, 1);
        assert_eq!(report.sessions[0].session_id, id);
        assert!(report.sessions.iter().all(|s| s.session_id != empty_id));

        let loaded = Report::load(&dest).unwrap();
        assert_eq!(loaded, report);
        let session = &loaded.sessions[0];
        assert_eq!(session.sample_count, 3);
        assert_eq!(session.duration_secs, 3.5);
        assert_eq!(session.summary["happy"], EmotionStats { mean: 70.0, max: 80.0, min: 60.0 });
        assert_eq!(session.insights, InsightOutcome::NotConfigured);
    }

    #[test]
    fn test_insights_generated_once_and_cached() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("report.json");
        let (store, id, _) = populated_store();
        let fake = FakeText::ok("Engaged and positive.");
        let calls = fake.calls.clone();
        let insights = InsightGenerator::new(Box::new(fake));

        let first = export_report(&store, &insights, &dest).unwrap();
        let second = export_report(&store, &insights, &dest).unwrap();
        assert_eq!(first.sessions[0].insights.text(), Some("Engaged and positive."));
        assert_eq!(second.sessions[0].insights, first.sessions[0].insights);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            store.snapshot(&id).unwrap().current_insights(),
            Some("Engaged and positive.")
        );
    }

    #[test]
    fn test_failed_insights_do_not_abort_export() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("report.json");
        let (store, id, _) = populated_store();
        let insights = InsightGenerator::new(Box::new(FakeText::failing()));

        let report = export_report(&store, &insights, &dest).unwrap();
        assert!(matches!(report.sessions[0].insights, InsightOutcome::Failed { .. }));
        assert!(store.snapshot(&id).unwrap().current_insights().is_none());
    }

    #[test]
    fn test_export_overwrites_previous_report() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("report.json");
        std::fs::write(&dest, b"{\"stale\": true}").unwrap();

        let store = SessionStore::new();
        let report = export_report(&store, &InsightGenerator::disabled(), &dest).unwrap();
        assert_eq!(report.total_sessions, 0);
        assert_eq!(Report::load(&dest).unwrap(), report);

        let leftovers: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(leftovers.len(), 1, "temp file must not survive the rename");
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = Report::load(&dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, ReportError::Io { .. }));
    }

    #[test]
    fn test_unwritable_destination_keeps_previous_report() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("report.json");
        let (store, _, _) = populated_store();
        export_report(&store, &InsightGenerator::disabled(), &dest).unwrap();
        let good = std::fs::read(&dest).unwrap();

        // A directory where the report should go cannot be replaced by a file.
        let blocked = dir.path().join("blocked.json");
        std::fs::create_dir(&blocked).unwrap();
        std::fs::write(blocked.join("keep"), b"x").unwrap();
        let err = export_report(&store, &InsightGenerator::disabled(), &blocked).unwrap_err();
        assert!(matches!(err, ReportError::Io { .. }));

        // Parent path is a regular file.
        let under_file = dest.join("nested.json");
        let err = export_report(&store, &InsightGenerator::disabled(), &under_file).unwrap_err();
        assert!(matches!(err, ReportError::Io { .. }));

        assert_eq!(std::fs::read(&dest).unwrap(), good);
        let mut names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        names.sort();
        assert_eq!(names, vec!["blocked.json", "report.json"]);
    }

    #[test]
    fn test_cancelled_export_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("report.json");
        std::fs::write(&dest, b"{\"previous\": true}").unwrap();
        let (store, id, _) = populated_store();
        let fake = FakeText::ok("Calm throughout.");
        let calls = fake.calls.clone();
        let insights = InsightGenerator::new(Box::new(fake));

        let cancel = AtomicBool::new(true);
        let err = export_report_cancellable(&store, &insights, &dest, &cancel).unwrap_err();
        assert!(matches!(err, ReportError::Cancelled));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(store.snapshot(&id).unwrap().current_insights().is_none());
        assert_eq!(std::fs::read(&dest).unwrap(), b"{\"previous\": true}");

        // Cancelled between build and rename.
        let report = build_report(&store, &InsightGenerator::disabled(), &AtomicBool::new(false)).unwrap();
        let err = write_report(&report, &dest, &cancel).unwrap_err();
        assert!(matches!(err, ReportError::Cancelled));
        assert_eq!(std::fs::read(&dest).unwrap(), b"{\"previous\": true}");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}
