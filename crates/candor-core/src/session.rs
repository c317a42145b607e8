//! In-memory session store.
//!
//! One [`SessionStore`] is owned by the serving component and shared by
//! reference; there is no global registry. A single mutex guards the map.
//! Summaries are computed from a clone of the sample list taken under the
//! lock, so long reductions never hold it.

use crate::summary::summarize;
use crate::types::{EmotionSample, EmotionSummary};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("session not found: {0}")]
    NotFound(String),
    #[error("session {0} has no recorded samples")]
    Empty(String),
}

/// Public view of a session without its samples.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub question: String,
    pub started_at: DateTime<Utc>,
    pub sample_count: usize,
}

/// Statistics for one session, derived from its samples at call time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub question: String,
    pub started_at: DateTime<Utc>,
    pub sample_count: usize,
    pub summary: EmotionSummary,
}

/// Stable copy of a session's state.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub info: SessionInfo,
    pub samples: Vec<EmotionSample>,
    /// Insight text and the sample count it was generated from.
    pub insights: Option<(String, usize)>,
}

impl SessionSnapshot {
    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            session_id: self.info.session_id.clone(),
            question: self.info.question.clone(),
            started_at: self.info.started_at,
            sample_count: self.samples.len(),
            summary: summarize(&self.samples),
        }
    }

    /// Cached insight text, if it was generated from the current samples.
    pub fn current_insights(&self) -> Option<&str> {
        match &self.insights {
            Some((text, count)) if *count == self.samples.len() => Some(text),
            _ => None,
        }
    }

    /// Seconds from session start to the last recorded sample.
    pub fn duration_secs(&self) -> f64 {
        self.samples
            .last()
            .map(|s| (s.timestamp - self.info.started_at).num_milliseconds().max(0) as f64 / 1000.0)
            .unwrap_or(0.0)
    }
}

struct Session {
    /// Store-wide creation sequence; breaks start-time ties.
    seq: u64,
    question: String,
    started_at: DateTime<Utc>,
    samples: Vec<EmotionSample>,
    insights: Option<(String, usize)>,
}

impl Session {
    fn info(&self, id: &str) -> SessionInfo {
        SessionInfo {
            session_id: id.to_string(),
            question: self.question.clone(),
            started_at: self.started_at,
            sample_count: self.samples.len(),
        }
    }

    fn snapshot(&self, id: &str) -> SessionSnapshot {
        SessionSnapshot {
            info: self.info(id),
            samples: self.samples.clone(),
            insights: self.insights.clone(),
        }
    }
}

#[derive(Default)]
struct StoreInner {
    sessions: BTreeMap<String, Session>,
    next_seq: u64,
}

impl StoreInner {
    /// Sessions by start time, then creation sequence.
    fn ordered(&self) -> Vec<(&String, &Session)> {
        let mut sessions: Vec<_> = self.sessions.iter().collect();
        sessions.sort_by_key(|(_, s)| (s.started_at, s.seq));
        sessions
    }
}

/// Process-lifetime map from session id to session state.
#[derive(Default)]
pub struct SessionStore {
    inner: Mutex<StoreInner>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, StoreInner> {
        // A panic while holding the lock cannot leave a half-applied append.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open a new session for `question`.
    pub fn start(&self, question: impl Into<String>) -> SessionInfo {
        self.start_at(question, Utc::now())
    }

    /// Open a new session with an explicit start time.
    ///
    /// Ids are `session_<YYYYMMDD_HHMMSS>_<seq>`; the sequence number is
    /// store-wide and only grows, so two sessions started in the same second
    /// never share an id.
    pub fn start_at(&self, question: impl Into<String>, started_at: DateTime<Utc>) -> SessionInfo {
        let question = question.into();
        let mut inner = self.lock();

        let (seq, id) = loop {
            let seq = inner.next_seq;
            inner.next_seq += 1;
            let candidate = format!("session_{}_{seq:04}", started_at.format("%Y%m%d_%H%M%S"));
            if !inner.sessions.contains_key(&candidate) {
                break (seq, candidate);
            }
        };

        let session = Session {
            seq,
            question,
            started_at,
            samples: Vec::new(),
            insights: None,
        };
        let info = session.info(&id);
        inner.sessions.insert(id.clone(), session);

        tracing::info!(session_id = %id, question = %info.question, "session started");
        info
    }

    /// Append a sample; returns the new sample count.
    pub fn record(&self, id: &str, sample: EmotionSample) -> Result<usize, SessionError> {
        let mut inner = self.lock();
        let session = inner
            .sessions
            .get_mut(id)
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;
        session.samples.push(sample);
        let count = session.samples.len();
        tracing::debug!(session_id = id, samples = count, "sample recorded");
        Ok(count)
    }

    pub fn info(&self, id: &str) -> Result<SessionInfo, SessionError> {
        self.lock()
            .sessions
            .get(id)
            .map(|s| s.info(id))
            .ok_or_else(|| SessionError::NotFound(id.to_string()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.lock().sessions.contains_key(id)
    }

    pub fn snapshot(&self, id: &str) -> Result<SessionSnapshot, SessionError> {
        self.lock()
            .sessions
            .get(id)
            .map(|s| s.snapshot(id))
            .ok_or_else(|| SessionError::NotFound(id.to_string()))
    }

    /// Snapshots of every session holding at least one sample, in [`list`](Self::list) order.
    pub fn snapshots_with_samples(&self) -> Vec<SessionSnapshot> {
        self.lock()
            .ordered()
            .into_iter()
            .filter(|(_, s)| !s.samples.is_empty())
            .map(|(id, s)| s.snapshot(id))
            .collect()
    }

    /// Current statistics for a session. Zero samples give an empty summary.
    pub fn summarize(&self, id: &str) -> Result<SessionSummary, SessionError> {
        Ok(self.snapshot(id)?.summary())
    }

    /// Snapshot for insight generation; fails for sessions without samples.
    pub fn insight_input(&self, id: &str) -> Result<SessionSnapshot, SessionError> {
        let snapshot = self.snapshot(id)?;
        if snapshot.samples.is_empty() {
            return Err(SessionError::Empty(id.to_string()));
        }
        Ok(snapshot)
    }

    /// Cache generated insight text against the sample count it describes.
    pub fn store_insights(&self, id: &str, text: String, sample_count: usize) -> Result<(), SessionError> {
        let mut inner = self.lock();
        let session = inner
            .sessions
            .get_mut(id)
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;
        session.insights = Some((text, sample_count));
        Ok(())
    }

    /// All sessions ordered by start time; sessions started at the same
    /// instant keep creation order.
    pub fn list(&self) -> Vec<SessionInfo> {
        self.lock()
            .ordered()
            .into_iter()
            .map(|(id, s)| s.info(id))
            .collect()
    }

    pub fn delete(&self, id: &str) -> Result<(), SessionError> {
        match self.lock().sessions.remove(id) {
            Some(_) => {
                tracing::info!(session_id = id, "session deleted");
                Ok(())
            }
            None => Err(SessionError::NotFound(id.to_string())),
        }
    }

    pub fn len(&self) -> usize {
        self.lock().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::{sample, sample_at};
    use super::*;
    use crate::types::EmotionStats;
    use chrono::{Duration, TimeZone};
    use std::sync::Arc;

    #[test]
    fn test_interview_question_scenario() {
        let store = SessionStore::new();
        let info = store.start("Why do you want to work here?");
        assert_eq!(info.sample_count, 0);

        for (happy, neutral) in [(80.0, 20.0), (60.0, 40.0), (70.0, 30.0)] {
            store
                .record(&info.session_id, sample(&[("happy", happy), ("neutral", neutral)]))
                .unwrap();
        }

        let summary = store.summarize(&info.session_id).unwrap();
        assert_eq!(summary.sample_count, 3);
        assert_eq!(summary.question, "Why do you want to work here?");
        assert_eq!(summary.summary["happy"], EmotionStats { mean: 70.0, max: 80.0, min: 60.0 });
        assert_eq!(summary.summary["neutral"], EmotionStats { mean: 30.0, max: 40.0, min: 20.0 });

        // no new samples → identical output
        assert_eq!(store.summarize(&info.session_id).unwrap(), summary);
    }

    #[test]
    fn test_record_unknown_session_is_not_found() {
        let store = SessionStore::new();
        let err = store.record("session_19700101_000000_0000", sample(&[("joy", 1.0)]));
        assert_eq!(err, Err(SessionError::NotFound("session_19700101_000000_0000".into())));
        assert!(store.is_empty(), "record must not create a session");
    }

    #[test]
    fn test_same_question_same_tick_gets_distinct_ids() {
        let store = SessionStore::new();
        let at = Utc.with_ymd_and_hms(2026, 10, 19, 9, 30, 0).unwrap();
        let a = store.start_at("Tell me about yourself", at);
        let b = store.start_at("Tell me about yourself", at);
        assert_ne!(a.session_id, b.session_id);
        assert!(a.session_id.starts_with("session_20261019_093000_"));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_empty_session_summary_and_insight_input() {
        let store = SessionStore::new();
        let info = store.start("Q");
        let summary = store.summarize(&info.session_id).unwrap();
        assert!(summary.summary.is_empty());
        assert_eq!(summary.sample_count, 0);
        assert_eq!(
            store.insight_input(&info.session_id).unwrap_err(),
            SessionError::Empty(info.session_id.clone())
        );
    }

    #[test]
    fn test_delete() {
        let store = SessionStore::new();
        let info = store.start("Q");
        store.delete(&info.session_id).unwrap();
        assert!(!store.contains(&info.session_id));
        assert!(matches!(store.delete(&info.session_id), Err(SessionError::NotFound(_))));
        assert!(matches!(store.summarize(&info.session_id), Err(SessionError::NotFound(_))));
    }

    #[test]
    fn test_snapshot_order_matches_list() {
        let store = SessionStore::new();
        let t0 = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();
        // Started later but created first, as after a clock step backwards.
        let later = store.start_at("later", t0 + Duration::seconds(30));
        let earlier = store.start_at("earlier", t0);
        let tied = store.start_at("tied", t0);
        for info in [&later, &earlier, &tied] {
            store.record(&info.session_id, sample(&[("calm", 50.0)])).unwrap();
        }

        let listed: Vec<String> = store.list().into_iter().map(|i| i.session_id).collect();
        let snapshots: Vec<String> = store
            .snapshots_with_samples()
            .into_iter()
            .map(|s| s.info.session_id)
            .collect();
        assert_eq!(listed, vec![earlier.session_id, tied.session_id, later.session_id]);
        assert_eq!(snapshots, listed);
    }

    #[test]
    fn test_list_in_creation_order() {
        let store = SessionStore::new();
        let t0 = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();
        let second = store.start_at("second", t0 + Duration::seconds(5));
        let first = store.start_at("first", t0);
        store.record(&second.session_id, sample(&[("calm", 50.0)])).unwrap();

        let listed = store.list();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].session_id, first.session_id);
        assert_eq!(listed[1].session_id, second.session_id);
        assert_eq!(listed[1].sample_count, 1);
    }

    #[test]
    fn test_cached_insights_follow_sample_count() {
        let store = SessionStore::new();
        let info = store.start("Q");
        store.record(&info.session_id, sample(&[("joy", 10.0)])).unwrap();
        store.store_insights(&info.session_id, "calm and engaged".into(), 1).unwrap();
        assert_eq!(
            store.snapshot(&info.session_id).unwrap().current_insights(),
            Some("calm and engaged")
        );

        store.record(&info.session_id, sample(&[("joy", 20.0)])).unwrap();
        assert_eq!(store.snapshot(&info.session_id).unwrap().current_insights(), None);
    }

    #[test]
    fn test_duration_to_last_sample() {
        let store = SessionStore::new();
        let t0 = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();
        let info = store.start_at("Q", t0);
        store
            .record(&info.session_id, sample_at(&[("joy", 10.0)], t0 + Duration::milliseconds(1500)))
            .unwrap();
        store
            .record(&info.session_id, sample_at(&[("joy", 20.0)], t0 + Duration::milliseconds(4250)))
            .unwrap();
        assert_eq!(store.snapshot(&info.session_id).unwrap().duration_secs(), 4.25);
    }

    #[test]
    fn test_concurrent_sessions() {
        let store = Arc::new(SessionStore::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    let info = store.start(format!("question {i}"));
                    for v in 0..10 {
                        store
                            .record(&info.session_id, sample(&[("focus", v as f64)]))
                            .unwrap();
                    }
                    store.summarize(&info.session_id).unwrap()
                })
            })
            .collect();

        for h in handles {
            let summary = h.join().unwrap();
            assert_eq!(summary.sample_count, 10);
            assert_eq!(summary.summary["focus"].mean, 4.5);
        }
        assert_eq!(store.len(), 8);
    }
}
