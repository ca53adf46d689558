//! Shared test fixtures: a scripted analyzer double and session setup.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Semaphore;

use threadlens::{
    Analyzer, AnalyzerError, JobPhase, JobRegistry, JobState, Report, SizeMetric,
    SqliteStorage, Storage, Thread, ThreadLensConfig, ThreadLensError, ThreadSummary,
};

static THREAD_HEADING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Conversation #(\S+):").unwrap());

#[derive(Debug, Clone, Copy)]
pub enum MockOutcome {
    Ok,
    Timeout,
    RateLimited,
    Invalid,
}

/// Analyzer double. Outcomes are consumed per call; once the script runs
/// dry every call succeeds. An optional gate makes call timing explicit:
/// each call takes one permit before answering, and `started` counts calls
/// that have begun (possibly still waiting on the gate).
pub struct MockAnalyzer {
    script: Mutex<VecDeque<MockOutcome>>,
    gate: Option<Arc<Semaphore>>,
    pub started: AtomicUsize,
    pub completed: AtomicUsize,
}

impl MockAnalyzer {
    pub fn ok() -> Arc<Self> {
        Self::scripted(vec![])
    }

    pub fn scripted(outcomes: Vec<MockOutcome>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(outcomes.into()),
            gate: None,
            started: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
        })
    }

    pub fn gated(gate: Arc<Semaphore>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(VecDeque::new()),
            gate: Some(gate),
            started: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
        })
    }

    fn success_payload(batch_text: &str) -> Value {
        let thread_ids: Vec<String> = THREAD_HEADING
            .captures_iter(batch_text)
            .map(|c| c[1].to_string())
            .collect();
        let evidence: Vec<Value> = thread_ids
            .iter()
            .map(|id| json!({ "thread_id": id, "message_ids": [0] }))
            .collect();
        json!({
            "key_insights": [{
                "text": "users want faster exports",
                "count": thread_ids.len(),
                "evidence": evidence,
            }],
            "improvement_areas": [{ "text": "reduce response latency", "count": 1 }],
            "categories": ["support"],
            "quality_score": 7.0,
            "satisfaction_score": 6.0,
        })
    }
}

#[async_trait]
impl Analyzer for MockAnalyzer {
    async fn analyze(
        &self,
        batch_text: &str,
        _instructions: &str,
    ) -> Result<Value, AnalyzerError> {
        self.started.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }
        let outcome = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(MockOutcome::Ok);
        self.completed.fetch_add(1, Ordering::SeqCst);
        match outcome {
            MockOutcome::Ok => Ok(Self::success_payload(batch_text)),
            MockOutcome::Timeout => Err(AnalyzerError::Timeout),
            MockOutcome::RateLimited => Err(AnalyzerError::RateLimited),
            MockOutcome::Invalid => Err(AnalyzerError::InvalidResponse(
                "scripted invalid response".to_string(),
            )),
        }
    }
}

/// Storage double whose analyzed-flag writes always fail; everything else
/// delegates to a real in-memory database.
pub struct BrokenIndexStorage {
    inner: SqliteStorage,
}

impl BrokenIndexStorage {
    pub async fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: SqliteStorage::in_memory().await.unwrap(),
        })
    }
}

#[async_trait]
impl Storage for BrokenIndexStorage {
    async fn save_threads(
        &self,
        session_id: &str,
        threads: &[Thread],
    ) -> threadlens::Result<()> {
        self.inner.save_threads(session_id, threads).await
    }

    async fn load_threads(&self, session_id: &str) -> threadlens::Result<Vec<Thread>> {
        self.inner.load_threads(session_id).await
    }

    async fn load_thread(
        &self,
        session_id: &str,
        thread_id: &str,
    ) -> threadlens::Result<Option<Thread>> {
        self.inner.load_thread(session_id, thread_id).await
    }

    async fn list_threads(
        &self,
        session_id: &str,
        offset: usize,
        limit: usize,
    ) -> threadlens::Result<Vec<ThreadSummary>> {
        self.inner.list_threads(session_id, offset, limit).await
    }

    async fn load_unanalyzed_threads(
        &self,
        session_id: &str,
    ) -> threadlens::Result<Vec<Thread>> {
        self.inner.load_unanalyzed_threads(session_id).await
    }

    async fn mark_analyzed(
        &self,
        _session_id: &str,
        _thread_ids: &[String],
    ) -> threadlens::Result<()> {
        Err(ThreadLensError::Storage("index write failed".to_string()))
    }

    async fn count_threads(&self, session_id: &str) -> threadlens::Result<(usize, usize)> {
        self.inner.count_threads(session_id).await
    }

    async fn save_job_state(&self, state: &JobState) -> threadlens::Result<()> {
        self.inner.save_job_state(state).await
    }

    async fn load_job_state(&self, session_id: &str) -> threadlens::Result<Option<JobState>> {
        self.inner.load_job_state(session_id).await
    }

    async fn save_report(&self, session_id: &str, report: &Report) -> threadlens::Result<()> {
        self.inner.save_report(session_id, report).await
    }

    async fn load_report(&self, session_id: &str) -> threadlens::Result<Option<Report>> {
        self.inner.load_report(session_id).await
    }
}

/// Small batch budget so each fixture thread lands in its own batch, and
/// fast retries so failure tests finish quickly.
pub fn test_config() -> ThreadLensConfig {
    ThreadLensConfig {
        max_batch_size: 150,
        size_metric: SizeMetric::Chars,
        default_request_count: 100,
        analyzer_max_attempts: 3,
        analyzer_initial_backoff_ms: 5,
        ..ThreadLensConfig::default()
    }
}

pub async fn setup(analyzer: Arc<dyn Analyzer>) -> JobRegistry {
    setup_with(analyzer, test_config()).await
}

pub async fn setup_with(analyzer: Arc<dyn Analyzer>, config: ThreadLensConfig) -> JobRegistry {
    let storage = Arc::new(SqliteStorage::in_memory().await.unwrap());
    JobRegistry::new(config, storage, analyzer)
}

/// Raw log with `count` threads, ids `t0..t{count-1}`, two messages each.
pub fn sample_log(count: usize) -> String {
    let mut log = String::new();
    for i in 0..count {
        log.push_str(&format!(
            "========== THREAD: t{i} ==========\n\
             Status: active\n\
             Messages: 2\n\
             [2024-01-0{d}T10:00:00] USER:\n\
             how do I export my project?\n\
             [2024-01-0{d}T10:01:00] ASSISTANT:\n\
             use the share menu.\n\
             ========== END THREAD ==========\n",
            i = i,
            d = (i % 9) + 1,
        ));
    }
    log
}

pub async fn wait_for_terminal(registry: &JobRegistry, session_id: &str) -> JobPhase {
    for _ in 0..400 {
        let progress = registry.get_progress(session_id).await.unwrap();
        match progress.phase {
            JobPhase::Analyzing | JobPhase::Cancelling => {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            phase => return phase,
        }
    }
    panic!("analysis did not reach a terminal phase in time");
}

pub async fn wait_until<F, Fut>(mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..400 {
        if condition().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met in time");
}
