//! Analysis jobs: one per session, owned by the [`JobRegistry`].
//!
//! The registry is an explicit object handed to callers; there is no global
//! job table. A running job processes its batches sequentially in a spawned
//! task and checks the cancel flag only between batches, so a batch result
//! that lands before the flag is observed is still recorded.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::aggregator::ResultAggregator;
use crate::analyzer::{normalize_analysis, Analyzer};
use crate::chunker::Chunker;
use crate::config::ThreadLensConfig;
use crate::error::{Result, ThreadLensError};
use crate::evidence::{EvidenceResolver, ResolvedEvidence};
use crate::extractor::ThreadExtractor;
use crate::prompts::analysis_instructions;
use crate::storage::Storage;
use crate::types::{
    Batch, EvidenceRef, JobPhase, JobState, Progress, Report, ThreadSummary,
};
use crate::utils::{retry_with_backoff, RetryConfig};

/// Outcome of a raw-log extraction.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ExtractionOutcome {
    pub session_id: String,
    pub thread_count: usize,
    pub warnings: Vec<String>,
}

struct JobHandle {
    state: RwLock<JobState>,
    cancel_requested: AtomicBool,
}

impl JobHandle {
    fn new(state: JobState) -> Arc<Self> {
        Arc::new(Self {
            state: RwLock::new(state),
            cancel_requested: AtomicBool::new(false),
        })
    }
}

struct RegistryInner {
    config: ThreadLensConfig,
    storage: Arc<dyn Storage>,
    analyzer: Arc<dyn Analyzer>,
    jobs: RwLock<HashMap<String, Arc<JobHandle>>>,
}

#[derive(Clone)]
pub struct JobRegistry {
    inner: Arc<RegistryInner>,
}

impl JobRegistry {
    pub fn new(
        config: ThreadLensConfig,
        storage: Arc<dyn Storage>,
        analyzer: Arc<dyn Analyzer>,
    ) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                config,
                storage,
                analyzer,
                jobs: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Parse a raw log into threads and persist them under a session.
    /// A missing session id starts a new session.
    pub async fn extract_threads(
        &self,
        session_id: Option<String>,
        raw: &str,
    ) -> Result<ExtractionOutcome> {
        let session_id = session_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let handle = self.handle_for(&session_id, true).await?;

        {
            let mut state = handle.state.write().await;
            if state.phase.is_busy() {
                return Err(ThreadLensError::AlreadyRunning(session_id));
            }
            state.phase = JobPhase::Extracting;
            self.inner.storage.save_job_state(&state).await?;
        }

        let outcome = async {
            let (threads, warnings) = ThreadExtractor::extract(raw);
            self.inner.storage.save_threads(&session_id, &threads).await?;
            let (total, _) = self.inner.storage.count_threads(&session_id).await?;
            Ok::<_, ThreadLensError>(ExtractionOutcome {
                session_id: session_id.clone(),
                thread_count: total,
                warnings,
            })
        }
        .await;

        let mut state = handle.state.write().await;
        match &outcome {
            Ok(result) => {
                state.phase = JobPhase::Idle;
                state.total_threads = result.thread_count;
                info!(
                    session_id = %session_id,
                    threads = result.thread_count,
                    warnings = result.warnings.len(),
                    "extraction complete"
                );
            }
            Err(e) => {
                // extraction failure leaves the session usable
                state.phase = JobPhase::Idle;
                state.last_error = Some(e.to_string());
            }
        }
        self.inner.storage.save_job_state(&state).await?;
        outcome
    }

    /// Start analyzing up to `count` not-yet-analyzed threads. Returns the
    /// number of threads the run will cover; the batch loop runs in the
    /// background.
    pub async fn start_analysis(
        &self,
        session_id: &str,
        count: Option<usize>,
    ) -> Result<usize> {
        let handle = self.handle_for(session_id, false).await?;

        let pending = self.inner.storage.load_unanalyzed_threads(session_id).await?;
        if pending.is_empty() {
            return Err(ThreadLensError::NoThreads(session_id.to_string()));
        }

        let requested = count
            .unwrap_or(self.inner.config.default_request_count)
            .min(pending.len());
        let selected = &pending[..requested];
        let chunker = Chunker::new(
            self.inner.config.max_batch_size,
            self.inner.config.size_metric,
        );
        let batches = chunker.chunk(selected);

        {
            let mut state = handle.state.write().await;
            if state.phase.is_busy() {
                return Err(ThreadLensError::AlreadyRunning(session_id.to_string()));
            }
            let (total, _) = self.inner.storage.count_threads(session_id).await?;
            state.phase = JobPhase::Analyzing;
            state.total_threads = total;
            state.requested_count = requested;
            state.analyzed_count = 0;
            state.current_batch_index = None;
            state.started_at = Some(chrono::Utc::now());
            state.last_error = None;
            handle.cancel_requested.store(false, Ordering::SeqCst);
            self.inner.storage.save_job_state(&state).await?;
        }

        info!(
            session_id = %session_id,
            requested,
            batches = batches.len(),
            "starting analysis run"
        );

        let inner = self.inner.clone();
        let handle = handle.clone();
        let session = session_id.to_string();
        tokio::spawn(async move {
            run_batches(inner, handle, session, batches).await;
        });

        Ok(requested)
    }

    /// Request cancellation. Takes effect at the next batch boundary;
    /// a no-op when no run is in progress.
    pub async fn cancel_analysis(&self, session_id: &str) -> Result<JobPhase> {
        let handle = self.handle_for(session_id, false).await?;
        let mut state = handle.state.write().await;
        if state.phase == JobPhase::Analyzing {
            handle.cancel_requested.store(true, Ordering::SeqCst);
            state.phase = JobPhase::Cancelling;
            self.inner.storage.save_job_state(&state).await?;
            info!(session_id = %session_id, "cancellation requested");
        }
        Ok(state.phase)
    }

    /// Non-blocking snapshot of job progress.
    pub async fn get_progress(&self, session_id: &str) -> Result<Progress> {
        let handle = self.handle_for(session_id, false).await?;
        let state = handle.state.read().await;
        Ok(Progress {
            session_id: state.session_id.clone(),
            phase: state.phase,
            total_threads: state.total_threads,
            requested_count: state.requested_count,
            analyzed_count: state.analyzed_count,
            last_error: state.last_error.clone(),
            has_partial_results: !state.partials.is_empty(),
        })
    }

    pub async fn get_report(&self, session_id: &str) -> Result<Report> {
        self.inner
            .storage
            .load_report(session_id)
            .await?
            .ok_or_else(|| ThreadLensError::ReportNotAvailable(session_id.to_string()))
    }

    pub async fn get_evidence(
        &self,
        session_id: &str,
        evidence: &EvidenceRef,
    ) -> Result<ResolvedEvidence> {
        EvidenceResolver::new(self.inner.storage.as_ref())
            .resolve(session_id, evidence)
            .await
    }

    pub async fn list_threads(
        &self,
        session_id: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<ThreadSummary>> {
        self.inner.storage.list_threads(session_id, offset, limit).await
    }

    /// Look up a session's handle, reviving persisted state on first touch.
    /// Entries are created lazily and never evicted.
    async fn handle_for(&self, session_id: &str, create: bool) -> Result<Arc<JobHandle>> {
        if let Some(handle) = self.inner.jobs.read().await.get(session_id) {
            return Ok(handle.clone());
        }

        let persisted = self.inner.storage.load_job_state(session_id).await?;
        let state = match persisted {
            Some(mut state) => {
                // a run interrupted by process death cannot resume mid-flight
                if state.phase.is_busy() {
                    state.phase = JobPhase::Failed;
                    state.last_error = Some("run interrupted by restart".to_string());
                    self.inner.storage.save_job_state(&state).await?;
                }
                state
            }
            None if create => JobState::new(session_id),
            None => return Err(ThreadLensError::SessionNotFound(session_id.to_string())),
        };

        let mut jobs = self.inner.jobs.write().await;
        let handle = jobs
            .entry(session_id.to_string())
            .or_insert_with(|| JobHandle::new(state))
            .clone();
        Ok(handle)
    }
}

fn retry_config(config: &ThreadLensConfig) -> RetryConfig {
    RetryConfig {
        max_attempts: config.analyzer_max_attempts,
        initial_delay: Duration::from_millis(config.analyzer_initial_backoff_ms),
        ..RetryConfig::default()
    }
}

/// The background batch loop. The only writer of job state while running.
async fn run_batches(
    inner: Arc<RegistryInner>,
    handle: Arc<JobHandle>,
    session_id: String,
    batches: Vec<Batch>,
) {
    let instructions = analysis_instructions();
    let retry = retry_config(&inner.config);
    let mut failure: Option<String> = None;

    for batch in &batches {
        if handle.cancel_requested.load(Ordering::SeqCst) {
            info!(session_id = %session_id, batch = batch.sequence_index, "stopping at batch boundary");
            break;
        }

        {
            let mut state = handle.state.write().await;
            state.current_batch_index = Some(batch.sequence_index);
            if let Err(e) = inner.storage.save_job_state(&state).await {
                warn!(session_id = %session_id, "failed to persist job state: {}", e);
            }
        }

        if batch.oversized {
            warn!(
                session_id = %session_id,
                batch = batch.sequence_index,
                size = batch.size,
                budget = batch.size_budget,
                "submitting oversized single-thread batch"
            );
        }

        let analyzer = inner.analyzer.clone();
        let result = retry_with_backoff(
            || analyzer.analyze(&batch.text, &instructions),
            retry.clone(),
            &format!("analyze batch {}", batch.sequence_index),
            |e| e.is_retryable(),
        )
        .await
        .and_then(|raw| normalize_analysis(&raw, batch.sequence_index, &batch.thread_ids));

        match result {
            Ok(analysis) => {
                // record the result first; a storage failure below still
                // fails the run but never discards a completed batch
                {
                    let mut state = handle.state.write().await;
                    state.analyzed_count += batch.thread_ids.len();
                    state.partials.push(analysis);
                    if let Err(e) = inner.storage.save_job_state(&state).await {
                        warn!(session_id = %session_id, "failed to persist job state: {}", e);
                    }
                    info!(
                        session_id = %session_id,
                        batch = batch.sequence_index,
                        analyzed = state.analyzed_count,
                        "batch complete"
                    );
                }
                if let Err(e) = inner.storage.mark_analyzed(&session_id, &batch.thread_ids).await
                {
                    failure = Some(e.to_string());
                    break;
                }
            }
            Err(e) => {
                error!(
                    session_id = %session_id,
                    batch = batch.sequence_index,
                    "batch failed: {}",
                    e
                );
                failure = Some(e.to_string());
                break;
            }
        }
    }

    settle(&inner, &handle, &session_id, failure).await;
}

/// Terminal transition: aggregate whatever partials exist, persist the
/// report, and record the final phase.
async fn settle(
    inner: &Arc<RegistryInner>,
    handle: &Arc<JobHandle>,
    session_id: &str,
    failure: Option<String>,
) {
    let mut state = handle.state.write().await;

    if !state.partials.is_empty() {
        let report = ResultAggregator::aggregate(&state.partials);
        if let Err(e) = inner.storage.save_report(session_id, &report).await {
            error!(session_id = %session_id, "failed to persist report: {}", e);
        }
    }

    state.current_batch_index = None;
    state.phase = match failure {
        Some(message) => {
            state.last_error = Some(message);
            JobPhase::Failed
        }
        None if handle.cancel_requested.load(Ordering::SeqCst) => JobPhase::Cancelled,
        None => JobPhase::Completed,
    };
    info!(
        session_id = %session_id,
        phase = ?state.phase,
        analyzed = state.analyzed_count,
        "analysis run settled"
    );
    if let Err(e) = inner.storage.save_job_state(&state).await {
        error!(session_id = %session_id, "failed to persist job state: {}", e);
    }
}
