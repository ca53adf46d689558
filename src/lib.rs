//! ThreadLens: chat-transcript thread extraction and batch analysis.
//!
//! The pipeline takes a raw semi-structured transcript log, splits it into
//! threads, groups threads into size-bounded batches, runs each batch
//! through a black-box text-analysis model, and merges the per-batch
//! results into one ranked report whose items point back at the original
//! thread content.

pub mod aggregator;
pub mod analyzer;
pub mod chunker;
pub mod config;
pub mod error;
pub mod evidence;
pub mod extractor;
pub mod job;
pub mod prompts;
pub mod storage;
pub mod types;
pub mod utils;
pub mod web;

pub use aggregator::ResultAggregator;
pub use analyzer::{Analyzer, ClaudeAnalyzer};
pub use chunker::Chunker;
pub use config::{SizeMetric, ThreadLensConfig};
pub use error::{AnalyzerError, Result, ThreadLensError};
pub use evidence::{EvidenceResolver, ResolvedEvidence};
pub use extractor::ThreadExtractor;
pub use job::{ExtractionOutcome, JobRegistry};
pub use storage::{SqliteStorage, Storage};
pub use types::{
    Batch, BatchAnalysis, EvidenceRef, JobPhase, JobState, Message, Progress, RankedItem,
    Report, Role, Thread, ThreadStatus, ThreadSummary,
};
