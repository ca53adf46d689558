use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    /// Derive a role from a marker token. Unrecognized markers fail soft to
    /// `System` so a single odd message never aborts extraction.
    pub fn from_token(token: &str) -> Role {
        Self::try_from_token(token).unwrap_or(Role::System)
    }

    /// Known role markers only.
    pub fn try_from_token(token: &str) -> Option<Role> {
        match token.trim().to_ascii_lowercase().as_str() {
            "user" | "human" => Some(Role::User),
            "assistant" | "ai" => Some(Role::Assistant),
            "system" => Some(Role::System),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One piece of message content, tagged with its kind ("text" for plain
/// lines; other kinds render as placeholders when flattened).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentItem {
    pub kind: String,
    pub text: String,
}

impl ContentItem {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            kind: "text".to_string(),
            text: text.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    pub content: Vec<ContentItem>,
}

impl Message {
    /// Flatten content items to a single text blob, preserving item order.
    pub fn flattened_text(&self) -> String {
        self.content
            .iter()
            .map(|item| {
                if item.kind == "text" {
                    item.text.clone()
                } else {
                    format!("[{}]", item.kind)
                }
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThreadStatus {
    Active,
    Closed,
    Unknown,
}

impl ThreadStatus {
    pub fn from_token(token: &str) -> ThreadStatus {
        match token.trim().to_ascii_lowercase().as_str() {
            "active" | "open" => ThreadStatus::Active,
            "closed" | "done" | "archived" => ThreadStatus::Closed,
            _ => ThreadStatus::Unknown,
        }
    }
}

/// A single conversation thread, immutable once extracted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thread {
    pub id: String,
    pub title: String,
    pub status: ThreadStatus,
    pub messages: Vec<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_message_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message_time: Option<String>,
}

impl Thread {
    pub fn new(id: impl Into<String>, status: ThreadStatus, messages: Vec<Message>) -> Self {
        let id = id.into();
        Self {
            title: format!("Thread #{}", id),
            id,
            status,
            messages,
            first_message_time: None,
            last_message_time: None,
        }
    }

    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    /// Short excerpt of the first message, used in thread listings.
    pub fn preview(&self) -> String {
        let text = self
            .messages
            .first()
            .map(|m| m.flattened_text())
            .unwrap_or_default();
        if text.is_empty() {
            return "No content".to_string();
        }
        let mut preview: String = text.chars().take(100).collect();
        if text.chars().count() > 100 {
            preview.push_str("...");
        }
        preview
    }
}

/// Thread metadata for listings, without the full message payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadSummary {
    pub id: String,
    pub title: String,
    pub status: ThreadStatus,
    pub message_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_message_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message_time: Option<String>,
    pub preview: String,
    pub analyzed: bool,
}

/// A size-bounded group of threads submitted to the analyzer as one call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Batch {
    pub sequence_index: usize,
    pub thread_ids: Vec<String>,
    pub size_budget: usize,
    pub size: usize,
    /// Set when a single thread alone exceeds the budget and was placed in
    /// its own batch rather than truncated.
    pub oversized: bool,
    pub text: String,
}

/// Points a report item back at the thread (and optionally the messages,
/// by 0-based position) it was derived from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceRef {
    pub thread_id: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub message_ids: Vec<usize>,
}

impl EvidenceRef {
    pub fn thread(thread_id: impl Into<String>) -> Self {
        Self {
            thread_id: thread_id.into(),
            message_ids: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedItem {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub evidence: Vec<EvidenceRef>,
}

impl RankedItem {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            count: None,
            evidence: Vec::new(),
        }
    }
}

/// Canonical per-batch analyzer output. Any alternate field names the raw
/// response uses are normalized into this shape at the analyzer boundary.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchAnalysis {
    pub batch_index: usize,
    pub thread_ids: Vec<String>,
    #[serde(default)]
    pub key_insights: Vec<RankedItem>,
    #[serde(default)]
    pub improvement_areas: Vec<RankedItem>,
    #[serde(default)]
    pub unmet_needs: Vec<RankedItem>,
    #[serde(default)]
    pub categories: Vec<RankedItem>,
    #[serde(default)]
    pub top_discussions: Vec<RankedItem>,
    #[serde(default)]
    pub negative_indicators: Vec<RankedItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub satisfaction_score: Option<f64>,
}

impl BatchAnalysis {
    pub fn thread_count(&self) -> usize {
        self.thread_ids.len()
    }
}

/// Consolidated analysis output for a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub key_insights: Vec<RankedItem>,
    pub improvement_areas: Vec<RankedItem>,
    pub unmet_needs: Vec<RankedItem>,
    pub categories: Vec<RankedItem>,
    pub top_discussions: Vec<RankedItem>,
    pub negative_indicators: Vec<RankedItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub satisfaction_score: Option<f64>,
    /// Ids of every thread covered by the merged partials.
    pub thread_ids: Vec<String>,
    pub threads_analyzed: usize,
    pub batches_merged: usize,
    pub generated_at: DateTime<Utc>,
}

impl Report {
    /// Re-express the report as a single merged partial. Aggregating the
    /// result reproduces the report (idempotence of aggregation).
    pub fn as_partial(&self) -> BatchAnalysis {
        BatchAnalysis {
            batch_index: 0,
            thread_ids: self.thread_ids.clone(),
            key_insights: self.key_insights.clone(),
            improvement_areas: self.improvement_areas.clone(),
            unmet_needs: self.unmet_needs.clone(),
            categories: self.categories.clone(),
            top_discussions: self.top_discussions.clone(),
            negative_indicators: self.negative_indicators.clone(),
            quality_score: self.quality_score,
            satisfaction_score: self.satisfaction_score,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobPhase {
    Idle,
    Extracting,
    Analyzing,
    Cancelling,
    Cancelled,
    Completed,
    Failed,
}

impl JobPhase {
    /// Phases during which no new extract/analyze request may start.
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            JobPhase::Extracting | JobPhase::Analyzing | JobPhase::Cancelling
        )
    }
}

/// Per-session job state. The counters cover the current run; partials
/// accumulate across runs so re-aggregation merges old and new results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobState {
    pub session_id: String,
    pub phase: JobPhase,
    pub total_threads: usize,
    pub requested_count: usize,
    pub analyzed_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_batch_index: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default)]
    pub partials: Vec<BatchAnalysis>,
}

impl JobState {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            phase: JobPhase::Idle,
            total_threads: 0,
            requested_count: 0,
            analyzed_count: 0,
            current_batch_index: None,
            started_at: None,
            last_error: None,
            partials: Vec::new(),
        }
    }
}

/// Snapshot returned by progress queries. A pure read of job state; never
/// blocks on an in-flight analyzer call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Progress {
    pub session_id: String,
    pub phase: JobPhase,
    pub total_threads: usize,
    pub requested_count: usize,
    pub analyzed_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub has_partial_results: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_from_token() {
        assert_eq!(Role::from_token("USER"), Role::User);
        assert_eq!(Role::from_token("Human"), Role::User);
        assert_eq!(Role::from_token("assistant"), Role::Assistant);
        assert_eq!(Role::from_token("bot3000"), Role::System);
    }

    #[test]
    fn test_flattened_text_preserves_item_order() {
        let message = Message {
            role: Role::User,
            timestamp: None,
            content: vec![
                ContentItem::text("first line"),
                ContentItem {
                    kind: "sketch_upload_request".to_string(),
                    text: String::new(),
                },
                ContentItem::text("second line"),
            ],
        };
        assert_eq!(
            message.flattened_text(),
            "first line\n[sketch_upload_request]\nsecond line"
        );
    }

    #[test]
    fn test_thread_preview_truncates() {
        let long = "x".repeat(150);
        let thread = Thread::new(
            "t1",
            ThreadStatus::Active,
            vec![Message {
                role: Role::User,
                timestamp: None,
                content: vec![ContentItem::text(long)],
            }],
        );
        let preview = thread.preview();
        assert_eq!(preview.chars().count(), 103);
        assert!(preview.ends_with("..."));
    }
}
