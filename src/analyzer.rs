//! Analyzer boundary: the trait the job loop talks to, the HTTP provider
//! behind it, and normalization of raw responses into the canonical
//! per-batch shape. Response-shape quirks stop here; nothing downstream
//! ever sees an alternate field name.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::AnalyzerError;
use crate::types::{BatchAnalysis, EvidenceRef, RankedItem};

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Black-box text-analysis model. Returns the raw parsed JSON; callers run
/// it through [`normalize_analysis`].
#[async_trait]
pub trait Analyzer: Send + Sync {
    async fn analyze(
        &self,
        batch_text: &str,
        instructions: &str,
    ) -> Result<Value, AnalyzerError>;
}

#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    system: String,
    messages: Vec<RequestMessage>,
}

#[derive(Debug, Serialize)]
struct RequestMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ResponseContent>,
}

#[derive(Debug, Deserialize)]
struct ResponseContent {
    text: Option<String>,
}

/// Anthropic Messages API provider.
pub struct ClaudeAnalyzer {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl ClaudeAnalyzer {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, AnalyzerError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AnalyzerError::Http(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
        })
    }
}

#[async_trait]
impl Analyzer for ClaudeAnalyzer {
    async fn analyze(
        &self,
        batch_text: &str,
        instructions: &str,
    ) -> Result<Value, AnalyzerError> {
        let request = MessagesRequest {
            model: self.model.clone(),
            max_tokens: 4096,
            system: instructions.to_string(),
            messages: vec![RequestMessage {
                role: "user".to_string(),
                content: batch_text.to_string(),
            }],
        };

        debug!(model = %self.model, size = batch_text.len(), "submitting batch");

        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AnalyzerError::Timeout
                } else {
                    AnalyzerError::Http(e.to_string())
                }
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(AnalyzerError::RateLimited);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AnalyzerError::Http(format!("status {}: {}", status, body)));
        }

        let parsed: MessagesResponse = response
            .json()
            .await
            .map_err(|e| AnalyzerError::Http(format!("failed to read response body: {}", e)))?;

        let text = parsed
            .content
            .first()
            .and_then(|c| c.text.as_deref())
            .ok_or_else(|| {
                AnalyzerError::InvalidResponse("response carried no text content".to_string())
            })?;

        parse_json_payload(text)
    }
}

/// Pull the JSON object out of the model's text, tolerating code fences and
/// stray prose around it.
pub fn parse_json_payload(text: &str) -> Result<Value, AnalyzerError> {
    let trimmed = text.trim();
    let stripped = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|s| s.strip_suffix("```"))
        .map(str::trim)
        .unwrap_or(trimmed);

    if let Ok(value) = serde_json::from_str::<Value>(stripped) {
        return Ok(value);
    }

    // fall back to the outermost brace pair
    if let (Some(start), Some(end)) = (stripped.find('{'), stripped.rfind('}')) {
        if start < end {
            if let Ok(value) = serde_json::from_str::<Value>(&stripped[start..=end]) {
                return Ok(value);
            }
        }
    }

    Err(AnalyzerError::InvalidResponse(
        "response text is not valid JSON".to_string(),
    ))
}

/// Normalize a raw analyzer response into the canonical [`BatchAnalysis`].
///
/// Alternate field names are mapped here; evidence referencing a thread id
/// outside the submitted batch is dropped with a warning rather than
/// propagated.
pub fn normalize_analysis(
    raw: &Value,
    batch_index: usize,
    batch_thread_ids: &[String],
) -> Result<BatchAnalysis, AnalyzerError> {
    let obj = raw.as_object().ok_or_else(|| {
        AnalyzerError::InvalidResponse("analysis payload is not a JSON object".to_string())
    })?;

    let allowed: HashSet<&str> = batch_thread_ids.iter().map(String::as_str).collect();
    let items = |keys: &[&str]| -> Vec<RankedItem> {
        keys.iter()
            .find_map(|k| obj.get(*k))
            .map(|v| ranked_items(v, &allowed))
            .unwrap_or_default()
    };

    let analysis = BatchAnalysis {
        batch_index,
        thread_ids: batch_thread_ids.to_vec(),
        key_insights: items(&["key_insights", "insights"]),
        improvement_areas: items(&["improvement_areas", "areas_for_improvement", "improvements"]),
        unmet_needs: items(&["unmet_needs", "unmet_user_needs"]),
        categories: items(&["categories", "product_categories"]),
        top_discussions: items(&["top_discussions", "discussions", "top_topics"]),
        negative_indicators: items(&["negative_indicators", "negative_feedback"]),
        quality_score: score(obj, &["quality_score", "response_quality"]),
        satisfaction_score: score(obj, &["satisfaction_score", "user_satisfaction"]),
    };

    if analysis.key_insights.is_empty()
        && analysis.improvement_areas.is_empty()
        && analysis.unmet_needs.is_empty()
        && analysis.categories.is_empty()
        && analysis.top_discussions.is_empty()
        && analysis.negative_indicators.is_empty()
        && analysis.quality_score.is_none()
        && analysis.satisfaction_score.is_none()
    {
        return Err(AnalyzerError::InvalidResponse(
            "analysis payload carried none of the expected fields".to_string(),
        ));
    }

    Ok(analysis)
}

fn score(obj: &serde_json::Map<String, Value>, keys: &[&str]) -> Option<f64> {
    keys.iter()
        .find_map(|k| obj.get(*k))
        .and_then(Value::as_f64)
        .map(|v| v.clamp(0.0, 10.0))
}

fn ranked_items(value: &Value, allowed: &HashSet<&str>) -> Vec<RankedItem> {
    let Some(array) = value.as_array() else {
        return Vec::new();
    };
    array
        .iter()
        .filter_map(|entry| ranked_item(entry, allowed))
        .collect()
}

fn ranked_item(entry: &Value, allowed: &HashSet<&str>) -> Option<RankedItem> {
    match entry {
        Value::String(text) => {
            let text = text.trim();
            (!text.is_empty()).then(|| RankedItem::new(text))
        }
        Value::Object(obj) => {
            let text = obj
                .get("text")
                .or_else(|| obj.get("insight"))
                .or_else(|| obj.get("topic"))
                .or_else(|| obj.get("name"))
                .and_then(Value::as_str)?
                .trim()
                .to_string();
            if text.is_empty() {
                return None;
            }
            let count = obj
                .get("count")
                .and_then(Value::as_u64)
                .map(|c| c as u32);
            let evidence = obj
                .get("evidence")
                .and_then(Value::as_array)
                .map(|refs| evidence_refs(refs, allowed))
                .unwrap_or_default();
            Some(RankedItem {
                text,
                count,
                evidence,
            })
        }
        _ => None,
    }
}

fn evidence_refs(refs: &[Value], allowed: &HashSet<&str>) -> Vec<EvidenceRef> {
    refs.iter()
        .filter_map(|r| {
            let thread_id = match r {
                Value::String(id) => id.clone(),
                Value::Object(obj) => obj.get("thread_id").and_then(Value::as_str)?.to_string(),
                _ => return None,
            };
            if !allowed.contains(thread_id.as_str()) {
                warn!(thread_id = %thread_id, "dropping evidence for thread outside the batch");
                return None;
            }
            let message_ids = match r {
                Value::Object(obj) => obj
                    .get("message_ids")
                    .and_then(Value::as_array)
                    .map(|ids| {
                        ids.iter()
                            .filter_map(Value::as_u64)
                            .map(|v| v as usize)
                            .collect()
                    })
                    .unwrap_or_default(),
                _ => Vec::new(),
            };
            Some(EvidenceRef {
                thread_id,
                message_ids,
            })
        })
        .collect()
}
