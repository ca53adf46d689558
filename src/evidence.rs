//! Resolution of evidence references back to original thread content.
//!
//! Strictly a lookup: an absent thread or message index is an error, never
//! substituted with placeholder content.

use serde::{Deserialize, Serialize};

use crate::error::{Result, ThreadLensError};
use crate::storage::Storage;
use crate::types::{EvidenceRef, Role};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedEvidence {
    pub thread_id: String,
    pub title: String,
    pub messages: Vec<EvidenceMessage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceMessage {
    /// 0-based position within the thread.
    pub index: usize,
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    pub text: String,
}

pub struct EvidenceResolver<'a> {
    storage: &'a dyn Storage,
}

impl<'a> EvidenceResolver<'a> {
    pub fn new(storage: &'a dyn Storage) -> Self {
        Self { storage }
    }

    /// Resolve a reference for one session. An empty `message_ids` list
    /// means the whole thread; otherwise only the referenced messages, in
    /// their original order.
    pub async fn resolve(
        &self,
        session_id: &str,
        evidence: &EvidenceRef,
    ) -> Result<ResolvedEvidence> {
        let thread = self
            .storage
            .load_thread(session_id, &evidence.thread_id)
            .await?
            .ok_or_else(|| ThreadLensError::ThreadNotFound(evidence.thread_id.clone()))?;

        let mut indices: Vec<usize> = if evidence.message_ids.is_empty() {
            (0..thread.messages.len()).collect()
        } else {
            for &index in &evidence.message_ids {
                if index >= thread.messages.len() {
                    return Err(ThreadLensError::MessageNotFound {
                        thread_id: thread.id,
                        index,
                    });
                }
            }
            evidence.message_ids.clone()
        };
        indices.sort_unstable();
        indices.dedup();

        let messages = indices
            .into_iter()
            .map(|index| {
                let message = &thread.messages[index];
                EvidenceMessage {
                    index,
                    role: message.role,
                    timestamp: message.timestamp.clone(),
                    text: message.flattened_text(),
                }
            })
            .collect();

        Ok(ResolvedEvidence {
            thread_id: thread.id,
            title: thread.title,
            messages,
        })
    }
}
