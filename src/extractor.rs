//! Thread extraction from raw semi-structured transcript logs.
//!
//! The parser is line-oriented and tolerant: a malformed block is skipped
//! with a warning and extraction continues with the next one. The whole
//! file is never abandoned because of one bad block.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::types::{ContentItem, Message, Role, Thread, ThreadStatus};

const THREAD_MARKER: &str = "========== THREAD: ";
const END_MARKER: &str = "========== END THREAD ==========";
const MARKER_SUFFIX: &str = " ==========";

/// `[<timestamp>] <ROLE>:` with the timestamp optional.
static MESSAGE_HEADER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:\[(?P<ts>[^\]]+)\]\s*)?(?P<role>[A-Za-z][A-Za-z_ ]*):\s*$")
        .expect("message header regex")
});

/// A content line that is a non-text placeholder, e.g. `[sketch_upload_request]`.
static PLACEHOLDER_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\[(?P<kind>[a-z][a-z0-9_]*)\]$").expect("placeholder regex"));

pub struct ThreadExtractor;

impl ThreadExtractor {
    /// Parse a raw log into threads plus non-fatal warnings, in input order.
    ///
    /// A thread id that appears more than once keeps its original position
    /// but the last block's content wins.
    pub fn extract(raw: &str) -> (Vec<Thread>, Vec<String>) {
        let mut threads: Vec<Thread> = Vec::new();
        let mut positions: HashMap<String, usize> = HashMap::new();
        let mut warnings: Vec<String> = Vec::new();

        let lines: Vec<&str> = raw.lines().collect();
        let mut i = 0;
        while i < lines.len() {
            let line = lines[i].trim_end();
            if let Some(id) = parse_thread_marker(line) {
                match parse_block(&lines, i + 1, &id, &mut warnings) {
                    Some((thread, next)) => {
                        if let Some(&pos) = positions.get(&thread.id) {
                            warnings.push(format!(
                                "duplicate thread id '{}', keeping the later occurrence",
                                thread.id
                            ));
                            threads[pos] = thread;
                        } else {
                            positions.insert(thread.id.clone(), threads.len());
                            threads.push(thread);
                        }
                        i = next;
                    }
                    None => {
                        // parse_block already warned; resync at the next marker
                        i += 1;
                        while i < lines.len() && parse_thread_marker(lines[i].trim_end()).is_none()
                        {
                            i += 1;
                        }
                    }
                }
            } else {
                i += 1;
            }
        }

        debug!(
            threads = threads.len(),
            warnings = warnings.len(),
            "extraction finished"
        );
        (threads, warnings)
    }
}

fn parse_thread_marker(line: &str) -> Option<String> {
    let rest = line.strip_prefix(THREAD_MARKER)?;
    let id = rest.strip_suffix(MARKER_SUFFIX)?.trim();
    if id.is_empty() {
        return None;
    }
    Some(id.to_string())
}

/// Parse one block body starting just after its THREAD marker. Returns the
/// thread and the index of the line after the END marker, or None if the
/// block is malformed.
fn parse_block(
    lines: &[&str],
    start: usize,
    id: &str,
    warnings: &mut Vec<String>,
) -> Option<(Thread, usize)> {
    let mut status = ThreadStatus::Unknown;
    let mut declared_count: Option<usize> = None;
    let mut range_first: Option<String> = None;
    let mut range_last: Option<String> = None;

    let mut messages: Vec<Message> = Vec::new();
    let mut current: Option<(Role, Option<String>, Vec<ContentItem>)> = None;
    let mut pending_text: Vec<String> = Vec::new();
    let mut in_header = true;

    let mut i = start;
    loop {
        if i >= lines.len() {
            warn!(thread_id = %id, "thread block has no end marker, skipping");
            warnings.push(format!("thread '{}' has no end marker, block skipped", id));
            return None;
        }
        let line = lines[i].trim_end();

        if parse_thread_marker(line).is_some() {
            warn!(thread_id = %id, "thread block interrupted by a new block, skipping");
            warnings.push(format!("thread '{}' has no end marker, block skipped", id));
            return None;
        }

        if line == END_MARKER {
            flush_message(&mut current, &mut pending_text, &mut messages);
            break;
        }

        // a bare `word:` line only counts as a header for a known role;
        // anything with a timestamp prefix keeps the fail-soft role handling
        let header = MESSAGE_HEADER.captures(line).filter(|caps| {
            caps.name("ts").is_some() || Role::try_from_token(&caps["role"]).is_some()
        });
        if let Some(caps) = header {
            flush_message(&mut current, &mut pending_text, &mut messages);
            in_header = false;
            let role = Role::from_token(&caps["role"]);
            let timestamp = caps.name("ts").map(|m| m.as_str().trim().to_string());
            current = Some((role, timestamp, Vec::new()));
        } else if in_header {
            if let Some(value) = line.strip_prefix("Status:") {
                status = ThreadStatus::from_token(value);
            } else if let Some(value) = line.strip_prefix("Messages:") {
                match value.trim().parse::<usize>() {
                    Ok(n) => declared_count = Some(n),
                    Err(_) => warnings.push(format!(
                        "thread '{}': unparseable message count '{}'",
                        id,
                        value.trim()
                    )),
                }
            } else if let Some(value) = line.strip_prefix("Range:") {
                if let Some((first, last)) = value.split_once("..") {
                    range_first = non_empty(first);
                    range_last = non_empty(last);
                }
            }
            // other header lines are ignored
        } else if current.is_some() {
            if let Some(caps) = PLACEHOLDER_LINE.captures(line.trim()) {
                if let Some((_, _, items)) = current.as_mut() {
                    if !pending_text.is_empty() {
                        items.push(ContentItem::text(pending_text.join("\n")));
                        pending_text.clear();
                    }
                    items.push(ContentItem {
                        kind: caps["kind"].to_string(),
                        text: String::new(),
                    });
                }
            } else {
                pending_text.push(line.to_string());
            }
        }
        i += 1;
    }

    if let Some(declared) = declared_count {
        if declared != messages.len() {
            warnings.push(format!(
                "thread '{}' declares {} messages but {} were parsed",
                id,
                declared,
                messages.len()
            ));
        }
    }

    let first_time = range_first.or_else(|| messages.iter().find_map(|m| m.timestamp.clone()));
    let last_time =
        range_last.or_else(|| messages.iter().rev().find_map(|m| m.timestamp.clone()));

    let mut thread = Thread::new(id, status, messages);
    thread.first_message_time = first_time;
    thread.last_message_time = last_time;
    Some((thread, i + 1))
}

fn flush_message(
    current: &mut Option<(Role, Option<String>, Vec<ContentItem>)>,
    pending_text: &mut Vec<String>,
    messages: &mut Vec<Message>,
) {
    if let Some((role, timestamp, mut items)) = current.take() {
        // drop trailing blank lines but keep interior ones
        while pending_text.last().is_some_and(|l| l.trim().is_empty()) {
            pending_text.pop();
        }
        if !pending_text.is_empty() {
            items.push(ContentItem::text(pending_text.join("\n")));
        }
        pending_text.clear();
        messages.push(Message {
            role,
            timestamp,
            content: items,
        });
    }
}

fn non_empty(s: &str) -> Option<String> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
