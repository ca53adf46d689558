//! Merges per-batch analyses into a single consolidated report.
//!
//! Aggregation is a pure function of the partial set and is idempotent:
//! re-aggregating the same partials, or a report re-expressed as a single
//! partial, yields the same report.

use chrono::Utc;
use std::collections::HashMap;
use tracing::debug;

use crate::types::{BatchAnalysis, RankedItem, Report};

pub struct ResultAggregator;

impl ResultAggregator {
    pub fn aggregate(partials: &[BatchAnalysis]) -> Report {
        let key_insights = merge_items(partials, |p| &p.key_insights);
        let improvement_areas = merge_items(partials, |p| &p.improvement_areas);
        let unmet_needs = merge_items(partials, |p| &p.unmet_needs);
        let categories = merge_items(partials, |p| &p.categories);
        let top_discussions = merge_items(partials, |p| &p.top_discussions);
        let negative_indicators = merge_items(partials, |p| &p.negative_indicators);

        let mut thread_ids: Vec<String> = Vec::new();
        for partial in partials {
            for id in &partial.thread_ids {
                if !thread_ids.contains(id) {
                    thread_ids.push(id.clone());
                }
            }
        }

        debug!(
            partials = partials.len(),
            threads = thread_ids.len(),
            "aggregated report"
        );

        Report {
            key_insights,
            improvement_areas,
            unmet_needs,
            categories,
            top_discussions,
            negative_indicators,
            quality_score: weighted_score(partials, |p| p.quality_score),
            satisfaction_score: weighted_score(partials, |p| p.satisfaction_score),
            threads_analyzed: thread_ids.len(),
            thread_ids,
            batches_merged: partials.len(),
            generated_at: Utc::now(),
        }
    }
}

/// Merge one list field across partials. Entries whose trimmed text matches
/// case-insensitively collapse into one item: first-seen text wins, counts
/// sum, evidence unions. Sorted by count descending only when every merged
/// entry carries a count; otherwise merge order is kept.
fn merge_items<'a, F>(partials: &'a [BatchAnalysis], field: F) -> Vec<RankedItem>
where
    F: Fn(&'a BatchAnalysis) -> &'a Vec<RankedItem>,
{
    let mut merged: Vec<RankedItem> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for partial in partials {
        for item in field(partial) {
            let key = item.text.trim().to_lowercase();
            if key.is_empty() {
                continue;
            }
            match index.get(&key) {
                Some(&pos) => {
                    let existing = &mut merged[pos];
                    existing.count = match (existing.count, item.count) {
                        (Some(a), Some(b)) => Some(a + b),
                        (Some(a), None) => Some(a),
                        (None, Some(b)) => Some(b),
                        (None, None) => None,
                    };
                    for evidence in &item.evidence {
                        if let Some(held) = existing
                            .evidence
                            .iter_mut()
                            .find(|e| e.thread_id == evidence.thread_id)
                        {
                            for &id in &evidence.message_ids {
                                if !held.message_ids.contains(&id) {
                                    held.message_ids.push(id);
                                }
                            }
                        } else {
                            existing.evidence.push(evidence.clone());
                        }
                    }
                }
                None => {
                    index.insert(key, merged.len());
                    let mut item = item.clone();
                    item.text = item.text.trim().to_string();
                    merged.push(item);
                }
            }
        }
    }

    if !merged.is_empty() && merged.iter().all(|i| i.count.is_some()) {
        merged.sort_by(|a, b| b.count.cmp(&a.count));
    }
    merged
}

/// Thread-count-weighted average over the partials that carry the score.
fn weighted_score<F>(partials: &[BatchAnalysis], score: F) -> Option<f64>
where
    F: Fn(&BatchAnalysis) -> Option<f64>,
{
    let mut weighted_sum = 0.0;
    let mut weight = 0usize;
    for partial in partials {
        if let Some(value) = score(partial) {
            let threads = partial.thread_count().max(1);
            weighted_sum += value * threads as f64;
            weight += threads;
        }
    }
    if weight == 0 {
        None
    } else {
        Some(weighted_sum / weight as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EvidenceRef;

    fn item(text: &str, count: Option<u32>, evidence: &[&str]) -> RankedItem {
        RankedItem {
            text: text.to_string(),
            count,
            evidence: evidence.iter().map(|id| EvidenceRef::thread(*id)).collect(),
        }
    }

    fn partial(index: usize, threads: &[&str]) -> BatchAnalysis {
        BatchAnalysis {
            batch_index: index,
            thread_ids: threads.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_case_insensitive_merge_sums_counts_and_unions_evidence() {
        let mut a = partial(0, &["t1", "t2"]);
        a.key_insights = vec![item("Slow Exports", Some(2), &["t1"])];
        let mut b = partial(1, &["t3"]);
        b.key_insights = vec![item("  slow exports ", Some(1), &["t3", "t1"])];

        let report = ResultAggregator::aggregate(&[a, b]);
        assert_eq!(report.key_insights.len(), 1);
        let merged = &report.key_insights[0];
        assert_eq!(merged.text, "Slow Exports");
        assert_eq!(merged.count, Some(3));
        let evidence_ids: Vec<&str> = merged
            .evidence
            .iter()
            .map(|e| e.thread_id.as_str())
            .collect();
        assert_eq!(evidence_ids, vec!["t1", "t3"]);
    }

    #[test]
    fn test_sorted_by_count_only_when_all_counted() {
        let mut a = partial(0, &["t1"]);
        a.categories = vec![item("minor", Some(1), &[]), item("major", Some(5), &[])];
        let report = ResultAggregator::aggregate(&[a.clone()]);
        assert_eq!(report.categories[0].text, "major");

        a.categories.push(item("uncounted", None, &[]));
        let report = ResultAggregator::aggregate(&[a]);
        // one entry without a count: merge order preserved
        assert_eq!(report.categories[0].text, "minor");
    }

    #[test]
    fn test_weighted_scores_skip_missing() {
        let mut a = partial(0, &["t1", "t2", "t3"]);
        a.quality_score = Some(9.0);
        let mut b = partial(1, &["t4"]);
        b.quality_score = Some(5.0);
        let c = partial(2, &["t5"]); // no score

        let report = ResultAggregator::aggregate(&[a, b, c]);
        let score = report.quality_score.unwrap();
        assert!((score - 8.0).abs() < 1e-9, "got {}", score);
        assert_eq!(report.satisfaction_score, None);
    }

    #[test]
    fn test_aggregate_is_idempotent() {
        let mut a = partial(0, &["t1", "t2"]);
        a.key_insights = vec![item("insight", Some(2), &["t1"])];
        a.quality_score = Some(7.0);
        let mut b = partial(1, &["t3"]);
        b.key_insights = vec![item("INSIGHT", Some(1), &["t3"])];
        b.unmet_needs = vec![item("offline mode", None, &["t3"])];
        b.quality_score = Some(4.0);

        let once = ResultAggregator::aggregate(&[a.clone(), b.clone()]);
        let twice = ResultAggregator::aggregate(&[once.as_partial()]);

        assert_eq!(once.key_insights, twice.key_insights);
        assert_eq!(once.unmet_needs, twice.unmet_needs);
        assert_eq!(once.thread_ids, twice.thread_ids);
        assert_eq!(once.quality_score, twice.quality_score);
    }

    #[test]
    fn test_empty_partials_empty_report() {
        let report = ResultAggregator::aggregate(&[]);
        assert!(report.key_insights.is_empty());
        assert_eq!(report.threads_analyzed, 0);
        assert_eq!(report.quality_score, None);
    }
}
