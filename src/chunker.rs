//! Greedy size-bounded batching of threads.

use tracing::debug;

use crate::config::SizeMetric;
use crate::prompts::{batch_text, thread_to_text};
use crate::types::{Batch, Thread};

pub struct Chunker {
    budget: usize,
    metric: SizeMetric,
}

impl Chunker {
    pub fn new(budget: usize, metric: SizeMetric) -> Self {
        Self { budget, metric }
    }

    /// Pack threads into batches, preserving input order. A thread that
    /// alone exceeds the budget becomes its own batch marked `oversized`
    /// rather than being truncated or dropped.
    pub fn chunk(&self, threads: &[Thread]) -> Vec<Batch> {
        let mut batches: Vec<Batch> = Vec::new();
        let mut current: Vec<&Thread> = Vec::new();
        let mut current_size = 0usize;

        for thread in threads {
            let size = self.metric.measure(&thread_to_text(thread));

            if size > self.budget {
                if !current.is_empty() {
                    batches.push(self.finish(batches.len(), &current, current_size, false));
                    current.clear();
                    current_size = 0;
                }
                batches.push(self.finish(batches.len(), &[thread], size, true));
                continue;
            }

            if current_size + size > self.budget && !current.is_empty() {
                batches.push(self.finish(batches.len(), &current, current_size, false));
                current.clear();
                current_size = 0;
            }

            current.push(thread);
            current_size += size;
        }

        if !current.is_empty() {
            batches.push(self.finish(batches.len(), &current, current_size, false));
        }

        debug!(
            threads = threads.len(),
            batches = batches.len(),
            budget = self.budget,
            "chunking finished"
        );
        batches
    }

    fn finish(&self, index: usize, members: &[&Thread], size: usize, oversized: bool) -> Batch {
        Batch {
            sequence_index: index,
            thread_ids: members.iter().map(|t| t.id.clone()).collect(),
            size_budget: self.budget,
            size,
            oversized,
            text: batch_text(members),
        }
    }
}
