// SPDX-License-Identifier: MIT

//! Sequence bookkeeping shared by multi-subscriber streams.

use std::collections::{BTreeMap, BTreeSet};

use lp_wire::StreamSequence;

/// Tracks the next sequence id for every request subscribed to a stream.
///
/// Counters start at 1 and post-increment on every emission, so each
/// request id observes `1, 2, 3, …` with no gaps.
#[derive(Debug, Default)]
pub struct SequenceTracker {
    sequences: BTreeMap<u64, u64>,
}

impl SequenceTracker {
    pub fn add_request(&mut self, request_id: u64) {
        self.sequences.entry(request_id).or_insert(1);
    }

    pub fn remove_request(&mut self, request_id: u64) {
        self.sequences.remove(&request_id);
    }

    pub fn is_empty(&self) -> bool {
        self.sequences.is_empty()
    }

    pub fn contains(&self, request_id: u64) -> bool {
        self.sequences.contains_key(&request_id)
    }

    /// Draw the next sequence id for every registered request.
    pub fn next_all(&mut self) -> Vec<StreamSequence> {
        self.sequences
            .iter_mut()
            .map(|(&request_id, seq)| {
                let seq_id = *seq;
                *seq += 1;
                StreamSequence { request_id, seq_id }
            })
            .collect()
    }

    /// Draw the next sequence id for the selected requests only.
    pub fn next_for(&mut self, request_ids: &BTreeSet<u64>) -> Vec<StreamSequence> {
        self.sequences
            .iter_mut()
            .filter(|(request_id, _)| request_ids.contains(request_id))
            .map(|(&request_id, seq)| {
                let seq_id = *seq;
                *seq += 1;
                StreamSequence { request_id, seq_id }
            })
            .collect()
    }
}

#[cfg(test)]
#[path = "multi_tests.rs"]
mod tests;
