//! Per-partition offset bookkeeping for sources that commit explicitly

use std::collections::BTreeMap;

/// Highest offset read per partition, held until the caller is done with it
#[derive(Debug, Default)]
pub struct OffsetTracker {
    pending: BTreeMap<i32, i64>,
}

impl OffsetTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, partition: i32, offset: i64) {
        let entry = self.pending.entry(partition).or_insert(offset);
        if offset > *entry {
            *entry = offset;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Next offset to consume for each partition (last read + 1), clearing the tracker
    pub fn take(&mut self) -> Vec<(i32, i64)> {
        std::mem::take(&mut self.pending)
            .into_iter()
            .map(|(partition, offset)| (partition, offset + 1))
            .collect()
    }
}
