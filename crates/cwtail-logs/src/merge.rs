use cwtail_types::DisplayRecord;

/// Per-tick batch that reorders events from many streams into time order.
///
/// Nothing is held across ticks: every record pushed during a tick leaves
/// through the next [`MergeBuffer::flush`].
#[derive(Debug, Default)]
pub struct MergeBuffer {
    batch: Vec<DisplayRecord>,
}

impl MergeBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: DisplayRecord) {
        self.batch.push(record);
    }

    pub fn len(&self) -> usize {
        self.batch.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batch.is_empty()
    }

    /// Drain the batch ordered by `(timestamp, stream_id, event_id)`
    pub fn flush(&mut self) -> Vec<DisplayRecord> {
        let mut batch = std::mem::take(&mut self.batch);
        batch.sort_by(|a, b| {
            (a.timestamp, &a.stream_id, &a.event_id).cmp(&(b.timestamp, &b.stream_id, &b.event_id))
        });
        batch
    }
}

impl Extend<DisplayRecord> for MergeBuffer {
    fn extend<T: IntoIterator<Item = DisplayRecord>>(&mut self, iter: T) {
        self.batch.extend(iter);
    }
}
