use crate::spans::SpanRecord;
use std::sync::{Arc, Mutex, PoisonError};

/// Request-scoped, insertion-ordered collection of span records.
///
/// Clones share the same storage so the handle can be passed down to
/// instrumented call sites. Draining takes every record out, a second
/// drain in the same request yields nothing.
#[derive(Debug, Clone, Default)]
pub struct SpanBuffer {
    records: Arc<Mutex<Vec<SpanRecord>>>,
}

impl SpanBuffer {
    pub fn new() -> Self {
        SpanBuffer::default()
    }

    pub fn push(&self, record: SpanRecord) {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record);
    }

    pub fn drain(&self) -> Vec<SpanRecord> {
        std::mem::take(&mut *self.records.lock().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn len(&self) -> usize {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drain_keeps_order_and_empties() {
        let buffer = SpanBuffer::new();
        let handle = buffer.clone();
        handle.push(SpanRecord::new("first"));
        handle.push(SpanRecord::new("second"));
        assert_eq!(buffer.len(), 2);

        let names: Vec<_> = buffer
            .drain()
            .into_iter()
            .map(|r| r.name.unwrap_or_default())
            .collect();
        assert_eq!(names, vec!["first", "second"]);
        assert!(buffer.drain().is_empty());
        assert!(handle.is_empty());
    }

    #[test]
    fn test_separate_buffers_do_not_share() {
        let a = SpanBuffer::new();
        let b = SpanBuffer::new();
        a.push(SpanRecord::new("a"));

        assert_eq!(a.len(), 1);
        assert!(b.is_empty());
    }
}
