use crate::{buffer::SpanBuffer, spans::SpanRecord, timer::Timer};

/// Everything that lives exactly as long as one request: the entry timer
/// and a fresh span buffer.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    timer: Timer,
    spans: SpanBuffer,
}

impl RequestContext {
    /// Starts the request timer.
    pub fn new() -> Self {
        RequestContext {
            timer: Timer::start(),
            spans: SpanBuffer::new(),
        }
    }

    pub fn timer(&self) -> &Timer {
        &self.timer
    }

    pub fn spans(&self) -> &SpanBuffer {
        &self.spans
    }

    pub fn record_span(&self, record: SpanRecord) {
        self.spans.push(record);
    }

    /// Run `f` and buffer `record` with its start offset (us since request
    /// entry) and duration (ms) filled in from the run.
    pub fn measure<T, F>(&self, record: SpanRecord, f: F) -> T
    where
        F: FnOnce() -> T,
    {
        let start_us = self.timer.elapsed_us();
        let out = f();
        let duration_ms = (self.timer.elapsed_us() - start_us) / 1_000f64;
        self.spans
            .push(record.with_start(start_us).with_duration(duration_ms));
        out
    }
}
