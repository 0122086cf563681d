use std::time::Instant;

/// Stopwatch started when a request enters the middleware.
#[derive(Debug, Clone, Copy)]
pub struct Timer {
    started: Instant,
}

impl Timer {
    pub fn start() -> Self {
        Timer {
            started: Instant::now(),
        }
    }

    /// Elapsed time since `start`, in milliseconds.
    pub fn elapsed_ms(&self) -> f64 {
        self.started.elapsed().as_secs_f64() * 1_000f64
    }

    /// Elapsed time since `start`, in microseconds.
    pub fn elapsed_us(&self) -> f64 {
        self.started.elapsed().as_secs_f64() * 1_000_000f64
    }
}

impl Default for Timer {
    fn default() -> Self {
        Timer::start()
    }
}
