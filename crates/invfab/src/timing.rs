//! Phase timing.

use std::time::{Duration, Instant};

/// Accumulating stopwatch for one named phase.
#[derive(Debug, Clone)]
pub struct Interval {
    pub name: &'static str,
    total: Duration,
    started: Option<Instant>,
}

impl Interval {
    pub fn new(name: &'static str) -> Self {
        Interval {
            name,
            total: Duration::ZERO,
            started: None,
        }
    }

    pub fn start(&mut self) {
        self.started = Some(Instant::now());
    }

    pub fn stop(&mut self) {
        if let Some(t0) = self.started.take() {
            self.total += t0.elapsed();
        }
    }

    pub fn add(&mut self, other: &Interval) {
        self.total += other.total;
    }

    pub fn ms(&self) -> f64 {
        self.total.as_secs_f64() * 1000.0
    }
}
