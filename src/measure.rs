//! Tick statistics
//!
//! Collects tick durations and the number of MIDI messages drained per tick, and
//! reports min/max/average once per window.

use std::time::{Duration, Instant};
use tracing::debug;

/// Default reporting window
pub const DEFAULT_MEASUREMENT_INTERVAL_MS: u64 = 5000;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Stats {
    pub min: u64,
    pub max: u64,
    pub avg: f64,
}

/// Statistics of one reporting window
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Report {
    pub ticks: u64,
    pub tick_us: Stats,
    pub messages: Stats,
}

#[derive(Debug, Default)]
struct Accumulator {
    count: u64,
    min: u64,
    max: u64,
    sum: u64,
}

impl Accumulator {
    fn add(&mut self, value: u64) {
        if self.count == 0 || value < self.min {
            self.min = value;
        }
        self.max = self.max.max(value);
        self.sum += value;
        self.count += 1;
    }

    fn stats(&self) -> Stats {
        Stats {
            min: self.min,
            max: self.max,
            avg: if self.count == 0 {
                0.0
            } else {
                self.sum as f64 / self.count as f64
            },
        }
    }
}

pub struct RuntimeMeasurement {
    interval_ms: u64,
    window_start_ms: Option<u64>,
    started: Option<Instant>,
    tick_us: Accumulator,
    messages: Accumulator,
}

impl RuntimeMeasurement {
    pub fn new(interval_ms: u64) -> Self {
        Self {
            interval_ms,
            window_start_ms: None,
            started: None,
            tick_us: Accumulator::default(),
            messages: Accumulator::default(),
        }
    }

    pub fn start(&mut self) {
        self.started = Some(Instant::now());
    }

    /// Close the current tick; returns a report when the window is over
    pub fn finish(&mut self, messages: usize, now_ms: u64) -> Option<Report> {
        let elapsed = self.started.take().map(|s| s.elapsed()).unwrap_or(Duration::ZERO);
        self.record(elapsed, messages, now_ms)
    }

    fn record(&mut self, elapsed: Duration, messages: usize, now_ms: u64) -> Option<Report> {
        let window_start = *self.window_start_ms.get_or_insert(now_ms);
        self.tick_us.add(elapsed.as_micros() as u64);
        self.messages.add(messages as u64);

        if now_ms.saturating_sub(window_start) < self.interval_ms {
            return None;
        }

        let report = Report {
            ticks: self.tick_us.count,
            tick_us: self.tick_us.stats(),
            messages: self.messages.stats(),
        };
        debug!(
            "Ticks: {} | tick µs min {} max {} avg {:.1} | messages min {} max {} avg {:.2}",
            report.ticks,
            report.tick_us.min,
            report.tick_us.max,
            report.tick_us.avg,
            report.messages.min,
            report.messages.max,
            report.messages.avg
        );

        self.window_start_ms = Some(now_ms);
        self.tick_us = Accumulator::default();
        self.messages = Accumulator::default();
        Some(report)
    }
}
