// src/time.rs - Wall-clock source for tracking timestamps
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};

/// Source of UTC wall-clock time.
pub trait TimeInterface: Send + Sync {
    fn now_utc(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl TimeInterface for SystemClock {
    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Deterministic clock: the n-th call returns `start + n * step`.
#[derive(Debug)]
pub struct SteppedClock {
    next: Mutex<DateTime<Utc>>,
    step: chrono::Duration,
}

impl SteppedClock {
    pub fn new(start: DateTime<Utc>, step: Duration) -> Self {
        Self {
            next: Mutex::new(start),
            step: chrono::Duration::from_std(step).unwrap_or(chrono::Duration::zero()),
        }
    }
}

impl TimeInterface for SteppedClock {
    fn now_utc(&self) -> DateTime<Utc> {
        match self.next.lock() {
            Ok(mut next) => {
                let now = *next;
                *next = now + self.step;
                now
            }
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}
