//! Timestamp source for conversation records.

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, TimeZone, Utc};

/// Process-wide clock yielding strictly increasing microsecond timestamps.
///
/// Two calls inside the same microsecond (or across a backwards wall-clock
/// step) get distinct, ordered values, so `(user_id, timestamp)` keys never
/// collide within a process.
#[derive(Debug, Default)]
pub struct MonotonicClock {
    last_micros: AtomicI64,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&self) -> DateTime<Utc> {
        let wall = Utc::now().timestamp_micros();
        let mut prev = self.last_micros.load(Ordering::Relaxed);
        loop {
            let next = wall.max(prev + 1);
            match self.last_micros.compare_exchange_weak(
                prev,
                next,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return micros_to_datetime(next),
                Err(actual) => prev = actual,
            }
        }
    }
}

pub(crate) fn micros_to_datetime(micros: i64) -> DateTime<Utc> {
    Utc.timestamp_micros(micros)
        .single()
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}
