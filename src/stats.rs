//! `ConnectionStats`: attempts, successes, timestamps, and the bounded
//! window of recent session durations the flap detector reads.

use std::collections::VecDeque;
use std::time::Instant;

const MAX_DURATIONS: usize = 100;

#[derive(Debug, Clone, Default)]
pub struct ConnectionStats {
    pub attempts: u64,
    pub successes: u64,
    pub connected_at: Option<Instant>,
    pub durations: VecDeque<u64>,
    pub next_reconnect_at: Option<Instant>,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_attempt(&mut self) {
        self.attempts += 1;
    }

    pub fn record_success(&mut self, now: Instant) {
        self.successes += 1;
        self.connected_at = Some(now);
    }

    /// Push `now - connected_at` into `durations`, trimmed to the latest 100
    /// entries, and clear `connected_at`.
    pub fn record_disconnect(&mut self, now: Instant) {
        if let Some(connected_at) = self.connected_at.take() {
            let duration_ms = now.saturating_duration_since(connected_at).as_millis() as u64;
            self.durations.push_back(duration_ms);
            while self.durations.len() > MAX_DURATIONS {
                self.durations.pop_front();
            }
        }
    }
}
