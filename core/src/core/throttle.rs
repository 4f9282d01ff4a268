/// Lock-free adaptive throttle shared by the scan modules.
///
/// Derives a base inter-request delay from the configured rate limit and
/// applies exponential backoff on top of it when targets answer 429
/// (Too Many Requests) or 403 (Forbidden). Uses atomics exclusively to
/// avoid contention in the hot path — no Mutex, no locking.
///
/// Backoff: base → base+50 → base+100 → ... → base+2000ms cap.
/// Decay: -10ms per successful response, floors at the base delay.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering::Relaxed};
use tokio::time::{sleep, Duration};

const MAX_BACKOFF_MS: u64 = 2000;
const INITIAL_BACKOFF_MS: u64 = 50;
const DECAY_MS: u64 = 10;

pub struct ThrottleController {
    base_delay_ms: u64,
    delay_ms: AtomicU64,
    consecutive_blocks: AtomicU32,
    total_throttled: AtomicU64,
    disabled: bool,
}

impl ThrottleController {
    /// `rate_limit` is requests per second; 0 means no base pacing.
    /// `disabled` turns the controller into a no-op.
    pub fn new(rate_limit: u32, disabled: bool) -> Self {
        let base_delay_ms = if rate_limit > 0 {
            1000 / rate_limit as u64
        } else {
            0
        };
        Self {
            base_delay_ms,
            delay_ms: AtomicU64::new(base_delay_ms),
            consecutive_blocks: AtomicU32::new(0),
            total_throttled: AtomicU64::new(0),
            disabled,
        }
    }

    /// Sleeps for the current throttle delay. No-op when disabled or at 0.
    pub async fn wait(&self) {
        if self.disabled {
            return;
        }
        let ms = self.delay_ms.load(Relaxed);
        if ms > 0 {
            sleep(Duration::from_millis(ms)).await;
        }
    }

    /// Adjusts throttle based on response status.
    /// Returns true if this response triggered a backoff escalation.
    pub fn record_response(&self, status: u16) -> bool {
        if self.disabled {
            return false;
        }
        if status == 429 || status == 403 {
            let blocks = self.consecutive_blocks.fetch_add(1, Relaxed) + 1;
            self.total_throttled.fetch_add(1, Relaxed);

            // Exponential backoff: 50 * 2^(blocks-1), capped, on top of base
            let backoff =
                (INITIAL_BACKOFF_MS * (1u64 << (blocks - 1).min(6))).min(MAX_BACKOFF_MS);
            self.delay_ms.store(self.base_delay_ms + backoff, Relaxed);
            true
        } else {
            self.consecutive_blocks.store(0, Relaxed);

            // Gradual decay toward the base delay
            let current = self.delay_ms.load(Relaxed);
            if current > self.base_delay_ms {
                let new_delay = current.saturating_sub(DECAY_MS).max(self.base_delay_ms);
                self.delay_ms.store(new_delay, Relaxed);
            }
            false
        }
    }

    pub fn current_delay_ms(&self) -> u64 {
        self.delay_ms.load(Relaxed)
    }

    pub fn total_throttled(&self) -> u64 {
        self.total_throttled.load(Relaxed)
    }
}
