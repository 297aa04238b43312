//! Byte-rate token bucket (spec §4.11's bandwidth cap). `rate_bytes_s == 0`
//! means unlimited, matching the `RepairConfig::bandwidth_limit` convention
//! the cluster config already uses for the same knob.

use std::time::{Duration, Instant};

pub struct TokenBucket {
    rate_bytes_s: u64,
    capacity: u64,
    available: f64,
    last_refill: Instant,
}

impl TokenBucket {
    #[must_use]
    pub fn new(rate_bytes_s: u64) -> Self {
        Self {
            rate_bytes_s,
            capacity: rate_bytes_s.max(1),
            available: rate_bytes_s as f64,
            last_refill: Instant::now(),
        }
    }

    /// Block until `bytes` worth of bandwidth budget is available.
    pub async fn acquire(&mut self, bytes: u64) {
        if self.rate_bytes_s == 0 {
            return;
        }
        loop {
            self.refill();
            if self.available >= bytes as f64 {
                self.available -= bytes as f64;
                return;
            }
            let deficit = bytes as f64 - self.available;
            let wait = Duration::from_secs_f64(deficit / self.rate_bytes_s as f64);
            tokio::time::sleep(wait.min(Duration::from_millis(500))).await;
        }
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.available = (self.available + elapsed * self.rate_bytes_s as f64).min(self.capacity as f64);
        self.last_refill = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unlimited_rate_never_blocks() {
        let mut bucket = TokenBucket::new(0);
        bucket.acquire(u64::MAX / 2).await;
    }

    #[tokio::test]
    async fn acquiring_within_the_initial_burst_does_not_sleep() {
        let mut bucket = TokenBucket::new(1024);
        let start = Instant::now();
        bucket.acquire(512).await;
        assert!(start.elapsed() < Duration::from_millis(100));
    }
}
