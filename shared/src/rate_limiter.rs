//! Token-bucket admission control for inbound frames.
//!
//! Two buckets are kept side by side, one counting messages and one counting
//! bytes. Both refill continuously at their per-second rate and are capped at
//! one second's worth of capacity. An admission debits both buckets or
//! neither.

use std::time::Instant;

/// Lower bound applied to the message rate.
pub const MIN_MSGS_PER_SEC: u32 = 1;
/// Lower bound applied to the byte rate.
pub const MIN_BYTES_PER_SEC: u32 = 256;

/// Per-connection token bucket. Owned by a single reader, so it is not synchronized.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    max_msgs_per_sec: f64,
    max_bytes_per_sec: f64,
    msg_tokens: f64,
    byte_tokens: f64,
    last_refill: Instant,
}

impl RateLimiter {
    /// Creates a limiter with both buckets full.
    ///
    /// Rates below one message or 256 bytes per second are raised to those minimums.
    pub fn new(max_msgs_per_sec: u32, max_bytes_per_sec: u32) -> Self {
        Self::new_at(max_msgs_per_sec, max_bytes_per_sec, Instant::now())
    }

    /// Like [`RateLimiter::new`], with an explicit starting instant.
    pub fn new_at(max_msgs_per_sec: u32, max_bytes_per_sec: u32, now: Instant) -> Self {
        let max_msgs = f64::from(max_msgs_per_sec.max(MIN_MSGS_PER_SEC));
        let max_bytes = f64::from(max_bytes_per_sec.max(MIN_BYTES_PER_SEC));

        Self {
            max_msgs_per_sec: max_msgs,
            max_bytes_per_sec: max_bytes,
            msg_tokens: max_msgs,
            byte_tokens: max_bytes,
            last_refill: now,
        }
    }

    /// Tries to admit `messages` messages totalling `bytes` bytes right now.
    pub fn try_consume(&mut self, messages: u32, bytes: usize) -> bool {
        self.try_consume_at(Instant::now(), messages, bytes)
    }

    /// Tries to admit work at the given instant. Refills first, then debits
    /// both buckets only if both can cover the request.
    pub fn try_consume_at(&mut self, now: Instant, messages: u32, bytes: usize) -> bool {
        self.refill(now);

        let messages = f64::from(messages);
        let bytes = bytes as f64;
        if self.msg_tokens < messages || self.byte_tokens < bytes {
            return false;
        }

        self.msg_tokens -= messages;
        self.byte_tokens -= bytes;
        true
    }

    pub fn max_msgs_per_sec(&self) -> u32 {
        self.max_msgs_per_sec as u32
    }

    pub fn max_bytes_per_sec(&self) -> u32 {
        self.max_bytes_per_sec as u32
    }

    /// Current message bucket level, without refilling.
    pub fn available_messages(&self) -> f64 {
        self.msg_tokens
    }

    /// Current byte bucket level, without refilling.
    pub fn available_bytes(&self) -> f64 {
        self.byte_tokens
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        if elapsed <= 0.0 {
            return;
        }

        self.msg_tokens =
            (self.msg_tokens + elapsed * self.max_msgs_per_sec).min(self.max_msgs_per_sec);
        self.byte_tokens =
            (self.byte_tokens + elapsed * self.max_bytes_per_sec).min(self.max_bytes_per_sec);
        self.last_refill = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use std::time::Duration;

    #[test]
    fn test_limiter_starts_full_and_clamps_rates() {
        let limiter = RateLimiter::new(0, 10);
        assert_eq!(limiter.max_msgs_per_sec(), 1);
        assert_eq!(limiter.max_bytes_per_sec(), 256);
        assert_approx_eq!(limiter.available_messages(), 1.0);
        assert_approx_eq!(limiter.available_bytes(), 256.0);
    }

    #[test]
    fn test_exactly_n_messages_admitted_per_window() {
        let start = Instant::now();
        let mut limiter = RateLimiter::new_at(10, 64 * 1024, start);

        for i in 0..10 {
            assert!(limiter.try_consume_at(start, 1, 16), "message {} refused", i);
        }
        assert!(!limiter.try_consume_at(start, 1, 16));

        let later = start + Duration::from_secs(1);
        for i in 0..10 {
            assert!(limiter.try_consume_at(later, 1, 16), "refilled message {} refused", i);
        }
        assert!(!limiter.try_consume_at(later, 1, 16));
    }

    #[test]
    fn test_refill_never_exceeds_capacity() {
        let start = Instant::now();
        let mut limiter = RateLimiter::new_at(5, 1000, start);
        assert!(limiter.try_consume_at(start, 5, 0));

        let much_later = start + Duration::from_secs(60);
        for _ in 0..5 {
            assert!(limiter.try_consume_at(much_later, 1, 0));
        }
        assert!(!limiter.try_consume_at(much_later, 1, 0));
    }

    #[test]
    fn test_partial_refill_is_proportional() {
        let start = Instant::now();
        let mut limiter = RateLimiter::new_at(10, 1000, start);
        assert!(limiter.try_consume_at(start, 10, 1000));

        let half = start + Duration::from_millis(500);
        assert!(limiter.try_consume_at(half, 0, 0));
        assert_approx_eq!(limiter.available_messages(), 5.0, 1e-6);
        assert_approx_eq!(limiter.available_bytes(), 500.0, 1e-6);
    }

    #[test]
    fn test_refused_admission_debits_nothing() {
        let start = Instant::now();
        let mut limiter = RateLimiter::new_at(10, 300, start);

        // Message bucket could cover it, byte bucket cannot.
        assert!(!limiter.try_consume_at(start, 1, 301));
        assert_approx_eq!(limiter.available_messages(), 10.0);
        assert_approx_eq!(limiter.available_bytes(), 300.0);

        // Byte bucket could cover it, message bucket cannot.
        assert!(!limiter.try_consume_at(start, 11, 1));
        assert_approx_eq!(limiter.available_messages(), 10.0);
        assert_approx_eq!(limiter.available_bytes(), 300.0);
    }

    #[test]
    fn test_clock_going_backwards_is_ignored() {
        let start = Instant::now() + Duration::from_secs(5);
        let mut limiter = RateLimiter::new_at(2, 1000, start);
        assert!(limiter.try_consume_at(start, 2, 0));

        let earlier = start - Duration::from_secs(1);
        assert!(!limiter.try_consume_at(earlier, 1, 0));
        assert_approx_eq!(limiter.available_messages(), 0.0);
    }
}
