// Throttle state for the request executor: a sliding 60s window over
// successful request times, plus the consecutive-429 counter that drives
// the escalating cooldown. All methods take `now` explicitly so the state
// machine can be exercised without a clock.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Length of the sliding admission window.
pub(crate) const RATE_WINDOW: Duration = Duration::from_secs(60);

/// Proactive admission threshold: 90% of the API's 100-per-60s limit.
pub(crate) const RATE_THRESHOLD: usize = 90;

/// Extra wait past the window boundary so the oldest entry has aged out
/// from the server's point of view too.
const WINDOW_MARGIN: Duration = Duration::from_millis(100);

/// Cooldown for the third consecutive 429; doubles per further 429.
pub(crate) const DEFAULT_COOLDOWN_BASE: Duration = Duration::from_secs(30);

/// Longest cooldown the escalation will reach.
const COOLDOWN_CAP: Duration = Duration::from_secs(300);

/// Consecutive 429s after which the session is considered unrecoverable.
pub(crate) const MAX_CONSECUTIVE_429S: u32 = 10;

/// Outcome of recording one 429 response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RateLimitStep {
    /// Below the cooldown threshold; normal backoff applies.
    Backoff { consecutive: u32 },
    /// Cooldown (re)armed; no request may be admitted until it elapses.
    Cooldown { consecutive: u32, duration: Duration },
    /// Past the hard threshold; the session must stop.
    Fatal { consecutive: u32, request_count: u64 },
}

#[derive(Debug)]
pub(crate) struct ThrottleState {
    /// Completion times of recent successful requests, ascending.
    request_times: VecDeque<Instant>,
    consecutive_429s: u32,
    cooldown_until: Option<Instant>,
    cooldown_base: Duration,
    pub(crate) request_count: u64,
}

impl ThrottleState {
    pub(crate) fn new(cooldown_base: Duration) -> Self {
        Self {
            request_times: VecDeque::new(),
            consecutive_429s: 0,
            cooldown_until: None,
            cooldown_base,
            request_count: 0,
        }
    }

    /// Remaining cooldown, with the 429 count that armed it.
    pub(crate) fn cooldown_wait(&self, now: Instant) -> Option<(Duration, u32)> {
        let until = self.cooldown_until?;
        if now < until {
            Some((until - now, self.consecutive_429s))
        } else {
            None
        }
    }

    /// Prune entries that have left the window, then return how long
    /// admission must wait to stay under the proactive threshold, along
    /// with the current in-window count.
    pub(crate) fn window_wait(&mut self, now: Instant) -> Option<(usize, Duration)> {
        while let Some(&oldest) = self.request_times.front() {
            if now.duration_since(oldest) >= RATE_WINDOW {
                self.request_times.pop_front();
            } else {
                break;
            }
        }

        if self.request_times.len() < RATE_THRESHOLD {
            return None;
        }
        let oldest = *self.request_times.front()?;
        let ready_at = oldest + RATE_WINDOW + WINDOW_MARGIN;
        if ready_at <= now {
            return None;
        }
        Some((self.request_times.len(), ready_at - now))
    }

    /// Record a 429. Escalation: counts 1-2 just back off, 3 and up arm a
    /// cooldown of min(30 * 2^(n-3), 300) seconds, 10 is fatal.
    pub(crate) fn record_429(&mut self, now: Instant) -> RateLimitStep {
        self.consecutive_429s += 1;
        let consecutive = self.consecutive_429s;

        if consecutive >= MAX_CONSECUTIVE_429S {
            return RateLimitStep::Fatal {
                consecutive,
                request_count: self.request_count,
            };
        }

        if consecutive >= 3 {
            let duration = (self.cooldown_base * 2u32.pow(consecutive - 3)).min(COOLDOWN_CAP);
            self.cooldown_until = Some(now + duration);
            return RateLimitStep::Cooldown {
                consecutive,
                duration,
            };
        }

        RateLimitStep::Backoff { consecutive }
    }

    /// Record a successful request: the 429 streak ends and the completion
    /// time enters the sliding window.
    pub(crate) fn record_success(&mut self, now: Instant) {
        self.consecutive_429s = 0;
        self.request_times.push_back(now);
    }

    #[cfg(test)]
    fn in_window(&self) -> usize {
        self.request_times.len()
    }
}
