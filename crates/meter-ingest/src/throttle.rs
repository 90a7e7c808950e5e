//! Display update throttling

use std::time::{Duration, Instant};
use tracing::trace;

/// How to space out display refreshes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrottlePolicy {
    /// At least this much wall-clock time between accepted updates
    Elapsed(Duration),
    /// Accept frames whose sequence number is a multiple of N
    EveryNthFrame(u64),
}

impl Default for ThrottlePolicy {
    fn default() -> Self {
        ThrottlePolicy::Elapsed(Duration::from_secs(1))
    }
}

/// Decides whether a decoded frame should reach the presentation layer
#[derive(Debug, Clone)]
pub struct DisplayThrottle {
    policy: ThrottlePolicy,
    last_accepted: Option<Instant>,
    last_sequence: Option<u64>,
}

impl DisplayThrottle {
    /// Create a throttle with the given policy
    pub fn new(policy: ThrottlePolicy) -> Self {
        Self {
            policy,
            last_accepted: None,
            last_sequence: None,
        }
    }

    /// Returns `true` if the frame captured at `now` with `sequence` should
    /// be displayed. Only accepted frames move the marker.
    pub fn should_display(&mut self, now: Instant, sequence: u64) -> bool {
        let accept = match self.policy {
            ThrottlePolicy::Elapsed(interval) => match self.last_accepted {
                None => true,
                Some(last) => now.saturating_duration_since(last) >= interval,
            },
            ThrottlePolicy::EveryNthFrame(n) => sequence % n.max(1) == 0,
        };

        if accept {
            self.last_accepted = Some(now);
            self.last_sequence = Some(sequence);
        } else {
            trace!(sequence, "Display update throttled");
        }
        accept
    }

    /// Change the policy, keeping the last accepted marker
    pub fn set_policy(&mut self, policy: ThrottlePolicy) {
        self.policy = policy;
    }

    /// Sequence number of the last accepted frame
    pub fn last_sequence(&self) -> Option<u64> {
        self.last_sequence
    }

    /// Forget the last accepted update so the next frame is shown
    pub fn reset(&mut self) {
        self.last_accepted = None;
        self.last_sequence = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_five_second_interval() {
        let mut throttle = DisplayThrottle::new(ThrottlePolicy::Elapsed(Duration::from_secs(5)));
        let base = Instant::now();

        let accepted: Vec<u64> = [0u64, 1, 2, 4, 5, 6]
            .into_iter()
            .enumerate()
            .filter(|&(i, t)| {
                throttle.should_display(base + Duration::from_secs(t), i as u64 + 1)
            })
            .map(|(_, t)| t)
            .collect();

        assert_eq!(accepted, vec![0, 5]);
    }

    #[test]
    fn test_frame_count_policy() {
        let mut throttle = DisplayThrottle::new(ThrottlePolicy::EveryNthFrame(3));
        let now = Instant::now();
        let accepted: Vec<u64> = (1..=9).filter(|&s| throttle.should_display(now, s)).collect();
        assert_eq!(accepted, vec![3, 6, 9]);
        assert_eq!(throttle.last_sequence(), Some(9));
    }

    #[test]
    fn test_rejection_does_not_move_marker() {
        let mut throttle = DisplayThrottle::new(ThrottlePolicy::Elapsed(Duration::from_secs(2)));
        let base = Instant::now();
        assert!(throttle.should_display(base, 1));
        assert!(!throttle.should_display(base + Duration::from_millis(1500), 2));
        assert!(throttle.should_display(base + Duration::from_secs(2), 3));
    }

    #[test]
    fn test_reset_accepts_next() {
        let mut throttle = DisplayThrottle::new(ThrottlePolicy::Elapsed(Duration::from_secs(60)));
        let now = Instant::now();
        assert!(throttle.should_display(now, 1));
        assert!(!throttle.should_display(now, 2));
        throttle.reset();
        assert!(throttle.should_display(now, 3));
    }
}
