use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

/// One of the two independently scheduled sync flows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Versioned headline table, gated by the cursor check
    Headlines,
    /// Unversioned live-feed snapshot, always force-fetched
    LiveFeed,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Headlines => f.write_str("headlines"),
            Channel::LiveFeed => f.write_str("live_feed"),
        }
    }
}

/// Deadline used when `last attempt + interval` does not fit in an `Instant`
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Cadence gate. `at` drives throttling and is cleared by a reset; `wall`
/// is kept for diagnostics.
#[derive(Debug, Default, Clone, Copy)]
struct Gate {
    at: Option<Instant>,
    wall: Option<DateTime<Utc>>,
}

impl Gate {
    fn record(&mut self, now: Instant) {
        self.at = Some(now);
        self.wall = Some(Utc::now());
    }
}

/// Per-channel state: single-flight flag plus the cadence gate.
#[derive(Debug, Default)]
pub(crate) struct ChannelState {
    in_flight: AtomicBool,
    gate: Mutex<Gate>,
}

impl ChannelState {
    /// Claim the channel. `None` if a sync is already running on it.
    ///
    /// The returned guard releases the claim when dropped, on every exit
    /// path of the sync.
    pub(crate) fn try_begin(&self) -> Option<InFlightGuard<'_>> {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| InFlightGuard {
                flag: &self.in_flight,
            })
    }

    pub(crate) fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Record an attempt now if at least `interval` has passed since the
    /// previous one. Check and record happen under one lock, so rapid
    /// triggers cannot both pass.
    pub(crate) fn try_claim_slot(&self, interval: Duration) -> bool {
        let mut gate = self.lock_gate();
        let now = Instant::now();

        if let Some(prev) = gate.at {
            if now.saturating_duration_since(prev) < interval {
                return false;
            }
        }

        gate.record(now);
        true
    }

    /// Record an attempt unconditionally.
    pub(crate) fn mark_attempt(&self) {
        self.lock_gate().record(Instant::now());
    }

    /// Open the gate: the next gated call runs whatever the interval.
    /// The last attempt time stays visible in diagnostics.
    pub(crate) fn reset(&self) {
        self.lock_gate().at = None;
    }

    /// When the gate reopens for `interval`. Now if the gate is open.
    pub(crate) fn next_due(&self, interval: Duration) -> Instant {
        let at = self.lock_gate().at;
        let now = Instant::now();
        match at {
            Some(at) => at
                .checked_add(interval)
                .unwrap_or_else(|| now + FAR_FUTURE),
            None => now,
        }
    }

    pub(crate) fn last_attempt(&self) -> Option<DateTime<Utc>> {
        self.lock_gate().wall
    }

    fn lock_gate(&self) -> MutexGuard<'_, Gate> {
        self.gate.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Held for the duration of one sync; clears the in-flight flag on drop.
pub(crate) struct InFlightGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_flight() {
        let state = ChannelState::default();
        let guard = state.try_begin();
        assert!(guard.is_some());
        assert!(state.is_in_flight());
        assert!(state.try_begin().is_none());

        drop(guard);
        assert!(!state.is_in_flight());
        assert!(state.try_begin().is_some());
    }

    #[test]
    fn test_guard_released_on_panic_unwind() {
        let state = ChannelState::default();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = state.try_begin().unwrap();
            panic!("sync blew up");
        }));
        assert!(result.is_err());
        assert!(!state.is_in_flight());
    }

    #[tokio::test]
    async fn test_gate_throttles_within_interval() {
        let state = ChannelState::default();
        let interval = Duration::from_secs(300);

        assert!(state.last_attempt().is_none());
        assert!(state.try_claim_slot(interval));
        assert!(state.last_attempt().is_some());
        assert!(!state.try_claim_slot(interval));
        assert!(!state.try_claim_slot(interval));
    }

    #[tokio::test(start_paused = true)]
    async fn test_gate_opens_after_interval() {
        let state = ChannelState::default();
        let interval = Duration::from_secs(300);

        assert!(state.try_claim_slot(interval));
        tokio::time::advance(Duration::from_secs(299)).await;
        assert!(!state.try_claim_slot(interval));
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(state.try_claim_slot(interval));
    }

    #[tokio::test]
    async fn test_mark_attempt_closes_gate() {
        let state = ChannelState::default();
        state.mark_attempt();
        assert!(!state.try_claim_slot(Duration::from_secs(60)));
        assert!(state.try_claim_slot(Duration::ZERO));
    }

    #[tokio::test(start_paused = true)]
    async fn test_gate_open_at_next_due() {
        let state = ChannelState::default();
        let interval = Duration::from_secs(60);

        let start = Instant::now();
        assert_eq!(state.next_due(interval), start);

        state.mark_attempt();
        let due = state.next_due(interval);
        assert_eq!(due, start + interval);

        tokio::time::sleep_until(due).await;
        assert!(state.try_claim_slot(interval));
        assert_eq!(state.next_due(interval), due + interval);
    }

    #[tokio::test]
    async fn test_reset_opens_gate_and_keeps_diagnostics() {
        let state = ChannelState::default();
        let interval = Duration::from_secs(300);

        assert!(state.try_claim_slot(interval));
        let seen = state.last_attempt();
        assert!(!state.try_claim_slot(interval));

        state.reset();
        assert_eq!(state.last_attempt(), seen);
        assert!(state.next_due(interval) <= Instant::now());
        assert!(state.try_claim_slot(interval));
        assert!(!state.try_claim_slot(interval));
    }

    #[tokio::test]
    async fn test_next_due_with_huge_interval_does_not_overflow() {
        let state = ChannelState::default();
        state.mark_attempt();

        let due = state.next_due(Duration::from_secs(u64::MAX));
        assert!(due > Instant::now() + Duration::from_secs(86_400 * 365));
        assert!(!state.try_claim_slot(Duration::from_secs(u64::MAX)));
    }

    #[test]
    fn test_channel_display() {
        assert_eq!(Channel::Headlines.to_string(), "headlines");
        assert_eq!(Channel::LiveFeed.to_string(), "live_feed");
    }
}
