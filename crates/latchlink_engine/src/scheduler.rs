//! Per-kind poll timers.
//!
//! Each periodic query kind has an interval and a next-due time. Servicing
//! a kind pushes its next-due time a full interval past the moment it was
//! serviced, whether the query succeeded or not. Short-delay re-attempts
//! after a failure go through a separate one-shot deadline so they never
//! disturb the regular cadence.

use crate::config::PollIntervals;
use latchlink_protocol::QueryKind;

#[derive(Debug, Clone, Copy, Default)]
struct PollTimer {
    interval_secs: Option<u64>,
    next_due_ms: u64,
    once_at_ms: Option<u64>,
}

/// Timers for every [`QueryKind`] plus the immediate-request mask.
#[derive(Debug, Clone)]
pub struct PollScheduler {
    timers: [PollTimer; QueryKind::COUNT],
    immediate: u16,
}

impl PollScheduler {
    /// Creates a scheduler whose periodic kinds are all due at `now`.
    pub fn new(intervals: &PollIntervals, now: u64) -> Self {
        let mut timers = [PollTimer::default(); QueryKind::COUNT];
        for kind in QueryKind::ALL {
            timers[kind.index()] = PollTimer {
                interval_secs: intervals.interval_secs(kind, false),
                next_due_ms: now,
                once_at_ms: None,
            };
        }
        Self {
            timers,
            immediate: 0,
        }
    }

    /// Whether `kind` should be serviced at `now`.
    pub fn is_due(&self, kind: QueryKind, now: u64) -> bool {
        let timer = &self.timers[kind.index()];
        self.immediate & kind.bit() != 0
            || (timer.interval_secs.is_some() && now >= timer.next_due_ms)
            || timer.once_at_ms.is_some_and(|at| now >= at)
    }

    /// Records that `kind` was serviced at `now`, successfully or not.
    pub fn mark_serviced(&mut self, kind: QueryKind, now: u64) {
        let timer = &mut self.timers[kind.index()];
        if let Some(secs) = timer.interval_secs {
            timer.next_due_ms = now.saturating_add(secs.saturating_mul(1000));
        }
        if timer.once_at_ms.is_some_and(|at| now >= at) {
            timer.once_at_ms = None;
        }
        self.immediate &= !kind.bit();
    }

    /// Requests `kind` on the next opportunity regardless of its interval.
    pub fn request_immediate(&mut self, kind: QueryKind) {
        self.immediate |= kind.bit();
    }

    /// Returns and clears the immediate-request mask.
    pub fn consume_immediate_requests(&mut self) -> u16 {
        std::mem::take(&mut self.immediate)
    }

    /// The pending immediate-request mask.
    pub fn immediate_mask(&self) -> u16 {
        self.immediate
    }

    /// Arms a one-off deadline for `kind`, keeping the earlier of two.
    pub fn schedule_once(&mut self, kind: QueryKind, at: u64) {
        let timer = &mut self.timers[kind.index()];
        timer.once_at_ms = Some(timer.once_at_ms.map_or(at, |existing| existing.min(at)));
    }

    /// Changes the interval of a kind. The next-due time is kept.
    pub fn set_interval(&mut self, kind: QueryKind, interval_secs: Option<u64>) {
        self.timers[kind.index()].interval_secs = interval_secs;
    }

    /// Next regular due time of a periodic kind.
    pub fn next_due_ms(&self, kind: QueryKind) -> Option<u64> {
        let timer = &self.timers[kind.index()];
        timer.interval_secs.map(|_| timer.next_due_ms)
    }

    /// Pending one-off deadline of a kind.
    pub fn once_at_ms(&self, kind: QueryKind) -> Option<u64> {
        self.timers[kind.index()].once_at_ms
    }

    /// Highest-priority due kind accepted by `eligible`.
    pub fn next_due(&self, now: u64, mut eligible: impl FnMut(QueryKind) -> bool) -> Option<QueryKind> {
        QueryKind::ALL
            .into_iter()
            .find(|kind| self.is_due(*kind, now) && eligible(*kind))
    }

    /// Drops all one-off deadlines and immediate requests.
    pub fn reset_requests(&mut self) -> u16 {
        for timer in &mut self.timers {
            timer.once_at_ms = None;
        }
        self.consume_immediate_requests()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn scheduler() -> PollScheduler {
        PollScheduler::new(&PollIntervals::default(), 0)
    }

    #[test]
    fn periodic_kinds_start_due() {
        let s = scheduler();
        assert!(s.is_due(QueryKind::Status, 0));
        assert!(s.is_due(QueryKind::Battery, 0));
        assert!(!s.is_due(QueryKind::PinCheck, 0));
        assert!(!s.is_due(QueryKind::AuthLog, 1_000_000));
    }

    #[test]
    fn immediate_request_overrides_interval() {
        let mut s = scheduler();
        s.mark_serviced(QueryKind::Battery, 0);
        assert!(!s.is_due(QueryKind::Battery, 1_000));

        s.request_immediate(QueryKind::Battery);
        assert!(s.is_due(QueryKind::Battery, 1_000));

        s.mark_serviced(QueryKind::Battery, 1_000);
        assert!(!s.is_due(QueryKind::Battery, 2_000));
        assert_eq!(s.immediate_mask(), 0);
    }

    #[test]
    fn one_shot_fires_once() {
        let mut s = scheduler();
        s.mark_serviced(QueryKind::Status, 0);
        s.schedule_once(QueryKind::Status, 10_000);
        s.schedule_once(QueryKind::Status, 20_000);
        assert_eq!(s.once_at_ms(QueryKind::Status), Some(10_000));

        assert!(!s.is_due(QueryKind::Status, 9_999));
        assert!(s.is_due(QueryKind::Status, 10_000));
        s.mark_serviced(QueryKind::Status, 10_000);
        assert!(!s.is_due(QueryKind::Status, 11_000));
        assert_eq!(s.next_due_ms(QueryKind::Status), Some(10_000 + 1_800_000));
    }

    #[test]
    fn early_service_keeps_future_one_shot() {
        let mut s = scheduler();
        s.schedule_once(QueryKind::Status, 10_000);
        s.mark_serviced(QueryKind::Status, 500);
        assert_eq!(s.once_at_ms(QueryKind::Status), Some(10_000));
    }

    #[test]
    fn next_due_follows_priority() {
        let mut s = scheduler();
        assert_eq!(s.next_due(0, |_| true), Some(QueryKind::Status));
        assert_eq!(
            s.next_due(0, |k| k != QueryKind::Status),
            Some(QueryKind::Battery)
        );
        for kind in QueryKind::ALL {
            s.mark_serviced(kind, 0);
        }
        assert_eq!(s.next_due(1, |_| true), None);
        s.request_immediate(QueryKind::Rssi);
        s.request_immediate(QueryKind::Config);
        assert_eq!(s.next_due(1, |_| true), Some(QueryKind::Config));
    }

    #[test]
    fn consume_clears_mask() {
        let mut s = scheduler();
        s.request_immediate(QueryKind::Keypad);
        s.request_immediate(QueryKind::Status);
        let mask = s.consume_immediate_requests();
        assert_eq!(mask, QueryKind::Keypad.bit() | QueryKind::Status.bit());
        assert_eq!(s.immediate_mask(), 0);
    }

    proptest! {
        #[test]
        fn next_due_is_now_plus_interval(
            kind_index in 0usize..QueryKind::COUNT,
            now in 0u64..(u64::MAX / 4),
            immediate in any::<bool>(),
        ) {
            let kind = QueryKind::ALL[kind_index];
            let intervals = PollIntervals::default();
            let mut s = PollScheduler::new(&intervals, 0);
            if immediate {
                s.request_immediate(kind);
            }
            s.mark_serviced(kind, now);

            match intervals.interval_secs(kind, false) {
                Some(secs) => prop_assert_eq!(s.next_due_ms(kind), Some(now + secs * 1000)),
                None => prop_assert_eq!(s.next_due_ms(kind), None),
            }
            prop_assert_eq!(s.immediate_mask() & kind.bit(), 0);
        }
    }
}
