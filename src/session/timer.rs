//! One-shot re-armable protocol timers.
//!
//! T0 bounds the connect+handshake, T1 the wait for a confirmation, T2 the
//! ack we owe the peer, T3 idle detection. One optional deadline per timer;
//! re-arming replaces the previous deadline. The session loop sleeps until
//! [`TimerBank::next_deadline`] and then collects expiries with
//! [`TimerBank::pop_expired`].

use std::time::Duration;

use tokio::time::Instant;

/// IEC-104 protocol timers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timer {
    /// Connect / handshake deadline
    T0,
    /// Confirmation wait after sending an act frame
    T1,
    /// Acknowledge-send deadline after receiving an I-frame
    T2,
    /// Idle line test
    T3,
}

const TIMER_COUNT: usize = 4;

impl Timer {
    const fn index(self) -> usize {
        match self {
            Self::T0 => 0,
            Self::T1 => 1,
            Self::T2 => 2,
            Self::T3 => 3,
        }
    }

    const fn from_index(index: usize) -> Self {
        match index {
            0 => Self::T0,
            1 => Self::T1,
            2 => Self::T2,
            _ => Self::T3,
        }
    }
}

/// Fixed-shape bank of the four protocol timers.
#[derive(Debug)]
pub struct TimerBank {
    durations: [Duration; TIMER_COUNT],
    deadlines: [Option<Instant>; TIMER_COUNT],
}

impl TimerBank {
    pub fn new(t0: Duration, t1: Duration, t2: Duration, t3: Duration) -> Self {
        Self {
            durations: [t0, t1, t2, t3],
            deadlines: [None; TIMER_COUNT],
        }
    }

    /// Arm (or re-arm) a timer at now + its configured duration.
    pub fn start(&mut self, timer: Timer) {
        self.deadlines[timer.index()] = Some(Instant::now() + self.durations[timer.index()]);
    }

    /// Disarm a timer.
    pub fn stop(&mut self, timer: Timer) {
        self.deadlines[timer.index()] = None;
    }

    /// Disarm everything (disconnect).
    pub fn stop_all(&mut self) {
        self.deadlines = [None; TIMER_COUNT];
    }

    pub fn is_armed(&self, timer: Timer) -> bool {
        self.deadlines[timer.index()].is_some()
    }

    pub fn duration(&self, timer: Timer) -> Duration {
        self.durations[timer.index()]
    }

    /// Earliest armed deadline.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.deadlines.iter().flatten().min().copied()
    }

    /// Take the earliest timer whose deadline has passed, disarming it.
    pub fn pop_expired(&mut self, now: Instant) -> Option<Timer> {
        let index = self
            .deadlines
            .iter()
            .enumerate()
            .filter_map(|(i, d)| d.filter(|d| *d <= now).map(|d| (i, d)))
            .min_by_key(|(_, d)| *d)
            .map(|(i, _)| i)?;
        self.deadlines[index] = None;
        Some(Timer::from_index(index))
    }
}
