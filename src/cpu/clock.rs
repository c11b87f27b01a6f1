//! The simulation clock.
//!
//! A [`Clock`] throttles the CPU to a configurable cycle frequency. While
//! running, a dedicated ticker thread advances a tick counter once per
//! period and notifies a condvar; the simulation thread calls
//! [`Clock::wait_for_next_tick`] once per cycle and blocks until a fresh
//! tick lands. A zero period means full speed: the wait returns
//! immediately. Handles are clone-able, so speed changes, pause and stop
//! may come from any thread.

use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// How long a waiter sleeps before re-checking state, so stop and pause
/// requests are noticed even if a notification is missed.
const WAIT_RECHECK: Duration = Duration::from_millis(400);

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ClockStatus {
    Stopped,
    Running,
    Paused,
}

struct ClockState {
    status: ClockStatus,
    period: Duration,
    ticks: u64,
    ticker: Option<JoinHandle<()>>,
}

struct ClockInner {
    state: Mutex<ClockState>,
    tick: Condvar,
}

/// A clone-able handle on the shared clock.
#[derive(Clone)]
pub struct Clock {
    inner: Arc<ClockInner>,
}

impl Clock {
    /// A stopped clock with the given tick period.
    pub fn new(period: Duration) -> Self {
        Clock {
            inner: Arc::new(ClockInner {
                state: Mutex::new(ClockState {
                    status: ClockStatus::Stopped,
                    period,
                    ticks: 0,
                    ticker: None,
                }),
                tick: Condvar::new(),
            }),
        }
    }

    pub fn status(&self) -> ClockStatus {
        self.lock().status
    }

    /// Cycle period; zero means unthrottled.
    pub fn period(&self) -> Duration {
        self.lock().period
    }

    pub fn set_period(&self, period: Duration) {
        self.lock().period = period;
        self.inner.tick.notify_all();
    }

    /// Start ticking. A no-op if already started.
    pub fn start(&self) {
        let mut state = self.lock();
        if state.status != ClockStatus::Stopped {
            state.status = ClockStatus::Running;
            return;
        }
        state.status = ClockStatus::Running;
        let inner = Arc::clone(&self.inner);
        let handle = thread::Builder::new()
            .name("clock-ticker".to_string())
            .spawn(move || ticker_loop(&inner))
            .ok();
        state.ticker = handle;
    }

    /// Stop ticking on a paused clock without advancing.
    pub fn pause(&self) {
        let mut state = self.lock();
        if state.status == ClockStatus::Running {
            state.status = ClockStatus::Paused;
        }
        drop(state);
        self.inner.tick.notify_all();
    }

    pub fn resume(&self) {
        let mut state = self.lock();
        if state.status == ClockStatus::Paused {
            state.status = ClockStatus::Running;
        }
        drop(state);
        self.inner.tick.notify_all();
    }

    /// Stop the clock and join the ticker thread.
    pub fn stop(&self) {
        let ticker = {
            let mut state = self.lock();
            state.status = ClockStatus::Stopped;
            state.ticker.take()
        };
        self.inner.tick.notify_all();
        if let Some(handle) = ticker {
            let _ = handle.join();
        }
    }

    /// Block until a tick newer than the current one arrives.
    ///
    /// Returns immediately when the period is zero or the clock stops or
    /// pauses, so a pause request never has to wait out the period.
    pub fn wait_for_next_tick(&self) {
        let mut state = self.lock();
        let seen = state.ticks;
        loop {
            if state.status != ClockStatus::Running
                || state.period.is_zero()
                || state.ticks > seen
            {
                return;
            }
            let (next, _timeout) = self
                .inner
                .tick
                .wait_timeout(state, WAIT_RECHECK)
                .unwrap_or_else(|e| {
                    let result = e.into_inner();
                    (result.0, result.1)
                });
            state = next;
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ClockState> {
        self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn ticker_loop(inner: &ClockInner) {
    loop {
        let period = {
            let state = inner.state.lock().unwrap_or_else(|e| e.into_inner());
            match state.status {
                ClockStatus::Stopped => return,
                _ => state.period,
            }
        };
        // a zero period still needs a bounded sleep so stop is noticed
        thread::sleep(if period.is_zero() {
            Duration::from_millis(1)
        } else {
            period
        });
        let mut state = inner.state.lock().unwrap_or_else(|e| e.into_inner());
        match state.status {
            ClockStatus::Stopped => return,
            ClockStatus::Running => {
                state.ticks += 1;
                drop(state);
                inner.tick.notify_all();
            }
            ClockStatus::Paused => {}
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unthrottled_wait_returns_immediately() {
        let clock = Clock::new(Duration::ZERO);
        clock.start();
        for _ in 0..1000 {
            clock.wait_for_next_tick();
        }
        clock.stop();
    }

    #[test]
    fn test_stopped_clock_does_not_block() {
        let clock = Clock::new(Duration::from_secs(60));
        // never started
        clock.wait_for_next_tick();
    }

    #[test]
    fn test_ticks_advance_while_running() {
        let clock = Clock::new(Duration::from_millis(1));
        clock.start();
        clock.wait_for_next_tick();
        clock.wait_for_next_tick();
        let ticks = clock.lock().ticks;
        assert!(ticks >= 2);
        clock.stop();
        assert_eq!(clock.status(), ClockStatus::Stopped);
    }

    #[test]
    fn test_stop_unblocks_waiter() {
        let clock = Clock::new(Duration::from_secs(60));
        clock.start();
        let waiter = {
            let clock = clock.clone();
            std::thread::spawn(move || clock.wait_for_next_tick())
        };
        std::thread::sleep(Duration::from_millis(20));
        clock.stop();
        waiter.join().unwrap();
    }

    #[test]
    fn test_pause_unblocks_waiter() {
        let clock = Clock::new(Duration::from_secs(60));
        clock.start();
        let waiter = {
            let clock = clock.clone();
            std::thread::spawn(move || clock.wait_for_next_tick())
        };
        std::thread::sleep(Duration::from_millis(20));
        clock.pause();
        waiter.join().unwrap();
        clock.stop();
    }

    #[test]
    fn test_pause_holds_ticks() {
        let clock = Clock::new(Duration::from_millis(1));
        clock.start();
        clock.wait_for_next_tick();
        clock.pause();
        let before = clock.lock().ticks;
        std::thread::sleep(Duration::from_millis(20));
        let after = clock.lock().ticks;
        assert_eq!(before, after);
        clock.resume();
        clock.wait_for_next_tick();
        clock.stop();
    }
}
