//! Process-wide shutdown broadcast.
//!
//! Every long-running loop (flush timer, compactor, HTTP accept loop,
//! workspace watchers) sleeps through [`Shutdown::wait_timeout`], so raising
//! the signal wakes all of them at once.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct State {
    down: bool,
    restarting: bool,
}

#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    inner: Arc<(Mutex<State>, Condvar)>,
    flag: Arc<AtomicBool>,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the signal. Idempotent.
    pub fn trigger(&self) {
        let (lock, cvar) = &*self.inner;
        let mut state = lock.lock().unwrap_or_else(|e| e.into_inner());
        state.down = true;
        self.flag.store(true, Ordering::Release);
        cvar.notify_all();
    }

    /// Raise the signal and ask the entry point to start a fresh process
    /// once cleanup is done.
    pub fn trigger_restart(&self) {
        {
            let (lock, _) = &*self.inner;
            let mut state = lock.lock().unwrap_or_else(|e| e.into_inner());
            state.restarting = true;
        }
        self.trigger();
    }

    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    pub fn is_restarting(&self) -> bool {
        let (lock, _) = &*self.inner;
        lock.lock().unwrap_or_else(|e| e.into_inner()).restarting
    }

    /// Sleep for up to `timeout`. Returns true if the signal was raised
    /// (before or during the wait).
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let (lock, cvar) = &*self.inner;
        let mut state = lock.lock().unwrap_or_else(|e| e.into_inner());
        while !state.down {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            state = match cvar.wait_timeout(state, deadline - now) {
                Ok((guard, _)) => guard,
                Err(e) => e.into_inner().0,
            };
        }
        true
    }

    /// Block until the signal is raised.
    pub fn wait(&self) {
        let (lock, cvar) = &*self.inner;
        let mut state = lock.lock().unwrap_or_else(|e| e.into_inner());
        while !state.down {
            state = cvar.wait(state).unwrap_or_else(|e| e.into_inner());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wait_timeout_expires_without_signal() {
        let s = Shutdown::new();
        let start = Instant::now();
        assert!(!s.wait_timeout(Duration::from_millis(30)));
        assert!(start.elapsed() >= Duration::from_millis(30));
        assert!(!s.is_triggered());
    }

    #[test]
    fn test_trigger_wakes_waiters() {
        let s = Shutdown::new();
        let waiter = s.clone();
        let handle = std::thread::spawn(move || waiter.wait_timeout(Duration::from_secs(30)));
        std::thread::sleep(Duration::from_millis(20));
        s.trigger();
        assert!(handle.join().unwrap());
        assert!(s.is_triggered());
        assert!(!s.is_restarting());
    }

    #[test]
    fn test_restart_implies_shutdown() {
        let s = Shutdown::new();
        s.trigger_restart();
        assert!(s.is_triggered());
        assert!(s.is_restarting());
        s.wait();
        assert!(s.wait_timeout(Duration::from_secs(1)));
    }
}
