use std::{
    sync::{Condvar, Mutex, MutexGuard},
    time::{Duration, Instant},
};

#[derive(Debug, Default)]
struct GateState {
    connected: bool,
    // Bumped on every false -> true transition.
    transitions: u64,
}

/// A wait is satisfied by the flag being set, or by a set transition that
/// happened after the wait began. Clearing the flag never wakes a waiter.
#[derive(Debug, Default)]
pub struct ConnectivityGate {
    state: Mutex<GateState>,
    changed: Condvar,
}

impl ConnectivityGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_connected(&self) {
        let mut state = self.lock();
        if !state.connected {
            state.connected = true;
            state.transitions = state.transitions.wrapping_add(1);
            self.changed.notify_all();
        }
    }

    pub fn clear_connected(&self) {
        self.lock().connected = false;
    }

    pub fn is_connected(&self) -> bool {
        self.lock().connected
    }

    pub fn wait_connected(&self) {
        let mut state = self.lock();
        let start = state.transitions;
        while !state.connected && state.transitions == start {
            state = self
                .changed
                .wait(state)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }

    /// Returns `false` when `timeout` elapsed without the gate opening.
    pub fn wait_connected_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        let start = state.transitions;

        while !state.connected && state.transitions == start {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (next, _) = self
                .changed
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            state = next;
        }
        true
    }

    fn lock(&self) -> MutexGuard<'_, GateState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, thread};

    use super::*;

    #[test]
    fn blocks_until_first_connect() {
        let gate = ConnectivityGate::new();
        assert!(!gate.wait_connected_timeout(Duration::from_millis(50)));
    }

    #[test]
    fn late_callers_return_immediately_once_connected() {
        let gate = ConnectivityGate::new();
        gate.set_connected();

        let started = Instant::now();
        gate.wait_connected();
        assert!(gate.wait_connected_timeout(Duration::from_millis(1)));
        assert!(started.elapsed() < Duration::from_millis(500));
    }

    #[test]
    fn set_from_another_thread_wakes_waiter() {
        let gate = Arc::new(ConnectivityGate::new());
        let waiter = {
            let gate = gate.clone();
            thread::spawn(move || gate.wait_connected_timeout(Duration::from_secs(5)))
        };

        thread::sleep(Duration::from_millis(20));
        gate.set_connected();

        assert!(waiter.join().unwrap());
    }

    #[test]
    fn clearing_does_not_wake_waiters() {
        let gate = Arc::new(ConnectivityGate::new());
        let waiter = {
            let gate = gate.clone();
            thread::spawn(move || gate.wait_connected_timeout(Duration::from_millis(150)))
        };

        thread::sleep(Duration::from_millis(20));
        gate.clear_connected();
        gate.clear_connected();

        assert!(!waiter.join().unwrap());
    }

    #[test]
    fn set_then_clear_still_releases_blocked_waiter() {
        for _ in 0..50 {
            let gate = Arc::new(ConnectivityGate::new());
            let waiter = {
                let gate = gate.clone();
                thread::spawn(move || gate.wait_connected_timeout(Duration::from_secs(2)))
            };

            thread::sleep(Duration::from_millis(10));
            gate.set_connected();
            gate.clear_connected();

            assert!(waiter.join().unwrap());
            assert!(!gate.is_connected());
        }
    }

    #[test]
    fn set_and_clear_are_idempotent() {
        let gate = ConnectivityGate::new();
        gate.set_connected();
        gate.set_connected();
        assert!(gate.is_connected());

        gate.clear_connected();
        gate.clear_connected();
        assert!(!gate.is_connected());
        assert!(!gate.wait_connected_timeout(Duration::from_millis(20)));
    }
}
