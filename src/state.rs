use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

/// State shared between the iteration controller and the worker sessions:
/// the self-play record queue, the current model iteration and the
/// optimization-phase latch.
///
/// All three live under one mutex. The latch is paired with a condvar so the
/// controller can wait for `Optimization_Done` instead of spinning.
pub struct SharedState {
    inner: Mutex<Inner>,
    optimization_done: Condvar,
}

struct Inner {
    queue: VecDeque<String>,
    model_iteration: i64,
    optimizing: bool,
}

impl SharedState {
    /// Creates the state with the initial model iteration
    pub fn new(model_iteration: i64) -> Self {
        Self {
            inner: Mutex::new(Inner {
                queue: <_>::default(),
                model_iteration,
                optimizing: false,
            }),
            optimization_done: Condvar::new(),
        }
    }
    /// Enqueues one self-play record, returns the queue length after the push
    pub fn push_record(&self, record: String) -> usize {
        let mut inner = self.inner.lock();
        inner.queue.push_back(record);
        inner.queue.len()
    }
    /// Pops the oldest queued self-play record, if any
    pub fn pop_record(&self) -> Option<String> {
        self.inner.lock().queue.pop_front()
    }
    /// The current model iteration
    pub fn model_iteration(&self) -> i64 {
        self.inner.lock().model_iteration
    }
    /// Sets the optimization-phase latch
    pub fn begin_optimization(&self) {
        self.inner.lock().optimizing = true;
    }
    /// Adopts the model iteration announced by an optimization worker and
    /// clears the latch. If several workers reply within one iteration, the
    /// last value wins.
    pub fn finish_optimization(&self, new_model_iteration: i64) {
        let mut inner = self.inner.lock();
        inner.model_iteration = new_model_iteration;
        inner.optimizing = false;
        self.optimization_done.notify_all();
    }
    /// Whether the optimization-phase latch is set
    pub fn is_optimizing(&self) -> bool {
        self.inner.lock().optimizing
    }
    /// Waits until the latch clears or the timeout elapses; returns true
    /// once the latch is clear
    pub fn wait_optimization_done(&self, timeout: Duration) -> bool {
        let mut inner = self.inner.lock();
        if inner.optimizing {
            self.optimization_done.wait_for(&mut inner, timeout);
        }
        !inner.optimizing
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_queue_order() {
        let state = SharedState::new(0);
        assert_eq!(state.push_record("10 (a)".to_owned()), 1);
        assert_eq!(state.push_record("11 (b)".to_owned()), 2);
        assert_eq!(state.pop_record().unwrap(), "10 (a)");
        assert_eq!(state.pop_record().unwrap(), "11 (b)");
        assert!(state.pop_record().is_none());
    }

    #[test]
    fn test_latch() {
        let state = Arc::new(SharedState::new(7));
        state.begin_optimization();
        assert!(state.is_optimizing());
        assert!(!state.wait_optimization_done(Duration::from_millis(10)));

        let signaller = state.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            signaller.finish_optimization(8);
        });
        while !state.wait_optimization_done(Duration::from_millis(20)) {}
        handle.join().unwrap();
        assert_eq!(state.model_iteration(), 8);
        assert!(!state.is_optimizing());
    }
}
