use std::sync::Arc;

use parking_lot::Mutex;

use crate::worker::{Role, WorkerSession};

/// The set of connected worker sessions and the job dispatch over it.
///
/// Broadcast sweeps snapshot the matching workers under the set lock
/// (claiming them by flipping the idle flag there), then write outside it;
/// per-session writes are serialized by the session itself. Dispatch is
/// fire-and-forget: a failed write leaves the peer to the close path driven
/// by its reader thread.
pub struct WorkerPool {
    workers: Mutex<Vec<Arc<WorkerSession>>>,
}

impl WorkerPool {
    /// Creates an empty pool
    pub fn new() -> Self {
        Self {
            workers: <_>::default(),
        }
    }
    /// Registers an accepted session
    pub fn add(&self, worker: Arc<WorkerSession>) {
        self.workers.lock().push(worker);
    }
    /// Removes a session by id; idempotent
    pub fn remove(&self, id: usize) {
        self.workers.lock().retain(|w| w.id() != id);
    }
    /// Number of registered sessions
    pub fn len(&self) -> usize {
        self.workers.lock().len()
    }
    /// Whether no session is registered
    pub fn is_empty(&self) -> bool {
        self.workers.lock().is_empty()
    }
    /// Sends the `load_model`/`reset_actors`/`start` burst to every idle
    /// self-play worker, claiming each as busy. Workers of the wrong role or
    /// already running are skipped.
    pub fn broadcast_self_play(&self, weight_path: &str) {
        let load = format!("load_model {}", weight_path);
        for worker in self.claim_idle(Role::SelfPlay) {
            let _r = worker.write_burst(&[&load, "reset_actors", "start"]);
        }
    }
    /// Sends the optimization command to every idle optimization worker,
    /// claiming each as busy
    pub fn dispatch_optimization(&self, command: &str) {
        for worker in self.claim_idle(Role::Optimization) {
            let _r = worker.write_line(command);
        }
    }
    /// Marks every worker of the given role idle again; self-play workers
    /// are told to `stop` first. Optimization workers get no message, their
    /// completion is signaled out-of-band.
    pub fn stop_job(&self, role: Role) {
        let stopped: Vec<Arc<WorkerSession>> = {
            let workers = self.workers.lock();
            workers
                .iter()
                .filter(|w| w.role() == Some(role))
                .map(|w| {
                    w.set_idle(true);
                    w.clone()
                })
                .collect()
        };
        if role == Role::SelfPlay {
            for worker in stopped {
                let _r = worker.write_line("stop");
            }
        }
    }
    /// Sends a liveness probe to every live session; returns the sessions
    /// whose probe failed so the caller can run their close path
    pub fn keep_alive(&self) -> Vec<Arc<WorkerSession>> {
        self.snapshot()
            .into_iter()
            .filter(|w| !w.is_closed() && w.write_line("keep_alive").is_err())
            .collect()
    }
    /// Tells every connected worker to disconnect
    pub fn quit(&self) {
        for worker in self.snapshot() {
            let _r = worker.write_line("quit");
        }
    }
    fn snapshot(&self) -> Vec<Arc<WorkerSession>> {
        self.workers.lock().clone()
    }
    fn claim_idle(&self, role: Role) -> Vec<Arc<WorkerSession>> {
        let workers = self.workers.lock();
        let mut claimed = Vec::new();
        for worker in workers.iter() {
            if worker.role() == Some(role) && worker.is_idle() && !worker.is_closed() {
                worker.set_idle(false);
                claimed.push(worker.clone());
            }
        }
        claimed
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new()
    }
}
