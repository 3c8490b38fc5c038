//! Hands work from listener threads to the host thread.
//!
//! Callers enqueue a closure over `&mut World` and poll its slot until it
//! completes or the dispatch timeout passes. The host drains a bounded
//! number of tasks per tick from an exclusive system.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::thread::ThreadId;
use std::time::{Duration, Instant};

use bevy::prelude::*;
use crossbeam_channel::{Receiver, Sender};

use super::types::OperationResult;
use crate::config::BridgeConfig;
use crate::error::BridgeError;

pub type HostOp = Box<dyn FnOnce(&mut World) -> OperationResult + Send>;

/// Whether a task changes host state. A mutating task whose caller already
/// gave up is skipped instead of run with nobody to report to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Mutate,
}

#[derive(Default)]
struct TaskSlot {
    done: AtomicBool,
    abandoned: AtomicBool,
    result: Mutex<Option<OperationResult>>,
}

impl TaskSlot {
    fn complete(&self, result: OperationResult) {
        if self.done.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Ok(mut slot) = self.result.lock() {
            *slot = Some(result);
        }
    }

    fn take(&self) -> Option<OperationResult> {
        if !self.done.load(Ordering::Acquire) {
            return None;
        }
        self.result.lock().ok().and_then(|mut slot| slot.take())
    }
}

struct QueuedTask {
    seq: u64,
    access: Access,
    op: HostOp,
    slot: Arc<TaskSlot>,
}

#[derive(Resource, Clone)]
pub struct HostScheduler {
    tx: Sender<QueuedTask>,
    rx: Receiver<QueuedTask>,
    next_seq: Arc<AtomicU64>,
    host_thread: Arc<OnceLock<ThreadId>>,
    timeout: Duration,
    poll_interval: Duration,
    drain_per_tick: usize,
}

/// Handle to one enqueued task.
struct Pending {
    seq: u64,
    slot: Arc<TaskSlot>,
    deadline: Instant,
}

impl HostScheduler {
    pub fn new(timeout: Duration, poll_interval: Duration, drain_per_tick: usize) -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        Self {
            tx,
            rx,
            next_seq: Arc::new(AtomicU64::new(0)),
            host_thread: Arc::new(OnceLock::new()),
            timeout,
            poll_interval,
            drain_per_tick: drain_per_tick.max(1),
        }
    }

    pub fn from_config(config: &BridgeConfig) -> Self {
        Self::new(
            config.dispatch_timeout(),
            config.poll_interval(),
            config.drain_per_tick,
        )
    }

    pub fn pending(&self) -> usize {
        self.rx.len()
    }

    /// True once the host has drained at least once from this thread.
    pub fn on_host_thread(&self) -> bool {
        self.host_thread.get() == Some(&std::thread::current().id())
    }

    fn enqueue(&self, access: Access, op: HostOp) -> Result<Pending, OperationResult> {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let slot = Arc::new(TaskSlot::default());
        let task = QueuedTask {
            seq,
            access,
            op,
            slot: slot.clone(),
        };
        // Our own receiver lives as long as self, so send only fails if the
        // channel was torn down.
        self.tx
            .send(task)
            .map_err(|_| OperationResult::fail("Host scheduler is shut down"))?;
        Ok(Pending {
            seq,
            slot,
            deadline: Instant::now() + self.timeout,
        })
    }

    fn timed_out(&self, pending: &Pending) -> OperationResult {
        pending.slot.abandoned.store(true, Ordering::Release);
        warn!("task #{} timed out after {:?}", pending.seq, self.timeout);
        BridgeError::DispatchTimeout {
            after_ms: self.timeout.as_millis() as u64,
        }
        .into()
    }

    /// Queues `op` and waits for the host to run it.
    pub async fn execute<F>(&self, access: Access, op: F) -> OperationResult
    where
        F: FnOnce(&mut World) -> OperationResult + Send + 'static,
    {
        let pending = match self.enqueue(access, Box::new(op)) {
            Ok(pending) => pending,
            Err(fail) => return fail,
        };
        loop {
            if let Some(result) = pending.slot.take() {
                return result;
            }
            if Instant::now() >= pending.deadline {
                return self.timed_out(&pending);
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Blocking variant for plain threads.
    ///
    /// Code already running on the host thread holds the `&mut World` of
    /// its system and runs the operation synchronously with
    /// [`run_inline`]. Calling this from the host thread would wait on the
    /// tick that is supposed to drain the task, so it fails fast instead.
    pub fn execute_blocking<F>(&self, access: Access, op: F) -> OperationResult
    where
        F: FnOnce(&mut World) -> OperationResult + Send + 'static,
    {
        if self.on_host_thread() {
            return OperationResult::fail(
                "execute_blocking called on the host thread; use run_inline",
            );
        }
        let pending = match self.enqueue(access, Box::new(op)) {
            Ok(pending) => pending,
            Err(fail) => return fail,
        };
        loop {
            if let Some(result) = pending.slot.take() {
                return result;
            }
            if Instant::now() >= pending.deadline {
                return self.timed_out(&pending);
            }
            std::thread::sleep(self.poll_interval);
        }
    }

    /// Runs up to `drain_per_tick` queued tasks. Returns how many ran.
    pub fn drain(&self, world: &mut World) -> usize {
        self.host_thread.get_or_init(|| std::thread::current().id());
        let mut ran = 0;
        for _ in 0..self.drain_per_tick {
            let Ok(task) = self.rx.try_recv() else {
                break;
            };
            if task.access == Access::Mutate && task.slot.abandoned.load(Ordering::Acquire) {
                debug!("skipping abandoned task #{}", task.seq);
                continue;
            }
            let result = run_inline(world, task.op);
            if task.slot.abandoned.load(Ordering::Acquire) {
                debug!("task #{} finished after its caller gave up", task.seq);
            }
            task.slot.complete(result);
            ran += 1;
        }
        ran
    }
}

/// Runs an operation directly against the world, turning a panic into a
/// failed result.
pub fn run_inline<F>(world: &mut World, op: F) -> OperationResult
where
    F: FnOnce(&mut World) -> OperationResult,
{
    match catch_unwind(AssertUnwindSafe(|| op(world))) {
        Ok(result) => result,
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            error!("host operation panicked: {message}");
            OperationResult::fail(format!("Handler panicked: {message}"))
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

pub fn drain_host_tasks(world: &mut World) {
    let Some(scheduler) = world.get_resource::<HostScheduler>().cloned() else {
        return;
    };
    scheduler.drain(world);
}
