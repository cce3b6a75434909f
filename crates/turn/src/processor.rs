//! Gates end-of-turn emission on per-turn async work.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::AbortHandle;

/// Task name used for the end-of-utterance timer.
pub const TIMER_TASK: &str = "finalize_timer";

struct Inner {
    name: String,
    turn_id: AtomicU64,
    turn_active: AtomicBool,
    /// Turn id for which `done` was already signalled; `u64::MAX` = none.
    last_done_turn: AtomicU64,
    tasks: Mutex<HashMap<String, AbortHandle>>,
    done_tx: mpsc::UnboundedSender<u64>,
}

impl Inner {
    fn try_mark_done(&self, turn: u64) -> bool {
        let mut current = self.last_done_turn.load(Ordering::Acquire);
        loop {
            if current == turn {
                return false;
            }
            match self.last_done_turn.compare_exchange(
                current,
                turn,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }
}

/// Tracks named async tasks scheduled within the current turn.
///
/// Scheduling a task under an existing name cancels its predecessor. When
/// every registered task has completed and the turn id is unchanged, a
/// single turn-done notification is sent on the channel returned by
/// `new`. Completions arriving after a turn increment are ignored.
#[derive(Clone)]
pub struct TurnTaskProcessor {
    inner: Arc<Inner>,
}

impl TurnTaskProcessor {
    pub fn new(name: impl Into<String>) -> (Self, mpsc::UnboundedReceiver<u64>) {
        let (done_tx, done_rx) = mpsc::unbounded_channel();
        let processor = Self {
            inner: Arc::new(Inner {
                name: name.into(),
                turn_id: AtomicU64::new(0),
                turn_active: AtomicBool::new(false),
                last_done_turn: AtomicU64::new(u64::MAX),
                tasks: Mutex::new(HashMap::new()),
                done_tx,
            }),
        };
        (processor, done_rx)
    }

    pub fn turn_id(&self) -> u64 {
        self.inner.turn_id.load(Ordering::Acquire)
    }

    pub fn turn_active(&self) -> bool {
        self.inner.turn_active.load(Ordering::Acquire)
    }

    pub fn has_pending_tasks(&self) -> bool {
        let tasks = self.inner.tasks.lock().unwrap();
        tasks.values().any(|handle| !handle.is_finished())
    }

    /// Register `task` under `task_name`, cancelling any previous task
    /// with the same name in this turn.
    pub fn schedule<F>(&self, task_name: &str, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let scheduled_turn = self.turn_id();
        let handle = tokio::spawn(task);
        let abort = handle.abort_handle();
        {
            let mut tasks = self.inner.tasks.lock().unwrap();
            if let Some(previous) = tasks.insert(task_name.to_string(), abort) {
                previous.abort();
            }
        }

        let inner = self.inner.clone();
        tokio::spawn(async move {
            // A JoinError means the task was cancelled or panicked; either
            // way it cannot complete a turn.
            if handle.await.is_err() {
                return;
            }
            if inner.turn_id.load(Ordering::Acquire) != scheduled_turn {
                return;
            }
            let pending = {
                let tasks = inner.tasks.lock().unwrap();
                tasks.values().any(|h| !h.is_finished())
            };
            if pending {
                return;
            }
            if inner.try_mark_done(scheduled_turn) {
                tracing::debug!(
                    processor = %inner.name,
                    turn = scheduled_turn,
                    "turn_tasks_complete"
                );
                let _ = inner.done_tx.send(scheduled_turn);
            }
        });
    }

    /// Schedule (or replace) the end-of-utterance timer.
    pub fn update_timer(&self, delay: Duration) {
        self.schedule(TIMER_TASK, async move {
            tokio::time::sleep(delay).await;
        });
    }

    /// Cancel every pending task.
    pub fn cancel_tasks(&self) {
        let mut tasks = self.inner.tasks.lock().unwrap();
        for (_, handle) in tasks.drain() {
            handle.abort();
        }
    }

    pub fn reset(&self) {
        self.cancel_tasks();
    }

    pub fn start_turn(&self) {
        self.inner.turn_active.store(true, Ordering::Release);
    }

    /// Finish the current turn: cancel its tasks and move to the next id.
    pub fn complete_turn(&self) {
        self.next();
        self.inner.turn_active.store(false, Ordering::Release);
    }

    /// Advance the turn id; completions of already-running tasks are
    /// ignored from here on.
    pub fn next(&self) {
        self.reset();
        self.inner.turn_id.fetch_add(1, Ordering::AcqRel);
    }
}

impl std::fmt::Debug for TurnTaskProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TurnTaskProcessor")
            .field("name", &self.inner.name)
            .field("turn_id", &self.turn_id())
            .field("pending", &self.has_pending_tasks())
            .finish()
    }
}
