//! Async-to-rayon bridge.
//!
//! A [`WorkerTask`] is the future half: it is awaited on the shared context. The
//! [`WorkerCompletion`] half is moved into the rayon closure and completed exactly
//! once, waking the awaiting task through a `diatomic-waker`.

use std::any::Any;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use diatomic_waker::DiatomicWaker;
use parking_lot::Mutex;

/// Outcome delivered by a worker: the closure's value or its panic payload.
pub type WorkerOutcome<R> = std::result::Result<R, Box<dyn Any + Send>>;

/// A future representing work running on the worker pool.
pub struct WorkerTask<R> {
    state: Arc<TaskState<R>>,
}

/// Shared state between the task future and completion handle.
struct TaskState<R> {
    result: Mutex<Option<WorkerOutcome<R>>>,
    waker: DiatomicWaker,
}

/// Handle used by the worker thread to complete the task.
pub struct WorkerCompletion<R> {
    state: Arc<TaskState<R>>,
}

impl<R> WorkerTask<R> {
    /// Create a new task and return (task, completion_handle).
    #[inline]
    pub fn new() -> (Self, WorkerCompletion<R>) {
        let state = Arc::new(TaskState {
            result: Mutex::new(None),
            waker: DiatomicWaker::new(),
        });
        (
            WorkerTask {
                state: state.clone(),
            },
            WorkerCompletion { state },
        )
    }
}

impl<R> WorkerCompletion<R> {
    /// Complete the task. Wakes the waiting future.
    #[inline]
    pub fn complete(self, outcome: WorkerOutcome<R>) {
        *self.state.result.lock() = Some(outcome);
        self.state.waker.notify();
    }
}

impl<R> Future for WorkerTask<R> {
    type Output = WorkerOutcome<R>;

    #[inline]
    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if let Some(outcome) = self.state.result.lock().take() {
            return Poll::Ready(outcome);
        }

        // SAFETY: WorkerTask is polled from a single task at a time (the async executor
        // guarantees this). DiatomicWaker::register must not be called concurrently
        // for the same waker, which is satisfied here.
        unsafe {
            self.state.waker.register(cx.waker());
        }

        // Completion may have landed between the first check and registration
        if let Some(outcome) = self.state.result.lock().take() {
            Poll::Ready(outcome)
        } else {
            Poll::Pending
        }
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
