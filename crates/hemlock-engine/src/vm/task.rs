//! Task payload - the completion slot for a spawned unit of work.
//!
//! Each task is backed by a dedicated OS thread (spawned in the `spawn`
//! builtin). The payload carries a mutex/condvar pair through which the
//! thread publishes exactly one of a result value or an exception value;
//! `join` blocks on the condvar and consumes the published outcome. A task
//! may be joined at most once.

use crate::vm::value::Value;
use parking_lot::{Condvar, Mutex};

struct TaskInner {
    done: bool,
    result: Option<Value>,
    exception: Option<Value>,
    joined: bool,
    detached: bool,
}

/// The outcome a finished task published.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    Completed(Value),
    Failed(Value),
}

/// Shared completion state between a spawned thread and its joiner.
pub struct TaskObject {
    inner: Mutex<TaskInner>,
    done_cv: Condvar,
}

impl TaskObject {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(TaskInner {
                done: false,
                result: None,
                exception: None,
                joined: false,
                detached: false,
            }),
            done_cv: Condvar::new(),
        }
    }

    /// Publish a successful result and wake joiners.
    pub fn complete(&self, result: Value) {
        let mut inner = self.inner.lock();
        inner.result = Some(result);
        inner.done = true;
        self.done_cv.notify_all();
    }

    /// Publish a captured exception and wake joiners.
    pub fn fail(&self, exception: Value) {
        let mut inner = self.inner.lock();
        inner.exception = Some(exception);
        inner.done = true;
        self.done_cv.notify_all();
    }

    pub fn is_done(&self) -> bool {
        self.inner.lock().done
    }

    pub fn is_detached(&self) -> bool {
        self.inner.lock().detached
    }

    /// Mark the task detached; its outcome is dropped at completion and it
    /// can no longer be joined.
    pub fn detach(&self) {
        self.inner.lock().detached = true;
    }

    /// Block until the task completes and consume its outcome.
    ///
    /// Fails without blocking if the task was already joined or detached.
    pub fn join(&self) -> Result<TaskOutcome, String> {
        let mut inner = self.inner.lock();
        if inner.joined {
            return Err("task already joined".to_string());
        }
        if inner.detached {
            return Err("cannot join a detached task".to_string());
        }
        while !inner.done {
            self.done_cv.wait(&mut inner);
        }
        inner.joined = true;
        if let Some(exception) = inner.exception.take() {
            Ok(TaskOutcome::Failed(exception))
        } else {
            let result = inner.result.take().unwrap_or(Value::Null);
            Ok(TaskOutcome::Completed(result))
        }
    }
}

impl Default for TaskObject {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TaskObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("TaskObject")
            .field("done", &inner.done)
            .field("joined", &inner.joined)
            .field("detached", &inner.detached)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_join_returns_result() {
        let task = Arc::new(TaskObject::new());
        let publisher = {
            let task = task.clone();
            std::thread::spawn(move || task.complete(Value::I32(42)))
        };
        assert_eq!(task.join().unwrap(), TaskOutcome::Completed(Value::I32(42)));
        publisher.join().unwrap();
    }

    #[test]
    fn test_join_returns_exception() {
        let task = TaskObject::new();
        task.fail(Value::str("boom"));
        assert_eq!(task.join().unwrap(), TaskOutcome::Failed(Value::str("boom")));
    }

    #[test]
    fn test_double_join_fails() {
        let task = TaskObject::new();
        task.complete(Value::Null);
        assert!(task.join().is_ok());
        assert!(task.join().is_err());
    }

    #[test]
    fn test_join_detached_fails() {
        let task = TaskObject::new();
        task.detach();
        task.complete(Value::Null);
        assert!(task.join().is_err());
    }
}
