//! Bounded-concurrency execution of one layer's tasks.

use crate::error::{FlowError, Result};
use futures::stream::{self, StreamExt};
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;

/// How one task settled.
#[derive(Debug)]
pub enum TaskOutcome<T> {
    Completed(T),
    Failed(FlowError),
    /// The task panicked; carries the panic message.
    Panicked(String),
}

impl<T> TaskOutcome<T> {
    pub fn is_completed(&self) -> bool {
        matches!(self, TaskOutcome::Completed(_))
    }

    /// Collapse into a `Result`, turning a panic into [`FlowError::Other`].
    pub fn into_result(self) -> Result<T> {
        match self {
            TaskOutcome::Completed(v) => Ok(v),
            TaskOutcome::Failed(e) => Err(e),
            TaskOutcome::Panicked(msg) => Err(FlowError::Other(format!("task panicked: {}", msg))),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Run zero-argument async thunks with at most `limit` in flight.
///
/// A thunk is not invoked until a slot frees up. A failing or panicking task
/// never affects its siblings. Returns once every task has settled, with
/// outcomes in submission order. A `limit` of 0 is treated as 1.
pub async fn execute_layer_with_concurrency<T, F, Fut>(tasks: Vec<F>, limit: usize) -> Vec<TaskOutcome<T>>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let limit = limit.max(1);
    let total = tasks.len();
    let mut outcomes: Vec<Option<TaskOutcome<T>>> = (0..total).map(|_| None).collect();

    let mut settled = stream::iter(tasks.into_iter().enumerate().map(|(index, task)| async move {
        let outcome = match AssertUnwindSafe(async move { task().await }).catch_unwind().await {
            Ok(Ok(value)) => TaskOutcome::Completed(value),
            Ok(Err(e)) => TaskOutcome::Failed(e),
            Err(payload) => TaskOutcome::Panicked(panic_message(payload.as_ref())),
        };
        (index, outcome)
    }))
    .buffer_unordered(limit);

    while let Some((index, outcome)) = settled.next().await {
        outcomes[index] = Some(outcome);
    }

    outcomes.into_iter().flatten().collect()
}
