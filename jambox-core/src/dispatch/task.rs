use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::{Deadline, Expiry};

/// A unit of work run by a [crate::DispatchPool] worker.
#[async_trait]
pub trait Task
where
    Self: Send + 'static,
{
    /// Runs the task to completion.
    ///
    /// Implementors must observe the shutdown token and their own deadline,
    /// and resolve their result channel before returning.
    async fn process(self: Box<Self>, shutdown: CancellationToken);

    /// A short description used in logs
    fn describe(&self) -> String;
}

/// [Task] trait object.
pub type BoxedTask = Box<dyn Task>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    #[error("Task timed out")]
    TimedOut,
    #[error("Task was cancelled")]
    Cancelled,
    #[error("Task queue is full")]
    Rejected,
    #[error("Fetch failed: {0}")]
    Fetch(String),
    #[error("Task ended without a result")]
    Abandoned,
}

/// The receiving end of a task's result channel.
pub struct TaskHandle<T> {
    receiver: oneshot::Receiver<Result<T, TaskError>>,
}

/// The sending end of a task's result channel.
pub type TaskReply<T> = oneshot::Sender<Result<T, TaskError>>;

impl<T> TaskHandle<T> {
    pub fn new() -> (TaskReply<T>, Self) {
        let (sender, receiver) = oneshot::channel();
        (sender, Self { receiver })
    }

    /// Waits for the task's result.
    pub async fn result(self) -> Result<T, TaskError> {
        // A dropped sender means the task died without answering
        self.receiver
            .await
            .unwrap_or_else(|_| Err(TaskError::Abandoned))
    }

    /// Waits for the task's result, giving up when the deadline fires.
    pub async fn result_within(self, deadline: &Deadline) -> Result<T, TaskError> {
        tokio::select! {
            result = self.result() => result,
            expiry = deadline.expired() => Err(expiry.into()),
        }
    }
}

impl From<Expiry> for TaskError {
    fn from(value: Expiry) -> Self {
        match value {
            Expiry::TimedOut => Self::TimedOut,
            Expiry::Cancelled => Self::Cancelled,
        }
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn test_dropped_reply_is_abandoned() {
        let (reply, handle) = TaskHandle::<u32>::new();
        drop(reply);

        assert_eq!(handle.result().await, Err(TaskError::Abandoned));
    }

    #[tokio::test(start_paused = true)]
    async fn test_result_within_deadline() {
        let (_reply, handle) = TaskHandle::<u32>::new();
        let deadline = Deadline::after(Duration::from_secs(1));

        assert_eq!(
            handle.result_within(&deadline).await,
            Err(TaskError::TimedOut)
        );
    }
}
