mod task;

pub use task::*;

use std::sync::Arc;

use log::{error, info, warn};
use parking_lot::Mutex as SyncMutex;
use tokio::{
    sync::{mpsc, Mutex},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;

use crate::{Config, CorrelationId, Deadline, Id, Snowflake};

pub type PoolId = Id<DispatchPool>;

type SharedReceiver = Arc<Mutex<mpsc::Receiver<BoxedTask>>>;

/// The outcome of submitting a task to a [DispatchPool].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    /// The task was queued and will run exactly once.
    Accepted(CorrelationId),
    /// The queue is full. Callers should surface this instead of retrying.
    Rejected,
    /// The caller's deadline had already passed.
    TimedOut,
}

/// A fixed number of workers pulling tasks from a bounded queue.
pub struct DispatchPool {
    pub id: PoolId,
    name: String,
    worker_count: usize,
    sender: mpsc::Sender<BoxedTask>,
    receiver: SharedReceiver,
    snowflake: Snowflake,
    shutdown: CancellationToken,
    workers: SyncMutex<Vec<JoinHandle<()>>>,
}

impl DispatchPool {
    pub fn new(name: impl Into<String>, config: &Config) -> Self {
        let id = PoolId::new();
        let (sender, receiver) = mpsc::channel(config.effective_task_queue_size());

        Self {
            id,
            name: name.into(),
            worker_count: config.effective_worker_count(),
            sender,
            receiver: Arc::new(Mutex::new(receiver)),
            snowflake: Snowflake::new(id.value()),
            shutdown: CancellationToken::new(),
            workers: Default::default(),
        }
    }

    /// Spawns the workers. Calling this more than once has no effect.
    pub fn run(&self) {
        let mut workers = self.workers.lock();

        if !workers.is_empty() {
            warn!("Pool {} is already running", self.name);
            return;
        }

        for index in 0..self.worker_count {
            let worker = Worker {
                name: format!("{}-{}", self.name, index),
                receiver: self.receiver.clone(),
                shutdown: self.shutdown.clone(),
            };

            workers.push(tokio::spawn(worker.work()));
        }

        info!(
            "Pool {} started with {} worker(s)",
            self.name, self.worker_count
        );
    }

    /// Attempts to queue a task without waiting.
    pub fn submit<T>(&self, task: T, deadline: &Deadline) -> Submission
    where
        T: Task,
    {
        if deadline.is_expired() {
            return Submission::TimedOut;
        }

        if self.shutdown.is_cancelled() {
            return Submission::Rejected;
        }

        match self.sender.try_send(Box::new(task)) {
            Ok(()) => Submission::Accepted(self.snowflake.generate()),
            Err(mpsc::error::TrySendError::Full(task)) => {
                warn!("Pool {} is full, rejected {}", self.name, task.describe());
                Submission::Rejected
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Submission::Rejected,
        }
    }

    /// Stops dispatching. Running tasks are told to stop through their shutdown token.
    pub fn shutdown(&self) {
        if !self.shutdown.is_cancelled() {
            info!("Pool {} is shutting down", self.name);
            self.shutdown.cancel();
        }
    }

    /// Shuts down and waits for every worker to finish its current task.
    pub async fn join(&self) {
        self.shutdown();

        let workers: Vec<_> = self.workers.lock().drain(..).collect();

        for worker in workers {
            worker.await.ok();
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for DispatchPool {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

struct Worker {
    name: String,
    receiver: SharedReceiver,
    shutdown: CancellationToken,
}

impl Worker {
    async fn work(self) {
        loop {
            // Holding the receiver lock is how an idle worker claims the next task
            let task = {
                let mut receiver = self.receiver.lock().await;

                tokio::select! {
                    biased;
                    _ = self.shutdown.cancelled() => None,
                    task = receiver.recv() => task,
                }
            };

            let Some(task) = task else {
                break;
            };

            let description = task.describe();

            // Run in its own task so a panic doesn't take the worker down with it
            let handle = tokio::spawn(task.process(self.shutdown.clone()));

            if let Err(e) = handle.await {
                if e.is_panic() {
                    error!("{} panicked while running {}", self.name, description);
                }
            }
        }
    }
}
