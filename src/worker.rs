//! In-process task queue and the worker draining it.

use std::collections::BTreeMap;
use std::sync::Arc;

use metrics::counter;
use thiserror::Error;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::context::ServiceContext;
use crate::events::Event;
use crate::jobs::TaskResult;
use crate::orchestrator::{JobOrchestrator, TaskSignature, run_task};

#[derive(Debug, Clone, PartialEq)]
pub enum QueuedTask {
    /// Resolve, match and run everything for one event
    ProcessEvent(Event),
    /// Run a single, already matched handler
    RunHandler(TaskSignature),
}

impl QueuedTask {
    fn label(&self) -> &'static str {
        match self {
            QueuedTask::ProcessEvent(_) => "process_event",
            QueuedTask::RunHandler(_) => "run_handler",
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("task queue is closed")]
    Closed,
    #[error("task queue is full")]
    Full,
}

pub trait TaskQueue: Send + Sync {
    fn submit(&self, task: QueuedTask) -> Result<(), QueueError>;
}

/// Bounded tokio channel; submission never waits.
#[derive(Debug, Clone)]
pub struct LocalTaskQueue {
    sender: mpsc::Sender<QueuedTask>,
}

impl LocalTaskQueue {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<QueuedTask>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }
}

impl TaskQueue for LocalTaskQueue {
    fn submit(&self, task: QueuedTask) -> Result<(), QueueError> {
        let label = task.label();
        self.sender.try_send(task).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => QueueError::Full,
            mpsc::error::TrySendError::Closed(_) => QueueError::Closed,
        })?;
        counter!("tasks_enqueued_total", "task" => label).increment(1);
        Ok(())
    }
}

pub struct Worker {
    ctx: Arc<ServiceContext>,
    receiver: mpsc::Receiver<QueuedTask>,
    concurrency: usize,
}

impl Worker {
    pub fn new(ctx: Arc<ServiceContext>, receiver: mpsc::Receiver<QueuedTask>) -> Self {
        let concurrency = ctx.config.worker_concurrency.max(1);
        Self {
            ctx,
            receiver,
            concurrency,
        }
    }

    /// Drains the queue until shutdown fires or every sender is gone, then waits for in-flight tasks.
    #[instrument(skip_all, fields(concurrency = self.concurrency))]
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!("Starting worker");
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut in_flight = JoinSet::new();

        loop {
            let task = tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Worker shutdown requested");
                    break;
                }
                task = self.receiver.recv() => match task {
                    Some(task) => task,
                    None => {
                        debug!("Task queue closed");
                        break;
                    }
                },
            };

            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(err) => {
                    error!(error = %err, "Worker semaphore closed");
                    break;
                }
            };
            let ctx = self.ctx.clone();
            in_flight.spawn(async move {
                let _permit = permit;
                execute(ctx, task).await;
            });

            while let Some(joined) = in_flight.try_join_next() {
                if let Err(err) = joined {
                    error!(error = %err, "Worker task aborted");
                }
            }
        }

        while let Some(joined) = in_flight.join_next().await {
            if let Err(err) = joined {
                error!(error = %err, "Worker task aborted");
            }
        }
        info!("Worker stopped");
    }
}

/// Runs one queued task inline and logs the aggregate result.
pub async fn execute(ctx: Arc<ServiceContext>, task: QueuedTask) -> BTreeMap<String, TaskResult> {
    let label = task.label();
    let results = match task {
        QueuedTask::ProcessEvent(event) => JobOrchestrator::new(ctx).process(event).await,
        QueuedTask::RunHandler(signature) => run_task(ctx, signature).await,
    };

    let failed = results.values().filter(|r| !r.success).count();
    counter!("tasks_processed_total", "task" => label).increment(1);
    if failed > 0 {
        warn!(task = label, jobs = results.len(), failed, "Task finished with failures");
    } else {
        info!(task = label, jobs = results.len(), "Task finished");
    }
    debug!(results = ?results, "Task results");
    results
}
