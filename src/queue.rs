//! In-process task queue.
//!
//! Tasks are submitted by name with positional JSON arguments, the way a
//! message broker would deliver them, and are run by a [`Worker`] with a
//! bounded number of tasks in flight. Each submission gets its own task id
//! and a [`TaskHandle`] to await the result.

use crate::error::{ExtractError, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Semaphore};
use tokio::task::JoinSet;
use tracing::Instrument;

#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// Name under which the handler is registered, e.g. `extraction.do`.
    fn name(&self) -> &'static str;

    async fn handle(&self, task_id: &str, args: Value) -> Result<Value>;
}

#[derive(Default, Clone)]
pub struct TaskRegistry {
    handlers: HashMap<&'static str, Arc<dyn TaskHandler>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<H: TaskHandler + 'static>(mut self, handler: H) -> Self {
        self.handlers.insert(handler.name(), Arc::new(handler));
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.handlers.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

struct Envelope {
    task_id: String,
    handler: Arc<dyn TaskHandler>,
    args: Value,
    reply: oneshot::Sender<Result<Value>>,
}

/// Builds a connected queue and worker.
pub fn channel(registry: TaskRegistry, concurrency: usize) -> (TaskQueue, Worker) {
    let (sender, receiver) = mpsc::unbounded_channel();
    tracing::debug!(tasks = ?registry.names(), concurrency, "task queue ready");

    let queue = TaskQueue {
        sender,
        registry: Arc::new(registry),
    };
    let worker = Worker {
        receiver,
        concurrency: concurrency.max(1),
    };

    (queue, worker)
}

#[derive(Clone)]
pub struct TaskQueue {
    sender: mpsc::UnboundedSender<Envelope>,
    registry: Arc<TaskRegistry>,
}

impl TaskQueue {
    pub fn submit(&self, name: &str, args: Value) -> Result<TaskHandle> {
        let handler = self.registry.get(name).ok_or_else(|| ExtractError::Task {
            message: format!("unknown task: {}", name),
        })?;

        let task_id = uuid::Uuid::new_v4().to_string();
        let (reply, receiver) = oneshot::channel();

        self.sender
            .send(Envelope {
                task_id: task_id.clone(),
                handler,
                args,
                reply,
            })
            .map_err(|_| ExtractError::Task {
                message: "worker is no longer running".to_string(),
            })?;

        tracing::debug!(task_id = %task_id, task = name, "task submitted");
        Ok(TaskHandle { task_id, receiver })
    }
}

pub struct TaskHandle {
    task_id: String,
    receiver: oneshot::Receiver<Result<Value>>,
}

impl TaskHandle {
    pub fn id(&self) -> &str {
        &self.task_id
    }

    pub async fn wait(self) -> TaskOutcome {
        let result = match self.receiver.await {
            Ok(result) => result,
            Err(_) => Err(ExtractError::Task {
                message: format!("task {} was dropped before completing", self.task_id),
            }),
        };

        TaskOutcome {
            task_id: self.task_id,
            result,
        }
    }
}

#[derive(Debug)]
pub struct TaskOutcome {
    pub task_id: String,
    pub result: Result<Value>,
}

impl TaskOutcome {
    pub fn into_result(self) -> Result<Value> {
        self.result
    }
}

pub struct Worker {
    receiver: mpsc::UnboundedReceiver<Envelope>,
    concurrency: usize,
}

impl Worker {
    /// Runs tasks until every [`TaskQueue`] clone has been dropped, then
    /// waits for the ones in flight. Returns how many tasks were run.
    pub async fn run(mut self) -> usize {
        let permits = Arc::new(Semaphore::new(self.concurrency));
        let mut in_flight = JoinSet::new();
        let mut started = 0;

        while let Some(envelope) = self.receiver.recv().await {
            let Ok(permit) = permits.clone().acquire_owned().await else {
                break;
            };
            started += 1;

            let span = tracing::info_span!(
                "task",
                task_id = %envelope.task_id,
                task = envelope.handler.name()
            );
            in_flight.spawn(
                async move {
                    let _permit = permit;
                    tracing::info!("task started");

                    let result = envelope
                        .handler
                        .handle(&envelope.task_id, envelope.args)
                        .await;

                    match result {
                        Ok(_) => tracing::info!("task succeeded"),
                        Err(ref err) => tracing::error!(error = %err, "task failed"),
                    }
                    let _ = envelope.reply.send(result);
                }
                .instrument(span),
            );

            while in_flight.try_join_next().is_some() {}
        }

        while let Some(joined) = in_flight.join_next().await {
            if let Err(err) = joined {
                tracing::error!(error = %err, "task panicked");
            }
        }

        started
    }
}
