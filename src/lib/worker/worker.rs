use std::{
    collections::{HashMap, VecDeque},
    future::Future,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::{Duration, SystemTime},
};

use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::types::{Worker, WorkerError};
use crate::lib::tasks::{
    docker::Runtime,
    state::valid_state_transition,
    types::{DockerAction, DockerError, DockerResult, State, Task, new_config},
};

impl Worker {
    pub fn new(name: &str, runtime: Arc<dyn Runtime>) -> Self {
        Worker {
            name: name.to_string(),
            queue: Mutex::new(VecDeque::new()),
            db: RwLock::new(HashMap::new()),
            task_count: AtomicUsize::new(0),
            runtime,
            runtime_timeout: None,
        }
    }

    /// Bound every runtime call. Expiry is reported as a failed result.
    pub fn with_runtime_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.runtime_timeout = timeout;
        self
    }

    /// Queue `task` as desired state. The observed store is left alone.
    pub async fn add_task(&self, task: Task) {
        let mut queue = self.queue.lock().await;
        queue.push_back(task);
        self.task_count.store(queue.len(), Ordering::Relaxed);
    }

    pub fn queue_depth(&self) -> usize {
        self.task_count.load(Ordering::Relaxed)
    }

    /// Copies of every observed task, in no particular order.
    pub async fn get_tasks(&self) -> Vec<Task> {
        self.db.read().await.values().cloned().collect()
    }

    pub async fn get_task(&self, id: &Uuid) -> Option<Task> {
        self.db.read().await.get(id).cloned()
    }

    /// Reconcile the oldest queued task against what we have observed.
    ///
    /// The dequeued item is consumed whatever happens; nothing is retried.
    pub async fn run_task(&self) -> DockerResult {
        let task_queued = {
            let mut queue = self.queue.lock().await;
            let next = queue.pop_front();
            self.task_count.store(queue.len(), Ordering::Relaxed);
            next
        };

        let Some(task_queued) = task_queued else {
            debug!("no tasks in queue");
            return DockerResult::noop();
        };

        let task_persisted = self
            .db
            .write()
            .await
            .entry(task_queued.id)
            .or_insert_with(|| task_queued.clone())
            .clone();

        if !valid_state_transition(task_persisted.state, task_queued.state) {
            warn!(
                task_id = %task_queued.id,
                from = ?task_persisted.state,
                to = ?task_queued.state,
                "invalid state transition"
            );
            return DockerResult::with_error(WorkerError::InvalidStateTransition {
                from: task_persisted.state,
                to: task_queued.state,
            });
        }

        match task_queued.state {
            State::Scheduled => self.start_task(task_queued).await,
            State::Completed => self.stop_task(task_queued, task_persisted).await,
            other => {
                warn!(task_id = %task_queued.id, state = ?other, "no handler for desired state");
                DockerResult::with_error(WorkerError::UnsupportedState(other))
            }
        }
    }

    async fn start_task(&self, mut task: Task) -> DockerResult {
        task.start_time = Some(SystemTime::now());
        task.finish_time = None;
        task.container_id = None;

        let config = new_config(&task);
        let result = self
            .bounded(DockerAction::Start, self.runtime.run(&config))
            .await;

        task.container_id = result.container_id.clone();
        match &result.error {
            Some(err) => {
                error!(task_id = %task.id, action = ?result.action, error = %err, "error running task");
                task.state = State::Failed;
                task.finish_time = Some(SystemTime::now());
            }
            None => {
                info!(task_id = %task.id, container_id = ?task.container_id, name = %task.name, "task running");
                task.state = State::Running;
            }
        }

        self.db.write().await.insert(task.id, task);
        result
    }

    async fn stop_task(&self, mut task: Task, observed: Task) -> DockerResult {
        let Some(container_id) = task
            .container_id
            .clone()
            .or_else(|| observed.container_id.clone())
        else {
            // Nothing to stop, so the task can never complete.
            warn!(task_id = %task.id, from = ?observed.state, "completed requested for a task without a container, marking failed");
            task.state = State::Failed;
            task.start_time = observed.start_time;
            task.finish_time = Some(SystemTime::now());
            let id = task.id;
            self.db.write().await.insert(id, task);
            return DockerResult::with_error(WorkerError::MissingContainer(id));
        };

        let result = self
            .bounded(DockerAction::Stop, self.runtime.stop(&container_id))
            .await;

        task.start_time = observed.start_time;
        task.finish_time = Some(SystemTime::now());
        task.container_id = Some(result.container_id.clone().unwrap_or(container_id));
        match &result.error {
            Some(err) => {
                error!(task_id = %task.id, action = ?result.action, error = %err, "error stopping task");
                task.state = State::Failed;
            }
            None => {
                info!(task_id = %task.id, container_id = ?task.container_id, "task stopped and removed");
                task.state = State::Completed;
            }
        }

        self.db.write().await.insert(task.id, task);
        result
    }

    async fn bounded<F>(&self, action: DockerAction, call: F) -> DockerResult
    where
        F: Future<Output = DockerResult>,
    {
        let Some(limit) = self.runtime_timeout else {
            return call.await;
        };
        match tokio::time::timeout(limit, call).await {
            Ok(result) => result,
            Err(_) => DockerResult::failed(action, DockerError::Timeout { action, limit }),
        }
    }
}

/// Drain one queued task every `interval`.
pub async fn run_tasks(worker: Arc<Worker>, interval: Duration) {
    loop {
        if worker.queue_depth() > 0 {
            let result = worker.run_task().await;
            match &result.error {
                Some(err) => error!(worker = %worker.name, action = ?result.action, error = %err, "error reconciling task"),
                None => info!(worker = %worker.name, container_id = ?result.container_id, "task reconciled"),
            }
        } else {
            info!(worker = %worker.name, "no tasks in queue, waiting");
        }

        tokio::time::sleep(interval).await;
    }
}
