use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
    time::Duration,
};

use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use super::stats::SharedStats;
use crate::lib::tasks::{
    docker::Runtime,
    types::{State, Task},
};

/// Reconciliation engine: `queue` holds desired state, `db` observed state.
///
/// Each collection has its own lock and neither is held across a runtime
/// call, so HTTP handlers never wait on a container operation.
pub struct Worker {
    pub name: String,
    pub(super) queue: Mutex<VecDeque<Task>>,
    pub(super) db: RwLock<HashMap<Uuid, Task>>,
    pub(super) task_count: std::sync::atomic::AtomicUsize,
    pub(super) runtime: Arc<dyn Runtime>,
    pub(super) runtime_timeout: Option<Duration>,
}

#[derive(Clone)]
pub struct TaskServer {
    pub worker: Arc<Worker>,
    pub stats: SharedStats,
    pub address: String,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum WorkerError {
    #[error("invalid state transition from {from:?} to {to:?}")]
    InvalidStateTransition { from: State, to: State },

    #[error("no handler for desired state {0:?}")]
    UnsupportedState(State),

    #[error("task {0} has no container to stop")]
    MissingContainer(Uuid),
}
