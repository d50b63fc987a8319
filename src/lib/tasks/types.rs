use std::{
    collections::HashMap,
    fmt,
    time::{Duration, SystemTime},
};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::lib::worker::types::WorkerError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum State {
    #[default]
    Pending,
    Scheduled,
    Running,
    Completed,
    Failed,
}

/// A unit of work bound to one container.
///
/// `start_time`, `finish_time` and `container_id` belong to the agent: the
/// worker overwrites whatever a submitter put there.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Task {
    pub id: Uuid,
    #[serde(default)]
    pub container_id: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub state: State,
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub cpu: f64,
    #[serde(default)]
    pub memory: u64,
    #[serde(default)]
    pub disk: u64,
    #[serde(default)]
    pub env: Vec<String>,
    #[serde(default)]
    pub exposed_ports: Vec<u16>,
    /// Container port to host port.
    #[serde(default)]
    pub port_bindings: HashMap<String, String>,
    #[serde(default)]
    pub restart_policy: String,
    #[serde(default)]
    pub start_time: Option<SystemTime>,
    #[serde(default)]
    pub finish_time: Option<SystemTime>,
}

/// Submission envelope: "I want this task in this state".
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaskEvent {
    pub id: Uuid,
    #[serde(default)]
    pub state: State,
    #[serde(default)]
    pub timestamp: Option<SystemTime>,
    pub task: Task,
}

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub name: String,
    pub attach_stdin: bool,
    pub attach_stdout: bool,
    pub attach_stderr: bool,
    pub exposed_ports: Vec<u16>,
    pub port_bindings: HashMap<String, String>,
    pub cmd: Vec<String>,
    pub image: String,
    pub cpu: f64,
    pub memory: i64,
    pub disk: i64,
    pub env: Vec<String>,
    pub restart_policy: String,
}

pub fn new_config(task: &Task) -> Config {
    Config {
        name: task.name.clone(),
        attach_stdout: true,
        attach_stderr: true,
        exposed_ports: task.exposed_ports.clone(),
        port_bindings: task.port_bindings.clone(),
        image: task.image.clone(),
        cpu: task.cpu,
        memory: i64::try_from(task.memory).unwrap_or(i64::MAX),
        disk: i64::try_from(task.disk).unwrap_or(i64::MAX),
        env: task.env.clone(),
        restart_policy: task.restart_policy.clone(),
        ..Default::default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DockerAction {
    Pull,
    Create,
    Start,
    Stop,
    Remove,
}

impl fmt::Display for DockerAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DockerAction::Pull => "pull",
            DockerAction::Create => "create",
            DockerAction::Start => "start",
            DockerAction::Stop => "stop",
            DockerAction::Remove => "remove",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DockerOutcome {
    Success,
    Failure,
}

#[derive(Debug, Error)]
pub enum DockerError {
    #[error("docker client error: {0}")]
    ClientError(String),

    #[error("docker api error: {0}")]
    Api(#[from] bollard::errors::Error),

    #[error("{action} did not finish within {limit:?}")]
    Timeout { action: DockerAction, limit: Duration },

    #[error(transparent)]
    Worker(#[from] WorkerError),
}

/// Outcome of one runtime operation. Failures live in `error`; nothing past
/// this boundary panics or returns `Err`.
#[derive(Debug, Default)]
pub struct DockerResult {
    pub error: Option<DockerError>,
    pub action: Option<DockerAction>,
    pub container_id: Option<String>,
    pub result: Option<DockerOutcome>,
}

impl DockerResult {
    /// Nothing was attempted.
    pub fn noop() -> Self {
        DockerResult::default()
    }

    pub fn with_error(err: impl Into<DockerError>) -> Self {
        DockerResult {
            error: Some(err.into()),
            result: Some(DockerOutcome::Failure),
            ..Default::default()
        }
    }

    pub fn failed(action: DockerAction, err: impl Into<DockerError>) -> Self {
        DockerResult {
            action: Some(action),
            ..DockerResult::with_error(err)
        }
    }

    pub fn success(container_id: String, action: DockerAction) -> Self {
        DockerResult {
            container_id: Some(container_id),
            action: Some(action),
            result: Some(DockerOutcome::Success),
            error: None,
        }
    }

    pub fn with_container(mut self, container_id: impl Into<String>) -> Self {
        self.container_id = Some(container_id.into());
        self
    }
}
