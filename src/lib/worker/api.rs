use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State as AxumState, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{info, warn};
use uuid::Uuid;

use super::{
    stats::{SharedStats, Stats},
    types::{TaskServer, Worker},
};
use crate::lib::tasks::types::{State, Task, TaskEvent};

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub message: String,
    pub http_status_code: u16,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        warn!(status = status.as_u16(), error = %self, "request rejected");
        let body = ErrorResponse {
            message: self.to_string(),
            http_status_code: status.as_u16(),
        };
        (status, Json(body)).into_response()
    }
}

impl TaskServer {
    pub fn new(worker: Arc<Worker>, stats: SharedStats, address: &str, port: u16) -> Self {
        Self {
            worker,
            stats,
            address: address.to_string(),
            port,
        }
    }

    async fn get_tasks(AxumState(server): AxumState<TaskServer>) -> Json<Vec<Task>> {
        Json(server.worker.get_tasks().await)
    }

    async fn start_task(
        AxumState(server): AxumState<TaskServer>,
        payload: Result<Json<TaskEvent>, JsonRejection>,
    ) -> Result<impl IntoResponse, ApiError> {
        let Json(task_event) = payload.map_err(|e| {
            ApiError::BadRequest(format!("failed to decode task event: {}", e.body_text()))
        })?;

        let mut task = task_event.task;
        if task.id.is_nil() {
            return Err(ApiError::BadRequest("task id must not be nil".to_string()));
        }
        task.container_id = None;
        task.start_time = None;
        task.finish_time = None;

        server.worker.add_task(task.clone()).await;
        info!(task_id = %task.id, event_id = %task_event.id, state = ?task.state, "task queued");
        Ok((StatusCode::CREATED, Json(task)))
    }

    async fn stop_task(
        AxumState(server): AxumState<TaskServer>,
        Path(id): Path<String>,
    ) -> Result<StatusCode, ApiError> {
        let task_id = Uuid::parse_str(&id)
            .map_err(|e| ApiError::BadRequest(format!("invalid task id {id}: {e}")))?;

        let mut task = server
            .worker
            .get_task(&task_id)
            .await
            .ok_or_else(|| ApiError::NotFound(format!("task {task_id} not found")))?;

        task.state = State::Completed;
        server.worker.add_task(task).await;
        info!(%task_id, "task queued to be stopped");
        Ok(StatusCode::NO_CONTENT)
    }

    async fn get_stats(AxumState(server): AxumState<TaskServer>) -> Json<Stats> {
        let mut stats = server.stats.read().await.clone();
        stats.task_count = server.worker.queue_depth();
        Json(stats)
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/tasks", get(TaskServer::get_tasks).post(TaskServer::start_task))
            .route("/tasks/{id}", delete(TaskServer::stop_task))
            .route("/stats", get(TaskServer::get_stats))
            .with_state(self.clone())
    }

    /// Serve until Ctrl-C.
    pub async fn start_server(self) -> std::io::Result<()> {
        let addr = format!("{}:{}", self.address, self.port);
        let listener = TcpListener::bind(&addr).await?;
        info!(%addr, worker = %self.worker.name, "task server listening");

        axum::serve(listener, self.router())
            .with_graceful_shutdown(async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    warn!(error = %e, "could not listen for shutdown signal");
                    std::future::pending::<()>().await;
                }
                info!("shutting down task server");
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, header};
    use http_body_util::BodyExt;
    use tokio::sync::RwLock;
    use tower::ServiceExt;

    use super::*;
    use crate::lib::tasks::{
        docker::Runtime,
        types::{Config, DockerAction, DockerResult},
    };

    struct OkRuntime;

    #[async_trait]
    impl Runtime for OkRuntime {
        async fn run(&self, config: &Config) -> DockerResult {
            DockerResult::success(format!("ctr-{}", config.name), DockerAction::Start)
        }

        async fn stop(&self, container_id: &str) -> DockerResult {
            DockerResult::success(container_id.to_string(), DockerAction::Remove)
        }
    }

    fn server() -> TaskServer {
        let worker = Arc::new(Worker::new("test", Arc::new(OkRuntime)));
        let stats = Arc::new(RwLock::new(Stats::default()));
        TaskServer::new(worker, stats, "127.0.0.1", 0)
    }

    fn post_json(body: String) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/tasks")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body))
            .unwrap()
    }

    fn event_body(task_id: Uuid, state: &str) -> String {
        serde_json::json!({
            "id": Uuid::new_v4(),
            "state": state,
            "task": {
                "id": task_id,
                "name": "web",
                "image": "nginx:latest",
                "state": state,
            }
        })
        .to_string()
    }

    async fn body_bytes(resp: Response) -> Vec<u8> {
        resp.into_body().collect().await.unwrap().to_bytes().to_vec()
    }

    #[tokio::test]
    async fn post_queues_task() {
        let server = server();
        let task_id = Uuid::new_v4();

        let resp = server
            .router()
            .oneshot(post_json(event_body(task_id, "Scheduled")))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);

        let task: Task = serde_json::from_slice(&body_bytes(resp).await).unwrap();
        assert_eq!(task.id, task_id);
        assert_eq!(task.state, State::Scheduled);
        assert_eq!(server.worker.queue_depth(), 1);
        assert!(server.worker.get_tasks().await.is_empty());
    }

    #[tokio::test]
    async fn post_with_unknown_field_is_rejected() {
        let server = server();
        let body = serde_json::json!({
            "id": Uuid::new_v4(),
            "task": {"id": Uuid::new_v4(), "image": "nginx"},
            "priority": "high",
        })
        .to_string();

        let resp = server.router().oneshot(post_json(body)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let err: ErrorResponse = serde_json::from_slice(&body_bytes(resp).await).unwrap();
        assert_eq!(err.http_status_code, 400);
        assert!(err.message.contains("failed to decode task event"));
        assert_eq!(server.worker.queue_depth(), 0);
        assert!(server.worker.get_tasks().await.is_empty());
    }

    #[tokio::test]
    async fn post_with_malformed_json_is_rejected() {
        let server = server();
        let resp = server
            .router()
            .oneshot(post_json("{not json".to_string()))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(server.worker.queue_depth(), 0);
    }

    #[tokio::test]
    async fn get_tasks_reflects_observed_store() {
        let server = server();
        let ids = [Uuid::new_v4(), Uuid::new_v4()];
        for id in ids {
            server
                .router()
                .oneshot(post_json(event_body(id, "Scheduled")))
                .await
                .unwrap();
        }
        server.worker.run_task().await;

        let resp = server
            .router()
            .oneshot(Request::get("/tasks").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let tasks: Vec<Task> = serde_json::from_slice(&body_bytes(resp).await).unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].id, ids[0]);
        assert_eq!(tasks[0].state, State::Running);
    }

    #[tokio::test]
    async fn delete_queues_completion() {
        let server = server();
        let task_id = Uuid::new_v4();
        server
            .router()
            .oneshot(post_json(event_body(task_id, "Scheduled")))
            .await
            .unwrap();
        server.worker.run_task().await;

        let resp = server
            .router()
            .oneshot(
                Request::delete(format!("/tasks/{task_id}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
        assert_eq!(server.worker.queue_depth(), 1);
        // Stopping happens in the reconciliation loop, not in the handler.
        assert_eq!(
            server.worker.get_task(&task_id).await.unwrap().state,
            State::Running
        );

        server.worker.run_task().await;
        let task = server.worker.get_task(&task_id).await.unwrap();
        assert_eq!(task.state, State::Completed);
        assert_eq!(task.container_id.as_deref(), Some("ctr-web"));
    }

    #[tokio::test]
    async fn delete_with_bad_id_is_rejected() {
        let server = server();
        let resp = server
            .router()
            .oneshot(Request::delete("/tasks/not-a-uuid").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let err: ErrorResponse = serde_json::from_slice(&body_bytes(resp).await).unwrap();
        assert_eq!(err.http_status_code, 400);
    }

    #[tokio::test]
    async fn delete_unknown_task_is_not_found() {
        let server = server();
        let resp = server
            .router()
            .oneshot(
                Request::delete(format!("/tasks/{}", Uuid::new_v4()))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let err: ErrorResponse = serde_json::from_slice(&body_bytes(resp).await).unwrap();
        assert_eq!(err.http_status_code, 404);
        assert_eq!(server.worker.queue_depth(), 0);
    }

    #[tokio::test]
    async fn stats_report_queue_depth() {
        let server = server();
        *server.stats.write().await = Stats {
            total_memory: 2048,
            available_memory: 512,
            used_memory: 1536,
            ..Default::default()
        };
        server
            .router()
            .oneshot(post_json(event_body(Uuid::new_v4(), "Scheduled")))
            .await
            .unwrap();

        let resp = server
            .router()
            .oneshot(Request::get("/stats").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let stats: Stats = serde_json::from_slice(&body_bytes(resp).await).unwrap();
        assert_eq!(stats.used_memory, 1536);
        assert_eq!(stats.task_count, 1);
    }
}
