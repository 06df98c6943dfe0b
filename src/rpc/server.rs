//! HTTP transport for `TaskRequests`: `POST /rpc/{method}` with a JSON body.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use super::requests::TaskRequests;
use super::{METHOD_ENQUEUE, METHOD_GET, METHOD_LIST, RpcErrorBody};
use crate::error::TaskError;

/// Build the router serving the task RPC methods.
pub fn rpc_routes(requests: TaskRequests) -> Router {
    Router::new()
        .route("/rpc/{method}", post(dispatch))
        .with_state(Arc::new(requests))
}

/// A failed call, rendered as a status code plus an error body.
struct RpcFailure {
    status: StatusCode,
    kind: String,
    message: String,
}

impl RpcFailure {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            kind: "bad_request".to_string(),
            message: message.into(),
        }
    }
}

impl From<TaskError> for RpcFailure {
    fn from(e: TaskError) -> Self {
        let status = match &e {
            TaskError::Validation { .. } | TaskError::UnknownType(_) => StatusCode::BAD_REQUEST,
            TaskError::NotFound { .. } => StatusCode::NOT_FOUND,
            TaskError::Queue(_) => StatusCode::BAD_GATEWAY,
            TaskError::Store(_) | TaskError::Execution { .. } | TaskError::ProgressClosed { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self {
            status,
            kind: e.kind().to_string(),
            message: e.to_string(),
        }
    }
}

impl IntoResponse for RpcFailure {
    fn into_response(self) -> Response {
        let body = RpcErrorBody {
            error: self.message,
            kind: self.kind,
        };
        (self.status, Json(body)).into_response()
    }
}

async fn dispatch(
    State(requests): State<Arc<TaskRequests>>,
    Path(method): Path<String>,
    body: axum::body::Bytes,
) -> Response {
    debug!(method = %method, "RPC call");

    let result = match method.as_str() {
        METHOD_ENQUEUE => match decode(&body) {
            Ok(params) => respond(requests.enqueue(params).await),
            Err(e) => Err(e),
        },
        METHOD_GET => match decode(&body) {
            Ok(params) => respond(requests.get(params).await),
            Err(e) => Err(e),
        },
        METHOD_LIST => match decode(&body) {
            Ok(params) => respond(requests.list(params).await),
            Err(e) => Err(e),
        },
        other => Err(RpcFailure {
            status: StatusCode::NOT_FOUND,
            kind: "unknown_method".to_string(),
            message: format!("rpc: can't find method {other}"),
        }),
    };

    match result {
        Ok(response) => response,
        Err(failure) => {
            warn!(method = %method, kind = %failure.kind, error = %failure.message, "RPC call failed");
            failure.into_response()
        }
    }
}

fn decode<T: DeserializeOwned>(body: &[u8]) -> Result<T, RpcFailure> {
    serde_json::from_slice(body).map_err(|e| RpcFailure::bad_request(format!("invalid params: {e}")))
}

fn respond<T: Serialize>(result: Result<T, TaskError>) -> Result<Response, RpcFailure> {
    result
        .map(|value| Json(value).into_response())
        .map_err(RpcFailure::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::QueueError;
    use crate::queue::{QueueMessage, TaskQueue};
    use crate::store::MemoryDatastore;
    use crate::tasks::TaskRegistry;
    use crate::tasks::handlers::register_builtin;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    struct NullQueue;

    #[async_trait]
    impl TaskQueue for NullQueue {
        async fn publish(&self, _message: &QueueMessage) -> Result<(), QueueError> {
            Ok(())
        }
    }

    fn app() -> Router {
        let mut registry = TaskRegistry::new();
        register_builtin(&mut registry);
        rpc_routes(TaskRequests::new(
            Arc::new(MemoryDatastore::new()),
            Arc::new(registry),
            Arc::new(NullQueue),
        ))
    }

    async fn call(app: Router, method: &str, body: &str) -> (StatusCode, Value) {
        let response = app
            .oneshot(
                Request::post(format!("/rpc/{method}"))
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn enqueue_returns_task() {
        let body = json!({"type": "echo", "title": "t", "userId": "u", "params": {"msg": "hi"}});
        let (status, task) = call(app(), METHOD_ENQUEUE, &body.to_string()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(task["type"], "echo");
        assert_eq!(task["userId"], "u");
        assert!(task["enqueued"].is_string());
    }

    #[tokio::test]
    async fn validation_error_is_bad_request() {
        let body = json!({"type": "nope", "params": {}});
        let (status, err) = call(app(), METHOD_ENQUEUE, &body.to_string()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(err["kind"], "validation");
    }

    #[tokio::test]
    async fn missing_task_is_not_found() {
        let (status, err) = call(app(), METHOD_GET, r#"{"id":"absent"}"#).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(err["kind"], "not_found");
    }

    #[tokio::test]
    async fn unknown_method_and_bad_params() {
        let (status, err) = call(app(), "TaskRequests.Cancel", "{}").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(err["kind"], "unknown_method");

        let (status, err) = call(app(), METHOD_GET, "not json").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(err["kind"], "bad_request");
    }
}
