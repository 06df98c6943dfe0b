//! Client for the task RPC service.
//!
//! Every call opens a fresh connection. Connection failures surface as
//! `RpcError::Transport` and are retryable. Errors the service returns
//! surface as `RpcError::Remote`.

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use super::{
    METHOD_ENQUEUE, METHOD_GET, METHOD_LIST, RpcErrorBody, TasksEnqueueParams, TasksGetParams,
    TasksListParams,
};
use crate::error::RpcError;
use crate::tasks::{Params, Task};

#[derive(Debug, Clone)]
pub struct TaskClient {
    base_url: String,
    http: reqwest::Client,
}

impl TaskClient {
    /// `base_url` is the service root, e.g. `http://127.0.0.1:4400`.
    pub fn new(base_url: impl Into<String>) -> Result<Self, RpcError> {
        let http = reqwest::Client::builder()
            .pool_max_idle_per_host(0)
            .build()
            .map_err(|e| RpcError::Transport(e.to_string()))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
        })
    }

    pub async fn enqueue(
        &self,
        task_type: &str,
        title: &str,
        user_id: &str,
        params: Params,
    ) -> Result<Task, RpcError> {
        let params = TasksEnqueueParams {
            title: title.to_string(),
            task_type: task_type.to_string(),
            user_id: user_id.to_string(),
            params,
        };
        self.call(METHOD_ENQUEUE, &params).await
    }

    pub async fn get(&self, id: &str) -> Result<Task, RpcError> {
        self.call(METHOD_GET, &TasksGetParams { id: id.to_string() })
            .await
    }

    pub async fn list(
        &self,
        order_by: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Task>, RpcError> {
        let params = TasksListParams {
            order_by: order_by.to_string(),
            limit,
            offset,
        };
        self.call(METHOD_LIST, &params).await
    }

    /// List by 1-based page number.
    pub async fn list_page(&self, page: usize, page_size: usize) -> Result<Vec<Task>, RpcError> {
        self.list("", page_size, page_offset(page, page_size)).await
    }

    async fn call<P, R>(&self, method: &str, params: &P) -> Result<R, RpcError>
    where
        P: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let url = format!("{}/rpc/{method}", self.base_url);
        debug!(method = %method, "RPC request");

        let response = self
            .http
            .post(&url)
            .json(params)
            .send()
            .await
            .map_err(|e| RpcError::Transport(e.to_string()))?;

        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| RpcError::Transport(e.to_string()))?;

        if status.is_success() {
            return serde_json::from_slice(&bytes).map_err(|e| RpcError::Decode(e.to_string()));
        }

        match serde_json::from_slice::<RpcErrorBody>(&bytes) {
            Ok(body) => Err(RpcError::Remote {
                kind: body.kind,
                message: body.error,
            }),
            Err(_) => Err(RpcError::Decode(format!(
                "HTTP {status}: {}",
                String::from_utf8_lossy(&bytes)
            ))),
        }
    }
}

fn page_offset(page: usize, page_size: usize) -> usize {
    page.max(1).saturating_sub(1).saturating_mul(page_size)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_offsets() {
        assert_eq!(page_offset(1, 20), 0);
        assert_eq!(page_offset(3, 20), 40);
        assert_eq!(page_offset(0, 20), 0);
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let client = TaskClient::new("http://localhost:4400/").unwrap();
        assert_eq!(client.base_url, "http://localhost:4400");
    }

    #[tokio::test]
    async fn refused_connection_is_retryable() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = TaskClient::new(format!("http://{addr}")).unwrap();
        let err = client.get("x").await.unwrap_err();
        assert!(matches!(err, RpcError::Transport(_)));
        assert!(err.is_retryable());
    }
}
