//! RPC surface for the `TaskRequests` service.
//!
//! Methods are addressed by name under one service (`TaskRequests.Enqueue`,
//! `TaskRequests.Get`, `TaskRequests.List`) and carried as JSON over HTTP.

pub mod client;
pub mod requests;
pub mod server;

use serde::{Deserialize, Serialize};

use crate::tasks::Params;

pub use client::TaskClient;
pub use requests::TaskRequests;
pub use server::rpc_routes;

pub const SERVICE_NAME: &str = "TaskRequests";

pub const METHOD_ENQUEUE: &str = "TaskRequests.Enqueue";
pub const METHOD_GET: &str = "TaskRequests.Get";
pub const METHOD_LIST: &str = "TaskRequests.List";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TasksEnqueueParams {
    #[serde(default)]
    pub title: String,
    #[serde(rename = "type")]
    pub task_type: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub params: Params,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TasksGetParams {
    pub id: String,
}

/// One page of tasks. `order_by` is advisory; `limit` 0 means no limit.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TasksListParams {
    #[serde(default)]
    pub order_by: String,
    #[serde(default)]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

/// Error body returned for any failed call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcErrorBody {
    pub error: String,
    pub kind: String,
}
