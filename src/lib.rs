//! Task management core: persisted tasks, queue dispatch, RPC, and progress delivery.

pub mod bridge;
pub mod config;
pub mod error;
pub mod hub;
pub mod queue;
pub mod rpc;
pub mod store;
pub mod tasks;

pub use error::{Error, Result};
