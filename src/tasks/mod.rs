//! Tasks: entity, type registry, progress reporting, and execution.

pub mod driver;
pub mod handlers;
pub mod model;
pub mod progress;
pub mod registry;

pub use driver::TaskRunner;
pub use model::{Task, TaskStatus, read_tasks};
pub use progress::Progress;
pub use registry::{DatastoreAware, Executable, Params, TaskRegistry};
