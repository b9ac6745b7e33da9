//! The inference task lifecycle engine.
//!
//! [`TaskDriver`] runs one task from `Pending` to a terminal status,
//! mutating the chain and the store as it goes; [`Dispatcher`] scans
//! the store and runs one deadline-bounded worker per active task.

pub mod client_tasks;
pub mod dispatcher;
pub mod driver;
pub mod sink;

pub use dispatcher::Dispatcher;
pub use driver::{DriverConfig, DriverError, TaskDriver};
pub use sink::ResultSink;
