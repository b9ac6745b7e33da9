//! Core model and crypto primitives shared by every axon crate.

pub mod client;
pub mod ether;
mod macros;
pub mod signing;
pub mod task;
pub mod vrf;

pub use client::{Client, ClientTask, ClientTaskStatus};
pub use task::{
    task_id_commitment, ChainTaskStatus, InferenceTask, TaskAbortReason, TaskError, TaskPatch,
    TaskStatus, TaskType,
};
