//!
//! # Task System
//!
//! A long-lived pool of workers executing long-running tasks, each one to completion on a
//! single worker.
//!
//! Bring your own unified error type and dispatch some tasks, the system will handle enqueueing,
//! concurrent execution and error handling for you. Aside from some niceties like:
//! - A fixed number of workers, defaulting to the available CPU cores on the user machine;
//! - Cooperative cancellation, tasks check an [`Interrupter`] at their own safe points;
//! - Tasks canceled before a worker picks them up never run;
//! - Panics inside a task are caught and reported through the task handle, the worker keeps going;
//! - When the system is shutdown, queued tasks are given back to their dispatchers, so the user can
//!   store them somewhere and dispatch them again later, while running tasks are asked to cancel;
//!
//!
//! ## Basic example
//!
//! ```
//! use al_task_system::{
//!     ExecStatus, Interrupter, Task, TaskId, TaskOutput, TaskStatus, TaskSystem,
//! };
//! use async_trait::async_trait;
//! use thiserror::Error;
//!
//! #[derive(Debug, Error)]
//! #[error("chunk {0} failed")]
//! pub struct ChunkError(usize);
//!
//! #[derive(Debug)]
//! pub struct ChunkedTask {
//!     id: TaskId,
//!     chunks: usize,
//!     done: usize,
//! }
//!
//! #[async_trait]
//! impl Task<ChunkError> for ChunkedTask {
//!     fn id(&self) -> TaskId {
//!         self.id
//!     }
//!
//!     async fn run(&mut self, interrupter: &Interrupter) -> Result<ExecStatus, ChunkError> {
//!         while self.done < self.chunks {
//!             if interrupter.is_canceled() {
//!                 return Ok(ExecStatus::Canceled);
//!             }
//!             self.done += 1;
//!         }
//!         Ok(ExecStatus::Done(TaskOutput::Empty))
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let system = TaskSystem::<ChunkError>::new(2);
//!
//!     let task = ChunkedTask { id: TaskId::new_v4(), chunks: 4, done: 0 };
//!     let handle = system.dispatch(task).await.unwrap();
//!
//!     assert!(matches!(handle.await, Ok(TaskStatus::Done((_, TaskOutput::Empty)))));
//!
//!     system.shutdown().await;
//! }
//! ```

#![warn(
	clippy::all,
	clippy::pedantic,
	clippy::correctness,
	clippy::perf,
	clippy::style,
	clippy::suspicious,
	clippy::complexity,
	clippy::nursery,
	clippy::unwrap_used,
	unused_qualifications,
	rust_2018_idioms,
	trivial_casts,
	trivial_numeric_casts,
	unused_allocation,
	clippy::unnecessary_cast,
	clippy::cast_lossless,
	clippy::cast_possible_truncation,
	clippy::cast_possible_wrap,
	clippy::cast_precision_loss,
	clippy::cast_sign_loss,
	clippy::dbg_macro,
	clippy::deprecated_cfg_attr,
	clippy::separated_literal_suffix,
	deprecated
)]
#![forbid(deprecated_in_future)]
#![allow(clippy::missing_errors_doc, clippy::module_name_repetitions)]

mod error;
mod system;
mod task;
mod worker;

pub use error::{DispatcherShutdownError, RunError, SystemError as TaskSystemError};
pub use system::System as TaskSystem;
pub use task::{
	AnyTaskOutput, ExecStatus, Interrupter, InterruptionKind, IntoAnyTaskOutput, IntoTask, Task,
	TaskHandle, TaskId, TaskOutput, TaskRemoteController, TaskStatus,
};
