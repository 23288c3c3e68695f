use std::{error::Error, fmt};

use thiserror::Error;

use super::task::{Task, TaskId};

/// Marker trait for the unified error type that every task of a system returns
pub trait RunError: Error + fmt::Debug + Send + Sync + 'static {}

impl<T: Error + fmt::Debug + Send + Sync + 'static> RunError for T {}

#[derive(Debug, Error)]
pub enum SystemError {
	#[error("task panicked while running <id='{0}'>")]
	TaskPanicked(TaskId),
	#[error("task was dropped by its worker without reporting back <id='{0}'>")]
	TaskJoin(TaskId),
}

/// Returned by dispatch attempts after the system started shutting down, it gives back the tasks
/// that couldn't be dispatched so they can be stored and dispatched again later.
#[derive(Debug, Error)]
#[error("task system is shutting down, {} task(s) were not dispatched", .0.len())]
pub struct DispatcherShutdownError<E: RunError>(pub Vec<Box<dyn Task<E>>>);
