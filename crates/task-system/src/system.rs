use std::{mem, sync::Arc};

use futures_concurrency::future::Join;
use tokio::{spawn, sync::Mutex, task::JoinHandle};
use tracing::{error, info, trace, warn};

use super::{
	error::{DispatcherShutdownError, RunError},
	task::{IntoTask, Task, TaskHandle, TaskWorkState},
	worker::WorkerPool,
};

/// The task system is the main entry point of the library, it spawns a fixed number of workers
/// pulling tasks from a shared queue.
pub struct System<E: RunError> {
	pool: Arc<WorkerPool<E>>,
	workers_count: usize,
	handles: Mutex<Vec<JoinHandle<()>>>,
	dispatcher: Dispatcher<E>,
}

impl<E: RunError> System<E> {
	/// Spawns `workers_count` workers, at least one
	#[must_use]
	pub fn new(workers_count: usize) -> Self {
		let workers_count = workers_count.max(1);
		let pool = Arc::new(WorkerPool::new());

		let handles = (0..workers_count)
			.map(|worker_id| {
				let pool = Arc::clone(&pool);

				spawn(async move {
					while let Err(e) = spawn(Arc::clone(&pool).run(worker_id)).await {
						if e.is_panic() {
							error!(%worker_id, ?e, "Worker panicked, restarting");
						} else {
							error!(%worker_id, ?e, "Worker failed, restarting");
						}
					}
				})
			})
			.collect();

		info!(%workers_count, "Task system started");

		Self {
			dispatcher: Dispatcher {
				pool: Arc::clone(&pool),
			},
			pool,
			workers_count,
			handles: Mutex::new(handles),
		}
	}

	#[must_use]
	pub const fn workers_count(&self) -> usize {
		self.workers_count
	}

	pub async fn dispatch(
		&self,
		into_task: impl IntoTask<E>,
	) -> Result<TaskHandle<E>, DispatcherShutdownError<E>> {
		self.dispatcher.dispatch(into_task).await
	}

	pub async fn dispatch_many(
		&self,
		into_tasks: impl IntoIterator<Item = impl IntoTask<E>> + Send,
	) -> Result<Vec<TaskHandle<E>>, DispatcherShutdownError<E>> {
		self.dispatcher.dispatch_many(into_tasks).await
	}

	/// Queued tasks come back through their handles as [`TaskStatus::Shutdown`](crate::TaskStatus::Shutdown),
	/// running tasks are asked to cancel and we wait for every worker to exit.
	pub async fn shutdown(&self) {
		let handles = mem::take(&mut *self.handles.lock().await);

		if handles.is_empty() {
			warn!("Trying to shutdown the tasks system that was already shutdown");
			return;
		}

		self.pool.begin_shutdown().await;

		for res in handles.join().await {
			if let Err(e) = res {
				error!(?e, "Task system failed to shutdown on worker handle await");
			}
		}

		trace!("Task system shutdown complete");
	}
}

pub struct Dispatcher<E: RunError> {
	pool: Arc<WorkerPool<E>>,
}

impl<E: RunError> Dispatcher<E> {
	pub async fn dispatch(
		&self,
		into_task: impl IntoTask<E>,
	) -> Result<TaskHandle<E>, DispatcherShutdownError<E>> {
		self.dispatch_boxed(into_task.into_task()).await
	}

	async fn dispatch_boxed(
		&self,
		task: Box<dyn Task<E>>,
	) -> Result<TaskHandle<E>, DispatcherShutdownError<E>> {
		if self.pool.is_shutting_down() {
			return Err(DispatcherShutdownError(vec![task]));
		}

		let (work, handle) = TaskWorkState::new(task);

		trace!(task_id = %handle.task_id(), "Dispatching task");

		self.pool
			.queue_tx
			.send(work)
			.await
			.map_err(|chan_err| DispatcherShutdownError(vec![chan_err.0.task]))?;

		Ok(handle)
	}

	pub async fn dispatch_many(
		&self,
		into_tasks: impl IntoIterator<Item = impl IntoTask<E>> + Send,
	) -> Result<Vec<TaskHandle<E>>, DispatcherShutdownError<E>> {
		let mut tasks = into_tasks
			.into_iter()
			.map(IntoTask::into_task)
			.collect::<Vec<_>>()
			.into_iter();

		let mut handles = Vec::with_capacity(tasks.len());

		while let Some(task) = tasks.next() {
			match self.dispatch_boxed(task).await {
				Ok(handle) => handles.push(handle),
				Err(DispatcherShutdownError(mut not_dispatched)) => {
					not_dispatched.extend(tasks);
					return Err(DispatcherShutdownError(not_dispatched));
				}
			}
		}

		Ok(handles)
	}
}
