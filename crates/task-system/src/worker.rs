use std::{
	collections::HashMap,
	panic::AssertUnwindSafe,
	sync::{
		atomic::{AtomicBool, Ordering},
		Arc,
	},
};

use async_channel as chan;
use futures::FutureExt;
use tokio::sync::Mutex;
use tracing::{error, instrument, trace};

use super::{
	error::{RunError, SystemError},
	task::{
		report_status, ExecStatus, Interrupter, TaskId, TaskStatus, TaskWorkState, TaskWorktable,
	},
};

pub(crate) type WorkerId = usize;

/// State shared by every worker of a system and its dispatchers
pub(crate) struct WorkerPool<E: RunError> {
	pub queue_tx: chan::Sender<TaskWorkState<E>>,
	queue_rx: chan::Receiver<TaskWorkState<E>>,
	shutting_down: AtomicBool,
	running: Mutex<HashMap<TaskId, Arc<TaskWorktable>>>,
}

impl<E: RunError> WorkerPool<E> {
	pub fn new() -> Self {
		let (queue_tx, queue_rx) = chan::unbounded();

		Self {
			queue_tx,
			queue_rx,
			shutting_down: AtomicBool::new(false),
			running: Mutex::new(HashMap::new()),
		}
	}

	pub fn is_shutting_down(&self) -> bool {
		self.shutting_down.load(Ordering::SeqCst)
	}

	/// Stop accepting tasks and ask every running task to cancel. Tasks still on the queue are
	/// drained by the workers and given back as [`TaskStatus::Shutdown`].
	pub async fn begin_shutdown(&self) {
		self.shutting_down.store(true, Ordering::SeqCst);
		self.queue_tx.close();

		let running = self.running.lock().await;
		trace!(running_count = running.len(), "Canceling running tasks");
		for worktable in running.values() {
			worktable.cancel();
		}
	}

	/// Worker main loop, returns once the queue is closed and drained
	pub async fn run(self: Arc<Self>, worker_id: WorkerId) {
		while let Ok(work) = self.queue_rx.recv().await {
			self.process(worker_id, work).await;
		}

		trace!(%worker_id, "Worker queue closed, exiting");
	}

	#[instrument(skip(self, work), fields(task_id = %work.task.id()))]
	async fn process(&self, worker_id: WorkerId, work: TaskWorkState<E>) {
		let TaskWorkState {
			mut task,
			worktable,
			done_tx,
		} = work;

		let task_id = task.id();

		{
			let mut running = self.running.lock().await;
			// Checked under the lock so `begin_shutdown` either sees this task or we see its flag
			if self.is_shutting_down() {
				drop(running);
				trace!("System is shutting down, giving task back");
				report_status(&worktable, done_tx, Ok(TaskStatus::Shutdown(task)));
				return;
			}
			running.insert(task_id, Arc::clone(&worktable));
		}

		if worktable.has_canceled() {
			self.running.lock().await.remove(&task_id);
			trace!("Task was canceled before starting");
			report_status(&worktable, done_tx, Ok(TaskStatus::Canceled));
			return;
		}

		worktable.set_running();
		trace!("Running task");

		let interrupter = Interrupter::new(Arc::clone(&worktable));
		let res = AssertUnwindSafe(task.run(&interrupter))
			.catch_unwind()
			.await;

		self.running.lock().await.remove(&task_id);

		let status = match res {
			Ok(Ok(ExecStatus::Done(out))) => {
				trace!("Task done");
				Ok(TaskStatus::Done((task_id, out)))
			}
			Ok(Ok(ExecStatus::Canceled)) => {
				trace!("Task canceled");
				Ok(TaskStatus::Canceled)
			}
			Ok(Err(e)) => {
				trace!(?e, "Task failed");
				Ok(TaskStatus::Error(e))
			}
			Err(_) => {
				error!("Task panicked");
				Err(SystemError::TaskPanicked(task_id))
			}
		};

		report_status(&worktable, done_tx, status);
	}
}
