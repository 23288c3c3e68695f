use std::{
	fmt,
	future::{Future, IntoFuture},
	pin::Pin,
	sync::{
		atomic::{AtomicBool, Ordering},
		Arc,
	},
	task::{Context, Poll},
};

use async_trait::async_trait;
use downcast_rs::{impl_downcast, Downcast};
use futures::future::BoxFuture;
use tokio::sync::{oneshot, Notify};
use tracing::{instrument, trace};
use uuid::Uuid;

use super::error::{RunError, SystemError};

/// A unique identifier for a task using the [`uuid`](https://docs.rs/uuid) crate.
pub type TaskId = Uuid;

/// A trait that represents any kind of output that a task can return.
///
/// The user will downcast it to the concrete type that the task returns. Most of the time,
/// tasks will not return anything, so it isn't a costly abstraction, as only a heap allocation
/// is needed when the user wants to return a [`Box<dyn AnyTaskOutput>`].
pub trait AnyTaskOutput: Send + Downcast + 'static {}

impl fmt::Debug for Box<dyn AnyTaskOutput> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "<AnyTaskOutput>")
	}
}

impl_downcast!(AnyTaskOutput);

impl<T: Send + 'static> AnyTaskOutput for T {}

/// A helper trait to convert any type that implements [`AnyTaskOutput`] into a [`TaskOutput`], boxing it.
pub trait IntoAnyTaskOutput {
	fn into_output(self) -> TaskOutput;
}

impl<T: AnyTaskOutput + 'static> IntoAnyTaskOutput for T {
	fn into_output(self) -> TaskOutput {
		TaskOutput::Out(Box::new(self))
	}
}

/// An enum representing whether a task returned anything or not.
#[derive(Debug)]
pub enum TaskOutput {
	Out(Box<dyn AnyTaskOutput>),
	Empty,
}

impl From<()> for TaskOutput {
	fn from((): ()) -> Self {
		Self::Empty
	}
}

/// An enum representing all possible outcomes for a task.
#[derive(Debug)]
pub enum TaskStatus<E: RunError> {
	/// The task has finished successfully and maybe has some output for the user.
	Done((TaskId, TaskOutput)),
	/// Task was gracefully cancelled, either before starting or at one of its safe points.
	Canceled,
	/// The task system was shutdown before the task started, we give it back so the user can
	/// downcast it to the concrete type and dispatch it again later.
	Shutdown(Box<dyn Task<E>>),
	/// Task had an error so we return it back and the user can handle it appropriately.
	Error(E),
}

/// Represents whether the [`Task::run`] method on a task finished successfully or was interrupted.
#[derive(Debug)]
pub enum ExecStatus {
	Done(TaskOutput),
	Canceled,
}

/// A helper trait to convert any type that implements [`Task<E>`] into a [`Box<dyn Task<E>>`], boxing it.
pub trait IntoTask<E>: Send {
	fn into_task(self) -> Box<dyn Task<E>>;
}

impl<T: Task<E> + 'static, E: RunError> IntoTask<E> for T {
	fn into_task(self) -> Box<dyn Task<E>> {
		Box::new(self)
	}
}

/// The main trait that represents a task that can be dispatched to the task system.
///
/// All tasks in a system must return the same generic error type, so we can have a unified
/// error handling.
#[async_trait]
pub trait Task<E: RunError>: Downcast + Send + Sync + 'static {
	/// An unique identifier for the task, used to identify it on the system and also to the user.
	fn id(&self) -> TaskId;

	/// The work itself, called once by the worker that picked the task up.
	///
	/// The [`interrupter`](Interrupter) tells the task whether a cancel was requested, so the
	/// task can choose a safe point to stop and avoid leaving inconsistent state behind.
	async fn run(&mut self, interrupter: &Interrupter) -> Result<ExecStatus, E>;
}

impl_downcast!(Task<E> where E: RunError);

impl<E: RunError> fmt::Debug for Box<dyn Task<E>> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "<Task>")
	}
}

/// Shared state between a task handle, its remote controllers and the worker running it.
#[derive(Debug, Default)]
pub(crate) struct TaskWorktable {
	is_running: AtomicBool,
	is_done: AtomicBool,
	has_canceled: AtomicBool,
	notify: Notify,
}

impl TaskWorktable {
	pub fn set_running(&self) {
		self.is_running.store(true, Ordering::Release);
	}

	pub fn set_done(&self) {
		self.is_running.store(false, Ordering::Release);
		self.is_done.store(true, Ordering::Release);
	}

	pub fn cancel(&self) {
		self.has_canceled.store(true, Ordering::Release);
		self.notify.notify_waiters();
	}

	pub fn has_canceled(&self) -> bool {
		self.has_canceled.load(Ordering::Acquire)
	}

	pub fn is_running(&self) -> bool {
		self.is_running.load(Ordering::Acquire)
	}

	pub fn is_done(&self) -> bool {
		self.is_done.load(Ordering::Acquire)
	}
}

/// The kind of interruption that can be requested by the user
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptionKind {
	Cancel,
}

/// A helper object that can be used to check if the user requested a cancel, so the task `run`
/// implementation can decide the appropriated moment to stop.
#[derive(Debug)]
pub struct Interrupter {
	worktable: Arc<TaskWorktable>,
}

impl Interrupter {
	pub(crate) const fn new(worktable: Arc<TaskWorktable>) -> Self {
		Self { worktable }
	}

	/// Check in a non-blocking manner if an interruption was requested
	#[must_use]
	pub fn try_check_interrupt(&self) -> Option<InterruptionKind> {
		self.worktable
			.has_canceled()
			.then_some(InterruptionKind::Cancel)
	}

	#[must_use]
	pub fn is_canceled(&self) -> bool {
		self.worktable.has_canceled()
	}
}

/// Awaiting an [`Interrupter`] resolves once an interruption is requested, which makes it
/// usable inside a `select!` against the actual work of the task.
impl<'a> IntoFuture for &'a Interrupter {
	type Output = InterruptionKind;

	type IntoFuture = BoxFuture<'a, InterruptionKind>;

	fn into_future(self) -> Self::IntoFuture {
		Box::pin(async move {
			loop {
				let notified = self.worktable.notify.notified();
				if let Some(kind) = self.try_check_interrupt() {
					trace!(?kind, "Interrupter received interruption request");
					return kind;
				}
				notified.await;
			}
		})
	}
}

#[macro_export]
macro_rules! check_interruption {
	($interrupter:ident) => {
		let interrupter: &$crate::Interrupter = $interrupter;

		match interrupter.try_check_interrupt() {
			Some($crate::InterruptionKind::Cancel) => {
				::tracing::trace!("Task was canceled by the user");
				return Ok($crate::ExecStatus::Canceled);
			}
			None => { /* Everything is Awesome! */ }
		}
	};
}

/// A remote controller of a task, cheap to clone and usable from synchronous code.
#[derive(Debug, Clone)]
pub struct TaskRemoteController {
	pub(crate) worktable: Arc<TaskWorktable>,
	pub(crate) task_id: TaskId,
}

impl TaskRemoteController {
	#[must_use]
	pub const fn task_id(&self) -> TaskId {
		self.task_id
	}

	/// Request a graceful cancel, honored at the next safe point defined by the task using the
	/// [`Interrupter`]. A task still waiting on the queue is dropped without running.
	#[instrument(skip(self), fields(task_id = %self.task_id))]
	pub fn cancel(&self) {
		if self.worktable.is_done() {
			trace!("Task is finalized, will not cancel");
			return;
		}

		trace!(
			is_running = self.worktable.is_running(),
			"Received cancel command task"
		);

		self.worktable.cancel();
	}

	#[must_use]
	pub fn is_done(&self) -> bool {
		self.worktable.is_done()
	}
}

/// A handle returned when a task is dispatched to the task system, it can be used to cancel
/// the task or await its completion.
#[derive(Debug)]
pub struct TaskHandle<E: RunError> {
	pub(crate) done_rx: oneshot::Receiver<Result<TaskStatus<E>, SystemError>>,
	pub(crate) controller: TaskRemoteController,
}

impl<E: RunError> Future for TaskHandle<E> {
	type Output = Result<TaskStatus<E>, SystemError>;

	fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
		let task_id = self.controller.task_id;
		Pin::new(&mut self.done_rx)
			.poll(cx)
			.map(|res| res.unwrap_or(Err(SystemError::TaskJoin(task_id))))
	}
}

impl<E: RunError> TaskHandle<E> {
	#[must_use]
	pub const fn task_id(&self) -> TaskId {
		self.controller.task_id
	}

	pub fn cancel(&self) {
		self.controller.cancel();
	}

	#[must_use]
	pub fn remote_controller(&self) -> TaskRemoteController {
		self.controller.clone()
	}
}

/// Everything a worker needs to run a task and report back to its handle
pub(crate) struct TaskWorkState<E: RunError> {
	pub task: Box<dyn Task<E>>,
	pub worktable: Arc<TaskWorktable>,
	pub done_tx: oneshot::Sender<Result<TaskStatus<E>, SystemError>>,
}

impl<E: RunError> TaskWorkState<E> {
	pub fn new(task: Box<dyn Task<E>>) -> (Self, TaskHandle<E>) {
		let worktable = Arc::new(TaskWorktable::default());
		let (done_tx, done_rx) = oneshot::channel();
		let task_id = task.id();

		(
			Self {
				task,
				worktable: Arc::clone(&worktable),
				done_tx,
			},
			TaskHandle {
				done_rx,
				controller: TaskRemoteController { worktable, task_id },
			},
		)
	}
}

pub(crate) fn report_status<E: RunError>(
	worktable: &TaskWorktable,
	done_tx: oneshot::Sender<Result<TaskStatus<E>, SystemError>>,
	status: Result<TaskStatus<E>, SystemError>,
) {
	worktable.set_done();
	if done_tx.send(status).is_err() {
		trace!("Task handle was dropped before the task finished");
	}
}
