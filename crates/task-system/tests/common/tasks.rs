use std::{
	sync::{
		atomic::{AtomicUsize, Ordering},
		Arc,
	},
	time::Duration,
};

use al_task_system::{
	check_interruption, ExecStatus, Interrupter, IntoAnyTaskOutput, Task, TaskId, TaskOutput,
};
use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::oneshot;

#[derive(Debug, Error)]
pub enum SampleError {
	#[error("Sample error")]
	SampleError,
}

/// Only finishes when canceled
#[derive(Debug)]
pub struct NeverTask {
	id: TaskId,
	started_tx: Option<oneshot::Sender<()>>,
}

impl NeverTask {
	pub fn new() -> (Self, oneshot::Receiver<()>) {
		let (started_tx, started_rx) = oneshot::channel();
		(
			Self {
				id: TaskId::new_v4(),
				started_tx: Some(started_tx),
			},
			started_rx,
		)
	}
}

#[async_trait]
impl Task<SampleError> for NeverTask {
	fn id(&self) -> TaskId {
		self.id
	}

	async fn run(&mut self, interrupter: &Interrupter) -> Result<ExecStatus, SampleError> {
		if let Some(started_tx) = self.started_tx.take() {
			started_tx.send(()).ok();
		}

		interrupter.await;

		Ok(ExecStatus::Canceled)
	}
}

#[derive(Debug)]
pub struct ReadyTask {
	id: TaskId,
}

impl Default for ReadyTask {
	fn default() -> Self {
		Self {
			id: TaskId::new_v4(),
		}
	}
}

#[async_trait]
impl Task<SampleError> for ReadyTask {
	fn id(&self) -> TaskId {
		self.id
	}

	async fn run(&mut self, _interrupter: &Interrupter) -> Result<ExecStatus, SampleError> {
		Ok(ExecStatus::Done(TaskOutput::Empty))
	}
}

#[derive(Debug)]
pub struct BrokenTask {
	id: TaskId,
}

impl Default for BrokenTask {
	fn default() -> Self {
		Self {
			id: TaskId::new_v4(),
		}
	}
}

#[async_trait]
impl Task<SampleError> for BrokenTask {
	fn id(&self) -> TaskId {
		self.id
	}

	async fn run(&mut self, _interrupter: &Interrupter) -> Result<ExecStatus, SampleError> {
		Err(SampleError::SampleError)
	}
}

#[derive(Debug)]
pub struct PanicTask {
	id: TaskId,
}

impl Default for PanicTask {
	fn default() -> Self {
		Self {
			id: TaskId::new_v4(),
		}
	}
}

#[async_trait]
impl Task<SampleError> for PanicTask {
	fn id(&self) -> TaskId {
		self.id
	}

	async fn run(&mut self, _interrupter: &Interrupter) -> Result<ExecStatus, SampleError> {
		panic!("Task panicked on purpose");
	}
}

/// Counts up to `steps`, checking for interruptions between each step, and outputs the count
#[derive(Debug)]
pub struct CountingTask {
	id: TaskId,
	steps: usize,
	pub counter: Arc<AtomicUsize>,
}

impl CountingTask {
	pub fn new(steps: usize) -> Self {
		Self {
			id: TaskId::new_v4(),
			steps,
			counter: Arc::new(AtomicUsize::new(0)),
		}
	}
}

#[async_trait]
impl Task<SampleError> for CountingTask {
	fn id(&self) -> TaskId {
		self.id
	}

	async fn run(&mut self, interrupter: &Interrupter) -> Result<ExecStatus, SampleError> {
		for _ in 0..self.steps {
			check_interruption!(interrupter);
			tokio::time::sleep(Duration::from_millis(1)).await;
			self.counter.fetch_add(1, Ordering::SeqCst);
		}

		Ok(ExecStatus::Done(
			self.counter.load(Ordering::SeqCst).into_output(),
		))
	}
}
