//! Contracts of the external models: the embedder, the detector trainer and the detector.
//!
//! They are opaque to the core, which only relies on the shapes below and on their errors
//! carrying a human readable message.

use crate::{
	domain::{Annotation, BoundingBox, Class, ItemId, ModelHandle, ProjectId},
	job::JobRecord,
};

use al_task_system::Interrupter;

use std::{
	path::{Path, PathBuf},
	sync::Arc,
};

use async_trait::async_trait;
use tracing::warn;

/// Failure of an external model, its message is kept verbatim in the failed job's report
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct ExternalError {
	message: String,
}

impl ExternalError {
	pub fn new(message: impl Into<String>) -> Self {
		Self {
			message: message.into(),
		}
	}

	#[must_use]
	pub fn message(&self) -> &str {
		&self.message
	}
}

#[derive(Debug, thiserror::Error)]
pub enum ModelError {
	/// Stopped at a checkpoint after a cancellation request
	#[error("canceled at checkpoint")]
	Canceled,
	#[error(transparent)]
	External(#[from] ExternalError),
}

#[async_trait]
pub trait Embedder: Send + Sync + 'static {
	/// Length of every vector, fixed for a given model configuration
	fn dimension(&self) -> usize;

	async fn embed(&self, content: &Path) -> Result<Vec<f32>, ExternalError>;

	/// One vector per path, in order
	async fn embed_batch(&self, contents: &[PathBuf]) -> Result<Vec<Vec<f32>>, ExternalError> {
		let mut vectors = Vec::with_capacity(contents.len());
		for content in contents {
			vectors.push(self.embed(content).await?);
		}
		Ok(vectors)
	}
}

#[derive(Debug, Clone)]
pub struct TrainingSample {
	pub item_id: ItemId,
	pub content_path: PathBuf,
	pub annotations: Vec<Annotation>,
}

#[derive(Debug, Clone)]
pub struct TrainingRequest {
	pub project_id: ProjectId,
	pub samples: Vec<TrainingSample>,
	pub classes: Vec<Class>,
	pub epochs: u32,
	pub batch_size: u32,
}

#[async_trait]
pub trait Trainer: Send + Sync + 'static {
	/// Must call [`Checkpoint::step`] between epochs, that's where cancellation happens
	async fn train(
		&self,
		request: &TrainingRequest,
		checkpoint: &Checkpoint<'_>,
	) -> Result<ModelHandle, ModelError>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectionParams {
	pub confidence_threshold: f32,
	pub iou_threshold: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
	pub class_index: usize,
	pub bbox: BoundingBox,
	pub confidence: f32,
}

#[async_trait]
pub trait Detector: Send + Sync + 'static {
	async fn detect(
		&self,
		model: &ModelHandle,
		content: &Path,
		params: &DetectionParams,
	) -> Result<Vec<Detection>, ExternalError>;
}

/// The three collaborators a workbench drives
#[derive(Clone)]
pub struct Models {
	pub embedder: Arc<dyn Embedder>,
	pub trainer: Arc<dyn Trainer>,
	pub detector: Arc<dyn Detector>,
}

/// Safe point handed to long running external work, reports structured progress on the job
/// record and tells the work to stop once cancellation was requested
pub struct Checkpoint<'a> {
	interrupter: &'a Interrupter,
	record: &'a JobRecord,
}

impl<'a> Checkpoint<'a> {
	pub(crate) const fn new(interrupter: &'a Interrupter, record: &'a JobRecord) -> Self {
		Self {
			interrupter,
			record,
		}
	}

	#[must_use]
	pub fn is_canceled(&self) -> bool {
		self.interrupter.is_canceled()
	}

	/// Records `(current, total)` progress, then fails with [`ModelError::Canceled`] if the job
	/// should stop
	pub async fn step(&self, current: u64, total: u64) -> Result<(), ModelError> {
		if let Err(e) = self.record.progress(current, total).await {
			warn!(?e, "Failed to record job progress");
		}

		if self.is_canceled() {
			return Err(ModelError::Canceled);
		}

		Ok(())
	}

	/// Free form status line shown beside the progress, e.g. the last epoch's loss
	pub async fn message(&self, message: impl Into<String> + Send) {
		let message = message.into();
		if let Err(e) = self
			.record
			.update(|report| report.message = message)
			.await
		{
			warn!(?e, "Failed to record job message");
		}
	}
}
