use crate::{
	config::WorkbenchConfig,
	domain::{Annotation, Item, ItemId, ModelHandle, ProjectId},
	index::IndexRegistry,
	models::{Detection, Models},
	store::{Store, StoreError},
	workflow::{advance_item, advance_project, ItemStage, ProjectLocks, ProjectStage, Transition},
};

use al_task_system::{ExecStatus, Interrupter, Task, TaskId, TaskOutput};

use std::{future::IntoFuture, sync::Arc};

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, error, info, instrument, trace};

use super::{
	auto_annotate, embed, train, JobError, JobId, JobKind, JobOutput, JobRecord, JobRequest,
	JobStatus,
};

/// Everything a running job may touch
#[derive(Clone)]
pub(crate) struct JobContext {
	pub config: Arc<WorkbenchConfig>,
	pub store: Arc<dyn Store>,
	pub models: Models,
	pub indexes: Arc<IndexRegistry>,
	pub locks: Arc<ProjectLocks>,
}

/// What a job body produced, applied by the commit
pub(super) enum Staged {
	Embedded {
		/// Items whose "has embedding" marker must be set
		marked: Vec<ItemId>,
		output: JobOutput,
	},
	Trained {
		model: ModelHandle,
		output: JobOutput,
	},
	AutoAnnotated {
		detections: Vec<(ItemId, Vec<Detection>)>,
		finalize: bool,
	},
}

/// Fails with [`JobError::Canceled`] once cancellation was requested
pub(super) fn checkpoint(interrupter: &Interrupter) -> Result<(), JobError> {
	if interrupter.try_check_interrupt().is_some() {
		trace!("Job reached a checkpoint after a cancellation request");
		return Err(JobError::Canceled);
	}

	Ok(())
}

pub(super) struct JobTask {
	id: JobId,
	project_id: ProjectId,
	request: JobRequest,
	record: JobRecord,
	ctx: JobContext,
}

impl JobTask {
	pub(super) const fn new(
		id: JobId,
		project_id: ProjectId,
		request: JobRequest,
		record: JobRecord,
		ctx: JobContext,
	) -> Self {
		Self {
			id,
			project_id,
			request,
			record,
			ctx,
		}
	}

	/// Validate transition, do the external work and commit, all under the project's stage lock
	async fn execute(&self, interrupter: &Interrupter) -> Result<(), JobError> {
		let stage_lock = self.ctx.locks.stage(self.project_id).await;

		let _stage_guard = tokio::select! {
			biased;

			_ = interrupter.into_future() => return Err(JobError::Canceled),
			guard = stage_lock.lock() => guard,
		};

		let res = self.advance_and_run(interrupter).await;

		if res.is_err() {
			if let Err(e) = rollback_stage(&self.ctx, self.project_id, self.request.kind()).await {
				error!(?e, "Failed to move the project back to its resting stage");
			}
		}

		res
	}

	async fn advance_and_run(&self, interrupter: &Interrupter) -> Result<(), JobError> {
		let kind = self.request.kind();

		let mut project = self.ctx.store.get_project(self.project_id).await?;
		if advance_project(project.stage, kind.active_stage())? == Transition::Changed {
			project.stage = kind.active_stage();
			self.ctx.store.update_project(&project).await?;
		}

		self.record
			.update(|report| {
				report.status = JobStatus::Running;
				report.started_at = Some(Utc::now());
			})
			.await?;

		info!(stage = %project.stage, "Job started");

		let staged = match self.request {
			JobRequest::Embed => {
				embed::run(&self.ctx, &self.record, interrupter, self.project_id).await?
			}
			JobRequest::Train(params) => {
				train::run(&self.ctx, &self.record, interrupter, &project, params).await?
			}
			JobRequest::AutoAnnotate(params) => {
				auto_annotate::run(&self.ctx, &self.record, interrupter, &project, params).await?
			}
		};

		self.commit(staged).await
	}

	/// Applies the staged results together with the project's next stage and the succeeded
	/// report, re-reading items under the items lock so concurrent manual changes win
	async fn commit(&self, staged: Staged) -> Result<(), JobError> {
		let items_lock = self.ctx.locks.items(self.project_id).await;
		let _items_guard = items_lock.lock().await;

		let mut project = self.ctx.store.get_project(self.project_id).await?;

		let (target, items, annotations, output) = match staged {
			Staged::Embedded { marked, output } => {
				let mut items = Vec::with_capacity(marked.len());
				for item_id in &marked {
					let mut item = self.ctx.store.get_item(self.project_id, item_id).await?;
					item.has_embedding = true;
					items.push(item);
				}

				(ProjectStage::Annotating, items, vec![], output)
			}

			Staged::Trained { model, output } => {
				project.latest_model = Some(model);
				(ProjectStage::Annotating, vec![], vec![], output)
			}

			Staged::AutoAnnotated {
				detections,
				finalize,
			} => {
				let (items, annotations, output) = self.stage_auto_annotations(detections).await?;
				let target = if finalize {
					ProjectStage::Completed
				} else {
					ProjectStage::Annotating
				};

				(target, items, annotations, output)
			}
		};

		advance_project(project.stage, target)?;
		project.stage = target;

		self.record
			.succeed(output, project, items, annotations)
			.await?;

		info!(to = %target, "Job committed");

		Ok(())
	}

	async fn stage_auto_annotations(
		&self,
		detections: Vec<(ItemId, Vec<Detection>)>,
	) -> Result<(Vec<Item>, Vec<(ItemId, Vec<Annotation>)>, JobOutput), JobError> {
		let mut items = Vec::with_capacity(detections.len());
		let mut annotations = Vec::with_capacity(detections.len());
		let mut skipped = 0;
		let mut annotation_count = 0;

		for (item_id, item_detections) in detections {
			let mut item = self.ctx.store.get_item(self.project_id, &item_id).await?;

			if advance_item(item.stage, ItemStage::AutoAnnotated).is_err() {
				debug!(%item_id, stage = %item.stage, "Item left unlabeled meanwhile, skipping");
				skipped += 1;
				continue;
			}

			item.stage = ItemStage::AutoAnnotated;
			item.confidence = mean_confidence(&item_detections);

			annotation_count += item_detections.len();
			annotations.push((
				item_id.clone(),
				item_detections
					.into_iter()
					.map(|detection| {
						Annotation::auto(
							item_id.clone(),
							detection.class_index,
							detection.bbox,
							detection.confidence,
						)
					})
					.collect(),
			));
			items.push(item);
		}

		let output = JobOutput::AutoAnnotated {
			items: items.len(),
			annotations: annotation_count,
			skipped,
		};

		Ok((items, annotations, output))
	}
}

/// Moves a project left in the active stage of `kind` back to that kind's resting stage.
///
/// Callers must hold the project's stage lock, or run before any job was dispatched.
pub(super) async fn rollback_stage(
	ctx: &JobContext,
	project_id: ProjectId,
	kind: JobKind,
) -> Result<Transition, StoreError> {
	let mut project = match ctx.store.get_project(project_id).await {
		Ok(project) => project,
		// Deleted meanwhile, nothing to roll back
		Err(StoreError::ProjectNotFound(_)) => return Ok(Transition::Unchanged),
		Err(e) => return Err(e),
	};

	if project.stage != kind.active_stage() {
		return Ok(Transition::Unchanged);
	}

	project.stage = kind.resting_stage();
	ctx.store.update_project(&project).await?;

	debug!(stage = %project.stage, "Moved project back to its resting stage");

	Ok(Transition::Changed)
}

#[allow(clippy::cast_precision_loss)]
fn mean_confidence(detections: &[Detection]) -> Option<f32> {
	(!detections.is_empty()).then(|| {
		detections
			.iter()
			.map(|detection| detection.confidence)
			.sum::<f32>()
			/ detections.len() as f32
	})
}

#[async_trait]
impl Task<JobError> for JobTask {
	fn id(&self) -> TaskId {
		self.id.into()
	}

	#[instrument(
		skip_all,
		fields(job_id = %self.id, project_id = %self.project_id, kind = %self.request.kind())
	)]
	async fn run(&mut self, interrupter: &Interrupter) -> Result<ExecStatus, JobError> {
		match self.execute(interrupter).await {
			Ok(()) => Ok(ExecStatus::Done(TaskOutput::Empty)),

			Err(JobError::Canceled) => {
				info!("Job canceled, discarding its partial results");
				self.record.finish(JobStatus::Cancelled, None).await;
				Ok(ExecStatus::Canceled)
			}

			Err(e) => {
				error!(%e, "Job failed");
				self.record
					.finish(JobStatus::Failed, Some(e.to_string()))
					.await;
				Err(e)
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	use crate::domain::BoundingBox;

	#[test]
	fn mean_confidence_of_detections() {
		let detection = |confidence| Detection {
			class_index: 0,
			bbox: BoundingBox::new(0.5, 0.5, 0.1, 0.1),
			confidence,
		};

		assert_eq!(mean_confidence(&[]), None);

		let mean = mean_confidence(&[detection(0.5), detection(0.9)]).unwrap();
		assert!((mean - 0.7).abs() < 1e-6);
	}
}
