use crate::{
	domain::Project,
	models::{Checkpoint, TrainingRequest, TrainingSample},
	workflow::ItemStage,
};

use al_task_system::Interrupter;

use tracing::{info, instrument};

use super::{
	task::{checkpoint, JobContext, Staged},
	JobError, JobOutput, JobRecord, TrainParams,
};

/// Trains a detector on every annotated item, progress being reported per epoch by the trainer
#[instrument(skip_all, fields(epochs = params.epochs, batch_size = params.batch_size), err)]
pub(super) async fn run(
	ctx: &JobContext,
	record: &JobRecord,
	interrupter: &Interrupter,
	project: &Project,
	params: TrainParams,
) -> Result<Staged, JobError> {
	let annotated = ctx
		.store
		.list_items(project.id, Some(ItemStage::Annotated))
		.await?;

	let required = ctx.config.training.min_labeled_items;
	if annotated.len() < required {
		return Err(JobError::NotEnoughLabeledItems {
			found: annotated.len(),
			required,
		});
	}

	let mut samples = Vec::with_capacity(annotated.len());
	for item in annotated {
		let annotations = ctx.store.list_annotations(project.id, &item.id).await?;
		samples.push(TrainingSample {
			item_id: item.id,
			content_path: item.content_path,
			annotations,
		});
	}

	let request = TrainingRequest {
		project_id: project.id,
		samples,
		classes: project.classes.clone(),
		epochs: params.epochs,
		batch_size: params.batch_size,
	};

	record.progress(0, u64::from(params.epochs)).await?;

	let model = ctx
		.models
		.trainer
		.train(&request, &Checkpoint::new(interrupter, record))
		.await?;

	checkpoint(interrupter)?;

	info!(%model, samples = request.samples.len(), "Trained detector");

	Ok(Staged::Trained {
		output: JobOutput::Trained {
			model: model.clone(),
			samples: request.samples.len(),
			epochs: params.epochs,
		},
		model,
	})
}
