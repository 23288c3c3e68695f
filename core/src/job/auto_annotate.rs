use crate::{domain::Project, models::DetectionParams, workflow::ItemStage};

use al_task_system::Interrupter;

use tracing::{debug, info, instrument};

use super::{
	task::{checkpoint, JobContext, Staged},
	AutoAnnotateParams, JobError, JobRecord,
};

/// Runs the latest model over every unlabeled item. Detections are only staged here, nothing
/// is written before every item went through.
#[instrument(skip_all, fields(threshold = params.confidence_threshold), err)]
pub(super) async fn run(
	ctx: &JobContext,
	record: &JobRecord,
	interrupter: &Interrupter,
	project: &Project,
	params: AutoAnnotateParams,
) -> Result<Staged, JobError> {
	let model = project
		.latest_model
		.clone()
		.ok_or(JobError::NoTrainedModel)?;

	let targets = ctx
		.store
		.list_items(project.id, Some(ItemStage::Unlabeled))
		.await?;

	let total = targets.len() as u64;
	record.progress(0, total).await?;

	let detection_params = DetectionParams {
		confidence_threshold: params.confidence_threshold,
		iou_threshold: params.iou_threshold,
	};

	let mut detections = Vec::with_capacity(targets.len());
	let mut done = 0;

	for item in targets {
		checkpoint(interrupter)?;

		let found = ctx
			.models
			.detector
			.detect(&model, &item.content_path, &detection_params)
			.await?;

		let kept = found
			.into_iter()
			.filter(|detection| {
				detection.confidence >= params.confidence_threshold
					&& detection.class_index < project.classes.len()
			})
			.collect::<Vec<_>>();

		debug!(item_id = %item.id, kept = kept.len(), "Detected objects");

		detections.push((item.id, kept));

		done += 1;
		record.progress(done, total).await?;
	}

	checkpoint(interrupter)?;

	info!(%model, items = detections.len(), "Auto annotation pass finished");

	Ok(Staged::AutoAnnotated {
		detections,
		finalize: params.finalize,
	})
}
