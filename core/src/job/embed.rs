use crate::{domain::ProjectId, models::ExternalError};

use al_task_system::Interrupter;

use std::path::PathBuf;

use tracing::{debug, info, instrument};

use super::{
	task::{checkpoint, JobContext, Staged},
	JobError, JobOutput, JobRecord,
};

/// Embeds every item of the project missing from its index, `embedding.batch_size` items
/// between checkpoints. Items already indexed only get their marker repaired.
#[instrument(skip_all, err)]
pub(super) async fn run(
	ctx: &JobContext,
	record: &JobRecord,
	interrupter: &Interrupter,
	project_id: ProjectId,
) -> Result<Staged, JobError> {
	let items = ctx.store.list_items(project_id, None).await?;
	if items.is_empty() {
		return Err(JobError::NoItems);
	}

	let mut index = ctx.indexes.get(project_id).await?.read().await.clone();

	let (indexed, pending) = items
		.into_iter()
		.partition::<Vec<_>, _>(|item| index.contains(&item.id));

	let repaired = indexed
		.into_iter()
		.filter(|item| !item.has_embedding)
		.map(|item| item.id)
		.collect::<Vec<_>>();

	debug!(
		pending = pending.len(),
		repaired = repaired.len(),
		"Partitioned project items"
	);

	let total = pending.len() as u64;
	record.progress(0, total).await?;

	let batch_size = ctx.config.embedding.batch_size.max(1);
	let mut done = 0;

	for chunk in pending.chunks(batch_size) {
		checkpoint(interrupter)?;

		let paths = chunk
			.iter()
			.map(|item| item.content_path.clone())
			.collect::<Vec<PathBuf>>();

		let vectors = ctx.models.embedder.embed_batch(&paths).await?;
		if vectors.len() != chunk.len() {
			return Err(ExternalError::new(format!(
				"embedder returned {} vectors for {} items",
				vectors.len(),
				chunk.len()
			))
			.into());
		}

		let identities = chunk.iter().map(|item| item.id.as_str()).collect::<Vec<_>>();
		index.add(&vectors, &identities)?;

		done += chunk.len() as u64;
		record.progress(done, total).await?;
	}

	// Last chance to discard everything
	checkpoint(interrupter)?;

	if !pending.is_empty() {
		ctx.indexes.replace(project_id, index.clone()).await?;
	}

	info!(
		embedded = pending.len(),
		repaired = repaired.len(),
		indexed = index.len(),
		"Embedded project items"
	);

	let output = JobOutput::Embedded {
		embedded: pending.len(),
		repaired: repaired.len(),
		indexed: index.len(),
	};

	Ok(Staged::Embedded {
		marked: pending.into_iter().map(|item| item.id).chain(repaired).collect(),
		output,
	})
}
