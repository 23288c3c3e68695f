//! One [`VectorIndex`] per project, loaded lazily and shared between jobs and selection.
//!
//! Readers take the index read lock for the whole of their pass. The embed job, the only
//! writer, builds its additions on a copy and swaps it in once saved, so readers never see a
//! half applied batch and a failed or canceled job leaves nothing behind.

use crate::{config::WorkbenchConfig, domain::ProjectId};

use al_utils::error::FileIOError;
use al_vector_index::VectorIndex;

use std::{collections::HashMap, sync::Arc};

use tokio::{
	fs,
	sync::{Mutex, RwLock},
	task::spawn_blocking,
};
use tracing::{debug, info, instrument};

#[derive(Debug, thiserror::Error)]
pub enum IndexError {
	#[error(transparent)]
	Index(#[from] al_vector_index::Error),
	#[error("index task failed: {0}")]
	Join(#[from] tokio::task::JoinError),
	#[error(transparent)]
	FileIO(#[from] FileIOError),
}

pub type SharedIndex = Arc<RwLock<VectorIndex>>;

#[derive(Debug)]
pub struct IndexRegistry {
	config: Arc<WorkbenchConfig>,
	dim: usize,
	indexes: Mutex<HashMap<ProjectId, SharedIndex>>,
}

impl IndexRegistry {
	#[must_use]
	pub fn new(config: Arc<WorkbenchConfig>, dim: usize) -> Self {
		Self {
			config,
			dim,
			indexes: Mutex::new(HashMap::new()),
		}
	}

	/// The project's index, loaded from disk on first use or empty if it was never saved
	#[instrument(skip(self), err)]
	pub async fn get(&self, project_id: ProjectId) -> Result<SharedIndex, IndexError> {
		let mut indexes = self.indexes.lock().await;

		if let Some(index) = indexes.get(&project_id) {
			return Ok(Arc::clone(index));
		}

		let dir = self.config.index_dir(project_id);
		let dim = self.dim;
		let index = spawn_blocking(move || VectorIndex::load_or_create(dir, dim)).await??;

		debug!(size = index.len(), "Loaded project index");

		let index = Arc::new(RwLock::new(index));
		indexes.insert(project_id, Arc::clone(&index));

		Ok(index)
	}

	/// Persists `index` as the project's index, then makes it visible to readers
	#[instrument(skip(self, index), fields(size = index.len()), err)]
	pub async fn replace(&self, project_id: ProjectId, index: VectorIndex) -> Result<(), IndexError> {
		let shared = self.get(project_id).await?;

		let dir = self.config.index_dir(project_id);
		let index = spawn_blocking(move || index.save(dir).map(|()| index)).await??;

		*shared.write().await = index;

		info!("Replaced project index");

		Ok(())
	}

	/// Forgets the project's index and deletes its files
	#[instrument(skip(self), err)]
	pub async fn remove(&self, project_id: ProjectId) -> Result<(), IndexError> {
		self.indexes.lock().await.remove(&project_id);

		let dir = self.config.index_dir(project_id);
		match fs::remove_dir_all(&dir).await {
			Ok(()) => Ok(()),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
			Err(e) => Err(FileIOError::from((&dir, e, "removing project index")).into()),
		}
	}
}
