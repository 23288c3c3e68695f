use crate::{
	domain::{ItemId, ProjectId},
	index::IndexError,
	job::JobSystemError,
	store::StoreError,
	workflow::{ProjectStage, WorkflowError},
};

use al_active_learning::SelectorError;
use al_utils::error::FileIOError;

/// Errors of the [`Workbench`](crate::Workbench) surface
#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("invalid argument: {0}")]
	InvalidArgument(String),
	#[error("project has no embeddings yet, run an embed job first: <project_id='{0}'>")]
	NoEmbeddings(ProjectId),
	#[error("item has no embedding: <project_id='{project_id}', item_id='{item_id}'>")]
	NotEmbedded {
		project_id: ProjectId,
		item_id: ItemId,
	},
	#[error(
		"items can only be added while the project is uploading: <project_id='{project_id}', stage='{stage}'>"
	)]
	UploadClosed {
		project_id: ProjectId,
		stage: ProjectStage,
	},
	#[error("invalid configuration: {0:#}")]
	Config(anyhow::Error),

	#[error(transparent)]
	Store(#[from] StoreError),
	#[error(transparent)]
	Workflow(#[from] WorkflowError),
	#[error(transparent)]
	JobSystem(#[from] JobSystemError),
	#[error(transparent)]
	Index(#[from] IndexError),
	#[error(transparent)]
	VectorIndex(#[from] al_vector_index::Error),
	#[error(transparent)]
	Selector(#[from] SelectorError),
	#[error(transparent)]
	FileIO(#[from] FileIOError),
	#[error("background task failed: {0}")]
	Join(#[from] tokio::task::JoinError),
}
