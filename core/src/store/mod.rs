//! The relational store contract.
//!
//! The core treats the store as a transactional key-value surface keyed by identity. Every
//! method is atomic on its own, [`Store::commit_job`] being the one that makes a job outcome
//! and its side effects visible together.

use crate::{
	domain::{Annotation, Item, ItemId, Project, ProjectId},
	job::{JobId, JobReport},
	workflow::ItemStage,
};

use al_utils::error::FileIOError;

use async_trait::async_trait;

mod memory;

pub use memory::MemoryStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
	#[error("project not found: <id='{0}'>")]
	ProjectNotFound(ProjectId),
	#[error("item not found: <project_id='{project_id}', item_id='{item_id}'>")]
	ItemNotFound {
		project_id: ProjectId,
		item_id: ItemId,
	},
	#[error("job not found: <id='{0}'>")]
	JobNotFound(JobId),
	#[error("project already exists: <id='{0}'>")]
	DuplicateProject(ProjectId),
	#[error("item already exists: <project_id='{project_id}', item_id='{item_id}'>")]
	DuplicateItem {
		project_id: ProjectId,
		item_id: ItemId,
	},

	#[error("failed to serialize store snapshot: {0}")]
	Serialize(#[from] rmp_serde::encode::Error),
	#[error("failed to deserialize store snapshot: {0}")]
	Deserialize(#[from] rmp_serde::decode::Error),
	#[error(transparent)]
	FileIO(#[from] FileIOError),
	#[error("store snapshot task failed: {0}")]
	Join(#[from] tokio::task::JoinError),
}

/// Everything a successful job makes visible at once
#[derive(Debug, Clone)]
pub struct JobCommit {
	/// Project row with its new stage
	pub project: Project,
	/// Report already marked as succeeded
	pub report: JobReport,
	/// Item rows to overwrite
	pub items: Vec<Item>,
	/// Replacement annotation sets, per item
	pub annotations: Vec<(ItemId, Vec<Annotation>)>,
}

#[async_trait]
pub trait Store: Send + Sync + 'static {
	async fn create_project(&self, project: &Project) -> Result<(), StoreError>;

	async fn get_project(&self, project_id: ProjectId) -> Result<Project, StoreError>;

	async fn update_project(&self, project: &Project) -> Result<(), StoreError>;

	async fn list_projects(&self) -> Result<Vec<Project>, StoreError>;

	/// Cascades to items, annotations and job records of the project
	async fn delete_project(&self, project_id: ProjectId) -> Result<(), StoreError>;

	/// All or nothing, fails on any identity already present in the project
	async fn insert_items(&self, project_id: ProjectId, items: &[Item]) -> Result<(), StoreError>;

	async fn get_item(&self, project_id: ProjectId, item_id: &str) -> Result<Item, StoreError>;

	/// Items in insertion order, optionally only those in `stage`
	async fn list_items(
		&self,
		project_id: ProjectId,
		stage: Option<ItemStage>,
	) -> Result<Vec<Item>, StoreError>;

	/// All or nothing
	async fn update_items(&self, project_id: ProjectId, items: &[Item]) -> Result<(), StoreError>;

	/// Overwrites the item row and replaces its whole annotation set
	async fn replace_annotations(
		&self,
		item: &Item,
		annotations: &[Annotation],
	) -> Result<(), StoreError>;

	async fn list_annotations(
		&self,
		project_id: ProjectId,
		item_id: &str,
	) -> Result<Vec<Annotation>, StoreError>;

	/// Creates or overwrites a job record
	async fn put_job(&self, report: &JobReport) -> Result<(), StoreError>;

	async fn get_job(&self, job_id: JobId) -> Result<JobReport, StoreError>;

	/// Jobs in creation order, of every project when `project_id` is `None`
	async fn list_jobs(&self, project_id: Option<ProjectId>) -> Result<Vec<JobReport>, StoreError>;

	async fn commit_job(&self, commit: JobCommit) -> Result<(), StoreError>;
}
