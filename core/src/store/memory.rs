use crate::{
	domain::{Annotation, Item, ItemId, Project, ProjectId},
	job::{JobId, JobReport},
	workflow::ItemStage,
};

use al_utils::fs::{read_if_exists, write_atomic};

use std::{
	collections::HashMap,
	path::{Path, PathBuf},
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::{sync::RwLock, task::spawn_blocking};
use tracing::{debug, info, instrument};

use super::{JobCommit, Store, StoreError};

/// In process [`Store`], optionally snapshotted to a single MessagePack file after every
/// mutation.
///
/// When snapshotting, mutations are applied to a copy of the state which only replaces the live
/// one after the snapshot hit the disk, so a failed write leaves both untouched. Every such
/// mutation costs a clone and a serialization of the whole state, which is why job progress
/// reaches the store debounced.
#[derive(Debug, Default)]
pub struct MemoryStore {
	state: RwLock<State>,
	snapshot_path: Option<PathBuf>,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct State {
	projects: Vec<ProjectEntry>,
	jobs: Vec<JobReport>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ProjectEntry {
	project: Project,
	items: Vec<Item>,
	annotations: HashMap<ItemId, Vec<Annotation>>,
	#[serde(skip)]
	positions: HashMap<ItemId, usize>,
}

impl ProjectEntry {
	fn new(project: Project) -> Self {
		Self {
			project,
			items: vec![],
			annotations: HashMap::new(),
			positions: HashMap::new(),
		}
	}

	fn reindex(&mut self) {
		self.positions = self
			.items
			.iter()
			.enumerate()
			.map(|(position, item)| (item.id.clone(), position))
			.collect();
	}

	fn item(&self, item_id: &str) -> Result<&Item, StoreError> {
		self.positions
			.get(item_id)
			.map(|position| &self.items[*position])
			.ok_or_else(|| StoreError::ItemNotFound {
				project_id: self.project.id,
				item_id: item_id.to_string(),
			})
	}

	/// Checks every item exists before overwriting any of them
	fn overwrite_items(&mut self, items: &[Item]) -> Result<(), StoreError> {
		let positions = items
			.iter()
			.map(|item| {
				self.positions
					.get(&item.id)
					.copied()
					.ok_or_else(|| StoreError::ItemNotFound {
						project_id: self.project.id,
						item_id: item.id.clone(),
					})
			})
			.collect::<Result<Vec<_>, _>>()?;

		for (position, item) in positions.into_iter().zip(items) {
			self.items[position] = item.clone();
		}

		Ok(())
	}
}

impl State {
	fn entry(&self, project_id: ProjectId) -> Result<&ProjectEntry, StoreError> {
		self.projects
			.iter()
			.find(|entry| entry.project.id == project_id)
			.ok_or(StoreError::ProjectNotFound(project_id))
	}

	fn entry_mut(&mut self, project_id: ProjectId) -> Result<&mut ProjectEntry, StoreError> {
		self.projects
			.iter_mut()
			.find(|entry| entry.project.id == project_id)
			.ok_or(StoreError::ProjectNotFound(project_id))
	}

	fn upsert_job(&mut self, report: &JobReport) {
		if let Some(stored) = self.jobs.iter_mut().find(|job| job.id == report.id) {
			*stored = report.clone();
		} else {
			self.jobs.push(report.clone());
		}
	}
}

impl MemoryStore {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	/// Restores the snapshot at `path` if there is one, and keeps snapshotting to it
	#[instrument(skip_all, fields(path = %path.as_ref().display()), err)]
	pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
		let path = path.as_ref();

		let state = match read_if_exists(path)? {
			Some(bytes) => {
				let mut state = rmp_serde::from_slice::<State>(&bytes)?;
				state.projects.iter_mut().for_each(ProjectEntry::reindex);
				info!(
					projects = state.projects.len(),
					jobs = state.jobs.len(),
					"Restored store snapshot"
				);
				state
			}
			None => {
				debug!("No store snapshot yet, starting empty");
				State::default()
			}
		};

		Ok(Self {
			state: RwLock::new(state),
			snapshot_path: Some(path.to_path_buf()),
		})
	}

	async fn read<T>(
		&self,
		f: impl FnOnce(&State) -> Result<T, StoreError> + Send,
	) -> Result<T, StoreError> {
		f(&*self.state.read().await)
	}

	async fn mutate<T: Send>(
		&self,
		f: impl FnOnce(&mut State) -> Result<T, StoreError> + Send,
	) -> Result<T, StoreError> {
		let mut state = self.state.write().await;

		let Some(path) = &self.snapshot_path else {
			return f(&mut *state);
		};

		let mut next = state.clone();
		let out = f(&mut next)?;

		let bytes = rmp_serde::to_vec_named(&next)?;
		let path = path.clone();
		spawn_blocking(move || write_atomic(path, &bytes)).await??;

		*state = next;

		Ok(out)
	}
}

#[async_trait]
impl Store for MemoryStore {
	async fn create_project(&self, project: &Project) -> Result<(), StoreError> {
		self.mutate(|state| {
			if state.entry(project.id).is_ok() {
				return Err(StoreError::DuplicateProject(project.id));
			}
			state.projects.push(ProjectEntry::new(project.clone()));
			Ok(())
		})
		.await
	}

	async fn get_project(&self, project_id: ProjectId) -> Result<Project, StoreError> {
		self.read(|state| state.entry(project_id).map(|entry| entry.project.clone()))
			.await
	}

	async fn update_project(&self, project: &Project) -> Result<(), StoreError> {
		self.mutate(|state| {
			state.entry_mut(project.id)?.project = project.clone();
			Ok(())
		})
		.await
	}

	async fn list_projects(&self) -> Result<Vec<Project>, StoreError> {
		self.read(|state| {
			Ok(state
				.projects
				.iter()
				.map(|entry| entry.project.clone())
				.collect())
		})
		.await
	}

	async fn delete_project(&self, project_id: ProjectId) -> Result<(), StoreError> {
		self.mutate(|state| {
			state.entry(project_id)?;
			state.projects.retain(|entry| entry.project.id != project_id);
			state.jobs.retain(|job| job.project_id != project_id);
			Ok(())
		})
		.await
	}

	async fn insert_items(&self, project_id: ProjectId, items: &[Item]) -> Result<(), StoreError> {
		self.mutate(|state| {
			let entry = state.entry_mut(project_id)?;

			let mut seen = std::collections::HashSet::with_capacity(items.len());
			if let Some(item) = items
				.iter()
				.find(|item| entry.positions.contains_key(&item.id) || !seen.insert(&item.id))
			{
				return Err(StoreError::DuplicateItem {
					project_id,
					item_id: item.id.clone(),
				});
			}

			for item in items {
				entry.positions.insert(item.id.clone(), entry.items.len());
				entry.items.push(Item {
					project_id,
					..item.clone()
				});
			}

			Ok(())
		})
		.await
	}

	async fn get_item(&self, project_id: ProjectId, item_id: &str) -> Result<Item, StoreError> {
		self.read(|state| state.entry(project_id)?.item(item_id).cloned())
			.await
	}

	async fn list_items(
		&self,
		project_id: ProjectId,
		stage: Option<ItemStage>,
	) -> Result<Vec<Item>, StoreError> {
		self.read(|state| {
			Ok(state
				.entry(project_id)?
				.items
				.iter()
				.filter(|item| stage.map_or(true, |stage| item.stage == stage))
				.cloned()
				.collect())
		})
		.await
	}

	async fn update_items(&self, project_id: ProjectId, items: &[Item]) -> Result<(), StoreError> {
		self.mutate(|state| state.entry_mut(project_id)?.overwrite_items(items))
			.await
	}

	async fn replace_annotations(
		&self,
		item: &Item,
		annotations: &[Annotation],
	) -> Result<(), StoreError> {
		self.mutate(|state| {
			let entry = state.entry_mut(item.project_id)?;
			entry.overwrite_items(std::slice::from_ref(item))?;

			if annotations.is_empty() {
				entry.annotations.remove(&item.id);
			} else {
				entry
					.annotations
					.insert(item.id.clone(), annotations.to_vec());
			}

			Ok(())
		})
		.await
	}

	async fn list_annotations(
		&self,
		project_id: ProjectId,
		item_id: &str,
	) -> Result<Vec<Annotation>, StoreError> {
		self.read(|state| {
			let entry = state.entry(project_id)?;
			entry.item(item_id)?;
			Ok(entry.annotations.get(item_id).cloned().unwrap_or_default())
		})
		.await
	}

	async fn put_job(&self, report: &JobReport) -> Result<(), StoreError> {
		self.mutate(|state| {
			state.upsert_job(report);
			Ok(())
		})
		.await
	}

	async fn get_job(&self, job_id: JobId) -> Result<JobReport, StoreError> {
		self.read(|state| {
			state
				.jobs
				.iter()
				.find(|job| job.id == job_id)
				.cloned()
				.ok_or(StoreError::JobNotFound(job_id))
		})
		.await
	}

	async fn list_jobs(&self, project_id: Option<ProjectId>) -> Result<Vec<JobReport>, StoreError> {
		self.read(|state| {
			Ok(state
				.jobs
				.iter()
				.filter(|job| project_id.map_or(true, |id| job.project_id == id))
				.cloned()
				.collect())
		})
		.await
	}

	async fn commit_job(&self, commit: JobCommit) -> Result<(), StoreError> {
		let JobCommit {
			project,
			report,
			items,
			annotations,
		} = commit;

		self.mutate(move |state| {
			let entry = state.entry_mut(project.id)?;

			for (item_id, _) in &annotations {
				entry.item(item_id)?;
			}
			entry.overwrite_items(&items)?;

			for (item_id, annotations) in annotations {
				if annotations.is_empty() {
					entry.annotations.remove(&item_id);
				} else {
					entry.annotations.insert(item_id, annotations);
				}
			}

			entry.project = project;
			state.upsert_job(&report);

			Ok(())
		})
		.await
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	use crate::{
		domain::{BoundingBox, NewItem},
		job::{JobRequest, JobStatus},
		workflow::ProjectStage,
	};

	use tempfile::tempdir;

	fn items(project_id: ProjectId, names: &[&str]) -> Vec<Item> {
		names
			.iter()
			.map(|name| NewItem::new(*name, format!("/data/{name}.jpg")).into_item(project_id))
			.collect()
	}

	#[tokio::test]
	async fn rejects_duplicate_items_without_inserting_any() {
		let store = MemoryStore::new();
		let project = Project::new("birds", vec!["bird".into()]);
		store.create_project(&project).await.unwrap();

		store
			.insert_items(project.id, &items(project.id, &["a"]))
			.await
			.unwrap();

		assert!(matches!(
			store
				.insert_items(project.id, &items(project.id, &["b", "a"]))
				.await,
			Err(StoreError::DuplicateItem { item_id, .. }) if item_id == "a"
		));
		assert!(matches!(
			store
				.insert_items(project.id, &items(project.id, &["c", "c"]))
				.await,
			Err(StoreError::DuplicateItem { item_id, .. }) if item_id == "c"
		));
		assert_eq!(store.list_items(project.id, None).await.unwrap().len(), 1);
	}

	#[tokio::test]
	async fn update_items_is_all_or_nothing() {
		let store = MemoryStore::new();
		let project = Project::new("birds", vec![]);
		store.create_project(&project).await.unwrap();
		store
			.insert_items(project.id, &items(project.id, &["a", "b"]))
			.await
			.unwrap();

		let mut changed = items(project.id, &["a", "ghost"]);
		changed[0].stage = ItemStage::Selected;

		assert!(matches!(
			store.update_items(project.id, &changed).await,
			Err(StoreError::ItemNotFound { .. })
		));
		assert_eq!(
			store.get_item(project.id, "a").await.unwrap().stage,
			ItemStage::Unlabeled
		);
	}

	#[tokio::test]
	async fn delete_cascades() {
		let store = MemoryStore::new();
		let project = Project::new("birds", vec![]);
		store.create_project(&project).await.unwrap();
		store
			.insert_items(project.id, &items(project.id, &["a"]))
			.await
			.unwrap();
		store
			.put_job(&JobReport::new(project.id, JobRequest::Embed))
			.await
			.unwrap();

		store.delete_project(project.id).await.unwrap();

		assert!(matches!(
			store.get_project(project.id).await,
			Err(StoreError::ProjectNotFound(_))
		));
		assert!(store.list_jobs(None).await.unwrap().is_empty());
	}

	#[tokio::test]
	async fn snapshot_survives_reopen() {
		let dir = tempdir().unwrap();
		let path = dir.path().join("store.bin");

		let mut project = Project::new("birds", vec!["bird".into(), "nest".into()]);
		let job = JobReport::new(project.id, JobRequest::Embed);
		{
			let store = MemoryStore::open(&path).unwrap();
			store.create_project(&project).await.unwrap();

			let mut stored = items(project.id, &["a", "b"]);
			store.insert_items(project.id, &stored).await.unwrap();

			stored[1].stage = ItemStage::Annotated;
			store
				.replace_annotations(
					&stored[1],
					&[Annotation::manual(
						"b".into(),
						1,
						BoundingBox::new(0.5, 0.5, 0.1, 0.1),
					)],
				)
				.await
				.unwrap();

			project.stage = ProjectStage::Embedding;
			store.update_project(&project).await.unwrap();
			store.put_job(&job).await.unwrap();
		}

		let store = MemoryStore::open(&path).unwrap();

		assert_eq!(store.get_project(project.id).await.unwrap(), project);
		assert_eq!(
			store
				.list_items(project.id, Some(ItemStage::Annotated))
				.await
				.unwrap()
				.iter()
				.map(|item| item.id.as_str())
				.collect::<Vec<_>>(),
			vec!["b"]
		);
		assert_eq!(
			store.list_annotations(project.id, "b").await.unwrap()[0].class_index,
			1
		);
		assert_eq!(store.get_job(job.id).await.unwrap().status, JobStatus::Pending);
		// Positions are rebuilt after a restore
		assert!(store.get_item(project.id, "a").await.is_ok());
	}
}
