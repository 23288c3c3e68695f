use crate::{
	config::WorkbenchConfig,
	domain::{Annotation, Class, Item, ItemId, NewAnnotation, NewItem, Project, ProjectId},
	error::Error,
	index::IndexRegistry,
	job::{JobContext, JobId, JobKind, JobOrchestrator, JobReport, JobRequest, JobSystemError},
	models::Models,
	store::Store,
	workflow::{advance_item, reset_item, ItemStage, ProjectLocks, ProjectStage, Transition},
};

use al_active_learning::{Selector, Strategy};
use al_utils::error::FileIOError;

use std::{collections::HashSet, sync::Arc};

use tokio::{fs, task::spawn_blocking};
use tracing::{debug, info, instrument};

/// Entry point tying the store, the per project indexes, the job orchestrator and the
/// selector together
pub struct Workbench {
	config: Arc<WorkbenchConfig>,
	store: Arc<dyn Store>,
	indexes: Arc<IndexRegistry>,
	locks: Arc<ProjectLocks>,
	jobs: JobOrchestrator,
	selector: Selector,
}

impl Workbench {
	/// Starts the job worker pool and fails every job a previous process left unfinished
	#[instrument(skip_all, fields(data_dir = %config.data_dir.display()), err)]
	pub async fn new(
		config: WorkbenchConfig,
		store: Arc<dyn Store>,
		models: Models,
	) -> Result<Self, Error> {
		config.validate().map_err(Error::Config)?;

		let projects_dir = config.projects_dir();
		fs::create_dir_all(&projects_dir)
			.await
			.map_err(|e| FileIOError::from((&projects_dir, e, "creating projects directory")))?;

		let config = Arc::new(config);
		let indexes = Arc::new(IndexRegistry::new(
			Arc::clone(&config),
			models.embedder.dimension(),
		));
		let locks = Arc::new(ProjectLocks::default());

		let jobs = JobOrchestrator::new(
			JobContext {
				config: Arc::clone(&config),
				store: Arc::clone(&store),
				models,
				indexes: Arc::clone(&indexes),
				locks: Arc::clone(&locks),
			},
			config.jobs.worker_count,
		);

		let recovered = jobs.recover().await?;
		if recovered > 0 {
			info!(%recovered, "Failed jobs interrupted by the previous shutdown");
		}

		Ok(Self {
			selector: Selector::new(config.selection.kmeans()),
			config,
			store,
			indexes,
			locks,
			jobs,
		})
	}

	#[must_use]
	pub fn config(&self) -> &WorkbenchConfig {
		&self.config
	}

	#[must_use]
	pub const fn jobs(&self) -> &JobOrchestrator {
		&self.jobs
	}

	#[instrument(skip(self, classes), err)]
	pub async fn create_project(
		&self,
		name: &str,
		classes: Vec<String>,
	) -> Result<Project, Error> {
		if name.trim().is_empty() {
			return Err(Error::InvalidArgument("project name is empty".to_string()));
		}

		let mut seen = HashSet::with_capacity(classes.len());
		for class in &classes {
			if class.trim().is_empty() || !seen.insert(class.as_str()) {
				return Err(Error::InvalidArgument(format!(
					"class names must be unique and non empty: '{class}'"
				)));
			}
		}

		let project = Project::new(name, classes.into_iter().map(Class::from).collect());
		self.store.create_project(&project).await?;

		info!(project_id = %project.id, "Created project");

		Ok(project)
	}

	pub async fn project(&self, project_id: ProjectId) -> Result<Project, Error> {
		Ok(self.store.get_project(project_id).await?)
	}

	pub async fn projects(&self) -> Result<Vec<Project>, Error> {
		Ok(self.store.list_projects().await?)
	}

	/// Adds items to a project that is still `uploading`. Later stages would leave them
	/// without an embedding, as the embed job only runs from `uploading`.
	#[instrument(skip(self, items), fields(count = items.len()), err)]
	pub async fn add_items(
		&self,
		project_id: ProjectId,
		items: Vec<NewItem>,
	) -> Result<Vec<Item>, Error> {
		self.ensure_uploading(project_id).await?;

		// A queued embed job may be about to leave `uploading`
		let stage_lock = self.locks.stage(project_id).await;
		let _stage_guard = stage_lock.lock().await;
		self.ensure_uploading(project_id).await?;

		let items = items
			.into_iter()
			.map(|item| item.into_item(project_id))
			.collect::<Vec<_>>();

		self.store.insert_items(project_id, &items).await?;

		Ok(items)
	}

	async fn ensure_uploading(&self, project_id: ProjectId) -> Result<(), Error> {
		let project = self.store.get_project(project_id).await?;
		if project.stage != ProjectStage::Uploading {
			return Err(Error::UploadClosed {
				project_id,
				stage: project.stage,
			});
		}

		Ok(())
	}

	pub async fn item(&self, project_id: ProjectId, item_id: &str) -> Result<Item, Error> {
		Ok(self.store.get_item(project_id, item_id).await?)
	}

	pub async fn items(
		&self,
		project_id: ProjectId,
		stage: Option<ItemStage>,
	) -> Result<Vec<Item>, Error> {
		Ok(self.store.list_items(project_id, stage).await?)
	}

	pub async fn annotations(
		&self,
		project_id: ProjectId,
		item_id: &str,
	) -> Result<Vec<Annotation>, Error> {
		Ok(self.store.list_annotations(project_id, item_id).await?)
	}

	/// Request of `kind` with every parameter taken from the configuration
	#[must_use]
	pub fn default_request(&self, kind: JobKind) -> JobRequest {
		JobRequest::with_defaults(kind, &self.config)
	}

	pub async fn submit(&self, project_id: ProjectId, request: JobRequest) -> Result<JobId, Error> {
		Ok(self.jobs.submit(project_id, request).await?)
	}

	pub async fn poll(&self, job_id: JobId) -> Result<JobReport, Error> {
		Ok(self.jobs.poll(job_id).await?)
	}

	pub async fn cancel(&self, job_id: JobId) -> Result<bool, Error> {
		Ok(self.jobs.cancel(job_id).await?)
	}

	pub async fn wait(&self, job_id: JobId) -> Result<JobReport, Error> {
		Ok(self.jobs.wait(job_id).await?)
	}

	/// Picks the next items to label among the embedded ones and marks them `selected`.
	///
	/// Every indexed item that left `unlabeled` counts as labeled, `selected` ones included, so
	/// an item is never queued twice.
	#[instrument(skip(self), err)]
	pub async fn next_batch(
		&self,
		project_id: ProjectId,
		batch_size: Option<usize>,
		strategy: Option<Strategy>,
	) -> Result<Vec<ItemId>, Error> {
		let batch_size = batch_size.unwrap_or(self.config.selection.default_batch_size);
		let strategy = strategy.unwrap_or(self.config.selection.default_strategy);

		let items_lock = self.locks.items(project_id).await;
		let _items_guard = items_lock.lock().await;

		let items = self.store.list_items(project_id, None).await?;

		let index = self.indexes.get(project_id).await?;
		let (vectors, identities) = {
			let index = index.read().await;
			if index.is_empty() {
				return Err(Error::NoEmbeddings(project_id));
			}
			(index.reconstruct_all(), index.identities().to_vec())
		};

		let indexed = identities.iter().collect::<HashSet<_>>();
		let labeled = items
			.iter()
			.filter(|item| item.stage != ItemStage::Unlabeled && indexed.contains(&item.id))
			.map(|item| item.id.clone())
			.collect::<HashSet<_>>();

		let selector = self.selector.clone();
		let picks = spawn_blocking(move || {
			selector.select_batch(vectors.view(), &identities, &labeled, batch_size, strategy)
		})
		.await??;

		let picked = picks.iter().collect::<HashSet<_>>();
		let mut selected = items
			.into_iter()
			.filter(|item| picked.contains(&item.id))
			.collect::<Vec<_>>();

		for item in &mut selected {
			advance_item(item.stage, ItemStage::Selected)?;
			item.stage = ItemStage::Selected;
		}

		self.store.update_items(project_id, &selected).await?;

		debug!(%strategy, picked = picks.len(), "Selected next batch");

		Ok(picks)
	}

	/// Replaces every annotation of the item with human drawn ones and moves it to `annotated`
	#[instrument(skip(self, annotations), fields(count = annotations.len()), err)]
	pub async fn annotate(
		&self,
		project_id: ProjectId,
		item_id: &str,
		annotations: Vec<NewAnnotation>,
	) -> Result<Item, Error> {
		if annotations.is_empty() {
			return Err(Error::InvalidArgument(
				"no annotations given, clear the item's annotations instead".to_string(),
			));
		}

		let project = self.store.get_project(project_id).await?;
		for annotation in &annotations {
			if annotation.class_index >= project.classes.len() {
				return Err(Error::InvalidArgument(format!(
					"unknown class index {} for a project with {} classes",
					annotation.class_index,
					project.classes.len()
				)));
			}
			if !annotation.bbox.is_normalized() {
				return Err(Error::InvalidArgument(format!(
					"bounding box is not normalized: {}",
					annotation.bbox
				)));
			}
		}

		let items_lock = self.locks.items(project_id).await;
		let _items_guard = items_lock.lock().await;

		let mut item = self.store.get_item(project_id, item_id).await?;
		advance_item(item.stage, ItemStage::Annotated)?;
		item.stage = ItemStage::Annotated;
		item.confidence = None;

		let annotations = annotations
			.into_iter()
			.map(|new| Annotation::manual(item.id.clone(), new.class_index, new.bbox))
			.collect::<Vec<_>>();

		self.store.replace_annotations(&item, &annotations).await?;

		Ok(item)
	}

	/// Deletes every annotation of the item, sending it back to `unlabeled`
	#[instrument(skip(self), err)]
	pub async fn clear_annotations(
		&self,
		project_id: ProjectId,
		item_id: &str,
	) -> Result<Item, Error> {
		let items_lock = self.locks.items(project_id).await;
		let _items_guard = items_lock.lock().await;

		let mut item = self.store.get_item(project_id, item_id).await?;
		if reset_item(item.stage) == Transition::Changed {
			item.stage = ItemStage::Unlabeled;
			item.confidence = None;
		}

		self.store.replace_annotations(&item, &[]).await?;

		Ok(item)
	}

	/// The `k` items closest to `item_id` in embedding space, closest first
	pub async fn similar_items(
		&self,
		project_id: ProjectId,
		item_id: &str,
		k: usize,
	) -> Result<Vec<(ItemId, f32)>, Error> {
		let index = self.indexes.get(project_id).await?;
		let index = index.read().await;

		let query = index
			.vector_of(item_id)
			.ok_or_else(|| Error::NotEmbedded {
				project_id,
				item_id: item_id.to_string(),
			})?
			.to_vec();

		let mut neighbours = index.search(&query, k.saturating_add(1))?;
		neighbours.retain(|(identity, _)| identity != item_id);
		neighbours.truncate(k);

		Ok(neighbours)
	}

	/// Deletes the project with everything it owns, refused while one of its jobs is active
	#[instrument(skip(self), err)]
	pub async fn delete_project(&self, project_id: ProjectId) -> Result<(), Error> {
		// Fails fast instead of waiting on the stage lock a running job holds
		if let Some((kind, active_job_id)) = self.jobs.active_job(project_id).await {
			return Err(JobSystemError::JobAlreadyActive {
				project_id,
				kind,
				active_job_id,
			}
			.into());
		}

		let stage_lock = self.locks.stage(project_id).await;
		let _stage_guard = stage_lock.lock().await;
		let items_lock = self.locks.items(project_id).await;
		let _items_guard = items_lock.lock().await;

		self.jobs
			.delete_project(project_id)
			.await
			.map_err(|e| match e {
				JobSystemError::Store(e) => Error::Store(e),
				e => e.into(),
			})?;
		self.indexes.remove(project_id).await?;

		let project_dir = self.config.project_dir(project_id);
		match fs::remove_dir_all(&project_dir).await {
			Ok(()) => {}
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
			Err(e) => {
				return Err(FileIOError::from((&project_dir, e, "removing project directory")).into())
			}
		}

		self.locks.forget(project_id).await;

		info!("Deleted project");

		Ok(())
	}

	/// Cancels running jobs, records queued ones as cancelled and stops the worker pool
	pub async fn shutdown(&self) {
		self.jobs.shutdown().await;
	}
}
