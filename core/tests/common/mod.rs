#![allow(dead_code, clippy::unwrap_used)]

use al_core::{
	config::WorkbenchConfig,
	domain::{Annotation, BoundingBox, Item, ModelHandle, NewItem, Project, ProjectId},
	job::{JobId, JobKind, JobReport},
	models::{
		Checkpoint, Detection, DetectionParams, Detector, Embedder, ExternalError, ModelError,
		Models, Trainer, TrainingRequest,
	},
	store::{JobCommit, MemoryStore, Store, StoreError},
	workflow::ItemStage,
	Workbench,
};

use al_utils::error::FileIOError;

use std::{
	io,
	path::{Path, PathBuf},
	sync::{
		atomic::{AtomicBool, AtomicUsize, Ordering},
		Arc, Mutex,
	},
};

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::{Notify, Semaphore};

pub const DIM: usize = 4;

/// Content path whose embedding is exactly `vector`
pub fn vector_path(vector: [f32; DIM]) -> PathBuf {
	PathBuf::from(format!(
		"/data/{}.jpg",
		vector
			.iter()
			.map(ToString::to_string)
			.collect::<Vec<_>>()
			.join("_")
	))
}

pub fn new_item(id: &str, vector: [f32; DIM]) -> NewItem {
	NewItem::new(id, vector_path(vector))
}

/// Reads the vector back from a path built by [`vector_path`]
fn parse_vector(content: &Path) -> Option<Vec<f32>> {
	let vector = content
		.file_stem()?
		.to_str()?
		.split('_')
		.map(str::parse::<f32>)
		.collect::<Result<Vec<_>, _>>()
		.ok()?;

	(vector.len() == DIM).then_some(vector)
}

#[derive(Default)]
pub struct FakeEmbedder {
	fail_with: Mutex<Option<String>>,
	gate: Option<Arc<Semaphore>>,
	pub started: Arc<Notify>,
	pub calls: AtomicUsize,
}

impl FakeEmbedder {
	/// Every batch waits for a permit of the returned semaphore
	pub fn gated() -> (Self, Arc<Semaphore>) {
		let gate = Arc::new(Semaphore::new(0));
		(
			Self {
				gate: Some(Arc::clone(&gate)),
				..Default::default()
			},
			gate,
		)
	}

	pub fn fail_with(&self, message: Option<&str>) {
		*self.fail_with.lock().unwrap() = message.map(ToString::to_string);
	}
}

#[async_trait]
impl Embedder for FakeEmbedder {
	fn dimension(&self) -> usize {
		DIM
	}

	async fn embed(&self, content: &Path) -> Result<Vec<f32>, ExternalError> {
		if let Some(message) = self.fail_with.lock().unwrap().clone() {
			return Err(ExternalError::new(message));
		}

		parse_vector(content)
			.ok_or_else(|| ExternalError::new(format!("unreadable image: {}", content.display())))
	}

	async fn embed_batch(&self, contents: &[PathBuf]) -> Result<Vec<Vec<f32>>, ExternalError> {
		self.calls.fetch_add(1, Ordering::SeqCst);
		self.started.notify_one();

		if let Some(gate) = &self.gate {
			gate.acquire().await.unwrap().forget();
		}

		let mut vectors = Vec::with_capacity(contents.len());
		for content in contents {
			vectors.push(self.embed(content).await?);
		}
		Ok(vectors)
	}
}

#[derive(Default)]
pub struct FakeTrainer {
	fail_with: Mutex<Option<String>>,
	gate: Option<Arc<Semaphore>>,
	pub started: Arc<Notify>,
	pub trained: AtomicUsize,
	pub last_samples: AtomicUsize,
}

impl FakeTrainer {
	/// Every epoch waits for a permit of the returned semaphore
	pub fn gated() -> (Self, Arc<Semaphore>) {
		let gate = Arc::new(Semaphore::new(0));
		(
			Self {
				gate: Some(Arc::clone(&gate)),
				..Default::default()
			},
			gate,
		)
	}

	pub fn fail_with(&self, message: Option<&str>) {
		*self.fail_with.lock().unwrap() = message.map(ToString::to_string);
	}
}

#[async_trait]
impl Trainer for FakeTrainer {
	async fn train(
		&self,
		request: &TrainingRequest,
		checkpoint: &Checkpoint<'_>,
	) -> Result<ModelHandle, ModelError> {
		self.started.notify_one();

		if let Some(message) = self.fail_with.lock().unwrap().clone() {
			return Err(ExternalError::new(message).into());
		}

		let epochs = u64::from(request.epochs);
		for epoch in 1..=epochs {
			if let Some(gate) = &self.gate {
				gate.acquire().await.unwrap().forget();
			}
			checkpoint.message(format!("epoch {epoch}")).await;
			checkpoint.step(epoch, epochs).await?;
		}

		self.last_samples
			.store(request.samples.len(), Ordering::SeqCst);
		let generation = self.trained.fetch_add(1, Ordering::SeqCst) + 1;

		Ok(ModelHandle(format!("{}/model-{generation}", request.project_id)))
	}
}

pub struct FakeDetector {
	pub detections: Mutex<Vec<Detection>>,
	fail_with: Mutex<Option<String>>,
	pub calls: AtomicUsize,
}

impl Default for FakeDetector {
	fn default() -> Self {
		Self {
			detections: Mutex::new(vec![
				Detection {
					class_index: 0,
					bbox: BoundingBox::new(0.5, 0.5, 0.2, 0.2),
					confidence: 0.9,
				},
				Detection {
					class_index: 1,
					bbox: BoundingBox::new(0.3, 0.3, 0.1, 0.1),
					confidence: 0.5,
				},
				// Below the default threshold
				Detection {
					class_index: 0,
					bbox: BoundingBox::new(0.7, 0.7, 0.1, 0.1),
					confidence: 0.1,
				},
				// Unknown class for a two classes project
				Detection {
					class_index: 7,
					bbox: BoundingBox::new(0.1, 0.1, 0.1, 0.1),
					confidence: 0.99,
				},
			]),
			fail_with: Mutex::new(None),
			calls: AtomicUsize::new(0),
		}
	}
}

impl FakeDetector {
	pub fn fail_with(&self, message: Option<&str>) {
		*self.fail_with.lock().unwrap() = message.map(ToString::to_string);
	}
}

#[async_trait]
impl Detector for FakeDetector {
	async fn detect(
		&self,
		_model: &ModelHandle,
		_content: &Path,
		_params: &DetectionParams,
	) -> Result<Vec<Detection>, ExternalError> {
		self.calls.fetch_add(1, Ordering::SeqCst);

		if let Some(message) = self.fail_with.lock().unwrap().clone() {
			return Err(ExternalError::new(message));
		}

		Ok(self.detections.lock().unwrap().clone())
	}
}

/// Store whose job commits fail while `fail_commits` is set, everything else is delegated
#[derive(Default)]
pub struct FlakyStore {
	inner: MemoryStore,
	pub fail_commits: AtomicBool,
}

#[async_trait]
impl Store for FlakyStore {
	async fn create_project(&self, project: &Project) -> Result<(), StoreError> {
		self.inner.create_project(project).await
	}

	async fn get_project(&self, project_id: ProjectId) -> Result<Project, StoreError> {
		self.inner.get_project(project_id).await
	}

	async fn update_project(&self, project: &Project) -> Result<(), StoreError> {
		self.inner.update_project(project).await
	}

	async fn list_projects(&self) -> Result<Vec<Project>, StoreError> {
		self.inner.list_projects().await
	}

	async fn delete_project(&self, project_id: ProjectId) -> Result<(), StoreError> {
		self.inner.delete_project(project_id).await
	}

	async fn insert_items(&self, project_id: ProjectId, items: &[Item]) -> Result<(), StoreError> {
		self.inner.insert_items(project_id, items).await
	}

	async fn get_item(&self, project_id: ProjectId, item_id: &str) -> Result<Item, StoreError> {
		self.inner.get_item(project_id, item_id).await
	}

	async fn list_items(
		&self,
		project_id: ProjectId,
		stage: Option<ItemStage>,
	) -> Result<Vec<Item>, StoreError> {
		self.inner.list_items(project_id, stage).await
	}

	async fn update_items(&self, project_id: ProjectId, items: &[Item]) -> Result<(), StoreError> {
		self.inner.update_items(project_id, items).await
	}

	async fn replace_annotations(
		&self,
		item: &Item,
		annotations: &[Annotation],
	) -> Result<(), StoreError> {
		self.inner.replace_annotations(item, annotations).await
	}

	async fn list_annotations(
		&self,
		project_id: ProjectId,
		item_id: &str,
	) -> Result<Vec<Annotation>, StoreError> {
		self.inner.list_annotations(project_id, item_id).await
	}

	async fn put_job(&self, report: &JobReport) -> Result<(), StoreError> {
		self.inner.put_job(report).await
	}

	async fn get_job(&self, job_id: JobId) -> Result<JobReport, StoreError> {
		self.inner.get_job(job_id).await
	}

	async fn list_jobs(&self, project_id: Option<ProjectId>) -> Result<Vec<JobReport>, StoreError> {
		self.inner.list_jobs(project_id).await
	}

	async fn commit_job(&self, commit: JobCommit) -> Result<(), StoreError> {
		if self.fail_commits.load(Ordering::SeqCst) {
			return Err(FileIOError::from((
				"/data/store.bin",
				io::Error::other("disk full"),
				"writing store snapshot",
			))
			.into());
		}

		self.inner.commit_job(commit).await
	}
}

pub struct Harness {
	pub workbench: Workbench,
	pub embedder: Arc<FakeEmbedder>,
	pub trainer: Arc<FakeTrainer>,
	pub detector: Arc<FakeDetector>,
	pub data_dir: TempDir,
}

pub fn test_config(data_dir: &Path) -> WorkbenchConfig {
	let mut config = WorkbenchConfig::default_with_dir(data_dir.to_path_buf());
	config.jobs.worker_count = 2;
	config.embedding.batch_size = 2;
	config.training.epochs = 3;
	config.training.min_labeled_items = 2;
	config
}

impl Harness {
	pub async fn new() -> Self {
		Self::with_models(FakeEmbedder::default(), FakeTrainer::default()).await
	}

	pub async fn with_models(embedder: FakeEmbedder, trainer: FakeTrainer) -> Self {
		let data_dir = tempfile::tempdir().unwrap();
		Self::open(data_dir, Arc::new(embedder), Arc::new(trainer), Arc::new(MemoryStore::new()))
			.await
	}

	pub async fn open(
		data_dir: TempDir,
		embedder: Arc<FakeEmbedder>,
		trainer: Arc<FakeTrainer>,
		store: Arc<dyn Store>,
	) -> Self {
		let detector = Arc::new(FakeDetector::default());

		let workbench = Workbench::new(
			test_config(data_dir.path()),
			store,
			Models {
				embedder: Arc::clone(&embedder) as Arc<dyn Embedder>,
				trainer: Arc::clone(&trainer) as Arc<dyn Trainer>,
				detector: Arc::clone(&detector) as Arc<dyn Detector>,
			},
		)
		.await
		.unwrap();

		Self {
			workbench,
			embedder,
			trainer,
			detector,
			data_dir,
		}
	}

	/// Project with two classes and one item per vector, named `item-<n>`
	pub async fn project_with_items(&self, vectors: &[[f32; DIM]]) -> ProjectId {
		let project = self
			.workbench
			.create_project("birds", vec!["sparrow".to_string(), "crow".to_string()])
			.await
			.unwrap();

		self.workbench
			.add_items(
				project.id,
				vectors
					.iter()
					.enumerate()
					.map(|(n, vector)| new_item(&format!("item-{n}"), *vector))
					.collect(),
			)
			.await
			.unwrap();

		project.id
	}

	/// Submits a job with the configured parameters and waits for it to end
	pub async fn run(&self, project_id: ProjectId, kind: JobKind) -> JobReport {
		let job_id = self
			.workbench
			.submit(project_id, self.workbench.default_request(kind))
			.await
			.unwrap();

		self.workbench.wait(job_id).await.unwrap()
	}
}

/// Eight points in two well separated clusters
pub fn two_clusters() -> Vec<[f32; DIM]> {
	vec![
		[0.0, 0.0, 0.0, 0.0],
		[0.1, 0.0, 0.0, 0.0],
		[0.0, 0.1, 0.0, 0.0],
		[0.1, 0.1, 0.0, 0.0],
		[10.0, 10.0, 0.0, 0.0],
		[10.1, 10.0, 0.0, 0.0],
		[10.0, 10.1, 0.0, 0.0],
		[10.1, 10.1, 0.0, 0.0],
	]
}
