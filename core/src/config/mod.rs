//! Workbench configuration

use crate::domain::ProjectId;

use al_active_learning::{KMeans, Strategy};
use al_utils::fs::{read_if_exists, write_atomic};

use std::{
	num::NonZeroUsize,
	path::{Path, PathBuf},
};

use anyhow::{anyhow, ensure, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, level_filters::LevelFilter, warn};

mod migration;

pub use migration::Migrate;

pub const CONFIG_FILE_NAME: &str = "autolabel.json";

/// Main workbench configuration, stored as pretty JSON in the data directory
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkbenchConfig {
	/// Config schema version
	pub version: u32,

	/// Data directory path
	pub data_dir: PathBuf,

	/// Logging level of our own crates
	pub log_level: String,

	#[serde(default)]
	pub jobs: JobsConfig,

	#[serde(default)]
	pub embedding: EmbeddingConfig,

	#[serde(default)]
	pub training: TrainingConfig,

	#[serde(default)]
	pub auto_annotation: AutoAnnotationConfig,

	#[serde(default)]
	pub selection: SelectionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobsConfig {
	/// Size of the worker pool running jobs
	pub worker_count: usize,
}

impl Default for JobsConfig {
	fn default() -> Self {
		Self {
			worker_count: std::thread::available_parallelism().map_or(1, NonZeroUsize::get),
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EmbeddingConfig {
	/// Name handed to the embedder, informative for the core
	pub model_name: String,

	/// Items embedded between two cancellation checkpoints
	pub batch_size: usize,
}

impl Default for EmbeddingConfig {
	fn default() -> Self {
		Self {
			model_name: "openai/clip-vit-base-patch32".to_string(),
			batch_size: 32,
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TrainingConfig {
	pub epochs: u32,
	pub batch_size: u32,

	/// Fewer annotated items than this fails the train job
	pub min_labeled_items: usize,
}

impl Default for TrainingConfig {
	fn default() -> Self {
		Self {
			epochs: 50,
			batch_size: 16,
			min_labeled_items: 5,
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AutoAnnotationConfig {
	pub confidence_threshold: f32,
	pub iou_threshold: f32,

	/// Whether a successful pass completes the project
	pub finalize: bool,
}

impl Default for AutoAnnotationConfig {
	fn default() -> Self {
		Self {
			confidence_threshold: 0.25,
			iou_threshold: 0.45,
			finalize: true,
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SelectionConfig {
	pub default_batch_size: usize,
	pub default_strategy: Strategy,
	pub kmeans_seed: u64,
	pub kmeans_restarts: usize,
	pub kmeans_max_iterations: usize,
}

impl Default for SelectionConfig {
	fn default() -> Self {
		let kmeans = KMeans::default();

		Self {
			default_batch_size: 10,
			default_strategy: Strategy::default(),
			kmeans_seed: kmeans.seed,
			kmeans_restarts: kmeans.restarts,
			kmeans_max_iterations: kmeans.max_iterations,
		}
	}
}

impl SelectionConfig {
	#[must_use]
	pub fn kmeans(&self) -> KMeans {
		KMeans {
			seed: self.kmeans_seed,
			restarts: self.kmeans_restarts,
			max_iterations: self.kmeans_max_iterations,
			..KMeans::default()
		}
	}
}

impl WorkbenchConfig {
	/// Load configuration from a data directory, creating a default one if there is none
	pub fn load_from(data_dir: impl AsRef<Path>) -> Result<Self> {
		let data_dir = data_dir.as_ref();
		let config_path = data_dir.join(CONFIG_FILE_NAME);

		if let Some(bytes) = read_if_exists(&config_path)? {
			info!(path = %config_path.display(), "Loading config");
			let mut config = serde_json::from_slice::<Self>(&bytes)
				.with_context(|| format!("parsing {}", config_path.display()))?;

			ensure!(
				config.version <= Self::target_version(),
				"config version {} is newer than the supported {}",
				config.version,
				Self::target_version()
			);

			if config.needs_migration() {
				info!(
					from = config.version,
					to = Self::target_version(),
					"Migrating config"
				);
				config.migrate()?;
				config.save()?;
			}

			config.validate()?;

			Ok(config)
		} else {
			warn!(path = %config_path.display(), "No config found, creating default");
			let config = Self::default_with_dir(data_dir.to_path_buf());
			config.save()?;
			Ok(config)
		}
	}

	/// Like [`WorkbenchConfig::load_from`], falling back to defaults over an unreadable file
	pub fn load_or_create(data_dir: impl AsRef<Path>) -> Result<Self> {
		let data_dir = data_dir.as_ref();

		Self::load_from(data_dir).or_else(|e| {
			warn!(?e, "Failed to load config, replacing it with defaults");
			let config = Self::default_with_dir(data_dir.to_path_buf());
			config.save()?;
			Ok(config)
		})
	}

	#[must_use]
	pub fn default_with_dir(data_dir: PathBuf) -> Self {
		Self {
			version: Self::target_version(),
			data_dir,
			log_level: "info".to_string(),
			jobs: JobsConfig::default(),
			embedding: EmbeddingConfig::default(),
			training: TrainingConfig::default(),
			auto_annotation: AutoAnnotationConfig::default(),
			selection: SelectionConfig::default(),
		}
	}

	pub fn save(&self) -> Result<()> {
		let config_path = self.data_dir.join(CONFIG_FILE_NAME);
		write_atomic(&config_path, &serde_json::to_vec_pretty(self)?)?;
		info!(path = %config_path.display(), "Saved config");
		Ok(())
	}

	pub fn validate(&self) -> Result<()> {
		self.log_level
			.parse::<LevelFilter>()
			.map_err(|_| anyhow!("invalid log level: '{}'", self.log_level))?;

		ensure!(self.jobs.worker_count >= 1, "jobs.worker_count must be at least 1");
		ensure!(
			self.embedding.batch_size >= 1,
			"embedding.batch_size must be at least 1"
		);
		ensure!(
			(1..=200).contains(&self.training.epochs),
			"training.epochs must be within 1..=200"
		);
		ensure!(
			(1..=64).contains(&self.training.batch_size),
			"training.batch_size must be within 1..=64"
		);
		ensure!(
			(0.0..=1.0).contains(&self.auto_annotation.confidence_threshold),
			"auto_annotation.confidence_threshold must be within 0..=1"
		);
		ensure!(
			(0.0..=1.0).contains(&self.auto_annotation.iou_threshold),
			"auto_annotation.iou_threshold must be within 0..=1"
		);
		ensure!(
			(1..=50).contains(&self.selection.default_batch_size),
			"selection.default_batch_size must be within 1..=50"
		);

		Ok(())
	}

	#[must_use]
	pub fn logs_dir(&self) -> PathBuf {
		self.data_dir.join("logs")
	}

	#[must_use]
	pub fn projects_dir(&self) -> PathBuf {
		self.data_dir.join("projects")
	}

	#[must_use]
	pub fn project_dir(&self, project_id: ProjectId) -> PathBuf {
		self.projects_dir().join(project_id.to_string())
	}

	/// Where the project's vector index artifacts live
	#[must_use]
	pub fn index_dir(&self, project_id: ProjectId) -> PathBuf {
		self.project_dir(project_id).join("embeddings")
	}

	/// Snapshot file of the bundled [`MemoryStore`](crate::store::MemoryStore)
	#[must_use]
	pub fn store_path(&self) -> PathBuf {
		self.data_dir.join("store.bin")
	}
}

impl Migrate for WorkbenchConfig {
	fn current_version(&self) -> u32 {
		self.version
	}

	fn target_version() -> u32 {
		1
	}

	fn migrate(&mut self) -> Result<()> {
		match self.version {
			1 => Ok(()),
			v => Err(anyhow!("Unknown config version: {v}")),
		}
	}
}
