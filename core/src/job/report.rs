use crate::{
	domain::{Annotation, Item, ItemId, ModelHandle, Project, ProjectId},
	store::{JobCommit, Store, StoreError},
};

use std::{fmt, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::{sync::Mutex, time::Instant};
use tracing::{debug, warn};

use super::{JobId, JobKind, JobRequest, JobStatus};

/// A `(current, total)` pair that never goes backwards, `total` is 0 while unknown
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
	pub current: u64,
	pub total: u64,
}

impl Progress {
	pub fn advance(&mut self, current: u64, total: u64) {
		self.total = self.total.max(total);
		self.current = self.current.max(current);
	}

	fn is_complete(&self) -> bool {
		self.total > 0 && self.current >= self.total
	}

	fn complete(&mut self) {
		self.total = self.total.max(self.current);
		self.current = self.total;
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobOutput {
	Embedded {
		/// Items newly added to the index
		embedded: usize,
		/// Items already in the index whose marker was missing
		repaired: usize,
		/// Index size after the job
		indexed: usize,
	},
	Trained {
		model: ModelHandle,
		samples: usize,
		epochs: u32,
	},
	AutoAnnotated {
		items: usize,
		annotations: usize,
		/// Items that left `unlabeled` while the job ran
		skipped: usize,
	},
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobReport {
	pub id: JobId,
	pub project_id: ProjectId,
	pub request: JobRequest,
	pub status: JobStatus,
	pub progress: Progress,
	pub output: Option<JobOutput>,
	/// Set when failed, external errors verbatim
	pub error: Option<String>,
	pub message: String,
	pub cancel_requested: bool,

	pub created_at: DateTime<Utc>,
	pub started_at: Option<DateTime<Utc>>,
	pub completed_at: Option<DateTime<Utc>>,
}

impl fmt::Display for JobReport {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(
			f,
			"Job <kind='{}', id='{}', project_id='{}'> {}",
			self.kind(),
			self.id,
			self.project_id,
			self.status
		)
	}
}

impl JobReport {
	#[must_use]
	pub fn new(project_id: ProjectId, request: JobRequest) -> Self {
		Self {
			id: JobId::new(),
			project_id,
			request,
			status: JobStatus::Pending,
			progress: Progress::default(),
			output: None,
			error: None,
			message: String::new(),
			cancel_requested: false,
			created_at: Utc::now(),
			started_at: None,
			completed_at: None,
		}
	}

	#[must_use]
	pub const fn kind(&self) -> JobKind {
		self.request.kind()
	}

	/// Moves a non terminal report to a terminal `status`, returns `false` if it already was
	pub(crate) fn finish(&mut self, status: JobStatus, error: Option<String>) -> bool {
		if self.status.is_terminal() {
			return false;
		}

		self.status = status;
		self.error = error;
		self.completed_at = Some(Utc::now());

		true
	}
}

/// Progress ticks closer together than this are kept in memory only, the next write carries them
const PROGRESS_WRITE_INTERVAL: Duration = Duration::from_millis(250);

/// Shared handle over the live report of a job, every change is written through to the store
/// except progress ticks, which are debounced.
///
/// All changes go through the same lock, so a cancellation request racing with the commit
/// either lands before it or sees a terminal report.
#[derive(Clone)]
pub struct JobRecord {
	live: Arc<Mutex<Live>>,
	store: Arc<dyn Store>,
}

struct Live {
	report: JobReport,
	last_progress_write: Option<Instant>,
}

impl fmt::Debug for JobRecord {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("JobRecord").finish_non_exhaustive()
	}
}

impl JobRecord {
	pub(crate) fn new(report: JobReport, store: Arc<dyn Store>) -> Self {
		Self {
			live: Arc::new(Mutex::new(Live {
				report,
				last_progress_write: None,
			})),
			store,
		}
	}

	/// The in memory report, fresher than the stored one while progress writes are pending
	pub async fn snapshot(&self) -> JobReport {
		self.live.lock().await.report.clone()
	}

	/// Applies `f` and persists, unless the report is already terminal
	pub async fn update(&self, f: impl FnOnce(&mut JobReport) + Send) -> Result<(), StoreError> {
		let mut live = self.live.lock().await;

		if live.report.status.is_terminal() {
			debug!(job_id = %live.report.id, "Ignoring update of a finished job");
			return Ok(());
		}

		f(&mut live.report);

		self.store.put_job(&live.report).await
	}

	/// Persists at most once per [`PROGRESS_WRITE_INTERVAL`], plus the tick reaching `total`
	pub async fn progress(&self, current: u64, total: u64) -> Result<(), StoreError> {
		let mut live = self.live.lock().await;

		if live.report.status.is_terminal() {
			debug!(job_id = %live.report.id, "Ignoring progress of a finished job");
			return Ok(());
		}

		live.report.progress.advance(current, total);

		let now = Instant::now();
		let due = match live.last_progress_write {
			_ if live.report.progress.is_complete() => true,
			Some(last) => now.duration_since(last) >= PROGRESS_WRITE_INTERVAL,
			None => true,
		};

		if !due {
			return Ok(());
		}

		live.last_progress_write = Some(now);
		self.store.put_job(&live.report).await
	}

	/// Records a terminal status, a no-op if the job already finished.
	/// Store errors are only logged, there is nobody left to report them to.
	pub(crate) async fn finish(&self, status: JobStatus, error: Option<String>) {
		let mut live = self.live.lock().await;

		if !live.report.finish(status, error) {
			return;
		}

		if let Err(e) = self.store.put_job(&live.report).await {
			warn!(job_id = %live.report.id, %status, ?e, "Failed to persist finished job");
		}
	}

	/// Marks the job succeeded and makes it visible together with its side effects. On error
	/// the live report is left untouched so the caller can record the failure instead.
	pub(crate) async fn succeed(
		&self,
		output: JobOutput,
		project: Project,
		items: Vec<Item>,
		annotations: Vec<(ItemId, Vec<Annotation>)>,
	) -> Result<(), StoreError> {
		let mut live = self.live.lock().await;

		let mut done = live.report.clone();
		done.status = JobStatus::Succeeded;
		done.output = Some(output);
		done.completed_at = Some(Utc::now());
		done.progress.complete();

		self.store
			.commit_job(JobCommit {
				project,
				report: done.clone(),
				items,
				annotations,
			})
			.await?;

		live.report = done;

		Ok(())
	}
}
