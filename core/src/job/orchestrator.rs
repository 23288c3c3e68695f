use crate::{
	domain::ProjectId,
	store::{Store, StoreError},
	workflow::advance_project,
};

use al_task_system::{
	DispatcherShutdownError, TaskHandle, TaskRemoteController, TaskStatus, TaskSystem,
	TaskSystemError,
};

use std::{collections::HashMap, sync::Arc};

use tokio::{
	spawn,
	sync::{Mutex, Notify},
};
use tracing::{debug, error, info, instrument, warn};

use super::{
	task::{rollback_stage, JobContext, JobTask},
	JobError, JobId, JobKind, JobRecord, JobReport, JobRequest, JobStatus, JobSystemError,
};

/// Runs jobs on a long lived worker pool, at most one non terminal job per project and kind.
///
/// Cheap to clone, every clone drives the same pool.
#[derive(Clone)]
pub struct JobOrchestrator {
	inner: Arc<Inner>,
}

struct Inner {
	ctx: JobContext,
	system: TaskSystem<JobError>,
	active: Mutex<HashMap<(ProjectId, JobKind), ActiveJob>>,
	/// Woken every time a job leaves `active`
	finished: Notify,
}

struct ActiveJob {
	job_id: JobId,
	record: JobRecord,
	controller: TaskRemoteController,
}

impl JobOrchestrator {
	pub(crate) fn new(ctx: JobContext, workers_count: usize) -> Self {
		Self {
			inner: Arc::new(Inner {
				ctx,
				system: TaskSystem::new(workers_count),
				active: Mutex::new(HashMap::new()),
				finished: Notify::new(),
			}),
		}
	}

	fn store(&self) -> &Arc<dyn Store> {
		&self.inner.ctx.store
	}

	/// Marks every job a previous process left `pending` or `running` as failed and moves their
	/// projects back to where the job found them
	#[instrument(skip(self), err)]
	pub async fn recover(&self) -> Result<usize, JobSystemError> {
		let mut recovered = 0;

		for mut report in self.store().list_jobs(None).await? {
			if report.status.is_terminal() {
				continue;
			}

			warn!(%report, "Found job interrupted by a previous shutdown");
			report.finish(
				JobStatus::Failed,
				Some("interrupted before completion".to_string()),
			);
			self.store().put_job(&report).await?;
			rollback_stage(&self.inner.ctx, report.project_id, report.kind()).await?;
			recovered += 1;
		}

		Ok(recovered)
	}

	/// Validates the request against the project's stage and queues the job
	#[instrument(skip(self), fields(kind = %request.kind()), err)]
	pub async fn submit(
		&self,
		project_id: ProjectId,
		request: JobRequest,
	) -> Result<JobId, JobSystemError> {
		request.validate()?;

		let kind = request.kind();

		// Checked under the slots lock so a concurrent project deletion is seen
		let mut active = self.inner.active.lock().await;

		let project = self.store().get_project(project_id).await?;
		advance_project(project.stage, kind.active_stage())?;

		if let Some(running) = active.get(&(project_id, kind)) {
			return Err(JobSystemError::JobAlreadyActive {
				project_id,
				kind,
				active_job_id: running.job_id,
			});
		}

		let report = JobReport::new(project_id, request);
		let job_id = report.id;
		self.store().put_job(&report).await?;

		let record = JobRecord::new(report, Arc::clone(self.store()));

		let handle = match self
			.inner
			.system
			.dispatch(JobTask::new(
				job_id,
				project_id,
				request,
				record.clone(),
				self.inner.ctx.clone(),
			))
			.await
		{
			Ok(handle) => handle,
			Err(DispatcherShutdownError(_)) => {
				record
					.finish(
						JobStatus::Cancelled,
						Some("job system is shutting down".to_string()),
					)
					.await;
				return Err(JobSystemError::ShuttingDown);
			}
		};

		active.insert(
			(project_id, kind),
			ActiveJob {
				job_id,
				record: record.clone(),
				controller: handle.remote_controller(),
			},
		);
		drop(active);

		spawn(watch(
			Arc::clone(&self.inner),
			(project_id, kind),
			record,
			handle,
		));

		info!(%job_id, "Job queued");

		Ok(job_id)
	}

	/// The job's durable record. Progress ticks are written debounced, so it may trail a running
	/// job by a fraction of a second.
	pub async fn poll(&self, job_id: JobId) -> Result<JobReport, JobSystemError> {
		self.store().get_job(job_id).await.map_err(|e| match e {
			StoreError::JobNotFound(id) => JobSystemError::NotFound(id),
			e => e.into(),
		})
	}

	/// Best effort: asks the job to stop at its next checkpoint. Returns `false` if the job
	/// already finished.
	#[instrument(skip(self), err)]
	pub async fn cancel(&self, job_id: JobId) -> Result<bool, JobSystemError> {
		let active = self.inner.active.lock().await;

		let Some(job) = active.values().find(|job| job.job_id == job_id) else {
			let report = self.poll(job_id).await?;
			debug!(status = %report.status, "Job is not active, nothing to cancel");
			return Ok(false);
		};

		let mut accepted = false;
		job.record
			.update(|report| {
				report.cancel_requested = true;
				accepted = true;
			})
			.await?;

		if accepted {
			job.controller.cancel();
		}

		Ok(accepted)
	}

	/// Resolves once the job is terminal and its slot was freed for a new job of its kind
	pub async fn wait(&self, job_id: JobId) -> Result<JobReport, JobSystemError> {
		loop {
			let finished = self.inner.finished.notified();

			let report = self.poll(job_id).await?;
			let is_active = self
				.inner
				.active
				.lock()
				.await
				.values()
				.any(|job| job.job_id == job_id);

			if report.status.is_terminal() && !is_active {
				return Ok(report);
			}

			finished.await;
		}
	}

	/// The non terminal job of the project, if any
	pub async fn active_job(&self, project_id: ProjectId) -> Option<(JobKind, JobId)> {
		self.inner
			.active
			.lock()
			.await
			.iter()
			.find(|((id, _), _)| *id == project_id)
			.map(|((_, kind), job)| (*kind, job.job_id))
	}

	/// Deletes the project from the store unless one of its jobs is active. Holds the slots
	/// lock throughout, so no job of the project can be submitted meanwhile.
	pub(crate) async fn delete_project(&self, project_id: ProjectId) -> Result<(), JobSystemError> {
		let active = self.inner.active.lock().await;

		if let Some(((_, kind), job)) = active.iter().find(|((id, _), _)| *id == project_id) {
			return Err(JobSystemError::JobAlreadyActive {
				project_id,
				kind: *kind,
				active_job_id: job.job_id,
			});
		}

		self.store().delete_project(project_id).await?;
		drop(active);

		Ok(())
	}

	/// Stops accepting jobs, running ones are canceled and queued ones recorded as cancelled
	pub async fn shutdown(&self) {
		self.inner.system.shutdown().await;

		loop {
			let finished = self.inner.finished.notified();

			if self.inner.active.lock().await.is_empty() {
				break;
			}

			finished.await;
		}

		info!("Job orchestrator shutdown complete");
	}
}

/// Reconciles the job record with how the task ended, for the outcomes the task could not
/// record itself, then frees the job's slot
async fn watch(
	inner: Arc<Inner>,
	key: (ProjectId, JobKind),
	record: JobRecord,
	handle: TaskHandle<JobError>,
) {
	match handle.await {
		// The task recorded these itself
		Ok(TaskStatus::Done(_) | TaskStatus::Error(_)) => {}

		// Canceled before a worker picked it up, or during the run
		Ok(TaskStatus::Canceled) => record.finish(JobStatus::Cancelled, None).await,

		Ok(TaskStatus::Shutdown(_)) => {
			record
				.finish(
					JobStatus::Cancelled,
					Some("job system shut down before the job started".to_string()),
				)
				.await;
		}

		Err(e) => {
			let message = match e {
				TaskSystemError::TaskPanicked(_) => "job panicked".to_string(),
				e => e.to_string(),
			};
			error!(%message, "Job ended abnormally");
			record.finish(JobStatus::Failed, Some(message)).await;

			// The task never got to move its project back
			let (project_id, kind) = key;
			let stage_lock = inner.ctx.locks.stage(project_id).await;
			let _stage_guard = stage_lock.lock().await;
			if let Err(e) = rollback_stage(&inner.ctx, project_id, kind).await {
				error!(?e, "Failed to move the project back to its resting stage");
			}
		}
	}

	inner.active.lock().await.remove(&key);
	inner.finished.notify_waiters();
}
