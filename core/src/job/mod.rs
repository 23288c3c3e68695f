//! Long running stage transitions: embedding, training and auto annotation.
//!
//! Jobs run on the task system worker pool. The requester and the workers only share the job's
//! durable [`JobReport`], which is what [`JobOrchestrator::poll`] reads back.

use crate::{config::WorkbenchConfig, workflow::ProjectStage};

use std::fmt;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

mod auto_annotate;
mod embed;
mod error;
mod orchestrator;
mod report;
mod task;
mod train;

pub use error::{JobError, JobSystemError};
pub use orchestrator::JobOrchestrator;
pub use report::{JobOutput, JobRecord, JobReport, Progress};

pub(crate) use task::JobContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl JobId {
	#[must_use]
	pub fn new() -> Self {
		Self(Uuid::new_v4())
	}
}

impl Default for JobId {
	fn default() -> Self {
		Self::new()
	}
}

impl fmt::Display for JobId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		self.0.fmt(f)
	}
}

impl From<Uuid> for JobId {
	fn from(id: Uuid) -> Self {
		Self(id)
	}
}

impl From<JobId> for Uuid {
	fn from(JobId(id): JobId) -> Self {
		id
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobKind {
	Embed,
	Train,
	AutoAnnotate,
}

impl JobKind {
	/// Stage the project sits in while a job of this kind runs
	#[must_use]
	pub const fn active_stage(self) -> ProjectStage {
		match self {
			Self::Embed => ProjectStage::Embedding,
			Self::Train => ProjectStage::Training,
			Self::AutoAnnotate => ProjectStage::AutoAnnotating,
		}
	}

	/// Stage the project goes back to when a job of this kind fails or is cancelled
	#[must_use]
	pub const fn resting_stage(self) -> ProjectStage {
		match self {
			Self::Embed => ProjectStage::Uploading,
			Self::Train | Self::AutoAnnotate => ProjectStage::Annotating,
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
	Pending,
	Running,
	Succeeded,
	Failed,
	Cancelled,
}

impl JobStatus {
	#[must_use]
	pub const fn is_terminal(self) -> bool {
		matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainParams {
	pub epochs: u32,
	pub batch_size: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AutoAnnotateParams {
	pub confidence_threshold: f32,
	pub iou_threshold: f32,
	/// Move the project to `completed` on success instead of back to `annotating`
	pub finalize: bool,
}

/// What to run, with its parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobRequest {
	Embed,
	Train(TrainParams),
	AutoAnnotate(AutoAnnotateParams),
}

impl JobRequest {
	#[must_use]
	pub const fn kind(&self) -> JobKind {
		match self {
			Self::Embed => JobKind::Embed,
			Self::Train(_) => JobKind::Train,
			Self::AutoAnnotate(_) => JobKind::AutoAnnotate,
		}
	}

	/// Request of `kind` with every parameter taken from the configuration
	#[must_use]
	pub const fn with_defaults(kind: JobKind, config: &WorkbenchConfig) -> Self {
		match kind {
			JobKind::Embed => Self::Embed,
			JobKind::Train => Self::Train(TrainParams {
				epochs: config.training.epochs,
				batch_size: config.training.batch_size,
			}),
			JobKind::AutoAnnotate => Self::AutoAnnotate(AutoAnnotateParams {
				confidence_threshold: config.auto_annotation.confidence_threshold,
				iou_threshold: config.auto_annotation.iou_threshold,
				finalize: config.auto_annotation.finalize,
			}),
		}
	}

	pub fn validate(&self) -> Result<(), JobSystemError> {
		fn check<T: PartialOrd + fmt::Display>(
			name: &'static str,
			value: T,
			range: std::ops::RangeInclusive<T>,
		) -> Result<(), JobSystemError> {
			if range.contains(&value) {
				Ok(())
			} else {
				Err(JobSystemError::InvalidParameter {
					name,
					value: value.to_string(),
				})
			}
		}

		match self {
			Self::Embed => Ok(()),
			Self::Train(TrainParams { epochs, batch_size }) => {
				check("epochs", *epochs, 1..=200)?;
				check("batch_size", *batch_size, 1..=64)
			}
			Self::AutoAnnotate(AutoAnnotateParams {
				confidence_threshold,
				iou_threshold,
				..
			}) => {
				check("confidence_threshold", *confidence_threshold, 0.0..=1.0)?;
				check("iou_threshold", *iou_threshold, 0.0..=1.0)
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parameters_are_range_checked() {
		assert!(JobRequest::Embed.validate().is_ok());
		assert!(JobRequest::Train(TrainParams {
			epochs: 200,
			batch_size: 64
		})
		.validate()
		.is_ok());

		assert!(matches!(
			JobRequest::Train(TrainParams {
				epochs: 0,
				batch_size: 16
			})
			.validate(),
			Err(JobSystemError::InvalidParameter { name: "epochs", .. })
		));
		assert!(matches!(
			JobRequest::Train(TrainParams {
				epochs: 10,
				batch_size: 65
			})
			.validate(),
			Err(JobSystemError::InvalidParameter {
				name: "batch_size",
				..
			})
		));
		assert!(matches!(
			JobRequest::AutoAnnotate(AutoAnnotateParams {
				confidence_threshold: 1.5,
				iou_threshold: 0.45,
				finalize: true,
			})
			.validate(),
			Err(JobSystemError::InvalidParameter {
				name: "confidence_threshold",
				..
			})
		));
	}

	#[test]
	fn requests_serialize_with_their_kind() {
		let json = serde_json::to_value(JobRequest::Train(TrainParams {
			epochs: 3,
			batch_size: 2,
		}))
		.unwrap();

		assert_eq!(json["kind"], "train");
		assert_eq!(json["epochs"], 3);
		assert_eq!(JobRequest::Embed.kind().to_string(), "embed");
	}

	#[test]
	fn defaults_come_from_config() {
		let config = WorkbenchConfig::default_with_dir("/tmp/autolabel".into());

		assert_eq!(
			JobRequest::with_defaults(JobKind::Train, &config),
			JobRequest::Train(TrainParams {
				epochs: 50,
				batch_size: 16
			})
		);
		assert!(matches!(
			JobRequest::with_defaults(JobKind::AutoAnnotate, &config),
			JobRequest::AutoAnnotate(AutoAnnotateParams { finalize: true, .. })
		));
	}
}
