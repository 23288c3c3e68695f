use crate::{
	domain::ProjectId,
	index::IndexError,
	models::{ExternalError, ModelError},
	store::StoreError,
	workflow::WorkflowError,
};

use super::{JobId, JobKind};

/// Errors of the requester facing job surface
#[derive(thiserror::Error, Debug)]
pub enum JobSystemError {
	#[error("job not found: <id='{0}'>")]
	NotFound(JobId),
	#[error(
		"job already active: <project_id='{project_id}', kind='{kind}', active_job_id='{active_job_id}'>"
	)]
	JobAlreadyActive {
		project_id: ProjectId,
		kind: JobKind,
		active_job_id: JobId,
	},
	#[error("invalid job parameter: <name='{name}', value='{value}'>")]
	InvalidParameter { name: &'static str, value: String },
	#[error("job system is shutting down")]
	ShuttingDown,

	#[error(transparent)]
	Store(#[from] StoreError),
	#[error(transparent)]
	Workflow(#[from] WorkflowError),
}

/// Why a running job stopped before committing.
///
/// Its `Display` is what ends up in the failed job's report, external failures verbatim.
#[derive(thiserror::Error, Debug)]
pub enum JobError {
	#[error("job canceled")]
	Canceled,
	#[error(transparent)]
	External(#[from] ExternalError),

	#[error("no items to embed")]
	NoItems,
	#[error("not enough annotated items to train: <found='{found}', required='{required}'>")]
	NotEnoughLabeledItems { found: usize, required: usize },
	#[error("no trained model")]
	NoTrainedModel,

	#[error(transparent)]
	Store(#[from] StoreError),
	#[error(transparent)]
	Index(#[from] IndexError),
	#[error(transparent)]
	VectorIndex(#[from] al_vector_index::Error),
	#[error(transparent)]
	Workflow(#[from] WorkflowError),
}

impl From<ModelError> for JobError {
	fn from(e: ModelError) -> Self {
		match e {
			ModelError::Canceled => Self::Canceled,
			ModelError::External(e) => Self::External(e),
		}
	}
}
