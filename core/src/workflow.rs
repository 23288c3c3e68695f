//! Project and item lifecycles.
//!
//! Nothing here runs work, it only decides whether a stage change is legal. Legality is a
//! lookup of the documented predecessors of the target stage. Asking for the stage the
//! project or item is already in is always accepted as [`Transition::Unchanged`], which is what
//! makes re-issuing a stage command after a crash or a failed job safe.

use crate::domain::ProjectId;

use std::{collections::HashMap, sync::Arc};

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ProjectStage {
	Uploading,
	Embedding,
	Annotating,
	Training,
	AutoAnnotating,
	Completed,
}

impl ProjectStage {
	/// Stages a project may come from to enter `self`
	#[must_use]
	pub const fn predecessors(self) -> &'static [Self] {
		match self {
			Self::Uploading => &[],
			Self::Embedding => &[Self::Uploading],
			// Training and auto annotation hand control back to the human
			Self::Annotating => &[Self::Embedding, Self::Training, Self::AutoAnnotating],
			Self::Training | Self::AutoAnnotating => &[Self::Annotating],
			Self::Completed => &[Self::AutoAnnotating],
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ItemStage {
	Unlabeled,
	/// Queued for human attention, never selected twice while in here
	Selected,
	Annotated,
	AutoAnnotated,
}

impl ItemStage {
	/// Stages an item may come from to enter `self`, [`ItemStage::Unlabeled`] is only reachable
	/// through [`reset_item`]
	#[must_use]
	pub const fn predecessors(self) -> &'static [Self] {
		match self {
			Self::Unlabeled => &[],
			Self::Selected | Self::AutoAnnotated => &[Self::Unlabeled],
			// A human correcting an auto annotation promotes it
			Self::Annotated => &[Self::Unlabeled, Self::Selected, Self::AutoAnnotated],
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
	Changed,
	Unchanged,
}

#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
	#[error("illegal project transition: <from='{from}', to='{to}', expected_from={expected:?}>")]
	IllegalTransition {
		from: ProjectStage,
		to: ProjectStage,
		expected: &'static [ProjectStage],
	},
	#[error("illegal item transition: <from='{from}', to='{to}', expected_from={expected:?}>")]
	IllegalItemTransition {
		from: ItemStage,
		to: ItemStage,
		expected: &'static [ItemStage],
	},
}

pub fn advance_project(from: ProjectStage, to: ProjectStage) -> Result<Transition, WorkflowError> {
	if from == to {
		return Ok(Transition::Unchanged);
	}

	let expected = to.predecessors();
	if expected.contains(&from) {
		Ok(Transition::Changed)
	} else {
		Err(WorkflowError::IllegalTransition { from, to, expected })
	}
}

pub fn advance_item(from: ItemStage, to: ItemStage) -> Result<Transition, WorkflowError> {
	if from == to {
		return Ok(Transition::Unchanged);
	}

	let expected = to.predecessors();
	if expected.contains(&from) {
		Ok(Transition::Changed)
	} else {
		Err(WorkflowError::IllegalItemTransition { from, to, expected })
	}
}

/// The only regression: an item whose annotations were all deleted goes back to unlabeled.
/// A `selected` item has no annotations to delete so it stays queued.
#[must_use]
pub const fn reset_item(from: ItemStage) -> Transition {
	match from {
		ItemStage::Annotated | ItemStage::AutoAnnotated => Transition::Changed,
		ItemStage::Unlabeled | ItemStage::Selected => Transition::Unchanged,
	}
}

/// Per project mutual exclusion.
///
/// The `stage` lock is held by a job from "validate transition" through its external work up
/// to its commit. The `items` lock is short lived, held by every read-modify-write of item
/// rows, so a job commit never clobbers a concurrent manual annotation.
#[derive(Debug, Default)]
pub struct ProjectLocks {
	locks: Mutex<HashMap<ProjectId, ProjectLock>>,
}

#[derive(Debug, Default, Clone)]
struct ProjectLock {
	stage: Arc<Mutex<()>>,
	items: Arc<Mutex<()>>,
}

impl ProjectLocks {
	pub async fn stage(&self, project_id: ProjectId) -> Arc<Mutex<()>> {
		Arc::clone(&self.locks.lock().await.entry(project_id).or_default().stage)
	}

	pub async fn items(&self, project_id: ProjectId) -> Arc<Mutex<()>> {
		Arc::clone(&self.locks.lock().await.entry(project_id).or_default().items)
	}

	pub async fn forget(&self, project_id: ProjectId) {
		self.locks.lock().await.remove(&project_id);
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn happy_path_through_every_project_stage() {
		use ProjectStage::*;

		for (from, to) in [
			(Uploading, Embedding),
			(Embedding, Annotating),
			(Annotating, Training),
			(Training, Annotating),
			(Annotating, AutoAnnotating),
			(AutoAnnotating, Annotating),
			(Annotating, AutoAnnotating),
			(AutoAnnotating, Completed),
		] {
			assert_eq!(advance_project(from, to).unwrap(), Transition::Changed);
		}
	}

	#[test]
	fn training_cannot_skip_to_completed() {
		let err = advance_project(ProjectStage::Training, ProjectStage::Completed).unwrap_err();

		assert!(matches!(
			err,
			WorkflowError::IllegalTransition {
				from: ProjectStage::Training,
				to: ProjectStage::Completed,
				expected: [ProjectStage::AutoAnnotating],
			}
		));
		assert!(err.to_string().contains("expected_from=[AutoAnnotating]"));
	}

	#[test]
	fn annotating_and_training_alternate_repeatedly() {
		let mut stage = ProjectStage::Annotating;

		for _ in 0..5 {
			for next in [ProjectStage::Training, ProjectStage::Annotating] {
				assert_eq!(advance_project(stage, next).unwrap(), Transition::Changed);
				stage = next;
			}
		}
	}

	#[test]
	fn reentering_a_stage_is_idempotent() {
		for stage in [
			ProjectStage::Uploading,
			ProjectStage::Embedding,
			ProjectStage::Training,
			ProjectStage::Completed,
		] {
			assert_eq!(advance_project(stage, stage).unwrap(), Transition::Unchanged);
		}
	}

	#[test]
	fn uploading_needs_embedding_before_training() {
		assert!(advance_project(ProjectStage::Uploading, ProjectStage::Training).is_err());
		assert!(advance_project(ProjectStage::Embedding, ProjectStage::AutoAnnotating).is_err());
		assert!(advance_project(ProjectStage::Completed, ProjectStage::Embedding).is_err());
	}

	#[test]
	fn item_transitions() {
		use ItemStage::*;

		assert_eq!(advance_item(Unlabeled, Selected).unwrap(), Transition::Changed);
		assert_eq!(advance_item(Selected, Annotated).unwrap(), Transition::Changed);
		assert_eq!(advance_item(Unlabeled, AutoAnnotated).unwrap(), Transition::Changed);
		assert_eq!(advance_item(AutoAnnotated, Annotated).unwrap(), Transition::Changed);
		assert_eq!(advance_item(Annotated, Annotated).unwrap(), Transition::Unchanged);

		assert!(advance_item(Selected, AutoAnnotated).is_err());
		assert!(advance_item(Annotated, Selected).is_err());
		assert!(advance_item(Annotated, Unlabeled).is_err());
	}

	#[test]
	fn only_annotated_items_reset() {
		assert_eq!(reset_item(ItemStage::Annotated), Transition::Changed);
		assert_eq!(reset_item(ItemStage::AutoAnnotated), Transition::Changed);
		assert_eq!(reset_item(ItemStage::Selected), Transition::Unchanged);
		assert_eq!(reset_item(ItemStage::Unlabeled), Transition::Unchanged);
	}

	#[test]
	fn stage_names_are_snake_case() {
		assert_eq!(ProjectStage::AutoAnnotating.to_string(), "auto_annotating");
		assert_eq!(
			"auto_annotated".parse::<ItemStage>().unwrap(),
			ItemStage::AutoAnnotated
		);
	}

	#[tokio::test]
	async fn locks_are_shared_per_project() {
		let locks = ProjectLocks::default();
		let project = ProjectId::new_v4();

		let first = locks.stage(project).await;
		let second = locks.stage(project).await;
		assert!(Arc::ptr_eq(&first, &second));

		let _guard = first.lock().await;
		assert!(second.try_lock().is_err());
		assert!(locks.items(project).await.try_lock().is_ok());
		assert!(locks.stage(ProjectId::new_v4()).await.try_lock().is_ok());
	}
}
