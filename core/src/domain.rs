use crate::workflow::{ItemStage, ProjectStage};

use std::{fmt, path::PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

pub type ProjectId = Uuid;

/// Opaque and stable identity of an item, unique inside its project
pub type ItemId = String;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Project {
	pub id: ProjectId,
	pub name: String,
	pub stage: ProjectStage,
	/// Class index used by annotations and detections is the position in this list
	pub classes: Vec<Class>,
	pub latest_model: Option<ModelHandle>,
	pub created_at: DateTime<Utc>,
}

impl Project {
	#[must_use]
	pub fn new(name: impl Into<String>, classes: Vec<Class>) -> Self {
		Self {
			id: ProjectId::new_v4(),
			name: name.into(),
			stage: ProjectStage::Uploading,
			classes,
			latest_model: None,
			created_at: Utc::now(),
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Class {
	pub name: String,
}

impl From<&str> for Class {
	fn from(name: &str) -> Self {
		Self {
			name: name.to_string(),
		}
	}
}

impl From<String> for Class {
	fn from(name: String) -> Self {
		Self { name }
	}
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Item {
	pub id: ItemId,
	pub project_id: ProjectId,
	/// Already resolved location handed to the embedder and detector
	pub content_path: PathBuf,
	pub stage: ItemStage,
	/// Mean detection confidence, only set while the item is auto annotated
	pub confidence: Option<f32>,
	/// Fast existence check for the item's vector in the project index
	pub has_embedding: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewItem {
	pub id: ItemId,
	pub content_path: PathBuf,
}

impl NewItem {
	pub fn new(id: impl Into<ItemId>, content_path: impl Into<PathBuf>) -> Self {
		Self {
			id: id.into(),
			content_path: content_path.into(),
		}
	}

	pub(crate) fn into_item(self, project_id: ProjectId) -> Item {
		Item {
			id: self.id,
			project_id,
			content_path: self.content_path,
			stage: ItemStage::Unlabeled,
			confidence: None,
			has_embedding: false,
		}
	}
}

/// Box center, width and height, all normalized to `[0, 1]` of the image size
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct BoundingBox {
	pub x_center: f32,
	pub y_center: f32,
	pub width: f32,
	pub height: f32,
}

impl BoundingBox {
	#[must_use]
	pub const fn new(x_center: f32, y_center: f32, width: f32, height: f32) -> Self {
		Self {
			x_center,
			y_center,
			width,
			height,
		}
	}

	#[must_use]
	pub fn is_normalized(&self) -> bool {
		let unit = 0.0..=1.0;
		unit.contains(&self.x_center)
			&& unit.contains(&self.y_center)
			&& unit.contains(&self.width)
			&& unit.contains(&self.height)
			&& self.width > 0.0
			&& self.height > 0.0
	}
}

impl fmt::Display for BoundingBox {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(
			f,
			"<x='{}', y='{}', w='{}', h='{}'>",
			self.x_center, self.y_center, self.width, self.height
		)
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AnnotationSource {
	Manual,
	Auto,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Annotation {
	pub id: Uuid,
	pub item_id: ItemId,
	pub class_index: usize,
	pub bbox: BoundingBox,
	pub source: AnnotationSource,
	pub confidence: Option<f32>,
}

impl Annotation {
	#[must_use]
	pub fn manual(item_id: ItemId, class_index: usize, bbox: BoundingBox) -> Self {
		Self {
			id: Uuid::new_v4(),
			item_id,
			class_index,
			bbox,
			source: AnnotationSource::Manual,
			confidence: None,
		}
	}

	#[must_use]
	pub fn auto(item_id: ItemId, class_index: usize, bbox: BoundingBox, confidence: f32) -> Self {
		Self {
			id: Uuid::new_v4(),
			item_id,
			class_index,
			bbox,
			source: AnnotationSource::Auto,
			confidence: Some(confidence),
		}
	}
}

/// A box drawn by a human, before it gets an identity
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct NewAnnotation {
	pub class_index: usize,
	pub bbox: BoundingBox,
}

/// Opaque reference to a trained detector, usually a path to its weights
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct ModelHandle(pub String);

impl fmt::Display for ModelHandle {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		self.0.fmt(f)
	}
}

impl From<String> for ModelHandle {
	fn from(handle: String) -> Self {
		Self(handle)
	}
}
