use std::{
	borrow::Cow,
	collections::HashSet,
	path::{Path, PathBuf},
};

use al_utils::fs::{read_if_exists, write_atomic};

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use super::{
	error::{Corruption, Error},
	index::VectorIndex,
};

pub const VECTORS_FILE_NAME: &str = "vectors.bin";
pub const IDENTITIES_FILE_NAME: &str = "identities.bin";

const FORMAT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct VectorsArtifact<'a> {
	version: u32,
	generation: Uuid,
	dim: usize,
	rows: usize,
	data: Cow<'a, [f32]>,
}

#[derive(Serialize, Deserialize)]
struct IdentitiesArtifact<'a> {
	version: u32,
	generation: Uuid,
	identities: Cow<'a, [String]>,
}

impl VectorIndex {
	/// Persists the index as two artifacts inside `dir`, both tagged with the same save
	/// generation. Each one is written to a temporary sibling and renamed over the previous
	/// file, so readers never observe a partially written artifact.
	#[instrument(skip(self, dir), fields(dir = %dir.as_ref().display(), size = self.len()), err)]
	pub fn save(&self, dir: impl AsRef<Path>) -> Result<(), Error> {
		let dir = dir.as_ref();
		let generation = Uuid::new_v4();

		let vectors = rmp_serde::to_vec_named(&VectorsArtifact {
			version: FORMAT_VERSION,
			generation,
			dim: self.dim(),
			rows: self.len(),
			data: Cow::Borrowed(self.data()),
		})?;

		let identities = rmp_serde::to_vec_named(&IdentitiesArtifact {
			version: FORMAT_VERSION,
			generation,
			identities: Cow::Borrowed(self.identities()),
		})?;

		write_atomic(dir.join(VECTORS_FILE_NAME), &vectors)?;
		write_atomic(dir.join(IDENTITIES_FILE_NAME), &identities)?;

		debug!(%generation, "Saved vector index");

		Ok(())
	}

	#[instrument(skip(dir), fields(dir = %dir.as_ref().display()), err)]
	pub fn load(dir: impl AsRef<Path>) -> Result<Self, Error> {
		let dir = dir.as_ref();
		Self::try_load(dir)?.ok_or_else(|| Error::NotFound(dir.into()))
	}

	/// Loads the index stored in `dir` or creates an empty one when nothing was saved there yet
	pub fn load_or_create(dir: impl AsRef<Path>, dim: usize) -> Result<Self, Error> {
		let dir = dir.as_ref();

		match Self::try_load(dir)? {
			Some(index) if index.dim() != dim => Err(Error::DimensionMismatch {
				expected: dim,
				found: index.dim(),
			}),
			Some(index) => Ok(index),
			None => Self::create(dim),
		}
	}

	/// Whether any artifact of an index exists in `dir`
	#[must_use]
	pub fn exists_in(dir: impl AsRef<Path>) -> bool {
		artifact_paths(dir.as_ref())
			.iter()
			.any(|path| path.exists())
	}

	fn try_load(dir: &Path) -> Result<Option<Self>, Error> {
		let corrupt = |kind: Corruption| Error::CorruptIndex {
			path: dir.into(),
			kind,
		};

		let (vectors_bytes, identities_bytes) = match (
			read_if_exists(dir.join(VECTORS_FILE_NAME))?,
			read_if_exists(dir.join(IDENTITIES_FILE_NAME))?,
		) {
			(None, None) => return Ok(None),
			(Some(_), None) => return Err(corrupt(Corruption::MissingArtifact(IDENTITIES_FILE_NAME))),
			(None, Some(_)) => return Err(corrupt(Corruption::MissingArtifact(VECTORS_FILE_NAME))),
			(Some(vectors), Some(identities)) => (vectors, identities),
		};

		let vectors = decode::<VectorsArtifact<'static>>(&vectors_bytes, VECTORS_FILE_NAME)
			.map_err(&corrupt)?;
		let identities = decode::<IdentitiesArtifact<'static>>(&identities_bytes, IDENTITIES_FILE_NAME)
			.map_err(&corrupt)?;

		for version in [vectors.version, identities.version] {
			if version != FORMAT_VERSION {
				return Err(corrupt(Corruption::UnsupportedVersion(version)));
			}
		}

		if vectors.generation != identities.generation {
			warn!(
				vectors_generation = %vectors.generation,
				identities_generation = %identities.generation,
				"Index artifacts come from different saves",
			);
			return Err(corrupt(Corruption::GenerationMismatch));
		}

		if vectors.dim == 0 {
			return Err(corrupt(Corruption::InvalidDimension(vectors.dim)));
		}

		if vectors.rows != identities.identities.len() {
			return Err(corrupt(Corruption::CountMismatch {
				vectors: vectors.rows,
				identities: identities.identities.len(),
			}));
		}

		let expected = vectors.rows * vectors.dim;
		if vectors.data.len() != expected {
			return Err(corrupt(Corruption::DataLength {
				expected,
				found: vectors.data.len(),
			}));
		}

		let mut seen = HashSet::with_capacity(identities.identities.len());
		if let Some(duplicate) = identities
			.identities
			.iter()
			.find(|identity| !seen.insert(identity.as_str()))
		{
			return Err(corrupt(Corruption::DuplicateIdentity(duplicate.clone())));
		}

		debug!(
			generation = %vectors.generation,
			size = vectors.rows,
			dim = vectors.dim,
			"Loaded vector index",
		);

		Ok(Some(Self::from_parts(
			vectors.dim,
			vectors.data.into_owned(),
			identities.identities.into_owned(),
		)))
	}
}

fn decode<T: DeserializeOwned>(bytes: &[u8], artifact: &'static str) -> Result<T, Corruption> {
	rmp_serde::from_slice(bytes).map_err(|source| Corruption::Decode { artifact, source })
}

fn artifact_paths(dir: &Path) -> [PathBuf; 2] {
	[dir.join(VECTORS_FILE_NAME), dir.join(IDENTITIES_FILE_NAME)]
}

#[cfg(test)]
mod tests {
	use super::*;

	use tempfile::tempdir;

	#[test]
	fn artifacts_are_written_next_to_each_other() {
		let dir = tempdir().unwrap();
		let mut index = VectorIndex::create(3).unwrap();
		index.add(&[[1.0_f32, 2.0, 3.0]], &["only"]).unwrap();

		index.save(dir.path()).unwrap();

		for path in artifact_paths(dir.path()) {
			assert!(path.exists());
		}
	}
}
