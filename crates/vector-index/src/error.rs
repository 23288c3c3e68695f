use std::path::Path;

use al_utils::error::FileIOError;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
	#[error("invalid index configuration: {0}")]
	Config(&'static str),
	#[error("vector dimension mismatch: expected {expected}, found {found}")]
	DimensionMismatch { expected: usize, found: usize },
	#[error("received {vectors} vectors for {identities} identities")]
	CountMismatch { vectors: usize, identities: usize },
	#[error("identity is already stored in the index: <identity='{0}'>")]
	DuplicateIdentity(String),
	#[error("corrupt index at '{}': {kind}", .path.display())]
	CorruptIndex { path: Box<Path>, kind: Corruption },
	#[error("no index stored at '{}'", .0.display())]
	NotFound(Box<Path>),
	#[error("failed to encode index artifact: {0}")]
	Encode(#[from] rmp_serde::encode::Error),
	#[error(transparent)]
	FileIO(#[from] FileIOError),
}

/// Why a persisted index was refused on load
#[derive(Debug, Error)]
pub enum Corruption {
	#[error("artifact '{0}' is missing while its pair exists")]
	MissingArtifact(&'static str),
	#[error("failed to decode artifact '{artifact}': {source}")]
	Decode {
		artifact: &'static str,
		#[source]
		source: rmp_serde::decode::Error,
	},
	#[error("unsupported format version {0}")]
	UnsupportedVersion(u32),
	#[error("artifacts were written by different saves")]
	GenerationMismatch,
	#[error("{vectors} stored vectors for {identities} stored identities")]
	CountMismatch { vectors: usize, identities: usize },
	#[error("vector data holds {found} values, expected {expected}")]
	DataLength { expected: usize, found: usize },
	#[error("invalid stored dimension {0}")]
	InvalidDimension(usize),
	#[error("identity stored twice: <identity='{0}'>")]
	DuplicateIdentity(String),
}
