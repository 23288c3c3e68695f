//! Crash-safe file writes.
//!
//! Files are written to a `.tmp` sibling first, flushed to disk and then renamed over the
//! destination, so a concurrent reader sees either the previous content or the new one,
//! never a half written file.

use std::{
	fs::{self, File},
	io::Write,
	path::{Path, PathBuf},
};

use tracing::trace;

use crate::error::FileIOError;

/// Path of the temporary sibling used while writing `path`
#[must_use]
pub fn temp_sibling(path: &Path) -> PathBuf {
	let mut name = path.file_name().map(ToOwned::to_owned).unwrap_or_default();
	name.push(".tmp");
	path.with_file_name(name)
}

pub fn write_atomic(path: impl AsRef<Path>, bytes: &[u8]) -> Result<(), FileIOError> {
	let path = path.as_ref();

	if let Some(parent) = path.parent() {
		fs::create_dir_all(parent)
			.map_err(|e| FileIOError::from((parent, e, "creating parent directory")))?;
	}

	let tmp_path = temp_sibling(path);

	{
		let mut file = File::create(&tmp_path)
			.map_err(|e| FileIOError::from((&tmp_path, e, "creating temporary file")))?;
		file.write_all(bytes)
			.map_err(|e| FileIOError::from((&tmp_path, e, "writing temporary file")))?;
		file.sync_all()
			.map_err(|e| FileIOError::from((&tmp_path, e, "syncing temporary file")))?;
	}

	fs::rename(&tmp_path, path)
		.map_err(|e| FileIOError::from((path, e, "renaming temporary file")))?;

	sync_parent(path);

	trace!(path = %path.display(), size = bytes.len(), "Atomically wrote file");

	Ok(())
}

/// Best effort directory fsync so the rename itself survives a power loss
#[cfg(unix)]
fn sync_parent(path: &Path) {
	if let Some(dir) = path.parent().and_then(|parent| File::open(parent).ok()) {
		if let Err(e) = dir.sync_all() {
			trace!(?e, "Failed to sync parent directory");
		}
	}
}

#[cfg(not(unix))]
const fn sync_parent(_path: &Path) {}

/// Read a whole file, returning `None` if it doesn't exist
pub fn read_if_exists(path: impl AsRef<Path>) -> Result<Option<Vec<u8>>, FileIOError> {
	let path = path.as_ref();
	match fs::read(path) {
		Ok(bytes) => Ok(Some(bytes)),
		Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
		Err(e) => Err(FileIOError::from((path, e, "reading file"))),
	}
}
