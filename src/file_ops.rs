use log::{info, warn};
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use crate::dedupe_error::DedupeError;

/// Delete `path`. A file that is already gone counts as deleted.
pub fn delete_file( path: &Path, dry_run: bool ) -> Result<(), DedupeError> {
	if dry_run {
		info!("would delete: {}", path.display());
		return Ok(());
	}

	match fs::remove_file(path) {
		Ok(()) => {
			info!("deleted: {}", path.display());
			Ok(())
		},
		Err(e) if e.kind() == ErrorKind::NotFound => {
			warn!("already gone: {}", path.display());
			Ok(())
		},
		Err(e) => Err(DedupeError::io( path, e )),
	}
}

/// Move `from` to `to`, refusing to replace an existing file. Falls back to
/// copy and remove when a rename isn't possible (e.g. across filesystems).
pub fn move_file( from: &Path, to: &Path, dry_run: bool ) -> Result<(), DedupeError> {
	if to.exists() {
		return Err(DedupeError::io( to, std::io::Error::new( ErrorKind::AlreadyExists, "destination exists" ) ));
	}
	if dry_run {
		info!("would move: {} -> {}", from.display(), to.display());
		return Ok(());
	}

	if fs::rename( from, to ).is_err() {
		fs::copy( from, to ).map_err(|e| DedupeError::io( from, e ))?;
		fs::remove_file( from ).map_err(|e| DedupeError::io( from, e ))?;
	}
	info!("moved: {} -> {}", from.display(), to.display());
	Ok(())
}
