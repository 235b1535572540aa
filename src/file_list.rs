use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

use crate::config::ScanConfig;
use crate::content_hash::{ContentDigest, ContentHasher};
use crate::dedupe_error::DedupeError;
use crate::histogram::Fingerprint;
use crate::report::FileFailure;

#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
	pub recursive: bool,
	pub include_hidden: bool,
	pub extensions: Option<Vec<String>>,	//Lower case, without the dot. None accepts every file.
}

impl ScanOptions {

	pub fn all_files( scan: &ScanConfig ) -> ScanOptions {
		ScanOptions { recursive: scan.recursive, include_hidden: scan.include_hidden, extensions: None }
	}

	pub fn with_extensions( scan: &ScanConfig, extensions: &[String] ) -> ScanOptions {
		ScanOptions {
			recursive: scan.recursive,
			include_hidden: scan.include_hidden,
			extensions: Some(extensions.iter().map(|e| e.trim_start_matches('.').to_lowercase()).collect()),
		}
	}
}

//Only allows the configured file extensions, unless no filter was given
fn valid_file_extension( fpath: &Path, options: &ScanOptions ) -> bool {
	match &options.extensions {
		None => true,
		Some(known_extensions) => match fpath.extension().and_then(OsStr::to_str) {
			Some(extension) => {
				let ext_lower = extension.to_lowercase();
				known_extensions.iter().any(|k| *k == ext_lower)
			},
			None => false,
		},
	}
}

//Filter out invisible files and directories, but never the root itself
fn is_hidden( entry: &DirEntry ) -> bool {
	entry.depth() > 0 && entry.file_name()
		.to_str()
		.map(|s| s.starts_with("."))
		.unwrap_or(false)
}

/// Lazily walk `root`, yielding every matching regular file. Restartable:
/// calling it again walks the tree again.
pub fn walk_files<'a>( root: &Path, options: &'a ScanOptions ) -> impl Iterator<Item = Result<PathBuf, FileFailure>> + 'a {
	let mut walker = WalkDir::new(root);
	if !options.recursive {
		walker = walker.max_depth(1);
	}

	walker.into_iter()
		.filter_entry(move |e| options.include_hidden || !is_hidden(e))
		.filter_map(move |entry| match entry {
			Ok(entry) => {
				if entry.file_type().is_file() && valid_file_extension( entry.path(), options ) {
					Some(Ok(entry.into_path()))
				}else{
					None
				}
			},
			Err(e) => {
				let path = e.path().map(Path::to_path_buf).unwrap_or_default();
				let source = e.into_io_error().unwrap_or_else(|| std::io::Error::new( std::io::ErrorKind::Other, "filesystem loop" ));
				Some(Err(FileFailure { path: path.clone(), error: DedupeError::io( path, source ) }))
			},
		})
}

/// A discovered file plus whatever has been computed for it so far.
#[derive(Debug)]
pub struct FileRecord {
	path: PathBuf,
	digest: Option<ContentDigest>,
	fingerprint: Option<Fingerprint>,
}

impl FileRecord {

	pub fn new( path: PathBuf ) -> FileRecord {
		FileRecord { path, digest: None, fingerprint: None }
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	pub fn into_path(self) -> PathBuf {
		self.path
	}

	pub fn file_name(&self) -> &str {
		self.path.file_name().and_then(OsStr::to_str).unwrap_or("")
	}

	pub fn digest( &mut self, hasher: &mut ContentHasher ) -> Result<ContentDigest, DedupeError> {
		if let Some(d) = self.digest {
			return Ok(d);
		}
		let d = hasher.digest_file( &self.path )?;
		self.digest = Some(d);
		Ok(d)
	}

	pub fn fingerprint( &mut self ) -> Result<&Fingerprint, DedupeError> {
		if self.fingerprint.is_none() {
			self.fingerprint = Some(Fingerprint::from_path( &self.path )?);
		}
		match &self.fingerprint {
			Some(fp) => Ok(fp),
			None => Err(DedupeError::InvariantViolation(format!("fingerprint of {} missing after computation", self.path.display()))),
		}
	}
}
