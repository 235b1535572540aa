use std::path::PathBuf;
use thiserror::Error;


/// DedupeError enumerates every failure the reconciliation passes can report.
#[derive(Error, Debug)]
pub enum DedupeError {

	//The image couldn't be decoded or has no pixels to fingerprint
	#[error("Invalid image: {0}")]
	InvalidImage(String),

	//File vanished, permission denied, or a delete/move failed
	#[error("I/O failure on {}: {source}", path.display())]
	IoFailure {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	//Filename doesn't follow one of the known timestamp shapes
	#[error("Unparsable filename: {0}")]
	UnparsableFilename(String),

	//A fixed-size or bookkeeping invariant was broken. Always aborts the pass.
	#[error("Invariant violated: {0}")]
	InvariantViolation(String),

	//No unique zero-millisecond member, needs a human to decide
	#[error("Ambiguous cluster ({reason}): {}", join_paths(paths))]
	AmbiguousCluster {
		paths: Vec<PathBuf>,
		reason: String,
	},

	#[error("Configuration error: {0}")]
	Config(String),
}

impl DedupeError {

	pub fn io( path: impl Into<PathBuf>, source: std::io::Error ) -> DedupeError {
		DedupeError::IoFailure { path: path.into(), source }
	}

	//Per-file errors are downgraded to a report entry; everything else ends the pass
	pub fn is_per_file(&self) -> bool {
		matches!(self, DedupeError::InvalidImage(_) | DedupeError::IoFailure { .. } | DedupeError::UnparsableFilename(_) | DedupeError::AmbiguousCluster { .. })
	}
}

fn join_paths( paths: &[PathBuf] ) -> String {
	paths.iter().map(|p| p.display().to_string()).collect::<Vec<_>>().join(", ")
}
