use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use log::{error, warn};
use std::path::PathBuf;

use crate::dedupe_error::DedupeError;

#[derive(Debug)]
pub struct FileFailure {
	pub path: PathBuf,
	pub error: DedupeError,
}

/// Outcome of one pass. Per-file problems land here instead of aborting.
#[derive(Debug, Default)]
pub struct PassReport {
	pub pass: &'static str,
	pub dry_run: bool,
	pub scanned: usize,
	pub deleted: Vec<PathBuf>,
	pub moved: Vec<(PathBuf, PathBuf)>,
	pub failures: Vec<FileFailure>,
	pub needs_review: Vec<DedupeError>,	//Ambiguous clusters and conflicting migrations
	pub cancelled: bool,
	pub fatal: Option<DedupeError>,	//Pass stopped early; the lists above still describe what was done
}

impl PassReport {

	pub fn new( pass: &'static str, dry_run: bool ) -> PassReport {
		PassReport { pass, dry_run, ..Default::default() }
	}

	pub fn record_failure( &mut self, path: impl Into<PathBuf>, error: DedupeError ) {
		let path = path.into();
		warn!("{}: {}", path.display(), error);
		self.failures.push( FileFailure { path, error } );
	}

	pub fn record_review( &mut self, item: DedupeError ) {
		warn!("Needs manual review: {}", item);
		self.needs_review.push( item );
	}

	//Keeps the first error when several workers abort
	pub fn abort( &mut self, error: DedupeError ) {
		error!("Pass aborted: {}", error);
		if self.fatal.is_none() {
			self.fatal = Some(error);
		}
	}

	pub fn merge( &mut self, other: PassReport ) {
		if let Some(error) = other.fatal {
			if self.fatal.is_none() {
				self.fatal = Some(error);
			}
		}
		self.scanned += other.scanned;
		self.deleted.extend( other.deleted );
		self.moved.extend( other.moved );
		self.failures.extend( other.failures );
		self.needs_review.extend( other.needs_review );
		self.cancelled |= other.cancelled;
	}

	pub fn has_problems(&self) -> bool {
		!self.failures.is_empty() || !self.needs_review.is_empty()
	}

	//Errors are printed after the pass so they don't disrupt the progress bars
	pub fn print(&self) {
		let verb = if self.dry_run { "Would delete" } else { "Deleted" };
		for path in &self.deleted {
			println!("{}: {}", verb, path.display());
		}
		let verb = if self.dry_run { "Would move" } else { "Moved" };
		for (from, to) in &self.moved {
			println!("{}: {} -> {}", verb, from.display(), to.display());
		}
		for item in &self.needs_review {
			println!("Review: {}", item);
		}
		for failure in &self.failures {
			eprintln!("Error: {}: {}", failure.path.display(), failure.error);
		}
		if let Some(error) = &self.fatal {
			eprintln!("Aborted: {}", error);
		}

		eprintln!("{}: scanned {} deleted {} moved {} review {} errors {}{}",
			self.pass, self.scanned, self.deleted.len(), self.moved.len(), self.needs_review.len(), self.failures.len(),
			if self.fatal.is_some() { " (aborted)" } else if self.cancelled { " (cancelled)" } else { "" });
	}
}

pub fn multi_progress( show: bool ) -> MultiProgress {
	if show {
		MultiProgress::new()
	}else{
		MultiProgress::with_draw_target(ProgressDrawTarget::hidden())
	}
}

pub fn progress_bar( multi: &MultiProgress, len: u64, prefix: &str ) -> ProgressBar {
	let style = ProgressStyle::with_template("{prefix:>8} [{bar:40}] {pos}/{len} {msg}")
		.unwrap_or_else(|_| ProgressStyle::default_bar());
	let bar = multi.add(ProgressBar::new(len));
	bar.set_style(style);
	bar.set_prefix(prefix.to_string());
	bar
}
