//! Exact-duplicate pass.
//!
//! Both trees are hashed at the same time, each by its own bounded worker
//! pool. A single consumer per tree drains that tree's results and applies
//! them to a shared [`MatchTable`]:
//!
//! * if the other tree already has the digest pending, the arriving file is
//!   deleted and the other tree's entry is dropped (its file survives)
//! * otherwise the arriving file is recorded as pending
//!
//! Whichever copy was recorded first is the one kept. Hash completions are
//! unordered, so for a matching pair the survivor depends on scan timing.
//! That nondeterminism is accepted: either copy is byte-identical.

use indicatif::MultiProgress;
use log::{debug, info};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::sync_channel;
use std::sync::{Arc, Mutex};
use std::thread;
use threadpool::ThreadPool;

use crate::config::Config;
use crate::content_hash::{ContentDigest, ContentHasher};
use crate::dedupe_error::DedupeError;
use crate::file_list::{walk_files, FileRecord, ScanOptions};
use crate::file_ops::delete_file;
use crate::report::{multi_progress, progress_bar, PassReport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tree {
	Old,
	New,
}

impl Tree {

	fn index(self) -> usize {
		match self {
			Tree::Old => 0,
			Tree::New => 1,
		}
	}

	fn other(self) -> Tree {
		match self {
			Tree::Old => Tree::New,
			Tree::New => Tree::Old,
		}
	}

	pub fn name(self) -> &'static str {
		match self {
			Tree::Old => "old",
			Tree::New => "new",
		}
	}
}

#[derive(Debug, PartialEq, Eq)]
pub enum Arrival {
	/// Recorded, waiting for the other tree
	Pending,
	/// The same tree already holds this content; not this pass's business
	DuplicateWithinTree { first: PathBuf },
	/// The other tree got here first: delete the arriving file, keep `keep`
	Matched { keep: PathBuf },
}

/// Per-tree maps from digest to the first-seen path still awaiting a match.
/// A digest is never pending in both maps at once.
#[derive(Debug, Default)]
pub struct MatchTable {
	pending: [HashMap<ContentDigest, PathBuf>; 2],
}

impl MatchTable {

	pub fn arrive( &mut self, tree: Tree, digest: ContentDigest, path: PathBuf ) -> Result<Arrival, DedupeError> {
		let (this, other) = (tree.index(), tree.other().index());

		if self.pending[this].contains_key(&digest) && self.pending[other].contains_key(&digest) {
			return Err(DedupeError::InvariantViolation(format!("digest {} pending in both trees", digest)));
		}

		if let Some(keep) = self.pending[other].remove(&digest) {
			return Ok(Arrival::Matched { keep });
		}

		match self.pending[this].entry(digest) {
			Entry::Occupied(first) => Ok(Arrival::DuplicateWithinTree { first: first.get().clone() }),
			Entry::Vacant(slot) => {
				slot.insert(path);
				Ok(Arrival::Pending)
			},
		}
	}

	pub fn pending_len( &self, tree: Tree ) -> usize {
		self.pending[tree.index()].len()
	}
}

enum HashOutcome {
	Hashed(PathBuf, ContentDigest),
	Failed(PathBuf, DedupeError),
	Skipped(PathBuf),
}

pub fn run_exact_dedup( config: &Config, shutdown: &Arc<AtomicBool> ) -> Result<PassReport, DedupeError> {
	let (old_root, new_root) = config.disjoint_roots()?;
	info!("Exact duplicate pass: {} <-> {}", old_root.display(), new_root.display());

	let table = Mutex::new(MatchTable::default());
	let multi = multi_progress( config.show_progress );

	let results: Vec<PassReport> = thread::scope(|s| {
		let handles: Vec<_> = [ (Tree::Old, old_root.as_path()), (Tree::New, new_root.as_path()) ]
			.into_iter()
			.map(|(tree, root)| {
				let (table, multi) = (&table, &multi);
				s.spawn(move || run_tree( tree, root, config, table, shutdown, multi ))
			})
			.collect();

		handles.into_iter()
			.map(|h| h.join().unwrap_or_else(|e| std::panic::resume_unwind(e)))
			.collect()
	});

	let mut report = PassReport::new( "dedupe", config.dry_run );
	for tree_report in results {
		report.merge( tree_report );
	}

	match table.into_inner() {
		Ok(table) => info!("Unmatched files left: {} in old, {} in new", table.pending_len(Tree::Old), table.pending_len(Tree::New)),
		Err(_) => report.abort( DedupeError::InvariantViolation("match table lock poisoned".to_string()) ),
	}

	Ok(report)
}

//Two spellings of one file, e.g. through a symlinked directory
fn same_file( a: &Path, b: &Path ) -> bool {
	match (fs::canonicalize(a), fs::canonicalize(b)) {
		(Ok(a), Ok(b)) => a == b,
		_ => false,
	}
}

//Producer (worker pool) plus consumer for one tree
fn run_tree( tree: Tree, root: &Path, config: &Config, table: &Mutex<MatchTable>, shutdown: &Arc<AtomicBool>, multi: &MultiProgress ) -> PassReport {

	let mut report = PassReport::new( "dedupe", config.dry_run );
	let options = ScanOptions::all_files( &config.scan );

	let mut files: Vec<PathBuf> = Vec::new();
	for entry in walk_files( root, &options ) {
		match entry {
			Ok(path) => files.push( path ),
			Err(failure) => report.record_failure( failure.path, failure.error ),
		}
	}
	report.scanned = files.len();
	if files.is_empty() {
		return report;
	}

	let num_threads = config.hashing.threads.min(files.len());
	let pool = ThreadPool::with_name( format!("hash-{}", tree.name()), num_threads );
	let (tx, rx) = sync_channel( config.hashing.channel_bound );
	let progress = progress_bar( multi, files.len() as u64, tree.name() );

	for path in files {
		let tx = tx.clone();
		let shutdown = Arc::clone(shutdown);
		pool.execute(move || {
			let outcome = if shutdown.load(Ordering::SeqCst) {
				HashOutcome::Skipped(path)
			}else{
				//Each job owns its hashing context for exactly this file
				let mut hasher = ContentHasher::new();
				let mut record = FileRecord::new( path );
				match record.digest( &mut hasher ) {
					Ok(digest) => HashOutcome::Hashed(record.into_path(), digest),
					Err(e) => HashOutcome::Failed(record.into_path(), e),
				}
			};
			//A closed channel means the consumer already gave up on this pass
			let _ = tx.send(outcome);
		});
	}
	drop(tx);

	for outcome in rx {
		progress.inc(1);
		match outcome {
			HashOutcome::Hashed(path, digest) => {
				let arrival = table.lock()
					.map_err(|_| DedupeError::InvariantViolation("match table lock poisoned".to_string()))
					.and_then(|mut table| table.arrive( tree, digest, path.clone() ));
				let arrival = match arrival {
					Ok(arrival) => arrival,
					Err(e) => {
						report.abort( e );
						break;
					},
				};

				match arrival {
					Arrival::Pending => debug!("pending ({}): {} {:?}", tree.name(), path.display(), digest),
					Arrival::DuplicateWithinTree { first } => {
						debug!("{} repeats {} inside the {} tree, left alone", path.display(), first.display(), tree.name());
					},
					Arrival::Matched { keep } if same_file( &path, &keep ) => {
						let reason = format!("{} was reached from both trees", keep.display());
						report.record_failure( path, DedupeError::InvariantViolation(reason) );
					},
					Arrival::Matched { keep } => {
						if shutdown.load(Ordering::SeqCst) {
							report.cancelled = true;
							continue;
						}
						info!("({}) {} duplicates {}", tree.name(), path.display(), keep.display());
						match delete_file( &path, config.dry_run ) {
							Ok(()) => report.deleted.push( path ),
							Err(e) => report.record_failure( path, e ),
						}
					},
				}
			},
			HashOutcome::Failed(path, e) => report.record_failure( path, e ),
			HashOutcome::Skipped(path) => {
				debug!("skipped after shutdown request: {}", path.display());
				report.cancelled = true;
			},
		}
	}
	progress.finish();

	report
}

#[cfg(test)]
mod tests {
	use super::*;
	use glob::glob;
	use tempfile::TempDir;

	fn digest_of( bytes: &[u8] ) -> ContentDigest {
		ContentHasher::new().digest_reader( bytes ).unwrap()
	}

	fn list( dir: &Path ) -> Vec<String> {
		let pattern = format!("{}/*", dir.display());
		let mut out: Vec<String> = glob(&pattern).expect("Failed to read glob pattern")
			.map(|e| e.unwrap().file_name().unwrap().to_string_lossy().into_owned())
			.collect();
		out.sort();
		out
	}

	fn no_shutdown() -> Arc<AtomicBool> {
		Arc::new(AtomicBool::new(false))
	}

	#[test]
	fn test_first_arrival_is_kept() {
		let d = digest_of(b"same bytes");
		let mut table = MatchTable::default();

		assert_eq!( table.arrive( Tree::Old, d, PathBuf::from("old/photo.jpg") ).unwrap(), Arrival::Pending );
		assert_eq!( table.arrive( Tree::New, d, PathBuf::from("new/photo_copy.jpg") ).unwrap(),
			Arrival::Matched { keep: PathBuf::from("old/photo.jpg") } );
		assert_eq!( table.pending_len(Tree::Old), 0 );
		assert_eq!( table.pending_len(Tree::New), 0 );
	}

	#[test]
	fn test_new_tree_first_keeps_new_copy() {
		let d = digest_of(b"same bytes");
		let mut table = MatchTable::default();

		table.arrive( Tree::New, d, PathBuf::from("new/photo_copy.jpg") ).unwrap();
		assert_eq!( table.arrive( Tree::Old, d, PathBuf::from("old/photo.jpg") ).unwrap(),
			Arrival::Matched { keep: PathBuf::from("new/photo_copy.jpg") } );
	}

	#[test]
	fn test_repeat_within_tree_keeps_first_seen() {
		let d = digest_of(b"burst");
		let mut table = MatchTable::default();

		table.arrive( Tree::Old, d, PathBuf::from("old/a.jpg") ).unwrap();
		assert_eq!( table.arrive( Tree::Old, d, PathBuf::from("old/b.jpg") ).unwrap(),
			Arrival::DuplicateWithinTree { first: PathBuf::from("old/a.jpg") } );
		assert_eq!( table.pending_len(Tree::Old), 1 );

		//The first-seen path is the one offered as the survivor
		assert_eq!( table.arrive( Tree::New, d, PathBuf::from("new/a.jpg") ).unwrap(),
			Arrival::Matched { keep: PathBuf::from("old/a.jpg") } );
	}

	#[test]
	fn test_digest_in_both_tables_is_invariant_violation() {
		let d = digest_of(b"broken");
		let mut table = MatchTable::default();
		table.pending[0].insert( d, PathBuf::from("old/x.jpg") );
		table.pending[1].insert( d, PathBuf::from("new/x.jpg") );

		assert!( matches!( table.arrive( Tree::Old, d, PathBuf::from("old/y.jpg") ), Err(DedupeError::InvariantViolation(_)) ) );
	}

	#[test]
	fn test_end_to_end_leaves_one_copy_and_the_unique_file() {
		let old = TempDir::new().unwrap();
		let new = TempDir::new().unwrap();
		fs::write( old.path().join("photo.jpg"), b"digest D content" ).unwrap();
		fs::write( new.path().join("photo_copy.jpg"), b"digest D content" ).unwrap();
		fs::write( new.path().join("unique.jpg"), b"digest E content" ).unwrap();

		let config = Config::for_roots( old.path(), new.path() );
		let report = run_exact_dedup( &config, &no_shutdown() ).unwrap();

		let old_left = list( old.path() );
		let new_left = list( new.path() );
		assert_eq!( old_left.len() + new_left.len(), 2, "Exactly two files survive" );
		assert!( new_left.contains(&"unique.jpg".to_string()) );
		assert!( old_left.contains(&"photo.jpg".to_string()) != new_left.contains(&"photo_copy.jpg".to_string()),
			"Exactly one copy of the duplicated photo remains" );

		assert_eq!( report.deleted.len(), 1 );
		assert!( !report.deleted[0].exists() );
		assert_eq!( report.scanned, 3 );
		assert!( !report.has_problems() );
	}

	#[test]
	fn test_unmatched_files_are_never_deleted() {
		let old = TempDir::new().unwrap();
		let new = TempDir::new().unwrap();
		fs::write( old.path().join("a.jpg"), b"a" ).unwrap();
		fs::write( old.path().join("b.jpg"), b"b" ).unwrap();
		//Same content twice inside one tree is not a cross-tree match
		fs::write( new.path().join("c.jpg"), b"c" ).unwrap();
		fs::write( new.path().join("c_again.jpg"), b"c" ).unwrap();

		let config = Config::for_roots( old.path(), new.path() );
		let report = run_exact_dedup( &config, &no_shutdown() ).unwrap();

		assert!( report.deleted.is_empty() );
		assert_eq!( list( old.path() ), vec![ "a.jpg", "b.jpg" ] );
		assert_eq!( list( new.path() ), vec![ "c.jpg", "c_again.jpg" ] );
	}

	#[test]
	fn test_many_pairs_keep_exactly_one_of_each() {
		let old = TempDir::new().unwrap();
		let new = TempDir::new().unwrap();
		for i in 0..25 {
			let body = format!("photo number {}", i);
			fs::write( old.path().join(format!("old_{:02}.jpg", i)), &body ).unwrap();
			fs::write( new.path().join(format!("new_{:02}.jpg", i)), &body ).unwrap();
		}

		let mut config = Config::for_roots( old.path(), new.path() );
		config.hashing.threads = 4;
		config.hashing.channel_bound = 2;
		let report = run_exact_dedup( &config, &no_shutdown() ).unwrap();

		assert_eq!( report.deleted.len(), 25 );
		for i in 0..25 {
			let in_old = old.path().join(format!("old_{:02}.jpg", i)).exists();
			let in_new = new.path().join(format!("new_{:02}.jpg", i)).exists();
			assert!( in_old ^ in_new, "pair {} must keep exactly one copy", i );
		}
	}

	#[test]
	fn test_dry_run_reports_but_keeps_files() {
		let old = TempDir::new().unwrap();
		let new = TempDir::new().unwrap();
		fs::write( old.path().join("photo.jpg"), b"D" ).unwrap();
		fs::write( new.path().join("photo_copy.jpg"), b"D" ).unwrap();

		let mut config = Config::for_roots( old.path(), new.path() );
		config.dry_run = true;
		let report = run_exact_dedup( &config, &no_shutdown() ).unwrap();

		assert_eq!( report.deleted.len(), 1 );
		assert_eq!( list( old.path() ), vec![ "photo.jpg" ] );
		assert_eq!( list( new.path() ), vec![ "photo_copy.jpg" ] );
	}

	#[test]
	fn test_shutdown_skips_every_file() {
		let old = TempDir::new().unwrap();
		let new = TempDir::new().unwrap();
		fs::write( old.path().join("photo.jpg"), b"D" ).unwrap();
		fs::write( new.path().join("photo_copy.jpg"), b"D" ).unwrap();

		let config = Config::for_roots( old.path(), new.path() );
		let report = run_exact_dedup( &config, &Arc::new(AtomicBool::new(true)) ).unwrap();

		assert!( report.cancelled );
		assert!( report.deleted.is_empty() );
		assert!( old.path().join("photo.jpg").exists() );
		assert!( new.path().join("photo_copy.jpg").exists() );
	}

	#[test]
	fn test_missing_root_is_config_error() {
		let old = TempDir::new().unwrap();
		let config = Config::for_roots( old.path(), &old.path().join("nope") );
		assert!( matches!( run_exact_dedup( &config, &no_shutdown() ), Err(DedupeError::Config(_)) ) );
	}

	#[test]
	fn test_same_root_is_refused_and_nothing_deleted() {
		let dir = TempDir::new().unwrap();
		fs::write( dir.path().join("only.jpg"), b"the only copy" ).unwrap();

		let config = Config::for_roots( dir.path(), dir.path() );
		assert!( matches!( run_exact_dedup( &config, &no_shutdown() ), Err(DedupeError::Config(_)) ) );
		assert!( dir.path().join("only.jpg").exists() );
	}

	#[test]
	fn test_nested_root_is_refused_and_nothing_deleted() {
		let dir = TempDir::new().unwrap();
		let nested = dir.path().join("onedrive");
		fs::create_dir( &nested ).unwrap();
		fs::write( nested.join("only.jpg"), b"the only copy" ).unwrap();

		let mut config = Config::for_roots( dir.path(), &nested );
		config.scan.recursive = true;
		assert!( matches!( run_exact_dedup( &config, &no_shutdown() ), Err(DedupeError::Config(_)) ) );
		assert!( nested.join("only.jpg").exists() );
	}

	#[test]
	fn test_same_file_sees_through_dot_segments() {
		let dir = TempDir::new().unwrap();
		fs::create_dir( dir.path().join("sub") ).unwrap();
		let path = dir.path().join("only.jpg");
		fs::write( &path, b"x" ).unwrap();

		assert!( same_file( &path, &dir.path().join("sub").join("..").join("only.jpg") ) );
		assert!( !same_file( &path, &dir.path().join("other.jpg") ) );
	}
}
