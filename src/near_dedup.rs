//! Near-duplicate resolver for the destination tree.
//!
//! Sync clients sometimes re-upload a photo under a name whose millisecond
//! field differs (`20020804_180648000_iOS.jpg` vs `20020804_180648100_iOS.jpg`).
//! Files are grouped by the timestamp truncated to seconds, each group is
//! split into fingerprint clusters, and within a cluster the single
//! zero-millisecond file is kept as the original. Anything less clear cut
//! is left alone and reported for manual review.
//!
//! Groups run in parallel; everything inside one group is sequential
//! because first-match clustering depends on visiting order.

use chrono::NaiveDateTime;
use log::{debug, info};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::channel;
use std::sync::Arc;
use threadpool::ThreadPool;

use crate::config::{ClusterStrategy, Config};
use crate::dedupe_error::DedupeError;
use crate::file_list::{walk_files, FileRecord, ScanOptions};
use crate::file_ops::delete_file;
use crate::filename::parse_camera_name;
use crate::histogram::Fingerprint;
use crate::report::{multi_progress, progress_bar, PassReport};

/// Capture second -> every file whose name encodes that second.
pub type TimestampGroups = BTreeMap<NaiveDateTime, Vec<PathBuf>>;

#[derive(Debug, PartialEq, Eq)]
enum Decision {
	Keep(usize),
	Ambiguous(String),
}

fn file_name( path: &Path ) -> Option<&str> {
	path.file_name().and_then(|n| n.to_str())
}

//Files whose names don't parse are simply not candidates
pub fn group_by_timestamp<I: IntoIterator<Item = PathBuf>>( paths: I ) -> TimestampGroups {
	let mut groups = TimestampGroups::new();
	for path in paths {
		let parsed = file_name( &path ).map(parse_camera_name);
		match parsed {
			Some(Ok(name)) => groups.entry(name.timestamp).or_default().push( path ),
			_ => debug!("not a camera-named file, ignored: {}", path.display()),
		}
	}
	groups
}

/// Each file joins the first cluster whose first member it matches. Not
/// transitive: A~B and B~C can still leave C on its own if A!~C.
pub fn cluster_first_match( fingerprints: &[Fingerprint] ) -> Vec<Vec<usize>> {
	let mut clusters: Vec<Vec<usize>> = Vec::new();
	for (i, fp) in fingerprints.iter().enumerate() {
		match clusters.iter_mut().find(|c| fingerprints[c[0]].approx_eq( fp )) {
			Some(cluster) => cluster.push(i),
			None => clusters.push(vec![i]),
		}
	}
	clusters
}

/// Transitive closure of pairwise equality.
pub fn cluster_union_find( fingerprints: &[Fingerprint] ) -> Vec<Vec<usize>> {
	let n = fingerprints.len();
	let mut parent: Vec<usize> = (0..n).collect();

	fn find( parent: &mut [usize], i: usize ) -> usize {
		if parent[i] != i {
			parent[i] = find( parent, parent[i] );
		}
		parent[i]
	}

	for i in 0..n {
		for j in (i + 1)..n {
			if fingerprints[i].approx_eq( &fingerprints[j] ) {
				let (pi, pj) = (find( &mut parent, i ), find( &mut parent, j ));
				if pi != pj {
					//Lowest index stays the root so cluster order is stable
					parent[pi.max(pj)] = pi.min(pj);
				}
			}
		}
	}

	let mut by_root: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
	for i in 0..n {
		let root = find( &mut parent, i );
		by_root.entry(root).or_default().push(i);
	}
	by_root.into_values().collect()
}

fn choose_canonical( paths: &[&PathBuf] ) -> Result<Decision, DedupeError> {
	let mut millis: Vec<u16> = Vec::with_capacity(paths.len());
	for path in paths {
		let name = file_name( path ).unwrap_or("");
		let parsed = parse_camera_name( name )
			.map_err(|_| DedupeError::InvariantViolation(format!("{} was grouped by timestamp but no longer parses", path.display())))?;
		millis.push( parsed.millis );
	}

	let unique: HashSet<u16> = millis.iter().cloned().collect();
	if unique.len() != millis.len() {
		return Ok(Decision::Ambiguous("millisecond suffixes collide".to_string()));
	}

	let zeros: Vec<usize> = millis.iter().enumerate().filter(|(_, ms)| **ms == 0).map(|(i, _)| i).collect();
	match zeros.as_slice() {
		[only] => Ok(Decision::Keep(*only)),
		_ => Ok(Decision::Ambiguous("no zero-millisecond member".to_string())),
	}
}

/// Fingerprint, cluster and resolve one timestamp group. A fatal error
/// stops the group but the report still lists what was already deleted.
pub fn resolve_group( mut paths: Vec<PathBuf>, strategy: ClusterStrategy, dry_run: bool, shutdown: &AtomicBool ) -> PassReport {
	let mut report = PassReport::new( "resolve", dry_run );
	paths.sort();

	let mut members: Vec<PathBuf> = Vec::with_capacity(paths.len());
	let mut fingerprints: Vec<Fingerprint> = Vec::with_capacity(paths.len());
	for path in paths {
		if shutdown.load(Ordering::SeqCst) {
			report.cancelled = true;
			return report;
		}
		let mut record = FileRecord::new( path );
		match record.fingerprint().map(Fingerprint::clone) {
			Ok(fp) => {
				members.push( record.into_path() );
				fingerprints.push( fp );
			},
			Err(e) if e.is_per_file() => report.record_failure( record.into_path(), e ),
			Err(e) => {
				report.abort( e );
				return report;
			},
		}
	}

	let clusters = match strategy {
		ClusterStrategy::FirstMatch => cluster_first_match( &fingerprints ),
		ClusterStrategy::UnionFind => cluster_union_find( &fingerprints ),
	};

	for cluster in clusters.iter().filter(|c| c.len() > 1) {
		let cluster_paths: Vec<&PathBuf> = cluster.iter().map(|&i| &members[i]).collect();

		let decision = match choose_canonical( &cluster_paths ) {
			Ok(decision) => decision,
			Err(e) => {
				report.abort( e );
				return report;
			},
		};

		match decision {
			Decision::Keep(keep) => {
				let canonical = cluster_paths[keep];
				for (i, path) in cluster_paths.iter().enumerate() {
					if i == keep {
						continue;
					}
					if shutdown.load(Ordering::SeqCst) {
						report.cancelled = true;
						return report;
					}
					info!("{} is a re-upload of {}", path.display(), canonical.display());
					match delete_file( path, dry_run ) {
						Ok(()) => report.deleted.push( (*path).clone() ),
						Err(e) => report.record_failure( (*path).clone(), e ),
					}
				}
			},
			Decision::Ambiguous(reason) => {
				report.record_review( DedupeError::AmbiguousCluster {
					paths: cluster_paths.iter().map(|p| (*p).clone()).collect(),
					reason,
				});
			},
		}
	}

	report
}

pub fn run_near_dedup( config: &Config, shutdown: &Arc<AtomicBool> ) -> Result<PassReport, DedupeError> {
	let root = config.new_root()?;
	info!("Near duplicate pass over {}", root.display());

	let mut report = PassReport::new( "resolve", config.dry_run );
	let options = ScanOptions::with_extensions( &config.scan, &config.scan.resolve_extensions );

	let mut files: Vec<PathBuf> = Vec::new();
	for entry in walk_files( root, &options ) {
		match entry {
			Ok(path) => files.push( path ),
			Err(failure) => report.record_failure( failure.path, failure.error ),
		}
	}
	report.scanned = files.len();

	let candidates: Vec<Vec<PathBuf>> = group_by_timestamp( files )
		.into_values()
		.filter(|paths| paths.len() > 1)
		.collect();
	info!("{} timestamp groups with more than one file", candidates.len());
	if candidates.is_empty() {
		return Ok(report);
	}

	let pool = ThreadPool::with_name( "resolve".to_string(), config.resolve.threads.min(candidates.len()) );
	let (tx, rx) = channel();
	let multi = multi_progress( config.show_progress );
	let progress = progress_bar( &multi, candidates.len() as u64, "groups" );

	for paths in candidates {
		let tx = tx.clone();
		let shutdown = Arc::clone(shutdown);
		let (strategy, dry_run) = (config.resolve.cluster_strategy, config.dry_run);
		pool.execute(move || {
			let _ = tx.send( resolve_group( paths, strategy, dry_run, &shutdown ) );
		});
	}
	drop(tx);

	for group_report in rx {
		progress.inc(1);
		report.merge( group_report );
	}
	progress.finish();

	Ok(report)
}
