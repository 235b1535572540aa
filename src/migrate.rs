//! Moves legacy dotted-name photos (`2016-04-02 16.40.25 HDR-2.jpg`) from the
//! old tree into the new tree under camera-upload names, so the two
//! collections end up with one naming scheme.

use chrono::{FixedOffset, Local, NaiveDateTime, TimeZone};
use exif::{In, Reader, Tag, Value};
use log::{debug, info};
use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::config::Config;
use crate::dedupe_error::DedupeError;
use crate::file_list::{walk_files, FileRecord, ScanOptions};
use crate::file_ops::{delete_file, move_file};
use crate::filename::{format_camera_name, parse_legacy_name, CameraMake};
use crate::histogram::Fingerprint;
use crate::report::{multi_progress, progress_bar, PassReport};

//Make tag as a string, NUL padding removed. Files without EXIF have no make.
fn read_camera_make( path: &Path ) -> Result<Option<String>, DedupeError> {
	let file = File::open(path).map_err(|e| DedupeError::io( path, e ))?;
	let mut buf_reader = BufReader::new(file);

	let exif_reader = match Reader::new().read_from_container(&mut buf_reader) {
		Ok(reader) => reader,
		Err(e) => {
			debug!("no EXIF in {}: {}", path.display(), e);
			return Ok(None);
		},
	};

	let make = exif_reader.get_field(Tag::Make, In::PRIMARY).and_then(|field| match &field.value {
		Value::Ascii(vec) => vec.first().map(|v| String::from_utf8_lossy(v).trim_end_matches('\0').to_string()),
		other => Some(format!("{}", other.display_as(Tag::Make))),
	});
	Ok(make)
}

//Legacy names carry wall clock time in the zone the photos were taken in
fn to_utc( local: NaiveDateTime, utc_offset_minutes: Option<i32>, name: &str ) -> Result<NaiveDateTime, DedupeError> {
	let utc = match utc_offset_minutes {
		Some(minutes) => {
			let offset = FixedOffset::east_opt(minutes * 60)
				.ok_or_else(|| DedupeError::Config(format!("UTC offset of {} minutes is out of range", minutes)))?;
			offset.from_local_datetime(&local).single().map(|t| t.naive_utc())
		},
		None => Local.from_local_datetime(&local).earliest().map(|t| t.naive_utc()),
	};
	utc.ok_or_else(|| DedupeError::UnparsableFilename(format!("{} (time does not exist in the local zone)", name)))
}

enum Migration {
	Moved,
	AlreadyPresent,
	Conflict,
}

//`planned` maps targets a dry run would have filled to the file that would be there
fn migrate_file( record: &mut FileRecord, new_root: &Path, config: &Config, planned: &mut HashMap<PathBuf, PathBuf>, report: &mut PassReport ) -> Result<Migration, DedupeError> {
	let legacy = parse_legacy_name( record.file_name() )?;
	let make = CameraMake::from_exif_make( read_camera_make( record.path() )?.as_deref() );
	let utc = to_utc( legacy.timestamp, config.migrate.utc_offset_minutes, record.file_name() )?;
	let target = new_root.join( format_camera_name( utc, legacy.counter, make, legacy.hdr ) );

	let occupant = if target.exists() {
		target.clone()
	}else if let Some(source) = planned.get(&target) {
		source.clone()
	}else{
		move_file( record.path(), &target, config.dry_run )?;
		if config.dry_run {
			planned.insert( target.clone(), record.path().to_path_buf() );
		}
		report.moved.push( (record.path().to_path_buf(), target) );
		return Ok(Migration::Moved);
	};

	debug!("{} already exists, comparing with {}", target.display(), record.path().display());
	let old_fp = record.fingerprint()?.clone();
	let new_fp = Fingerprint::from_path( &occupant )?;
	if old_fp.approx_eq( &new_fp ) {
		delete_file( record.path(), config.dry_run )?;
		report.deleted.push( record.path().to_path_buf() );
		Ok(Migration::AlreadyPresent)
	}else{
		report.record_review( DedupeError::AmbiguousCluster {
			paths: vec![ record.path().to_path_buf(), target ],
			reason: "target exists with a different fingerprint".to_string(),
		});
		Ok(Migration::Conflict)
	}
}

pub fn run_migrate( config: &Config, shutdown: &Arc<AtomicBool> ) -> Result<PassReport, DedupeError> {
	let old_root = config.old_root()?;
	let new_root = config.new_root()?;
	info!("Migrating legacy names from {} into {}", old_root.display(), new_root.display());

	let mut report = PassReport::new( "migrate", config.dry_run );
	let options = ScanOptions::with_extensions( &config.scan, &config.scan.migrate_extensions );

	let mut files = Vec::new();
	for entry in walk_files( old_root, &options ) {
		match entry {
			Ok(path) => files.push( path ),
			Err(failure) => report.record_failure( failure.path, failure.error ),
		}
	}
	files.sort();
	report.scanned = files.len();

	let multi = multi_progress( config.show_progress );
	let progress = progress_bar( &multi, files.len() as u64, "migrate" );

	let mut planned = HashMap::new();
	let (mut moved, mut present, mut conflicts) = (0, 0, 0);
	for path in files {
		if shutdown.load(Ordering::SeqCst) {
			report.cancelled = true;
			break;
		}
		let mut record = FileRecord::new( path );
		match migrate_file( &mut record, new_root, config, &mut planned, &mut report ) {
			Ok(Migration::Moved) => moved += 1,
			Ok(Migration::AlreadyPresent) => present += 1,
			Ok(Migration::Conflict) => conflicts += 1,
			Err(e) if e.is_per_file() => report.record_failure( record.into_path(), e ),
			Err(e) => {
				report.abort( e );
				break;
			},
		}
		progress.inc(1);
	}
	progress.finish();

	info!("Migrate: {} moved, {} already present, {} conflicting", moved, present, conflicts);
	Ok(report)
}
