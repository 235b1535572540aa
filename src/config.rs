//! Run configuration.
//!
//! Everything a pass needs is carried in [`Config`]: the two tree roots,
//! scan filters, worker counts and the safety switches. Values come from an
//! optional TOML file and are then overridden from the command line.

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::dedupe_error::DedupeError;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
	pub roots: RootsConfig,
	pub scan: ScanConfig,
	pub hashing: HashingConfig,
	pub resolve: ResolveConfig,
	pub migrate: MigrateConfig,
	pub logging: LoggingConfig,

	/// Log and report deletions/moves without touching the filesystem
	pub dry_run: bool,

	/// Exit non-zero when any file operation failed or a cluster was ambiguous
	pub strict: bool,

	pub show_progress: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RootsConfig {
	pub old: Option<PathBuf>,	//Tree written by the previous sync client
	pub new: Option<PathBuf>,	//Destination tree
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
	pub recursive: bool,
	pub include_hidden: bool,
	pub resolve_extensions: Vec<String>,
	pub migrate_extensions: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HashingConfig {
	pub threads: usize,
	pub channel_bound: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ClusterStrategy {
	/// Join the first cluster whose representative matches
	#[default]
	FirstMatch,
	/// Merge every pairwise-equal file into one transitive cluster
	UnionFind,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ResolveConfig {
	pub threads: usize,
	pub cluster_strategy: ClusterStrategy,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MigrateConfig {
	/// Offset of the legacy dotted timestamps from UTC; local zone when absent
	pub utc_offset_minutes: Option<i32>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
	pub level: String,
}

impl Default for Config {
	fn default() -> Self {
		Config {
			roots: RootsConfig::default(),
			scan: ScanConfig::default(),
			hashing: HashingConfig::default(),
			resolve: ResolveConfig::default(),
			migrate: MigrateConfig::default(),
			logging: LoggingConfig::default(),
			dry_run: false,
			strict: false,
			show_progress: true,
		}
	}
}

impl Default for ScanConfig {
	fn default() -> Self {
		ScanConfig {
			recursive: false,
			include_hidden: false,
			resolve_extensions: vec![ "jpg".to_string(), "jpeg".to_string() ],
			migrate_extensions: vec![ "jpg".to_string() ],
		}
	}
}

impl Default for HashingConfig {
	//Hashing is I/O bound, so only half the cores compete for the disk
	fn default() -> Self {
		HashingConfig { threads: (num_cpus::get() / 2).max(1), channel_bound: 64 }
	}
}

impl Default for ResolveConfig {
	fn default() -> Self {
		ResolveConfig { threads: num_cpus::get().max(1), cluster_strategy: ClusterStrategy::FirstMatch }
	}
}

impl Default for LoggingConfig {
	fn default() -> Self {
		LoggingConfig { level: "info".to_string() }
	}
}

impl Config {

	pub fn load( path: &Path ) -> Result<Config, DedupeError> {
		let text = fs::read_to_string(path).map_err(|e| DedupeError::io( path, e ))?;
		Config::from_toml( &text )
	}

	pub fn from_toml( text: &str ) -> Result<Config, DedupeError> {
		toml::from_str(text).map_err(|e| DedupeError::Config(e.to_string()))
	}

	pub fn validate(&self) -> Result<(), DedupeError> {
		if self.hashing.threads < 1 {
			return Err(DedupeError::Config("hashing.threads must be greater than 0".to_string()));
		}
		if self.hashing.channel_bound < 1 {
			return Err(DedupeError::Config("hashing.channel_bound must be greater than 0".to_string()));
		}
		if self.resolve.threads < 1 {
			return Err(DedupeError::Config("resolve.threads must be greater than 0".to_string()));
		}
		if let Some(offset) = self.migrate.utc_offset_minutes {
			if offset.abs() >= 24 * 60 {
				return Err(DedupeError::Config(format!("migrate.utc_offset_minutes {} is out of range", offset)));
			}
		}
		Ok(())
	}

	pub fn old_root(&self) -> Result<&Path, DedupeError> {
		require_dir( "old", self.roots.old.as_deref() )
	}

	pub fn new_root(&self) -> Result<&Path, DedupeError> {
		require_dir( "new", self.roots.new.as_deref() )
	}

	/// Both roots in canonical form. Fails if one tree contains the other,
	/// since every file under the overlap would then match itself.
	pub fn disjoint_roots(&self) -> Result<(PathBuf, PathBuf), DedupeError> {
		let old = canonical_root( self.old_root()? )?;
		let new = canonical_root( self.new_root()? )?;
		if old.starts_with(&new) || new.starts_with(&old) {
			return Err(DedupeError::Config(format!("old root \"{}\" and new root \"{}\" overlap", old.display(), new.display())));
		}
		Ok((old, new))
	}
}

fn canonical_root( root: &Path ) -> Result<PathBuf, DedupeError> {
	fs::canonicalize(root).map_err(|e| DedupeError::io( root, e ))
}

fn require_dir<'a>( name: &str, root: Option<&'a Path> ) -> Result<&'a Path, DedupeError> {
	let root = root.ok_or_else(|| DedupeError::Config(format!("the {} root is not configured (use --{} or [roots] {})", name, name, name)))?;
	if !root.is_dir() {
		return Err(DedupeError::Config(format!("{} root \"{}\" is not a directory", name, root.display())));
	}
	Ok(root)
}

#[cfg(test)]
impl Config {
	//Quiet, deterministic settings for scenario tests
	pub fn for_roots( old: &Path, new: &Path ) -> Config {
		let mut config = Config::default();
		config.roots.old = Some(old.to_path_buf());
		config.roots.new = Some(new.to_path_buf());
		config.hashing.threads = 2;
		config.resolve.threads = 2;
		config.migrate.utc_offset_minutes = Some(0);
		config.show_progress = false;
		config
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use tempfile::TempDir;

	#[test]
	fn test_empty_file_gives_defaults() {
		let config = Config::from_toml("").unwrap();
		assert!( config.show_progress );
		assert!( !config.dry_run );
		assert!( !config.scan.recursive );
		assert_eq!( config.resolve.cluster_strategy, ClusterStrategy::FirstMatch );
		assert!( config.hashing.threads >= 1 );
		assert_eq!( config.logging.level, "info" );
		config.validate().unwrap();
	}

	#[test]
	fn test_full_file() {
		let text = r#"
			dry_run = true
			show_progress = false

			[roots]
			old = "/photos/dropbox"
			new = "/photos/onedrive"

			[hashing]
			threads = 3

			[resolve]
			cluster_strategy = "union-find"

			[migrate]
			utc_offset_minutes = -420
		"#;
		let config = Config::from_toml(text).unwrap();
		assert!( config.dry_run );
		assert!( !config.show_progress );
		assert_eq!( config.roots.old, Some(PathBuf::from("/photos/dropbox")) );
		assert_eq!( config.hashing.threads, 3 );
		assert_eq!( config.hashing.channel_bound, 64 );
		assert_eq!( config.resolve.cluster_strategy, ClusterStrategy::UnionFind );
		assert_eq!( config.migrate.utc_offset_minutes, Some(-420) );
		config.validate().unwrap();
	}

	#[test]
	fn test_unknown_strategy_is_config_error() {
		match Config::from_toml("[resolve]\ncluster_strategy = \"closest\"\n") {
			Err(DedupeError::Config(_)) => {},
			other => panic!("expected Config error, got {:?}", other),
		}
	}

	#[test]
	fn test_zero_threads_rejected() {
		let config = Config::from_toml("[hashing]\nthreads = 0\n").unwrap();
		assert!( matches!( config.validate(), Err(DedupeError::Config(_)) ) );
	}

	#[test]
	fn test_roots_must_be_existing_directories() {
		let dir = TempDir::new().unwrap();
		let file = dir.path().join("not_a_dir.jpg");
		std::fs::write( &file, b"x" ).unwrap();

		let mut config = Config::default();
		assert!( matches!( config.old_root(), Err(DedupeError::Config(_)) ) );

		config.roots.old = Some(file);
		assert!( matches!( config.old_root(), Err(DedupeError::Config(_)) ) );

		config.roots.new = Some(dir.path().to_path_buf());
		assert_eq!( config.new_root().unwrap(), dir.path() );
	}

	#[test]
	fn test_overlapping_roots_are_rejected() {
		let dir = TempDir::new().unwrap();
		let nested = dir.path().join("onedrive");
		let sibling = dir.path().join("dropbox");
		std::fs::create_dir( &nested ).unwrap();
		std::fs::create_dir( &sibling ).unwrap();

		let same = Config::for_roots( dir.path(), dir.path() );
		assert!( matches!( same.disjoint_roots(), Err(DedupeError::Config(_)) ) );

		let inner_new = Config::for_roots( dir.path(), &nested );
		assert!( matches!( inner_new.disjoint_roots(), Err(DedupeError::Config(_)) ) );

		let inner_old = Config::for_roots( &nested, dir.path() );
		assert!( matches!( inner_old.disjoint_roots(), Err(DedupeError::Config(_)) ) );

		//Same directory spelled differently
		let dotted = Config::for_roots( &sibling, &nested.join("..").join("dropbox") );
		assert!( matches!( dotted.disjoint_roots(), Err(DedupeError::Config(_)) ) );

		let apart = Config::for_roots( &sibling, &nested );
		let (old, new) = apart.disjoint_roots().unwrap();
		assert!( old.ends_with("dropbox") && new.ends_with("onedrive") );
	}
}
