use anyhow::Context;
use clap::{Parser, Subcommand};
use env_logger::{Builder, Env};
use log::info;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

mod config;
mod content_hash;
mod dedupe_error;
mod exact_dedup;
mod file_list;
mod file_ops;
mod filename;
mod histogram;
mod migrate;
mod near_dedup;
mod report;

use config::Config;
use dedupe_error::DedupeError;
use histogram::Fingerprint;
use report::PassReport;

const EXIT_ABORTED: i32 = 1;
const EXIT_PROBLEMS: i32 = 2;
const EXIT_INTERRUPTED: i32 = 130;

#[derive(Parser, Debug)]
#[command(name = "photoreconcile", version, author, about = "Reconciles two overlapping photo collections by removing duplicates")]
struct Cli {
	/// TOML configuration file. Command line options override its values.
	#[arg(long, short = 'c', global = true)]
	config: Option<PathBuf>,

	/// Tree written by the previous sync client
	#[arg(long, global = true)]
	old: Option<PathBuf>,

	/// Destination tree
	#[arg(long, global = true)]
	new: Option<PathBuf>,

	/// Report what would be deleted or moved without touching any file
	#[arg(long, short = 'n', global = true)]
	dry_run: bool,

	/// Exit with status 2 if any file failed or needs manual review
	#[arg(long, global = true)]
	strict: bool,

	/// Worker threads for hashing and for resolving timestamp groups
	#[arg(long, short = 't', global = true)]
	threads: Option<usize>,

	/// Log filter (error, warn, info, debug, trace). RUST_LOG takes precedence.
	#[arg(long, global = true)]
	log_level: Option<String>,

	/// Descend into subdirectories of each root
	#[arg(long, short = 'r', global = true)]
	recursive: bool,

	#[arg(long, global = true)]
	no_progress: bool,

	#[command(subcommand)]
	command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
	/// Delete files whose content also exists in the other tree
	Dedupe,
	/// Remove re-uploads that differ from the original only in the millisecond field
	Resolve,
	/// Move legacy dotted-name photos from the old tree into the new tree
	Migrate,
	/// Print the colour fingerprint of an image, or compare two images
	Inspect {
		first: PathBuf,
		second: Option<PathBuf>,
	},
}

fn build_config( cli: &Cli ) -> anyhow::Result<Config> {
	let mut config = match &cli.config {
		Some(path) => Config::load( path ).with_context(|| format!("Failed to load configuration from {}", path.display()))?,
		None => Config::default(),
	};

	if let Some(old) = &cli.old {
		config.roots.old = Some(old.clone());
	}
	if let Some(new) = &cli.new {
		config.roots.new = Some(new.clone());
	}
	if let Some(threads) = cli.threads {
		config.hashing.threads = threads;
		config.resolve.threads = threads;
	}
	if let Some(level) = &cli.log_level {
		config.logging.level = level.clone();
	}
	config.dry_run |= cli.dry_run;
	config.strict |= cli.strict;
	config.scan.recursive |= cli.recursive;
	if cli.no_progress {
		config.show_progress = false;
	}

	config.validate().context("Invalid configuration")?;
	Ok(config)
}

fn install_shutdown_handler() -> anyhow::Result<Arc<AtomicBool>> {
	let shutdown = Arc::new(AtomicBool::new(false));
	let flag = Arc::clone(&shutdown);

	ctrlc::set_handler(move || {
		if flag.load(Ordering::SeqCst) {
			eprintln!("\nForce shutdown requested. Exiting immediately...");
			std::process::exit(1);
		}else{
			flag.store(true, Ordering::SeqCst);
			eprintln!("\nShutdown requested. Finishing the current file... (Press Ctrl+C again to force quit)");
		}
	}).context("Failed to set Ctrl+C handler")?;

	Ok(shutdown)
}

//Debug function to compare two images and print the internal statistics
fn inspect( first: &Path, second: Option<&Path> ) -> Result<(), DedupeError> {
	let a = Fingerprint::from_path( first )?;
	println!("Fingerprint of {}:", first.display());
	println!("  red:   {:?}", a.red());
	println!("  green: {:?}", a.green());
	println!("  blue:  {:?}", a.blue());

	if let Some(second) = second {
		let b = Fingerprint::from_path( second )?;
		let (difference, channel) = a.max_difference( &b );
		println!("Largest bucket difference: {} ({} channel)", difference, channel);
		println!("Are both images duplicates?: {}", a.approx_eq( &b ));
	}
	Ok(())
}

fn exit_code( report: &PassReport, strict: bool ) -> i32 {
	if report.fatal.is_some() {
		EXIT_ABORTED
	}else if report.cancelled {
		EXIT_INTERRUPTED
	}else if strict && report.has_problems() {
		EXIT_PROBLEMS
	}else{
		0
	}
}

fn run( cli: Cli ) -> anyhow::Result<i32> {
	let config = build_config( &cli )?;
	Builder::from_env(Env::default().default_filter_or(&config.logging.level)).init();

	let report = match &cli.command {
		Command::Inspect { first, second } => {
			inspect( first, second.as_deref() )?;
			return Ok(0);
		},
		Command::Dedupe => {
			let shutdown = install_shutdown_handler()?;
			exact_dedup::run_exact_dedup( &config, &shutdown )?
		},
		Command::Resolve => {
			let shutdown = install_shutdown_handler()?;
			near_dedup::run_near_dedup( &config, &shutdown )?
		},
		Command::Migrate => {
			let shutdown = install_shutdown_handler()?;
			migrate::run_migrate( &config, &shutdown )?
		},
	};

	report.print();
	info!("{} pass finished", report.pass);
	Ok(exit_code( &report, config.strict ))
}

fn main() {
	let cli = Cli::parse();
	match run( cli ) {
		Ok(code) => std::process::exit(code),
		Err(e) => {
			eprintln!("Error: {:#}", e);
			std::process::exit(1);
		},
	}
}
