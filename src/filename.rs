//! Filename timestamp codec.
//!
//! Two naming shapes are understood:
//!
//! * camera uploads: `20020804_180648000_iOS.jpg`, i.e. `YYYYMMDD_HHMMSS`
//!   followed by a three digit millisecond field and an arbitrary tail
//! * legacy dotted names: `2016-04-02 16.40.25 HDR-2.jpg`

use chrono::NaiveDateTime;
use regex::{Regex, RegexBuilder};
use std::sync::OnceLock;

use crate::dedupe_error::DedupeError;

const CAMERA_TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";
const LEGACY_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H.%M.%S";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraName {
	pub timestamp: NaiveDateTime,	//Capture time truncated to whole seconds
	pub millis: u16,
	pub extra: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyName {
	pub timestamp: NaiveDateTime,
	pub hdr: bool,
	pub counter: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraMake {
	Unknown,
	Apple,
	Other,
}

impl CameraMake {

	pub fn from_exif_make( make: Option<&str> ) -> CameraMake {
		match make {
			None => CameraMake::Unknown,
			Some(m) if m.trim() == "Apple" => CameraMake::Apple,
			Some(_) => CameraMake::Other,
		}
	}

	pub fn suffix(&self) -> &'static str {
		match self {
			CameraMake::Unknown => "",
			CameraMake::Apple => "_iOS",
			CameraMake::Other => "_Android",
		}
	}
}

fn camera_pattern() -> &'static Regex {
	static PATTERN: OnceLock<Regex> = OnceLock::new();
	PATTERN.get_or_init(|| {
		RegexBuilder::new(r"^(?P<date>\d{8}_\d{6})(?P<ms>\d{3})(?P<extra>.*)$")
			.case_insensitive(true)
			.build()
			.expect("camera filename pattern is valid")
	})
}

fn legacy_pattern() -> &'static Regex {
	static PATTERN: OnceLock<Regex> = OnceLock::new();
	PATTERN.get_or_init(|| {
		RegexBuilder::new(r"^(?P<timestamp>\d{4}-\d{2}-\d{2} \d{2}\.\d{2}\.\d{2})(?P<hdr> HDR)?(-(?P<counter>\d))?\.jpg$")
			.case_insensitive(true)
			.build()
			.expect("legacy filename pattern is valid")
	})
}

pub fn parse_camera_name( name: &str ) -> Result<CameraName, DedupeError> {
	let caps = camera_pattern().captures(name).ok_or_else(|| DedupeError::UnparsableFilename(name.to_string()))?;

	let timestamp = NaiveDateTime::parse_from_str( &caps["date"], CAMERA_TIMESTAMP_FORMAT )
		.map_err(|_| DedupeError::UnparsableFilename(name.to_string()))?;
	let millis = caps["ms"].parse::<u16>().map_err(|_| DedupeError::UnparsableFilename(name.to_string()))?;

	Ok(CameraName { timestamp, millis, extra: caps["extra"].to_string() })
}

pub fn parse_legacy_name( name: &str ) -> Result<LegacyName, DedupeError> {
	let caps = legacy_pattern().captures(name).ok_or_else(|| DedupeError::UnparsableFilename(name.to_string()))?;

	let timestamp = NaiveDateTime::parse_from_str( &caps["timestamp"], LEGACY_TIMESTAMP_FORMAT )
		.map_err(|_| DedupeError::UnparsableFilename(name.to_string()))?;
	let counter = match caps.name("counter") {
		Some(c) => c.as_str().parse::<u8>().map_err(|_| DedupeError::UnparsableFilename(name.to_string()))?,
		None => 0,
	};

	Ok(LegacyName { timestamp, hdr: caps.name("hdr").is_some(), counter })
}

//The counter lands in the millisecond field as "00N"
pub fn format_camera_name( utc: NaiveDateTime, counter: u8, make: CameraMake, hdr: bool ) -> String {
	format!("{}00{}{}{}.jpg",
		utc.format(CAMERA_TIMESTAMP_FORMAT),
		counter,
		make.suffix(),
		if hdr { "_HDR" } else { "" })
}
