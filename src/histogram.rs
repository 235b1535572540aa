//! Colour-distribution fingerprints.
//!
//! Each image is reduced to three normalised 32-bucket histograms, one per
//! colour channel. Orientation metadata is never consulted: rotating or
//! flipping a raster doesn't change how many pixels fall in each bucket.

use image::{DynamicImage, RgbImage};
use image::io::Reader;
use std::path::Path;

use crate::dedupe_error::DedupeError;

pub const BUCKET_SHIFT: u32 = 5;
pub const BUCKETS: usize = 1 << BUCKET_SHIFT;
pub const BUCKET_DIFF_TOLERANCE: f32 = 0.0001;

const CHANNEL_NAMES: [&str; 3] = [ "red", "green", "blue" ];

#[derive(Debug, Clone, PartialEq)]
pub struct Fingerprint {
	channels: [[f32; BUCKETS]; 3],	//Normalised bucket frequencies for R, G and B
}

//Open an image from the specific path
//Tries to guess the format if it's not known
pub fn load_image_from_file( image_path: &Path ) -> Result<DynamicImage, DedupeError> {

	let img = Reader::open(image_path).map_err(|e| DedupeError::io( image_path, e ))?;

	let format_guessed = img.with_guessed_format().map_err(|e| DedupeError::io( image_path, e ))?;

	format_guessed.decode().map_err(|e| DedupeError::InvalidImage(format!("Failed to decode {}: {}", image_path.display(), e)))
}

impl Fingerprint {

	pub fn from_path( path: &Path ) -> Result<Fingerprint, DedupeError> {
		let img = load_image_from_file( path )?;
		Fingerprint::from_image( &img ).map_err(|e| match e {
			DedupeError::InvalidImage(msg) => DedupeError::InvalidImage(format!("{}: {}", path.display(), msg)),
			other => other,
		})
	}

	//Any pixel layout is accepted, alpha is dropped on conversion
	pub fn from_image( img: &DynamicImage ) -> Result<Fingerprint, DedupeError> {
		match img.as_rgb8() {
			Some(rgb) => Fingerprint::from_rgb( rgb ),
			None => Fingerprint::from_rgb( &img.to_rgb8() ),
		}
	}

	pub fn from_rgb( img: &RgbImage ) -> Result<Fingerprint, DedupeError> {
		let total_pixels = (img.width() as u64) * (img.height() as u64);
		if total_pixels == 0 {
			return Err(DedupeError::InvalidImage(format!("image has no pixels ({}x{})", img.width(), img.height())));
		}

		let shift = 8 - BUCKET_SHIFT;
		let mut counts = [[0u64; BUCKETS]; 3];
		for pixel in img.pixels() {
			for (channel, value) in pixel.0.iter().enumerate() {
				counts[channel][(*value >> shift) as usize] += 1;
			}
		}

		let total = total_pixels as f64;
		let mut channels = [[0f32; BUCKETS]; 3];
		for (normalised, raw) in channels.iter_mut().zip(counts.iter()) {
			for (freq, count) in normalised.iter_mut().zip(raw.iter()) {
				*freq = (*count as f64 / total) as f32;
			}
		}

		Ok(Fingerprint { channels })
	}

	pub fn red(&self) -> &[f32; BUCKETS] {
		&self.channels[0]
	}

	pub fn green(&self) -> &[f32; BUCKETS] {
		&self.channels[1]
	}

	pub fn blue(&self) -> &[f32; BUCKETS] {
		&self.channels[2]
	}

	/// Approximate equality: every bucket of every channel must be within
	/// [`BUCKET_DIFF_TOLERANCE`] of its counterpart.
	pub fn approx_eq( &self, other: &Fingerprint ) -> bool {
		self.channels.iter()
			.zip(other.channels.iter())
			.all(|(a, b)| buckets_within_tolerance( a, b ))
	}

	//Largest single bucket difference and the channel it was found in
	pub fn max_difference( &self, other: &Fingerprint ) -> (f32, &'static str) {
		let mut worst = (0f32, CHANNEL_NAMES[0]);
		for (channel, (a, b)) in self.channels.iter().zip(other.channels.iter()).enumerate() {
			for (x, y) in a.iter().zip(b.iter()) {
				let diff = (x - y).abs();
				if diff > worst.0 {
					worst = (diff, CHANNEL_NAMES[channel]);
				}
			}
		}
		worst
	}
}

#[cfg(test)]
impl Fingerprint {
	pub fn from_channels( channels: [[f32; BUCKETS]; 3] ) -> Fingerprint {
		Fingerprint { channels }
	}
}

fn buckets_within_tolerance( a: &[f32; BUCKETS], b: &[f32; BUCKETS] ) -> bool {
	!a.iter().zip(b.iter()).any(|(x, y)| (x - y).abs() > BUCKET_DIFF_TOLERANCE)
}
