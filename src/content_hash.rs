use sha2::{Digest, Sha512};
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

use crate::dedupe_error::DedupeError;

pub const DIGEST_LEN: usize = 64;

const HASH_BUFFER_SIZE: usize = 64 * 1024;

/// SHA-512 of a file's full byte stream. Only ever used as a map key.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentDigest([u8; DIGEST_LEN]);

impl fmt::Display for ContentDigest {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		for b in &self.0 {
			write!(f, "{:02x}", b)?;
		}
		Ok(())
	}
}

//Short form keeps log lines readable
impl fmt::Debug for ContentDigest {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "ContentDigest(")?;
		for b in &self.0[..8] {
			write!(f, "{:02x}", b)?;
		}
		write!(f, "..)")
	}
}

/// A hashing context owned by exactly one worker for the duration of one
/// file. Never shared between concurrent jobs.
pub struct ContentHasher {
	hasher: Sha512,
}

impl ContentHasher {

	pub fn new() -> ContentHasher {
		ContentHasher { hasher: Sha512::new() }
	}

	pub fn digest_reader<R: Read>( &mut self, reader: R ) -> std::io::Result<ContentDigest> {
		let mut reader = BufReader::with_capacity( HASH_BUFFER_SIZE, reader );
		loop {
			let buf = reader.fill_buf()?;
			let len = buf.len();
			if len == 0 {
				break;
			}
			self.hasher.update( buf );
			reader.consume( len );
		}

		let mut out = [0u8; DIGEST_LEN];
		out.copy_from_slice( &self.hasher.finalize_reset() );
		Ok(ContentDigest(out))
	}

	pub fn digest_file( &mut self, path: &Path ) -> Result<ContentDigest, DedupeError> {
		let file = File::open(path).map_err(|e| DedupeError::io( path, e ))?;
		self.digest_reader( file ).map_err(|e| DedupeError::io( path, e ))
	}
}

impl Default for ContentHasher {
	fn default() -> Self {
		Self::new()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::fs;
	use tempfile::TempDir;

	#[test]
	fn test_digest_matches_known_sha512() {
		let digest = ContentHasher::new().digest_reader( &b"abc"[..] ).unwrap();
		assert!( digest.to_string().starts_with("ddaf35a193617aba"), "SHA-512 of \"abc\"" );
		assert_eq!( digest.to_string().len(), DIGEST_LEN * 2 );
	}

	#[test]
	fn test_hasher_is_reusable_after_finalize() {
		let mut hasher = ContentHasher::new();
		let first = hasher.digest_reader( &b"Identical content"[..] ).unwrap();
		let second = hasher.digest_reader( &b"Identical content"[..] ).unwrap();
		assert_eq!( first, second );
	}

	#[test]
	fn test_identical_files_same_digest() {
		let temp_dir = TempDir::new().unwrap();
		let file1 = temp_dir.path().join("photo.jpg");
		let file2 = temp_dir.path().join("photo_copy.jpg");
		let file3 = temp_dir.path().join("unique.jpg");

		//Larger than one read buffer so the streaming loop is exercised
		let content: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
		fs::write( &file1, &content ).unwrap();
		fs::write( &file2, &content ).unwrap();
		fs::write( &file3, b"Content B" ).unwrap();

		let mut hasher = ContentHasher::new();
		let d1 = hasher.digest_file( &file1 ).unwrap();
		let d2 = hasher.digest_file( &file2 ).unwrap();
		let d3 = hasher.digest_file( &file3 ).unwrap();
		assert_eq!( d1, d2 );
		assert_ne!( d1, d3 );
	}

	#[test]
	fn test_missing_file_is_io_failure() {
		let temp_dir = TempDir::new().unwrap();
		let missing = temp_dir.path().join("gone.jpg");
		match ContentHasher::new().digest_file( &missing ) {
			Err(DedupeError::IoFailure { path, .. }) => assert_eq!( path, missing ),
			other => panic!("expected IoFailure, got {:?}", other),
		}
	}
}
