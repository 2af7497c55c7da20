//! Profile records and name handling.

use std::collections::HashSet;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A named, isolated browser user-data sandbox as stored in the catalog.
///
/// The orchestration core treats this as read-only input; ownership of
/// the record lives with the catalog store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
	pub id: u64,
	pub name: String,
	pub group_name: Option<String>,
	pub proxy_name: Option<String>,
	pub remark: Option<String>,
}

impl Profile {
	/// Builds the synthetic record used for externally requested
	/// launches, where only id/name/proxy are known from the payload.
	pub fn external(id: u64, name: String, proxy_name: Option<String>) -> Self {
		Self {
			id,
			name,
			group_name: None,
			proxy_name,
			remark: None,
		}
	}
}

const NAME_CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
const GENERATED_NAME_LEN: usize = 6;
const GENERATION_RETRY_CAP: u32 = 16;

/// Validates that a profile name is safe to use as a directory name.
///
/// Lowercase alphanumerics plus `-` and `_`; never empty. Names become
/// the last path segment of the user-data directory, so anything that
/// could alter path resolution is rejected outright.
pub fn validate_name(name: &str) -> Result<()> {
	if name.is_empty() {
		return Err(Error::InvalidName("name must not be empty".into()));
	}
	let ok = name
		.chars()
		.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_');
	if !ok {
		return Err(Error::InvalidName(format!(
			"{name:?} may only contain lowercase letters, digits, '-' and '_'"
		)));
	}
	Ok(())
}

/// Returns the last non-empty segment of a user-data directory path.
///
/// Accepts both separator styles since the process service may report
/// paths in platform-native form.
pub fn basename(path: &str) -> Option<&str> {
	path.split(['/', '\\']).filter(|part| !part.is_empty()).next_back()
}

/// Generates `count` short names not present in `existing`.
///
/// Each candidate is rechecked against both the store's names and the
/// names generated earlier in the same batch; a collision regenerates,
/// bounded by a retry cap so a saturated namespace fails loudly instead
/// of spinning.
pub fn generate_unique_names(count: usize, existing: &HashSet<String>) -> Result<Vec<String>> {
	let mut rng = rand::thread_rng();
	let mut names = Vec::with_capacity(count);
	let mut taken: HashSet<String> = existing.clone();

	for _ in 0..count {
		let mut attempts = 0;
		let name = loop {
			if attempts == GENERATION_RETRY_CAP {
				return Err(Error::NameGeneration { attempts });
			}
			attempts += 1;
			let candidate: String = (0..GENERATED_NAME_LEN)
				.map(|_| NAME_CHARSET[rng.gen_range(0..NAME_CHARSET.len())] as char)
				.collect();
			if !taken.contains(&candidate) {
				break candidate;
			}
		};
		taken.insert(name.clone());
		names.push(name);
	}

	Ok(names)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn valid_names_pass() {
		for name in ["abc123", "my-profile", "a_b-c", "x"] {
			assert!(validate_name(name).is_ok(), "{name} should be valid");
		}
	}

	#[test]
	fn invalid_names_rejected() {
		for name in ["", "Has Upper", "dot.dot", "../escape", "sp ace", "sla/sh"] {
			assert!(validate_name(name).is_err(), "{name:?} should be rejected");
		}
	}

	#[test]
	fn basename_handles_both_separators() {
		assert_eq!(basename("/data/profiles/abc123"), Some("abc123"));
		assert_eq!(basename("C:\\Users\\me\\profiles\\abc123"), Some("abc123"));
		assert_eq!(basename("/data/profiles/abc123/"), Some("abc123"));
		assert_eq!(basename(""), None);
		assert_eq!(basename("///"), None);
	}

	#[test]
	fn generated_names_are_unique_and_avoid_existing() {
		let existing: HashSet<String> = ["aaaaaa".to_string()].into_iter().collect();
		let names = generate_unique_names(50, &existing).unwrap();
		assert_eq!(names.len(), 50);
		let distinct: HashSet<&String> = names.iter().collect();
		assert_eq!(distinct.len(), 50);
		for name in &names {
			assert_eq!(name.len(), 6);
			assert!(!existing.contains(name));
			assert!(validate_name(name).is_ok());
		}
	}
}
