// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Deterministic bucketing hash.
//!
//! Every SDK port maps `(seed, value)` onto the same point of `[0, 1)`, so the
//! arithmetic here is fixed: FNV-1a over UTF-8 bytes, then a modulus that
//! depends on the hash version.

use serde::{Deserialize, Serialize};

use crate::error::{FlagsError, Result};

const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

/// Supported hashing schemes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum HashVersion {
	/// `fnv(value + seed) % 1000 / 1000`.
	#[default]
	V1,
	/// `fnv(str(fnv(seed + value))) % 10000 / 10000`.
	V2,
}

impl HashVersion {
	pub fn as_u32(self) -> u32 {
		match self {
			HashVersion::V1 => 1,
			HashVersion::V2 => 2,
		}
	}
}

impl TryFrom<u32> for HashVersion {
	type Error = FlagsError;

	fn try_from(raw: u32) -> Result<Self> {
		match raw {
			1 => Ok(HashVersion::V1),
			2 => Ok(HashVersion::V2),
			other => Err(FlagsError::UnsupportedHashVersion(other)),
		}
	}
}

impl From<HashVersion> for u32 {
	fn from(version: HashVersion) -> Self {
		version.as_u32()
	}
}

/// 32-bit FNV-1a over the UTF-8 bytes of `input`.
pub fn fnv1a_32(input: &str) -> u32 {
	input.bytes().fold(FNV_OFFSET_BASIS, |hash, byte| {
		(hash ^ u32::from(byte)).wrapping_mul(FNV_PRIME)
	})
}

/// Hashes `value` with `seed` into `[0, 1)`.
pub fn hash(seed: &str, value: &str, version: HashVersion) -> f64 {
	match version {
		HashVersion::V1 => {
			let n = fnv1a_32(&format!("{value}{seed}"));
			f64::from(n % 1000) / 1000.0
		}
		HashVersion::V2 => {
			let first = fnv1a_32(&format!("{seed}{value}"));
			let n = fnv1a_32(&first.to_string());
			f64::from(n % 10000) / 10000.0
		}
	}
}
