// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Bucket and namespace range arithmetic.
//!
//! All ranges are left-inclusive and right-exclusive, so a bucket value sitting
//! exactly on a boundary belongs to the following range.

use serde::{Deserialize, Serialize};

use crate::hash::{hash, HashVersion};

/// Weights whose sum falls outside this window are replaced by an equal split.
const WEIGHT_SUM_MIN: f64 = 0.99;
const WEIGHT_SUM_MAX: f64 = 1.01;

/// A half-open interval `[start, end)` inside `[0, 1]`.
///
/// Serialized as a two element array, matching the definition payload.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "(f64, f64)", into = "(f64, f64)")]
pub struct BucketRange {
	pub start: f64,
	pub end: f64,
}

impl BucketRange {
	pub fn new(start: f64, end: f64) -> Self {
		Self { start, end }
	}

	pub fn contains(&self, n: f64) -> bool {
		in_range(n, self)
	}
}

impl From<(f64, f64)> for BucketRange {
	fn from((start, end): (f64, f64)) -> Self {
		Self { start, end }
	}
}

impl From<BucketRange> for (f64, f64) {
	fn from(range: BucketRange) -> Self {
		(range.start, range.end)
	}
}

/// A slice of a shared hash space. Experiments with the same namespace id and
/// disjoint ranges never include the same subject.
///
/// Serialized as `[id, start, end]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "(String, f64, f64)", into = "(String, f64, f64)")]
pub struct Namespace {
	pub id: String,
	pub start: f64,
	pub end: f64,
}

impl Namespace {
	pub fn new(id: impl Into<String>, start: f64, end: f64) -> Self {
		Self {
			id: id.into(),
			start,
			end,
		}
	}

	/// Whether an already hashed value lies inside this namespace slice.
	pub fn contains(&self, n: f64) -> bool {
		self.start <= n && n < self.end
	}
}

impl From<(String, f64, f64)> for Namespace {
	fn from((id, start, end): (String, f64, f64)) -> Self {
		Self { id, start, end }
	}
}

impl From<Namespace> for (String, f64, f64) {
	fn from(ns: Namespace) -> Self {
		(ns.id, ns.start, ns.end)
	}
}

/// `n` weights of `1/n`. Non-positive `n` yields no weights.
pub fn equal_weights(n: usize) -> Vec<f64> {
	if n == 0 {
		return Vec::new();
	}
	vec![1.0 / n as f64; n]
}

/// Builds one range per variation.
///
/// Each range starts at the cumulative weight of the preceding variations and
/// is `coverage * weight` wide, leaving the rest of the slot unassigned.
/// Coverage is clamped to `[0, 1]`. Missing weights, weights of the wrong
/// length, or weights that do not sum to roughly one fall back to an equal
/// split.
pub fn bucket_ranges(n: usize, coverage: f64, weights: Option<&[f64]>) -> Vec<BucketRange> {
	let coverage = if coverage.is_nan() {
		0.0
	} else {
		coverage.clamp(0.0, 1.0)
	};

	let weights = match weights {
		Some(w) if w.len() == n => {
			let total: f64 = w.iter().sum();
			if (WEIGHT_SUM_MIN..=WEIGHT_SUM_MAX).contains(&total) {
				w.to_vec()
			} else {
				equal_weights(n)
			}
		}
		_ => equal_weights(n),
	};

	let mut cumulative = 0.0;
	weights
		.iter()
		.map(|w| {
			let start = cumulative;
			cumulative += w;
			BucketRange::new(start, start + coverage * w)
		})
		.collect()
}

/// `start <= n < end`.
pub fn in_range(n: f64, range: &BucketRange) -> bool {
	range.start <= n && n < range.end
}

/// Hashes `hash_value` into the namespace's id space and tests membership.
pub fn in_namespace(hash_value: &str, namespace: &Namespace) -> bool {
	let n = hash(&namespace.id, &format!("{hash_value}__"), HashVersion::V1);
	namespace.contains(n)
}

/// Index of the first range containing `n`.
pub fn choose_variation(n: f64, ranges: &[BucketRange]) -> Option<usize> {
	ranges.iter().position(|range| in_range(n, range))
}


#[cfg(test)]
mod proptest_tests {
	use super::*;
	use proptest::prelude::*;

	proptest! {
		#[test]
		fn equal_weights_sum_to_one(n in 1usize..64) {
			let total: f64 = equal_weights(n).iter().sum();
			prop_assert!((total - 1.0).abs() < 1e-6);
		}

		#[test]
		fn ranges_are_ordered_and_sized(n in 2usize..10, coverage in 0.0f64..=1.0) {
			let ranges = bucket_ranges(n, coverage, None);
			prop_assert_eq!(ranges.len(), n);
			let width = 1.0 / n as f64;
			for (i, range) in ranges.iter().enumerate() {
				prop_assert!((range.start - i as f64 * width).abs() < 1e-9);
				prop_assert!((range.end - range.start - coverage * width).abs() < 1e-9);
			}
		}

		#[test]
		fn full_coverage_assigns_every_bucket(n in 2usize..10, bucket in 0.0f64..0.999_999) {
			let ranges = bucket_ranges(n, 1.0, None);
			prop_assert!(choose_variation(bucket, &ranges).is_some());
		}
	}
}
