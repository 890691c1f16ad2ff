// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Bounded recency set for exposure deduplication.

use std::num::NonZeroUsize;

use lru::LruCache;
use parking_lot::Mutex;

use crate::config::DEFAULT_TRACKER_CAPACITY;

/// Remembers the most recent exposure keys.
///
/// Re-evaluating an unchanged assignment produces the same key, so the
/// tracking hook fires once per assignment until the key is evicted by newer
/// ones. Touching a remembered key moves it to the front.
#[derive(Debug)]
pub struct ExperimentTracker {
	seen: Mutex<LruCache<String, ()>>,
}

impl ExperimentTracker {
	/// A zero capacity is treated as one.
	pub fn new(capacity: usize) -> Self {
		let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
		Self {
			seen: Mutex::new(LruCache::new(capacity)),
		}
	}

	/// Records `key`. Returns true when it was not already remembered.
	pub fn track(&self, key: &str) -> bool {
		let mut seen = self.seen.lock();
		if seen.get(key).is_some() {
			return false;
		}
		seen.put(key.to_string(), ());
		true
	}

	pub fn len(&self) -> usize {
		self.seen.lock().len()
	}

	pub fn is_empty(&self) -> bool {
		self.seen.lock().is_empty()
	}

	pub fn capacity(&self) -> usize {
		self.seen.lock().cap().get()
	}

	pub fn clear(&self) {
		self.seen.lock().clear();
	}
}

impl Default for ExperimentTracker {
	fn default() -> Self {
		Self::new(DEFAULT_TRACKER_CAPACITY)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::Arc;

	#[test]
	fn first_sighting_only() {
		let tracker = ExperimentTracker::default();
		assert!(tracker.track("a"));
		assert!(!tracker.track("a"));
		assert!(tracker.track("b"));
		assert_eq!(tracker.len(), 2);
	}

	#[test]
	fn evicts_least_recent() {
		let tracker = ExperimentTracker::new(2);
		tracker.track("a");
		tracker.track("b");
		// Touching a makes b the eviction candidate.
		assert!(!tracker.track("a"));
		assert!(tracker.track("c"));

		assert!(!tracker.track("a"));
		assert!(tracker.track("b"));
	}

	#[test]
	fn zero_capacity_holds_one() {
		let tracker = ExperimentTracker::new(0);
		assert_eq!(tracker.capacity(), 1);
		assert!(tracker.track("a"));
		assert!(!tracker.track("a"));
	}

	#[test]
	fn capacity_holds_under_concurrency() {
		let tracker = Arc::new(ExperimentTracker::new(30));
		let workers: Vec<_> = (0..8)
			.map(|worker| {
				let tracker = Arc::clone(&tracker);
				std::thread::spawn(move || {
					for i in 0..500 {
						tracker.track(&format!("{worker}-{i}"));
						assert!(tracker.len() <= 30);
					}
				})
			})
			.collect();
		for worker in workers {
			worker.join().unwrap();
		}
		assert_eq!(tracker.len(), 30);
	}

	#[test]
	fn concurrent_duplicates_fire_once() {
		let tracker = Arc::new(ExperimentTracker::default());
		let fired: usize = (0..8)
			.map(|_| {
				let tracker = Arc::clone(&tracker);
				std::thread::spawn(move || usize::from(tracker.track("same")))
			})
			.collect::<Vec<_>>()
			.into_iter()
			.map(|handle| handle.join().unwrap())
			.sum();
		assert_eq!(fired, 1);
	}
}
