// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Shared snapshot storage.
//!
//! Readers take an `Arc` to the current snapshot and evaluate against it for
//! the whole call. A refresh swaps the `Arc`, so an in-flight call sees either
//! the old snapshot or the new one, never a mix.

use std::sync::Arc;

use parking_lot::RwLock;
use vane_flags_core::FeatureSnapshot;

#[derive(Debug, Default)]
pub struct SnapshotStore {
	current: RwLock<Arc<FeatureSnapshot>>,
}

impl SnapshotStore {
	pub fn new(snapshot: FeatureSnapshot) -> Self {
		Self {
			current: RwLock::new(Arc::new(snapshot)),
		}
	}

	/// The current snapshot.
	pub fn load(&self) -> Arc<FeatureSnapshot> {
		Arc::clone(&self.current.read())
	}

	/// Installs `snapshot`, returning the one it replaced.
	pub fn swap(&self, snapshot: FeatureSnapshot) -> Arc<FeatureSnapshot> {
		std::mem::replace(&mut *self.current.write(), Arc::new(snapshot))
	}
}
