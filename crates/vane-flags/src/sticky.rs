// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Sticky bucket persistence.
//!
//! The engine reads sticky documents from the context and reports changed
//! documents as notifications. A [`StickyBucketService`] is where those
//! documents live between calls: a cookie jar, a database table, or a cache.
//!
//! The client loads documents lazily, on the first evaluation that uses a
//! context, and saves changed documents in the background.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use vane_flags_core::sticky::document_key;
use vane_flags_core::StickyAssignmentsDocument;

use crate::error::Result;

/// Durable storage for sticky bucket documents.
#[async_trait]
pub trait StickyBucketService: Send + Sync + 'static {
	/// Loads the documents of the given `(attribute name, attribute value)`
	/// identifiers. Identifiers without a document are skipped.
	async fn get_all_assignments(&self, identifiers: &[(String, String)]) -> Result<Vec<StickyAssignmentsDocument>>;

	/// Persists one document, replacing any stored under the same key.
	async fn save_assignments(&self, doc: StickyAssignmentsDocument) -> Result<()>;
}

/// Type alias for a shared sticky bucket service.
pub type SharedStickyBucketService = Arc<dyn StickyBucketService>;

/// Keeps documents in process memory.
#[derive(Debug, Default)]
pub struct InMemoryStickyBucketService {
	docs: RwLock<HashMap<String, StickyAssignmentsDocument>>,
}

impl InMemoryStickyBucketService {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn get(&self, attribute_name: &str, attribute_value: &str) -> Option<StickyAssignmentsDocument> {
		self.docs.read().get(&document_key(attribute_name, attribute_value)).cloned()
	}

	pub fn len(&self) -> usize {
		self.docs.read().len()
	}

	pub fn is_empty(&self) -> bool {
		self.docs.read().is_empty()
	}
}

#[async_trait]
impl StickyBucketService for InMemoryStickyBucketService {
	async fn get_all_assignments(&self, identifiers: &[(String, String)]) -> Result<Vec<StickyAssignmentsDocument>> {
		let docs = self.docs.read();
		Ok(identifiers
			.iter()
			.filter_map(|(name, value)| docs.get(&document_key(name, value)).cloned())
			.collect())
	}

	async fn save_assignments(&self, doc: StickyAssignmentsDocument) -> Result<()> {
		self.docs.write().insert(doc.key(), doc);
		Ok(())
	}
}
