// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Sticky bucket documents and their resolution.
//!
//! A sticky document belongs to one identifier, e.g. `id = "u1"`, and records
//! which variation that identifier was put into for each experiment under
//! the key `<experimentKey>__<bucketVersion>`. A recorded variation wins over
//! fresh hashing, so changing weights or coverage does not move subjects.
//! Subjects that must leave an experiment get [`BLOCKED_VARIATION`] instead
//! of a silent re-roll.
//!
//! This module only reads and writes the in-memory document set. Loading and
//! persisting documents is the sticky bucket service's job.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

/// Recorded in place of a variation key when a subject is deliberately
/// excluded from an experiment.
pub const BLOCKED_VARIATION: &str = "__blocked__";

/// Assignments recorded for one `(attribute name, attribute value)` pair.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StickyAssignmentsDocument {
	pub attribute_name: String,
	pub attribute_value: String,
	#[serde(default)]
	pub assignments: BTreeMap<String, String>,
}

impl StickyAssignmentsDocument {
	pub fn new(attribute_name: impl Into<String>, attribute_value: impl Into<String>) -> Self {
		Self {
			attribute_name: attribute_name.into(),
			attribute_value: attribute_value.into(),
			assignments: BTreeMap::new(),
		}
	}

	pub fn with_assignment(mut self, key: impl Into<String>, variation: impl Into<String>) -> Self {
		self.assignments.insert(key.into(), variation.into());
		self
	}

	/// `attrName||attrValue`.
	pub fn key(&self) -> String {
		document_key(&self.attribute_name, &self.attribute_value)
	}
}

pub fn document_key(attribute_name: &str, attribute_value: &str) -> String {
	format!("{attribute_name}||{attribute_value}")
}

/// `experimentKey__bucketVersion`.
pub fn assignment_key(experiment_key: &str, bucket_version: u32) -> String {
	format!("{experiment_key}__{bucket_version}")
}

/// The documents loaded for one evaluation context, keyed by
/// [`document_key`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StickyDocuments {
	docs: HashMap<String, StickyAssignmentsDocument>,
}

impl StickyDocuments {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn insert(&mut self, doc: StickyAssignmentsDocument) {
		self.docs.insert(doc.key(), doc);
	}

	pub fn get(&self, attribute_name: &str, attribute_value: &str) -> Option<&StickyAssignmentsDocument> {
		self.docs.get(&document_key(attribute_name, attribute_value))
	}

	pub fn len(&self) -> usize {
		self.docs.len()
	}

	pub fn is_empty(&self) -> bool {
		self.docs.is_empty()
	}

	pub fn iter(&self) -> impl Iterator<Item = &StickyAssignmentsDocument> {
		self.docs.values()
	}
}

impl FromIterator<StickyAssignmentsDocument> for StickyDocuments {
	fn from_iter<I: IntoIterator<Item = StickyAssignmentsDocument>>(iter: I) -> Self {
		let mut docs = StickyDocuments::new();
		for doc in iter {
			docs.insert(doc);
		}
		docs
	}
}

/// Result of a sticky lookup. `found` with no variation means blocked.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StickyResolution {
	pub variation: Option<String>,
	pub found: bool,
}

impl StickyResolution {
	pub fn missing() -> Self {
		Self::default()
	}

	pub fn blocked() -> Self {
		Self {
			variation: None,
			found: true,
		}
	}

	pub fn is_blocked(&self) -> bool {
		self.found && self.variation.is_none()
	}
}

/// Identifies an experiment's slot inside sticky documents.
#[derive(Debug, Clone, Copy)]
pub struct StickyKey<'a> {
	pub experiment_key: &'a str,
	pub bucket_version: u32,
	/// Assignments recorded under any lower version block the subject.
	pub min_bucket_version: u32,
}

/// Looks up a recorded assignment, first in the primary identifier's
/// document and then in the fallback identifier's.
///
/// Identifiers are `(attribute name, attribute value)` pairs.
pub fn resolve(
	docs: &StickyDocuments,
	key: StickyKey<'_>,
	primary: Option<(&str, &str)>,
	fallback: Option<(&str, &str)>,
) -> StickyResolution {
	let candidates: Vec<&StickyAssignmentsDocument> = [primary, fallback]
		.into_iter()
		.flatten()
		.filter_map(|(name, value)| docs.get(name, value))
		.collect();

	if key.min_bucket_version > 0
		&& candidates
			.iter()
			.any(|doc| has_stale_version(doc, key.experiment_key, key.min_bucket_version))
	{
		return StickyResolution::blocked();
	}

	let slot = assignment_key(key.experiment_key, key.bucket_version);
	for doc in candidates {
		if let Some(variation) = doc.assignments.get(&slot) {
			if variation == BLOCKED_VARIATION {
				return StickyResolution::blocked();
			}
			return StickyResolution {
				variation: Some(variation.clone()),
				found: true,
			};
		}
	}

	StickyResolution::missing()
}

fn has_stale_version(doc: &StickyAssignmentsDocument, experiment_key: &str, min_version: u32) -> bool {
	(0..min_version).any(|v| doc.assignments.contains_key(&assignment_key(experiment_key, v)))
}

/// Records `variation` for `slot` in the document of
/// `(attribute_name, attribute_value)`, creating the document if needed.
///
/// Returns the updated document when something changed, for the caller to
/// hand to the persistence service.
pub fn store(
	docs: &mut StickyDocuments,
	attribute_name: &str,
	attribute_value: &str,
	slot: &str,
	variation: &str,
) -> Option<StickyAssignmentsDocument> {
	let doc = docs
		.docs
		.entry(document_key(attribute_name, attribute_value))
		.or_insert_with(|| StickyAssignmentsDocument::new(attribute_name, attribute_value));

	if doc.assignments.get(slot).map(String::as_str) == Some(variation) {
		return None;
	}
	doc.assignments.insert(slot.to_string(), variation.to_string());
	Some(doc.clone())
}
