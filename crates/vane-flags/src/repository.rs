// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Sources of feature definitions.
//!
//! The client never fetches definitions itself. A [`FeatureRepository`] hands
//! it parsed snapshots, whether they come from an HTTP endpoint, a file, or a
//! streaming connection.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use vane_flags_core::FeatureSnapshot;

use crate::error::Result;

/// Produces feature definition snapshots on demand.
#[async_trait]
pub trait FeatureRepository: Send + Sync + 'static {
	/// Fetches the latest definitions.
	///
	/// Transport failures should be reported as
	/// [`FlagsError::RepositoryFetch`](crate::FlagsError::RepositoryFetch).
	async fn fetch(&self) -> Result<FeatureSnapshot>;
}

/// Type alias for a shared feature repository.
pub type SharedFeatureRepository = Arc<dyn FeatureRepository>;

/// Serves a fixed definitions payload, replaceable at runtime.
///
/// Useful for tests, for definitions bundled with the application, and for
/// hosts that receive payloads through their own channel.
#[derive(Debug)]
pub struct StaticFeatureRepository {
	payload: RwLock<Value>,
}

impl StaticFeatureRepository {
	pub fn new(payload: Value) -> Self {
		Self {
			payload: RwLock::new(payload),
		}
	}

	pub fn from_json(json: &str) -> Result<Self> {
		let payload = serde_json::from_str(json).map_err(vane_flags_core::FlagsError::from)?;
		Ok(Self::new(payload))
	}

	/// Replaces the payload served by subsequent fetches.
	pub fn set_payload(&self, payload: Value) {
		*self.payload.write() = payload;
	}
}

#[async_trait]
impl FeatureRepository for StaticFeatureRepository {
	async fn fetch(&self) -> Result<FeatureSnapshot> {
		let payload = self.payload.read().clone();
		Ok(FeatureSnapshot::from_value(payload)?)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::error::FlagsError;
	use serde_json::json;

	#[tokio::test]
	async fn serves_current_payload() {
		let repository = StaticFeatureRepository::new(json!({"features": {"a": {"defaultValue": 1}}}));
		assert!(repository.fetch().await.unwrap().feature("a").is_some());

		repository.set_payload(json!({"features": {"b": {"defaultValue": 2}}}));
		let snapshot = repository.fetch().await.unwrap();
		assert!(snapshot.feature("a").is_none());
		assert!(snapshot.feature("b").is_some());
	}

	#[tokio::test]
	async fn invalid_payload_is_a_core_error() {
		let repository = StaticFeatureRepository::new(json!("nope"));
		assert!(matches!(repository.fetch().await, Err(FlagsError::Core(_))));
	}

	#[test]
	fn from_json_rejects_malformed_text() {
		assert!(matches!(StaticFeatureRepository::from_json("{"), Err(FlagsError::Core(_))));
	}
}
