// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Client configuration.

use serde::{Deserialize, Serialize};
use vane_flags_core::EvaluationOptions;

/// Default number of recent exposures remembered for deduplication.
pub const DEFAULT_TRACKER_CAPACITY: usize = 30;

/// Configuration for the flags client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
	/// When false, nobody is enrolled in experiments. Forced values still apply.
	pub enabled: bool,
	/// Enrol nobody unless a variation is explicitly forced.
	pub qa_mode: bool,
	/// Honour `?gb~<feature>=<value>` overrides in the context URL.
	pub allow_url_overrides: bool,
	/// Capacity of the exposure deduplication set.
	pub tracker_capacity: usize,
	/// Attributes to load sticky documents for. Derived from the snapshot's
	/// experiments when unset.
	pub sticky_bucket_identifier_attributes: Option<Vec<String>>,
}

impl Default for ClientConfig {
	fn default() -> Self {
		Self {
			enabled: true,
			qa_mode: false,
			allow_url_overrides: false,
			tracker_capacity: DEFAULT_TRACKER_CAPACITY,
			sticky_bucket_identifier_attributes: None,
		}
	}
}

impl ClientConfig {
	/// Engine options for one evaluation. Sticky bucketing applies only when
	/// a sticky bucket service is configured and its documents loaded.
	pub fn evaluation_options(&self, sticky_bucketing: bool) -> EvaluationOptions {
		EvaluationOptions {
			enabled: self.enabled,
			qa_mode: self.qa_mode,
			allow_url_overrides: self.allow_url_overrides,
			sticky_bucketing,
		}
	}
}
