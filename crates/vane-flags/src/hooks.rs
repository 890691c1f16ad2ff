// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Tracking and feature usage hooks.
//!
//! Two hooks receive the side effects of evaluation:
//!
//! - [`TrackingHook`] is called when a subject is enrolled in an experiment
//!   through hashing. It is the place to record an "experiment viewed" event
//!   for later analysis.
//! - [`FeatureUsageHook`] is called for every resolved feature.
//!
//! # Exposure Events
//!
//! [`event_properties`] flattens an exposure into the properties most
//! analytics pipelines expect:
//!
//! | Property | Description |
//! |----------|-------------|
//! | `experimentId` | The experiment key |
//! | `variationId` | The variation key (meta key, or index) |
//! | `featureId` | The feature the experiment is attached to, if any |
//! | `hashAttribute` | The attribute the subject was hashed on |
//! | `hashValue` | The value of that attribute |
//!
//! # Delivery
//!
//! Hooks run on spawned tasks after evaluation returns. A hook that panics
//! is logged and otherwise ignored, so evaluation is never affected.
//! Exposures are deduplicated by the client's
//! [`ExperimentTracker`](crate::ExperimentTracker) before reaching the hook.
//!
//! # Example
//!
//! ```ignore
//! use vane_flags::{ExperimentExposure, FlagsClient, TrackingHook};
//! use async_trait::async_trait;
//!
//! struct Warehouse;
//!
//! #[async_trait]
//! impl TrackingHook for Warehouse {
//!     async fn on_experiment_viewed(&self, exposure: ExperimentExposure) {
//!         println!("{}", vane_flags::event_properties(&exposure));
//!     }
//! }
//!
//! let client = FlagsClient::builder()
//!     .tracking_hook(Warehouse)
//!     .build()
//!     .await;
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use vane_flags_core::{ExperimentExposure, FeatureResult};

/// Receives experiment exposures.
#[async_trait]
pub trait TrackingHook: Send + Sync + 'static {
	/// Called once per deduplicated exposure.
	///
	/// This runs on a background task. Queue expensive work rather than
	/// blocking here.
	async fn on_experiment_viewed(&self, exposure: ExperimentExposure);
}

/// Receives every feature resolution.
#[async_trait]
pub trait FeatureUsageHook: Send + Sync + 'static {
	async fn on_feature_usage(&self, feature_key: String, result: FeatureResult);
}

/// Type alias for a shared tracking hook.
pub type SharedTrackingHook = Arc<dyn TrackingHook>;

/// Type alias for a shared feature usage hook.
pub type SharedFeatureUsageHook = Arc<dyn FeatureUsageHook>;

/// A tracking hook that discards all exposures.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpTrackingHook;

#[async_trait]
impl TrackingHook for NoOpTrackingHook {
	async fn on_experiment_viewed(&self, _exposure: ExperimentExposure) {}
}

/// A feature usage hook that discards all events.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpFeatureUsageHook;

#[async_trait]
impl FeatureUsageHook for NoOpFeatureUsageHook {
	async fn on_feature_usage(&self, _feature_key: String, _result: FeatureResult) {}
}

/// Event properties for an exposure. See the module documentation.
pub fn event_properties(exposure: &ExperimentExposure) -> Value {
	json!({
		"experimentId": exposure.experiment.key,
		"variationId": exposure.result.key,
		"featureId": exposure.result.feature_id,
		"hashAttribute": exposure.result.hash_attribute,
		"hashValue": exposure.result.hash_value,
	})
}
