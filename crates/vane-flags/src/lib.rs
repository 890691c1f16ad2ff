// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Feature flags and experiments Rust SDK for Vane.
//!
//! This crate wraps the deterministic engine in `vane-flags-core` with the
//! pieces a long-running host needs: a shared snapshot that can be refreshed
//! while evaluations are in flight, sticky bucket persistence, and background
//! delivery of exposures and feature usage.
//!
//! # Features
//!
//! - **Atomic refresh**: every call evaluates against one snapshot
//! - **Sticky bucketing**: assignments survive definition changes
//! - **Exposure deduplication**: a bounded recency set stops repeat events
//! - **Fire-and-forget hooks**: slow or panicking hooks never stall evaluation
//!
//! # Example
//!
//! ```ignore
//! use vane_flags::{Attributes, EvaluationContext, FlagsClient, InMemoryStickyBucketService,
//!     StaticFeatureRepository};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = FlagsClient::builder()
//!         .repository(StaticFeatureRepository::from_json(include_str!("features.json"))?)
//!         .sticky_bucket_service(InMemoryStickyBucketService::new())
//!         .build()
//!         .await;
//!
//!     let mut ctx = EvaluationContext::new(
//!         Attributes::default().with("id", "user123").with("country", "US"),
//!     );
//!
//!     let enabled = client.is_on("checkout.new_flow", &mut ctx).await;
//!     let theme = client.get_feature_value("ui.theme", &mut ctx, "light".into()).await;
//!
//!     Ok(())
//! }
//! ```

mod client;
mod config;
mod error;
mod hooks;
mod repository;
mod store;
mod sticky;
mod tracker;

pub use client::{FlagsClient, FlagsClientBuilder};
pub use config::{ClientConfig, DEFAULT_TRACKER_CAPACITY};
pub use error::{FlagsError, Result};
pub use hooks::{
	event_properties, FeatureUsageHook, NoOpFeatureUsageHook, NoOpTrackingHook, SharedFeatureUsageHook,
	SharedTrackingHook, TrackingHook,
};
pub use repository::{FeatureRepository, SharedFeatureRepository, StaticFeatureRepository};
pub use sticky::{InMemoryStickyBucketService, SharedStickyBucketService, StickyBucketService};
pub use store::SnapshotStore;
pub use tracker::ExperimentTracker;

// Re-export core types for convenience
pub use vane_flags_core::{
	Attributes, Condition, EvaluationContext, EvaluationOptions, Experiment, ExperimentExposure,
	ExperimentResult, Feature, FeatureResult, FeatureRule, FeatureSnapshot, FeatureSource, Namespace,
	StickyAssignmentsDocument, StickyDocuments, VariationMeta,
};
