// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Deterministic feature flag and experiment evaluation for Vane.
//!
//! This crate is the synchronous engine shared by every Vane SDK. Given a
//! [`FeatureSnapshot`] of definitions and an [`EvaluationContext`] describing
//! one subject, it decides which value a feature resolves to and which
//! variation of an experiment the subject belongs to. The same inputs always
//! produce the same outputs, across processes and across SDK ports.
//!
//! # Overview
//!
//! - [`hash`]: versioned FNV-1a bucketing hash
//! - [`range`]: bucket ranges, namespaces, equal weights
//! - [`condition`]: targeting conditions compiled once per snapshot
//! - [`sticky`]: sticky bucket documents and their resolution
//! - [`assign`]: experiment assignment
//! - [`resolve`]: feature resolution
//!
//! The engine performs no I/O. Exposures, feature usage and changed sticky
//! documents are queued on the context as [`Notification`]s for the caller
//! to dispatch.
//!
//! # Example
//!
//! ```
//! use vane_flags_core::{
//!     Attributes, EvaluationContext, EvaluationOptions, FeatureResolver, FeatureSnapshot,
//!     FeatureSource,
//! };
//!
//! let snapshot = FeatureSnapshot::from_json(
//!     r#"{"features": {"checkout": {
//!         "defaultValue": "off",
//!         "rules": [{"condition": {"country": "US"}, "force": "on"}]
//!     }}}"#,
//! )
//! .unwrap();
//!
//! let resolver = FeatureResolver::new(&snapshot, EvaluationOptions::default());
//! let mut ctx = EvaluationContext::new(Attributes::default().with("country", "US"));
//!
//! let result = resolver.eval_feature("checkout", &mut ctx);
//! assert_eq!(result.value, "on");
//! assert_eq!(result.source, FeatureSource::Force);
//! ```

pub mod assign;
pub mod attributes;
pub mod condition;
pub mod context;
pub mod error;
pub mod experiment;
pub mod feature;
pub mod hash;
pub mod range;
pub mod resolve;
pub mod snapshot;
pub mod sticky;
pub mod value;

pub use assign::ExperimentAssigner;
pub use attributes::Attributes;
pub use condition::{Condition, SavedGroups};
pub use context::{EvaluationContext, EvaluationOptions, ExperimentExposure, Notification};
pub use error::{FlagsError, Result};
pub use experiment::{Experiment, ExperimentResult, Filter, VariationMeta};
pub use feature::{Feature, FeatureResult, FeatureRule, FeatureSource, ParentCondition, Rollout, RuleAction};
pub use hash::HashVersion;
pub use range::{BucketRange, Namespace};
pub use resolve::FeatureResolver;
pub use snapshot::FeatureSnapshot;
pub use sticky::{StickyAssignmentsDocument, StickyDocuments, BLOCKED_VARIATION};
