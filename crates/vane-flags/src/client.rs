// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Flags client: shared snapshot, collaborators, and background dispatch.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::FutureExt;
use serde_json::Value;
use tracing::{debug, info, warn};
use vane_flags_core::{
	EvaluationContext, EvaluationOptions, Experiment, ExperimentResult, FeatureResolver, FeatureResult,
	FeatureSnapshot, Notification, StickyDocuments,
};

use crate::config::ClientConfig;
use crate::error::{FlagsError, Result};
use crate::hooks::{
	FeatureUsageHook, NoOpFeatureUsageHook, NoOpTrackingHook, SharedFeatureUsageHook, SharedTrackingHook,
	TrackingHook,
};
use crate::repository::{FeatureRepository, SharedFeatureRepository};
use crate::sticky::{SharedStickyBucketService, StickyBucketService};
use crate::store::SnapshotStore;
use crate::tracker::ExperimentTracker;

/// SDK name for identification.
const SDK_NAME: &str = "vane-flags-rust";
/// SDK version for identification.
const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Builder for constructing a [`FlagsClient`].
pub struct FlagsClientBuilder {
	config: ClientConfig,
	snapshot: Option<FeatureSnapshot>,
	repository: Option<SharedFeatureRepository>,
	sticky_service: Option<SharedStickyBucketService>,
	tracking_hook: SharedTrackingHook,
	usage_hook: SharedFeatureUsageHook,
}

impl FlagsClientBuilder {
	/// Creates a new builder with default settings.
	pub fn new() -> Self {
		Self {
			config: ClientConfig::default(),
			snapshot: None,
			repository: None,
			sticky_service: None,
			tracking_hook: Arc::new(NoOpTrackingHook),
			usage_hook: Arc::new(NoOpFeatureUsageHook),
		}
	}

	/// Replaces the whole configuration.
	pub fn config(mut self, config: ClientConfig) -> Self {
		self.config = config;
		self
	}

	pub fn enabled(mut self, enabled: bool) -> Self {
		self.config.enabled = enabled;
		self
	}

	pub fn qa_mode(mut self, qa_mode: bool) -> Self {
		self.config.qa_mode = qa_mode;
		self
	}

	pub fn allow_url_overrides(mut self, allow: bool) -> Self {
		self.config.allow_url_overrides = allow;
		self
	}

	/// Sets how many recent exposures are remembered for deduplication.
	pub fn tracker_capacity(mut self, capacity: usize) -> Self {
		self.config.tracker_capacity = capacity;
		self
	}

	/// Sets the attributes sticky documents are loaded for, instead of
	/// deriving them from the snapshot.
	pub fn sticky_bucket_identifier_attributes(mut self, attributes: Vec<String>) -> Self {
		self.config.sticky_bucket_identifier_attributes = Some(attributes);
		self
	}

	/// Sets the initial snapshot. A repository, when set, replaces it on build.
	pub fn snapshot(mut self, snapshot: FeatureSnapshot) -> Self {
		self.snapshot = Some(snapshot);
		self
	}

	pub fn repository(mut self, repository: impl FeatureRepository) -> Self {
		self.repository = Some(Arc::new(repository));
		self
	}

	/// Enables sticky bucketing backed by `service`.
	pub fn sticky_bucket_service(mut self, service: impl StickyBucketService) -> Self {
		self.sticky_service = Some(Arc::new(service));
		self
	}

	/// Like [`FlagsClientBuilder::sticky_bucket_service`], for a service the
	/// caller keeps a handle to.
	pub fn shared_sticky_bucket_service(mut self, service: SharedStickyBucketService) -> Self {
		self.sticky_service = Some(service);
		self
	}

	pub fn tracking_hook(mut self, hook: impl TrackingHook) -> Self {
		self.tracking_hook = Arc::new(hook);
		self
	}

	pub fn feature_usage_hook(mut self, hook: impl FeatureUsageHook) -> Self {
		self.usage_hook = Arc::new(hook);
		self
	}

	/// Builds the client, fetching the initial snapshot when a repository is
	/// set. A failed fetch is logged and the client starts from the builder's
	/// snapshot, or an empty one.
	pub async fn build(self) -> FlagsClient {
		let inner = Arc::new(FlagsClientInner {
			store: SnapshotStore::new(self.snapshot.unwrap_or_default()),
			tracker: ExperimentTracker::new(self.config.tracker_capacity),
			config: self.config,
			repository: self.repository,
			sticky_service: self.sticky_service,
			tracking_hook: self.tracking_hook,
			usage_hook: self.usage_hook,
			closed: AtomicBool::new(false),
		});
		let client = FlagsClient { inner };

		if client.inner.repository.is_some() {
			if let Err(e) = client.refresh().await {
				warn!(error = %e, "initial feature fetch failed, starting with local snapshot");
			}
		}

		info!(
			sdk_name = SDK_NAME,
			sdk_version = SDK_VERSION,
			features = client.inner.store.load().len(),
			sticky_bucketing = client.inner.sticky_service.is_some(),
			"Flags client initialized"
		);
		client
	}
}

impl Default for FlagsClientBuilder {
	fn default() -> Self {
		Self::new()
	}
}

/// Internal client state.
struct FlagsClientInner {
	config: ClientConfig,
	store: SnapshotStore,
	repository: Option<SharedFeatureRepository>,
	sticky_service: Option<SharedStickyBucketService>,
	tracking_hook: SharedTrackingHook,
	usage_hook: SharedFeatureUsageHook,
	tracker: ExperimentTracker,
	closed: AtomicBool,
}

/// Client for evaluating features and experiments.
///
/// Cloning is cheap; clones share the snapshot, collaborators, and the
/// exposure tracker. Each call evaluates against one snapshot even if a
/// refresh lands mid-call.
///
/// # Example
///
/// ```ignore
/// use vane_flags::{Attributes, EvaluationContext, FlagsClient, StaticFeatureRepository};
///
/// let client = FlagsClient::builder()
///     .repository(StaticFeatureRepository::from_json(payload)?)
///     .build()
///     .await;
///
/// let mut ctx = EvaluationContext::new(Attributes::default().with("id", "user123"));
/// if client.is_on("checkout.new_flow", &mut ctx).await {
///     // ...
/// }
/// ```
#[derive(Clone)]
pub struct FlagsClient {
	inner: Arc<FlagsClientInner>,
}

impl FlagsClient {
	/// Creates a new builder for constructing a FlagsClient.
	pub fn builder() -> FlagsClientBuilder {
		FlagsClientBuilder::new()
	}

	/// Resolves a feature for the subject in `ctx`.
	pub async fn eval_feature(&self, key: &str, ctx: &mut EvaluationContext) -> FeatureResult {
		let snapshot = self.inner.store.load();
		let options = self.prepare(&snapshot, ctx).await;
		let result = FeatureResolver::new(&snapshot, options).eval_feature(key, ctx);
		self.dispatch(ctx.take_notifications());
		result
	}

	pub async fn is_on(&self, key: &str, ctx: &mut EvaluationContext) -> bool {
		self.eval_feature(key, ctx).await.on()
	}

	pub async fn is_off(&self, key: &str, ctx: &mut EvaluationContext) -> bool {
		self.eval_feature(key, ctx).await.off()
	}

	/// The resolved value, or `default` when the feature resolves to null.
	pub async fn get_feature_value(&self, key: &str, ctx: &mut EvaluationContext, default: Value) -> Value {
		match self.eval_feature(key, ctx).await.value {
			Value::Null => default,
			value => value,
		}
	}

	/// Assigns the subject to an experiment defined by the host rather than
	/// by a feature.
	pub async fn run(&self, experiment: &Experiment, ctx: &mut EvaluationContext) -> ExperimentResult {
		let snapshot = self.inner.store.load();
		let options = self.prepare(&snapshot, ctx).await;
		let result = FeatureResolver::new(&snapshot, options).run(experiment, ctx);
		self.dispatch(ctx.take_notifications());
		result
	}

	/// Fetches definitions from the repository and swaps them in.
	pub async fn refresh(&self) -> Result<()> {
		self.check_closed()?;
		let Some(repository) = &self.inner.repository else {
			debug!("no feature repository configured, nothing to refresh");
			return Ok(());
		};
		let snapshot = repository.fetch().await?;
		self.set_snapshot(snapshot);
		Ok(())
	}

	/// Replaces the current snapshot.
	pub fn set_snapshot(&self, snapshot: FeatureSnapshot) {
		let features = snapshot.len();
		self.inner.store.swap(snapshot);
		info!(features, "feature snapshot updated");
	}

	/// The current snapshot.
	pub fn snapshot(&self) -> Arc<FeatureSnapshot> {
		self.inner.store.load()
	}

	/// The exposure tracker shared by all clones of this client.
	pub fn tracker(&self) -> &ExperimentTracker {
		&self.inner.tracker
	}

	/// Shuts down the client. Subsequent refreshes fail and notifications
	/// are no longer dispatched; evaluation keeps working.
	pub async fn shutdown(&self) -> Result<()> {
		if self.inner.closed.swap(true, Ordering::SeqCst) {
			return Ok(());
		}
		info!("Flags client shutdown");
		Ok(())
	}

	/// Returns true if the client has been shut down.
	pub fn is_closed(&self) -> bool {
		self.inner.closed.load(Ordering::SeqCst)
	}

	fn check_closed(&self) -> Result<()> {
		if self.is_closed() {
			return Err(FlagsError::ClientClosed);
		}
		Ok(())
	}

	/// Loads sticky documents for the context on first use and derives the
	/// engine options. Identifiers come from `snapshot`, the same snapshot
	/// the call evaluates. Sticky bucketing is off for the call when loading
	/// fails.
	async fn prepare(&self, snapshot: &FeatureSnapshot, ctx: &mut EvaluationContext) -> EvaluationOptions {
		let Some(service) = &self.inner.sticky_service else {
			return self.inner.config.evaluation_options(false);
		};
		if ctx.sticky_loaded() {
			return self.inner.config.evaluation_options(true);
		}

		let identifiers = self.sticky_identifiers(snapshot, ctx);
		match service.get_all_assignments(&identifiers).await {
			Ok(docs) => {
				debug!(documents = docs.len(), "loaded sticky bucket documents");
				ctx.set_sticky_documents(docs.into_iter().collect::<StickyDocuments>());
				self.inner.config.evaluation_options(true)
			}
			Err(e) => {
				warn!(error = %e, "failed to load sticky bucket documents, hashing without them");
				self.inner.config.evaluation_options(false)
			}
		}
	}

	fn sticky_identifiers(&self, snapshot: &FeatureSnapshot, ctx: &EvaluationContext) -> Vec<(String, String)> {
		let attributes = match &self.inner.config.sticky_bucket_identifier_attributes {
			Some(attributes) => attributes.clone(),
			None => snapshot.sticky_identifier_attributes(),
		};
		attributes
			.into_iter()
			.filter_map(|attribute| {
				let value = ctx.attributes.hash_value(&attribute)?;
				Some((attribute, value))
			})
			.collect()
	}

	fn dispatch(&self, notifications: Vec<Notification>) {
		if self.is_closed() {
			return;
		}
		for notification in notifications {
			match notification {
				Notification::ExperimentViewed(exposure) => {
					if !self.inner.tracker.track(&exposure.tracking_key()) {
						continue;
					}
					let hook = Arc::clone(&self.inner.tracking_hook);
					spawn_guarded("tracking", async move { hook.on_experiment_viewed(exposure).await });
				}
				Notification::FeatureUsage { feature_key, result } => {
					let hook = Arc::clone(&self.inner.usage_hook);
					spawn_guarded("feature_usage", async move { hook.on_feature_usage(feature_key, result).await });
				}
				Notification::StickySave(doc) => {
					let Some(service) = self.inner.sticky_service.clone() else {
						continue;
					};
					spawn_guarded("sticky_save", async move {
						let key = doc.key();
						if let Err(e) = service.save_assignments(doc).await {
							warn!(document = %key, error = %e, "failed to save sticky bucket document");
						}
					});
				}
			}
		}
	}
}

/// Runs a collaborator call on a background task. Panics are logged and
/// dropped. Without a runtime the call is skipped.
fn spawn_guarded<F>(collaborator: &'static str, call: F)
where
	F: Future<Output = ()> + Send + 'static,
{
	let Ok(handle) = tokio::runtime::Handle::try_current() else {
		warn!(collaborator, "no async runtime, dropping notification");
		return;
	};
	handle.spawn(async move {
		if AssertUnwindSafe(call).catch_unwind().await.is_err() {
			warn!(collaborator, "collaborator panicked");
		}
	});
}
