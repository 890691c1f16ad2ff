// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use url::Url;
use vane_flags::{
	Attributes, EvaluationContext, Experiment, ExperimentExposure, FeatureResult, FeatureSnapshot,
	FeatureSource, FeatureUsageHook, FlagsClient, InMemoryStickyBucketService, StaticFeatureRepository,
	TrackingHook,
};

struct ChannelTrackingHook(mpsc::UnboundedSender<ExperimentExposure>);

#[async_trait]
impl TrackingHook for ChannelTrackingHook {
	async fn on_experiment_viewed(&self, exposure: ExperimentExposure) {
		let _ = self.0.send(exposure);
	}
}

struct ChannelUsageHook(mpsc::UnboundedSender<(String, FeatureResult)>);

#[async_trait]
impl FeatureUsageHook for ChannelUsageHook {
	async fn on_feature_usage(&self, feature_key: String, result: FeatureResult) {
		let _ = self.0.send((feature_key, result));
	}
}

struct PanickingHook;

#[async_trait]
impl TrackingHook for PanickingHook {
	async fn on_experiment_viewed(&self, _exposure: ExperimentExposure) {
		panic!("hook failure");
	}
}

fn payload() -> Value {
	json!({
		"features": {
			"banner": {
				"defaultValue": "off",
				"rules": [{"condition": {"country": "US"}, "force": "on"}],
			},
			"pricing": {
				"defaultValue": -1,
				"rules": [{"key": "price-test", "variations": [0, 1], "meta": [{"key": "control"}, {"key": "treatment"}]}],
			},
			"beta": {
				"defaultValue": false,
				"rules": [{"condition": {"id": {"$inGroup": "testers"}}, "force": true}],
			},
		},
		"savedGroups": {"testers": ["u-7"]},
	})
}

fn ctx(id: &str) -> EvaluationContext {
	EvaluationContext::new(Attributes::default().with("id", id))
}

async fn recv<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
	tokio::time::timeout(Duration::from_secs(2), rx.recv())
		.await
		.expect("timed out waiting for hook")
		.expect("hook channel closed")
}

async fn assert_quiet<T>(rx: &mut mpsc::UnboundedReceiver<T>) {
	tokio::time::sleep(Duration::from_millis(50)).await;
	assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn country_rule_end_to_end() {
	let client = FlagsClient::builder()
		.repository(StaticFeatureRepository::new(payload()))
		.build()
		.await;

	let mut us = ctx("u-1").with_attribute("country", "US");
	let result = client.eval_feature("banner", &mut us).await;
	assert_eq!(result.value, json!("on"));
	assert_eq!(result.source, FeatureSource::Force);

	let mut ca = ctx("u-1").with_attribute("country", "CA");
	let result = client.eval_feature("banner", &mut ca).await;
	assert_eq!(result.value, json!("off"));
	assert_eq!(result.source, FeatureSource::DefaultValue);
}

#[tokio::test]
async fn saved_groups_target_subjects() {
	let client = FlagsClient::builder()
		.repository(StaticFeatureRepository::new(payload()))
		.build()
		.await;
	assert!(client.is_on("beta", &mut ctx("u-7")).await);
	assert!(client.is_off("beta", &mut ctx("u-8")).await);
}

#[tokio::test]
async fn exposures_are_deduplicated_across_calls() {
	let (tx, mut rx) = mpsc::unbounded_channel();
	let client = FlagsClient::builder()
		.repository(StaticFeatureRepository::new(payload()))
		.tracking_hook(ChannelTrackingHook(tx))
		.build()
		.await;

	let mut subject = ctx("u-1");
	let first = client.eval_feature("pricing", &mut subject).await;
	assert_eq!(first.source, FeatureSource::Experiment);

	let exposure = recv(&mut rx).await;
	assert_eq!(exposure.experiment.key, "price-test");
	assert_eq!(exposure.result.feature_id.as_deref(), Some("pricing"));
	assert!(["control", "treatment"].contains(&exposure.result.key.as_str()));

	client.eval_feature("pricing", &mut subject).await;
	client.eval_feature("pricing", &mut ctx("u-1")).await;
	assert_quiet(&mut rx).await;

	client.eval_feature("pricing", &mut ctx("u-2")).await;
	let other = recv(&mut rx).await;
	assert_eq!(other.result.hash_value.as_deref(), Some("u-2"));
}

#[tokio::test]
async fn every_resolution_reports_usage() {
	let (tx, mut rx) = mpsc::unbounded_channel();
	let client = FlagsClient::builder()
		.repository(StaticFeatureRepository::new(payload()))
		.feature_usage_hook(ChannelUsageHook(tx))
		.build()
		.await;

	client.eval_feature("banner", &mut ctx("u-1")).await;
	client.eval_feature("banner", &mut ctx("u-1")).await;
	client.eval_feature("nope", &mut ctx("u-1")).await;

	let mut keys = vec![recv(&mut rx).await, recv(&mut rx).await, recv(&mut rx).await];
	keys.sort_by(|a, b| a.0.cmp(&b.0));
	assert_eq!(keys[0].0, "banner");
	assert_eq!(keys[1].0, "banner");
	assert_eq!(keys[2].0, "nope");
	assert_eq!(keys[2].1.source, FeatureSource::UnknownFeature);
}

#[tokio::test]
async fn panicking_hook_does_not_affect_evaluation() {
	let client = FlagsClient::builder()
		.repository(StaticFeatureRepository::new(payload()))
		.tracking_hook(PanickingHook)
		.build()
		.await;

	for id in ["a", "b", "c"] {
		let result = client.eval_feature("pricing", &mut ctx(id)).await;
		assert_eq!(result.source, FeatureSource::Experiment);
	}
	tokio::time::sleep(Duration::from_millis(50)).await;
	assert_eq!(client.eval_feature("banner", &mut ctx("a")).await.value, json!("off"));
}

#[tokio::test]
async fn sticky_assignment_survives_refresh() {
	let service = Arc::new(InMemoryStickyBucketService::new());
	let client = FlagsClient::builder()
		.snapshot(FeatureSnapshot::from_value(payload()).unwrap())
		.shared_sticky_bucket_service(service.clone())
		.build()
		.await;

	let first = client.eval_feature("pricing", &mut ctx("u-1")).await;
	let assigned = first.value.as_i64().unwrap();

	// Saves are dispatched in the background.
	for _ in 0..100 {
		if service.get("id", "u-1").is_some() {
			break;
		}
		tokio::time::sleep(Duration::from_millis(10)).await;
	}
	let doc = service.get("id", "u-1").expect("sticky document saved");
	assert!(doc.assignments.contains_key("price-test__0"));

	let flipped = if assigned == 0 { json!([0.0, 1.0]) } else { json!([1.0, 0.0]) };
	let mut changed = payload();
	changed["features"]["pricing"]["rules"][0]["weights"] = flipped;
	client.set_snapshot(FeatureSnapshot::from_value(changed).unwrap());

	let second = client.eval_feature("pricing", &mut ctx("u-1")).await;
	assert_eq!(second.value, json!(assigned));
	assert!(second.experiment_result.unwrap().sticky_bucket_used);

	let fresh = client.eval_feature("pricing", &mut ctx("u-9")).await;
	assert_eq!(fresh.value, json!(1 - assigned));
}

#[tokio::test]
async fn refresh_swaps_snapshot() {
	let repository = StaticFeatureRepository::new(payload());
	let client = FlagsClient::builder().repository(repository).build().await;
	assert!(client.snapshot().feature("banner").is_some());

	client.set_snapshot(FeatureSnapshot::default());
	assert!(client.snapshot().is_empty());

	client.refresh().await.unwrap();
	assert_eq!(client.snapshot().len(), 3);
}

#[tokio::test]
async fn url_overrides_need_opt_in() {
	let url = Url::parse("https://shop.example/?gb~banner=forced&price-test=1").unwrap();

	let strict = FlagsClient::builder()
		.repository(StaticFeatureRepository::new(payload()))
		.build()
		.await;
	let mut subject = ctx("u-1").with_url(url.clone());
	assert_eq!(strict.eval_feature("banner", &mut subject).await.value, json!("off"));

	let open = FlagsClient::builder()
		.repository(StaticFeatureRepository::new(payload()))
		.allow_url_overrides(true)
		.build()
		.await;
	let mut subject = ctx("u-1").with_url(url);
	assert_eq!(open.eval_feature("banner", &mut subject).await.value, json!("forced"));

	// Variation overrides through the query string apply regardless.
	let result = open.eval_feature("pricing", &mut subject).await;
	assert_eq!(result.value, json!(1));
	assert!(!result.experiment_result.unwrap().hash_used);
}

#[tokio::test]
async fn qa_mode_and_disabled_clients_do_not_enrol() {
	for client in [
		FlagsClient::builder().qa_mode(true),
		FlagsClient::builder().enabled(false),
	] {
		let client = client.repository(StaticFeatureRepository::new(payload())).build().await;
		let result = client.eval_feature("pricing", &mut ctx("u-1")).await;
		assert_eq!(result.source, FeatureSource::DefaultValue);
		assert_eq!(result.value, json!(-1));
	}
}

#[tokio::test]
async fn run_standalone_experiment() {
	let client = FlagsClient::builder().build().await;
	let experiment = Experiment::new("my-test", vec![json!("a"), json!("b")]);
	let result = client.run(&experiment, &mut ctx("1")).await;
	assert!(result.in_experiment);
	assert_eq!(result.value, json!("b"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_evaluation_during_refresh() {
	let client = FlagsClient::builder()
		.repository(StaticFeatureRepository::new(payload()))
		.build()
		.await;

	let workers: Vec<_> = (0..8)
		.map(|worker| {
			let client = client.clone();
			tokio::spawn(async move {
				for i in 0..200 {
					let mut subject = ctx(&format!("{worker}-{i}")).with_attribute("country", "US");
					let result = client.eval_feature("banner", &mut subject).await;
					assert!(result.value == json!("on") || result.source == FeatureSource::UnknownFeature);
				}
			})
		})
		.collect();

	for generation in 0..50 {
		if generation % 2 == 0 {
			client.set_snapshot(FeatureSnapshot::default());
		} else {
			client.refresh().await.unwrap();
		}
		tokio::task::yield_now().await;
	}

	for worker in workers {
		worker.await.unwrap();
	}
}
