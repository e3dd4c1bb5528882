//! Concurrency Tests
//!
//! Predictions keep being served while the background trainer publishes
//! new model versions, and readers never observe a version going backwards.

use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, TimeZone, Utc};
use futures::future::join_all;
use orbcast::config::{ForecastConfig, PipelineConfig};
use orbcast::model::ModelKey;
use orbcast::pipeline::{JsonLinesSource, PipelineCoordinator, ProcessingLoop};
use orbcast::types::{FeatureSchema, FeedRecord};
use tokio::io::BufReader;

fn t(minutes: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap() + Duration::minutes(minutes)
}

fn tle(satellite_id: &str, minutes: i64) -> FeedRecord {
    FeedRecord::tle(satellite_id, t(minutes))
        .with_field("mean_motion", 14.2)
        .with_field("eccentricity", 0.001)
        .with_field("inclination", 98.7)
        .with_field("raan", (minutes as f64 * 0.05).rem_euclid(360.0))
        .with_field("arg_perigee", 120.0)
        .with_field("mean_anomaly", (minutes as f64 * 5.0).rem_euclid(360.0))
        .with_field("bstar", 0.00005)
}

fn config() -> ForecastConfig {
    ForecastConfig {
        pipeline: PipelineConfig {
            window_size: 4,
            backpressure_queue_capacity: 256,
            ..PipelineConfig::default()
        },
        ..ForecastConfig::default()
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn readers_see_monotonic_versions_while_training() {
    let mut coord = PipelineCoordinator::new_at(&config(), FeatureSchema::default(), None, t(0));
    for i in 0..4 {
        coord.ingest(&tle("A", i * 10));
    }
    let handle = coord.handle();
    let stop = coord.shutdown_token().child_token();
    let worker = coord.spawn_trainer(stop.clone());

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let predictor = handle.predictor.clone();
            tokio::spawn(async move {
                let mut last = 0u64;
                for _ in 0..200 {
                    let p = predictor.predict_at("A", t(1_000)).expect("window committed before readers start");
                    assert!(p.model_version >= last, "version went back from {last} to {}", p.model_version);
                    last = p.model_version;
                    tokio::task::yield_now().await;
                }
                last
            })
        })
        .collect();

    for i in 4..24 {
        coord.ingest(&tle("A", i * 10));
        tokio::task::yield_now().await;
    }

    for result in join_all(readers).await {
        result.unwrap();
    }

    // 21 windows in total: wait for the worker to drain them
    let deadline = tokio::time::Instant::now() + StdDuration::from_secs(60);
    while handle.registry.snapshot(&ModelKey::Shared).unwrap().version < 21 {
        assert!(tokio::time::Instant::now() < deadline, "trainer did not catch up");
        tokio::time::sleep(StdDuration::from_millis(20)).await;
    }
    stop.cancel();
    assert_eq!(worker.await.unwrap(), 21);
    assert_eq!(handle.events.counts().model_published, 21);
    assert!(handle.queue.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn predictor_clones_share_history() {
    let mut coord = PipelineCoordinator::new_at(&config(), FeatureSchema::default(), None, t(0));
    for i in 0..4 {
        coord.ingest(&tle("A", i * 10));
        coord.ingest(&tle("B", i * 10 + 1));
    }
    let predictor = Arc::new(coord.predictor().clone());
    let tasks = ["A", "B", "A", "B"].into_iter().map(|id| {
        let predictor = Arc::clone(&predictor);
        tokio::spawn(async move { predictor.predict_at(id, t(60)).map(|p| p.satellite_id) })
    });
    let served: Vec<String> = join_all(tasks)
        .await
        .into_iter()
        .map(|r| r.unwrap().unwrap())
        .collect();
    assert_eq!(served.len(), 4);
    assert_eq!(coord.predictor().recent(10).len(), 4);
}

#[test]
fn json_lines_feed_runs_through_the_loop() {
    let mut input = String::new();
    for i in 0..5 {
        input.push_str(&serde_json::to_string(&tle("25544", i * 10)).unwrap());
        input.push('\n');
    }
    input.push_str("{\"truncated\": \n");

    let (coord, stats) = tokio_test::block_on(async {
        let coord = PipelineCoordinator::new_at(&config(), FeatureSchema::default(), None, t(0));
        let cancel = coord.shutdown_token();
        let mut source = JsonLinesSource::new(BufReader::new(Cursor::new(input.into_bytes())), "inline");
        let result = ProcessingLoop::new(coord, cancel).run(&mut source).await;
        assert_eq!(source.skipped(), 1);
        result
    });
    assert_eq!(stats.records, 5);
    assert_eq!(stats.windows_committed, 2);
    assert_eq!(coord.drain_training().len(), 2);
}
