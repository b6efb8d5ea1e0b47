mod common;

use std::time::Duration;

use bucketry::{Api, ApiConfig, ApiEvent, InstantSleeper, ManualClock, Method, RequestOptions};
use common::test_helpers::{
    bucket_response, running, too_many_requests, wait_for_queue, ScriptedTransport,
};

fn swept(events: &[ApiEvent]) -> bool {
    events.iter().any(|e| matches!(e, ApiEvent::Swept { .. }))
}

#[tokio::test(start_paused = true)]
async fn queue_tick_drains_deferred_requests() {
    let r = running(ApiConfig::default());
    r.transport.push(too_many_requests("abc", 5, "1"));
    r.transport.push(bucket_response("abc", 5, 4, "1"));

    let api = r.api.clone();
    let pending = tokio::spawn(async move {
        api.request(Method::Get, "/channels/1", RequestOptions::default()).await
    });
    let outcome = tokio::time::timeout(Duration::from_secs(5), pending)
        .await
        .expect("drained by the queue tick")
        .unwrap()
        .unwrap();
    assert_eq!(outcome.response().unwrap().status, 200);
    assert_eq!(r.transport.calls(), 2);
    assert_eq!(r.api.queue_len(), 0);
}

#[tokio::test(start_paused = true)]
async fn sweeper_forgets_idle_limits_on_its_own() {
    let config = ApiConfig::default()
        .sweep_ttl(Duration::from_secs(1))
        .sweep_interval(Duration::from_secs(1));
    let r = running(config);
    r.transport.push(bucket_response("abc", 5, 4, "1"));
    r.api.request(Method::Get, "/channels/1", RequestOptions::default()).await.unwrap();
    assert_eq!(r.api.cache().len(), 1);

    tokio::time::sleep(Duration::from_millis(2_500)).await;
    assert!(r.api.cache().is_empty());
    assert!(r
        .events
        .events()
        .iter()
        .any(|e| matches!(e, ApiEvent::Swept { removed: 1, remaining: 0 })));
}

#[tokio::test(start_paused = true)]
async fn queue_interval_change_applies_from_the_next_tick() {
    let r = running(ApiConfig::default().queue_interval(Duration::from_millis(10)));
    r.transport.push(too_many_requests("abc", 5, "1"));
    // let the tick enter its first short sleep
    tokio::task::yield_now().await;
    r.api.set_queue_interval(Duration::from_secs(30));

    let api = r.api.clone();
    let pending = tokio::spawn(async move {
        api.request(Method::Get, "/channels/1", RequestOptions::default()).await
    });
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(!pending.is_finished());
    assert_eq!(r.api.queue_len(), 1);

    let outcome = tokio::time::timeout(Duration::from_secs(30), pending)
        .await
        .expect("drained once the longer interval elapsed")
        .unwrap()
        .unwrap();
    assert_eq!(outcome.response().unwrap().status, 200);
    assert_eq!(r.transport.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn stopped_queue_leaves_requests_waiting() {
    let r = running(ApiConfig::default());
    r.api.stop_queue();
    r.transport.push(too_many_requests("abc", 5, "1"));

    let api = r.api.clone();
    let pending = tokio::spawn(async move {
        api.request(Method::Get, "/channels/1", RequestOptions::default()).await
    });
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(!pending.is_finished());
    assert_eq!(r.api.queue_len(), 1);

    r.api.start_queue();
    let outcome = tokio::time::timeout(Duration::from_secs(1), pending)
        .await
        .expect("drained after restart")
        .unwrap()
        .unwrap();
    assert!(outcome.response().is_some());
}

#[tokio::test(start_paused = true)]
async fn dropping_the_client_stops_background_work() {
    let config = ApiConfig::default()
        .sweep_ttl(Duration::from_secs(1))
        .sweep_interval(Duration::from_secs(1));
    let r = running(config);
    r.transport.push(bucket_response("abc", 5, 4, "1"));
    r.api.request(Method::Get, "/channels/1", RequestOptions::default()).await.unwrap();

    let cache = r.api.cache().clone();
    drop(r.api);
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(cache.len(), 1);
    assert!(!swept(&r.events.events()));
}

#[tokio::test]
async fn instant_sleeper_does_not_starve_other_tasks() {
    let transport = ScriptedTransport::new();
    let clock = ManualClock::new(1_000_000);
    let api = Api::builder(transport.clone())
        .config(ApiConfig::default().autostart(true))
        .clock(clock.clone())
        .sleeper(InstantSleeper)
        .build()
        .expect("valid config");
    transport.push(too_many_requests("abc", 5, "1"));

    let caller = api.clone();
    let pending = tokio::spawn(async move {
        caller.request(Method::Get, "/channels/1", RequestOptions::default()).await
    });
    wait_for_queue(&api, 1).await;
    clock.advance(1_000);

    let outcome = pending.await.unwrap().unwrap();
    assert_eq!(outcome.response().unwrap().status, 200);
    assert_eq!(transport.calls(), 2);
}
