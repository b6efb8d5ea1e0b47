mod common;

use std::time::Duration;

use bucketry::{
    ApiCall, ApiConfig, ApiError, ApiEvent, ApiOutcome, Method, RequestOptions, TransportError,
};
use common::test_helpers::{bucket_response, harness, too_many_requests, wait_for_queue};
use tower::ServiceExt;

#[tokio::test]
async fn too_many_requests_is_retried_after_the_server_delay() {
    let h = harness(ApiConfig::default());
    h.transport.push(too_many_requests("abc", 5, "1.5"));
    h.transport.push(bucket_response("abc", 5, 4, "2"));

    let api = h.api.clone();
    let pending = tokio::spawn(async move {
        api.request(Method::Post, "/channels/1/messages", RequestOptions::default()).await
    });
    wait_for_queue(&h.api, 1).await;
    assert!(h.events.events().iter().any(|e| matches!(
        e,
        ApiEvent::RateLimitedResponse { retry_after, global: false, .. }
            if *retry_after == Duration::from_millis(1_500)
    )));

    h.clock.advance(1_500);
    h.api.process_queue().await;
    let outcome = pending.await.unwrap().unwrap();
    assert_eq!(outcome.response().unwrap().status, 200);
    assert_eq!(h.transport.calls(), 2);
}

#[tokio::test]
async fn return_on_rate_limit_hands_back_the_server_delay() {
    let h = harness(ApiConfig::default());
    h.transport.push(too_many_requests("abc", 5, "3"));

    let options = RequestOptions::new().return_on_rate_limit(true);
    let outcome = h.api.request(Method::Post, "/channels/1/messages", options).await.unwrap();
    match outcome {
        ApiOutcome::RateLimited(deferred) => {
            assert_eq!(deferred.wait_for, Duration::from_millis(3_000));
            assert_eq!(deferred.retry_after_hint, Some(Duration::from_millis(3_000)));
        }
        other => panic!("expected a rate limit, got {other:?}"),
    }
    assert_eq!(h.api.queue_len(), 0);
}

#[tokio::test]
async fn zero_retries_gives_up_on_the_first_limit() {
    let h = harness(ApiConfig::default());
    h.transport.push(too_many_requests("abc", 5, "1"));

    let outcome = h
        .api
        .request(Method::Get, "/channels/1", RequestOptions::new().max_rate_limit_retry(0))
        .await
        .unwrap();
    assert!(outcome.is_rate_limited());
    assert_eq!(h.transport.calls(), 1);
}

#[tokio::test]
async fn retries_stop_at_the_configured_maximum() {
    let h = harness(ApiConfig::default());
    h.transport.push(too_many_requests("abc", 5, "1"));
    h.transport.push(too_many_requests("abc", 5, "1"));

    let api = h.api.clone();
    let pending = tokio::spawn(async move {
        api.request(Method::Get, "/channels/1", RequestOptions::new().max_rate_limit_retry(1)).await
    });
    wait_for_queue(&h.api, 1).await;

    h.clock.advance(1_000);
    h.api.process_queue().await;
    let outcome = pending.await.unwrap().unwrap();
    let deferred = outcome.rate_limited().expect("gave up after one retry");
    assert_eq!(deferred.retry_after_hint, Some(Duration::from_millis(1_000)));
    assert_eq!(h.transport.calls(), 2);
}

#[tokio::test]
async fn global_response_blocks_other_buckets() {
    let h = harness(ApiConfig::default());
    h.transport.push(too_many_requests("abc", 5, "2").with_header("X-RateLimit-Global", "true"));

    let outcome = h
        .api
        .request(Method::Get, "/channels/1", RequestOptions::new().return_on_rate_limit(true))
        .await
        .unwrap();
    assert!(outcome.rate_limited().unwrap().global);

    let outcome = h
        .api
        .request(Method::Get, "/guilds/2", RequestOptions::new().return_on_global_rate_limit(true))
        .await
        .unwrap();
    let deferred = outcome.rate_limited().unwrap();
    assert!(deferred.global);
    assert_eq!(deferred.wait_for, Duration::from_millis(2_000));
    assert_eq!(h.transport.calls(), 1);
}

#[tokio::test]
async fn queue_releases_in_eligibility_order() {
    let h = harness(ApiConfig::default());
    h.transport.push(bucket_response("abc", 1, 0, "5"));
    h.transport.push(bucket_response("abc", 1, 0, "1"));
    h.api.request(Method::Patch, "/channels/1", RequestOptions::default()).await.unwrap();
    h.api.request(Method::Patch, "/channels/2", RequestOptions::default()).await.unwrap();

    let spawn = |url: &'static str| {
        let api = h.api.clone();
        tokio::spawn(async move {
            api.request(Method::Patch, url, RequestOptions::default()).await
        })
    };
    let slow = spawn("/channels/1");
    wait_for_queue(&h.api, 1).await;
    let fast = spawn("/channels/2");
    wait_for_queue(&h.api, 2).await;

    h.events.clear();
    h.clock.advance(5_000);
    h.api.process_queue().await;
    fast.await.unwrap().unwrap();
    slow.await.unwrap().unwrap();

    let admitted: Vec<String> = h
        .events
        .events()
        .into_iter()
        .filter_map(|e| match e {
            ApiEvent::Admitted { url, .. } => Some(url),
            _ => None,
        })
        .collect();
    assert_eq!(admitted, vec!["/channels/2", "/channels/1"]);
}

#[tokio::test]
async fn transport_errors_are_returned_unchanged() {
    let h = harness(ApiConfig::default());
    h.transport.push_err(TransportError::new("connection reset"));

    let err = h.api.request(Method::Get, "/gateway", RequestOptions::default()).await.unwrap_err();
    assert!(matches!(err, ApiError::Transport(_)));
}

#[tokio::test]
async fn api_is_a_tower_service() {
    let h = harness(ApiConfig::default());
    h.transport.push(bucket_response("abc", 5, 4, "2"));

    let call = ApiCall::new(Method::Delete, "/channels/1/messages/99")
        .with_options(RequestOptions::new().header("X-Audit-Log-Reason", "cleanup"));
    let outcome = h.api.clone().oneshot(call).await.unwrap();
    assert!(outcome.response().is_some());

    let seen = h.transport.seen();
    assert_eq!(seen[0].method, Method::Delete);
    assert_eq!(seen[0].headers.get("X-Audit-Log-Reason").map(String::as_str), Some("cleanup"));
    assert_eq!(h.api.cache().bucket_hash("D:ch:msg:#").as_deref(), Some("abc"));
}

#[tokio::test]
async fn longer_body_retry_after_holds_the_bucket_closed() {
    let h = harness(ApiConfig::default());
    let mut limited =
        bucket_response("abc", 5, 0, "1").with_body(serde_json::json!({ "retry_after": 5.0 }));
    limited.status = 429;
    h.transport.push(limited);
    let options = || RequestOptions::new().return_on_rate_limit(true);

    let first = h.api.request(Method::Post, "/channels/1/messages", options()).await.unwrap();
    assert_eq!(first.rate_limited().unwrap().wait_for, Duration::from_secs(5));

    // the bucket header alone would have reopened the bucket after one second
    h.clock.advance(1_500);
    let second = h.api.request(Method::Post, "/channels/1/messages", options()).await.unwrap();
    assert_eq!(second.rate_limited().unwrap().wait_for, Duration::from_millis(3_500));
    assert_eq!(h.transport.calls(), 1);
}
