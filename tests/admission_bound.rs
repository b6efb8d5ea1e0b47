use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use bucketry::{
    ApiConfig, BucketState, ManualClock, Method, RateLimitCache, RateLimitHeaders, Request,
    RequestOptions,
};

fn request(url: &str) -> Request {
    Request::new(Method::Post, url, RequestOptions::default()).unwrap()
}

#[test]
fn parallel_admissions_never_exceed_remaining() {
    let clock = ManualClock::new(0);
    let cache = Arc::new(RateLimitCache::new(&ApiConfig::default(), Arc::new(clock.clone())));
    let bucket =
        BucketState { bucket_hash: "abc".into(), limit: 10, remaining: 7, reset_after: 5_000 };
    let headers = RateLimitHeaders::new(false, Some(bucket), 0, 0);
    cache.update(&mut request("/channels/1/messages"), &headers);

    let admitted = Arc::new(AtomicUsize::new(0));
    let workers: Vec<_> = (0..8)
        .map(|_| {
            let cache = cache.clone();
            let admitted = admitted.clone();
            thread::spawn(move || {
                for _ in 0..5 {
                    let mut req = request("/channels/1/messages");
                    if cache.authorize_request_from_client(&mut req).is_admitted() {
                        admitted.fetch_add(1, Ordering::SeqCst);
                    }
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    assert_eq!(admitted.load(Ordering::SeqCst), 7);
    assert_eq!(cache.rate_limit("channels-1-abc").unwrap().remaining, 0);
}

#[test]
fn global_limit_caps_unseen_routes() {
    let clock = ManualClock::new(0);
    let cache = RateLimitCache::new(&ApiConfig::default(), Arc::new(clock.clone()));

    let admitted = (0..60)
        .filter(|id| {
            let mut req = request(&format!("/guilds/{id}"));
            cache.authorize_request_from_client(&mut req).is_admitted()
        })
        .count();
    assert_eq!(admitted, 50);

    let mut late = request("/guilds/99");
    let state = cache.is_rate_limited(&mut late);
    assert!(state.global);
    assert_eq!(state.wait_for.as_millis(), 1_050);

    clock.advance(1_050);
    assert!(cache.authorize_request_from_client(&mut late).is_admitted());
}

#[test]
fn template_converges_to_the_strictest_observation() {
    let clock = ManualClock::new(0);
    let cache = RateLimitCache::new(&ApiConfig::default(), Arc::new(clock.clone()));
    let observations =
        [("/channels/1", 5, 1_000), ("/channels/2", 3, 4_000), ("/channels/3", 4, 2_000)];
    for (url, limit, reset_after) in observations {
        let bucket =
            BucketState { bucket_hash: "abc".into(), limit, remaining: limit, reset_after };
        cache.update(&mut request(url), &RateLimitHeaders::new(false, Some(bucket), 0, 0));
    }
    let template = cache.template("abc").unwrap();
    assert_eq!(template.limit, 3);
    assert_eq!(template.reset_after, 4_000);
}
