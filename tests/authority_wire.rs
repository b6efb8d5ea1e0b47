use std::sync::Arc;

use bucketry::authority::wire::{ErrorKind, Reply};
use bucketry::{ApiConfig, AuthorityService, LocalAuthority, ManualClock};
use serde_json::json;

fn service() -> (AuthorityService, LocalAuthority) {
    let local = LocalAuthority::new(&ApiConfig::default(), Arc::new(ManualClock::new(0)));
    (AuthorityService::new(Arc::new(local.clone())), local)
}

async fn call(service: &AuthorityService, frame: serde_json::Value) -> Reply {
    let bytes = service.handle_frame(frame.to_string().as_bytes()).await;
    serde_json::from_slice(&bytes).expect("reply is json")
}

#[tokio::test]
async fn update_then_authorize_over_frames() {
    let (service, local) = service();
    let reply = call(
        &service,
        json!({
            "id": "1",
            "cmd": "update",
            "args": {
                "method": "PATCH",
                "url": "/channels/9",
                "bucket_hash": "abc",
                "limit": 5,
                "remaining": 0,
                "reset_after_ms": 4000
            }
        }),
    )
    .await;
    assert!(reply.ok, "{reply:?}");
    assert_eq!(local.cache().rate_limit("channels-9-abc").unwrap().remaining, 0);

    let reply = call(
        &service,
        json!({
            "id": "2",
            "cmd": "authorize",
            "args": { "method": "PATCH", "url": "/channels/9" }
        }),
    )
    .await;
    assert_eq!(reply.id, "2");
    assert_eq!(reply.result, Some(json!({ "wait_for_ms": 4000, "global": false })));
}

#[tokio::test]
async fn missing_fields_are_rejected_by_name() {
    let (service, _) = service();
    let reply = call(
        &service,
        json!({
            "id": "3",
            "cmd": "update",
            "args": { "method": "GET", "url": "/channels/1", "bucket_hash": "abc", "limit": 1 }
        }),
    )
    .await;
    assert!(!reply.ok);
    let error = reply.error.unwrap();
    assert_eq!(error.kind, ErrorKind::Validation);
    assert!(error.message.contains("remaining"));

    let reply =
        call(&service, json!({ "id": "4", "cmd": "authorize", "args": { "url": "/x/1" } })).await;
    assert!(reply.error.unwrap().message.contains("method"));
}

#[tokio::test]
async fn unknown_commands_and_garbage_fail_cleanly() {
    let (service, _) = service();
    let reply = call(&service, json!({ "id": "5", "cmd": "shutdown" })).await;
    assert_eq!(reply.error.unwrap().kind, ErrorKind::Validation);

    let bytes = service.handle_frame(b"not json").await;
    let reply: Reply = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(reply.id, "");
    assert!(!reply.ok);
}

#[tokio::test]
async fn lock_commands_round_trip() {
    let (service, local) = service();
    let reply = call(
        &service,
        json!({ "id": "6", "cmd": "acquire_lock", "args": { "time_out_ms": 1000, "token": "t1" } }),
    )
    .await;
    assert_eq!(reply.result.unwrap()["success"], true);
    assert_eq!(local.identify_lock().holder().as_deref(), Some("t1"));

    let release = json!({ "id": "7", "cmd": "release_lock", "args": { "token": "t1" } });
    let reply = call(&service, release).await;
    assert_eq!(reply.result.unwrap()["success"], true);
    assert!(local.identify_lock().holder().is_none());

    let reply = call(&service, json!({ "id": "8", "cmd": "ping" })).await;
    assert_eq!(reply.result, Some(json!("pong")));
}
