// SPDX-License-Identifier: MIT

use super::*;
use lp_wire::{read_message, write_message, DEFAULT_MAX_MESSAGE_SIZE};
use parking_lot::Mutex;
use serde_json::json;

struct Harness {
    handle: ChannelHandle,
    launcher_read: tokio::io::ReadHalf<tokio::io::DuplexStream>,
    launcher_write: tokio::io::WriteHalf<tokio::io::DuplexStream>,
    requests: Arc<Mutex<Vec<Request>>>,
}

fn start_channel(max_message_size: usize) -> Harness {
    let (plugin_side, launcher_side) = tokio::io::duplex(64 * 1024);
    let (plugin_read, plugin_write) = tokio::io::split(plugin_side);
    let (launcher_read, launcher_write) = tokio::io::split(launcher_side);

    let requests = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&requests);
    let handler: RequestHandler = Arc::new(move |request| sink.lock().push(request));

    let channel = LauncherChannel::new(max_message_size);
    let handle = channel.start(plugin_read, plugin_write, handler);

    Harness { handle, launcher_read, launcher_write, requests }
}

async fn send_json(harness: &mut Harness, value: serde_json::Value) {
    write_message(&mut harness.launcher_write, value.to_string().as_bytes()).await.unwrap();
}

async fn recv_json(harness: &mut Harness) -> serde_json::Value {
    let payload =
        read_message(&mut harness.launcher_read, DEFAULT_MAX_MESSAGE_SIZE).await.unwrap();
    serde_json::from_slice(&payload).unwrap()
}

#[tokio::test]
async fn dispatches_parsed_requests_to_the_handler() {
    let mut harness = start_channel(DEFAULT_MAX_MESSAGE_SIZE);

    send_json(&mut harness, json!({"messageType": 0, "requestId": 0})).await;

    // Wait for the reader task to deliver the request.
    for _ in 0..100 {
        if !harness.requests.lock().is_empty() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    assert!(matches!(harness.requests.lock()[0], Request::Heartbeat { request_id: 0 }));
}

#[tokio::test]
async fn invalid_request_produces_an_error_response_and_keeps_the_channel() {
    let mut harness = start_channel(DEFAULT_MAX_MESSAGE_SIZE);

    // Known type with an invalid body (empty username on GetJob).
    send_json(
        &mut harness,
        json!({"messageType": 3, "requestId": 9, "username": "", "jobId": "*"}),
    )
    .await;

    let error = recv_json(&mut harness).await;
    assert_eq!(error["messageType"], -1);
    assert_eq!(error["requestId"], 9);
    assert_eq!(error["errorCode"], 2);
    assert_eq!(error["responseId"], 0);

    // The channel is still alive: a valid request goes through.
    send_json(&mut harness, json!({"messageType": 0, "requestId": 0})).await;
    for _ in 0..100 {
        if !harness.requests.lock().is_empty() {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    panic!("channel stopped dispatching after an invalid request");
}

#[tokio::test]
async fn unsupported_message_type_maps_to_request_not_supported() {
    let mut harness = start_channel(DEFAULT_MAX_MESSAGE_SIZE);

    send_json(&mut harness, json!({"messageType": 77, "requestId": 5})).await;

    let error = recv_json(&mut harness).await;
    assert_eq!(error["errorCode"], 1);
    assert_eq!(error["requestId"], 5);
}

#[tokio::test]
async fn oversized_frame_terminates_the_channel() {
    let mut harness = start_channel(64);

    let oversized = "x".repeat(65);
    write_message(&mut harness.launcher_write, oversized.as_bytes()).await.unwrap();

    let closed = harness.handle.closed();
    tokio::time::timeout(std::time::Duration::from_secs(1), closed.cancelled())
        .await
        .expect("channel did not close on framing error");
}

#[tokio::test]
async fn response_ids_are_monotonic_for_non_error_responses() {
    let mut harness = start_channel(DEFAULT_MAX_MESSAGE_SIZE);
    let sender = harness.handle.sender();

    sender.send(Response::Bootstrap { request_id: 1, version: lp_wire::Version::new(1, 2, 0) });
    sender.send(Response::Heartbeat);
    sender.send(Response::JobState { request_id: 2, jobs: vec![] });

    let first = recv_json(&mut harness).await;
    let heartbeat = recv_json(&mut harness).await;
    let second = recv_json(&mut harness).await;

    assert_eq!(first["responseId"], 1);
    assert_eq!(heartbeat["responseId"], 0);
    assert_eq!(second["responseId"], 2);
}

#[tokio::test]
async fn stop_drains_pending_writes() {
    let harness = start_channel(DEFAULT_MAX_MESSAGE_SIZE);
    let sender = harness.handle.sender();

    sender.send(Response::JobState { request_id: 3, jobs: vec![] });

    let Harness { handle, mut launcher_read, .. } = harness;
    handle.stop().await;

    let payload = read_message(&mut launcher_read, DEFAULT_MAX_MESSAGE_SIZE).await.unwrap();
    let drained: serde_json::Value = serde_json::from_slice(&payload).unwrap();
    assert_eq!(drained["requestId"], 3);
}

#[test]
fn redaction_masks_sensitive_fields_recursively() {
    let payload = json!({
        "job": {
            "config": [{"name": "encryptedPassword", "value": "s3cret"}],
            "encryptedPassword": "s3cret",
            "initializationVector": "abcdefgh"
        },
        "password": "hunter2"
    })
    .to_string();

    let redacted = redact_payload(&payload);
    assert!(!redacted.contains("s3cret"));
    assert!(!redacted.contains("hunter2"));
    assert!(!redacted.contains("abcdefgh"));
    assert!(redacted.contains("<redacted>"));
}
