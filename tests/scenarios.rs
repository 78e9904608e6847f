//! Whole-flow scenarios against the scripted transport and a virtual clock.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use docflow::testing::{Reply, ScriptedTransport};
use docflow::transport::{HttpRequest, RequestBody};
use docflow::{
    ClientConfig, ClientError, ConfirmOutcome, DocflowClient, NetworkCause, Submission,
    UploadFile, VirtualScheduler,
};

fn client_with(
    transport: Arc<ScriptedTransport>,
    scheduler: Arc<VirtualScheduler>,
) -> DocflowClient {
    DocflowClient::with_parts(ClientConfig::default(), transport, scheduler).expect("client")
}

fn json_body(request: &HttpRequest) -> Value {
    match &request.body {
        Some(RequestBody::Json(body)) => body.clone(),
        _ => Value::Null,
    }
}

fn analyzed(temp_id: &str, name: &str) -> Value {
    json!({
        "success": true,
        "temp_id": temp_id,
        "original_filename": name,
        "standardized_filename": name,
        "analysis": { "suggested_category_ids": [1], "keywords": ["contract"] },
        "batch_id": "b1"
    })
}

fn completed(results: Value) -> Reply {
    Reply::json(
        200,
        json!({
            "status": "completed",
            "processed_files": 3,
            "total_files": 3,
            "results": results
        }),
    )
}

#[tokio::test]
async fn test_partial_analysis_then_partial_confirmation() {
    let transport = Arc::new(ScriptedTransport::new(|request, seen| {
        let path = request.url.path();
        if path.ends_with("/batch-analyze") {
            Reply::json(200, json!({ "batch_id": "b1", "status": "queued" }))
        } else if path.ends_with("/batch-status/b1") {
            match seen {
                0 => Reply::network(NetworkCause::Reset, "connection reset by peer"),
                1 => Reply::json(
                    200,
                    json!({ "status": "processing", "processed_files": 1, "total_files": 3 }),
                ),
                2 => Reply::status(408),
                _ => completed(json!([
                    analyzed("t1", "lease.pdf"),
                    {
                        "success": false,
                        "original_filename": "photo.heic",
                        "error": "Unsupported file type",
                        "batch_id": "b1"
                    },
                    analyzed("t3", "deed.pdf"),
                ])),
            }
        } else if path.ends_with("/confirm-upload") {
            if json_body(request)["temp_id"] == "t3" {
                Reply::json(500, json!({ "detail": "storage offline" }))
            } else {
                Reply::json(201, json!({ "id": 501 }))
            }
        } else {
            Reply::status(404)
        }
    }));
    let scheduler = Arc::new(VirtualScheduler::new());
    let client = client_with(transport.clone(), scheduler.clone());

    let files = vec![
        UploadFile::new("lease.pdf", b"a".to_vec()),
        UploadFile::new("photo.heic", b"b".to_vec()),
        UploadFile::new("deed.pdf", b"c".to_vec()),
    ];
    let ticket = client
        .submit_batch(&files)
        .await
        .expect("submit")
        .into_ticket()
        .expect("accepted");

    let results = client.poll_batch(&ticket.batch_id).await.expect("poll");
    assert_eq!(transport.calls_to("/batch-status/b1"), 4);
    assert_eq!(scheduler.sleeps(), vec![Duration::from_secs(2); 3]);

    let (mut reconciler, summary) = client.reconcile(results, &[]);
    assert_eq!(summary.analyzed, 2);
    assert_eq!(summary.failed(), 1);
    assert_eq!(summary.failures[0].reason, "Unsupported file type");

    let report = reconciler.confirm_all().await.expect("confirm");
    assert_eq!(transport.calls_to("/confirm-upload"), 2);
    assert_eq!(report.successful(), 1);
    assert_eq!(report.failed_count(), 1);
    assert_eq!(report.outcome(), ConfirmOutcome::Partial);
    assert!(report.should_continue());
    assert_eq!(report.confirmed[0].document_id, Some(json!(501)));

    // The failed file stays for another attempt.
    assert_eq!(reconciler.files().len(), 1);
    assert_eq!(reconciler.files()[0].temp_id(), "t3");
}

#[tokio::test(start_paused = true)]
async fn test_parallel_confirmations_share_one_refresh() {
    let refreshed = Arc::new(AtomicBool::new(false));
    let flag = refreshed.clone();
    let transport = Arc::new(ScriptedTransport::new(move |request, _| {
        let path = request.url.path();
        if path.ends_with("/auth/refresh") {
            flag.store(true, Ordering::SeqCst);
            Reply::status(204).after(Duration::from_millis(50))
        } else if path.ends_with("/confirm-upload") {
            if flag.load(Ordering::SeqCst) {
                Reply::json(201, json!({ "id": json_body(request)["temp_id"] }))
            } else {
                Reply::json(401, json!({ "detail": "Session expired" }))
                    .after(Duration::from_millis(10))
            }
        } else {
            Reply::status(404)
        }
    }));
    let client = client_with(transport.clone(), Arc::new(VirtualScheduler::new()));

    let results: Vec<_> = serde_json::from_value(json!([
        analyzed("t1", "a.pdf"),
        analyzed("t2", "b.pdf"),
        analyzed("t3", "c.pdf"),
        analyzed("t4", "d.pdf"),
    ]))
    .expect("results");
    let (mut reconciler, _) = client.reconcile(results, &[]);

    let report = reconciler.confirm_all().await.expect("confirm");

    assert_eq!(report.outcome(), ConfirmOutcome::AllSucceeded);
    assert_eq!(transport.calls_to("/auth/refresh"), 1);
    assert_eq!(transport.calls_to("/confirm-upload"), 8);
    assert_eq!(client.session().refresh_count(), 1);
    assert!(refreshed.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_duplicate_upload_is_reported_not_failed() {
    let transport = Arc::new(ScriptedTransport::always(Reply::json(
        409,
        json!({
            "detail": "Document already exists",
            "existing_document": {
                "id": "d-9",
                "title": "Rental contract",
                "created_at": "2024-05-06T08:00:00Z"
            }
        }),
    )));
    let client = client_with(transport.clone(), Arc::new(VirtualScheduler::new()));

    let submission = client
        .submit_batch(&[UploadFile::new("contract.pdf", b"x".to_vec())])
        .await
        .expect("duplicate is not an error");

    match submission {
        Submission::Duplicate(existing) => {
            assert_eq!(existing.title, "Rental contract");
            assert_eq!(existing.id, Some(json!("d-9")));
        }
        other => panic!("expected duplicate, got {other:?}"),
    }
    assert_eq!(transport.request_count(), 1);
}

#[tokio::test]
async fn test_failed_batch_stops_polling_with_reason() {
    let transport = Arc::new(ScriptedTransport::new(|_, seen| match seen {
        0 => Reply::json(200, json!({ "status": "queued", "queue_stats": { "position": 3 } })),
        _ => Reply::json(
            200,
            json!({ "status": "failed", "error": "Analysis service unavailable" }),
        ),
    }));
    let client = client_with(transport.clone(), Arc::new(VirtualScheduler::new()));

    let err = client.poll_batch("b1").await.unwrap_err();
    match err {
        ClientError::BatchFailed { batch_id, reason } => {
            assert_eq!(batch_id, "b1");
            assert_eq!(reason, "Analysis service unavailable");
        }
        other => panic!("expected BatchFailed, got {other:?}"),
    }
    assert_eq!(transport.request_count(), 2);
}

#[tokio::test]
async fn test_poll_gives_up_after_configured_attempts() {
    let transport = Arc::new(ScriptedTransport::always(Reply::network(
        NetworkCause::Request,
        "error sending request",
    )));
    let scheduler = Arc::new(VirtualScheduler::new());
    let mut config = ClientConfig::default();
    config.poll.max_attempts = 5;
    config.poll.interval = Duration::from_millis(250);
    let client =
        DocflowClient::with_parts(config, transport.clone(), scheduler.clone()).expect("client");

    let err = client.poll_batch("b1").await.unwrap_err();
    assert!(matches!(err, ClientError::PollTimeout { attempts: 5, .. }));
    assert_eq!(transport.request_count(), 5);
    assert_eq!(scheduler.elapsed(), Duration::from_millis(1000));
}
