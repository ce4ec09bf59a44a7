use super::*;
use crate::types::PartitionOutcome;
use wiremock::matchers::body_string_contains;

/// Matches job creation requests for partition `key`
fn submit_for(key: &str) -> wiremock::MockBuilder {
    Mock::given(method("POST"))
        .and(path(EXPORTS_PATH))
        .and(body_string_contains(format!("image_digest:*'{key}*'")))
}

async fn mount_completed_job(server: &MockServer, key: &str, job_id: &str, payload: serde_json::Value) {
    submit_for(key)
        .respond_with(job_created(job_id))
        .mount(server)
        .await;
    mount_status(server, job_id, "DONE").await;
    mount_download(server, job_id, payload).await;
}

async fn submissions_for(server: &MockServer, key: &str) -> usize {
    let needle = format!("image_digest:*'{key}*'");
    server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|r| {
            r.method.as_str() == "POST"
                && r.url.path() == EXPORTS_PATH
                && String::from_utf8_lossy(&r.body).contains(&needle)
        })
        .count()
}

#[tokio::test]
async fn two_partitions_merge_into_one_result() {
    let server = MockServer::start().await;
    mount_token(&server, "tok").await;
    mount_completed_job(&server, "0", "J0", json!([{"id": "a"}])).await;
    mount_completed_job(
        &server,
        "1",
        "J1",
        json!({"resources": [{"id": "b"}, {"id": "c"}]}),
    )
    .await;

    let exporter = test_exporter(&server);
    let mut events = exporter.subscribe();
    let run = exporter.run(&partitions(&["0", "1"])).await.unwrap();

    assert_eq!(run.total_records(), 3);
    let ids: Vec<_> = run.records().iter().map(|r| r.value()["id"].clone()).collect();
    assert_eq!(ids, vec![json!("a"), json!("b"), json!("c")]);
    assert!(run.failed_partitions().is_empty());
    assert_eq!(
        run.partitions()[1].outcome,
        PartitionOutcome::Completed {
            job_id: JobId::new("J1"),
            records: 2
        }
    );

    let events = drain(&mut events);
    let pauses = events
        .iter()
        .filter(|e| matches!(e, Event::PartitionPause { .. }))
        .count();
    assert_eq!(pauses, 1, "no pause after the last partition");
    assert!(matches!(
        events.last(),
        Some(Event::RunComplete {
            total_records: 3,
            ..
        })
    ));
}

#[tokio::test]
async fn repeated_partition_is_exported_once() {
    let server = MockServer::start().await;
    mount_token(&server, "tok").await;
    mount_completed_job(&server, "0", "J0", json!([{"id": "a"}])).await;
    mount_completed_job(&server, "1", "J1", json!([{"id": "b"}])).await;

    let exporter = test_exporter(&server);
    let run = exporter.run(&partitions(&["0", "1", "0"])).await.unwrap();

    assert_eq!(submissions_for(&server, "0").await, 1);
    assert_eq!(run.total_records(), 2);
    let keys: Vec<&str> = run
        .partitions()
        .iter()
        .map(|p| p.partition.as_str())
        .collect();
    assert_eq!(keys, vec!["0", "1"]);
}

#[tokio::test]
async fn at_most_one_job_is_in_flight() {
    let server = MockServer::start().await;
    mount_token(&server, "tok").await;
    mount_completed_job(&server, "0", "J0", json!([{"id": "a"}])).await;
    mount_completed_job(&server, "1", "J1", json!([{"id": "b"}])).await;
    mount_completed_job(&server, "2", "J2", json!([{"id": "c"}])).await;

    let exporter = test_exporter(&server);
    exporter.run(&partitions(&["0", "1", "2"])).await.unwrap();

    // Every job creation after the first must follow the previous job's download
    let mut outstanding = false;
    for request in server.received_requests().await.unwrap() {
        let request_path = request.url.path();
        if request.method.as_str() == "POST" && request_path == EXPORTS_PATH {
            assert!(!outstanding, "job submitted while another was in flight");
            outstanding = true;
        } else if request_path == FILES_PATH {
            outstanding = false;
        }
    }
}

#[tokio::test]
async fn quota_failure_resubmits_same_partition() {
    let server = MockServer::start().await;
    mount_token(&server, "tok").await;
    submit_for("0")
        .respond_with(quota_reached())
        .up_to_n_times(1)
        .mount(&server)
        .await;
    mount_completed_job(&server, "0", "J0", json!([{"id": "a"}, {"id": "b"}])).await;

    let exporter = test_exporter(&server);
    let mut events = exporter.subscribe();
    let run = exporter.run(&partitions(&["0"])).await.unwrap();

    assert_eq!(submissions_for(&server, "0").await, 2);
    // Only the successful retry is credited
    assert_eq!(run.total_records(), 2);
    assert!(
        drain(&mut events)
            .iter()
            .any(|e| matches!(e, Event::QuotaExceeded { .. }))
    );
}

#[tokio::test]
async fn other_submission_failure_abandons_partition_and_run_continues() {
    let server = MockServer::start().await;
    mount_token(&server, "tok").await;
    submit_for("0")
        .respond_with(ResponseTemplate::new(400).set_body_string("invalid filter"))
        .mount(&server)
        .await;
    mount_completed_job(&server, "1", "J1", json!([{"id": "b"}])).await;

    let exporter = test_exporter(&server);
    let mut events = exporter.subscribe();
    let run = exporter.run(&partitions(&["0", "1"])).await.unwrap();

    assert_eq!(submissions_for(&server, "0").await, 1, "not retried");
    assert_eq!(run.total_records(), 1);
    assert_eq!(run.failed_partitions(), partitions(&["0"]));
    assert!(
        drain(&mut events)
            .iter()
            .any(|e| matches!(e, Event::PartitionAbandoned { .. }))
    );
}

#[tokio::test]
async fn exhausted_download_is_retried_then_abandoned() {
    let server = MockServer::start().await;
    mount_token(&server, "tok").await;
    submit_for("0")
        .respond_with(job_created("J0"))
        .mount(&server)
        .await;
    mount_status(&server, "J0", "RUNNING").await;
    mount_completed_job(&server, "1", "J1", json!([{"id": "b"}, {"id": "c"}])).await;

    let mut config = fast_config(&server.uri());
    config.polling.max_attempts = 2;
    config.retry.max_attempts = 3;
    let exporter = exporter_with(config);
    let mut events = exporter.subscribe();

    let run = exporter.run(&partitions(&["0", "1"])).await.unwrap();

    assert_eq!(submissions_for(&server, "0").await, 3);
    assert_eq!(run.total_records(), 2);
    assert_eq!(run.failed_partitions(), partitions(&["0"]));
    match &run.partitions()[0].outcome {
        PartitionOutcome::Abandoned { reason } => {
            assert_eq!(reason, "export not downloaded after 2 attempts");
        }
        other => panic!("expected abandoned partition, got {other:?}"),
    }

    let retries: Vec<u32> = drain(&mut events)
        .into_iter()
        .filter_map(|e| match e {
            Event::PartitionRetrying { attempt, .. } => Some(attempt),
            _ => None,
        })
        .collect();
    assert_eq!(retries, vec![1, 2], "no retry announced after the last attempt");
}

#[tokio::test]
async fn initial_authentication_failure_is_fatal() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(ResponseTemplate::new(401).set_body_string("access denied"))
        .mount(&server)
        .await;

    let exporter = test_exporter(&server);
    let err = exporter.run(&partitions(&["0", "1"])).await.unwrap_err();

    assert!(matches!(err, Error::Auth(_)));
    assert_eq!(count_requests(&server, "POST", EXPORTS_PATH).await, 0);
}

#[tokio::test]
async fn empty_partition_list_yields_empty_run() {
    let server = MockServer::start().await;
    mount_token(&server, "tok").await;

    let exporter = test_exporter(&server);
    let run = exporter.run(&[]).await.unwrap();

    assert_eq!(run.total_records(), 0);
    assert!(run.partitions().is_empty());
    assert_eq!(count_requests(&server, "POST", TOKEN_PATH).await, 1);
}
