//! AWS integration tests - actually call AWS APIs
//!
//! These tests are marked `#[ignore]` and only run with:
//! ```
//! AWS_PROFILE=your_profile cargo test --test aws_integration -- --ignored
//! ```
//!
//! They create run-scoped resources under a throwaway image id and delete
//! them before returning.

use std::time::{SystemTime, UNIX_EPOCH};

use tempfile::TempDir;
use testfleet_common::names::{result_store_name, task_queue_name};
use testfleet_coordinator::aws::{AwsContext, QueueClient, StoreClient};

fn test_region() -> String {
    std::env::var("TESTFLEET_TEST_REGION").unwrap_or_else(|_| "us-east-1".to_string())
}

/// A fake image id unique enough to avoid clashing with other test runs.
fn test_image_id() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock after epoch")
        .as_millis();
    format!("ami-test{millis}")
}

#[tokio::test]
#[ignore = "requires AWS credentials"]
async fn task_queue_lifecycle() {
    let ctx = AwsContext::new(&test_region()).await;
    let queue = QueueClient::from_context(&ctx);
    let image_id = test_image_id();

    let cases = vec!["a.feature".to_string(), "b.feature".to_string()];
    let created = queue
        .create_task_queue(&image_id, &cases, 600)
        .await
        .expect("should create task queue");
    assert_eq!(created.name, task_queue_name(&image_id));

    // Creating the same run's queue twice must fail
    let dup = queue.create_task_queue(&image_id, &cases, 600).await;
    assert!(dup.is_err(), "duplicate queue creation should fail");

    let stats = queue
        .queue_stats(&image_id)
        .await
        .expect("should read queue stats");
    assert_eq!(stats.url, created.url);

    queue
        .delete_task_queue(&image_id)
        .await
        .expect("should delete task queue");
}

#[tokio::test]
#[ignore = "requires AWS credentials"]
async fn result_store_lifecycle() {
    let ctx = AwsContext::new(&test_region()).await;
    let store = StoreClient::from_context(&ctx);
    let image_id = test_image_id();
    let root = TempDir::new().expect("tempdir");

    let name = store
        .create_result_store(&image_id, 3)
        .await
        .expect("should create result store");
    assert_eq!(name, result_store_name(&image_id));

    // The tag written at creation is readable back
    let expected = store
        .expected_result_count(&image_id)
        .await
        .expect("should read expected count");
    assert_eq!(expected, 3);

    // Draining an empty store is a normal no-op
    let drained = store
        .drain_new(&image_id, root.path())
        .await
        .expect("empty drain should succeed");
    assert!(drained.is_empty());

    store
        .delete_result_store(&image_id)
        .await
        .expect("should delete result store");
}

#[tokio::test]
#[ignore = "requires AWS credentials"]
async fn expected_count_missing_store_is_not_found() {
    use testfleet_coordinator::aws::classify_anyhow_error;

    let ctx = AwsContext::new(&test_region()).await;
    let store = StoreClient::from_context(&ctx);

    let err = store
        .expected_result_count(&test_image_id())
        .await
        .expect_err("missing store should error");
    assert!(classify_anyhow_error(&err).is_not_found());
}
