//! Run resource cleanup
//!
//! Deletes everything a run created, in reverse dependency order: the worker
//! image, its backing snapshot, the task queue, and the result store. Every
//! name is derived from the image id, so cleanup can never touch another
//! run's resources.
//!
//! Each deletion is best-effort: "not found" means an earlier cleanup (or a
//! human) got there first and is logged, not raised. Anything else is
//! reported but does not stop the remaining deletions; operators must be
//! able to re-run cleanup until the run is gone.

use anyhow::Result;
use tracing::{info, warn};

use crate::aws::{classify_anyhow_error, AwsContext, Ec2Client, QueueClient, StoreClient};

/// What cleanup managed to delete
#[derive(Debug, Default, Clone)]
pub struct CleanupReport {
    pub image_deregistered: bool,
    pub snapshot_deleted: bool,
    pub queue_deleted: bool,
    pub store_deleted: bool,
}

impl CleanupReport {
    pub fn is_complete(&self) -> bool {
        self.image_deregistered && self.snapshot_deleted && self.queue_deleted && self.store_deleted
    }
}

/// Delete the image, snapshot, queue, and store belonging to `image_id`.
///
/// The image must have been resolved by the caller (either given explicitly
/// or looked up as the owner's most recent snapshot) so that this function
/// only ever derives names from a single image id.
pub async fn cleanup_run(
    ctx: &AwsContext,
    image_id: &str,
    snapshot_id: Option<&str>,
) -> Result<CleanupReport> {
    let ec2 = Ec2Client::from_context(ctx);
    let queue = QueueClient::from_context(ctx);
    let store = StoreClient::from_context(ctx);

    let mut report = CleanupReport::default();

    info!(image_id = %image_id, "Cleaning up run resources");

    match ec2.deregister_image(image_id).await {
        Ok(()) => {
            println!("Deregistered worker image: {image_id}");
            report.image_deregistered = true;
        }
        Err(e) => report.image_deregistered = log_or_skip(&e, "worker image", image_id),
    }

    match snapshot_id {
        Some(snapshot_id) => match ec2.delete_snapshot(snapshot_id).await {
            Ok(()) => {
                println!("Deleted backing snapshot: {snapshot_id}");
                report.snapshot_deleted = true;
            }
            Err(e) => report.snapshot_deleted = log_or_skip(&e, "snapshot", snapshot_id),
        },
        None => {
            // Image had no recorded backing snapshot; nothing to delete.
            report.snapshot_deleted = true;
        }
    }

    match queue.delete_task_queue(image_id).await {
        Ok(()) => {
            println!("Deleted task queue for {image_id}");
            report.queue_deleted = true;
        }
        Err(e) => report.queue_deleted = log_or_skip(&e, "task queue", image_id),
    }

    match store.delete_result_store(image_id).await {
        Ok(()) => {
            println!("Deleted result store for {image_id}");
            report.store_deleted = true;
        }
        Err(e) => report.store_deleted = log_or_skip(&e, "result store", image_id),
    }

    Ok(report)
}

/// Returns true when the resource is already gone, false on a real failure.
fn log_or_skip(error: &anyhow::Error, resource_type: &str, resource_id: &str) -> bool {
    if classify_anyhow_error(error).is_not_found() {
        info!(resource = %resource_id, "{resource_type} already gone");
        true
    } else {
        warn!(resource = %resource_id, error = ?error, "Failed to delete {resource_type}");
        false
    }
}
