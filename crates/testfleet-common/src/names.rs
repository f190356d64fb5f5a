//! Run-scoped resource naming
//!
//! Every queue and store name is derived from the run's worker image id,
//! giving each run an isolated namespace. Cleanup relies on this: a run only
//! ever deletes resources whose names end in its own image id.

use std::path::{Path, PathBuf};

use crate::defaults::RESULT_SUFFIX;

/// Name of the task queue for a run
pub fn task_queue_name(image_id: &str) -> String {
    format!("task_{image_id}")
}

/// Name of the result store for a run.
///
/// Bucket names cannot contain underscores, so the store name is
/// hyphen-joined. It still ends in the image id.
pub fn result_store_name(image_id: &str) -> String {
    format!("results-{image_id}")
}

/// Local directory holding a run's downloaded result artifacts
pub fn run_result_dir(result_root: &Path, image_id: &str) -> PathBuf {
    result_root.join(image_id)
}

/// Recover the test-case name from a result artifact key.
///
/// Returns `None` when the key does not carry the result suffix.
pub fn test_case_from_artifact_key(key: &str) -> Option<&str> {
    key.strip_suffix(RESULT_SUFFIX)
}
