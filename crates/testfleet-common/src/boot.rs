//! Worker boot payload
//!
//! The coordinator hands each worker its run configuration through instance
//! user data: a JSON object, base64-encoded into the opaque user-data field.
//! The worker program decodes it at boot to learn where to pull tasks from
//! and where to push results.

use base64::Engine;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors decoding a boot payload from user data
#[derive(Debug, Error)]
pub enum BootDataError {
    #[error("user data is not valid base64")]
    Decode(#[from] base64::DecodeError),

    #[error("user data is not valid UTF-8")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("user data is not a valid boot payload")]
    Parse(#[from] serde_json::Error),
}

/// Run configuration injected into each worker at launch.
///
/// `auto_shutdown` tells a worker to terminate itself once its assigned tests
/// complete; the coordinator clears it when a run is started in debug mode so
/// workers stay up for inspection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerBootData {
    /// URL of the task queue to pull test-case names from
    pub queue_url: String,
    /// Name of the result store to push artifacts to
    pub result_store_name: String,
    /// Instance id of the coordinating template instance
    pub coordinator_instance_id: String,
    /// Path of the test project on the worker image
    pub project_folder: String,
    /// Terminate the worker once its work is done
    pub auto_shutdown: bool,
    /// Per-task timeout; mirrors the queue's visibility timeout
    pub timeout_secs: u32,
}

impl WorkerBootData {
    /// Encode the payload for the user-data field of a launch request.
    pub fn to_user_data(&self) -> Result<String, serde_json::Error> {
        let json = serde_json::to_vec(self)?;
        Ok(base64::engine::general_purpose::STANDARD.encode(json))
    }

    /// Decode a payload from the raw user-data string.
    pub fn from_user_data(user_data: &str) -> Result<Self, BootDataError> {
        let bytes = base64::engine::general_purpose::STANDARD.decode(user_data)?;
        let json = String::from_utf8(bytes)?;
        Ok(serde_json::from_str(&json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> WorkerBootData {
        WorkerBootData {
            queue_url: "https://sqs.us-east-1.amazonaws.com/123456789012/task_ami-abc".to_string(),
            result_store_name: "results-ami-abc".to_string(),
            coordinator_instance_id: "i-0123456789abcdef0".to_string(),
            project_folder: "/var/www/tests".to_string(),
            auto_shutdown: true,
            timeout_secs: 3600,
        }
    }

    #[test]
    fn round_trips_through_user_data() {
        let boot = sample();
        let encoded = boot.to_user_data().unwrap();
        let decoded = WorkerBootData::from_user_data(&encoded).unwrap();
        assert_eq!(boot, decoded);
    }

    #[test]
    fn user_data_is_opaque_base64() {
        let encoded = sample().to_user_data().unwrap();
        // No raw JSON punctuation leaks into the user-data field
        assert!(!encoded.contains('{'));
        assert!(base64::engine::general_purpose::STANDARD
            .decode(&encoded)
            .is_ok());
    }

    #[test]
    fn rejects_garbage_user_data() {
        assert!(matches!(
            WorkerBootData::from_user_data("!!not-base64!!"),
            Err(BootDataError::Decode(_))
        ));

        let not_json = base64::engine::general_purpose::STANDARD.encode("hello");
        assert!(matches!(
            WorkerBootData::from_user_data(&not_json),
            Err(BootDataError::Parse(_))
        ));
    }

    #[test]
    fn payload_field_names_are_stable() {
        // Workers parse these exact keys; renames break deployed images.
        let json = serde_json::to_value(sample()).unwrap();
        for key in [
            "queue_url",
            "result_store_name",
            "coordinator_instance_id",
            "project_folder",
            "auto_shutdown",
            "timeout_secs",
        ] {
            assert!(json.get(key).is_some(), "missing key {key}");
        }
    }
}
