//! AWS error classification
//!
//! Provider errors are converted into a small set of domain outcomes at the
//! client boundary. Callers match on [`AwsError`] instead of inspecting SDK
//! exception shapes: "not found" becomes a clear nothing-to-do message,
//! throttling becomes a retry, and everything else carries its code along for
//! diagnosis.

use thiserror::Error;

/// Domain-level categories for provider failures
#[derive(Debug, Error)]
pub enum AwsError {
    /// Resource was not found (safe to skip in cleanup, fatal in lookups)
    #[error("{resource_type} '{resource_id}' not found")]
    NotFound {
        resource_type: &'static str,
        resource_id: String,
    },

    /// Resource already exists (creation collided with an earlier run)
    #[error("resource already exists")]
    AlreadyExists,

    /// Rate limit exceeded (retryable with backoff)
    #[error("rate limit exceeded")]
    Throttled,

    /// Requested worker capacity did not reach running state in time
    #[error("fleet of {requested} workers did not reach running state within {timeout_secs}s")]
    ProvisionTimeout { requested: u32, timeout_secs: u64 },

    /// Any other provider error, with its code when one was reported
    #[error("provider error: {message}")]
    Sdk {
        code: Option<String>,
        message: String,
    },
}

impl AwsError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, AwsError::NotFound { .. })
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, AwsError::AlreadyExists)
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, AwsError::Throttled)
    }
}

/// Error codes meaning the resource is gone or never existed
const NOT_FOUND_CODES: &[&str] = &[
    "InvalidAMIID.NotFound",
    "InvalidAMIID.Unavailable",
    "InvalidSnapshot.NotFound",
    "InvalidInstanceID.NotFound",
    "AWS.SimpleQueueService.NonExistentQueue",
    "QueueDoesNotExist",
    "NoSuchBucket",
    "NoSuchKey",
    "NoSuchTagSet",
];

/// Error codes meaning a same-named resource already exists
const ALREADY_EXISTS_CODES: &[&str] = &[
    "QueueAlreadyExists",
    "QueueNameExists",
    "BucketAlreadyExists",
    "BucketAlreadyOwnedByYou",
    "InvalidAMIName.Duplicate",
];

/// Error codes for API rate limiting
const THROTTLING_CODES: &[&str] = &[
    "Throttling",
    "ThrottlingException",
    "RequestLimitExceeded",
    "RequestThrottled",
];

/// Classify a provider error by its reported code.
pub fn classify_aws_error(code: Option<&str>, message: Option<&str>) -> AwsError {
    let message = message.unwrap_or("unknown error").to_string();

    match code {
        Some(c) if NOT_FOUND_CODES.contains(&c) => AwsError::NotFound {
            resource_type: "resource",
            resource_id: message,
        },
        Some(c) if ALREADY_EXISTS_CODES.contains(&c) => AwsError::AlreadyExists,
        Some(c) if THROTTLING_CODES.contains(&c) => AwsError::Throttled,
        _ => AwsError::Sdk {
            code: code.map(|s| s.to_string()),
            message,
        },
    }
}

/// Classify an `anyhow::Error` wrapping an SDK failure.
///
/// SDK operation errors render their code into the debug representation;
/// extracting it there avoids downcasting through every operation's concrete
/// error type.
pub fn classify_anyhow_error(error: &anyhow::Error) -> AwsError {
    let debug_str = format!("{error:?}");
    if let Some(code) = extract_error_code(&debug_str) {
        return classify_aws_error(Some(&code), Some(&error.to_string()));
    }

    AwsError::Sdk {
        code: None,
        message: error.to_string(),
    }
}

/// All codes recognized in a debug string, in classification order
const ALL_KNOWN_CODES: &[&str] = &[
    "InvalidAMIID.NotFound",
    "InvalidAMIID.Unavailable",
    "InvalidSnapshot.NotFound",
    "InvalidInstanceID.NotFound",
    "AWS.SimpleQueueService.NonExistentQueue",
    "QueueDoesNotExist",
    "NoSuchBucket",
    "NoSuchKey",
    "NoSuchTagSet",
    "QueueAlreadyExists",
    "QueueNameExists",
    "BucketAlreadyExists",
    "BucketAlreadyOwnedByYou",
    "InvalidAMIName.Duplicate",
    "Throttling",
    "ThrottlingException",
    "RequestLimitExceeded",
    "RequestThrottled",
    "InsufficientInstanceCapacity",
    "MaxSpotInstanceCountExceeded",
    "SpotMaxPriceTooLow",
];

/// Pull a known error code out of a debug string representation.
fn extract_error_code(debug_str: &str) -> Option<String> {
    for code in ALL_KNOWN_CODES {
        if debug_str.contains(code) {
            return Some((*code).to_string());
        }
    }

    // Generic `code: Some("...")` pattern from SDK error metadata
    if let Some(start) = debug_str.find("code: Some(\"") {
        let rest = &debug_str[start + 12..];
        if let Some(end) = rest.find('"') {
            return Some(rest[..end].to_string());
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_codes_classify() {
        for code in NOT_FOUND_CODES {
            let err = classify_aws_error(Some(code), Some("gone"));
            assert!(err.is_not_found(), "expected NotFound for {code}");
        }
    }

    #[test]
    fn already_exists_codes_classify() {
        for code in ALREADY_EXISTS_CODES {
            let err = classify_aws_error(Some(code), Some("dup"));
            assert!(err.is_already_exists(), "expected AlreadyExists for {code}");
        }
    }

    #[test]
    fn throttling_codes_classify() {
        for code in THROTTLING_CODES {
            let err = classify_aws_error(Some(code), Some("slow down"));
            assert!(err.is_retryable(), "expected retryable for {code}");
        }
    }

    #[test]
    fn unknown_codes_fall_through_to_sdk() {
        let err = classify_aws_error(Some("SomethingNew"), Some("details"));
        assert!(matches!(err, AwsError::Sdk { code: Some(_), .. }));

        let err = classify_aws_error(None, Some("no code at all"));
        assert!(matches!(err, AwsError::Sdk { code: None, .. }));
    }

    #[test]
    fn codes_extracted_from_debug_strings() {
        for code in ALL_KNOWN_CODES {
            let debug_str = format!("SdkError {{ code: Some(\"{code}\"), message: \"x\" }}");
            assert!(extract_error_code(&debug_str).is_some(), "missed {code}");
        }
        assert_eq!(
            extract_error_code(r#"code: Some("BrandNewCode"), other"#).as_deref(),
            Some("BrandNewCode")
        );
        assert!(extract_error_code("connection refused").is_none());
    }

    #[test]
    fn anyhow_classification_uses_embedded_code() {
        let err = anyhow::anyhow!(
            "service error: ErrorMetadata {{ code: Some(\"NoSuchBucket\"), .. }}"
        );
        assert!(classify_anyhow_error(&err).is_not_found());

        let plain = anyhow::anyhow!("dns lookup failed");
        assert!(matches!(
            classify_anyhow_error(&plain),
            AwsError::Sdk { code: None, .. }
        ));
    }

    #[test]
    fn provision_timeout_is_distinct() {
        let err = AwsError::ProvisionTimeout {
            requested: 8,
            timeout_secs: 600,
        };
        assert!(!err.is_not_found());
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("8 workers"));
    }
}
