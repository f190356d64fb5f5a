//! Default configuration values shared between the coordinator and workers
//!
//! These constants keep the coordinator and the worker program in agreement
//! about queue attributes, result layout, and cost-model inputs.

/// Seconds between result-store poll cycles during monitoring
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 10;

/// Maximum size of a task message in bytes.
///
/// Tasks are test-case names, not payloads; anything larger is a bug.
pub const MAX_TASK_MESSAGE_BYTES: u32 = 1024;

/// Long-poll wait time for workers receiving from the task queue, in seconds
pub const QUEUE_LONG_POLL_SECS: u32 = 20;

/// Suffix of a result artifact key and of locally stored result files
pub const RESULT_SUFFIX: &str = ".result";

/// File extension of a test-case file in the project folder
pub const TEST_CASE_EXTENSION: &str = "feature";

/// Spot price history is filtered to this product description
pub const SPOT_PRODUCT_DESCRIPTION: &str = "Linux/UNIX (Amazon VPC)";

/// External feed for current storage prices per region
pub const STORAGE_PRICE_FEED_URL: &str = "http://info.awsstream.com/storage.json";

/// Storage kind looked up in the price feed (general-purpose SSD volumes)
pub const STORAGE_KIND_EBS_SSD: &str = "ebsssd";

/// Conservative per GB-month storage price used when the feed is unreachable
pub const FALLBACK_STORAGE_PRICE: f64 = 0.15;

/// Billing hours in a month, for converting GB-month rates to GB-hours
pub const HOURS_PER_MONTH: f64 = 744.0;
