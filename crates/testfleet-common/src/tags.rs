//! AWS resource tag constants for testfleet
//!
//! All testfleet-created AWS resources carry these tags so runs can be
//! discovered, resumed, and cleaned up by image id.
//!
//! ## Tag Schema
//!
//! | Tag Key | Applied to | Description |
//! |---------|------------|-------------|
//! | `testfleet:tool` | AMI | Static identifier ("testfleet") |
//! | `testfleet:owner-instance-id` | AMI | Template instance the image was captured from |
//! | `testfleet:expected-results` | Result store | Number of result artifacts the run will produce |

/// Tag key for tool identification
pub const TAG_TOOL: &str = "testfleet:tool";

/// Tag value for tool identification
pub const TAG_TOOL_VALUE: &str = "testfleet";

/// Tag key linking a worker image to the template instance it was captured from
pub const TAG_OWNER_INSTANCE_ID: &str = "testfleet:owner-instance-id";

/// Tag key on the result store recording how many artifacts are expected.
///
/// Written exactly once, at store creation; the completion monitor treats it
/// as the sole source of truth for the run's expected total.
pub const TAG_EXPECTED_RESULTS: &str = "testfleet:expected-results";
