//! AWS client modules for the coordinator
//!
//! Thin wrappers around the AWS SDK clients this pipeline uses:
//! - EC2: template instance lookup, worker image lifecycle, spot fleet
//! - SQS: the per-run task queue
//! - S3: the per-run result store
//!
//! Provider errors are classified into [`AwsError`] at these boundaries so
//! callers can pattern-match on domain outcomes instead of SDK shapes.

pub mod context;
pub mod ec2;
pub mod error;
pub mod fleet;
pub mod image;
pub mod queue;
pub mod store;

pub use context::AwsContext;
pub use ec2::{Ec2Client, TemplateInstance};
pub use error::{classify_anyhow_error, classify_aws_error, AwsError};
pub use fleet::{FleetParams, SpotPrice};
pub use image::RunImage;
pub use queue::{QueueClient, QueueStats, TaskQueue};
pub use store::StoreClient;
