//! Run orchestration pipeline
//!
//! The pipeline is strictly sequential on the coordinator side: snapshot the
//! template instance, create and fill the task queue, create the result
//! store, provision the worker fleet, then hand off to the completion
//! monitor. The actual parallelism happens on the provisioned workers, which
//! are opaque to this process.

pub mod cleanup;
pub mod cost;
pub mod discover;
pub mod monitor;
pub mod report;
pub mod run;

pub use cleanup::cleanup_run;
pub use cost::{estimate_run_cost, fetch_storage_price, CostEstimate};
pub use discover::discover_test_cases;
pub use monitor::{CompletionMonitor, MonitorOutcome, MonitorState, ResultSource};
pub use report::{summarize, RunReport};
pub use run::{run_cycle, RunOptions};
