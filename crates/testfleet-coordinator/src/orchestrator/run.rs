//! The full test-cycle pipeline
//!
//! Drives one run end to end: discover test cases, advise on cost, snapshot
//! the template instance, create the task queue and result store, provision
//! the worker fleet, monitor until every result has arrived, then clean up
//! and print the report.

use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::monitor::{CompletionMonitor, MonitorState};
use super::{cleanup_run, discover_test_cases, estimate_run_cost, fetch_storage_price, report};
use crate::aws::{AwsContext, Ec2Client, FleetParams, QueueClient, StoreClient};
use crate::config::Settings;
use testfleet_common::defaults::STORAGE_PRICE_FEED_URL;
use testfleet_common::WorkerBootData;

/// Per-invocation overrides for the run command
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Worker count; defaults to the profile's `worker_count`
    pub workers: Option<u32>,
    /// Bid ceiling; defaults to the profile's `max_bid_price`
    pub max_bid_price: Option<f64>,
    /// Keep workers alive after their tests finish
    pub debug: bool,
    /// Proceed even when the current spot price exceeds the bid ceiling
    pub force: bool,
}

/// Format a duration the way humans read elapsed run time.
fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!("{}m {}s", secs / 60, secs % 60)
}

/// Run one full test cycle.
pub async fn run_cycle(settings: &Settings, opts: &RunOptions) -> Result<()> {
    let started = Instant::now();
    let worker_count = opts.workers.unwrap_or(settings.worker_count);
    let max_bid_price = opts.max_bid_price.unwrap_or(settings.max_bid_price);

    let ctx = AwsContext::new(&settings.region).await;
    let ec2 = Ec2Client::from_context(&ctx);

    println!("--- CHECK ---");

    // The template instance must be up: its disk is what gets snapshotted.
    let template = ec2
        .describe_template_instance(&settings.template_instance_id)
        .await?;
    if !template.is_running() {
        anyhow::bail!(
            "Template instance {} is not running (state: {}); start it first",
            template.instance_id,
            template.state
        );
    }
    println!("Template instance {} is running", template.instance_id);

    let test_cases = discover_test_cases(Path::new(&settings.project_folder))?;
    if test_cases.is_empty() {
        anyhow::bail!(
            "No test-case files found under {}; nothing to run",
            settings.project_folder
        );
    }
    println!("{} test-case files found", test_cases.len());

    // Cost advisory: never blocks the run on feed availability, but a spot
    // price above the bid ceiling needs an explicit override.
    let spot = ec2.current_spot_price(&template.instance_type).await?;
    let storage_price = fetch_storage_price(STORAGE_PRICE_FEED_URL, &settings.region).await;
    let volume_gib = f64::from(template.volume_size_gib.unwrap_or(0));
    let estimate = estimate_run_cost(
        &template.instance_type,
        worker_count,
        volume_gib,
        spot.price,
        storage_price,
    );
    println!(
        "Current spot price for {} is ${:.4} per hour; estimated run cost ${:.4}",
        estimate.instance_type, estimate.spot_price, estimate.total
    );

    if spot.price > max_bid_price {
        if opts.force {
            warn!(
                spot_price = spot.price,
                max_bid_price, "Spot price exceeds bid ceiling, continuing anyway"
            );
        } else {
            anyhow::bail!(
                "Current spot price ${:.4} exceeds your bid ceiling ${:.4}; \
                 raise max_bid_price or pass --force",
                spot.price,
                max_bid_price
            );
        }
    }

    println!("\n--- SETUP ---");

    let image = ec2.create_snapshot(&template.instance_id).await?;
    println!(
        "Worker image {} available (elapsed {})",
        image.image_id,
        format_elapsed(started.elapsed())
    );

    let queue = QueueClient::from_context(&ctx);
    let task_queue = queue
        .create_task_queue(&image.image_id, &test_cases, settings.timeout_secs)
        .await?;
    println!("Task queue created with {} tasks", test_cases.len());

    let store = StoreClient::from_context(&ctx);
    let store_name = store
        .create_result_store(&image.image_id, test_cases.len() as u32)
        .await?;
    println!("Result store created");

    let boot = WorkerBootData {
        queue_url: task_queue.url.clone(),
        result_store_name: store_name,
        coordinator_instance_id: template.instance_id.clone(),
        project_folder: settings.project_folder.clone(),
        auto_shutdown: !opts.debug,
        timeout_secs: settings.timeout_secs,
    };

    let params = FleetParams {
        worker_count,
        max_bid_price,
        provision_timeout: Duration::from_secs(600),
    };
    ec2.launch_workers(&image.image_id, &template, &params, &boot)
        .await?;
    println!(
        "{} workers running (elapsed {})",
        worker_count,
        format_elapsed(started.elapsed())
    );

    println!("\n--- WORK ---");

    let cancel = CancellationToken::new();
    let ctrl_c_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c_token.cancel();
        }
    });

    let monitor = CompletionMonitor::new(store, &image.image_id, &settings.result_root);
    let outcome = monitor.run(&cancel).await?;

    match outcome.state {
        MonitorState::Done => {
            println!(
                "All {} results collected (elapsed {})",
                outcome.completed,
                format_elapsed(started.elapsed())
            );
        }
        MonitorState::Cancelled => {
            println!(
                "Interrupted with {} of {} results collected; resources kept for `monitor {}`",
                outcome.completed, outcome.expected, image.image_id
            );
            return Ok(());
        }
        _ => {
            anyhow::bail!(
                "Monitoring failed for image {}; run `cleanup` to remove its resources",
                image.image_id
            );
        }
    }

    println!("\n--- CLEANUP ---");
    let cleanup = cleanup_run(&ctx, &image.image_id, image.snapshot_id.as_deref()).await?;
    if !cleanup.is_complete() {
        warn!(image_id = %image.image_id, "Some resources could not be deleted; re-run cleanup");
    }

    println!("\n--- REPORT ---");
    match report::summarize(&settings.result_root, &image.image_id)? {
        Some(run_report) => {
            println!("{}", report::render_report(&run_report, false));
            println!("Test cases: {}", run_report.details.len());
        }
        None => println!("No results found for image {}", image.image_id),
    }

    info!(
        image_id = %image.image_id,
        elapsed = %format_elapsed(started.elapsed()),
        "Run complete"
    );

    Ok(())
}
