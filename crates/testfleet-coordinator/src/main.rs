//! testfleet-coordinator: disposable AWS test-execution fleet coordinator
//!
//! Snapshots a template instance into a worker image, distributes test cases
//! through a task queue, provisions a spot-priced worker fleet, and collects
//! per-test result artifacts until the run completes.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::info;

use testfleet_coordinator::aws::{AwsContext, Ec2Client, QueueClient, StoreClient};
use testfleet_coordinator::config::Settings;
use testfleet_coordinator::orchestrator::{
    self, cleanup_run, estimate_run_cost, fetch_storage_price, report, CompletionMonitor,
    MonitorState, RunOptions,
};
use testfleet_common::defaults::STORAGE_PRICE_FEED_URL;

#[derive(Parser, Debug)]
#[command(name = "testfleet")]
#[command(about = "Run a test suite on a disposable AWS worker fleet")]
#[command(version)]
struct Args {
    /// Path to the config file (default: platform config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show instances in the configured (or given) region
    List {
        /// Region to list; defaults to the profile's region
        region: Option<String>,

        #[arg(long, default_value = "default")]
        profile: String,
    },

    /// Show the template instance, latest worker image, and task queue
    Status {
        #[arg(default_value = "default")]
        profile: String,
    },

    /// Start the template instance
    Start {
        #[arg(default_value = "default")]
        profile: String,
    },

    /// Stop the template instance
    Stop {
        #[arg(default_value = "default")]
        profile: String,
    },

    /// Create a worker image from the template instance
    Snapshot {
        #[arg(default_value = "default")]
        profile: String,
    },

    /// Estimate the cost of a run
    Cost {
        #[arg(default_value = "default")]
        profile: String,

        /// Number of workers; defaults to the profile's worker_count
        #[arg(long)]
        workers: Option<u32>,

        /// Show the full cost breakdown
        #[arg(long)]
        detail: bool,
    },

    /// Run a full test cycle: snapshot, distribute, provision, monitor, report
    Run {
        #[arg(default_value = "default")]
        profile: String,

        /// Number of workers; defaults to the profile's worker_count
        #[arg(long)]
        workers: Option<u32>,

        /// Bid ceiling per instance-hour; defaults to the profile's max_bid_price
        #[arg(long)]
        bid_price: Option<f64>,

        /// Keep workers alive after their tests finish
        #[arg(long)]
        debug: bool,

        /// Proceed even when the spot price exceeds the bid ceiling
        #[arg(long)]
        force: bool,
    },

    /// Monitor an existing run and download results as they arrive
    Monitor {
        /// Worker image id of the run
        image_id: String,

        #[arg(long, default_value = "default")]
        profile: String,
    },

    /// Summarize downloaded results for a run
    Report {
        /// Worker image id; defaults to the only run with local results
        image_id: Option<String>,

        #[arg(long, default_value = "default")]
        profile: String,

        /// Show only test cases with failed scenarios
        #[arg(long)]
        only_failed: bool,

        /// Output format (table, json)
        #[arg(long, default_value = "table")]
        format: String,
    },

    /// Delete a run's worker image, snapshot, queue, and result store
    Cleanup {
        #[arg(default_value = "default")]
        profile: String,

        /// Worker image id; defaults to the template's most recent image
        #[arg(long)]
        image_id: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        print_error(&e);
        std::process::exit(1);
    }
}

/// Print an error and its cause chain without a stack trace.
fn print_error(e: &anyhow::Error) {
    use std::io::Write;

    let mut stderr = std::io::stderr();
    let _ = writeln!(stderr, "\n\x1b[1;31mError:\x1b[0m {e}");

    let mut source = e.source();
    while let Some(cause) = source {
        let _ = writeln!(stderr, "  \x1b[33mCaused by:\x1b[0m {cause}");
        source = cause.source();
    }
}

async fn run() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = Args::parse();
    let config_path = args.config.as_deref();

    match args.command {
        Command::List { region, profile } => {
            let settings = Settings::load(config_path, &profile)?;
            let region = region.unwrap_or(settings.region);
            handle_list(&region).await?;
        }

        Command::Status { profile } => {
            let settings = Settings::load(config_path, &profile)?;
            handle_status(&settings).await?;
        }

        Command::Start { profile } => {
            let settings = Settings::load(config_path, &profile)?;
            let ctx = AwsContext::new(&settings.region).await;
            Ec2Client::from_context(&ctx)
                .start_instance(&settings.template_instance_id)
                .await?;
            println!("Starting instance {}", settings.template_instance_id);
        }

        Command::Stop { profile } => {
            let settings = Settings::load(config_path, &profile)?;
            let ctx = AwsContext::new(&settings.region).await;
            Ec2Client::from_context(&ctx)
                .stop_instance(&settings.template_instance_id)
                .await?;
            println!("Stopping instance {}", settings.template_instance_id);
        }

        Command::Snapshot { profile } => {
            let settings = Settings::load(config_path, &profile)?;
            let ctx = AwsContext::new(&settings.region).await;
            println!("Creating worker image...");
            let image = Ec2Client::from_context(&ctx)
                .create_snapshot(&settings.template_instance_id)
                .await?;
            println!("Worker image available: {}", image.image_id);
        }

        Command::Cost {
            profile,
            workers,
            detail,
        } => {
            let settings = Settings::load(config_path, &profile)?;
            handle_cost(&settings, workers, detail).await?;
        }

        Command::Run {
            profile,
            workers,
            bid_price,
            debug,
            force,
        } => {
            let settings = Settings::load(config_path, &profile)?;
            info!(
                profile = %settings.profile,
                region = %settings.region,
                "Starting test cycle"
            );
            let opts = RunOptions {
                workers,
                max_bid_price: bid_price,
                debug,
                force,
            };
            orchestrator::run_cycle(&settings, &opts).await?;
        }

        Command::Monitor { image_id, profile } => {
            let settings = Settings::load(config_path, &profile)?;
            handle_monitor(&settings, &image_id).await?;
        }

        Command::Report {
            image_id,
            profile,
            only_failed,
            format,
        } => {
            let settings = Settings::load(config_path, &profile)?;
            handle_report(&settings, image_id, only_failed, &format)?;
        }

        Command::Cleanup { profile, image_id } => {
            let settings = Settings::load(config_path, &profile)?;
            handle_cleanup(&settings, image_id).await?;
        }
    }

    Ok(())
}

async fn handle_list(region: &str) -> Result<()> {
    use comfy_table::{presets::UTF8_FULL_CONDENSED, ContentArrangement, Table};

    let ctx = AwsContext::new(region).await;
    let instances = Ec2Client::from_context(&ctx).list_instances().await?;

    if instances.is_empty() {
        println!("No instances found in region {region}");
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["Instance Id", "Type", "State", "Name"]);

    for instance in &instances {
        table.add_row(vec![
            instance.instance_id.clone(),
            instance.instance_type.clone(),
            instance.state.clone(),
            instance.name.clone().unwrap_or_default(),
        ]);
    }
    println!("{table}");

    Ok(())
}

async fn handle_status(settings: &Settings) -> Result<()> {
    let ctx = AwsContext::new(&settings.region).await;
    let ec2 = Ec2Client::from_context(&ctx);

    let template = ec2
        .describe_template_instance(&settings.template_instance_id)
        .await?;

    let field = |key: &str, value: &str| println!("{key:<28}: {value}");

    println!();
    field("Profile", &settings.profile);
    field("Template Instance", &template.instance_id);
    field("Name", template.name.as_deref().unwrap_or("-"));
    field("Type", &template.instance_type);
    field("State", &template.state);
    field(
        "Availability Zone",
        template.availability_zone.as_deref().unwrap_or("-"),
    );
    field("Volume", template.volume_id.as_deref().unwrap_or("-"));
    if let Some(size) = template.volume_size_gib {
        field("Volume Size", &format!("{size} GiB"));
    }
    field("Key Name", template.key_name.as_deref().unwrap_or("-"));
    field(
        "Security Group",
        template.security_group_id.as_deref().unwrap_or("-"),
    );
    println!();

    let image = match ec2.most_recent_snapshot(&template.instance_id).await {
        Ok(image) => image,
        Err(_) => {
            field("Worker Image", "none created yet");
            println!();
            return Ok(());
        }
    };
    field("Worker Image", &image.image_id);
    field("Image Created", &image.created_at);
    field("Image State", &image.state);

    match QueueClient::from_context(&ctx)
        .queue_stats(&image.image_id)
        .await
    {
        Ok(stats) => {
            field("Tasks Queued", &stats.visible_messages.to_string());
            field("Tasks In Flight", &stats.in_flight_messages.to_string());
        }
        Err(_) => field("Task Queue", "not available"),
    }
    println!();

    Ok(())
}

async fn handle_cost(settings: &Settings, workers: Option<u32>, detail: bool) -> Result<()> {
    let worker_count = workers.unwrap_or(settings.worker_count);
    let ctx = AwsContext::new(&settings.region).await;
    let ec2 = Ec2Client::from_context(&ctx);

    let template = ec2
        .describe_template_instance(&settings.template_instance_id)
        .await?;
    let spot = ec2.current_spot_price(&template.instance_type).await?;
    let storage_price = fetch_storage_price(STORAGE_PRICE_FEED_URL, &settings.region).await;

    let estimate = estimate_run_cost(
        &template.instance_type,
        worker_count,
        f64::from(template.volume_size_gib.unwrap_or(0)),
        spot.price,
        storage_price,
    );

    if detail {
        let field = |key: &str, value: String| println!("{key:<28}: {value}");
        println!("\nEstimated Cost");
        println!("--------------");
        field("Profile", settings.profile.clone());
        field("Region", settings.region.clone());
        field("Workers", worker_count.to_string());
        println!();
        field("Instance Type", estimate.instance_type.clone());
        field(
            "Current Spot Price",
            format!("${:.4} per hour", estimate.spot_price),
        );
        field("Compute Cost", format!("${:.4}", estimate.compute_cost));
        println!();
        field(
            "Volume Size",
            format!("{} GiB per worker", estimate.volume_gib),
        );
        field("Total Volume", format!("{} GiB", estimate.total_volume_gib));
        field(
            "Storage Price",
            format!("${:.4} per GB-month", estimate.storage_price_gib_month),
        );
        field("Storage Cost", format!("${:.4}", estimate.storage_cost));
        println!();
        field("TOTAL ESTIMATED COST", format!("${:.4}", estimate.total));
        println!();
    } else {
        println!(
            "Current spot price for {} is ${:.4} per hour",
            estimate.instance_type, estimate.spot_price
        );
        println!(
            "Estimated cost for {} workers plus storage is ${:.4}",
            worker_count, estimate.total
        );
    }

    Ok(())
}

async fn handle_monitor(settings: &Settings, image_id: &str) -> Result<()> {
    let ctx = AwsContext::new(&settings.region).await;
    let store = StoreClient::from_context(&ctx);

    let cancel = CancellationToken::new();
    let ctrl_c_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c_token.cancel();
        }
    });

    let monitor = CompletionMonitor::new(store, image_id, &settings.result_root);
    let outcome = monitor.run(&cancel).await?;

    match outcome.state {
        MonitorState::Done => {
            println!("All {} results collected", outcome.completed);
            Ok(())
        }
        MonitorState::Cancelled => {
            println!(
                "Monitor interrupted with {} of {} results collected",
                outcome.completed, outcome.expected
            );
            Ok(())
        }
        _ => anyhow::bail!(
            "Cannot monitor image {image_id}: result store missing or not ready"
        ),
    }
}

fn handle_report(
    settings: &Settings,
    image_id: Option<String>,
    only_failed: bool,
    format: &str,
) -> Result<()> {
    let image_id = match image_id {
        Some(id) => id,
        None => {
            let available = report::available_reports(&settings.result_root)?;
            match available.len() {
                0 => anyhow::bail!(
                    "No results found under {}",
                    settings.result_root.display()
                ),
                1 => available[0].image_id.clone(),
                _ => {
                    println!("\nAvailable results:");
                    for entry in &available {
                        println!("  {}", entry.image_id);
                    }
                    anyhow::bail!("Multiple result sets found; pass an image id");
                }
            }
        }
    };

    let Some(run_report) = report::summarize(&settings.result_root, &image_id)? else {
        anyhow::bail!("No results found for image {image_id}");
    };

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&run_report)?);
    } else {
        println!("{}", report::render_report(&run_report, only_failed));
        println!("\nTest cases: {}", run_report.details.len());
    }

    Ok(())
}

async fn handle_cleanup(settings: &Settings, image_id: Option<String>) -> Result<()> {
    let ctx = AwsContext::new(&settings.region).await;
    let ec2 = Ec2Client::from_context(&ctx);

    // Resolve the image: explicit id, or the template's most recent snapshot.
    let image = match image_id {
        Some(id) => {
            // Describe it so cleanup knows the backing snapshot id too; an
            // already-deregistered image still gets its queue/store removed.
            match ec2.run_image(&id).await {
                Ok(image) => image,
                Err(_) => testfleet_coordinator::aws::RunImage {
                    image_id: id,
                    snapshot_id: None,
                    created_at: String::new(),
                    state: String::new(),
                },
            }
        }
        None => match ec2.most_recent_snapshot(&settings.template_instance_id).await {
            Ok(image) => image,
            Err(_) => anyhow::bail!(
                "No worker image found for instance {}; nothing to clean up",
                settings.template_instance_id
            ),
        },
    };

    let outcome = cleanup_run(&ctx, &image.image_id, image.snapshot_id.as_deref()).await?;
    if !outcome.is_complete() {
        anyhow::bail!(
            "Some resources for image {} could not be deleted; re-run cleanup",
            image.image_id
        );
    }

    Ok(())
}
