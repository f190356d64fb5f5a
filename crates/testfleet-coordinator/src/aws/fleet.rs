//! Worker fleet provisioning
//!
//! Workers are one-time spot instances launched from the run's worker image,
//! with network placement and security attributes copied verbatim from the
//! template instance. Run configuration travels as opaque user data; see
//! [`testfleet_common::boot::WorkerBootData`].

use std::time::Duration;

use anyhow::{Context, Result};
use aws_sdk_ec2::primitives::DateTime;
use aws_sdk_ec2::types::{
    Filter, InstanceStateName, InstanceType, RequestSpotLaunchSpecification, SpotInstanceType,
};
use tracing::{debug, info, warn};

use super::ec2::{Ec2Client, TemplateInstance};
use super::error::AwsError;
use crate::wait::{wait_until, WaitConfig, WaitError};
use testfleet_common::defaults::SPOT_PRODUCT_DESCRIPTION;
use testfleet_common::WorkerBootData;

/// Spot capacity request parameters
#[derive(Debug, Clone)]
pub struct FleetParams {
    pub worker_count: u32,
    pub max_bid_price: f64,
    /// How long to wait for the fleet to reach running state
    pub provision_timeout: Duration,
}

/// Current spot price observation for an instance type
#[derive(Debug, Clone)]
pub struct SpotPrice {
    pub instance_type: String,
    pub price: f64,
}

impl Ec2Client {
    /// Request the worker fleet and block until it is observably running.
    ///
    /// Returns the spot request ids. A fleet that does not reach running
    /// state within the provisioning timeout surfaces as
    /// [`AwsError::ProvisionTimeout`] and is not retried; the caller decides
    /// whether to abort or re-bid.
    pub async fn launch_workers(
        &self,
        image_id: &str,
        template: &TemplateInstance,
        params: &FleetParams,
        boot: &WorkerBootData,
    ) -> Result<Vec<String>> {
        let user_data = boot
            .to_user_data()
            .context("Failed to encode worker boot data")?;

        let instance_type: InstanceType = template
            .instance_type
            .parse()
            .map_err(|_| anyhow::anyhow!("Invalid instance type: {}", template.instance_type))?;

        let mut launch_spec = RequestSpotLaunchSpecification::builder()
            .image_id(image_id)
            .instance_type(instance_type)
            .user_data(&user_data);

        if let Some(key_name) = &template.key_name {
            launch_spec = launch_spec.key_name(key_name);
        }
        if let Some(subnet_id) = &template.subnet_id {
            launch_spec = launch_spec.subnet_id(subnet_id);
        }
        if let Some(group_id) = &template.security_group_id {
            launch_spec = launch_spec.security_group_ids(group_id);
        }

        info!(
            image_id = %image_id,
            workers = params.worker_count,
            max_bid = params.max_bid_price,
            "Requesting spot workers"
        );

        let response = self
            .client
            .request_spot_instances()
            .spot_price(format!("{:.4}", params.max_bid_price))
            .instance_count(params.worker_count as i32)
            .r#type(SpotInstanceType::OneTime)
            .launch_specification(launch_spec.build())
            .send()
            .await
            .context("Failed to request spot workers")?;

        let request_ids: Vec<String> = response
            .spot_instance_requests()
            .iter()
            .filter_map(|r| r.spot_instance_request_id().map(str::to_string))
            .collect();

        self.wait_for_fleet_running(image_id, params).await?;

        Ok(request_ids)
    }

    /// Block until `worker_count` instances launched from the image are running.
    async fn wait_for_fleet_running(&self, image_id: &str, params: &FleetParams) -> Result<()> {
        let result = wait_until(
            WaitConfig {
                timeout: params.provision_timeout,
                ..WaitConfig::default()
            },
            None,
            &format!("{} workers running", params.worker_count),
            || async {
                let running = self.count_running_workers(image_id).await?;
                debug!(running, wanted = params.worker_count, "Fleet capacity check");
                Ok(running >= params.worker_count)
            },
        )
        .await;

        match result {
            Ok(()) => {
                info!(workers = params.worker_count, "Worker fleet is running");
                Ok(())
            }
            Err(WaitError::Timeout { .. }) => {
                warn!(
                    workers = params.worker_count,
                    timeout_secs = params.provision_timeout.as_secs(),
                    "Fleet did not reach running state in time"
                );
                Err(AwsError::ProvisionTimeout {
                    requested: params.worker_count,
                    timeout_secs: params.provision_timeout.as_secs(),
                }
                .into())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Count running instances launched from the run's worker image.
    async fn count_running_workers(&self, image_id: &str) -> Result<u32> {
        let response = self
            .client
            .describe_instances()
            .filters(Filter::builder().name("image-id").values(image_id).build())
            .send()
            .await
            .context("Failed to describe worker instances")?;

        let running = response
            .reservations()
            .iter()
            .flat_map(|r| r.instances())
            .filter(|i| {
                i.state().and_then(|s| s.name()) == Some(&InstanceStateName::Running)
            })
            .count();

        Ok(running as u32)
    }

    /// Current spot price for an instance type.
    ///
    /// Spot price history carries concurrent entries across availability
    /// zones; the minimum is the conservative "if we're lucky" baseline, not
    /// a fulfillment guarantee.
    pub async fn current_spot_price(&self, instance_type: &str) -> Result<SpotPrice> {
        let now_secs = chrono::Utc::now().timestamp();
        let type_filter: InstanceType = instance_type
            .parse()
            .map_err(|_| anyhow::anyhow!("Invalid instance type: {instance_type}"))?;

        let response = self
            .client
            .describe_spot_price_history()
            .start_time(DateTime::from_secs(now_secs))
            .end_time(DateTime::from_secs(now_secs))
            .instance_types(type_filter)
            .filters(
                Filter::builder()
                    .name("product-description")
                    .values(SPOT_PRODUCT_DESCRIPTION)
                    .build(),
            )
            .send()
            .await
            .context("Failed to describe spot price history")?;

        let price = response
            .spot_price_history()
            .iter()
            .filter_map(|entry| entry.spot_price().and_then(|p| p.parse::<f64>().ok()))
            .fold(f64::INFINITY, f64::min);

        if !price.is_finite() {
            return Err(AwsError::NotFound {
                resource_type: "spot price",
                resource_id: instance_type.to_string(),
            }
            .into());
        }

        Ok(SpotPrice {
            instance_type: instance_type.to_string(),
            price,
        })
    }
}
