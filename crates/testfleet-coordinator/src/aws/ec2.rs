//! Template instance management
//!
//! The template instance is the long-lived machine whose disk state gets
//! snapshotted into the run's worker image. Its network placement and
//! security attributes are copied verbatim onto the worker fleet.

use anyhow::{Context, Result};
use aws_sdk_ec2::types::{Filter, Instance, Tag};
use aws_sdk_ec2::Client;
use tracing::{debug, info};

use crate::aws::context::AwsContext;

/// EC2 client for template instance and fleet operations
pub struct Ec2Client {
    pub(crate) client: Client,
}

/// A point-in-time description of the template instance.
///
/// Fetched once per command and passed by value to whatever needs it;
/// nothing re-fetches or caches this behind the caller's back.
#[derive(Debug, Clone)]
pub struct TemplateInstance {
    pub instance_id: String,
    pub name: Option<String>,
    pub instance_type: String,
    pub state: String,
    pub availability_zone: Option<String>,
    pub volume_id: Option<String>,
    pub volume_size_gib: Option<i32>,
    pub key_name: Option<String>,
    pub security_group_id: Option<String>,
    pub subnet_id: Option<String>,
}

impl TemplateInstance {
    pub fn is_running(&self) -> bool {
        self.state == "running"
    }
}

/// Look up the value of a tag by key.
pub(crate) fn tag_value<'a>(tags: &'a [Tag], key: &str) -> Option<&'a str> {
    tags.iter()
        .find(|t| t.key() == Some(key))
        .and_then(|t| t.value())
}

/// Flatten an SDK `Instance` into a `TemplateInstance`.
///
/// Terminated instances have no volume, and only instances inside a VPC have
/// a subnet id, so both stay optional.
fn parse_instance(instance: &Instance) -> TemplateInstance {
    TemplateInstance {
        instance_id: instance.instance_id().unwrap_or_default().to_string(),
        name: tag_value(instance.tags(), "Name").map(str::to_string),
        instance_type: instance
            .instance_type()
            .map(|t| t.as_str().to_string())
            .unwrap_or_default(),
        state: instance
            .state()
            .and_then(|s| s.name())
            .map(|n| n.as_str().to_string())
            .unwrap_or_default(),
        availability_zone: instance
            .placement()
            .and_then(|p| p.availability_zone())
            .map(str::to_string),
        volume_id: instance
            .block_device_mappings()
            .first()
            .and_then(|m| m.ebs())
            .and_then(|e| e.volume_id())
            .map(str::to_string),
        volume_size_gib: None,
        key_name: instance.key_name().map(str::to_string),
        security_group_id: instance
            .security_groups()
            .first()
            .and_then(|g| g.group_id())
            .map(str::to_string),
        subnet_id: instance.subnet_id().map(str::to_string),
    }
}

impl Ec2Client {
    /// Create an EC2 client from a pre-loaded AWS context.
    pub fn from_context(ctx: &AwsContext) -> Self {
        Self {
            client: ctx.ec2_client(),
        }
    }

    /// Describe the template instance, including its root volume size.
    pub async fn describe_template_instance(&self, instance_id: &str) -> Result<TemplateInstance> {
        let response = self
            .client
            .describe_instances()
            .instance_ids(instance_id)
            .send()
            .await
            .context("Failed to describe template instance")?;

        let instance = response
            .reservations()
            .first()
            .and_then(|r| r.instances().first())
            .with_context(|| format!("Instance {instance_id} not found"))?;

        let mut template = parse_instance(instance);
        template.volume_size_gib = self.attached_volume_size(instance_id).await?;

        debug!(
            instance_id = %template.instance_id,
            instance_type = %template.instance_type,
            state = %template.state,
            "Described template instance"
        );

        Ok(template)
    }

    /// Size of the volume attached to an instance, if one is attached.
    pub async fn attached_volume_size(&self, instance_id: &str) -> Result<Option<i32>> {
        let response = self
            .client
            .describe_volumes()
            .filters(
                Filter::builder()
                    .name("attachment.instance-id")
                    .values(instance_id)
                    .build(),
            )
            .send()
            .await
            .context("Failed to describe volumes")?;

        Ok(response.volumes().first().and_then(|v| v.size()))
    }

    /// List all instances visible in the region.
    pub async fn list_instances(&self) -> Result<Vec<TemplateInstance>> {
        let response = self
            .client
            .describe_instances()
            .send()
            .await
            .context("Failed to list instances")?;

        let mut results = Vec::new();
        for reservation in response.reservations() {
            for instance in reservation.instances() {
                results.push(parse_instance(instance));
            }
        }
        Ok(results)
    }

    /// Start the template instance.
    pub async fn start_instance(&self, instance_id: &str) -> Result<()> {
        info!(instance_id = %instance_id, "Starting instance");
        self.client
            .start_instances()
            .instance_ids(instance_id)
            .send()
            .await
            .context("Failed to start instance")?;
        Ok(())
    }

    /// Stop the template instance.
    pub async fn stop_instance(&self, instance_id: &str) -> Result<()> {
        info!(instance_id = %instance_id, "Stopping instance");
        self.client
            .stop_instances()
            .instance_ids(instance_id)
            .send()
            .await
            .context("Failed to stop instance")?;
        Ok(())
    }
}
