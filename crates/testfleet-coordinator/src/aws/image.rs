//! Worker image lifecycle
//!
//! A run starts by capturing the template instance's disk into an immutable
//! AMI. The image id then keys every other resource the run creates, and the
//! image (plus its backing snapshot) is the last thing cleanup removes.

use anyhow::{Context, Result};
use aws_sdk_ec2::types::{Filter, Image, ImageState, Tag};
use chrono::Utc;
use tracing::{debug, info};

use super::ec2::Ec2Client;
use super::error::AwsError;
use crate::wait::{wait_until, WaitConfig};
use testfleet_common::tags::{TAG_OWNER_INSTANCE_ID, TAG_TOOL, TAG_TOOL_VALUE};

/// An immutable worker image produced for one run
#[derive(Debug, Clone)]
pub struct RunImage {
    pub image_id: String,
    pub snapshot_id: Option<String>,
    pub created_at: String,
    pub state: String,
}

fn parse_image(image: &Image) -> RunImage {
    RunImage {
        image_id: image.image_id().unwrap_or_default().to_string(),
        snapshot_id: image
            .block_device_mappings()
            .first()
            .and_then(|m| m.ebs())
            .and_then(|e| e.snapshot_id())
            .map(str::to_string),
        created_at: image.creation_date().unwrap_or_default().to_string(),
        state: image
            .state()
            .map(|s| s.as_str().to_string())
            .unwrap_or_default(),
    }
}

impl Ec2Client {
    /// Capture the template instance's current disk state into a new AMI.
    ///
    /// The instance is not rebooted. The image is tagged with the owner
    /// instance id, and this call blocks until the image is available;
    /// callers must never act on a not-yet-available image.
    pub async fn create_snapshot(&self, template_instance_id: &str) -> Result<RunImage> {
        let stamp = Utc::now();
        let response = self
            .client
            .create_image()
            .instance_id(template_instance_id)
            .name(format!("testfleet {}", stamp.format("%Y%m%d%H%M%S")))
            .description(format!(
                "Worker image created by testfleet on {}",
                stamp.format("%Y-%m-%d %H:%M:%S UTC")
            ))
            .no_reboot(true)
            .send()
            .await
            .context("Failed to create worker image")?;

        let image_id = response
            .image_id()
            .context("CreateImage returned no image id")?
            .to_string();

        self.client
            .create_tags()
            .resources(&image_id)
            .tags(Tag::builder().key(TAG_TOOL).value(TAG_TOOL_VALUE).build())
            .tags(
                Tag::builder()
                    .key(TAG_OWNER_INSTANCE_ID)
                    .value(template_instance_id)
                    .build(),
            )
            .send()
            .await
            .context("Failed to tag worker image")?;

        info!(image_id = %image_id, "Worker image created, waiting until available");

        wait_until(
            WaitConfig::default(),
            None,
            &format!("image {image_id} available"),
            || async {
                let image = self.describe_image(&image_id).await?;
                match image.state() {
                    Some(ImageState::Available) => Ok(true),
                    Some(ImageState::Pending) => Ok(false),
                    other => anyhow::bail!(
                        "Image {} entered unexpected state: {:?}",
                        image_id,
                        other
                    ),
                }
            },
        )
        .await?;

        let image = self.describe_image(&image_id).await?;
        Ok(parse_image(&image))
    }

    /// The most recently created worker image for an owner instance.
    ///
    /// Provider list order is not trusted: images are sorted by creation
    /// date before the newest is selected.
    pub async fn most_recent_snapshot(&self, owner_instance_id: &str) -> Result<RunImage> {
        let response = self
            .client
            .describe_images()
            .filters(
                Filter::builder()
                    .name(format!("tag:{TAG_OWNER_INSTANCE_ID}"))
                    .values(owner_instance_id)
                    .build(),
            )
            .send()
            .await
            .context("Failed to describe worker images")?;

        let mut images: Vec<_> = response.images().iter().collect();
        images.sort_by(|a, b| {
            b.creation_date()
                .unwrap_or_default()
                .cmp(a.creation_date().unwrap_or_default())
        });

        let newest = images.first().ok_or(AwsError::NotFound {
            resource_type: "worker image",
            resource_id: owner_instance_id.to_string(),
        })?;

        debug!(
            image_id = newest.image_id().unwrap_or_default(),
            owner = %owner_instance_id,
            "Selected most recent worker image"
        );

        Ok(parse_image(newest))
    }

    /// Describe one worker image by id.
    pub async fn run_image(&self, image_id: &str) -> Result<RunImage> {
        let image = self.describe_image(image_id).await?;
        Ok(parse_image(&image))
    }

    /// Deregister a worker image.
    pub async fn deregister_image(&self, image_id: &str) -> Result<()> {
        info!(image_id = %image_id, "Deregistering worker image");
        self.client
            .deregister_image()
            .image_id(image_id)
            .send()
            .await
            .context("Failed to deregister image")?;
        Ok(())
    }

    /// Delete the storage snapshot backing a deregistered image.
    pub async fn delete_snapshot(&self, snapshot_id: &str) -> Result<()> {
        info!(snapshot_id = %snapshot_id, "Deleting backing snapshot");
        self.client
            .delete_snapshot()
            .snapshot_id(snapshot_id)
            .send()
            .await
            .context("Failed to delete snapshot")?;
        Ok(())
    }

    async fn describe_image(&self, image_id: &str) -> Result<Image> {
        let response = self
            .client
            .describe_images()
            .image_ids(image_id)
            .send()
            .await
            .context("Failed to describe image")?;

        response
            .images()
            .first()
            .cloned()
            .ok_or_else(|| {
                AwsError::NotFound {
                    resource_type: "worker image",
                    resource_id: image_id.to_string(),
                }
                .into()
            })
    }
}
