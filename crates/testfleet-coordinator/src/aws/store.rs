//! Result store management
//!
//! Each run gets its own S3 bucket, named from the worker image id and tagged
//! at creation with the number of result artifacts the run is expected to
//! produce. Workers append one artifact per completed test case; the monitor
//! drains them down to the local result directory.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use aws_sdk_s3::types::{
    BucketLocationConstraint, CreateBucketConfiguration, Tag, Tagging,
};
use aws_sdk_s3::Client;
use tracing::{debug, info};

use super::context::AwsContext;
use super::error::AwsError;
use testfleet_common::names::{result_store_name, run_result_dir};
use testfleet_common::tags::TAG_EXPECTED_RESULTS;

/// S3 client for the per-run result store
pub struct StoreClient {
    client: Client,
    region: String,
}

impl StoreClient {
    /// Create an S3 client from a pre-loaded AWS context.
    pub fn from_context(ctx: &AwsContext) -> Self {
        Self {
            client: ctx.s3_client(),
            region: ctx.region().to_string(),
        }
    }

    /// Create the run's result store, tagged with the expected artifact count.
    ///
    /// The tag is written exactly once, here; the completion monitor treats
    /// it as the sole source of truth for how many results the run owes.
    pub async fn create_result_store(&self, image_id: &str, expected_count: u32) -> Result<String> {
        let name = result_store_name(image_id);
        info!(store = %name, expected = expected_count, "Creating result store");

        let location = BucketLocationConstraint::from(self.region.as_str());
        let config = CreateBucketConfiguration::builder()
            .location_constraint(location)
            .build();

        self.client
            .create_bucket()
            .bucket(&name)
            .create_bucket_configuration(config)
            .send()
            .await
            .context("Failed to create result store")?;

        let tagging = Tagging::builder()
            .tag_set(
                Tag::builder()
                    .key(TAG_EXPECTED_RESULTS)
                    .value(expected_count.to_string())
                    .build()
                    .context("Failed to build store tag")?,
            )
            .build()
            .context("Failed to build store tagging")?;

        self.client
            .put_bucket_tagging()
            .bucket(&name)
            .tagging(tagging)
            .send()
            .await
            .context("Failed to tag result store")?;

        Ok(name)
    }

    /// Read the expected artifact count from the store's tag.
    ///
    /// A missing bucket, missing tag, or non-numeric value all surface as
    /// [`AwsError::NotFound`]: the monitor has nothing trustworthy to wait on.
    pub async fn expected_result_count(&self, image_id: &str) -> Result<u32> {
        let name = result_store_name(image_id);

        let response = self
            .client
            .get_bucket_tagging()
            .bucket(&name)
            .send()
            .await
            .map_err(|e| anyhow::Error::from(e).context("Failed to read store tags"))?;

        response
            .tag_set()
            .iter()
            .find(|t| t.key() == TAG_EXPECTED_RESULTS)
            .and_then(|t| t.value().parse().ok())
            .ok_or_else(|| {
                AwsError::NotFound {
                    resource_type: "expected-results tag",
                    resource_id: name,
                }
                .into()
            })
    }

    /// Download every artifact currently in the store and remove it remotely.
    ///
    /// Artifacts land in `<result_root>/<image_id>/`. The remote object is
    /// only deleted after the local write succeeds, so a crash mid-drain
    /// loses nothing. Returns the keys handled this call; an empty list is
    /// the normal "nothing new yet" outcome.
    pub async fn drain_new(&self, image_id: &str, result_root: &Path) -> Result<Vec<String>> {
        let bucket = result_store_name(image_id);
        let dest_dir = run_result_dir(result_root, image_id);
        fs::create_dir_all(&dest_dir)
            .with_context(|| format!("Failed to create {}", dest_dir.display()))?;

        let mut downloaded = Vec::new();
        let mut continuation_token = None;

        loop {
            let mut request = self.client.list_objects_v2().bucket(&bucket);
            if let Some(token) = &continuation_token {
                request = request.continuation_token(token);
            }

            let response = request
                .send()
                .await
                .context("Failed to list result artifacts")?;

            for object in response.contents() {
                let Some(key) = object.key() else { continue };

                let body = self
                    .client
                    .get_object()
                    .bucket(&bucket)
                    .key(key)
                    .send()
                    .await
                    .with_context(|| format!("Failed to download artifact {key}"))?
                    .body
                    .collect()
                    .await
                    .with_context(|| format!("Failed to read artifact {key}"))?;

                let dest = dest_dir.join(key);
                fs::write(&dest, body.into_bytes())
                    .with_context(|| format!("Failed to write {}", dest.display()))?;

                // Local copy is durable; now the remote object can go.
                self.client
                    .delete_object()
                    .bucket(&bucket)
                    .key(key)
                    .send()
                    .await
                    .with_context(|| format!("Failed to delete artifact {key}"))?;

                debug!(key = %key, "Drained result artifact");
                downloaded.push(key.to_string());
            }

            if response.is_truncated() == Some(true) {
                continuation_token = response.next_continuation_token().map(str::to_string);
            } else {
                break;
            }
        }

        Ok(downloaded)
    }

    /// Delete the run's result store and anything left in it.
    pub async fn delete_result_store(&self, image_id: &str) -> Result<()> {
        let bucket = result_store_name(image_id);
        info!(store = %bucket, "Deleting result store");

        let mut continuation_token = None;
        loop {
            let mut request = self.client.list_objects_v2().bucket(&bucket);
            if let Some(token) = &continuation_token {
                request = request.continuation_token(token);
            }

            let response = request
                .send()
                .await
                .context("Failed to list remaining artifacts")?;

            for object in response.contents() {
                if let Some(key) = object.key() {
                    self.client
                        .delete_object()
                        .bucket(&bucket)
                        .key(key)
                        .send()
                        .await
                        .with_context(|| format!("Failed to delete artifact {key}"))?;
                }
            }

            if response.is_truncated() == Some(true) {
                continuation_token = response.next_continuation_token().map(str::to_string);
            } else {
                break;
            }
        }

        self.client
            .delete_bucket()
            .bucket(&bucket)
            .send()
            .await
            .context("Failed to delete result store")?;

        Ok(())
    }
}
