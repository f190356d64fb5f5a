//! Task queue management
//!
//! Each run gets its own SQS queue, named from the worker image id and
//! populated once with one message per test-case name. Workers claim tasks
//! in any order; the queue's visibility timeout is the system's only retry
//! mechanism. A worker that dies mid-test releases its message back to the
//! queue after the configured task timeout.

use anyhow::{Context, Result};
use aws_sdk_sqs::types::QueueAttributeName;
use aws_sdk_sqs::Client;
use tracing::{debug, info};

use super::context::AwsContext;
use super::error::AwsError;
use testfleet_common::defaults::{MAX_TASK_MESSAGE_BYTES, QUEUE_LONG_POLL_SECS};
use testfleet_common::names::task_queue_name;

/// SQS client for the per-run task queue
pub struct QueueClient {
    client: Client,
}

/// Handle to a created task queue
#[derive(Debug, Clone)]
pub struct TaskQueue {
    pub name: String,
    pub url: String,
}

/// Point-in-time queue counters for status display
#[derive(Debug, Clone)]
pub struct QueueStats {
    pub name: String,
    pub url: String,
    /// Messages waiting to be claimed
    pub visible_messages: u64,
    /// Messages claimed by a worker but not yet deleted
    pub in_flight_messages: u64,
}

impl QueueClient {
    /// Create an SQS client from a pre-loaded AWS context.
    pub fn from_context(ctx: &AwsContext) -> Self {
        Self {
            client: ctx.sqs_client(),
        }
    }

    /// Create the run's task queue and enqueue one message per test case.
    ///
    /// Fails with [`AwsError::AlreadyExists`] when a queue for this image id
    /// already exists; two runs must never share a queue.
    pub async fn create_task_queue(
        &self,
        image_id: &str,
        test_cases: &[String],
        visibility_timeout_secs: u32,
    ) -> Result<TaskQueue> {
        let name = task_queue_name(image_id);

        if self.queue_url(&name).await?.is_some() {
            return Err(AwsError::AlreadyExists.into());
        }

        let response = self
            .client
            .create_queue()
            .queue_name(&name)
            .attributes(
                QueueAttributeName::MaximumMessageSize,
                MAX_TASK_MESSAGE_BYTES.to_string(),
            )
            .attributes(
                QueueAttributeName::ReceiveMessageWaitTimeSeconds,
                QUEUE_LONG_POLL_SECS.to_string(),
            )
            .attributes(
                QueueAttributeName::VisibilityTimeout,
                visibility_timeout_secs.to_string(),
            )
            .send()
            .await
            .context("Failed to create task queue")?;

        let url = response
            .queue_url()
            .context("CreateQueue returned no queue URL")?
            .to_string();

        info!(queue = %name, tasks = test_cases.len(), "Created task queue");

        for test_case in test_cases {
            self.client
                .send_message()
                .queue_url(&url)
                .message_body(test_case)
                .send()
                .await
                .with_context(|| format!("Failed to enqueue task {test_case}"))?;
        }

        Ok(TaskQueue { name, url })
    }

    /// Current counters for the run's task queue.
    pub async fn queue_stats(&self, image_id: &str) -> Result<QueueStats> {
        let name = task_queue_name(image_id);
        let url = self.queue_url(&name).await?.ok_or(AwsError::NotFound {
            resource_type: "task queue",
            resource_id: name.clone(),
        })?;

        let response = self
            .client
            .get_queue_attributes()
            .queue_url(&url)
            .attribute_names(QueueAttributeName::ApproximateNumberOfMessages)
            .attribute_names(QueueAttributeName::ApproximateNumberOfMessagesNotVisible)
            .send()
            .await
            .context("Failed to get queue attributes")?;

        let get = |key: &QueueAttributeName| -> u64 {
            response
                .attributes()
                .and_then(|attrs| attrs.get(key))
                .and_then(|v| v.parse().ok())
                .unwrap_or(0)
        };

        Ok(QueueStats {
            visible_messages: get(&QueueAttributeName::ApproximateNumberOfMessages),
            in_flight_messages: get(&QueueAttributeName::ApproximateNumberOfMessagesNotVisible),
            name,
            url,
        })
    }

    /// Delete the run's task queue.
    pub async fn delete_task_queue(&self, image_id: &str) -> Result<()> {
        let name = task_queue_name(image_id);
        let url = self.queue_url(&name).await?.ok_or(AwsError::NotFound {
            resource_type: "task queue",
            resource_id: name.clone(),
        })?;

        info!(queue = %name, "Deleting task queue");
        self.client
            .delete_queue()
            .queue_url(&url)
            .send()
            .await
            .context("Failed to delete task queue")?;

        Ok(())
    }

    /// Resolve a queue name to its URL; `None` when the queue does not exist.
    async fn queue_url(&self, name: &str) -> Result<Option<String>> {
        match self.client.get_queue_url().queue_name(name).send().await {
            Ok(response) => Ok(response.queue_url().map(str::to_string)),
            Err(e) => {
                let err = anyhow::Error::from(e).context("Failed to resolve queue URL");
                if super::classify_anyhow_error(&err).is_not_found() {
                    debug!(queue = %name, "Queue does not exist");
                    Ok(None)
                } else {
                    Err(err)
                }
            }
        }
    }
}
