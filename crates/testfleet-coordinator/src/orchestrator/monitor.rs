//! Completion monitor
//!
//! The run's control loop: seed the expected total from the result store's
//! tag, reconcile against artifacts already on disk (so a restarted monitor
//! picks up where it left off), then drain new artifacts until the remaining
//! count reaches zero.
//!
//! The loop is single-threaded and cooperative; cancellation is observed
//! between poll cycles, not only at process start.

use std::fs;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::aws::{classify_anyhow_error, StoreClient};
use testfleet_common::defaults::{DEFAULT_POLL_INTERVAL_SECS, RESULT_SUFFIX};
use testfleet_common::names::run_result_dir;

/// Where a result artifact drain pulls from.
///
/// The completion monitor is written against this seam so the loop can be
/// exercised in tests without a live object store.
pub trait ResultSource: Send + Sync {
    /// The run's expected artifact total, from the store's tag.
    fn expected_count(&self, image_id: &str) -> impl Future<Output = Result<u32>> + Send;

    /// Download-and-acknowledge everything currently in the store, returning
    /// the keys handled this call. Empty means "nothing new yet".
    fn drain_new(
        &self,
        image_id: &str,
        result_root: &Path,
    ) -> impl Future<Output = Result<Vec<String>>> + Send;
}

impl ResultSource for StoreClient {
    async fn expected_count(&self, image_id: &str) -> Result<u32> {
        self.expected_result_count(image_id).await
    }

    async fn drain_new(&self, image_id: &str, result_root: &Path) -> Result<Vec<String>> {
        StoreClient::drain_new(self, image_id, result_root).await
    }
}

/// States of the monitoring loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Initializing,
    Waiting,
    Draining,
    /// All expected artifacts have arrived
    Done,
    /// Interrupted between poll cycles; local artifacts are kept
    Cancelled,
    /// The store (or its expected-count tag) was not usable
    Failed,
}

impl MonitorState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Cancelled | Self::Failed)
    }
}

/// Where the monitor ended up, and the counts it got there with
#[derive(Debug, Clone)]
pub struct MonitorOutcome {
    pub state: MonitorState,
    pub expected: u32,
    pub completed: u32,
}

impl MonitorOutcome {
    pub fn remaining(&self) -> u32 {
        self.expected.saturating_sub(self.completed)
    }
}

/// The run's completion-tracking loop
pub struct CompletionMonitor<S> {
    source: S,
    image_id: String,
    result_root: PathBuf,
    poll_interval: Duration,
}

impl<S: ResultSource> CompletionMonitor<S> {
    pub fn new(source: S, image_id: &str, result_root: &Path) -> Self {
        Self {
            source,
            image_id: image_id.to_string(),
            result_root: result_root.to_path_buf(),
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
        }
    }

    /// Override the poll interval (tests use milliseconds).
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Drive the monitor to a terminal state.
    ///
    /// Returns `Ok` with a terminal outcome; only local filesystem failures
    /// surface as `Err`. Provider errors during a drain are logged and the
    /// loop keeps polling; a transient store hiccup must not end the run.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<MonitorOutcome> {
        // Initializing: the expected total comes from the store's tag. If it
        // cannot be read there is nothing trustworthy to wait for.
        let expected = match self.source.expected_count(&self.image_id).await {
            Ok(count) => count,
            Err(e) => {
                let kind = classify_anyhow_error(&e);
                error!(
                    image_id = %self.image_id,
                    error = %kind,
                    "Cannot read expected result count; store missing or not ready"
                );
                return Ok(MonitorOutcome {
                    state: MonitorState::Failed,
                    expected: 0,
                    completed: 0,
                });
            }
        };

        // Reconcile with artifacts already downloaded by an earlier monitor.
        let mut completed = self.count_local_artifacts()?;
        if completed > 0 {
            info!(
                completed,
                expected, "Resuming monitor with artifacts already on disk"
            );
        }

        info!(
            image_id = %self.image_id,
            expected,
            remaining = expected.saturating_sub(completed),
            "Monitoring run"
        );

        while completed < expected {
            if cancel.is_cancelled() {
                return Ok(self.outcome(MonitorState::Cancelled, expected, completed));
            }

            // Draining
            match self.source.drain_new(&self.image_id, &self.result_root).await {
                Ok(keys) => {
                    if !keys.is_empty() {
                        completed += keys.len() as u32;
                        info!(
                            drained = keys.len(),
                            remaining = expected.saturating_sub(completed),
                            "Downloaded result artifacts"
                        );
                    }
                }
                Err(e) => {
                    warn!(error = ?e, "Result drain failed, will retry");
                }
            }

            if completed >= expected {
                break;
            }

            // Waiting: sleep one interval, but wake immediately on cancel.
            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = cancel.cancelled() => {
                    return Ok(self.outcome(MonitorState::Cancelled, expected, completed));
                }
            }
        }

        Ok(self.outcome(MonitorState::Done, expected, completed))
    }

    fn outcome(&self, state: MonitorState, expected: u32, completed: u32) -> MonitorOutcome {
        MonitorOutcome {
            state,
            expected,
            completed,
        }
    }

    /// Count result artifacts already present in the run's local directory,
    /// creating the directory on first use.
    fn count_local_artifacts(&self) -> Result<u32> {
        let dir = run_result_dir(&self.result_root, &self.image_id);
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create result directory {}", dir.display()))?;

        let mut count = 0u32;
        for entry in
            fs::read_dir(&dir).with_context(|| format!("Failed to read {}", dir.display()))?
        {
            let entry = entry?;
            let name = entry.file_name();
            if name.to_string_lossy().ends_with(RESULT_SUFFIX) {
                count += 1;
            }
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Scripted result source: a fixed expected count and a queue of drain
    /// batches, after which drains return empty.
    struct ScriptedSource {
        expected: Result<u32>,
        batches: Mutex<Vec<Vec<String>>>,
    }

    impl ScriptedSource {
        fn new(expected: u32, batches: Vec<Vec<&str>>) -> Self {
            Self {
                expected: Ok(expected),
                batches: Mutex::new(
                    batches
                        .into_iter()
                        .map(|b| b.into_iter().map(String::from).collect())
                        .collect(),
                ),
            }
        }

        fn unavailable() -> Self {
            Self {
                expected: Err(anyhow::anyhow!("NoSuchBucket: store is gone")),
                batches: Mutex::new(Vec::new()),
            }
        }
    }

    impl ResultSource for ScriptedSource {
        async fn expected_count(&self, _image_id: &str) -> Result<u32> {
            match &self.expected {
                Ok(n) => Ok(*n),
                Err(e) => Err(anyhow::anyhow!("{e}")),
            }
        }

        async fn drain_new(&self, _image_id: &str, _root: &Path) -> Result<Vec<String>> {
            let mut batches = self.batches.lock().unwrap();
            if batches.is_empty() {
                Ok(Vec::new())
            } else {
                Ok(batches.remove(0))
            }
        }
    }

    fn monitor(source: ScriptedSource, root: &Path) -> CompletionMonitor<ScriptedSource> {
        CompletionMonitor::new(source, "ami-test123", root)
            .with_poll_interval(Duration::from_millis(1))
    }

    #[tokio::test]
    async fn reaches_done_after_exactly_expected_artifacts() {
        let root = TempDir::new().unwrap();
        // Batching across poll cycles is irrelevant: 2 + 1 + 2 = 5
        let source = ScriptedSource::new(
            5,
            vec![
                vec!["a.feature.result", "b.feature.result"],
                vec![],
                vec!["c.feature.result"],
                vec!["d.feature.result", "e.feature.result"],
            ],
        );

        let outcome = monitor(source, root.path())
            .run(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.state, MonitorState::Done);
        assert_eq!(outcome.completed, 5);
        assert_eq!(outcome.remaining(), 0);
    }

    #[tokio::test]
    async fn zero_expected_is_done_immediately() {
        let root = TempDir::new().unwrap();
        let source = ScriptedSource::new(0, vec![]);

        let outcome = monitor(source, root.path())
            .run(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.state, MonitorState::Done);
        assert_eq!(outcome.completed, 0);
    }

    #[tokio::test]
    async fn resume_counts_local_artifacts_without_redownloading() {
        let root = TempDir::new().unwrap();
        let run_dir = root.path().join("ami-test123");
        fs::create_dir_all(&run_dir).unwrap();
        for name in ["a.feature.result", "b.feature.result", "c.feature.result"] {
            fs::write(run_dir.join(name), "done\n").unwrap();
        }
        // A stray non-artifact file must not count
        fs::write(run_dir.join("notes.txt"), "").unwrap();

        let source = ScriptedSource::new(5, vec![vec!["d.feature.result", "e.feature.result"]]);
        let outcome = monitor(source, root.path())
            .run(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.state, MonitorState::Done);
        // remaining = expected - k was honored: only 2 more were drained
        assert_eq!(outcome.completed, 5);
    }

    #[tokio::test]
    async fn already_complete_on_disk_skips_the_store_entirely() {
        let root = TempDir::new().unwrap();
        let run_dir = root.path().join("ami-test123");
        fs::create_dir_all(&run_dir).unwrap();
        fs::write(run_dir.join("a.feature.result"), "").unwrap();
        fs::write(run_dir.join("b.feature.result"), "").unwrap();

        let source = ScriptedSource::new(2, vec![vec!["should-not-be-drained.result"]]);
        let outcome = monitor(source, root.path())
            .run(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.state, MonitorState::Done);
        assert_eq!(outcome.completed, 2);
    }

    #[tokio::test]
    async fn missing_store_fails_initialization() {
        let root = TempDir::new().unwrap();
        let outcome = monitor(ScriptedSource::unavailable(), root.path())
            .run(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.state, MonitorState::Failed);
        assert_eq!(outcome.expected, 0);
    }

    #[tokio::test]
    async fn cancellation_is_terminal_and_keeps_progress() {
        let root = TempDir::new().unwrap();
        let source = ScriptedSource::new(10, vec![vec!["a.feature.result"]]);
        let token = CancellationToken::new();

        let m = monitor(source, root.path()).with_poll_interval(Duration::from_secs(60));
        let cancel = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel.cancel();
        });

        let outcome = m.run(&token).await.unwrap();
        assert_eq!(outcome.state, MonitorState::Cancelled);
        assert_eq!(outcome.completed, 1);
        assert_eq!(outcome.remaining(), 9);
    }

    #[tokio::test]
    async fn drain_errors_are_swallowed_and_polling_continues() {
        let root = TempDir::new().unwrap();

        struct FlakySource {
            calls: Mutex<u32>,
        }

        impl ResultSource for FlakySource {
            async fn expected_count(&self, _image_id: &str) -> Result<u32> {
                Ok(1)
            }

            async fn drain_new(&self, _image_id: &str, _root: &Path) -> Result<Vec<String>> {
                let mut calls = self.calls.lock().unwrap();
                *calls += 1;
                if *calls == 1 {
                    anyhow::bail!("transient store error")
                }
                Ok(vec!["a.feature.result".to_string()])
            }
        }

        let m = CompletionMonitor::new(
            FlakySource {
                calls: Mutex::new(0),
            },
            "ami-test123",
            root.path(),
        )
        .with_poll_interval(Duration::from_millis(1));

        let outcome = m.run(&CancellationToken::new()).await.unwrap();
        assert_eq!(outcome.state, MonitorState::Done);
        assert_eq!(outcome.completed, 1);
    }

    #[test]
    fn terminal_states() {
        assert!(MonitorState::Done.is_terminal());
        assert!(MonitorState::Cancelled.is_terminal());
        assert!(MonitorState::Failed.is_terminal());
        assert!(!MonitorState::Waiting.is_terminal());
        assert!(!MonitorState::Draining.is_terminal());
        assert!(!MonitorState::Initializing.is_terminal());
    }
}
