//! Container execution environment.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;

pub mod docker;

/// Identifier of a started process, owned by whoever started it until it is removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessHandle {
    pub id: String,
}

impl ProcessHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

impl std::fmt::Display for ProcessHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Container ids are long, the short form is what `docker ps` shows.
        let short = self.id.get(..12).unwrap_or(&self.id);
        f.write_str(short)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitInfo {
    pub status_code: i64,
}

impl ExitInfo {
    pub fn success(&self) -> bool {
        self.status_code == 0
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("image not found: {0}")]
    ImageNotFound(String),
    #[error("{0}")]
    Transport(String),
}

/// Client to the container runtime.
#[async_trait]
pub trait ProcessClient: Send + Sync {
    /// Creates and starts `image` running `command`, with stdout and stderr captured.
    async fn run(&self, image: &str, command: &str) -> Result<ProcessHandle, ProcessError>;

    /// Combined stdout/stderr of the process, chunk by chunk.
    ///
    /// The stream ends when the process closes its output.
    fn output_stream<'a>(
        &'a self,
        handle: &'a ProcessHandle,
    ) -> BoxStream<'a, Result<Bytes, ProcessError>>;

    async fn wait(&self, handle: &ProcessHandle) -> Result<ExitInfo, ProcessError>;

    async fn remove(&self, handle: &ProcessHandle) -> Result<(), ProcessError>;
}

/// Removes `handle`, logging a failure instead of returning it.
///
/// Returns whether the process is gone.
pub async fn remove_or_log<P: ProcessClient + ?Sized>(
    process: &P,
    handle: &ProcessHandle,
) -> bool {
    match process.remove(handle).await {
        Ok(()) => true,
        Err(e) => {
            log::error!("Failed to remove container {}: {}", handle, e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeProcess;

    #[tokio::test]
    async fn test_remove_failure_is_reported_not_raised() {
        let process = FakeProcess::default().failing_remove();
        assert!(!remove_or_log(&process, &ProcessHandle::new("c0ffee")).await);
        assert_eq!(process.remove_calls(), 1);
    }

    #[tokio::test]
    async fn test_remove_success() {
        let process = FakeProcess::default();
        assert!(remove_or_log(&process, &ProcessHandle::new("c0ffee")).await);
        assert_eq!(process.remove_calls(), 1);
    }
}
