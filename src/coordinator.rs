//! Drives one container run end to end.
//!
//! The destination is bootstrapped first, then the container is started and
//! its output is drained chunk by chunk. Every chunk is echoed locally and
//! shipped in order. Once the output closes, the exit status is collected and
//! the container is removed. Removal happens on every path after a successful
//! start, including errors and cancellation.

use std::io::Write;
use std::sync::Arc;

use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::config::ShippingPolicy;
use crate::process::{ExitInfo, ProcessClient, ProcessError, ProcessHandle, remove_or_log};
use crate::sink::{
    BootstrapError, LogDestination, LogLine, LogShipper, ShipError, SinkBootstrapper, SinkClient,
};

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("Log destination unavailable: {0}")]
    Destination(#[from] BootstrapError),
    #[error("Image not found: {0}")]
    ImageNotFound(String),
    #[error("Unable to start container: {0}")]
    Start(ProcessError),
    #[error("Lost container output: {0}")]
    Stream(ProcessError),
    #[error("Unable to get container exit status: {0}")]
    Wait(ProcessError),
    #[error("Run cancelled")]
    Cancelled,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunStats {
    pub lines: usize,
    pub shipped: usize,
    pub conflicts: usize,
    pub failed: usize,
    /// Lines not attempted, either blank or read while shipping was suspended.
    pub skipped: usize,
}

/// Owns a started container until it is removed.
///
/// `release` removes it. If the guard is dropped without being released the
/// removal is scheduled on the current runtime instead.
struct ProcessGuard<P: ProcessClient + 'static> {
    process: Arc<P>,
    handle: ProcessHandle,
    released: bool,
}

impl<P: ProcessClient + 'static> ProcessGuard<P> {
    fn new(process: Arc<P>, handle: ProcessHandle) -> Self {
        Self {
            process,
            handle,
            released: false,
        }
    }

    fn handle(&self) -> &ProcessHandle {
        &self.handle
    }

    async fn release(mut self) {
        self.released = true;
        remove_or_log(self.process.as_ref(), &self.handle).await;
    }
}

impl<P: ProcessClient + 'static> Drop for ProcessGuard<P> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let process = Arc::clone(&self.process);
        let handle = self.handle.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(rt) => {
                log::warn!("Container {} abandoned, removing it in the background", handle);
                rt.spawn(async move {
                    remove_or_log(process.as_ref(), &handle).await;
                });
            }
            Err(_) => log::error!("Container {} abandoned with no runtime to remove it", handle),
        }
    }
}

pub struct RunCoordinator<P, S, W> {
    process: Arc<P>,
    sink: Arc<S>,
    echo: W,
    policy: ShippingPolicy,
}

impl<P, S, W> RunCoordinator<P, S, W>
where
    P: ProcessClient + 'static,
    S: SinkClient,
    W: Write,
{
    pub fn new(process: Arc<P>, sink: Arc<S>, echo: W) -> Self {
        Self {
            process,
            sink,
            echo,
            policy: ShippingPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: ShippingPolicy) -> Self {
        self.policy = policy;
        self
    }

    #[cfg(test)]
    fn into_echo(self) -> W {
        self.echo
    }

    /// Runs `command` in `image`, shipping its output to `destination`.
    ///
    /// `cancel` is checked before the container is started and between chunks.
    pub async fn run(
        &mut self,
        image: &str,
        command: &str,
        destination: &LogDestination,
        cancel: &CancellationToken,
    ) -> Result<ExitInfo, RunError> {
        SinkBootstrapper::new(Arc::clone(&self.sink))
            .ensure(destination)
            .await?;

        if cancel.is_cancelled() {
            return Err(RunError::Cancelled);
        }

        let handle = match self.process.run(image, command).await {
            Ok(handle) => handle,
            Err(ProcessError::ImageNotFound(image)) => return Err(RunError::ImageNotFound(image)),
            Err(e) => return Err(RunError::Start(e)),
        };
        log::info!("Shipping output of container {} to {}", handle, destination);

        let guard = ProcessGuard::new(Arc::clone(&self.process), handle);
        let outcome = self.supervise(guard.handle(), destination, cancel).await;
        guard.release().await;

        if let Ok(exit) = &outcome {
            log::info!("Container exited with status {}", exit.status_code);
        }
        outcome
    }

    async fn supervise(
        &mut self,
        handle: &ProcessHandle,
        destination: &LogDestination,
        cancel: &CancellationToken,
    ) -> Result<ExitInfo, RunError> {
        let mut shipper = LogShipper::new(Arc::clone(&self.sink), destination.clone());
        let mut stats = RunStats::default();

        let drained = self.drain(handle, &mut shipper, &mut stats, cancel).await;
        log::info!(
            "Read {} lines: {} shipped, {} token conflicts, {} failed, {} skipped",
            stats.lines,
            stats.shipped,
            stats.conflicts,
            stats.failed,
            stats.skipped
        );
        log::debug!("Last sequence token for {}: {:?}", destination, shipper.token());
        drained?;

        self.process.wait(handle).await.map_err(RunError::Wait)
    }

    async fn drain(
        &mut self,
        handle: &ProcessHandle,
        shipper: &mut LogShipper<S>,
        stats: &mut RunStats,
        cancel: &CancellationToken,
    ) -> Result<(), RunError> {
        let process = Arc::clone(&self.process);
        let mut output = process.output_stream(handle);
        let mut suspended = false;

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    log::warn!("Run cancelled after {} lines", stats.lines);
                    return Err(RunError::Cancelled);
                }
                next = output.next() => next,
            };
            let Some(chunk) = next else {
                return Ok(());
            };
            let line = LogLine::from_chunk(&chunk.map_err(RunError::Stream)?);
            stats.lines += 1;

            if let Err(e) = writeln!(self.echo, "{}", line.text()) {
                log::warn!("Unable to echo line: {}", e);
            }

            // CloudWatch rejects empty messages
            if suspended || line.text().is_empty() {
                stats.skipped += 1;
                continue;
            }

            match shipper.ship(line).await {
                Ok(_) => stats.shipped += 1,
                Err(ShipError::TokenConflict(reason)) => {
                    stats.conflicts += 1;
                    log::warn!(
                        "Sequence token rejected by {}, resynchronising: {}",
                        shipper.destination(),
                        reason
                    );
                }
                Err(ShipError::Transport(reason)) => {
                    stats.failed += 1;
                    log::error!("Failed to ship line to {}: {}", shipper.destination(), reason);
                    if self.policy == ShippingPolicy::Suspend {
                        log::warn!("Shipping suspended, output is still drained locally");
                        suspended = true;
                    }
                }
            }
        }
    }
}
