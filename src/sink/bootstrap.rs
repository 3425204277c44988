use std::sync::Arc;

use super::{CreateError, LogDestination, SinkClient};

#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    #[error("Unable to create log group {group}: {reason}")]
    Group { group: String, reason: String },
    #[error("Unable to create log stream {destination}: {reason}")]
    Stream {
        destination: LogDestination,
        reason: String,
    },
}

/// Makes sure a destination exists before anything is shipped to it.
pub struct SinkBootstrapper<S> {
    sink: Arc<S>,
}

impl<S: SinkClient> SinkBootstrapper<S> {
    pub fn new(sink: Arc<S>) -> Self {
        Self { sink }
    }

    /// Creates the group and the stream if they are absent.
    ///
    /// Calling this against a destination that already exists succeeds.
    pub async fn ensure(&self, destination: &LogDestination) -> Result<(), BootstrapError> {
        match self.sink.create_group(&destination.group).await {
            Ok(()) => log::info!("Created log group {}", destination.group),
            Err(CreateError::AlreadyExists) => {
                log::debug!("Log group {} already exists", destination.group)
            }
            Err(CreateError::Fatal(reason)) => {
                return Err(BootstrapError::Group {
                    group: destination.group.clone(),
                    reason,
                });
            }
        }

        match self
            .sink
            .create_stream(&destination.group, &destination.stream)
            .await
        {
            Ok(()) => log::info!("Created log stream {}", destination),
            Err(CreateError::AlreadyExists) => {
                log::debug!("Log stream {} already exists", destination)
            }
            Err(CreateError::Fatal(reason)) => {
                return Err(BootstrapError::Stream {
                    destination: destination.clone(),
                    reason,
                });
            }
        }

        Ok(())
    }
}
