//! Remote log sink.
//!
//! The sink is an append-only store addressed by a (group, stream) pair.
//! Appends to a stream are chained: every successful append may hand back a
//! sequence token that the next append to the same stream must carry.

use async_trait::async_trait;

pub mod bootstrap;
pub mod cloudwatch;
pub mod shipper;

pub use bootstrap::{BootstrapError, SinkBootstrapper};
pub use shipper::{LogLine, LogShipper, ShipError};

/// The (group, stream) pair a session writes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogDestination {
    pub group: String,
    pub stream: String,
}

impl LogDestination {
    pub fn new(group: impl Into<String>, stream: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            stream: stream.into(),
        }
    }
}

impl std::fmt::Display for LogDestination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.group, self.stream)
    }
}

/// Opaque token issued by the sink after an accepted append.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceToken(String);

impl SequenceToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SequenceToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A single event as sent over the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEvent {
    /// Milliseconds since the Unix epoch (UTC)
    pub timestamp_ms: i64,
    pub message: String,
}

#[derive(Debug, thiserror::Error)]
pub enum CreateError {
    #[error("resource already exists")]
    AlreadyExists,
    #[error("{0}")]
    Fatal(String),
}

#[derive(Debug, thiserror::Error)]
pub enum AppendError {
    #[error("invalid sequence token: {0}")]
    InvalidToken(String),
    #[error("{0}")]
    Transport(String),
}

/// Client to the remote logging service.
#[async_trait]
pub trait SinkClient: Send + Sync {
    async fn create_group(&self, name: &str) -> Result<(), CreateError>;

    async fn create_stream(&self, group: &str, name: &str) -> Result<(), CreateError>;

    /// Appends `events` to `destination`.
    ///
    /// Returns the token the next append must carry, if the sink issued one.
    async fn append(
        &self,
        destination: &LogDestination,
        events: Vec<LogEvent>,
        token: Option<&SequenceToken>,
    ) -> Result<Option<SequenceToken>, AppendError>;
}
