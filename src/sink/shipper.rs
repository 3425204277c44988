use std::sync::Arc;

use super::{AppendError, LogDestination, LogEvent, SequenceToken, SinkClient};

/// One unit of process output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    text: String,
}

impl LogLine {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    /// Decodes a raw output chunk. Invalid UTF-8 is replaced and a single
    /// trailing line terminator is dropped.
    pub fn from_chunk(chunk: &[u8]) -> Self {
        let decoded = String::from_utf8_lossy(chunk);
        let text = decoded
            .strip_suffix('\n')
            .map(|t| t.strip_suffix('\r').unwrap_or(t))
            .unwrap_or(decoded.as_ref());
        Self::new(text)
    }

    pub fn text(&self) -> &str {
        &self.text
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ShipError {
    /// The sink rejected the token we sent. The shipper has already dropped
    /// it, so the next call goes out without one.
    #[error("sequence token conflict: {0}")]
    TokenConflict(String),
    #[error("transport error: {0}")]
    Transport(String),
}

/// Ships lines to a single destination, keeping the append chain in order.
pub struct LogShipper<S> {
    sink: Arc<S>,
    destination: LogDestination,
    token: Option<SequenceToken>,
}

impl<S: SinkClient> LogShipper<S> {
    pub fn new(sink: Arc<S>, destination: LogDestination) -> Self {
        Self {
            sink,
            destination,
            token: None,
        }
    }

    pub fn destination(&self) -> &LogDestination {
        &self.destination
    }

    /// The token the next append will carry.
    pub fn token(&self) -> Option<&SequenceToken> {
        self.token.as_ref()
    }

    /// Appends `line` to the destination, stamped with the current time.
    ///
    /// Nothing is retried here. On a token conflict the stored token is
    /// dropped so the sink can resynchronise on the next call.
    pub async fn ship(&mut self, line: LogLine) -> Result<Option<SequenceToken>, ShipError> {
        let event = LogEvent {
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
            message: line.text,
        };

        match self
            .sink
            .append(&self.destination, vec![event], self.token.as_ref())
            .await
        {
            Ok(next) => {
                self.token = next.clone();
                Ok(next)
            }
            Err(AppendError::InvalidToken(reason)) => {
                log::debug!(
                    "Dropping sequence token {:?} for {}",
                    self.token,
                    self.destination
                );
                self.token = None;
                Err(ShipError::TokenConflict(reason))
            }
            Err(AppendError::Transport(reason)) => Err(ShipError::Transport(reason)),
        }
    }
}
