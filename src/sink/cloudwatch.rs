//! CloudWatch Logs backend for [`SinkClient`].

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region, SdkConfig};
use aws_sdk_cloudwatchlogs::Client;
use aws_sdk_cloudwatchlogs::config::Credentials;
use aws_sdk_cloudwatchlogs::error::DisplayErrorContext;
use aws_sdk_cloudwatchlogs::operation::create_log_group::CreateLogGroupError;
use aws_sdk_cloudwatchlogs::operation::create_log_stream::CreateLogStreamError;
use aws_sdk_cloudwatchlogs::operation::put_log_events::PutLogEventsError;
use aws_sdk_cloudwatchlogs::types::InputLogEvent;

use super::{AppendError, CreateError, LogDestination, LogEvent, SequenceToken, SinkClient};
use crate::config::{AwsConfig, ConfigError};

const CREDENTIALS_PROVIDER_NAME: &str = "logship";

pub struct CloudWatchSink {
    client: Client,
}

impl CloudWatchSink {
    /// Explicit settings win, anything left unset comes from the default
    /// provider chain (environment, profile, instance metadata).
    pub async fn new(aws: &AwsConfig) -> Result<Self, ConfigError> {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = &aws.region {
            loader = loader.region(Region::new(region.clone()));
        }
        if let Some(credentials) = &aws.credentials {
            loader = loader.credentials_provider(Credentials::new(
                credentials.access_key_id.clone(),
                credentials.secret_access_key.clone(),
                None,
                None,
                CREDENTIALS_PROVIDER_NAME,
            ));
        }
        let sdk_config = loader.load().await;
        check_region(&sdk_config)?;
        Ok(Self {
            client: Client::new(&sdk_config),
        })
    }
}

fn check_region(sdk_config: &SdkConfig) -> Result<(), ConfigError> {
    match sdk_config.region() {
        Some(region) => {
            log::debug!("Using AWS region {}", region);
            Ok(())
        }
        None => Err(ConfigError::Missing("aws-region")),
    }
}

fn classify_create_group(err: CreateLogGroupError) -> CreateError {
    if err.is_resource_already_exists_exception() {
        CreateError::AlreadyExists
    } else {
        CreateError::Fatal(DisplayErrorContext(&err).to_string())
    }
}

fn classify_create_stream(err: CreateLogStreamError) -> CreateError {
    if err.is_resource_already_exists_exception() {
        CreateError::AlreadyExists
    } else {
        CreateError::Fatal(DisplayErrorContext(&err).to_string())
    }
}

fn classify_append(err: PutLogEventsError) -> AppendError {
    // Both mean the token we sent is not the one the stream expects.
    if err.is_invalid_sequence_token_exception() || err.is_data_already_accepted_exception() {
        AppendError::InvalidToken(DisplayErrorContext(&err).to_string())
    } else {
        AppendError::Transport(DisplayErrorContext(&err).to_string())
    }
}

#[async_trait]
impl SinkClient for CloudWatchSink {
    async fn create_group(&self, name: &str) -> Result<(), CreateError> {
        self.client
            .create_log_group()
            .log_group_name(name)
            .send()
            .await
            .map(|_| ())
            .map_err(|e| classify_create_group(e.into_service_error()))
    }

    async fn create_stream(&self, group: &str, name: &str) -> Result<(), CreateError> {
        self.client
            .create_log_stream()
            .log_group_name(group)
            .log_stream_name(name)
            .send()
            .await
            .map(|_| ())
            .map_err(|e| classify_create_stream(e.into_service_error()))
    }

    async fn append(
        &self,
        destination: &LogDestination,
        events: Vec<LogEvent>,
        token: Option<&SequenceToken>,
    ) -> Result<Option<SequenceToken>, AppendError> {
        let events = events
            .into_iter()
            .map(|event| {
                InputLogEvent::builder()
                    .timestamp(event.timestamp_ms)
                    .message(event.message)
                    .build()
            })
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| AppendError::Transport(e.to_string()))?;

        let output = self
            .client
            .put_log_events()
            .log_group_name(&destination.group)
            .log_stream_name(&destination.stream)
            .set_log_events(Some(events))
            .set_sequence_token(token.map(|t| t.as_str().to_string()))
            .send()
            .await
            .map_err(|e| classify_append(e.into_service_error()))?;

        if let Some(rejected) = output.rejected_log_events_info() {
            log::warn!("CloudWatch rejected events for {}: {:?}", destination, rejected);
        }

        Ok(output.next_sequence_token().map(SequenceToken::new))
    }
}
