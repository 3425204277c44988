//! Docker backend for [`ProcessClient`] using bollard.

use async_trait::async_trait;
use bollard::Docker;
use bollard::container::LogOutput;
use bollard::models::ContainerCreateBody;
use bollard::query_parameters::{
    CreateContainerOptions, CreateImageOptions, CreateImageOptionsBuilder, LogsOptions,
    LogsOptionsBuilder, RemoveContainerOptions, RemoveContainerOptionsBuilder,
    StartContainerOptions, StartContainerOptionsBuilder, WaitContainerOptions,
    WaitContainerOptionsBuilder,
};
use bytes::Bytes;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;

use super::{ExitInfo, ProcessClient, ProcessError, ProcessHandle, remove_or_log};

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    #[error("unterminated {0} quote")]
    UnterminatedQuote(char),
    #[error("trailing backslash")]
    TrailingEscape,
}

/// Split a command line into arguments the way a POSIX shell would, without
/// any expansion. Supports single quotes, double quotes and backslash escapes.
pub fn split_command(command: &str) -> Result<Vec<String>, CommandError> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut chars = command.chars();

    while let Some(c) = chars.next() {
        match c {
            c if c.is_whitespace() => {
                if in_word {
                    args.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            '\'' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(c) => current.push(c),
                        None => return Err(CommandError::UnterminatedQuote('\'')),
                    }
                }
            }
            '"' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        // Inside double quotes a backslash only escapes these
                        Some('\\') => match chars.next() {
                            Some(c @ ('"' | '\\' | '$' | '`')) => current.push(c),
                            Some(c) => {
                                current.push('\\');
                                current.push(c);
                            }
                            None => return Err(CommandError::UnterminatedQuote('"')),
                        },
                        Some(c) => current.push(c),
                        None => return Err(CommandError::UnterminatedQuote('"')),
                    }
                }
            }
            '\\' => {
                in_word = true;
                match chars.next() {
                    Some(c) => current.push(c),
                    None => return Err(CommandError::TrailingEscape),
                }
            }
            c => {
                in_word = true;
                current.push(c);
            }
        }
    }
    if in_word {
        args.push(current);
    }
    Ok(args)
}

/// Parse an image reference into (image, tag) components
fn parse_image_reference(image: &str) -> (&str, &str) {
    // Digest references (image@sha256:...) are passed as the tag
    if let Some(at_pos) = image.find('@') {
        return (&image[..at_pos], &image[at_pos + 1..]);
    }

    // A colon followed by a slash belongs to a registry port
    // e.g., localhost:5000/myimage
    if let Some(colon_pos) = image.rfind(':') {
        let after_colon = &image[colon_pos + 1..];
        if !after_colon.contains('/') {
            return (&image[..colon_pos], after_colon);
        }
    }

    (image, "latest")
}

fn transport(e: bollard::errors::Error) -> ProcessError {
    ProcessError::Transport(e.to_string())
}

fn is_not_found(e: &bollard::errors::Error) -> bool {
    matches!(
        e,
        bollard::errors::Error::DockerResponseServerError {
            status_code: 404,
            ..
        }
    )
}

pub struct DockerProcessClient {
    docker: Docker,
}

impl DockerProcessClient {
    /// Connect using the default method for the platform
    /// (Unix socket on Linux/macOS, named pipe on Windows).
    pub fn connect() -> Result<Self, ProcessError> {
        let docker = Docker::connect_with_local_defaults().map_err(transport)?;
        Ok(Self { docker })
    }

    async fn pull_image(&self, reference: &str) -> Result<(), ProcessError> {
        log::info!("Pulling image: {}", reference);
        let (image, tag) = parse_image_reference(reference);

        let options: CreateImageOptions = CreateImageOptionsBuilder::new()
            .from_image(image)
            .tag(tag)
            .build();

        let mut stream = self.docker.create_image(Some(options), None, None);

        while let Some(result) = stream.next().await {
            match result {
                Ok(info) => {
                    if let Some(status) = info.status {
                        log::debug!("Pull status: {}", status);
                    }
                }
                Err(e) if is_not_found(&e) => {
                    return Err(ProcessError::ImageNotFound(reference.to_string()));
                }
                Err(e) => {
                    log::error!("Failed to pull image {}: {}", reference, e);
                    return Err(transport(e));
                }
            }
        }

        log::info!("Image {} pulled successfully", reference);
        Ok(())
    }

    async fn create_container(
        &self,
        image: &str,
        argv: &[String],
    ) -> Result<String, bollard::errors::Error> {
        let config = ContainerCreateBody {
            image: Some(image.to_string()),
            cmd: if argv.is_empty() {
                None
            } else {
                Some(argv.to_vec())
            },
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            tty: Some(false),
            ..Default::default()
        };

        let response = self
            .docker
            .create_container(None::<CreateContainerOptions>, config)
            .await?;
        for warning in response.warnings {
            log::warn!("Docker: {}", warning);
        }
        Ok(response.id)
    }
}

#[async_trait]
impl ProcessClient for DockerProcessClient {
    async fn run(&self, image: &str, command: &str) -> Result<ProcessHandle, ProcessError> {
        let argv = split_command(command)
            .map_err(|e| ProcessError::Transport(format!("invalid command: {e}")))?;

        let id = match self.create_container(image, &argv).await {
            Ok(id) => id,
            Err(e) if is_not_found(&e) => {
                log::info!("Image {} is not available locally", image);
                self.pull_image(image).await?;
                self.create_container(image, &argv)
                    .await
                    .map_err(|e| {
                        if is_not_found(&e) {
                            ProcessError::ImageNotFound(image.to_string())
                        } else {
                            transport(e)
                        }
                    })?
            }
            Err(e) => return Err(transport(e)),
        };
        let handle = ProcessHandle::new(id);

        let options: StartContainerOptions = StartContainerOptionsBuilder::new().build();
        if let Err(e) = self.docker.start_container(&handle.id, Some(options)).await {
            log::error!("Failed to start container {}: {}", handle, e);
            // Nobody else holds this container yet
            remove_or_log(self, &handle).await;
            return Err(transport(e));
        }

        log::info!("Container {} started successfully", handle);
        Ok(handle)
    }

    /// One item per Docker log frame. A process that block-buffers its output
    /// can put several lines in a single frame.
    fn output_stream<'a>(
        &'a self,
        handle: &'a ProcessHandle,
    ) -> BoxStream<'a, Result<Bytes, ProcessError>> {
        let options: LogsOptions = LogsOptionsBuilder::new()
            .follow(true)
            .stdout(true)
            .stderr(true)
            .build();

        self.docker
            .logs(&handle.id, Some(options))
            .map(|chunk| chunk.map(LogOutput::into_bytes).map_err(transport))
            .boxed()
    }

    async fn wait(&self, handle: &ProcessHandle) -> Result<ExitInfo, ProcessError> {
        let options: WaitContainerOptions = WaitContainerOptionsBuilder::new()
            .condition("not-running")
            .build();

        let mut stream = self.docker.wait_container(&handle.id, Some(options));
        match stream.next().await {
            Some(Ok(response)) => Ok(ExitInfo {
                status_code: response.status_code,
            }),
            // bollard reports a non-zero exit as an error
            Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => {
                Ok(ExitInfo { status_code: code })
            }
            Some(Err(e)) => Err(transport(e)),
            None => Err(ProcessError::Transport(format!(
                "no exit status reported for container {handle}"
            ))),
        }
    }

    async fn remove(&self, handle: &ProcessHandle) -> Result<(), ProcessError> {
        log::info!("Removing container: {}", handle);

        let options: RemoveContainerOptions =
            RemoveContainerOptionsBuilder::new().force(true).build();

        match self.docker.remove_container(&handle.id, Some(options)).await {
            Ok(_) => {
                log::info!("Container {} removed successfully", handle);
                Ok(())
            }
            Err(e) if is_not_found(&e) => {
                log::info!("Container {} not found, skipping removal", handle);
                Ok(())
            }
            Err(e) => Err(transport(e)),
        }
    }
}
