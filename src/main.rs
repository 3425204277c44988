use std::process::ExitCode;
use std::sync::Arc;

use config::RunConfig;
use coordinator::{RunCoordinator, RunError};
use process::ExitInfo;
use process::docker::DockerProcessClient;
use sink::cloudwatch::CloudWatchSink;
use tokio_util::sync::CancellationToken;

mod cli;
mod config;
mod coordinator;
mod process;
mod signals;
mod sink;
#[cfg(test)]
mod testing;

/// Status reported when the run itself could not complete.
const RUN_FAILURE: u8 = 1;

/// The container's own exit code when it ran to completion, a failure status otherwise.
fn exit_status(outcome: &Result<ExitInfo, RunError>) -> u8 {
    match outcome {
        Ok(exit) => u8::try_from(exit.status_code).unwrap_or(RUN_FAILURE),
        Err(_) => RUN_FAILURE,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize the logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = match RunConfig::try_init() {
        Ok(config) => config,
        Err(e) => {
            log::error!("{e}");
            return ExitCode::from(RUN_FAILURE);
        }
    };

    let cancel = CancellationToken::new();
    if let Err(e) = signals::handle_shutdown(cancel.clone()) {
        log::warn!("Unable to install signal handlers: {e}");
    }

    let process = match DockerProcessClient::connect() {
        Ok(process) => Arc::new(process),
        Err(e) => {
            log::error!("Could not connect to the Docker daemon: {e}");
            return ExitCode::from(RUN_FAILURE);
        }
    };
    let sink = match CloudWatchSink::new(&config.aws).await {
        Ok(sink) => Arc::new(sink),
        Err(e) => {
            log::error!("{e}");
            return ExitCode::from(RUN_FAILURE);
        }
    };

    let mut coordinator =
        RunCoordinator::new(process, sink, std::io::stdout()).with_policy(config.policy);
    let outcome = coordinator
        .run(&config.image, &config.command, &config.destination, &cancel)
        .await;

    match &outcome {
        Ok(exit) if !exit.success() => {
            log::warn!("Container exited with non-zero status {}", exit.status_code)
        }
        Ok(_) => {}
        Err(RunError::Destination(e)) => log::error!(
            "Could not reach CloudWatch. Please check your credentials or connection: {e}"
        ),
        Err(RunError::ImageNotFound(image)) => {
            log::error!("Image {image} not found, please check your image name.")
        }
        Err(e) => log::error!("{e}"),
    }

    ExitCode::from(exit_status(&outcome))
}
