use std::{path::PathBuf, sync::OnceLock};

use clap::Parser;

use crate::config::ShippingPolicy;

/// Run a command in a container and ship its output to CloudWatch Logs.
///
/// Every option can also be set in the config file. Options given on the
/// command line take precedence.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Path to an optional TOML config file.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Name of the docker image.
    #[arg(long)]
    pub docker_image: Option<String>,

    /// Command to run inside the container.
    #[arg(long)]
    pub bash_command: Option<String>,

    /// CloudWatch log group name.
    #[arg(long)]
    pub aws_cloudwatch_group: Option<String>,

    /// CloudWatch log stream name.
    #[arg(long)]
    pub aws_cloudwatch_stream: Option<String>,

    /// AWS access key id. Falls back to the default credential chain when unset.
    #[arg(long)]
    pub aws_access_key_id: Option<String>,

    /// AWS secret access key.
    #[arg(long)]
    pub aws_secret_access_key: Option<String>,

    /// AWS region.
    #[arg(long)]
    pub aws_region: Option<String>,

    /// What to do with the remaining lines once an append fails.
    #[arg(long, value_enum)]
    pub on_transport_error: Option<ShippingPolicy>,
}

static ARGS: OnceLock<Args> = OnceLock::new();

pub fn get_cli_args() -> &'static Args {
    ARGS.get_or_init(Args::parse)
}
