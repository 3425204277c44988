use std::path::Path;

use crate::cli::Args;
use crate::process::docker::{CommandError, split_command};
use crate::sink::LogDestination;

/// What the coordinator does with later lines after an append fails in transit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Deserialize, clap::ValueEnum)]
pub enum ShippingPolicy {
    /// Keep shipping every line. Each failed line is logged and skipped.
    #[serde(alias = "continue")]
    #[default]
    Continue,
    /// Stop shipping after the first failure. Output is still drained and echoed.
    #[serde(alias = "suspend")]
    Suspend,
}

#[derive(Debug, Default, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    #[serde(default)]
    container: ContainerSection,
    #[serde(default)]
    destination: DestinationSection,
    #[serde(default)]
    aws: AwsSection,
    #[serde(default)]
    shipping: ShippingSection,
}

#[derive(Debug, Default, serde::Deserialize)]
#[serde(deny_unknown_fields)]
struct ContainerSection {
    image: Option<String>,
    command: Option<String>,
}

#[derive(Debug, Default, serde::Deserialize)]
#[serde(deny_unknown_fields)]
struct DestinationSection {
    group: Option<String>,
    stream: Option<String>,
}

#[derive(Debug, Default, serde::Deserialize)]
#[serde(deny_unknown_fields)]
struct AwsSection {
    access_key_id: Option<String>,
    secret_access_key: Option<String>,
    region: Option<String>,
}

#[derive(Debug, Default, serde::Deserialize)]
#[serde(deny_unknown_fields)]
struct ShippingSection {
    #[serde(default)]
    on_transport_error: ShippingPolicy,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Missing required option --{0}")]
    Missing(&'static str),
    #[error("Invalid command: {0}")]
    Command(#[from] CommandError),
}

impl ConfigFile {
    fn try_init_from_string(val: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(val)?)
    }

    pub fn try_init(path: &Path) -> Result<Self, ConfigError> {
        use std::io::Read;
        let mut config = String::new();
        std::fs::File::open(path)?.read_to_string(&mut config)?;
        Self::try_init_from_string(&config)
    }
}

/// Static AWS credentials.
#[derive(Clone, PartialEq, Eq)]
pub struct AwsCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
}

impl std::fmt::Debug for AwsCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwsCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AwsConfig {
    /// `None` defers to the default credential chain (env, profile, IMDS).
    pub credentials: Option<AwsCredentials>,
    pub region: Option<String>,
}

/// Everything a single run needs, after merging the command line over the config file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    pub image: String,
    pub command: String,
    pub destination: LogDestination,
    pub aws: AwsConfig,
    pub policy: ShippingPolicy,
}

impl RunConfig {
    pub fn try_init() -> Result<Self, ConfigError> {
        let args = crate::cli::get_cli_args();
        let file = match &args.config {
            Some(path) => ConfigFile::try_init(path)?,
            None => ConfigFile::default(),
        };
        Self::resolve(args, file)
    }

    fn resolve(args: &Args, file: ConfigFile) -> Result<Self, ConfigError> {
        fn pick(
            arg: &Option<String>,
            file: Option<String>,
            name: &'static str,
        ) -> Result<String, ConfigError> {
            arg.clone().or(file).ok_or(ConfigError::Missing(name))
        }

        let image = pick(&args.docker_image, file.container.image, "docker-image")?;
        let command = pick(&args.bash_command, file.container.command, "bash-command")?;
        // Reject unbalanced quoting before anything remote is touched.
        split_command(&command)?;

        let group = pick(
            &args.aws_cloudwatch_group,
            file.destination.group,
            "aws-cloudwatch-group",
        )?;
        let stream = pick(
            &args.aws_cloudwatch_stream,
            file.destination.stream,
            "aws-cloudwatch-stream",
        )?;

        let access_key_id = args.aws_access_key_id.clone().or(file.aws.access_key_id);
        let secret_access_key = args
            .aws_secret_access_key
            .clone()
            .or(file.aws.secret_access_key);
        let credentials = match (access_key_id, secret_access_key) {
            (Some(access_key_id), Some(secret_access_key)) => Some(AwsCredentials {
                access_key_id,
                secret_access_key,
            }),
            (Some(_), None) => return Err(ConfigError::Missing("aws-secret-access-key")),
            (None, Some(_)) => return Err(ConfigError::Missing("aws-access-key-id")),
            (None, None) => None,
        };

        Ok(Self {
            image,
            command,
            destination: LogDestination::new(group, stream),
            aws: AwsConfig {
                credentials,
                region: args.aws_region.clone().or(file.aws.region),
            },
            policy: args
                .on_transport_error
                .unwrap_or(file.shipping.on_transport_error),
        })
    }
}
