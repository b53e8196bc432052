//! Binary entry point for the `linforge` CLI.

mod cli;

use std::io::{self, Write};
use std::process;

use clap::Parser;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{Level, warn};

use linforge::{
    AuthorizedKeysError, BootstrapFailurePolicy, BootstrapMode, ConfigError, FormatError,
    HostKeyPolicy, InstanceFilter, Inventory, InventoryError, InventoryFormat, LinodeClient,
    LinodeConfig, LinodeError, ProvisionError, ProvisionSpec, Provisioned, Provisioner,
    RemoteExecutor, SpecError, Ssh2Connector, load_authorized_keys,
};

use cli::{BootstrapArg, Cli, Command, CreateCommand, ListCommand};

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("Linode client error: {0}")]
    Client(#[from] LinodeError),
    #[error(transparent)]
    Keys(#[from] AuthorizedKeysError),
    #[error("invalid instance specification: {0}")]
    Spec(#[from] SpecError),
    #[error("invalid --format: {0}")]
    Format(#[from] FormatError),
    #[error("provisioning failed: {0}")]
    Provision(Box<ProvisionError<LinodeError>>),
    #[error("listing failed: {0}")]
    Inventory(Box<InventoryError<LinodeError>>),
    #[error("failed to write output: {0}")]
    Output(String),
}

impl From<ProvisionError<LinodeError>> for CliError {
    fn from(err: ProvisionError<LinodeError>) -> Self {
        Self::Provision(Box::new(err))
    }
}

impl From<InventoryError<LinodeError>> for CliError {
    fn from(err: InventoryError<LinodeError>) -> Self {
        Self::Inventory(Box::new(err))
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());

    let exit_code = match dispatch(cli.command, cli.config.as_deref(), &cancel).await {
        Ok(()) => 0,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

fn init_tracing(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

fn cancel_on_ctrl_c(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; cancelling");
            cancel.cancel();
        }
    });
}

async fn dispatch(
    command: Command,
    config_path: Option<&str>,
    cancel: &CancellationToken,
) -> Result<(), CliError> {
    match command {
        Command::Create(args) => create_command(args, config_path, cancel).await,
        Command::List(args) => list_command(args, config_path).await,
    }
}

fn load_config(config_path: Option<&str>) -> Result<LinodeConfig, CliError> {
    let config = LinodeConfig::load_with_path(config_path)?;
    config.validate()?;
    Ok(config)
}

async fn create_command(
    args: CreateCommand,
    config_path: Option<&str>,
    cancel: &CancellationToken,
) -> Result<(), CliError> {
    let config = load_config(config_path)?;
    let spec = provision_spec(&args, &config)?;
    let client = LinodeClient::from_config(&config)?;

    let mut executor = RemoteExecutor::new(Ssh2Connector::default())
        .with_dial_policy(config.dial_policy())
        .with_script_timeout(config.script_timeout());
    if let Some(fingerprint) = args.pin_host_key {
        executor = executor.with_host_key_policy(HostKeyPolicy::Pinned(fingerprint));
    }
    let provisioner = Provisioner::new(client)
        .with_executor(executor)
        .with_poll_interval(config.poll_interval())
        .with_wait_timeout(config.wait_timeout());

    let provisioned = provisioner.create(&spec, cancel).await?;
    write_summary(io::stdout(), &provisioned).map_err(|err| CliError::Output(err.to_string()))
}

async fn list_command(args: ListCommand, config_path: Option<&str>) -> Result<(), CliError> {
    let format: InventoryFormat = args.format.parse()?;
    let config = load_config(config_path)?;
    let inventory = Inventory::new(LinodeClient::from_config(&config)?);
    let rendered = inventory
        .render(&InstanceFilter::new(args.region, args.tag), &format)
        .await?;
    io::stdout()
        .write_all(rendered.as_bytes())
        .map_err(|err| CliError::Output(err.to_string()))
}

const fn bootstrap_mode(arg: BootstrapArg) -> BootstrapMode {
    match arg {
        BootstrapArg::Remote => BootstrapMode::Remote,
        BootstrapArg::Payload => BootstrapMode::Payload,
        BootstrapArg::None => BootstrapMode::None,
    }
}

/// Merges CLI arguments over configured defaults.
fn provision_spec(args: &CreateCommand, config: &LinodeConfig) -> Result<ProvisionSpec, CliError> {
    let mut keys = args.authorized_keys.clone();
    if let Some(path) = args.authorized_keys_file.as_deref() {
        keys.extend(load_authorized_keys(path)?);
    }
    let policy = if args.delete_on_bootstrap_failure {
        BootstrapFailurePolicy::DeleteInstance
    } else {
        BootstrapFailurePolicy::KeepInstance
    };

    let builder = ProvisionSpec::builder()
        .label(args.label.as_str())
        .region(args.region.as_ref().unwrap_or(&config.default_region).as_str())
        .instance_type(
            args.instance_type
                .as_ref()
                .unwrap_or(&config.default_type)
                .as_str(),
        )
        .image(args.image.as_ref().unwrap_or(&config.default_image).as_str())
        .login(args.login.as_ref().unwrap_or(&config.default_login).as_str())
        .authorized_keys(keys)
        .bootstrap(bootstrap_mode(args.bootstrap))
        .on_bootstrap_failure(policy);
    let spec = args
        .tags
        .iter()
        .fold(builder, |acc, tag| acc.tag(tag.as_str()))
        .build()?;
    Ok(spec)
}

fn write_summary(mut target: impl Write, provisioned: &Provisioned) -> io::Result<()> {
    let instance = &provisioned.instance;
    writeln!(
        target,
        "instance {} ({}) in {}: {}",
        instance.id, instance.label, instance.region, provisioned.state
    )?;
    if let Some(address) = instance.primary_public_ipv4() {
        writeln!(target, "public IPv4: {address}")?;
    }
    if let Some(fingerprint) = &provisioned.host_key_fingerprint {
        writeln!(target, "host key: {fingerprint}")?;
    }
    Ok(())
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "error: {err}").ok();
}

#[cfg(test)]
#[path = "main_tests.rs"]
mod tests;
