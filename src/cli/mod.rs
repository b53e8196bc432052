//! Command-line interface definitions for the `linforge` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page. It
//! must only depend on `clap`.

use clap::{Args, Parser, Subcommand, ValueEnum};

/// Top-level CLI for the `linforge` binary.
#[derive(Debug, Parser)]
#[command(
    name = "linforge",
    about = "Provision and bootstrap Linode instances and render Ansible inventories",
    arg_required_else_help = true
)]
pub(crate) struct Cli {
    /// Log debug output, including every API call and saga transition.
    #[arg(long, short, global = true)]
    pub(crate) verbose: bool,
    /// Read configuration from this file instead of searching for
    /// `linforge.toml`.
    #[arg(long, global = true, value_name = "PATH")]
    pub(crate) config: Option<String>,
    /// Subcommand to run.
    #[command(subcommand)]
    pub(crate) command: Command,
}

/// Subcommands of `linforge`.
#[derive(Debug, Subcommand)]
pub(crate) enum Command {
    /// Create, boot, and bootstrap one instance.
    #[command(name = "create", about = "Create, boot, and bootstrap one instance")]
    Create(CreateCommand),
    /// List instances as a table or an Ansible inventory.
    #[command(name = "list", about = "List instances as a table or an Ansible inventory")]
    List(ListCommand),
}

/// How the guest is configured after boot.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, ValueEnum)]
pub(crate) enum BootstrapArg {
    /// Run the bootstrap script over SSH as root.
    #[default]
    Remote,
    /// Register the script as a private StackScript run on first boot.
    Payload,
    /// Leave the guest untouched.
    None,
}

/// Arguments for `linforge create`.
#[derive(Debug, Args)]
pub(crate) struct CreateCommand {
    /// Label of the new instance; also used as its hostname.
    #[arg(value_name = "LABEL")]
    pub(crate) label: String,
    /// Region slug. Defaults to the configured `default_region`.
    #[arg(long, value_name = "REGION")]
    pub(crate) region: Option<String>,
    /// Plan slug. Defaults to the configured `default_type`.
    #[arg(long = "type", value_name = "TYPE")]
    pub(crate) instance_type: Option<String>,
    /// Image identifier. Defaults to the configured `default_image`.
    #[arg(long, value_name = "IMAGE")]
    pub(crate) image: Option<String>,
    /// Login user to create. Defaults to the configured `default_login`.
    #[arg(long, value_name = "LOGIN")]
    pub(crate) login: Option<String>,
    /// Public key to authorise for the login user. Repeatable.
    #[arg(long = "authorized-key", value_name = "KEY")]
    pub(crate) authorized_keys: Vec<String>,
    /// File of public keys to authorise, one per line (`~` is expanded).
    #[arg(long, value_name = "PATH")]
    pub(crate) authorized_keys_file: Option<String>,
    /// Tag to attach to the instance. Repeatable; tag `ansible` to include
    /// the instance in Ansible inventories.
    #[arg(long = "tag", value_name = "TAG")]
    pub(crate) tags: Vec<String>,
    /// How to configure the guest after boot.
    #[arg(long, value_enum, default_value_t = BootstrapArg::Remote)]
    pub(crate) bootstrap: BootstrapArg,
    /// Delete the instance when remote bootstrap fails instead of keeping it
    /// for inspection.
    #[arg(long)]
    pub(crate) delete_on_bootstrap_failure: bool,
    /// Expected SSH host key fingerprint (`SHA256:...`); the connection is
    /// refused when the host presents another key.
    #[arg(long, value_name = "FINGERPRINT")]
    pub(crate) pin_host_key: Option<String>,
}

/// Arguments for `linforge list`.
#[derive(Debug, Args)]
pub(crate) struct ListCommand {
    /// Only list instances in this region.
    #[arg(long, value_name = "REGION")]
    pub(crate) region: Option<String>,
    /// Only list instances carrying this tag.
    #[arg(long, value_name = "TAG")]
    pub(crate) tag: Option<String>,
    /// Output format: `table` (default) or `ansible[:use-private-ip,use-ipv6]`.
    #[arg(long, value_name = "FORMAT", default_value = "")]
    pub(crate) format: String,
}
