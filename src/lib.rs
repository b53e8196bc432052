//! Core library for the `linforge` provisioning tool.
//!
//! The crate creates Linode instances through a compensating saga (instance,
//! disk, boot configuration, boot, wait for `running`), bootstraps the guest
//! with a generated shell script, and renders existing instances as a table
//! or an Ansible inventory. Provider access sits behind the
//! [`cloud::CloudApi`] trait so the core runs against scripted doubles in
//! tests.

pub mod authorized_keys;
pub mod bootstrap;
pub mod cloud;
pub mod config;
pub mod inventory;
pub mod linode;
pub mod password;
pub mod provision;
pub mod remote;
pub mod saga;
pub mod test_support;

pub use authorized_keys::{AuthorizedKeysError, load_authorized_keys};
pub use bootstrap::{BootstrapError, BootstrapScript, BootstrapSpec, render_bootstrap_script};
pub use cloud::{CloudApi, Instance, InstanceFilter, InstanceId, IpAddress};
pub use config::{ConfigError, LinodeConfig};
pub use inventory::{FormatError, Inventory, InventoryError, InventoryFormat, render_inventory};
pub use linode::{LinodeClient, LinodeError};
pub use password::{Credential, PasswordGenerator, PasswordPolicy};
pub use provision::{
    BootstrapFailurePolicy, BootstrapMode, ProvisionError, ProvisionSpec, ProvisionState,
    Provisioned, Provisioner, SpecError, StepError,
};
pub use remote::{DialPolicy, HostKeyPolicy, RemoteError, RemoteExecutor, Ssh2Connector};
