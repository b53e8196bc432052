//! Configuration loading via `ortho-config`.
//!
//! Values merge defaults, `linforge.toml` (an explicit path, else the usual
//! discovery search or `LINFORGE_CONFIG_PATH`), and `LINODE_*` environment
//! variables.

use std::ffi::OsString;
use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::linode::LINODE_API_BASE;
use crate::provision::{DEFAULT_IMAGE, DEFAULT_LOGIN, DEFAULT_REGION, DEFAULT_TYPE};
use crate::remote::{
    DEFAULT_BASE_DELAY, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_DELAY, DEFAULT_SCRIPT_TIMEOUT,
    DialPolicy,
};

/// Linode account and provisioning defaults.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "LINODE",
    discovery(
        app_name = "linforge",
        env_var = "LINFORGE_CONFIG_PATH",
        config_file_name = "linforge.toml",
        dotfile_name = ".linforge.toml",
        project_file_name = "linforge.toml"
    )
)]
pub struct LinodeConfig {
    /// Personal access token with read/write scope on Linodes, IPs and
    /// StackScripts. This value is required.
    pub personal_access_token: String,
    /// API endpoint. Defaults to the public v4 API.
    #[ortho_config(default = LINODE_API_BASE.to_owned())]
    pub api_url: String,
    /// Region used when `create` is given no `--region`.
    #[ortho_config(default = DEFAULT_REGION.to_owned())]
    pub default_region: String,
    /// Plan used when `create` is given no `--type`.
    #[ortho_config(default = DEFAULT_TYPE.to_owned())]
    pub default_type: String,
    /// Image used when `create` is given no `--image`.
    #[ortho_config(default = DEFAULT_IMAGE.to_owned())]
    pub default_image: String,
    /// Login user created on new instances.
    #[ortho_config(default = DEFAULT_LOGIN.to_owned())]
    pub default_login: String,
    /// Seconds between instance status polls.
    #[ortho_config(default = 5)]
    pub poll_interval_secs: u64,
    /// Seconds to wait for an instance to reach `running`.
    #[ortho_config(default = 300)]
    pub wait_timeout_secs: u64,
    /// SSH dial attempts before remote bootstrap gives up.
    #[ortho_config(default = 12)]
    pub ssh_max_attempts: u32,
    /// Delay before the second SSH dial, doubled on each further attempt.
    #[ortho_config(default = 1000)]
    pub ssh_base_delay_ms: u64,
    /// Upper bound on the delay between SSH dials.
    #[ortho_config(default = 16000)]
    pub ssh_max_delay_ms: u64,
    /// Seconds the remote bootstrap script may run before it is abandoned.
    #[ortho_config(default = 900)]
    pub ssh_script_timeout_secs: u64,
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
}

impl FieldMetadata {
    const fn new(description: &'static str, env_var: &'static str, toml_key: &'static str) -> Self {
        Self {
            description,
            env_var,
            toml_key,
        }
    }
}

impl LinodeConfig {
    fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
        if value.trim().is_empty() {
            return Err(ConfigError::MissingField(format!(
                "missing {}: set {} or add {} to linforge.toml",
                metadata.description, metadata.env_var, metadata.toml_key
            )));
        }
        Ok(())
    }

    fn require_positive(value: u64, metadata: &FieldMetadata) -> Result<(), ConfigError> {
        if value == 0 {
            return Err(ConfigError::InvalidValue(format!(
                "{} must be greater than zero: check {} or {} in linforge.toml",
                metadata.description, metadata.env_var, metadata.toml_key
            )));
        }
        Ok(())
    }

    /// Loads configuration without parsing CLI arguments. Values still merge
    /// defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_with_path(None)
    }

    /// Loads configuration, reading `config_path` instead of searching for
    /// `linforge.toml` when one is given. Environment variables still
    /// override file values.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when an explicit file is missing or
    /// the merge fails.
    pub fn load_with_path(config_path: Option<&str>) -> Result<Self, ConfigError> {
        let mut args = vec![OsString::from("linforge")];
        if let Some(path) = config_path {
            args.push(OsString::from("--config-path"));
            args.push(OsString::from(path));
        }
        Self::load_from_iter(args).map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Performs semantic validation. Error messages name the environment
    /// variable and configuration key that supply each value.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required field is empty
    /// and [`ConfigError::InvalidValue`] when a timing value is zero or the
    /// backoff bounds are inverted.
    pub fn validate(&self) -> Result<(), ConfigError> {
        Self::require_field(
            &self.personal_access_token,
            &FieldMetadata::new(
                "Linode personal access token",
                "LINODE_PERSONAL_ACCESS_TOKEN",
                "personal_access_token",
            ),
        )?;
        Self::require_field(
            &self.api_url,
            &FieldMetadata::new("Linode API URL", "LINODE_API_URL", "api_url"),
        )?;
        Self::require_field(
            &self.default_region,
            &FieldMetadata::new("default region", "LINODE_DEFAULT_REGION", "default_region"),
        )?;
        Self::require_field(
            &self.default_type,
            &FieldMetadata::new("default plan", "LINODE_DEFAULT_TYPE", "default_type"),
        )?;
        Self::require_field(
            &self.default_image,
            &FieldMetadata::new("default image", "LINODE_DEFAULT_IMAGE", "default_image"),
        )?;
        Self::require_field(
            &self.default_login,
            &FieldMetadata::new("default login", "LINODE_DEFAULT_LOGIN", "default_login"),
        )?;
        Self::require_positive(
            self.poll_interval_secs,
            &FieldMetadata::new(
                "poll interval",
                "LINODE_POLL_INTERVAL_SECS",
                "poll_interval_secs",
            ),
        )?;
        Self::require_positive(
            self.wait_timeout_secs,
            &FieldMetadata::new(
                "wait timeout",
                "LINODE_WAIT_TIMEOUT_SECS",
                "wait_timeout_secs",
            ),
        )?;
        Self::require_positive(
            u64::from(self.ssh_max_attempts),
            &FieldMetadata::new(
                "SSH dial attempts",
                "LINODE_SSH_MAX_ATTEMPTS",
                "ssh_max_attempts",
            ),
        )?;
        Self::require_positive(
            self.ssh_script_timeout_secs,
            &FieldMetadata::new(
                "bootstrap script timeout",
                "LINODE_SSH_SCRIPT_TIMEOUT_SECS",
                "ssh_script_timeout_secs",
            ),
        )?;
        if self.ssh_base_delay_ms > self.ssh_max_delay_ms {
            return Err(ConfigError::InvalidValue(String::from(
                "ssh_base_delay_ms must not exceed ssh_max_delay_ms: check \
                 LINODE_SSH_BASE_DELAY_MS and LINODE_SSH_MAX_DELAY_MS",
            )));
        }
        Ok(())
    }

    /// Interval between instance status polls.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Bound on waiting for an instance to run.
    #[must_use]
    pub const fn wait_timeout(&self) -> Duration {
        Duration::from_secs(self.wait_timeout_secs)
    }

    /// Bound on a single bootstrap script run.
    #[must_use]
    pub const fn script_timeout(&self) -> Duration {
        Duration::from_secs(self.ssh_script_timeout_secs)
    }

    /// SSH dial retry policy.
    #[must_use]
    pub const fn dial_policy(&self) -> DialPolicy {
        DialPolicy {
            max_attempts: self.ssh_max_attempts,
            base_delay: Duration::from_millis(self.ssh_base_delay_ms),
            max_delay: Duration::from_millis(self.ssh_max_delay_ms),
        }
    }
}

impl Default for LinodeConfig {
    /// Built-in defaults with no token.
    fn default() -> Self {
        Self {
            personal_access_token: String::new(),
            api_url: LINODE_API_BASE.to_owned(),
            default_region: DEFAULT_REGION.to_owned(),
            default_type: DEFAULT_TYPE.to_owned(),
            default_image: DEFAULT_IMAGE.to_owned(),
            default_login: DEFAULT_LOGIN.to_owned(),
            poll_interval_secs: 5,
            wait_timeout_secs: 300,
            ssh_max_attempts: DEFAULT_MAX_ATTEMPTS,
            ssh_base_delay_ms: duration_millis(DEFAULT_BASE_DELAY),
            ssh_max_delay_ms: duration_millis(DEFAULT_MAX_DELAY),
            ssh_script_timeout_secs: DEFAULT_SCRIPT_TIMEOUT.as_secs(),
        }
    }
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Indicates a configured value is out of range.
    #[error("invalid configuration value: {0}")]
    InvalidValue(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}
