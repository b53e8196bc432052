//! Validated description of the instance to provision.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use crate::bootstrap::{BootstrapError, BootstrapSpec, validate_label, validate_login};

/// Default region slug.
pub const DEFAULT_REGION: &str = "us-west";

/// Default plan slug.
pub const DEFAULT_TYPE: &str = "g6-nanode-1";

/// Default image identifier.
pub const DEFAULT_IMAGE: &str = "linode/ubuntu18.04";

/// Default login user created on the guest.
pub const DEFAULT_LOGIN: &str = "login";

/// How the bootstrap script reaches the guest.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum BootstrapMode {
    /// Run the script over SSH once the instance is running.
    #[default]
    Remote,
    /// Register the script as a private provisioning payload executed by the
    /// provider on first boot.
    Payload,
    /// Leave the guest untouched.
    None,
}

impl fmt::Display for BootstrapMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Remote => "remote",
            Self::Payload => "payload",
            Self::None => "none",
        })
    }
}

impl FromStr for BootstrapMode {
    type Err = SpecError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "remote" => Ok(Self::Remote),
            "payload" => Ok(Self::Payload),
            "none" => Ok(Self::None),
            other => Err(SpecError::UnknownBootstrapMode(other.to_owned())),
        }
    }
}

/// What to do with the instance when remote bootstrap fails.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum BootstrapFailurePolicy {
    /// Report the failure and leave the running instance for inspection.
    #[default]
    KeepInstance,
    /// Delete the instance before reporting the failure.
    DeleteInstance,
}

/// Errors raised while building a [`ProvisionSpec`].
#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum SpecError {
    /// A required field is missing or blank.
    #[error("missing or empty field: {0}")]
    Missing(&'static str),
    /// No authorised key was supplied.
    #[error("at least one authorized key is required so the login user can sign in")]
    NoKeys,
    /// A tag is blank or contains whitespace.
    #[error("invalid tag `{0}`: tags must be non-empty and contain no whitespace")]
    InvalidTag(String),
    /// The bootstrap mode is not recognised.
    #[error("unknown bootstrap mode `{0}` (expected remote, payload or none)")]
    UnknownBootstrapMode(String),
    /// The label, login, or a key failed validation.
    #[error(transparent)]
    Bootstrap(#[from] BootstrapError),
}

/// Everything needed to provision and bootstrap one instance.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProvisionSpec {
    /// Instance label, also used as the guest hostname.
    pub label: String,
    /// Region slug.
    pub region: String,
    /// Plan slug.
    pub instance_type: String,
    /// Image identifier.
    pub image: String,
    /// Login user created on the guest.
    pub login: String,
    /// Public keys installed for the login user, in order.
    pub authorized_keys: Vec<String>,
    /// Tags attached to the instance.
    pub tags: Vec<String>,
    /// How the bootstrap script is delivered.
    pub bootstrap: BootstrapMode,
    /// What happens to the instance when remote bootstrap fails.
    pub on_bootstrap_failure: BootstrapFailurePolicy,
}

impl ProvisionSpec {
    /// Starts a builder pre-filled with the default region, type, image, and
    /// login.
    #[must_use]
    pub fn builder() -> ProvisionSpecBuilder {
        ProvisionSpecBuilder::new()
    }

    /// Validated bootstrap inputs for this spec.
    ///
    /// # Errors
    ///
    /// Returns [`BootstrapError`] when the label, login, or a key is invalid.
    pub fn bootstrap_spec(&self) -> Result<BootstrapSpec, BootstrapError> {
        BootstrapSpec::new(&self.label, &self.login, &self.authorized_keys)
    }
}

/// Builder for [`ProvisionSpec`] that trims and validates on `build`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProvisionSpecBuilder {
    label: String,
    region: String,
    instance_type: String,
    image: String,
    login: String,
    authorized_keys: Vec<String>,
    tags: Vec<String>,
    bootstrap: BootstrapMode,
    on_bootstrap_failure: BootstrapFailurePolicy,
}

impl Default for ProvisionSpecBuilder {
    fn default() -> Self {
        Self {
            label: String::new(),
            region: DEFAULT_REGION.to_owned(),
            instance_type: DEFAULT_TYPE.to_owned(),
            image: DEFAULT_IMAGE.to_owned(),
            login: DEFAULT_LOGIN.to_owned(),
            authorized_keys: Vec::new(),
            tags: Vec::new(),
            bootstrap: BootstrapMode::default(),
            on_bootstrap_failure: BootstrapFailurePolicy::default(),
        }
    }
}

impl ProvisionSpecBuilder {
    /// Creates a builder with defaults; the label must be set before build.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the label.
    #[must_use]
    pub fn label(mut self, value: impl Into<String>) -> Self {
        self.label = value.into();
        self
    }

    /// Sets the region.
    #[must_use]
    pub fn region(mut self, value: impl Into<String>) -> Self {
        self.region = value.into();
        self
    }

    /// Sets the plan.
    #[must_use]
    pub fn instance_type(mut self, value: impl Into<String>) -> Self {
        self.instance_type = value.into();
        self
    }

    /// Sets the image.
    #[must_use]
    pub fn image(mut self, value: impl Into<String>) -> Self {
        self.image = value.into();
        self
    }

    /// Sets the login user.
    #[must_use]
    pub fn login(mut self, value: impl Into<String>) -> Self {
        self.login = value.into();
        self
    }

    /// Appends one authorised key.
    #[must_use]
    pub fn authorized_key(mut self, value: impl Into<String>) -> Self {
        self.authorized_keys.push(value.into());
        self
    }

    /// Appends several authorised keys.
    #[must_use]
    pub fn authorized_keys(mut self, values: impl IntoIterator<Item = String>) -> Self {
        self.authorized_keys.extend(values);
        self
    }

    /// Appends one tag.
    #[must_use]
    pub fn tag(mut self, value: impl Into<String>) -> Self {
        self.tags.push(value.into());
        self
    }

    /// Sets the bootstrap mode.
    #[must_use]
    pub const fn bootstrap(mut self, mode: BootstrapMode) -> Self {
        self.bootstrap = mode;
        self
    }

    /// Sets the bootstrap failure policy.
    #[must_use]
    pub const fn on_bootstrap_failure(mut self, policy: BootstrapFailurePolicy) -> Self {
        self.on_bootstrap_failure = policy;
        self
    }

    /// Builds and validates the [`ProvisionSpec`], trimming string inputs.
    ///
    /// # Errors
    ///
    /// Returns [`SpecError`] when a field is blank, no key is supplied, a tag
    /// is malformed, or the label, login, or a key fails validation.
    pub fn build(self) -> Result<ProvisionSpec, SpecError> {
        let spec = ProvisionSpec {
            label: required("label", &self.label)?,
            region: required("region", &self.region)?,
            instance_type: required("instance_type", &self.instance_type)?,
            image: required("image", &self.image)?,
            login: required("login", &self.login)?,
            authorized_keys: self
                .authorized_keys
                .iter()
                .map(|key| key.trim().to_owned())
                .filter(|key| !key.is_empty())
                .collect(),
            tags: self
                .tags
                .iter()
                .map(|tag| tag.trim().to_owned())
                .collect(),
            bootstrap: self.bootstrap,
            on_bootstrap_failure: self.on_bootstrap_failure,
        };

        validate_label(&spec.label)?;
        validate_login(&spec.login)?;
        if let Some(tag) = spec
            .tags
            .iter()
            .find(|tag| tag.is_empty() || tag.chars().any(char::is_whitespace))
        {
            return Err(SpecError::InvalidTag(tag.clone()));
        }
        if spec.authorized_keys.is_empty() && spec.bootstrap != BootstrapMode::None {
            return Err(SpecError::NoKeys);
        }
        spec.bootstrap_spec()?;
        Ok(spec)
    }
}

fn required(field: &'static str, value: &str) -> Result<String, SpecError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(SpecError::Missing(field));
    }
    Ok(trimmed.to_owned())
}
