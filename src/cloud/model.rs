//! Resource and request types exchanged with the cloud API.
//!
//! Field names follow the Linode v4 wire format so the REST client can
//! (de)serialise most of them directly.

use std::collections::BTreeMap;
use std::fmt;
use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

use super::ids::{ConfigId, DiskId, InstanceId, PayloadId};
use crate::password::Credential;

/// Device slot the root disk is mapped to in a boot configuration.
pub const PRIMARY_DEVICE_SLOT: &str = "sda";

/// Kernel selector that boots the distribution's own GRUB 2 kernel.
pub const GRUB2_KERNEL: &str = "linode/grub2";

/// A bootable source image.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Image {
    /// Provider identifier, for example `linode/ubuntu18.04`.
    pub id: String,
    /// Human readable label, for example `Ubuntu 18.04 LTS`.
    pub label: String,
}

/// Lifecycle status reported for an instance.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    /// Resources are being allocated.
    Provisioning,
    /// The instance is booting.
    Booting,
    /// The instance is up.
    Running,
    /// The instance exists but is powered off.
    Offline,
    /// The provider gave up on the instance.
    Failed,
    /// Any other transitional provider state (migrating, rebooting, ...).
    #[serde(other)]
    Unknown,
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Provisioning => "provisioning",
            Self::Booting => "booting",
            Self::Running => "running",
            Self::Offline => "offline",
            Self::Failed => "failed",
            Self::Unknown => "unknown",
        };
        f.write_str(text)
    }
}

/// Hardware allotment of an instance.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct InstanceSpecs {
    /// Disk allotment in megabytes.
    #[serde(default)]
    pub disk: u64,
}

/// A compute instance.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Instance {
    /// Provider identifier.
    pub id: InstanceId,
    /// Display label.
    pub label: String,
    /// Region slug, for example `us-east`.
    pub region: String,
    /// Plan slug, for example `g6-nanode-1`.
    #[serde(rename = "type")]
    pub instance_type: String,
    /// Image the instance was deployed from, if any.
    #[serde(default)]
    pub image: Option<String>,
    /// Current lifecycle status.
    pub status: InstanceStatus,
    /// Public and private IPv4 addresses.
    #[serde(default)]
    pub ipv4: Vec<Ipv4Addr>,
    /// SLAAC IPv6 address, if assigned.
    #[serde(default)]
    pub ipv6: Option<String>,
    /// Tags attached to the instance.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Hardware allotment.
    #[serde(default)]
    pub specs: InstanceSpecs,
}

impl Instance {
    /// Returns the first publicly routable IPv4 address.
    #[must_use]
    pub fn primary_public_ipv4(&self) -> Option<Ipv4Addr> {
        self.ipv4.iter().copied().find(|addr| {
            !addr.is_private() && !addr.is_loopback() && !addr.is_link_local()
        })
    }
}

/// Filesystem used when formatting a disk.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Filesystem {
    /// ext4, used for root disks.
    Ext4,
    /// Swap space.
    Swap,
    /// Unformatted.
    Raw,
}

/// A disk owned by an instance.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Disk {
    /// Provider identifier.
    pub id: DiskId,
    /// Owning instance.
    pub instance_id: InstanceId,
    /// Display label.
    pub label: String,
    /// Size in megabytes.
    pub size: u64,
    /// Filesystem the disk was formatted with.
    pub filesystem: Filesystem,
}

/// Parameters for creating a root disk.
#[derive(Debug)]
pub struct CreateDiskRequest<'a> {
    /// Display label.
    pub label: String,
    /// Size in megabytes.
    pub size: u64,
    /// Source image identifier.
    pub image: String,
    /// Root password written into the image.
    pub root_password: &'a Credential,
    /// Filesystem to format with.
    pub filesystem: Filesystem,
    /// Provisioning payload executed on first boot, if any.
    pub payload: Option<PayloadId>,
}

/// A single device slot in a boot configuration.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Device {
    /// Disk mapped into the slot.
    pub disk_id: Option<DiskId>,
}

/// Boot-time helpers the provider can apply.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[expect(
    clippy::struct_excessive_bools,
    reason = "mirrors the provider's independent helper toggles"
)]
pub struct BootHelpers {
    /// Disable the `updatedb` cron job.
    pub updatedb_disabled: bool,
    /// Apply distribution-specific fixes.
    pub distro: bool,
    /// Generate module dependency files.
    pub modules_dep: bool,
    /// Configure networking automatically.
    pub network: bool,
    /// Mount `devtmpfs` at boot.
    pub devtmpfs_automount: bool,
}

impl BootHelpers {
    /// Every helper switched on.
    #[must_use]
    pub const fn all_enabled() -> Self {
        Self {
            updatedb_disabled: true,
            distro: true,
            modules_dep: true,
            network: true,
            devtmpfs_automount: true,
        }
    }
}

/// Parameters for creating a boot configuration.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct CreateBootConfigRequest {
    /// Display label.
    pub label: String,
    /// Device slot to disk mapping.
    pub devices: BTreeMap<String, Device>,
    /// Boot helpers.
    pub helpers: BootHelpers,
    /// Kernel selector.
    pub kernel: String,
}

impl CreateBootConfigRequest {
    /// Builds a configuration that boots `disk` from the primary slot with
    /// every helper enabled and the GRUB 2 kernel.
    #[must_use]
    pub fn grub2_root(label: impl Into<String>, disk: DiskId) -> Self {
        let mut devices = BTreeMap::new();
        devices.insert(
            PRIMARY_DEVICE_SLOT.to_owned(),
            Device {
                disk_id: Some(disk),
            },
        );
        Self {
            label: label.into(),
            devices,
            helpers: BootHelpers::all_enabled(),
            kernel: GRUB2_KERNEL.to_owned(),
        }
    }
}

/// A boot configuration owned by an instance.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BootConfig {
    /// Provider identifier.
    pub id: ConfigId,
    /// Owning instance.
    pub instance_id: InstanceId,
    /// Display label.
    pub label: String,
    /// Device slot to disk mapping.
    pub devices: BTreeMap<String, Device>,
    /// Boot helpers.
    pub helpers: BootHelpers,
    /// Kernel selector.
    pub kernel: String,
}

/// Parameters for creating an instance.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct CreateInstanceRequest {
    /// Region slug.
    pub region: String,
    /// Plan slug.
    #[serde(rename = "type")]
    pub instance_type: String,
    /// Display label.
    pub label: String,
    /// Whether to allocate a private IPv4 address.
    pub private_ip: bool,
    /// Whether to boot immediately after creation.
    pub booted: bool,
    /// Tags to attach.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

/// Parameters for registering a provisioning payload.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct CreatePayloadRequest {
    /// Display label.
    pub label: String,
    /// Images the payload may be deployed to.
    pub images: Vec<String>,
    /// Whether other accounts can see the payload.
    pub is_public: bool,
    /// Script body.
    pub script: String,
    /// Free-form description.
    pub description: String,
}

/// A registered provisioning payload.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ProvisioningPayload {
    /// Provider identifier.
    pub id: PayloadId,
    /// Display label.
    pub label: String,
}

/// Address family of an IP address record.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum AddressFamily {
    /// IPv4.
    #[serde(rename = "ipv4")]
    Ipv4,
    /// IPv6 (SLAAC or link-local).
    #[serde(rename = "ipv6")]
    Ipv6,
    /// IPv6 pools and ranges.
    #[serde(other)]
    Other,
}

/// An IP address record as listed by the networking API.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct IpAddress {
    /// Textual address.
    pub address: String,
    /// Address family.
    #[serde(rename = "type")]
    pub family: AddressFamily,
    /// Whether the address is publicly routable.
    pub public: bool,
    /// Instance the address is assigned to.
    #[serde(rename = "linode_id", default)]
    pub instance_id: Option<InstanceId>,
}

/// Listing filter, serialised as a JSON object for the `X-Filter` header.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct InstanceFilter {
    /// Only instances in this region.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    /// Only instances carrying this tag.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<String>,
}

impl InstanceFilter {
    /// Builds a filter, treating blank values as absent.
    #[must_use]
    pub fn new(region: Option<String>, tag: Option<String>) -> Self {
        let non_blank = |value: Option<String>| {
            value
                .map(|text| text.trim().to_owned())
                .filter(|text| !text.is_empty())
        };
        Self {
            region: non_blank(region),
            tags: non_blank(tag),
        }
    }

    /// Returns `true` when the filter selects everything.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.region.is_none() && self.tags.is_none()
    }
}
