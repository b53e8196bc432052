//! Request and response bodies that differ from the shared cloud model.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::cloud::{
    BootConfig, BootHelpers, ConfigId, CreateDiskRequest, Device, Disk, DiskId, Filesystem,
    InstanceId, PayloadId,
};

/// One page of a list endpoint.
#[derive(Debug, Deserialize)]
pub(super) struct Page<T> {
    pub(super) data: Vec<T>,
    #[serde(default = "first_page")]
    pub(super) page: u32,
    #[serde(default = "first_page")]
    pub(super) pages: u32,
}

const fn first_page() -> u32 {
    1
}

/// Body of a non-success response.
#[derive(Debug, Default, Deserialize)]
pub(super) struct ErrorBody {
    #[serde(default)]
    pub(super) errors: Vec<ErrorReason>,
}

#[derive(Debug, Deserialize)]
pub(super) struct ErrorReason {
    pub(super) reason: String,
    #[serde(default)]
    pub(super) field: Option<String>,
}

impl ErrorBody {
    /// Flattens the error list into `field: reason` strings.
    pub(super) fn into_reasons(self) -> Vec<String> {
        self.errors
            .into_iter()
            .map(|error| match error.field {
                Some(field) => format!("{field}: {}", error.reason),
                None => error.reason,
            })
            .collect()
    }
}

/// `POST /linode/instances/{id}/disks` body.
#[derive(Debug, Serialize)]
pub(super) struct DiskBody<'a> {
    label: &'a str,
    size: u64,
    image: &'a str,
    root_pass: &'a str,
    filesystem: Filesystem,
    #[serde(skip_serializing_if = "Option::is_none")]
    stackscript_id: Option<PayloadId>,
}

impl<'a> From<&'a CreateDiskRequest<'a>> for DiskBody<'a> {
    fn from(request: &'a CreateDiskRequest<'a>) -> Self {
        Self {
            label: &request.label,
            size: request.size,
            image: &request.image,
            root_pass: request.root_password.expose(),
            filesystem: request.filesystem,
            stackscript_id: request.payload,
        }
    }
}

/// Disk as returned by the API.
#[derive(Debug, Deserialize)]
pub(super) struct DiskResponse {
    id: DiskId,
    label: String,
    size: u64,
    filesystem: Filesystem,
}

impl DiskResponse {
    pub(super) fn into_disk(self, instance_id: InstanceId) -> Disk {
        Disk {
            id: self.id,
            instance_id,
            label: self.label,
            size: self.size,
            filesystem: self.filesystem,
        }
    }
}

/// Boot configuration as returned by the API. Unused device slots are
/// reported as `null`.
#[derive(Debug, Deserialize)]
pub(super) struct ConfigResponse {
    id: ConfigId,
    label: String,
    #[serde(default)]
    devices: BTreeMap<String, Option<Device>>,
    #[serde(default)]
    helpers: BootHelpers,
    #[serde(default)]
    kernel: String,
}

impl ConfigResponse {
    pub(super) fn into_config(self, instance_id: InstanceId) -> BootConfig {
        BootConfig {
            id: self.id,
            instance_id,
            label: self.label,
            devices: self
                .devices
                .into_iter()
                .filter_map(|(slot, device)| {
                    device
                        .filter(|mapped| mapped.disk_id.is_some())
                        .map(|mapped| (slot, mapped))
                })
                .collect(),
            helpers: self.helpers,
            kernel: self.kernel,
        }
    }
}

/// `POST /linode/instances/{id}/boot` body.
#[derive(Debug, Serialize)]
pub(super) struct BootBody {
    pub(super) config_id: ConfigId,
}
