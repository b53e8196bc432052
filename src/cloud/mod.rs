//! Cloud API abstraction consumed by the provisioner and inventory builder.
//!
//! The trait mirrors the minimum set of provider operations the core needs.
//! [`crate::linode::LinodeClient`] implements it over the Linode REST API;
//! tests implement it with scripted doubles.

use std::future::Future;
use std::pin::Pin;

mod ids;
mod model;

pub use ids::{ConfigId, DiskId, InstanceId, PayloadId};
pub use model::{
    AddressFamily, BootConfig, BootHelpers, CreateBootConfigRequest, CreateDiskRequest,
    CreateInstanceRequest, CreatePayloadRequest, Device, Disk, Filesystem, GRUB2_KERNEL, Image,
    Instance, InstanceFilter, InstanceSpecs, InstanceStatus, IpAddress, PRIMARY_DEVICE_SLOT,
    ProvisioningPayload,
};

/// Future returned by cloud API operations.
pub type ApiFuture<'a, T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'a>>;

/// Operations required from a cloud provider.
pub trait CloudApi {
    /// Provider specific error type.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Resolves an image by identifier.
    fn get_image<'a>(&'a self, image_id: &'a str) -> ApiFuture<'a, Image, Self::Error>;

    /// Creates an instance.
    fn create_instance<'a>(
        &'a self,
        request: &'a CreateInstanceRequest,
    ) -> ApiFuture<'a, Instance, Self::Error>;

    /// Creates a disk on an existing instance.
    fn create_disk<'a>(
        &'a self,
        instance_id: InstanceId,
        request: &'a CreateDiskRequest<'a>,
    ) -> ApiFuture<'a, Disk, Self::Error>;

    /// Creates a boot configuration on an existing instance.
    fn create_boot_config<'a>(
        &'a self,
        instance_id: InstanceId,
        request: &'a CreateBootConfigRequest,
    ) -> ApiFuture<'a, BootConfig, Self::Error>;

    /// Boots an instance with the given configuration.
    fn boot_instance(
        &self,
        instance_id: InstanceId,
        config_id: ConfigId,
    ) -> ApiFuture<'_, (), Self::Error>;

    /// Reads an instance, typically to poll its status.
    fn get_instance(&self, instance_id: InstanceId) -> ApiFuture<'_, Instance, Self::Error>;

    /// Deletes an instance together with its disks and configurations.
    fn delete_instance(&self, instance_id: InstanceId) -> ApiFuture<'_, (), Self::Error>;

    /// Lists instances matching `filter`.
    fn list_instances<'a>(
        &'a self,
        filter: &'a InstanceFilter,
    ) -> ApiFuture<'a, Vec<Instance>, Self::Error>;

    /// Lists every IP address visible to the account.
    fn list_ip_addresses(&self) -> ApiFuture<'_, Vec<IpAddress>, Self::Error>;

    /// Registers a reusable provisioning payload.
    fn create_payload<'a>(
        &'a self,
        request: &'a CreatePayloadRequest,
    ) -> ApiFuture<'a, ProvisioningPayload, Self::Error>;

    /// Deletes a provisioning payload.
    fn delete_payload(&self, payload_id: PayloadId) -> ApiFuture<'_, (), Self::Error>;
}
