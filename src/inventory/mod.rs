//! Inventory of existing instances.
//!
//! [`Inventory`] lists instances and IP addresses through a [`CloudApi`] and
//! renders them with [`render_inventory`], either as an aligned table or as
//! an Ansible INI inventory grouped by region and tag.

mod format;
mod render;

use thiserror::Error;
use tracing::debug;

use crate::cloud::{CloudApi, Instance, InstanceFilter, IpAddress};

pub use format::{
    ANSIBLE_SELECTOR, AnsibleOptions, FormatError, InventoryFormat, USE_IPV6, USE_PRIVATE_IP,
};
pub use render::{
    ANSIBLE_TAG, AddressesByInstance, InventoryGroup, group_hosts, render_inventory, sanitize,
};

/// Errors returned while building an inventory.
#[derive(Debug, Error)]
pub enum InventoryError<E: std::error::Error + 'static> {
    /// Listing instances failed.
    #[error("failed to list instances: {source}")]
    ListInstances {
        /// Cloud API error.
        #[source]
        source: E,
    },
    /// Listing IP addresses failed.
    #[error("failed to list IP addresses: {source}")]
    ListIpAddresses {
        /// Cloud API error.
        #[source]
        source: E,
    },
}

/// Groups address records by owning instance. Records without an owner are
/// dropped; per-instance order is preserved.
#[must_use]
pub fn group_addresses(records: Vec<IpAddress>) -> AddressesByInstance {
    let mut grouped = AddressesByInstance::new();
    for record in records {
        if let Some(owner) = record.instance_id {
            grouped.entry(owner).or_default().push(record);
        }
    }
    grouped
}

/// Builds inventories from a cloud API.
#[derive(Clone, Debug)]
pub struct Inventory<A> {
    api: A,
}

impl<A: CloudApi + Sync> Inventory<A> {
    /// Wraps a cloud API handle.
    #[must_use]
    pub const fn new(api: A) -> Self {
        Self { api }
    }

    /// The cloud API handle.
    #[must_use]
    pub const fn api(&self) -> &A {
        &self.api
    }

    /// Lists the instances matching `filter` together with their addresses.
    ///
    /// # Errors
    ///
    /// Returns [`InventoryError`] when either listing call fails.
    pub async fn collect(
        &self,
        filter: &InstanceFilter,
    ) -> Result<(Vec<Instance>, AddressesByInstance), InventoryError<A::Error>> {
        let instances = self
            .api
            .list_instances(filter)
            .await
            .map_err(|source| InventoryError::ListInstances { source })?;
        let records = self
            .api
            .list_ip_addresses()
            .await
            .map_err(|source| InventoryError::ListIpAddresses { source })?;
        debug!(
            instances = instances.len(),
            addresses = records.len(),
            region = filter.region.as_deref().unwrap_or("*"),
            tag = filter.tags.as_deref().unwrap_or("*"),
            "inventory listed"
        );
        Ok((instances, group_addresses(records)))
    }

    /// Lists and renders the instances matching `filter`.
    ///
    /// # Errors
    ///
    /// Returns [`InventoryError`] when either listing call fails.
    pub async fn render(
        &self,
        filter: &InstanceFilter,
        format: &InventoryFormat,
    ) -> Result<String, InventoryError<A::Error>> {
        let (instances, addresses) = self.collect(filter).await?;
        Ok(render_inventory(&instances, &addresses, format))
    }
}

#[cfg(test)]
mod tests;
