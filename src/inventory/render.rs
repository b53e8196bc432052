//! Table and Ansible renderers.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use tabled::settings::{Padding, Style};
use tabled::{Table, Tabled};

use super::format::{AnsibleOptions, InventoryFormat};
use crate::cloud::{AddressFamily, Instance, InstanceId, IpAddress};

/// Tag that marks an instance as an Ansible host.
pub const ANSIBLE_TAG: &str = "ansible";

/// Addresses grouped by the instance they belong to.
pub type AddressesByInstance = BTreeMap<InstanceId, Vec<IpAddress>>;

/// Blank columns between table cells.
const COLUMN_GAP: usize = 2;

#[derive(Tabled)]
struct InstanceRow {
    #[tabled(rename = "ID")]
    id: InstanceId,
    #[tabled(rename = "LABEL")]
    label: String,
    #[tabled(rename = "REGION")]
    region: String,
    #[tabled(rename = "TYPE")]
    instance_type: String,
    #[tabled(rename = "IMAGE")]
    image: String,
    #[tabled(rename = "STATUS")]
    status: String,
    #[tabled(rename = "PUBLIC IP")]
    public_ip: String,
    #[tabled(rename = "PRIVATE IP")]
    private_ip: String,
    #[tabled(rename = "TAG")]
    tags: String,
}

impl InstanceRow {
    fn new(instance: &Instance, records: &[IpAddress]) -> Self {
        let public: Vec<&str> = records
            .iter()
            .filter(|record| record.public)
            .map(|record| record.address.as_str())
            .collect();
        let private: Vec<&str> = records
            .iter()
            .filter(|record| !record.public && record.family == AddressFamily::Ipv4)
            .map(|record| record.address.as_str())
            .collect();
        Self {
            id: instance.id,
            label: instance.label.clone(),
            region: instance.region.clone(),
            instance_type: instance.instance_type.clone(),
            image: instance.image.clone().unwrap_or_default(),
            status: instance.status.to_string(),
            public_ip: public.join(","),
            private_ip: private.join(","),
            tags: instance.tags.join(","),
        }
    }
}

/// A `[<name>:children]` block of the Ansible inventory.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct InventoryGroup {
    /// Sanitised group name.
    pub name: String,
    /// Sanitised host labels in first-seen order, without duplicates.
    pub members: Vec<String>,
}

/// Replaces every character outside `[A-Za-z0-9_]` with `_`.
#[must_use]
pub fn sanitize(name: &str) -> String {
    name.chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '_' {
                ch
            } else {
                '_'
            }
        })
        .collect()
}

/// Renders `instances` in the requested format.
///
/// Instances are rendered in the order given; `addresses` supplies the IP
/// records of each instance.
#[must_use]
pub fn render_inventory(
    instances: &[Instance],
    addresses: &AddressesByInstance,
    format: &InventoryFormat,
) -> String {
    match format {
        InventoryFormat::Table => render_table(instances, addresses),
        InventoryFormat::Ansible(options) => render_ansible(instances, addresses, *options),
    }
}

fn render_table(instances: &[Instance], addresses: &AddressesByInstance) -> String {
    let rows = instances.iter().map(|instance| {
        let records = addresses.get(&instance.id).map_or(&[][..], Vec::as_slice);
        InstanceRow::new(instance, records)
    });
    let mut table = Table::new(rows);
    table
        .with(Style::empty())
        .with(Padding::new(0, COLUMN_GAP, 0, 0));

    let mut out = String::new();
    for line in table.to_string().lines() {
        out.push_str(line.trim_end());
        out.push('\n');
    }
    out
}

fn select_address<'a>(records: &'a [IpAddress], options: AnsibleOptions) -> Option<&'a str> {
    records
        .iter()
        .find(|record| {
            if options.use_private_ip {
                record.family == AddressFamily::Ipv4 && !record.public
            } else if options.use_ipv6 {
                record.public && record.family == AddressFamily::Ipv6
            } else {
                record.public && record.family == AddressFamily::Ipv4
            }
        })
        .map(|record| record.address.as_str())
}

/// Collects the `:children` groups of the Ansible hosts among `instances`,
/// sorted by group name.
#[must_use]
pub fn group_hosts(instances: &[Instance], addresses: &AddressesByInstance) -> Vec<InventoryGroup> {
    let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for instance in ansible_hosts(instances, addresses) {
        let label = sanitize(&instance.label);
        let names = std::iter::once(instance.region.as_str()).chain(
            instance
                .tags
                .iter()
                .map(String::as_str)
                .filter(|tag| *tag != ANSIBLE_TAG),
        );
        for name in names {
            let members = groups.entry(sanitize(name)).or_default();
            if !members.contains(&label) {
                members.push(label.clone());
            }
        }
    }
    groups
        .into_iter()
        .map(|(name, members)| InventoryGroup { name, members })
        .collect()
}

fn ansible_hosts<'a>(
    instances: &'a [Instance],
    addresses: &'a AddressesByInstance,
) -> impl Iterator<Item = &'a Instance> {
    instances.iter().filter(|instance| {
        instance.tags.iter().any(|tag| tag == ANSIBLE_TAG)
            && addresses
                .get(&instance.id)
                .is_some_and(|records| !records.is_empty())
    })
}

fn render_ansible(
    instances: &[Instance],
    addresses: &AddressesByInstance,
    options: AnsibleOptions,
) -> String {
    let mut out = String::new();
    for instance in ansible_hosts(instances, addresses) {
        writeln!(out, "[{}]", sanitize(&instance.label)).ok();
        let records = addresses.get(&instance.id).map_or(&[][..], Vec::as_slice);
        if let Some(address) = select_address(records, options) {
            writeln!(out, "{address}").ok();
        }
        out.push('\n');
    }
    for group in group_hosts(instances, addresses) {
        writeln!(out, "[{}:children]", group.name).ok();
        for member in &group.members {
            writeln!(out, "{member}").ok();
        }
        out.push('\n');
    }
    out
}
