//! Unit tests for inventory grouping and rendering.

use rstest::rstest;

use super::*;
use crate::cloud::{AddressFamily, InstanceFilter, InstanceId};
use crate::test_support::{CloudOp, ScriptedCloud, instance, ip_address};

fn addresses(records: Vec<IpAddress>) -> AddressesByInstance {
    group_addresses(records)
}

fn ansible() -> InventoryFormat {
    InventoryFormat::Ansible(AnsibleOptions::default())
}

#[test]
fn tagged_host_is_listed_under_its_region_and_tags() {
    let instances = vec![instance(1, "web-1", "us-east", &["ansible", "prod"])];
    let ips = addresses(vec![ip_address(1, "1.2.3.4", AddressFamily::Ipv4, true)]);

    let rendered = render_inventory(&instances, &ips, &ansible());

    assert_eq!(
        rendered,
        "[web_1]\n1.2.3.4\n\n[prod:children]\nweb_1\n\n[us_east:children]\nweb_1\n\n"
    );
}

#[test]
fn groups_are_sorted_regardless_of_input_order() {
    let instances = vec![
        instance(1, "db", "us-west", &["ansible", "zeta"]),
        instance(2, "app", "eu-central", &["alpha", "ansible"]),
        instance(3, "cache", "ap-south", &["ansible", "zeta"]),
    ];
    let ips = addresses(vec![
        ip_address(1, "10.0.0.1", AddressFamily::Ipv4, true),
        ip_address(2, "10.0.0.2", AddressFamily::Ipv4, true),
        ip_address(3, "10.0.0.3", AddressFamily::Ipv4, true),
    ]);

    let names: Vec<String> = group_hosts(&instances, &ips)
        .into_iter()
        .map(|group| group.name)
        .collect();

    assert_eq!(names, ["alpha", "ap_south", "eu_central", "us_west", "zeta"]);
}

#[test]
fn group_members_keep_first_seen_order_without_duplicates() {
    let instances = vec![
        instance(1, "b", "us-east", &["ansible", "web"]),
        instance(2, "a", "us-east", &["ansible", "web", "web"]),
    ];
    let ips = addresses(vec![
        ip_address(1, "10.0.0.1", AddressFamily::Ipv4, true),
        ip_address(2, "10.0.0.2", AddressFamily::Ipv4, true),
    ]);

    let groups = group_hosts(&instances, &ips);

    assert_eq!(
        groups,
        vec![
            InventoryGroup {
                name: String::from("us_east"),
                members: vec![String::from("b"), String::from("a")],
            },
            InventoryGroup {
                name: String::from("web"),
                members: vec![String::from("b"), String::from("a")],
            },
        ]
    );
}

#[test]
fn untagged_or_addressless_instances_are_skipped() {
    let instances = vec![
        instance(1, "plain", "us-east", &["prod"]),
        instance(2, "orphan", "us-east", &["ansible"]),
    ];
    let ips = addresses(vec![ip_address(1, "1.2.3.4", AddressFamily::Ipv4, true)]);

    assert_eq!(render_inventory(&instances, &ips, &ansible()), "");
}

#[rstest]
#[case(AnsibleOptions::default(), Some("198.51.100.4"))]
#[case(AnsibleOptions { use_private_ip: true, use_ipv6: false }, Some("192.168.1.4"))]
#[case(AnsibleOptions { use_private_ip: false, use_ipv6: true }, Some("2001:db8::4"))]
#[case(AnsibleOptions { use_private_ip: true, use_ipv6: true }, Some("192.168.1.4"))]
fn address_policy_picks_the_requested_family(
    #[case] options: AnsibleOptions,
    #[case] expected: Option<&str>,
) {
    let instances = vec![instance(4, "node", "us-east", &["ansible"])];
    let ips = addresses(vec![
        ip_address(4, "fe80::4", AddressFamily::Ipv6, false),
        ip_address(4, "192.168.1.4", AddressFamily::Ipv4, false),
        ip_address(4, "2001:db8::4", AddressFamily::Ipv6, true),
        ip_address(4, "198.51.100.4", AddressFamily::Ipv4, true),
    ]);

    let rendered = render_inventory(&instances, &ips, &InventoryFormat::Ansible(options));
    let address_line = rendered.lines().nth(1).filter(|line| !line.is_empty());

    assert_eq!(address_line, expected);
}

#[test]
fn missing_address_omits_only_the_address_line() {
    let instances = vec![instance(5, "v6-only", "us-east", &["ansible"])];
    let ips = addresses(vec![ip_address(5, "2001:db8::5", AddressFamily::Ipv6, true)]);

    let rendered = render_inventory(&instances, &ips, &ansible());

    assert_eq!(rendered, "[v6_only]\n\n[us_east:children]\nv6_only\n\n");
}

#[rstest]
#[case("web-1", "web_1")]
#[case("already_clean_01", "already_clean_01")]
#[case("us east/1.0", "us_east_1_0")]
#[case("café", "caf_")]
fn sanitize_maps_to_word_characters(#[case] raw: &str, #[case] expected: &str) {
    let once = sanitize(raw);
    assert_eq!(once, expected);
    assert_eq!(sanitize(&once), once);
    assert!(once.chars().all(|ch| ch.is_ascii_alphanumeric() || ch == '_'));
}

fn column_of(line: &str, token: &str) -> Option<usize> {
    line.find(token)
}

#[test]
fn table_lists_every_instance_with_aligned_columns() {
    let mut tagged = instance(1, "web-1", "us-east", &["ansible", "prod"]);
    tagged.image = None;
    let instances = vec![tagged, instance(22, "db", "eu-west", &[])];
    let ips = addresses(vec![
        ip_address(1, "1.2.3.4", AddressFamily::Ipv4, true),
        ip_address(1, "2001:db8::1", AddressFamily::Ipv6, true),
        ip_address(1, "192.168.0.1", AddressFamily::Ipv4, false),
    ]);

    let rendered = render_inventory(&instances, &ips, &InventoryFormat::Table);
    let lines: Vec<&str> = rendered.lines().collect();

    assert_eq!(lines.len(), 3, "{rendered}");
    let header = lines.first().copied().unwrap_or_default();
    let first = lines.get(1).copied().unwrap_or_default();
    let second = lines.get(2).copied().unwrap_or_default();
    assert!(header.starts_with("ID  LABEL  REGION   TYPE"), "{header}");
    for title in ["IMAGE", "STATUS", "PUBLIC IP", "PRIVATE IP", "TAG"] {
        assert!(header.contains(title), "missing {title}: {header}");
    }
    assert!(first.starts_with("1   web-1  us-east  g6-nanode-1"), "{first}");
    assert!(second.starts_with("22  db     eu-west  g6-nanode-1"), "{second}");
    assert_eq!(column_of(header, "STATUS"), column_of(first, "running"));
    assert_eq!(column_of(header, "STATUS"), column_of(second, "running"));
    assert_eq!(column_of(header, "PUBLIC IP"), column_of(first, "1.2.3.4,2001:db8::1"));
    assert_eq!(column_of(header, "PRIVATE IP"), column_of(first, "192.168.0.1"));
    assert!(first.ends_with("ansible,prod"), "{first}");
    assert!(second.ends_with("running"), "{second}");
    assert_eq!(column_of(header, "IMAGE"), column_of(second, "linode/ubuntu18.04"));
    assert!(lines.iter().all(|line| line == &line.trim_end()));
}

#[test]
fn empty_table_still_has_a_header() {
    let rendered = render_inventory(&[], &AddressesByInstance::new(), &InventoryFormat::Table);

    assert_eq!(rendered.lines().count(), 1);
    assert!(rendered.starts_with("ID  LABEL"), "{rendered}");
    assert!(rendered.ends_with("TAG\n"), "{rendered}");
}

#[tokio::test]
async fn render_lists_with_the_filter_and_groups_addresses() {
    let cloud = ScriptedCloud::new()
        .with_instances(vec![
            instance(1, "web-1", "us-east", &["ansible", "prod"]),
            instance(2, "web-2", "us-west", &["ansible", "prod"]),
        ])
        .with_ip_addresses(vec![
            ip_address(1, "1.2.3.4", AddressFamily::Ipv4, true),
            ip_address(2, "5.6.7.8", AddressFamily::Ipv4, true),
        ]);
    let inventory = Inventory::new(cloud.clone());
    let filter = InstanceFilter::new(Some(String::from("us-east")), None);

    let rendered = inventory
        .render(&filter, &ansible())
        .await
        .expect("inventory should render");

    assert!(rendered.contains("[web_1]\n1.2.3.4\n"));
    assert!(!rendered.contains("web_2"));
    assert_eq!(cloud.filters(), vec![filter]);
    assert_eq!(cloud.calls(), vec![CloudOp::ListInstances, CloudOp::ListIpAddresses]);
}

#[tokio::test]
async fn listing_failure_is_surfaced() {
    let cloud = ScriptedCloud::new().failing(CloudOp::ListIpAddresses, "throttled");
    let inventory = Inventory::new(cloud);

    let err = inventory
        .render(&InstanceFilter::default(), &InventoryFormat::Table)
        .await
        .expect_err("listing should fail");

    assert!(matches!(err, InventoryError::ListIpAddresses { .. }));
    assert!(err.to_string().contains("throttled"));
}

#[test]
fn unowned_addresses_are_dropped() {
    let mut floating = ip_address(9, "203.0.113.9", AddressFamily::Ipv4, true);
    floating.instance_id = None;
    let grouped = group_addresses(vec![
        floating,
        ip_address(3, "203.0.113.3", AddressFamily::Ipv4, true),
    ]);

    assert_eq!(grouped.keys().copied().collect::<Vec<_>>(), [InstanceId::new(3)]);
}
