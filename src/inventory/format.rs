//! Output format selector for `linforge list`.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Prefix that selects the Ansible inventory format.
pub const ANSIBLE_SELECTOR: &str = "ansible";

/// Option that selects private IPv4 addresses for Ansible hosts.
pub const USE_PRIVATE_IP: &str = "use-private-ip";

/// Option that selects public IPv6 addresses for Ansible hosts.
pub const USE_IPV6: &str = "use-ipv6";

/// Errors raised while parsing a format selector.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum FormatError {
    /// The Ansible selector carried an option nobody understands.
    #[error("unknown ansible option `{option}` (expected `{USE_PRIVATE_IP}` or `{USE_IPV6}`)")]
    UnknownOption {
        /// The rejected option.
        option: String,
    },
}

/// Address selection switches for the Ansible format.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct AnsibleOptions {
    /// Use the private IPv4 address of each host.
    pub use_private_ip: bool,
    /// Use the public IPv6 address of each host. Ignored when
    /// `use_private_ip` is set.
    pub use_ipv6: bool,
}

/// How the inventory is rendered.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum InventoryFormat {
    /// Aligned columns, one row per instance.
    #[default]
    Table,
    /// Ansible INI inventory of hosts tagged `ansible`.
    Ansible(AnsibleOptions),
}

impl FromStr for InventoryFormat {
    type Err = FormatError;

    /// Parses `ansible[:opt1,opt2,...]`. Whitespace is ignored anywhere in
    /// the selector and anything without the `ansible` prefix selects the
    /// table.
    fn from_str(selector: &str) -> Result<Self, Self::Err> {
        let compact: String = selector.chars().filter(|ch| !ch.is_whitespace()).collect();
        let mut fields = compact.splitn(2, ':');
        if fields.next() != Some(ANSIBLE_SELECTOR) {
            return Ok(Self::Table);
        }

        let mut options = AnsibleOptions::default();
        for option in fields.next().unwrap_or_default().split(',') {
            match option {
                "" => {}
                USE_PRIVATE_IP => options.use_private_ip = true,
                USE_IPV6 => options.use_ipv6 = true,
                other => {
                    return Err(FormatError::UnknownOption {
                        option: other.to_owned(),
                    });
                }
            }
        }
        Ok(Self::Ansible(options))
    }
}

impl fmt::Display for InventoryFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Table => f.write_str("table"),
            Self::Ansible(options) => {
                f.write_str(ANSIBLE_SELECTOR)?;
                let selected: Vec<&str> = [
                    (options.use_private_ip, USE_PRIVATE_IP),
                    (options.use_ipv6, USE_IPV6),
                ]
                .into_iter()
                .filter_map(|(enabled, name)| enabled.then_some(name))
                .collect();
                if selected.is_empty() {
                    Ok(())
                } else {
                    write!(f, ":{}", selected.join(","))
                }
            }
        }
    }
}
