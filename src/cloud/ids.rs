//! Newtypes for provider identifiers so instance, disk, config, and payload
//! ids cannot be swapped by accident.

use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! id_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize,
        )]
        #[serde(transparent)]
        pub struct $name(u64);

        impl $name {
            /// Wraps a raw provider identifier.
            #[must_use]
            pub const fn new(value: u64) -> Self {
                Self(value)
            }

            /// Returns the raw provider identifier.
            #[must_use]
            pub const fn get(self) -> u64 {
                self.0
            }
        }

        impl From<u64> for $name {
            fn from(value: u64) -> Self {
                Self(value)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }
    };
}

id_newtype!(
    /// Identifier of a compute instance.
    InstanceId
);
id_newtype!(
    /// Identifier of a disk owned by an instance.
    DiskId
);
id_newtype!(
    /// Identifier of a boot configuration owned by an instance.
    ConfigId
);
id_newtype!(
    /// Identifier of a registered provisioning payload (StackScript).
    PayloadId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_serialise_as_plain_numbers() {
        let id = InstanceId::new(42);
        assert_eq!(serde_json::to_string(&id).expect("serialise"), "42");
        let parsed: DiskId = serde_json::from_str("7").expect("deserialise");
        assert_eq!(parsed.get(), 7);
        assert_eq!(id.to_string(), "42");
    }
}
