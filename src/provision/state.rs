//! Provisioning progress as a state machine.

use std::fmt;

/// How far a provisioning run got.
///
/// The happy path is `Start → ImageResolved → InstanceCreated →
/// DiskAttached → ConfigAttached → Booted → Running → {Bootstrapped | Done}`.
/// `RolledBack` follows any failure once an instance exists; `Failed` covers
/// failures before that point.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ProvisionState {
    /// Nothing has happened yet.
    Start,
    /// The source image exists.
    ImageResolved,
    /// The instance exists but has no disk.
    InstanceCreated,
    /// The root disk exists.
    DiskAttached,
    /// The boot configuration exists.
    ConfigAttached,
    /// The boot request was accepted.
    Booted,
    /// The provider reports the instance as running.
    Running,
    /// The guest was configured over SSH.
    Bootstrapped,
    /// Finished without remote bootstrap.
    Done,
    /// The instance was deleted after a failure.
    RolledBack,
    /// Failed before any instance existed.
    Failed,
}

impl ProvisionState {
    /// Returns `true` when moving to `next` is a legal transition.
    #[must_use]
    pub const fn can_advance_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Start, Self::ImageResolved | Self::Failed)
                | (Self::ImageResolved, Self::InstanceCreated | Self::Failed)
                | (Self::InstanceCreated, Self::DiskAttached | Self::RolledBack)
                | (Self::DiskAttached, Self::ConfigAttached | Self::RolledBack)
                | (Self::ConfigAttached, Self::Booted | Self::RolledBack)
                | (Self::Booted, Self::Running | Self::RolledBack)
                | (Self::Running, Self::Bootstrapped | Self::Done | Self::RolledBack)
        )
    }

    /// Returns `true` for states no transition leaves.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Bootstrapped | Self::Done | Self::RolledBack | Self::Failed
        )
    }
}

impl fmt::Display for ProvisionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Start => "start",
            Self::ImageResolved => "image_resolved",
            Self::InstanceCreated => "instance_created",
            Self::DiskAttached => "disk_attached",
            Self::ConfigAttached => "config_attached",
            Self::Booted => "booted",
            Self::Running => "running",
            Self::Bootstrapped => "bootstrapped",
            Self::Done => "done",
            Self::RolledBack => "rolled_back",
            Self::Failed => "failed",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(ProvisionState::Start, ProvisionState::ImageResolved)]
    #[case(ProvisionState::ImageResolved, ProvisionState::Failed)]
    #[case(ProvisionState::Booted, ProvisionState::RolledBack)]
    #[case(ProvisionState::Running, ProvisionState::Bootstrapped)]
    #[case(ProvisionState::Running, ProvisionState::Done)]
    fn legal_transitions(#[case] from: ProvisionState, #[case] to: ProvisionState) {
        assert!(from.can_advance_to(to));
    }

    #[rstest]
    #[case(ProvisionState::Start, ProvisionState::InstanceCreated)]
    #[case(ProvisionState::Start, ProvisionState::RolledBack)]
    #[case(ProvisionState::InstanceCreated, ProvisionState::Failed)]
    #[case(ProvisionState::Done, ProvisionState::RolledBack)]
    fn illegal_transitions(#[case] from: ProvisionState, #[case] to: ProvisionState) {
        assert!(!from.can_advance_to(to));
    }
}
