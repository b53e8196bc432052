//! Errors raised while provisioning an instance.

use std::time::Duration;

use thiserror::Error;

use super::state::ProvisionState;
use crate::bootstrap::BootstrapError;
use crate::cloud::InstanceId;
use crate::password::PasswordError;
use crate::remote::RemoteError;
use crate::saga::CompensationError;

/// Failure of a single saga step.
#[derive(Debug, Error)]
pub enum StepError<E: std::error::Error + 'static> {
    /// The cloud API rejected the call.
    #[error("cloud API request failed: {0}")]
    Api(#[source] E),
    /// The instance did not reach `running` in time.
    #[error("instance {instance_id} did not reach running within {waited:?}")]
    Timeout {
        /// Instance being waited on.
        instance_id: InstanceId,
        /// How long the loop waited.
        waited: Duration,
    },
    /// The cancellation token fired while waiting.
    #[error("cancelled while waiting for instance {instance_id}")]
    Cancelled {
        /// Instance being waited on.
        instance_id: InstanceId,
    },
    /// The provider reported the instance as failed.
    #[error("instance {instance_id} entered the failed state")]
    InstanceFailed {
        /// Instance that failed.
        instance_id: InstanceId,
    },
    /// A step ran before the resource it depends on existed.
    #[error("saga step ran before its {missing} existed")]
    OutOfOrder {
        /// Resource that was expected.
        missing: &'static str,
    },
    /// The instance is running but has no address to bootstrap through.
    #[error("instance {instance_id} has no public IPv4 address")]
    MissingAddress {
        /// Instance without an address.
        instance_id: InstanceId,
    },
}

/// Errors returned by [`super::Provisioner::create`].
#[derive(Debug, Error)]
pub enum ProvisionError<E: std::error::Error + 'static> {
    /// The source image could not be resolved. Nothing was created.
    #[error("failed to resolve image `{image}`: {source}")]
    ImageLookup {
        /// Image identifier that was requested.
        image: String,
        /// Cloud API error.
        #[source]
        source: E,
    },
    /// The root password could not be generated. Nothing was created.
    #[error("failed to generate root password: {0}")]
    Credential(#[from] PasswordError),
    /// The bootstrap inputs were rejected. Nothing was created.
    #[error("invalid bootstrap input: {0}")]
    Script(#[from] BootstrapError),
    /// The bootstrap payload could not be registered. Nothing was created.
    #[error("failed to register bootstrap payload: {source}")]
    Payload {
        /// Cloud API error.
        #[source]
        source: E,
    },
    /// A saga step failed; completed steps were compensated.
    #[error(
        "step `{step}` failed after reaching {state}: {source}{note}",
        note = compensation_note(.compensation_errors)
    )]
    Step {
        /// Name of the failing step.
        step: &'static str,
        /// Last state reached before the failure.
        state: ProvisionState,
        /// Error returned by the step.
        #[source]
        source: StepError<E>,
        /// Errors raised while rolling back; the instance may still exist
        /// when this is non-empty.
        compensation_errors: Vec<CompensationError<StepError<E>>>,
    },
    /// The instance is running but remote bootstrap failed.
    #[error(
        "bootstrap of instance {instance_id} failed ({outcome}): {source}{note}",
        outcome = bootstrap_outcome(*.rolled_back, .compensation_errors.is_empty()),
        note = compensation_note(.compensation_errors)
    )]
    Bootstrap {
        /// Instance that was being bootstrapped.
        instance_id: InstanceId,
        /// Remote execution error.
        #[source]
        source: RemoteError,
        /// Whether the instance was deleted.
        rolled_back: bool,
        /// Errors raised while deleting the instance; the instance still
        /// exists when this is non-empty.
        compensation_errors: Vec<CompensationError<StepError<E>>>,
    },
}

fn compensation_note<E: std::error::Error>(errors: &[CompensationError<StepError<E>>]) -> String {
    if errors.is_empty() {
        return String::new();
    }
    let details = errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ");
    format!(" (rollback also failed: {details})")
}

const fn bootstrap_outcome(rolled_back: bool, deletion_clean: bool) -> &'static str {
    match (rolled_back, deletion_clean) {
        (true, _) => "instance deleted",
        (false, true) => "instance kept",
        (false, false) => "instance deletion failed",
    }
}
