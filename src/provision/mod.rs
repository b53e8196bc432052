//! Instance provisioning.
//!
//! [`Provisioner::create`] runs the creation saga (instance, disk, boot
//! configuration, boot, wait for `running`) against a [`CloudApi`], then
//! optionally bootstraps the guest over SSH. Any failure once the instance
//! exists deletes it before the error is returned, except a failed remote
//! bootstrap, which follows the [`BootstrapFailurePolicy`] carried by the
//! [`ProvisionSpec`].

mod error;
mod spec;
mod state;
mod steps;

use std::io::{self, Write};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::bootstrap::BootstrapScript;
use crate::cloud::{CloudApi, CreatePayloadRequest, Image, Instance, PayloadId};
use crate::password::{PasswordGenerator, PasswordPolicy};
use crate::remote::{RemoteExecutor, RemoteTarget, ShellConnector, Ssh2Connector};
use crate::saga::{Saga, SagaFailure, SagaStep};

pub use error::{ProvisionError, StepError};
pub use spec::{
    BootstrapFailurePolicy, BootstrapMode, DEFAULT_IMAGE, DEFAULT_LOGIN, DEFAULT_REGION,
    DEFAULT_TYPE, ProvisionSpec, ProvisionSpecBuilder, SpecError,
};
pub use state::ProvisionState;

use steps::{
    BootInstance, CreateBootConfig, CreateDisk, CreateInstance, ProvisionContext, WaitUntilRunning,
};

/// Default interval between status polls.
pub const POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Default bound on waiting for an instance to run.
pub const WAIT_TIMEOUT: Duration = Duration::from_secs(300);

/// A successfully provisioned instance.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Provisioned {
    /// The running instance.
    pub instance: Instance,
    /// Final state: [`ProvisionState::Bootstrapped`] or [`ProvisionState::Done`].
    pub state: ProvisionState,
    /// Fingerprint of the host key accepted during remote bootstrap.
    pub host_key_fingerprint: Option<String>,
}

type StepBox<'c, A> =
    Box<dyn SagaStep<ProvisionContext<'c, A>, StepError<<A as CloudApi>::Error>>>;

/// Creates and bootstraps instances through a cloud API.
pub struct Provisioner<A, C = Ssh2Connector> {
    api: A,
    executor: RemoteExecutor<C>,
    password_policy: PasswordPolicy,
    poll_interval: Duration,
    wait_timeout: Duration,
}

impl<A: CloudApi + Sync> Provisioner<A> {
    /// Creates a provisioner that bootstraps over `ssh2` with default
    /// policies.
    #[must_use]
    pub fn new(api: A) -> Self {
        Self {
            api,
            executor: RemoteExecutor::new(Ssh2Connector::default()),
            password_policy: PasswordPolicy::default(),
            poll_interval: POLL_INTERVAL,
            wait_timeout: WAIT_TIMEOUT,
        }
    }
}

impl<A: CloudApi + Sync, C: ShellConnector> Provisioner<A, C> {
    /// Replaces the remote executor.
    #[must_use]
    pub fn with_executor<D: ShellConnector>(
        self,
        executor: RemoteExecutor<D>,
    ) -> Provisioner<A, D> {
        Provisioner {
            api: self.api,
            executor,
            password_policy: self.password_policy,
            poll_interval: self.poll_interval,
            wait_timeout: self.wait_timeout,
        }
    }

    /// Sets the interval between status polls.
    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets the bound on waiting for the instance to run.
    #[must_use]
    pub const fn with_wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = timeout;
        self
    }

    /// Sets the root password policy.
    #[must_use]
    pub const fn with_password_policy(mut self, policy: PasswordPolicy) -> Self {
        self.password_policy = policy;
        self
    }

    /// The cloud API handle.
    #[must_use]
    pub const fn api(&self) -> &A {
        &self.api
    }

    /// Provisions one instance, forwarding remote bootstrap output to the
    /// process's stdout and stderr.
    ///
    /// # Errors
    ///
    /// See [`Self::create_with_output`].
    pub async fn create(
        &self,
        spec: &ProvisionSpec,
        cancel: &CancellationToken,
    ) -> Result<Provisioned, ProvisionError<A::Error>> {
        self.create_with_output(spec, cancel, &mut io::stdout(), &mut io::stderr())
            .await
    }

    /// Provisions one instance, forwarding remote bootstrap output to the
    /// given writers.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::ImageLookup`], [`ProvisionError::Credential`],
    /// [`ProvisionError::Script`], or [`ProvisionError::Payload`] before
    /// anything is created; [`ProvisionError::Step`] after the instance was
    /// rolled back; and [`ProvisionError::Bootstrap`] when the guest could
    /// not be configured.
    pub async fn create_with_output<O: Write, E: Write>(
        &self,
        spec: &ProvisionSpec,
        cancel: &CancellationToken,
        stdout: &mut O,
        stderr: &mut E,
    ) -> Result<Provisioned, ProvisionError<A::Error>> {
        info!(
            label = %spec.label,
            region = %spec.region,
            image = %spec.image,
            bootstrap = %spec.bootstrap,
            "provisioning instance"
        );
        let image = self
            .api
            .get_image(&spec.image)
            .await
            .map_err(|source| ProvisionError::ImageLookup {
                image: spec.image.clone(),
                source,
            })?;
        let credential = Arc::new(PasswordGenerator::new(self.password_policy)?.generate()?);
        let script = BootstrapScript::render(&spec.bootstrap_spec()?);
        let payload = match spec.bootstrap {
            BootstrapMode::Payload => Some(self.register_payload(spec, &image, &script).await?),
            BootstrapMode::Remote | BootstrapMode::None => None,
        };

        let mut saga = Saga::new(ProvisionContext {
            api: &self.api,
            spec,
            image: &image,
            credential: credential.as_ref(),
            payload,
            cancel,
            poll_interval: self.poll_interval,
            wait_timeout: self.wait_timeout,
            require_public_ipv4: spec.bootstrap == BootstrapMode::Remote,
            state: ProvisionState::Start,
            instance: None,
            disk: None,
            config: None,
        });
        saga.context_mut().advance(ProvisionState::ImageResolved);

        let build_phase: Vec<StepBox<'_, A>> =
            vec![Box::new(CreateInstance), Box::new(CreateDisk)];
        let built = saga.run(build_phase).await;
        if let Some(payload_id) = payload {
            self.discard_payload(payload_id).await;
        }
        built.map_err(|failure| Self::step_failure(&mut saga, failure))?;

        let boot_phase: Vec<StepBox<'_, A>> = vec![
            Box::new(CreateBootConfig),
            Box::new(BootInstance),
            Box::new(WaitUntilRunning),
        ];
        saga.run(boot_phase)
            .await
            .map_err(|failure| Self::step_failure(&mut saga, failure))?;

        let Some(instance) = saga.context().instance.clone() else {
            return Err(Self::abort(&mut saga, StepError::OutOfOrder { missing: "instance" }).await);
        };

        if spec.bootstrap != BootstrapMode::Remote {
            saga.context_mut().advance(ProvisionState::Done);
            info!(instance_id = %instance.id, "instance running");
            return Ok(Provisioned {
                instance,
                state: ProvisionState::Done,
                host_key_fingerprint: None,
            });
        }

        let Some(address) = instance.primary_public_ipv4().map(IpAddr::V4) else {
            let missing = StepError::MissingAddress {
                instance_id: instance.id,
            };
            return Err(Self::abort(&mut saga, missing).await);
        };
        let outcome = self
            .executor
            .run(
                &RemoteTarget::root(address),
                &credential,
                &script,
                stdout,
                stderr,
                cancel,
            )
            .await;

        match outcome {
            Ok(remote) => {
                saga.context_mut().advance(ProvisionState::Bootstrapped);
                info!(
                    instance_id = %instance.id,
                    host_key = %remote.host_key_fingerprint,
                    "instance bootstrapped; pin this host key for later connections"
                );
                Ok(Provisioned {
                    instance,
                    state: ProvisionState::Bootstrapped,
                    host_key_fingerprint: Some(remote.host_key_fingerprint),
                })
            }
            Err(source) => {
                warn!(instance_id = %instance.id, error = %source, "remote bootstrap failed");
                let compensation_errors = match spec.on_bootstrap_failure {
                    BootstrapFailurePolicy::KeepInstance => Vec::new(),
                    BootstrapFailurePolicy::DeleteInstance => saga.rollback().await,
                };
                let rolled_back = spec.on_bootstrap_failure
                    == BootstrapFailurePolicy::DeleteInstance
                    && compensation_errors.is_empty();
                if rolled_back {
                    saga.context_mut().advance(ProvisionState::RolledBack);
                } else if !compensation_errors.is_empty() {
                    warn!(
                        instance_id = %instance.id,
                        failures = compensation_errors.len(),
                        "instance could not be deleted after the failed bootstrap"
                    );
                }
                Err(ProvisionError::Bootstrap {
                    instance_id: instance.id,
                    source,
                    rolled_back,
                    compensation_errors,
                })
            }
        }
    }

    async fn register_payload(
        &self,
        spec: &ProvisionSpec,
        image: &Image,
        script: &str,
    ) -> Result<PayloadId, ProvisionError<A::Error>> {
        let request = CreatePayloadRequest {
            label: format!("{}-bootstrap", spec.label),
            images: vec![image.id.clone()],
            is_public: false,
            script: script.to_owned(),
            description: format!("First-boot bootstrap for {}", spec.label),
        };
        let payload = self
            .api
            .create_payload(&request)
            .await
            .map_err(|source| ProvisionError::Payload { source })?;
        info!(payload_id = %payload.id, label = %payload.label, "bootstrap payload registered");
        Ok(payload.id)
    }

    async fn discard_payload(&self, payload_id: PayloadId) {
        match self.api.delete_payload(payload_id).await {
            Ok(()) => info!(%payload_id, "bootstrap payload deleted"),
            Err(err) => warn!(%payload_id, error = %err, "failed to delete bootstrap payload"),
        }
    }

    /// Rolls back a saga whose steps all succeeded but whose result is
    /// unusable.
    async fn abort(
        saga: &mut Saga<ProvisionContext<'_, A>, StepError<A::Error>>,
        error: StepError<A::Error>,
    ) -> ProvisionError<A::Error> {
        warn!(%error, "provisioned instance is unusable; rolling back");
        let compensation_errors = saga.rollback().await;
        Self::step_failure(
            saga,
            SagaFailure {
                step: "wait_until_running",
                error,
                compensation_errors,
            },
        )
    }

    fn step_failure(
        saga: &mut Saga<ProvisionContext<'_, A>, StepError<A::Error>>,
        failure: SagaFailure<StepError<A::Error>>,
    ) -> ProvisionError<A::Error> {
        let state = saga.context().state;
        let terminal = if saga.context().instance.is_some() {
            ProvisionState::RolledBack
        } else {
            ProvisionState::Failed
        };
        saga.context_mut().advance(terminal);
        ProvisionError::Step {
            step: failure.step,
            state,
            source: failure.error,
            compensation_errors: failure.compensation_errors,
        }
    }
}

#[cfg(test)]
mod tests;
