//! Saga steps of the creation sequence.
//!
//! Only [`CreateInstance`] has a compensation: deleting the instance also
//! deletes its disks and boot configurations, so later steps need none.

use std::time::Duration;

use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::error::StepError;
use super::spec::ProvisionSpec;
use super::state::ProvisionState;
use crate::cloud::{
    BootConfig, CloudApi, CreateBootConfigRequest, CreateDiskRequest, CreateInstanceRequest, Disk,
    Filesystem, Image, Instance, InstanceId, InstanceStatus, PayloadId,
};
use crate::password::Credential;
use crate::saga::{SagaStep, StepFuture};

/// Mutable state shared by the creation steps.
pub(super) struct ProvisionContext<'a, A: CloudApi> {
    pub(super) api: &'a A,
    pub(super) spec: &'a ProvisionSpec,
    pub(super) image: &'a Image,
    pub(super) credential: &'a Credential,
    pub(super) payload: Option<PayloadId>,
    pub(super) cancel: &'a CancellationToken,
    pub(super) poll_interval: Duration,
    pub(super) wait_timeout: Duration,
    pub(super) require_public_ipv4: bool,
    pub(super) state: ProvisionState,
    pub(super) instance: Option<Instance>,
    pub(super) disk: Option<Disk>,
    pub(super) config: Option<BootConfig>,
}

impl<A: CloudApi> ProvisionContext<'_, A> {
    pub(super) fn advance(&mut self, next: ProvisionState) {
        debug_assert!(
            self.state.can_advance_to(next),
            "illegal transition {} -> {next}",
            self.state
        );
        debug!(label = %self.spec.label, from = %self.state, to = %next, "provision state");
        self.state = next;
    }

    fn instance_id(&self) -> Result<InstanceId, StepError<A::Error>> {
        self.instance
            .as_ref()
            .map(|instance| instance.id)
            .ok_or(StepError::OutOfOrder { missing: "instance" })
    }
}

type Ctx<'c, A> = ProvisionContext<'c, A>;
type StepErr<A> = StepError<<A as CloudApi>::Error>;

/// Creates the instance, unbooted, with private networking.
pub(super) struct CreateInstance;

impl<'c, A: CloudApi + Sync> SagaStep<Ctx<'c, A>, StepErr<A>> for CreateInstance {
    fn name(&self) -> &'static str {
        "create_instance"
    }

    fn execute<'a>(&'a self, ctx: &'a mut Ctx<'c, A>) -> StepFuture<'a, StepErr<A>> {
        Box::pin(async move {
            let request = CreateInstanceRequest {
                region: ctx.spec.region.clone(),
                instance_type: ctx.spec.instance_type.clone(),
                label: ctx.spec.label.clone(),
                private_ip: true,
                booted: false,
                tags: ctx.spec.tags.clone(),
            };
            let instance = ctx
                .api
                .create_instance(&request)
                .await
                .map_err(StepError::Api)?;
            info!(instance_id = %instance.id, label = %instance.label, "instance created");
            ctx.instance = Some(instance);
            ctx.advance(ProvisionState::InstanceCreated);
            Ok(())
        })
    }

    fn compensate<'a>(&'a self, ctx: &'a Ctx<'c, A>) -> Option<StepFuture<'a, StepErr<A>>> {
        let instance_id = ctx.instance.as_ref()?.id;
        Some(Box::pin(async move {
            info!(%instance_id, "deleting instance");
            ctx.api
                .delete_instance(instance_id)
                .await
                .map_err(StepError::Api)
        }))
    }
}

/// Creates the root disk from the image with the generated credential.
pub(super) struct CreateDisk;

impl<'c, A: CloudApi + Sync> SagaStep<Ctx<'c, A>, StepErr<A>> for CreateDisk {
    fn name(&self) -> &'static str {
        "create_disk"
    }

    fn execute<'a>(&'a self, ctx: &'a mut Ctx<'c, A>) -> StepFuture<'a, StepErr<A>> {
        Box::pin(async move {
            let instance_id = ctx.instance_id()?;
            let size = ctx.instance.as_ref().map_or(0, |instance| instance.specs.disk);
            let request = CreateDiskRequest {
                label: format!("{} Disk", ctx.image.label),
                size,
                image: ctx.image.id.clone(),
                root_password: ctx.credential,
                filesystem: Filesystem::Ext4,
                payload: ctx.payload,
            };
            let disk = ctx
                .api
                .create_disk(instance_id, &request)
                .await
                .map_err(StepError::Api)?;
            debug!(%instance_id, disk_id = %disk.id, size = disk.size, "disk created");
            ctx.disk = Some(disk);
            ctx.advance(ProvisionState::DiskAttached);
            Ok(())
        })
    }
}

/// Creates a boot configuration that boots the root disk with GRUB 2.
pub(super) struct CreateBootConfig;

impl<'c, A: CloudApi + Sync> SagaStep<Ctx<'c, A>, StepErr<A>> for CreateBootConfig {
    fn name(&self) -> &'static str {
        "create_boot_config"
    }

    fn execute<'a>(&'a self, ctx: &'a mut Ctx<'c, A>) -> StepFuture<'a, StepErr<A>> {
        Box::pin(async move {
            let instance_id = ctx.instance_id()?;
            let disk_id = ctx
                .disk
                .as_ref()
                .map(|disk| disk.id)
                .ok_or(StepError::OutOfOrder { missing: "disk" })?;
            let request = CreateBootConfigRequest::grub2_root(
                format!("My {} Disk Profile", ctx.image.label),
                disk_id,
            );
            let config = ctx
                .api
                .create_boot_config(instance_id, &request)
                .await
                .map_err(StepError::Api)?;
            debug!(%instance_id, config_id = %config.id, "boot configuration created");
            ctx.config = Some(config);
            ctx.advance(ProvisionState::ConfigAttached);
            Ok(())
        })
    }
}

/// Boots the instance with the new configuration.
pub(super) struct BootInstance;

impl<'c, A: CloudApi + Sync> SagaStep<Ctx<'c, A>, StepErr<A>> for BootInstance {
    fn name(&self) -> &'static str {
        "boot_instance"
    }

    fn execute<'a>(&'a self, ctx: &'a mut Ctx<'c, A>) -> StepFuture<'a, StepErr<A>> {
        Box::pin(async move {
            let instance_id = ctx.instance_id()?;
            let config_id = ctx
                .config
                .as_ref()
                .map(|config| config.id)
                .ok_or(StepError::OutOfOrder {
                    missing: "boot configuration",
                })?;
            ctx.api
                .boot_instance(instance_id, config_id)
                .await
                .map_err(StepError::Api)?;
            info!(%instance_id, "boot requested");
            ctx.advance(ProvisionState::Booted);
            Ok(())
        })
    }
}

/// Polls until the provider reports the instance as running.
pub(super) struct WaitUntilRunning;

impl<'c, A: CloudApi + Sync> SagaStep<Ctx<'c, A>, StepErr<A>> for WaitUntilRunning {
    fn name(&self) -> &'static str {
        "wait_until_running"
    }

    fn execute<'a>(&'a self, ctx: &'a mut Ctx<'c, A>) -> StepFuture<'a, StepErr<A>> {
        Box::pin(async move {
            let instance_id = ctx.instance_id()?;
            let started = Instant::now();
            let deadline = started + ctx.wait_timeout;
            loop {
                if ctx.cancel.is_cancelled() {
                    return Err(StepError::Cancelled { instance_id });
                }
                let instance = ctx
                    .api
                    .get_instance(instance_id)
                    .await
                    .map_err(StepError::Api)?;
                debug!(%instance_id, status = %instance.status, "polled instance status");
                match instance.status {
                    InstanceStatus::Running => {
                        if ctx.require_public_ipv4 && instance.primary_public_ipv4().is_none() {
                            return Err(StepError::MissingAddress { instance_id });
                        }
                        ctx.instance = Some(instance);
                        ctx.advance(ProvisionState::Running);
                        return Ok(());
                    }
                    InstanceStatus::Failed => {
                        return Err(StepError::InstanceFailed { instance_id });
                    }
                    _ => {}
                }
                if Instant::now() >= deadline {
                    return Err(StepError::Timeout {
                        instance_id,
                        waited: started.elapsed(),
                    });
                }
                tokio::select! {
                    () = ctx.cancel.cancelled() => {
                        return Err(StepError::Cancelled { instance_id });
                    }
                    () = sleep(ctx.poll_interval) => {}
                }
            }
        })
    }
}
