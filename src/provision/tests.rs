//! Unit tests for the provisioning saga.

use std::io;
use std::time::Duration;

use rstest::rstest;
use tokio_util::sync::CancellationToken;

use super::*;
use crate::cloud::{GRUB2_KERNEL, InstanceId, InstanceStatus, PRIMARY_DEVICE_SLOT};
use crate::remote::{DialPolicy, RemoteError};
use crate::test_support::{
    CloudOp, SAMPLE_KEY, ScriptedCloud, ScriptedCloudError, ScriptedConnector, ScriptedHost,
};

type TestProvisioner = Provisioner<ScriptedCloud, ScriptedConnector>;

const FIRST_ID: InstanceId = InstanceId::new(101);

fn spec(mode: BootstrapMode) -> ProvisionSpec {
    ProvisionSpec::builder()
        .label("web-1")
        .region("us-east")
        .authorized_key(SAMPLE_KEY)
        .tag("ansible")
        .bootstrap(mode)
        .build()
        .expect("valid spec")
}

fn provisioner(cloud: &ScriptedCloud, connector: &ScriptedConnector) -> TestProvisioner {
    let executor = RemoteExecutor::new(connector.clone()).with_dial_policy(DialPolicy {
        max_attempts: 2,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(1),
    });
    Provisioner::new(cloud.clone())
        .with_executor(executor)
        .with_poll_interval(Duration::from_millis(1))
        .with_wait_timeout(Duration::from_secs(5))
}

async fn create(
    provisioner: &TestProvisioner,
    spec: &ProvisionSpec,
) -> Result<Provisioned, ProvisionError<ScriptedCloudError>> {
    provisioner
        .create_with_output(spec, &CancellationToken::new(), &mut io::sink(), &mut io::sink())
        .await
}

#[tokio::test]
async fn remote_bootstrap_runs_the_full_sequence() {
    let cloud = ScriptedCloud::new();
    let connector = ScriptedConnector::new().reaching(ScriptedHost::healthy());
    let provisioned = create(&provisioner(&cloud, &connector), &spec(BootstrapMode::Remote))
        .await
        .expect("provisioning should succeed");

    assert_eq!(provisioned.state, ProvisionState::Bootstrapped);
    assert_eq!(provisioned.instance.id, FIRST_ID);
    assert_eq!(provisioned.instance.status, InstanceStatus::Running);
    assert_eq!(
        provisioned.host_key_fingerprint,
        Some(ScriptedHost::healthy().fingerprint)
    );
    assert_eq!(
        cloud.calls(),
        vec![
            CloudOp::GetImage,
            CloudOp::CreateInstance,
            CloudOp::CreateDisk,
            CloudOp::CreateBootConfig,
            CloudOp::BootInstance,
            CloudOp::GetInstance,
        ]
    );
    assert!(cloud.deleted_instances().is_empty());

    let request = cloud.instance_requests().pop().expect("instance request");
    assert!(request.private_ip);
    assert!(!request.booted);
    assert_eq!(request.region, "us-east");
    assert_eq!(request.tags, vec![String::from("ansible")]);

    let disk = cloud.disks().pop().expect("disk request");
    assert_eq!(disk.label, "Ubuntu 18.04 LTS Disk");
    assert_eq!(disk.size, 25_600);
    assert_eq!(disk.password_len, 40);
    assert_eq!(disk.payload, None);

    let config = cloud.boot_configs().pop().expect("boot config request");
    assert_eq!(config.label, "My Ubuntu 18.04 LTS Disk Profile");
    assert_eq!(config.kernel, GRUB2_KERNEL);
    assert!(config.devices.contains_key(PRIMARY_DEVICE_SLOT));

    assert_eq!(connector.logins(), vec![(String::from("root"), 40)]);
    let script = connector.scripts().pop().expect("script");
    assert!(script.contains("useradd -d /home/login -m -s /bin/bash login"));
}

#[rstest]
#[case(CloudOp::CreateDisk, "create_disk", ProvisionState::InstanceCreated)]
#[case(CloudOp::CreateBootConfig, "create_boot_config", ProvisionState::DiskAttached)]
#[case(CloudOp::BootInstance, "boot_instance", ProvisionState::ConfigAttached)]
#[case(CloudOp::GetInstance, "wait_until_running", ProvisionState::Booted)]
#[tokio::test]
async fn dependent_step_failure_deletes_instance_once(
    #[case] failing: CloudOp,
    #[case] expected_step: &str,
    #[case] expected_state: ProvisionState,
) {
    let cloud = ScriptedCloud::new().failing(failing, "boom");
    let connector = ScriptedConnector::new();
    let err = create(&provisioner(&cloud, &connector), &spec(BootstrapMode::Remote))
        .await
        .expect_err("provisioning should fail");

    let ProvisionError::Step {
        step,
        state,
        source,
        compensation_errors,
    } = err
    else {
        panic!("expected a step failure");
    };
    assert_eq!(step, expected_step);
    assert_eq!(state, expected_state);
    assert!(matches!(source, StepError::Api(ref api) if api.op == failing));
    assert!(compensation_errors.is_empty());
    assert_eq!(cloud.deleted_instances(), vec![FIRST_ID]);
    assert_eq!(cloud.count(CloudOp::DeleteInstance), 1);
    assert_eq!(connector.attempts(), 0);
}

#[tokio::test]
async fn instance_creation_failure_has_nothing_to_compensate() {
    let cloud = ScriptedCloud::new().failing(CloudOp::CreateInstance, "quota exceeded");
    let err = create(
        &provisioner(&cloud, &ScriptedConnector::new()),
        &spec(BootstrapMode::Remote),
    )
    .await
    .expect_err("provisioning should fail");

    assert!(matches!(
        err,
        ProvisionError::Step {
            step: "create_instance",
            state: ProvisionState::ImageResolved,
            ..
        }
    ));
    assert_eq!(cloud.count(CloudOp::DeleteInstance), 0);
}

#[tokio::test]
async fn image_lookup_failure_touches_nothing() {
    let cloud = ScriptedCloud::new().failing(CloudOp::GetImage, "no such image");
    let err = create(
        &provisioner(&cloud, &ScriptedConnector::new()),
        &spec(BootstrapMode::Remote),
    )
    .await
    .expect_err("provisioning should fail");

    assert!(matches!(err, ProvisionError::ImageLookup { ref image, .. } if image == DEFAULT_IMAGE));
    assert_eq!(cloud.calls(), vec![CloudOp::GetImage]);
}

#[tokio::test]
async fn compensation_failure_does_not_mask_the_original_error() {
    let cloud = ScriptedCloud::new()
        .failing(CloudOp::BootInstance, "boot refused")
        .failing(CloudOp::DeleteInstance, "delete refused");
    let err = create(
        &provisioner(&cloud, &ScriptedConnector::new()),
        &spec(BootstrapMode::Remote),
    )
    .await
    .expect_err("provisioning should fail");

    let message = err.to_string();
    let ProvisionError::Step {
        source,
        compensation_errors,
        ..
    } = err
    else {
        panic!("expected a step failure");
    };
    assert!(matches!(source, StepError::Api(ref api) if api.op == CloudOp::BootInstance));
    assert_eq!(compensation_errors.len(), 1);
    assert!(message.contains("boot refused"), "{message}");
    assert!(message.contains("rollback also failed"), "{message}");
}

#[tokio::test]
async fn payload_mode_registers_attaches_and_deletes_payload() {
    let cloud = ScriptedCloud::new();
    let connector = ScriptedConnector::new();
    let provisioned = create(&provisioner(&cloud, &connector), &spec(BootstrapMode::Payload))
        .await
        .expect("provisioning should succeed");

    assert_eq!(provisioned.state, ProvisionState::Done);
    assert_eq!(provisioned.host_key_fingerprint, None);

    let payload = cloud.payloads().pop().expect("payload request");
    assert_eq!(payload.label, "web-1-bootstrap");
    assert!(!payload.is_public);
    assert_eq!(payload.images, vec![String::from(DEFAULT_IMAGE)]);
    assert!(payload.script.starts_with("#!/bin/sh"));

    let disk = cloud.disks().pop().expect("disk request");
    let attached = disk.payload.expect("payload attached to disk");
    assert_eq!(cloud.deleted_payloads(), vec![attached]);
    assert_eq!(connector.attempts(), 0);
}

#[tokio::test]
async fn payload_is_deleted_when_disk_creation_fails() {
    let cloud = ScriptedCloud::new().failing(CloudOp::CreateDisk, "disk quota");
    create(
        &provisioner(&cloud, &ScriptedConnector::new()),
        &spec(BootstrapMode::Payload),
    )
    .await
    .expect_err("provisioning should fail");

    assert_eq!(cloud.count(CloudOp::DeletePayload), 1);
    assert_eq!(cloud.count(CloudOp::DeleteInstance), 1);
}

#[tokio::test]
async fn payload_registration_failure_creates_nothing() {
    let cloud = ScriptedCloud::new().failing(CloudOp::CreatePayload, "forbidden");
    let err = create(
        &provisioner(&cloud, &ScriptedConnector::new()),
        &spec(BootstrapMode::Payload),
    )
    .await
    .expect_err("provisioning should fail");

    assert!(matches!(err, ProvisionError::Payload { .. }));
    assert_eq!(cloud.calls(), vec![CloudOp::GetImage, CloudOp::CreatePayload]);
}

#[tokio::test]
async fn disabled_bootstrap_stops_once_running() {
    let cloud = ScriptedCloud::new().with_statuses([InstanceStatus::Booting]);
    let connector = ScriptedConnector::new();
    let provisioned = create(&provisioner(&cloud, &connector), &spec(BootstrapMode::None))
        .await
        .expect("provisioning should succeed");

    assert_eq!(provisioned.state, ProvisionState::Done);
    assert_eq!(cloud.count(CloudOp::GetInstance), 2);
    assert_eq!(cloud.count(CloudOp::CreatePayload), 0);
    assert_eq!(connector.attempts(), 0);
}

#[tokio::test]
async fn wait_loop_times_out_and_rolls_back() {
    let cloud = ScriptedCloud::new().with_statuses(vec![InstanceStatus::Booting; 10_000]);
    let provisioner = provisioner(&cloud, &ScriptedConnector::new())
        .with_wait_timeout(Duration::from_millis(20));
    let err = create(&provisioner, &spec(BootstrapMode::Remote))
        .await
        .expect_err("wait should time out");

    assert!(matches!(
        err,
        ProvisionError::Step {
            source: StepError::Timeout { .. },
            ..
        }
    ));
    assert_eq!(cloud.deleted_instances(), vec![FIRST_ID]);
}

#[tokio::test]
async fn failed_status_aborts_the_wait() {
    let cloud = ScriptedCloud::new().with_statuses([InstanceStatus::Booting, InstanceStatus::Failed]);
    let err = create(
        &provisioner(&cloud, &ScriptedConnector::new()),
        &spec(BootstrapMode::Remote),
    )
    .await
    .expect_err("failed status should abort");

    assert!(matches!(
        err,
        ProvisionError::Step {
            source: StepError::InstanceFailed { instance_id },
            ..
        } if instance_id == FIRST_ID
    ));
    assert_eq!(cloud.count(CloudOp::GetInstance), 2);
    assert_eq!(cloud.count(CloudOp::DeleteInstance), 1);
}

#[tokio::test]
async fn cancellation_during_wait_rolls_back() {
    let cloud = ScriptedCloud::new().with_statuses(vec![InstanceStatus::Booting; 10]);
    let provisioner = provisioner(&cloud, &ScriptedConnector::new());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = provisioner
        .create_with_output(
            &spec(BootstrapMode::Remote),
            &cancel,
            &mut io::sink(),
            &mut io::sink(),
        )
        .await
        .expect_err("cancelled wait should fail");

    assert!(matches!(
        err,
        ProvisionError::Step {
            source: StepError::Cancelled { .. },
            ..
        }
    ));
    assert_eq!(cloud.count(CloudOp::DeleteInstance), 1);
}

#[tokio::test]
async fn missing_public_address_rolls_back_before_dialling() {
    let cloud = ScriptedCloud::new().without_public_ipv4();
    let connector = ScriptedConnector::new();
    let err = create(&provisioner(&cloud, &connector), &spec(BootstrapMode::Remote))
        .await
        .expect_err("no address should fail");

    assert!(matches!(
        err,
        ProvisionError::Step {
            source: StepError::MissingAddress { .. },
            ..
        }
    ));
    assert_eq!(cloud.count(CloudOp::DeleteInstance), 1);
    assert_eq!(connector.attempts(), 0);
}

#[tokio::test]
async fn failed_bootstrap_keeps_instance_by_default() {
    let cloud = ScriptedCloud::new();
    let connector = ScriptedConnector::new().reaching(ScriptedHost::exiting_with(1));
    let err = create(&provisioner(&cloud, &connector), &spec(BootstrapMode::Remote))
        .await
        .expect_err("bootstrap should fail");

    assert!(matches!(
        err,
        ProvisionError::Bootstrap {
            source: RemoteError::ScriptFailed { status: 1 },
            rolled_back: false,
            ..
        }
    ));
    assert!(cloud.deleted_instances().is_empty());
}

#[tokio::test]
async fn failed_bootstrap_deletes_instance_when_asked() {
    let cloud = ScriptedCloud::new();
    let connector = ScriptedConnector::new();
    let mut delete_on_failure = spec(BootstrapMode::Remote);
    delete_on_failure.on_bootstrap_failure = BootstrapFailurePolicy::DeleteInstance;

    let err = create(&provisioner(&cloud, &connector), &delete_on_failure)
        .await
        .expect_err("bootstrap should fail");

    assert!(matches!(
        err,
        ProvisionError::Bootstrap {
            source: RemoteError::DialTimeout { attempts: 2, .. },
            rolled_back: true,
            ..
        }
    ));
    assert_eq!(cloud.deleted_instances(), vec![FIRST_ID]);
}

#[tokio::test]
async fn failed_deletion_after_bootstrap_is_reported() {
    let cloud = ScriptedCloud::new().failing(CloudOp::DeleteInstance, "delete refused");
    let connector = ScriptedConnector::new();
    let mut delete_on_failure = spec(BootstrapMode::Remote);
    delete_on_failure.on_bootstrap_failure = BootstrapFailurePolicy::DeleteInstance;

    let err = create(&provisioner(&cloud, &connector), &delete_on_failure)
        .await
        .expect_err("bootstrap should fail");

    let message = err.to_string();
    let ProvisionError::Bootstrap {
        source,
        rolled_back,
        compensation_errors,
        ..
    } = err
    else {
        panic!("expected a bootstrap failure");
    };
    assert!(matches!(source, RemoteError::DialTimeout { attempts: 2, .. }));
    assert!(!rolled_back, "a failed delete must not count as rolled back");
    assert_eq!(compensation_errors.len(), 1);
    assert!(message.contains("instance deletion failed"), "{message}");
    assert!(message.contains("delete refused"), "{message}");
    assert!(cloud.deleted_instances().is_empty());
}
