//! Test support utilities shared across unit and integration tests.
//!
//! [`ScriptedCloud`] stands in for the cloud API and [`ScriptedConnector`]
//! for the SSH transport. Both record every call so tests can assert on the
//! exact sequence of side effects.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::env;
use std::ffi::OsString;
use std::io::Write;
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex, MutexGuard as StdMutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{Mutex as AsyncMutex, MutexGuard};

use crate::cloud::{
    AddressFamily, ApiFuture, BootConfig, CloudApi, ConfigId, CreateBootConfigRequest,
    CreateDiskRequest, CreateInstanceRequest, CreatePayloadRequest, Disk, DiskId, Image,
    Instance, InstanceFilter, InstanceId, InstanceSpecs, InstanceStatus, IpAddress, PayloadId,
    ProvisioningPayload,
};
use crate::password::Credential;
use crate::remote::{DialError, RemoteError, RemoteTarget, ShellConnector, ShellSession};

/// A well-formed ed25519 public key for tests.
pub const SAMPLE_KEY: &str =
    "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA ops@example";

/// Public address assigned to instances created by [`ScriptedCloud`].
pub const SCRIPTED_PUBLIC_IPV4: Ipv4Addr = Ipv4Addr::new(203, 0, 113, 10);

/// Private address assigned to instances created by [`ScriptedCloud`].
pub const SCRIPTED_PRIVATE_IPV4: Ipv4Addr = Ipv4Addr::new(192, 168, 130, 10);

fn lock<T>(mutex: &Mutex<T>) -> StdMutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Cloud operations that [`ScriptedCloud`] can record and fail.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum CloudOp {
    /// `get_image`.
    GetImage,
    /// `create_instance`.
    CreateInstance,
    /// `create_disk`.
    CreateDisk,
    /// `create_boot_config`.
    CreateBootConfig,
    /// `boot_instance`.
    BootInstance,
    /// `get_instance`.
    GetInstance,
    /// `delete_instance`.
    DeleteInstance,
    /// `list_instances`.
    ListInstances,
    /// `list_ip_addresses`.
    ListIpAddresses,
    /// `create_payload`.
    CreatePayload,
    /// `delete_payload`.
    DeletePayload,
}

/// Error returned by [`ScriptedCloud`] for operations scripted to fail.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
#[error("scripted {op:?} failure: {message}")]
pub struct ScriptedCloudError {
    /// Operation that failed.
    pub op: CloudOp,
    /// Scripted message.
    pub message: String,
}

/// A disk request as seen by [`ScriptedCloud`], minus the secret.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RecordedDisk {
    /// Owning instance.
    pub instance_id: InstanceId,
    /// Disk label.
    pub label: String,
    /// Size in megabytes.
    pub size: u64,
    /// Source image.
    pub image: String,
    /// Length of the root password that was supplied.
    pub password_len: usize,
    /// Payload attached to the disk.
    pub payload: Option<PayloadId>,
}

#[derive(Debug)]
struct CloudState {
    calls: Vec<CloudOp>,
    failures: BTreeMap<CloudOp, String>,
    statuses: VecDeque<InstanceStatus>,
    image: Image,
    disk_size: u64,
    public_ipv4: bool,
    next_id: u64,
    current: Option<Instance>,
    instances: Vec<Instance>,
    ip_addresses: Vec<IpAddress>,
    instance_requests: Vec<CreateInstanceRequest>,
    disks: Vec<RecordedDisk>,
    boot_configs: Vec<CreateBootConfigRequest>,
    payloads: Vec<CreatePayloadRequest>,
    deleted_instances: Vec<InstanceId>,
    deleted_payloads: Vec<PayloadId>,
    filters: Vec<InstanceFilter>,
}

impl Default for CloudState {
    fn default() -> Self {
        Self {
            calls: Vec::new(),
            failures: BTreeMap::new(),
            statuses: VecDeque::new(),
            image: Image {
                id: String::from("linode/ubuntu18.04"),
                label: String::from("Ubuntu 18.04 LTS"),
            },
            disk_size: 25_600,
            public_ipv4: true,
            next_id: 100,
            current: None,
            instances: Vec::new(),
            ip_addresses: Vec::new(),
            instance_requests: Vec::new(),
            disks: Vec::new(),
            boot_configs: Vec::new(),
            payloads: Vec::new(),
            deleted_instances: Vec::new(),
            deleted_payloads: Vec::new(),
            filters: Vec::new(),
        }
    }
}

impl CloudState {
    fn enter(&mut self, op: CloudOp) -> Result<(), ScriptedCloudError> {
        self.calls.push(op);
        match self.failures.get(&op) {
            Some(message) => Err(ScriptedCloudError {
                op,
                message: message.clone(),
            }),
            None => Ok(()),
        }
    }

    fn allocate_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

/// In-memory [`CloudApi`] whose responses and failures are scripted.
///
/// Instances created through it get one public and one private IPv4 address
/// and a 25 600 MB disk allotment. `get_instance` reports the queued
/// statuses in order, then `running`.
#[derive(Clone, Debug, Default)]
pub struct ScriptedCloud {
    state: Arc<Mutex<CloudState>>,
}

impl ScriptedCloud {
    /// Creates a cloud with no scripted failures.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every call to `op` fail with `message`.
    #[must_use]
    pub fn failing(self, op: CloudOp, message: &str) -> Self {
        lock(&self.state).failures.insert(op, message.to_owned());
        self
    }

    /// Queues statuses reported by `get_instance` before `running`.
    #[must_use]
    pub fn with_statuses(self, statuses: impl IntoIterator<Item = InstanceStatus>) -> Self {
        lock(&self.state).statuses.extend(statuses);
        self
    }

    /// Creates instances without a public IPv4 address.
    #[must_use]
    pub fn without_public_ipv4(self) -> Self {
        lock(&self.state).public_ipv4 = false;
        self
    }

    /// Seeds the instances returned by `list_instances`.
    #[must_use]
    pub fn with_instances(self, instances: Vec<Instance>) -> Self {
        lock(&self.state).instances = instances;
        self
    }

    /// Seeds the addresses returned by `list_ip_addresses`.
    #[must_use]
    pub fn with_ip_addresses(self, addresses: Vec<IpAddress>) -> Self {
        lock(&self.state).ip_addresses = addresses;
        self
    }

    /// Every operation invoked so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<CloudOp> {
        lock(&self.state).calls.clone()
    }

    /// Number of times `op` was invoked.
    #[must_use]
    pub fn count(&self, op: CloudOp) -> usize {
        lock(&self.state)
            .calls
            .iter()
            .filter(|call| **call == op)
            .count()
    }

    /// Instance creation requests received.
    #[must_use]
    pub fn instance_requests(&self) -> Vec<CreateInstanceRequest> {
        lock(&self.state).instance_requests.clone()
    }

    /// Disk creation requests received.
    #[must_use]
    pub fn disks(&self) -> Vec<RecordedDisk> {
        lock(&self.state).disks.clone()
    }

    /// Boot configuration requests received.
    #[must_use]
    pub fn boot_configs(&self) -> Vec<CreateBootConfigRequest> {
        lock(&self.state).boot_configs.clone()
    }

    /// Payload registration requests received.
    #[must_use]
    pub fn payloads(&self) -> Vec<CreatePayloadRequest> {
        lock(&self.state).payloads.clone()
    }

    /// Instances deleted so far.
    #[must_use]
    pub fn deleted_instances(&self) -> Vec<InstanceId> {
        lock(&self.state).deleted_instances.clone()
    }

    /// Payloads deleted so far.
    #[must_use]
    pub fn deleted_payloads(&self) -> Vec<PayloadId> {
        lock(&self.state).deleted_payloads.clone()
    }

    /// Filters passed to `list_instances`.
    #[must_use]
    pub fn filters(&self) -> Vec<InstanceFilter> {
        lock(&self.state).filters.clone()
    }
}

impl CloudApi for ScriptedCloud {
    type Error = ScriptedCloudError;

    fn get_image<'a>(&'a self, image_id: &'a str) -> ApiFuture<'a, Image, Self::Error> {
        Box::pin(async move {
            let mut state = lock(&self.state);
            state.enter(CloudOp::GetImage)?;
            Ok(Image {
                id: image_id.to_owned(),
                label: state.image.label.clone(),
            })
        })
    }

    fn create_instance<'a>(
        &'a self,
        request: &'a CreateInstanceRequest,
    ) -> ApiFuture<'a, Instance, Self::Error> {
        Box::pin(async move {
            let mut state = lock(&self.state);
            state.enter(CloudOp::CreateInstance)?;
            state.instance_requests.push(request.clone());
            let mut ipv4 = Vec::new();
            if state.public_ipv4 {
                ipv4.push(SCRIPTED_PUBLIC_IPV4);
            }
            if request.private_ip {
                ipv4.push(SCRIPTED_PRIVATE_IPV4);
            }
            let instance = Instance {
                id: InstanceId::new(state.allocate_id()),
                label: request.label.clone(),
                region: request.region.clone(),
                instance_type: request.instance_type.clone(),
                image: None,
                status: InstanceStatus::Provisioning,
                ipv4,
                ipv6: None,
                tags: request.tags.clone(),
                specs: InstanceSpecs {
                    disk: state.disk_size,
                },
            };
            state.current = Some(instance.clone());
            Ok(instance)
        })
    }

    fn create_disk<'a>(
        &'a self,
        instance_id: InstanceId,
        request: &'a CreateDiskRequest<'a>,
    ) -> ApiFuture<'a, Disk, Self::Error> {
        Box::pin(async move {
            let mut state = lock(&self.state);
            state.enter(CloudOp::CreateDisk)?;
            state.disks.push(RecordedDisk {
                instance_id,
                label: request.label.clone(),
                size: request.size,
                image: request.image.clone(),
                password_len: request.root_password.expose().len(),
                payload: request.payload,
            });
            Ok(Disk {
                id: DiskId::new(state.allocate_id()),
                instance_id,
                label: request.label.clone(),
                size: request.size,
                filesystem: request.filesystem,
            })
        })
    }

    fn create_boot_config<'a>(
        &'a self,
        instance_id: InstanceId,
        request: &'a CreateBootConfigRequest,
    ) -> ApiFuture<'a, BootConfig, Self::Error> {
        Box::pin(async move {
            let mut state = lock(&self.state);
            state.enter(CloudOp::CreateBootConfig)?;
            state.boot_configs.push(request.clone());
            Ok(BootConfig {
                id: ConfigId::new(state.allocate_id()),
                instance_id,
                label: request.label.clone(),
                devices: request.devices.clone(),
                helpers: request.helpers,
                kernel: request.kernel.clone(),
            })
        })
    }

    fn boot_instance(
        &self,
        _instance_id: InstanceId,
        _config_id: ConfigId,
    ) -> ApiFuture<'_, (), Self::Error> {
        Box::pin(async move { lock(&self.state).enter(CloudOp::BootInstance) })
    }

    fn get_instance(&self, instance_id: InstanceId) -> ApiFuture<'_, Instance, Self::Error> {
        Box::pin(async move {
            let mut state = lock(&self.state);
            state.enter(CloudOp::GetInstance)?;
            let status = state
                .statuses
                .pop_front()
                .unwrap_or(InstanceStatus::Running);
            let mut instance = state
                .current
                .clone()
                .filter(|current| current.id == instance_id)
                .ok_or_else(|| ScriptedCloudError {
                    op: CloudOp::GetInstance,
                    message: format!("instance {instance_id} not found"),
                })?;
            instance.status = status;
            Ok(instance)
        })
    }

    fn delete_instance(&self, instance_id: InstanceId) -> ApiFuture<'_, (), Self::Error> {
        Box::pin(async move {
            let mut state = lock(&self.state);
            state.enter(CloudOp::DeleteInstance)?;
            state.deleted_instances.push(instance_id);
            Ok(())
        })
    }

    fn list_instances<'a>(
        &'a self,
        filter: &'a InstanceFilter,
    ) -> ApiFuture<'a, Vec<Instance>, Self::Error> {
        Box::pin(async move {
            let mut state = lock(&self.state);
            state.enter(CloudOp::ListInstances)?;
            state.filters.push(filter.clone());
            let selected = state
                .instances
                .iter()
                .filter(|instance| {
                    filter
                        .region
                        .as_ref()
                        .is_none_or(|region| *region == instance.region)
                        && filter
                            .tags
                            .as_ref()
                            .is_none_or(|tag| instance.tags.contains(tag))
                })
                .cloned()
                .collect();
            Ok(selected)
        })
    }

    fn list_ip_addresses(&self) -> ApiFuture<'_, Vec<IpAddress>, Self::Error> {
        Box::pin(async move {
            let mut state = lock(&self.state);
            state.enter(CloudOp::ListIpAddresses)?;
            Ok(state.ip_addresses.clone())
        })
    }

    fn create_payload<'a>(
        &'a self,
        request: &'a CreatePayloadRequest,
    ) -> ApiFuture<'a, ProvisioningPayload, Self::Error> {
        Box::pin(async move {
            let mut state = lock(&self.state);
            state.enter(CloudOp::CreatePayload)?;
            state.payloads.push(request.clone());
            Ok(ProvisioningPayload {
                id: PayloadId::new(state.allocate_id()),
                label: request.label.clone(),
            })
        })
    }

    fn delete_payload(&self, payload_id: PayloadId) -> ApiFuture<'_, (), Self::Error> {
        Box::pin(async move {
            let mut state = lock(&self.state);
            state.enter(CloudOp::DeletePayload)?;
            state.deleted_payloads.push(payload_id);
            Ok(())
        })
    }
}

/// Builds an instance record for inventory tests.
#[must_use]
pub fn instance(id: u64, label: &str, region: &str, tags: &[&str]) -> Instance {
    Instance {
        id: InstanceId::new(id),
        label: label.to_owned(),
        region: region.to_owned(),
        instance_type: String::from("g6-nanode-1"),
        image: Some(String::from("linode/ubuntu18.04")),
        status: InstanceStatus::Running,
        ipv4: Vec::new(),
        ipv6: None,
        tags: tags.iter().map(|tag| (*tag).to_owned()).collect(),
        specs: InstanceSpecs { disk: 25_600 },
    }
}

/// Builds an address record owned by instance `owner`.
#[must_use]
pub fn ip_address(owner: u64, address: &str, family: AddressFamily, public: bool) -> IpAddress {
    IpAddress {
        address: address.to_owned(),
        family,
        public,
        instance_id: Some(InstanceId::new(owner)),
    }
}

/// Behaviour of a host reached through [`ScriptedConnector`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ScriptedHost {
    /// Fingerprint the host presents.
    pub fingerprint: String,
    /// Whether password authentication is refused.
    pub reject_auth: bool,
    /// Exit status of the script.
    pub exit_status: i32,
    /// Text written to stdout while the script runs.
    pub stdout: String,
    /// Text written to stderr while the script runs.
    pub stderr: String,
    /// How long the script blocks after writing its output.
    pub script_delay: Duration,
}

impl ScriptedHost {
    /// A host that accepts the password and runs the script successfully.
    #[must_use]
    pub fn healthy() -> Self {
        Self {
            fingerprint: String::from("SHA256:c2NyaXB0ZWQtaG9zdC1rZXk"),
            reject_auth: false,
            exit_status: 0,
            stdout: String::from("bootstrap complete\n"),
            stderr: String::new(),
            script_delay: Duration::ZERO,
        }
    }

    /// A host whose script exits with `status`.
    #[must_use]
    pub fn exiting_with(status: i32) -> Self {
        Self {
            exit_status: status,
            ..Self::healthy()
        }
    }

    /// A host whose script blocks for `delay` before exiting.
    #[must_use]
    pub fn stalling(delay: Duration) -> Self {
        Self {
            script_delay: delay,
            ..Self::healthy()
        }
    }
}

#[derive(Debug, Default)]
struct ConnectorState {
    dials: VecDeque<Result<ScriptedHost, String>>,
    attempts: u32,
    targets: Vec<RemoteTarget>,
    logins: Vec<(String, usize)>,
    scripts: Vec<String>,
}

/// Scripted SSH transport that replays queued dial outcomes in FIFO order.
///
/// Once the queue is empty every dial is refused.
#[derive(Clone, Debug, Default)]
pub struct ScriptedConnector {
    state: Arc<Mutex<ConnectorState>>,
}

impl ScriptedConnector {
    /// Creates a connector with no queued outcomes.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues `count` refused dials.
    #[must_use]
    pub fn refusing(self, count: usize) -> Self {
        {
            let mut state = lock(&self.state);
            for _ in 0..count {
                state.dials.push_back(Err(String::from("connection refused")));
            }
        }
        self
    }

    /// Queues a successful dial to `host`.
    #[must_use]
    pub fn reaching(self, host: ScriptedHost) -> Self {
        lock(&self.state).dials.push_back(Ok(host));
        self
    }

    /// Number of dials attempted.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        lock(&self.state).attempts
    }

    /// Targets dialled, in order.
    #[must_use]
    pub fn targets(&self) -> Vec<RemoteTarget> {
        lock(&self.state).targets.clone()
    }

    /// `(user, password length)` pairs presented for authentication.
    #[must_use]
    pub fn logins(&self) -> Vec<(String, usize)> {
        lock(&self.state).logins.clone()
    }

    /// Scripts that were executed.
    #[must_use]
    pub fn scripts(&self) -> Vec<String> {
        lock(&self.state).scripts.clone()
    }
}

impl ShellConnector for ScriptedConnector {
    type Session = ScriptedSession;

    fn connect(&self, target: &RemoteTarget) -> Result<Self::Session, DialError> {
        let mut state = lock(&self.state);
        state.attempts += 1;
        state.targets.push(target.clone());
        match state.dials.pop_front() {
            Some(Ok(host)) => Ok(ScriptedSession {
                host,
                state: Arc::clone(&self.state),
            }),
            Some(Err(message)) => Err(DialError(message)),
            None => Err(DialError(String::from("connection refused"))),
        }
    }
}

/// Session produced by [`ScriptedConnector`].
#[derive(Debug)]
pub struct ScriptedSession {
    host: ScriptedHost,
    state: Arc<Mutex<ConnectorState>>,
}

impl ShellSession for ScriptedSession {
    fn host_key_fingerprint(&self) -> Result<String, RemoteError> {
        Ok(self.host.fingerprint.clone())
    }

    fn authenticate(&mut self, user: &str, credential: &Credential) -> Result<(), DialError> {
        lock(&self.state)
            .logins
            .push((user.to_owned(), credential.expose().len()));
        if self.host.reject_auth {
            return Err(DialError(String::from("authentication rejected")));
        }
        Ok(())
    }

    fn run_script(
        &mut self,
        script: &str,
        stdout: &mut dyn Write,
        stderr: &mut dyn Write,
    ) -> Result<i32, RemoteError> {
        lock(&self.state).scripts.push(script.to_owned());
        stdout
            .write_all(self.host.stdout.as_bytes())
            .and_then(|()| stderr.write_all(self.host.stderr.as_bytes()))
            .map_err(|err| RemoteError::Io(err.to_string()))?;
        if !self.host.script_delay.is_zero() {
            thread::sleep(self.host.script_delay);
        }
        Ok(self.host.exit_status)
    }
}

/// Global mutex used to serialise environment mutation in tests.
pub static ENV_LOCK: AsyncMutex<()> = AsyncMutex::const_new(());

/// Guard that holds the env mutex and restores variables on drop.
pub struct EnvGuard {
    previous: Vec<(String, Option<OsString>)>,
    _guard: MutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Sets multiple environment variables while holding a global mutex.
    pub async fn set_vars(pairs: &[(&str, &str)]) -> Self {
        Self::apply(pairs, &[]).await
    }

    /// Sets `pairs` and removes `cleared` while holding a global mutex.
    pub async fn apply(pairs: &[(&str, &str)], cleared: &[&str]) -> Self {
        debug_assert!(
            {
                let mut seen = BTreeSet::new();
                pairs
                    .iter()
                    .map(|(key, _)| key)
                    .chain(cleared)
                    .all(|key| seen.insert(*key))
            },
            "duplicate environment variable keys passed to EnvGuard"
        );

        let guard = ENV_LOCK.lock().await;
        let mut previous = Vec::with_capacity(pairs.len() + cleared.len());
        for (key, value) in pairs {
            previous.push(((*key).to_owned(), env::var_os(key)));
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`, preventing races.
            unsafe { env::set_var(key, value) };
        }
        for key in cleared {
            previous.push(((*key).to_owned(), env::var_os(key)));
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`, preventing races.
            unsafe { env::remove_var(key) };
        }

        Self {
            previous,
            _guard: guard,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, old) in &self.previous {
            // SAFETY: Environment mutation is serialised by holding `_guard`.
            unsafe {
                match old {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
        }
    }
}
