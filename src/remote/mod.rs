//! Remote script execution over SSH.
//!
//! [`RemoteExecutor`] dials `root@<address>` with password authentication,
//! retrying transient failures with bounded exponential backoff, then runs a
//! script through a PTY shell and forwards its output to the caller. The
//! transport sits behind the [`ShellConnector`] and [`ShellSession`] traits;
//! [`Ssh2Connector`] is the production implementation.
//!
//! Transport calls block, so every dial attempt and the script run happen on
//! the blocking pool. The async side races them against the cancellation
//! token and, for the script, a deadline.

mod ssh;

use std::fmt;
use std::io::{self, Write};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc::{UnboundedSender, unbounded_channel};
use tokio::task;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::password::Credential;

pub use ssh::{Ssh2Connector, Ssh2Session};

/// Default SSH port.
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Default number of dial attempts.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 12;

/// Default delay before the second dial attempt.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Default upper bound on the delay between dial attempts.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(16);

/// Default bound on a single bootstrap script run.
pub const DEFAULT_SCRIPT_TIMEOUT: Duration = Duration::from_secs(900);

/// Errors raised while running a remote script.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum RemoteError {
    /// Every dial attempt failed.
    #[error("could not connect to {address} after {attempts} attempts: {last_error}")]
    DialTimeout {
        /// Address that was dialled.
        address: IpAddr,
        /// Number of attempts made.
        attempts: u32,
        /// Message from the final attempt.
        last_error: String,
    },
    /// The cancellation token fired.
    #[error("remote execution cancelled")]
    Cancelled,
    /// The script did not finish within the configured limit.
    #[error("bootstrap script did not finish within {limit:?}")]
    ScriptTimeout {
        /// Limit that was exceeded.
        limit: Duration,
    },
    /// The host presented a key that differs from the pinned fingerprint.
    #[error("host key mismatch: expected {expected}, got {actual}")]
    HostKeyMismatch {
        /// Pinned fingerprint.
        expected: String,
        /// Fingerprint the host presented.
        actual: String,
    },
    /// The SSH session could not be established or queried.
    #[error("ssh session error: {0}")]
    Session(String),
    /// The PTY request was refused.
    #[error("pty request failed: {0}")]
    Pty(String),
    /// The remote shell could not be started.
    #[error("failed to start remote shell: {0}")]
    Shell(String),
    /// Reading or writing the channel failed.
    #[error("remote i/o failed: {0}")]
    Io(String),
    /// The script exited with a non-zero status.
    #[error("bootstrap script exited with status {status}")]
    ScriptFailed {
        /// Exit status reported by the remote shell.
        status: i32,
    },
}

/// A transient connection failure; the dial loop retries these.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
#[error("{0}")]
pub struct DialError(pub String);

/// How the remote host's identity is checked.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub enum HostKeyPolicy {
    /// Trust whatever key a freshly booted host presents. The host has never
    /// been seen before, so there is nothing to compare against; the observed
    /// fingerprint is reported so callers can pin it afterwards.
    #[default]
    InsecureFirstBoot,
    /// Require the host key to match this `SHA256:<base64>` fingerprint.
    Pinned(String),
}

/// Bounded exponential backoff for the dial loop.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct DialPolicy {
    /// Maximum number of connection attempts.
    pub max_attempts: u32,
    /// Delay after the first failed attempt; doubles after each failure.
    pub base_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
}

impl Default for DialPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }
}

impl DialPolicy {
    /// Delay to wait after failed attempt number `attempt` (one-based).
    #[must_use]
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay
            .saturating_mul(1_u32 << exponent)
            .min(self.max_delay)
    }
}

/// Where to connect and as whom.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RemoteTarget {
    /// Host address.
    pub address: IpAddr,
    /// TCP port.
    pub port: u16,
    /// Login user.
    pub user: String,
}

impl RemoteTarget {
    /// Targets `root` on the default SSH port.
    #[must_use]
    pub fn root(address: IpAddr) -> Self {
        Self {
            address,
            port: DEFAULT_SSH_PORT,
            user: String::from("root"),
        }
    }
}

impl fmt::Display for RemoteTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.user, self.address, self.port)
    }
}

/// Result of a successful remote run.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RemoteOutcome {
    /// SHA-256 fingerprint of the host key that was accepted.
    pub host_key_fingerprint: String,
    /// Number of dial attempts it took to connect.
    pub attempts: u32,
}

/// Opens transport-level connections.
///
/// Connectors are cloned into blocking tasks, one per dial attempt.
pub trait ShellConnector: Clone + Send + 'static {
    /// Session type produced by a successful connection.
    type Session: ShellSession + Send + 'static;

    /// Connects and completes the transport handshake, without
    /// authenticating.
    ///
    /// # Errors
    ///
    /// Returns [`DialError`] for failures worth retrying.
    fn connect(&self, target: &RemoteTarget) -> Result<Self::Session, DialError>;
}

/// A connected transport session.
pub trait ShellSession {
    /// Fingerprint of the key the host presented during the handshake.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::Session`] when no host key is available.
    fn host_key_fingerprint(&self) -> Result<String, RemoteError>;

    /// Authenticates with a password.
    ///
    /// # Errors
    ///
    /// Returns [`DialError`] when the host refuses the credential; freshly
    /// booted hosts can do this briefly, so the dial loop retries.
    fn authenticate(&mut self, user: &str, credential: &Credential) -> Result<(), DialError>;

    /// Runs `script` in a PTY shell, forwarding output, and returns the exit
    /// status.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError`] when the channel, PTY, shell, or I/O fails.
    fn run_script(
        &mut self,
        script: &str,
        stdout: &mut dyn Write,
        stderr: &mut dyn Write,
    ) -> Result<i32, RemoteError>;
}

enum DialFailure {
    Transient(String),
    Fatal(RemoteError),
}

enum OutputChunk {
    Stdout(Vec<u8>),
    Stderr(Vec<u8>),
}

/// Forwards bytes written on the blocking pool to the async side.
struct ChunkWriter {
    sender: UnboundedSender<OutputChunk>,
    stderr: bool,
}

impl Write for ChunkWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let chunk = if self.stderr {
            OutputChunk::Stderr(buf.to_vec())
        } else {
            OutputChunk::Stdout(buf.to_vec())
        };
        self.sender
            .send(chunk)
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "output receiver closed"))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn forward<O: Write, E: Write>(
    chunk: &OutputChunk,
    stdout: &mut O,
    stderr: &mut E,
) -> Result<(), RemoteError> {
    match chunk {
        OutputChunk::Stdout(bytes) => stdout.write_all(bytes),
        OutputChunk::Stderr(bytes) => stderr.write_all(bytes),
    }
    .map_err(|err| RemoteError::Io(err.to_string()))
}

fn join_failure(err: &task::JoinError) -> RemoteError {
    RemoteError::Session(format!("blocking ssh task failed: {err}"))
}

/// Runs scripts on remote hosts.
#[derive(Clone, Debug)]
pub struct RemoteExecutor<C> {
    connector: C,
    dial: DialPolicy,
    host_keys: HostKeyPolicy,
    script_timeout: Duration,
}

impl<C: ShellConnector> RemoteExecutor<C> {
    /// Creates an executor with the default dial and host key policies.
    #[must_use]
    pub fn new(connector: C) -> Self {
        Self {
            connector,
            dial: DialPolicy::default(),
            host_keys: HostKeyPolicy::default(),
            script_timeout: DEFAULT_SCRIPT_TIMEOUT,
        }
    }

    /// Replaces the dial policy.
    #[must_use]
    pub const fn with_dial_policy(mut self, dial: DialPolicy) -> Self {
        self.dial = dial;
        self
    }

    /// Replaces the host key policy.
    #[must_use]
    pub fn with_host_key_policy(mut self, host_keys: HostKeyPolicy) -> Self {
        self.host_keys = host_keys;
        self
    }

    /// Bounds how long the script may run once connected.
    #[must_use]
    pub const fn with_script_timeout(mut self, limit: Duration) -> Self {
        self.script_timeout = limit;
        self
    }

    /// Returns the active dial policy.
    #[must_use]
    pub const fn dial_policy(&self) -> &DialPolicy {
        &self.dial
    }

    /// Returns the script time limit.
    #[must_use]
    pub const fn script_timeout(&self) -> Duration {
        self.script_timeout
    }

    /// Returns the underlying connector.
    #[must_use]
    pub const fn connector(&self) -> &C {
        &self.connector
    }

    /// Dials `target`, authenticates with `credential`, and runs `script`.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::DialTimeout`] once every attempt has failed,
    /// [`RemoteError::Cancelled`] when `cancel` fires at any point,
    /// [`RemoteError::HostKeyMismatch`] on a pinned key mismatch (never
    /// retried), [`RemoteError::ScriptTimeout`] when the script outlives the
    /// configured limit, and [`RemoteError::ScriptFailed`] on a non-zero
    /// exit.
    pub async fn run<O: Write, E: Write>(
        &self,
        target: &RemoteTarget,
        credential: &Arc<Credential>,
        script: &str,
        stdout: &mut O,
        stderr: &mut E,
        cancel: &CancellationToken,
    ) -> Result<RemoteOutcome, RemoteError> {
        let (session, fingerprint, attempts) = self.dial(target, credential, cancel).await?;
        info!(%target, %fingerprint, attempts, "connected; running bootstrap script");
        let status = self
            .execute(session, script, stdout, stderr, cancel)
            .await?;
        if status != 0 {
            return Err(RemoteError::ScriptFailed { status });
        }
        Ok(RemoteOutcome {
            host_key_fingerprint: fingerprint,
            attempts,
        })
    }

    async fn dial(
        &self,
        target: &RemoteTarget,
        credential: &Arc<Credential>,
        cancel: &CancellationToken,
    ) -> Result<(C::Session, String, u32), RemoteError> {
        let max_attempts = self.dial.max_attempts.max(1);
        let mut last_error = String::from("no attempt made");
        for attempt in 1..=max_attempts {
            if cancel.is_cancelled() {
                return Err(RemoteError::Cancelled);
            }
            debug!(%target, attempt, max_attempts, "dialling");
            match self.attempt(target, credential, cancel).await {
                Ok((session, fingerprint)) => return Ok((session, fingerprint, attempt)),
                Err(DialFailure::Fatal(err)) => return Err(err),
                Err(DialFailure::Transient(message)) => {
                    warn!(%target, attempt, error = %message, "dial attempt failed");
                    last_error = message;
                }
            }
            if attempt < max_attempts {
                tokio::select! {
                    () = cancel.cancelled() => return Err(RemoteError::Cancelled),
                    () = sleep(self.dial.delay_after(attempt)) => {}
                }
            }
        }
        Err(RemoteError::DialTimeout {
            address: target.address,
            attempts: max_attempts,
            last_error,
        })
    }

    async fn attempt(
        &self,
        target: &RemoteTarget,
        credential: &Arc<Credential>,
        cancel: &CancellationToken,
    ) -> Result<(C::Session, String), DialFailure> {
        let connector = self.connector.clone();
        let host_keys = self.host_keys.clone();
        let owned_target = target.clone();
        let owned_credential = Arc::clone(credential);
        let handle = task::spawn_blocking(move || {
            try_connect(&connector, &host_keys, &owned_target, &owned_credential)
        });
        tokio::select! {
            () = cancel.cancelled() => Err(DialFailure::Fatal(RemoteError::Cancelled)),
            joined = handle => match joined {
                Ok(result) => result,
                Err(err) => Err(DialFailure::Fatal(join_failure(&err))),
            },
        }
    }

    async fn execute<O: Write, E: Write>(
        &self,
        mut session: C::Session,
        script: &str,
        stdout: &mut O,
        stderr: &mut E,
        cancel: &CancellationToken,
    ) -> Result<i32, RemoteError> {
        let (sender, mut receiver) = unbounded_channel();
        let owned_script = script.to_owned();
        let mut handle = task::spawn_blocking(move || {
            let mut out = ChunkWriter {
                sender: sender.clone(),
                stderr: false,
            };
            let mut err = ChunkWriter {
                sender,
                stderr: true,
            };
            session.run_script(&owned_script, &mut out, &mut err)
        });
        let deadline = sleep(self.script_timeout);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    warn!("cancelled while the bootstrap script was running");
                    return Err(RemoteError::Cancelled);
                }
                () = &mut deadline => {
                    warn!(limit = ?self.script_timeout, "bootstrap script timed out");
                    return Err(RemoteError::ScriptTimeout { limit: self.script_timeout });
                }
                Some(chunk) = receiver.recv() => forward(&chunk, stdout, stderr)?,
                joined = &mut handle => {
                    let status = joined.map_err(|err| join_failure(&err))??;
                    while let Ok(chunk) = receiver.try_recv() {
                        forward(&chunk, stdout, stderr)?;
                    }
                    return Ok(status);
                }
            }
        }
    }
}

fn try_connect<C: ShellConnector>(
    connector: &C,
    host_keys: &HostKeyPolicy,
    target: &RemoteTarget,
    credential: &Credential,
) -> Result<(C::Session, String), DialFailure> {
    let mut session = connector
        .connect(target)
        .map_err(|err| DialFailure::Transient(err.0))?;
    let fingerprint = session
        .host_key_fingerprint()
        .map_err(DialFailure::Fatal)?;
    match host_keys {
        HostKeyPolicy::Pinned(expected) if *expected != fingerprint => {
            return Err(DialFailure::Fatal(RemoteError::HostKeyMismatch {
                expected: expected.clone(),
                actual: fingerprint,
            }));
        }
        HostKeyPolicy::Pinned(_) | HostKeyPolicy::InsecureFirstBoot => {}
    }
    session
        .authenticate(&target.user, credential)
        .map_err(|err| DialFailure::Transient(err.0))?;
    Ok((session, fingerprint))
}
