//! `ssh2` transport for [`super::RemoteExecutor`].

use std::io::{self, Write};
use std::net::{SocketAddr, TcpStream};
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD_NO_PAD;
use ssh2::{HashType, Session};

use super::{DialError, RemoteError, RemoteTarget, ShellConnector, ShellSession};
use crate::password::Credential;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Longest a single blocking libssh2 call may wait once authenticated.
const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(300);

/// Connects with libssh2 over a blocking TCP stream.
#[derive(Clone, Copy, Debug)]
pub struct Ssh2Connector {
    connect_timeout: Duration,
    io_timeout: Duration,
}

impl Default for Ssh2Connector {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            io_timeout: DEFAULT_IO_TIMEOUT,
        }
    }
}

impl Ssh2Connector {
    /// Creates a connector with a custom TCP connect and handshake timeout.
    #[must_use]
    pub const fn with_connect_timeout(connect_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            io_timeout: DEFAULT_IO_TIMEOUT,
        }
    }
}

impl ShellConnector for Ssh2Connector {
    type Session = Ssh2Session;

    fn connect(&self, target: &RemoteTarget) -> Result<Self::Session, DialError> {
        let address = SocketAddr::new(target.address, target.port);
        let tcp = TcpStream::connect_timeout(&address, self.connect_timeout)
            .map_err(|err| DialError(format!("tcp connect to {address} failed: {err}")))?;
        let mut session =
            Session::new().map_err(|err| DialError(format!("ssh session init failed: {err}")))?;
        session.set_tcp_stream(tcp);
        session.set_timeout(timeout_millis(self.connect_timeout));
        session
            .handshake()
            .map_err(|err| DialError(format!("ssh handshake with {address} failed: {err}")))?;
        Ok(Ssh2Session {
            session,
            io_timeout: self.io_timeout,
        })
    }
}

/// An established libssh2 session.
pub struct Ssh2Session {
    session: Session,
    io_timeout: Duration,
}

impl ShellSession for Ssh2Session {
    fn host_key_fingerprint(&self) -> Result<String, RemoteError> {
        let hash = self
            .session
            .host_key_hash(HashType::Sha256)
            .ok_or_else(|| RemoteError::Session(String::from("host presented no key")))?;
        Ok(format!("SHA256:{}", STANDARD_NO_PAD.encode(hash)))
    }

    fn authenticate(&mut self, user: &str, credential: &Credential) -> Result<(), DialError> {
        self.session
            .userauth_password(user, credential.expose())
            .map_err(|err| DialError(format!("password authentication failed: {err}")))?;
        if !self.session.authenticated() {
            return Err(DialError(String::from("password authentication rejected")));
        }
        self.session.set_timeout(timeout_millis(self.io_timeout));
        Ok(())
    }

    fn run_script(
        &mut self,
        script: &str,
        stdout: &mut dyn Write,
        stderr: &mut dyn Write,
    ) -> Result<i32, RemoteError> {
        let mut channel = self
            .session
            .channel_session()
            .map_err(|err| RemoteError::Session(err.to_string()))?;
        channel
            .request_pty("xterm", None, None)
            .map_err(|err| RemoteError::Pty(err.to_string()))?;
        channel
            .shell()
            .map_err(|err| RemoteError::Shell(err.to_string()))?;

        channel
            .write_all(script.as_bytes())
            .and_then(|()| channel.write_all(b"\n"))
            .and_then(|()| channel.flush())
            .map_err(|err| RemoteError::Io(err.to_string()))?;
        channel
            .send_eof()
            .map_err(|err| RemoteError::Io(err.to_string()))?;

        io::copy(&mut channel, stdout).map_err(|err| RemoteError::Io(err.to_string()))?;
        io::copy(&mut channel.stderr(), stderr).map_err(|err| RemoteError::Io(err.to_string()))?;

        channel
            .wait_close()
            .map_err(|err| RemoteError::Session(err.to_string()))?;
        channel
            .exit_status()
            .map_err(|err| RemoteError::Session(err.to_string()))
    }
}

/// Converts to libssh2 milliseconds. Zero would mean no timeout at all.
fn timeout_millis(timeout: Duration) -> u32 {
    u32::try_from(timeout.as_millis())
        .unwrap_or(u32::MAX)
        .max(1)
}
