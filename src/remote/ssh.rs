use std::io::{self, Read};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

use ssh2::{Channel, Session};
use tracing::debug;

use super::key::validate_key_file;
use super::{CommandOutput, RemoteShell, ShellSession};
use crate::error::{FipError, Result};
use crate::model::{Credential, Host};

/// `RemoteShell` backed by libssh2
#[derive(Debug, Clone, Copy, Default)]
pub struct SshShell;

impl SshShell {
    pub fn new() -> Self {
        SshShell
    }
}

impl RemoteShell for SshShell {
    fn connect(&self, host: &Host, timeout: Duration) -> Result<Box<dyn ShellSession>> {
        let target = host.user_host();
        debug!("Connecting to {}", target);

        let session = open_session(host, timeout)
            .map_err(|e| FipError::Connection(format!("{}: {}", target, e)))?;

        Ok(Box::new(SshSession {
            session: Some(session),
            target,
        }))
    }
}

fn resolve(host: &Host) -> io::Result<Vec<SocketAddr>> {
    let addrs: Vec<SocketAddr> = (host.host.as_str(), host.port).to_socket_addrs()?.collect();
    if addrs.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("no address for {}", host.host),
        ));
    }
    Ok(addrs)
}

fn connect_tcp(host: &Host, timeout: Duration) -> io::Result<TcpStream> {
    let mut last_err = None;
    for addr in resolve(host)? {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => return Ok(stream),
            Err(e) => last_err = Some(e),
        }
    }
    Err(last_err.unwrap_or_else(|| io::Error::new(io::ErrorKind::Other, "connect failed")))
}

fn open_session(host: &Host, timeout: Duration) -> std::result::Result<Session, String> {
    let tcp = connect_tcp(host, timeout).map_err(|e| e.to_string())?;
    tcp.set_read_timeout(Some(timeout)).ok();
    tcp.set_write_timeout(Some(timeout)).ok();

    let mut session = Session::new().map_err(|e| e.to_string())?;
    session.set_tcp_stream(tcp);
    session.set_timeout(timeout_ms(timeout));
    session.handshake().map_err(|e| e.to_string())?;

    match host.credential() {
        Credential::Key(path) => {
            validate_key_file(&path).map_err(|e| e.to_string())?;
            session
                .userauth_pubkey_file(&host.user, None, &path, None)
                .map_err(|e| e.to_string())?;
        }
        Credential::Password(password) => {
            session
                .userauth_password(&host.user, &password)
                .map_err(|e| e.to_string())?;
        }
        Credential::None => {
            session.userauth_agent(&host.user).map_err(|e| e.to_string())?;
        }
    }

    if !session.authenticated() {
        return Err("authentication failed".to_string());
    }

    Ok(session)
}

fn timeout_ms(timeout: Duration) -> u32 {
    timeout.as_millis().min(u32::MAX as u128) as u32
}

/// Timeouts become `Execution`; anything else means the transport broke
fn map_exec_error(target: &str, command: &str, err: ssh2::Error) -> FipError {
    let io_err: io::Error = err.into();
    match io_err.kind() {
        io::ErrorKind::TimedOut => FipError::Execution(format!("{}: {}", target, command)),
        _ => FipError::Connection(format!("{}: {}", target, io_err)),
    }
}

fn map_read_error(target: &str, command: &str, err: io::Error) -> FipError {
    match err.kind() {
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => {
            FipError::Execution(format!("{}: {}", target, command))
        }
        _ => FipError::Connection(format!("{}: {}", target, err)),
    }
}

const READ_POLL: Duration = Duration::from_millis(10);

/// `Some(0)` at end of stream, `None` when nothing is buffered yet
fn read_some(stream: &mut impl Read, buf: &mut [u8]) -> io::Result<Option<usize>> {
    match stream.read(buf) {
        Ok(n) => Ok(Some(n)),
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
        Err(e) => Err(e),
    }
}

/// Read stdout and stderr side by side until both reach EOF. The session must
/// be non-blocking; a full stderr window cannot stall the stdout reader.
fn drain_streams(channel: &mut Channel, deadline: Instant) -> io::Result<(Vec<u8>, Vec<u8>)> {
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let mut buf = [0u8; 16 * 1024];
    let mut out_done = false;
    let mut err_done = false;

    while !(out_done && err_done) {
        let mut progressed = false;

        if !out_done {
            match read_some(channel, &mut buf)? {
                Some(0) => out_done = true,
                Some(n) => {
                    stdout.extend_from_slice(&buf[..n]);
                    progressed = true;
                }
                None => {}
            }
        }
        if !err_done {
            match read_some(&mut channel.stderr(), &mut buf)? {
                Some(0) => err_done = true,
                Some(n) => {
                    stderr.extend_from_slice(&buf[..n]);
                    progressed = true;
                }
                None => {}
            }
        }

        if !progressed {
            if Instant::now() >= deadline {
                return Err(io::Error::new(io::ErrorKind::TimedOut, "command timed out"));
            }
            std::thread::sleep(READ_POLL);
        }
    }

    Ok((stdout, stderr))
}

struct SshSession {
    session: Option<Session>,
    target: String,
}

impl ShellSession for SshSession {
    fn exec(&mut self, command: &str, timeout: Duration) -> Result<CommandOutput> {
        let session = self
            .session
            .as_ref()
            .ok_or_else(|| FipError::Connection(format!("{}: session closed", self.target)))?;
        let target = self.target.as_str();
        let started = Instant::now();

        // libssh2 applies this to every blocking call on the session
        session.set_timeout(timeout_ms(timeout));

        let mut channel = session
            .channel_session()
            .map_err(|e| map_exec_error(target, command, e))?;
        channel
            .exec(command)
            .map_err(|e| map_exec_error(target, command, e))?;

        session.set_blocking(false);
        let drained = drain_streams(&mut channel, started + timeout);
        session.set_blocking(true);
        let (stdout, stderr) = drained.map_err(|e| map_read_error(target, command, e))?;

        channel
            .wait_close()
            .map_err(|e| map_exec_error(target, command, e))?;
        let exit_code = channel
            .exit_status()
            .map_err(|e| map_exec_error(target, command, e))?;

        if started.elapsed() > timeout {
            return Err(FipError::Execution(format!("{}: {}", target, command)));
        }

        debug!("{} `{}` -> exit {}", target, command, exit_code);

        Ok(CommandOutput::from_bytes(exit_code, &stdout, &stderr))
    }

    fn close(mut self: Box<Self>) {
        self.shutdown();
    }
}

impl SshSession {
    fn shutdown(&mut self) {
        if let Some(session) = self.session.take() {
            let _ = session.disconnect(None, "closing", None);
            debug!("Closed session to {}", self.target);
        }
    }
}

impl Drop for SshSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}
