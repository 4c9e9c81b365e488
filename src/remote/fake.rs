//! Scripted in-memory hosts for tests.
//!
//! Understands the handful of command shapes `agent::commands` produces and keeps
//! per-host files and service states so reads observe earlier writes.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use super::{CommandOutput, RemoteShell, ShellSession};
use crate::error::{FipError, Result};
use crate::model::Host;

#[derive(Default)]
struct HostState {
    files: HashMap<String, Vec<u8>>,
    services: HashMap<String, bool>,
    /// Canned replies keyed by exact command, checked before the interpreter
    overrides: HashMap<String, std::result::Result<CommandOutput, String>>,
}

#[derive(Default)]
struct Inner {
    hosts: Mutex<HashMap<String, HostState>>,
    unreachable: Mutex<HashSet<String>>,
    log: Mutex<Vec<(String, String)>>,
    connects: AtomicUsize,
    open: AtomicUsize,
}

#[derive(Clone, Default)]
pub struct FakeShell {
    inner: Arc<Inner>,
}

impl FakeShell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn host(id: u32, addr: &str) -> Host {
        Host {
            id,
            name: format!("host-{}", id),
            host: addr.to_string(),
            port: 22,
            user: "root".to_string(),
            password: Some("secret".to_string()),
            key_path: None,
            agents: vec![],
        }
    }

    pub fn set_unreachable(&self, addr: &str) {
        self.inner.unreachable.lock().insert(addr.to_string());
    }

    pub fn set_service(&self, addr: &str, service: &str, active: bool) {
        self.inner
            .hosts
            .lock()
            .entry(addr.to_string())
            .or_default()
            .services
            .insert(service.to_string(), active);
    }

    pub fn service_active(&self, addr: &str, service: &str) -> bool {
        self.inner
            .hosts
            .lock()
            .get(addr)
            .and_then(|h| h.services.get(service).copied())
            .unwrap_or(false)
    }

    pub fn put_file(&self, addr: &str, path: &str, content: &str) {
        self.put_file_bytes(addr, path, content.as_bytes());
    }

    pub fn put_file_bytes(&self, addr: &str, path: &str, content: &[u8]) {
        self.inner
            .hosts
            .lock()
            .entry(addr.to_string())
            .or_default()
            .files
            .insert(path.to_string(), content.to_vec());
    }

    pub fn file(&self, addr: &str, path: &str) -> Option<String> {
        self.inner
            .hosts
            .lock()
            .get(addr)
            .and_then(|h| h.files.get(path))
            .map(|c| String::from_utf8_lossy(c).into_owned())
    }

    pub fn reply(&self, addr: &str, command: &str, output: CommandOutput) {
        self.inner
            .hosts
            .lock()
            .entry(addr.to_string())
            .or_default()
            .overrides
            .insert(command.to_string(), Ok(output));
    }

    /// Make `command` fail at the transport level with a timeout
    pub fn time_out(&self, addr: &str, command: &str) {
        self.inner
            .hosts
            .lock()
            .entry(addr.to_string())
            .or_default()
            .overrides
            .insert(command.to_string(), Err(command.to_string()));
    }

    pub fn commands(&self, addr: &str) -> Vec<String> {
        self.inner
            .log
            .lock()
            .iter()
            .filter(|(a, _)| a == addr)
            .map(|(_, c)| c.clone())
            .collect()
    }

    pub fn connects(&self) -> usize {
        self.inner.connects.load(Ordering::SeqCst)
    }

    pub fn open_sessions(&self) -> usize {
        self.inner.open.load(Ordering::SeqCst)
    }

    fn run(&self, addr: &str, command: &str) -> Result<CommandOutput> {
        self.inner.log.lock().push((addr.to_string(), command.to_string()));

        let mut hosts = self.inner.hosts.lock();
        let state = hosts.entry(addr.to_string()).or_default();

        if let Some(reply) = state.overrides.get(command) {
            return reply.clone().map_err(FipError::Execution);
        }

        Ok(interpret(state, command))
    }
}

const WRITE_PREFIX: &str = "umask 077 && printf '%s' ";

fn interpret(state: &mut HostState, command: &str) -> CommandOutput {
    if let Some(rest) = command.strip_prefix(WRITE_PREFIX) {
        return write_quoted(state, rest);
    }

    let words: Vec<&str> = command.split_whitespace().collect();
    match words.as_slice() {
        ["systemctl", "is-active", service] => {
            if state.services.get(*service).copied().unwrap_or(false) {
                CommandOutput::ok("active\n")
            } else {
                CommandOutput {
                    exit_code: 3,
                    stdout: "inactive\n".to_string(),
                    stderr: String::new(),
                }
            }
        }
        ["systemctl", action @ ("start" | "stop" | "restart"), service] => {
            let active = *action != "stop";
            state.services.insert(service.to_string(), active);
            CommandOutput::ok("")
        }
        ["grep", "-E", pattern, path, ..] => {
            let (allow_export, keys) = grep_keys(pattern);
            match state.files.get(*path) {
                Some(content) => {
                    let text = String::from_utf8_lossy(content);
                    let matched: Vec<&str> = text
                        .lines()
                        .filter(|line| {
                            let line = match line.strip_prefix("export") {
                                Some(rest) if allow_export && rest.starts_with(char::is_whitespace) => {
                                    rest.trim_start()
                                }
                                _ => line,
                            };
                            keys.iter().any(|k| line.starts_with(&format!("{}=", k)))
                        })
                        .collect();
                    if matched.is_empty() {
                        CommandOutput::failed(1, "")
                    } else {
                        CommandOutput::ok(matched.join("\n") + "\n")
                    }
                }
                None => CommandOutput::failed(2, ""),
            }
        }
        ["cat", path, ..] => match state.files.get(*path) {
            Some(content) => CommandOutput::from_bytes(0, content, b""),
            None => CommandOutput::failed(1, format!("cat: {}: No such file or directory\n", path)),
        },
        ["journalctl", "-u", service, "-n", lines, ..] => {
            let n: usize = lines.parse().unwrap_or(10);
            let text: Vec<String> = (1..=n).map(|i| format!("{} line {}", service, i)).collect();
            CommandOutput::ok(text.join("\n") + "\n")
        }
        _ => CommandOutput::failed(127, format!("unknown command: {}\n", command)),
    }
}

/// Key names out of `^(export[[:space:]]+)?(A|B)=` or `^A=|^B=`
fn grep_keys(pattern: &str) -> (bool, Vec<&str>) {
    let pattern = pattern.trim_matches('\'');
    let allow_export = pattern.contains("export");
    let group = pattern.rsplit_once('(').map(|(_, g)| g).unwrap_or(pattern);
    let keys = group
        .split('|')
        .map(|k| k.trim_start_matches('^').trim_end_matches('=').trim_end_matches(')'))
        .collect();
    (allow_export, keys)
}

/// Undo `commands::shell_quote` at the start of `text`, returning the rest
fn unquote_prefix(text: &str) -> Option<(String, &str)> {
    let mut out = String::new();
    let mut rest = text;
    loop {
        rest = rest.strip_prefix('\'')?;
        let end = rest.find('\'')?;
        out.push_str(&rest[..end]);
        rest = &rest[end + 1..];
        match rest.strip_prefix("\\'") {
            Some(after) => {
                out.push('\'');
                rest = after;
            }
            None => return Some((out, rest)),
        }
    }
}

/// `<quoted body> > TMP && { chmod ... } && mv TMP PATH`
fn write_quoted(state: &mut HostState, rest: &str) -> CommandOutput {
    let (body, tail) = match unquote_prefix(rest) {
        Some(parts) => parts,
        None => return CommandOutput::failed(2, "unterminated quote"),
    };
    match tail.split_whitespace().last() {
        Some(dest) if tail.trim_start().starts_with('>') => {
            state.files.insert(dest.to_string(), body.into_bytes());
            CommandOutput::ok("")
        }
        _ => CommandOutput::failed(2, "malformed write"),
    }
}

impl RemoteShell for FakeShell {
    fn connect(&self, host: &Host, _timeout: Duration) -> Result<Box<dyn ShellSession>> {
        self.inner.connects.fetch_add(1, Ordering::SeqCst);
        if self.inner.unreachable.lock().contains(&host.host) {
            return Err(FipError::Connection(format!("{}: No route to host", host.user_host())));
        }
        self.inner.open.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeSession {
            shell: self.clone(),
            addr: host.host.clone(),
        }))
    }
}

struct FakeSession {
    shell: FakeShell,
    addr: String,
}

impl ShellSession for FakeSession {
    fn exec(&mut self, command: &str, _timeout: Duration) -> Result<CommandOutput> {
        self.shell.run(&self.addr, command)
    }

    fn close(self: Box<Self>) {
        self.shell.inner.open.fetch_sub(1, Ordering::SeqCst);
    }
}
