//! Remote shell command lines sent to agent hosts.
//!
//! Paths and service names come from trusted configuration records and are
//! interpolated as-is.

use crate::model::AgentAction;

/// Most journal lines a single log request may ask for
pub const MAX_LOG_LINES: u32 = 200;

pub const USERNAME_KEY: &str = "OS_USERNAME";
pub const PASSWORD_KEY: &str = "OS_PASSWORD";
pub const PROJECT_ID_KEY: &str = "OS_PROJECT_ID";
pub const PROJECT_NAME_KEY: &str = "OS_PROJECT_NAME";
pub const AUTH_URL_KEY: &str = "OS_AUTH_URL";

pub fn is_active(service: &str) -> String {
    format!("systemctl is-active {}", service)
}

pub fn control(action: AgentAction, service: &str) -> String {
    format!("systemctl {} {}", action.as_str(), service)
}

/// Identity lines, with or without a leading `export`
pub fn read_identity(env_path: &str) -> String {
    format!(
        "grep -E '^(export[[:space:]]+)?({}|{})=' {} 2>/dev/null",
        USERNAME_KEY, PROJECT_NAME_KEY, env_path
    )
}

pub fn read_state(state_path: &str) -> String {
    format!("cat {} 2>/dev/null", state_path)
}

pub fn read_file(path: &str) -> String {
    format!("cat {}", path)
}

/// Single-quote `text` for a POSIX shell
pub fn shell_quote(text: &str) -> String {
    format!("'{}'", text.replace('\'', "'\\''"))
}

/// Replace `path` with exactly `content` through a temp file so a failed
/// upload leaves the old file intact. The temp file is created owner-only and
/// then takes the old file's mode when there is one.
pub fn write_file(path: &str, content: &str) -> String {
    let tmp = format!("{}.fipwatch.tmp", path);
    format!(
        "umask 077 && printf '%s' {body} > {tmp} && {{ chmod --reference={path} {tmp} 2>/dev/null || true; }} && mv {tmp} {path}",
        body = shell_quote(content),
        tmp = tmp,
        path = path,
    )
}

pub fn journal(service: &str, lines: u32) -> String {
    format!(
        "journalctl -u {} -n {} --no-pager 2>&1",
        service,
        lines.min(MAX_LOG_LINES)
    )
}
