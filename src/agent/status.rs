use serde_json::Value;
use tracing::{debug, warn};

use super::commands;
use super::envfile;
use crate::error::{FipError, Result};
use crate::model::{Agent, AgentState, AgentStatusRecord, Host};
use crate::remote::{with_session, RemoteShell, Timeouts};

/// Counters pulled out of an agent's JSON state file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateSummary {
    pub cycles: u64,
    pub success: u64,
    pub last_ip: Option<String>,
}

/// Parse the agent state document.
///
/// `meta.cycle_no` is the cycle count and `meta.stats.*.success` sums to the
/// success count. The last allocated address is the final entry of the last
/// non-empty bucket under `allocated`, in document order.
pub fn parse_state(text: &str) -> Result<StateSummary> {
    let state: Value = serde_json::from_str(text)?;
    if !state.is_object() {
        return Err(FipError::Parse("state file is not a JSON object".to_string()));
    }

    let meta = &state["meta"];
    let cycles = meta["cycle_no"].as_u64().unwrap_or(0);
    let success = meta["stats"]
        .as_object()
        .map(|stats| {
            stats
                .values()
                .map(|s| s["success"].as_u64().unwrap_or(0))
                .sum::<u64>()
        })
        .unwrap_or(0);

    let mut last_ip = None;
    if let Some(buckets) = state["allocated"].as_object() {
        for entries in buckets.values() {
            if let Some(last) = entries.as_array().and_then(|e| e.last()) {
                last_ip = last["floating_ip"].as_str().map(str::to_string);
            }
        }
    }

    Ok(StateSummary {
        cycles,
        success,
        last_ip,
    })
}

/// Account and project labels from `grep`ed credential lines
pub fn parse_identity(output: &str) -> (Option<String>, Option<String>) {
    let account = envfile::lookup(output, commands::USERNAME_KEY).filter(|v| !v.is_empty());
    let project = envfile::lookup(output, commands::PROJECT_NAME_KEY).filter(|v| !v.is_empty());
    (account, project)
}

/// Poll one agent. Transport failures propagate; everything else degrades to
/// defaults.
pub fn try_read_status(
    shell: &dyn RemoteShell,
    host: &Host,
    agent: &Agent,
    timeouts: Timeouts,
) -> Result<AgentStatusRecord> {
    with_session(shell, host, timeouts, |session| {
        let mut record = AgentStatusRecord::new(host, agent);

        let active = session.exec(&commands::is_active(&agent.service()), timeouts.command)?;
        record.set_state(AgentState::from_active_output(&active.stdout));

        let identity = session.exec(&commands::read_identity(&agent.env_path()), timeouts.command)?;
        if identity.success() && !identity.stdout.trim().is_empty() {
            let (account, project) = parse_identity(&identity.stdout);
            record.account = account;
            record.project = project;
        }

        let state = session.exec(&commands::read_state(&agent.state_path()), timeouts.command)?;
        if state.success() && !state.stdout.trim().is_empty() {
            match parse_state(&state.stdout) {
                Ok(summary) => {
                    record.cycles = summary.cycles;
                    record.success = summary.success;
                    record.last_ip = summary.last_ip;
                }
                Err(e) => {
                    // Agents rewrite this file while running; a torn read is normal
                    debug!("{}/{}: unreadable state file: {}", host.name, agent.name, e);
                }
            }
        }

        Ok(record)
    })
}

/// Poll one agent, folding any failure into the record's `error` field
pub fn read_status(
    shell: &dyn RemoteShell,
    host: &Host,
    agent: &Agent,
    timeouts: Timeouts,
) -> AgentStatusRecord {
    match try_read_status(shell, host, agent, timeouts) {
        Ok(record) => record,
        Err(e) => {
            warn!("Status read failed for {}/{}: {}", host.name, agent.name, e);
            AgentStatusRecord::failed(host, agent, e.to_string())
        }
    }
}
