// Copyright (c) 2025, Joe Drago <joedrago@gmail.com>
// SPDX-License-Identifier: BSD-2-Clause

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::FipError;

const DEFAULT_SSH_PORT: u16 = 22;
const SERVICE_PREFIX: &str = "vkip-";
const STATE_FILE_NAME: &str = "vk_fip_state.json";
const ENV_FILE_NAME: &str = ".env";

fn default_port() -> u16 {
    DEFAULT_SSH_PORT
}

/// A remote machine running one or more agents
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Host {
    pub id: u32,
    pub name: String,
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub user: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_path: Option<PathBuf>,
    #[serde(default, rename = "scripts")]
    pub agents: Vec<Agent>,
}

/// How a host is logged into. A key file wins over a password when both are set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    Password(String),
    Key(PathBuf),
    None,
}

impl Host {
    pub fn credential(&self) -> Credential {
        match (&self.key_path, &self.password) {
            (Some(key), _) => Credential::Key(key.clone()),
            (None, Some(password)) => Credential::Password(password.clone()),
            (None, None) => Credential::None,
        }
    }

    pub fn agent(&self, agent_id: u32) -> Option<&Agent> {
        self.agents.iter().find(|a| a.id == agent_id)
    }

    pub fn user_host(&self) -> String {
        format!("{}@{}:{}", self.user, self.host, self.port)
    }
}

/// One long-lived floating-IP agent process on a host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub id: u32,
    pub name: String,
    /// Working directory; holds the credential file
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_name: Option<String>,
}

impl Agent {
    pub fn service(&self) -> String {
        match &self.service_name {
            Some(name) if !name.is_empty() => name.clone(),
            _ => format!("{}{}", SERVICE_PREFIX, self.name),
        }
    }

    pub fn state_path(&self) -> String {
        match &self.state_file {
            Some(path) if !path.is_empty() => path.clone(),
            _ => format!("{}/{}", self.path.trim_end_matches('/'), STATE_FILE_NAME),
        }
    }

    pub fn env_path(&self) -> String {
        format!("{}/{}", self.path.trim_end_matches('/'), ENV_FILE_NAME)
    }
}

/// Credentials for one cloud-provider project
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloudAccount {
    pub name: String,
    pub username: String,
    pub password: String,
    pub auth_url: String,
    pub project_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FloatingAddress {
    pub ip: String,
    pub id: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub fixed_ip: Option<String>,
    #[serde(default)]
    pub port_id: Option<String>,
    #[serde(default)]
    pub attached: bool,
    #[serde(default)]
    pub server_name: Option<String>,
}

/// A compute instance, reduced to what the address join needs
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Instance {
    pub id: String,
    pub name: String,
    pub addresses: Vec<String>,
}

/// Run state of an agent as last observed on its host.
///
/// The core never drives these transitions itself; they are read back from the
/// service manager. `Unknown` means the host could not be asked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentState {
    #[default]
    Unknown,
    Stopped,
    Running,
}

impl AgentState {
    /// Interpret `systemctl is-active` output; only an exact "active" counts
    pub fn from_active_output(output: &str) -> Self {
        if output.trim() == "active" {
            AgentState::Running
        } else {
            AgentState::Stopped
        }
    }

    pub fn is_running(self) -> bool {
        self == AgentState::Running
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentAction {
    Start,
    Stop,
    Restart,
}

impl AgentAction {
    pub fn as_str(self) -> &'static str {
        match self {
            AgentAction::Start => "start",
            AgentAction::Stop => "stop",
            AgentAction::Restart => "restart",
        }
    }
}

impl fmt::Display for AgentAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentAction {
    type Err = FipError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "start" => Ok(AgentAction::Start),
            "stop" => Ok(AgentAction::Stop),
            "restart" => Ok(AgentAction::Restart),
            other => Err(FipError::InvalidAction(other.to_string())),
        }
    }
}

/// Cache key for one (host, agent) pair
pub fn agent_key(host_id: u32, agent_id: u32) -> String {
    format!("{}-{}", host_id, agent_id)
}

/// Snapshot of one agent, rebuilt from scratch on every poll
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentStatusRecord {
    #[serde(rename = "server_id")]
    pub host_id: u32,
    #[serde(rename = "script_id")]
    pub agent_id: u32,
    #[serde(default, rename = "server_name")]
    pub host_name: String,
    #[serde(default, rename = "script_name")]
    pub agent_name: String,
    #[serde(default)]
    pub state: AgentState,
    #[serde(default)]
    pub running: bool,
    #[serde(default)]
    pub cycles: u64,
    #[serde(default)]
    pub success: u64,
    #[serde(default)]
    pub last_ip: Option<String>,
    #[serde(default)]
    pub account: Option<String>,
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl AgentStatusRecord {
    pub fn new(host: &Host, agent: &Agent) -> Self {
        AgentStatusRecord {
            host_id: host.id,
            agent_id: agent.id,
            host_name: host.name.clone(),
            agent_name: agent.name.clone(),
            ..Default::default()
        }
    }

    /// A record whose only populated field is the error
    pub fn failed(host: &Host, agent: &Agent, error: impl Into<String>) -> Self {
        AgentStatusRecord {
            error: Some(error.into()),
            ..Self::new(host, agent)
        }
    }

    pub fn set_state(&mut self, state: AgentState) {
        self.state = state;
        self.running = state.is_running();
    }

    pub fn key(&self) -> String {
        agent_key(self.host_id, self.agent_id)
    }
}

/// Snapshot of one cloud account's floating addresses
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CloudInventoryRecord {
    pub name: String,
    #[serde(default)]
    pub username: String,
    /// Project display name as resolved by the provider
    #[serde(default)]
    pub os_project_name: Option<String>,
    #[serde(default)]
    pub ips: Vec<FloatingAddress>,
    #[serde(default)]
    pub error: Option<String>,
}

impl CloudInventoryRecord {
    pub fn new(account: &CloudAccount) -> Self {
        CloudInventoryRecord {
            name: account.name.clone(),
            username: account.username.clone(),
            ..Default::default()
        }
    }

    pub fn failed(account: &CloudAccount, error: impl Into<String>) -> Self {
        CloudInventoryRecord {
            error: Some(error.into()),
            ..Self::new(account)
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub log: String,
    pub time: String,
}

/// The whole persisted document.
///
/// Keys this crate does not own (tenants, sales, ...) are carried through
/// untouched in `extra` so a save never drops another collaborator's data.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    #[serde(default, rename = "servers")]
    pub hosts: Vec<Host>,
    #[serde(default, rename = "projects")]
    pub accounts: Vec<CloudAccount>,
    #[serde(default)]
    pub status_cache: BTreeMap<String, AgentStatusRecord>,
    #[serde(default, rename = "projects_cache")]
    pub inventory_cache: BTreeMap<String, CloudInventoryRecord>,
    #[serde(default)]
    pub logs_cache: BTreeMap<String, LogEntry>,
    #[serde(default)]
    pub last_update: Option<String>,
    #[serde(default, rename = "projects_last_update")]
    pub inventory_last_update: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Document {
    pub fn host(&self, host_id: u32) -> Option<&Host> {
        self.hosts.iter().find(|h| h.id == host_id)
    }

    pub fn account(&self, name: &str) -> Option<&CloudAccount> {
        self.accounts.iter().find(|a| a.name == name)
    }

    /// Every (host, agent) pair in document order
    pub fn agent_targets(&self) -> Vec<(Host, Agent)> {
        self.hosts
            .iter()
            .flat_map(|h| h.agents.iter().map(move |a| (h.clone(), a.clone())))
            .collect()
    }
}
