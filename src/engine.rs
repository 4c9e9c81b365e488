// Copyright (c) 2025, Joe Drago <joedrago@gmail.com>
// SPDX-License-Identifier: BSD-2-Clause

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

use crate::agent::{self, Binding, ControlOutcome};
use crate::cloud::CloudClient;
use crate::error::{FipError, Result};
use crate::model::{agent_key, Agent, AgentStatusRecord, CloudInventoryRecord, Host, LogEntry};
use crate::poller::{poll_all, poll_all_blocking, Outcome};
use crate::reconcile::{self, AccountsOverview, AddressStats, InventoryEntry, MergedView};
use crate::remote::{RemoteShell, Timeouts};
use crate::store::Store;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

pub const DEFAULT_SSH_WORKERS: usize = 10;
pub const DEFAULT_CLOUD_WORKERS: usize = 5;

fn timestamp() -> String {
    Utc::now().format(TIMESTAMP_FORMAT).to_string()
}

/// Pool sizes and remote budgets for one fleet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub timeouts: Timeouts,
    pub ssh_workers: usize,
    pub cloud_workers: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Limits {
            timeouts: Timeouts::default(),
            ssh_workers: DEFAULT_SSH_WORKERS,
            cloud_workers: DEFAULT_CLOUD_WORKERS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusRefresh {
    pub updated: usize,
    pub running: usize,
    pub last_update: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InventoryRefresh {
    pub total_ips: usize,
    pub attached: usize,
    pub free: usize,
    pub last_update: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogsRefresh {
    pub fetched: usize,
    pub failed: usize,
    pub last_update: String,
}

/// The reconciliation engine: polls agents and cloud accounts into the
/// store and answers reads from the cached document only
pub struct Fleet {
    store: Arc<Store>,
    shell: Arc<dyn RemoteShell>,
    cloud: CloudClient,
    limits: Limits,
}

impl Fleet {
    pub fn new(store: Arc<Store>, shell: Arc<dyn RemoteShell>, cloud: CloudClient, limits: Limits) -> Self {
        Fleet {
            store,
            shell,
            cloud,
            limits,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    fn target(&self, host_id: u32, agent_id: u32) -> Result<(Host, Agent)> {
        self.store.read(|doc| {
            let host = doc
                .host(host_id)
                .ok_or_else(|| FipError::NotFound(format!("host {}", host_id)))?;
            let agent = host
                .agent(agent_id)
                .ok_or_else(|| FipError::NotFound(format!("agent {} on host {}", agent_id, host_id)))?;
            Ok((host.clone(), agent.clone()))
        })
    }

    /// Run a blocking remote operation off the async runtime
    async fn blocking<R, F>(&self, f: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce(&dyn RemoteShell, Timeouts) -> R + Send + 'static,
    {
        let shell = Arc::clone(&self.shell);
        let timeouts = self.limits.timeouts;
        Ok(tokio::task::spawn_blocking(move || f(shell.as_ref(), timeouts)).await?)
    }

    /// Poll every configured agent and replace the status cache
    pub async fn refresh_agent_statuses(&self) -> Result<StatusRefresh> {
        let writer = self.store.status_writer().await;
        let targets = self.store.read(|doc| doc.agent_targets());
        info!("Refreshing status of {} agents", targets.len());

        let shell = Arc::clone(&self.shell);
        let timeouts = self.limits.timeouts;
        let outcomes = poll_all_blocking(targets.clone(), self.limits.ssh_workers, move |(host, agent)| {
            Ok(agent::read_status(shell.as_ref(), &host, &agent, timeouts))
        })
        .await;

        let mut records = BTreeMap::new();
        for ((host, agent), outcome) in targets.iter().zip(outcomes) {
            let record = match outcome {
                Outcome::Success(record) => record,
                Outcome::Failure { kind, message } => {
                    warn!("Status worker for {}/{} failed ({}): {}", host.name, agent.name, kind, message);
                    AgentStatusRecord::failed(host, agent, message)
                }
            };
            records.insert(record.key(), record);
        }

        let updated = records.len();
        let running = records.values().filter(|r| r.running).count();
        let last_update = timestamp();
        writer.replace(records, &last_update).await?;

        info!("Status refresh: {} agents, {} running", updated, running);
        Ok(StatusRefresh {
            updated,
            running,
            last_update,
        })
    }

    /// Fetch every cloud account's floating addresses and replace the inventory cache
    pub async fn refresh_cloud_inventory(&self) -> Result<InventoryRefresh> {
        let writer = self.store.inventory_writer().await;
        let accounts = self.store.read(|doc| doc.accounts.clone());
        if accounts.is_empty() {
            return Err(FipError::NotFound("No cloud accounts configured".to_string()));
        }
        info!("Refreshing inventory of {} cloud accounts", accounts.len());

        let outcomes = poll_all(accounts.clone(), self.limits.cloud_workers, |account| {
            let cloud = self.cloud.clone();
            async move { Ok(cloud.fetch_inventory(&account).await) }
        })
        .await;

        let mut records = BTreeMap::new();
        for (account, outcome) in accounts.iter().zip(outcomes) {
            let record = match outcome {
                Outcome::Success(record) => record,
                Outcome::Failure { kind, message } => {
                    warn!("Inventory worker for {} failed ({}): {}", account.name, kind, message);
                    CloudInventoryRecord::failed(account, message)
                }
            };
            records.insert(record.name.clone(), record);
        }

        let stats = AddressStats::of(records.values());
        let last_update = timestamp();
        writer.replace(records, &last_update).await?;

        info!("Inventory refresh: {} IPs ({} attached, {} free)", stats.total, stats.attached, stats.free);
        Ok(InventoryRefresh {
            total_ips: stats.total,
            attached: stats.attached,
            free: stats.free,
            last_update,
        })
    }

    pub fn get_merged_view(&self) -> Vec<MergedView> {
        self.store.read(reconcile::merge_view)
    }

    pub fn account_summaries(&self) -> AccountsOverview {
        self.store.read(reconcile::account_summaries)
    }

    pub fn inventory_listing(&self) -> Vec<InventoryEntry> {
        self.store.read(reconcile::inventory_listing)
    }

    /// Re-read one agent and replace its cached record
    async fn refresh_one(&self, host: Host, agent: Agent) {
        let record = match self
            .blocking(move |shell, timeouts| agent::read_status(shell, &host, &agent, timeouts))
            .await
        {
            Ok(record) => record,
            Err(e) => {
                warn!("Post-action status read failed: {}", e);
                return;
            }
        };
        let key = record.key();
        if let Err(e) = self.store.status_writer().await.upsert(record).await {
            warn!("Failed to store status for {}: {}", key, e);
        }
    }

    pub async fn control_agent(&self, host_id: u32, agent_id: u32, action: &str) -> Result<ControlOutcome> {
        let (host, agent) = self.target(host_id, agent_id)?;
        let action = action.to_string();

        let (h, a) = (host.clone(), agent.clone());
        let outcome = self
            .blocking(move |shell, timeouts| agent::control_agent(shell, &h, &a, &action, timeouts))
            .await?;

        if outcome.success {
            self.refresh_one(host, agent).await;
        }
        Ok(outcome)
    }

    /// Rebind an agent to the named cloud account's project
    pub async fn rebind_agent(&self, host_id: u32, agent_id: u32, account_name: &str) -> Result<ControlOutcome> {
        let (host, agent) = self.target(host_id, agent_id)?;
        let binding = self.store.read(|doc| {
            let account = doc
                .account(account_name)
                .ok_or_else(|| FipError::NotFound(format!("cloud account {}", account_name)))?;
            let project_name = doc
                .inventory_cache
                .get(&account.name)
                .and_then(|c| c.os_project_name.clone())
                .filter(|n| !n.is_empty())
                .unwrap_or_else(|| account.name.clone());
            Ok::<_, FipError>(Binding::for_account(account, &project_name))
        })?;

        let (h, a) = (host.clone(), agent.clone());
        let outcome = self
            .blocking(move |shell, timeouts| agent::rebind_agent(shell, &h, &a, &binding, timeouts))
            .await?;

        if outcome.success {
            self.refresh_one(host, agent).await;
        }
        Ok(outcome)
    }

    /// Live status of one agent; the cache is not touched
    pub async fn probe_agent(&self, host_id: u32, agent_id: u32) -> Result<AgentStatusRecord> {
        let (host, agent) = self.target(host_id, agent_id)?;
        self.blocking(move |shell, timeouts| agent::read_status(shell, &host, &agent, timeouts))
            .await
    }

    pub async fn fetch_logs(&self, host_id: u32, agent_id: u32, lines: u32) -> Result<String> {
        let (host, agent) = self.target(host_id, agent_id)?;
        self.blocking(move |shell, timeouts| agent::fetch_logs(shell, &host, &agent, lines, timeouts))
            .await?
    }

    /// Tail every agent's journal into the logs cache. Agents that could not
    /// be reached keep their previous entry.
    pub async fn refresh_logs(&self, lines: u32) -> Result<LogsRefresh> {
        let writer = self.store.logs_writer().await;
        let targets = self.store.read(|doc| doc.agent_targets());

        let shell = Arc::clone(&self.shell);
        let timeouts = self.limits.timeouts;
        let outcomes = poll_all_blocking(targets.clone(), self.limits.ssh_workers, move |(host, agent)| {
            agent::fetch_logs(shell.as_ref(), &host, &agent, lines, timeouts)
        })
        .await;

        let last_update = timestamp();
        let mut entries = Vec::new();
        let mut failed = 0;
        for ((host, agent), outcome) in targets.iter().zip(outcomes) {
            match outcome {
                Outcome::Success(log) => entries.push((
                    agent_key(host.id, agent.id),
                    LogEntry {
                        log,
                        time: last_update.clone(),
                    },
                )),
                Outcome::Failure { message, .. } => {
                    warn!("Log fetch for {}/{} failed: {}", host.name, agent.name, message);
                    failed += 1;
                }
            }
        }

        let fetched = entries.len();
        writer.merge(entries).await?;
        Ok(LogsRefresh {
            fetched,
            failed,
            last_update,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AgentState, CloudAccount, Document};
    use crate::remote::fake::FakeShell;
    use crate::remote::CommandOutput;
    use crate::store::MemoryStore;
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const STATE: &str = r#"{"meta": {"cycle_no": 5, "stats": {"s": {"success": 2}}},
                            "allocated": {"s": [{"floating_ip": "89.0.0.1"}]}}"#;

    fn agent(id: u32) -> Agent {
        Agent {
            id,
            name: format!("a{}", id),
            path: format!("/opt/a{}", id),
            service_name: None,
            state_file: None,
            account_name: None,
            project_name: None,
        }
    }

    fn account(name: &str, auth_url: &str) -> CloudAccount {
        CloudAccount {
            name: name.into(),
            username: "ops@example.com".into(),
            password: "pw".into(),
            auth_url: auth_url.into(),
            project_id: format!("pid-{}", name),
        }
    }

    /// Host 1 (10.0.0.1) runs agents 1-4, host 2 (10.0.0.2) runs agent 5
    fn fleet_document() -> Document {
        let mut h1 = FakeShell::host(1, "10.0.0.1");
        h1.agents = (1..=4).map(agent).collect();
        let mut h2 = FakeShell::host(2, "10.0.0.2");
        h2.agents = vec![agent(5)];
        Document {
            hosts: vec![h1, h2],
            ..Default::default()
        }
    }

    fn live_shell() -> FakeShell {
        let shell = FakeShell::new();
        for id in 1..=4 {
            shell.set_service("10.0.0.1", &format!("vkip-a{}", id), true);
            shell.put_file("10.0.0.1", &format!("/opt/a{}/vk_fip_state.json", id), STATE);
            shell.put_file("10.0.0.1", &format!("/opt/a{}/.env", id), "OS_USERNAME=ops\nOS_PROJECT_NAME=mcs-1\n");
        }
        shell
    }

    fn fleet(doc: Document, shell: FakeShell) -> (Fleet, Arc<MemoryStore>) {
        let backend = Arc::new(MemoryStore::new(doc));
        let store = Arc::new(Store::open(backend.clone()).unwrap());
        let cloud = CloudClient::new("RegionOne", Duration::from_secs(5)).unwrap();
        (Fleet::new(store, Arc::new(shell), cloud, Limits::default()), backend)
    }

    #[tokio::test]
    async fn test_refresh_with_one_unreachable_host() {
        let shell = live_shell();
        shell.set_unreachable("10.0.0.2");
        let (fleet, backend) = fleet(fleet_document(), shell);

        let summary = fleet.refresh_agent_statuses().await.unwrap();
        assert_eq!(summary.updated, 5);
        assert_eq!(summary.running, 4);

        let cache = fleet.store().snapshot().status_cache;
        assert_eq!(cache.len(), 5);
        let dead = &cache["2-5"];
        assert!(!dead.running);
        assert!(dead.error.is_some());
        let live = &cache["1-3"];
        assert_eq!((live.cycles, live.success), (5, 2));
        assert_eq!(live.last_ip.as_deref(), Some("89.0.0.1"));

        assert_eq!(backend.saved().last_update, Some(summary.last_update));
    }

    #[tokio::test]
    async fn test_merged_view_is_cache_only() {
        let shell = live_shell();
        let (fleet, _) = fleet(fleet_document(), shell.clone());
        fleet.refresh_agent_statuses().await.unwrap();
        let connects = shell.connects();

        let first = fleet.get_merged_view();
        let second = fleet.get_merged_view();
        assert_eq!(first, second);
        assert_eq!(first.len(), 5);
        assert_eq!(shell.connects(), connects);
    }

    #[tokio::test]
    async fn test_refresh_persist_failure_leaves_cache() {
        let (fleet, backend) = fleet(fleet_document(), live_shell());
        backend.fail_saves(true);

        let err = fleet.refresh_agent_statuses().await.unwrap_err();
        assert!(err.is_fatal());
        assert!(fleet.store().snapshot().status_cache.is_empty());
    }

    #[tokio::test]
    async fn test_control_restart_updates_record() {
        let shell = live_shell();
        shell.set_service("10.0.0.1", "vkip-a2", false);
        let (fleet, _) = fleet(fleet_document(), shell);
        fleet.refresh_agent_statuses().await.unwrap();
        assert!(!fleet.store().snapshot().status_cache["1-2"].running);

        let outcome = fleet.control_agent(1, 2, "restart").await.unwrap();
        assert!(outcome.success);
        assert!(outcome.message.contains("restart OK"));

        let record = &fleet.store().snapshot().status_cache["1-2"];
        assert_eq!(record.state, AgentState::Running);
    }

    #[tokio::test]
    async fn test_control_failure_reports_stderr() {
        let shell = live_shell();
        shell.reply("10.0.0.1", "systemctl stop vkip-a1", CommandOutput::failed(1, "Access denied"));
        let (fleet, backend) = fleet(fleet_document(), shell);

        let outcome = fleet.control_agent(1, 1, "stop").await.unwrap();
        assert_eq!(outcome, ControlOutcome::failed("Access denied"));
        assert_eq!(backend.save_count(), 0);
    }

    #[tokio::test]
    async fn test_control_unknown_target() {
        let (fleet, _) = fleet(fleet_document(), live_shell());
        assert!(matches!(fleet.control_agent(9, 1, "start").await, Err(FipError::NotFound(_))));
        assert!(matches!(fleet.control_agent(1, 9, "start").await, Err(FipError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_rebind_uses_resolved_project_name() {
        let shell = live_shell();
        let mut doc = fleet_document();
        doc.accounts.push(account("acct-2", "http://id"));
        doc.inventory_cache.insert(
            "acct-2".into(),
            CloudInventoryRecord {
                name: "acct-2".into(),
                os_project_name: Some("mcs-2".into()),
                ..Default::default()
            },
        );
        let (fleet, _) = fleet(doc, shell.clone());

        let outcome = fleet.rebind_agent(1, 1, "acct-2").await.unwrap();
        assert!(outcome.success, "{}", outcome.message);

        let env = shell.file("10.0.0.1", "/opt/a1/.env").unwrap();
        assert!(env.contains("OS_PROJECT_NAME=mcs-2\n"));
        assert!(env.contains("OS_PROJECT_ID=pid-acct-2\n"));
        assert_eq!(
            fleet.store().snapshot().status_cache["1-1"].project.as_deref(),
            Some("mcs-2")
        );
    }

    #[tokio::test]
    async fn test_rebind_unknown_account() {
        let (fleet, _) = fleet(fleet_document(), live_shell());
        let err = fleet.rebind_agent(1, 1, "nope").await.unwrap_err();
        assert_eq!(err.to_string(), "Not found: cloud account nope");
    }

    #[tokio::test]
    async fn test_probe_does_not_touch_cache() {
        let (fleet, backend) = fleet(fleet_document(), live_shell());
        let record = fleet.probe_agent(1, 4).await.unwrap();
        assert!(record.running);
        assert!(fleet.store().snapshot().status_cache.is_empty());
        assert_eq!(backend.save_count(), 0);
    }

    #[tokio::test]
    async fn test_refresh_logs_keeps_previous_on_failure() {
        let shell = live_shell();
        let mut doc = fleet_document();
        doc.logs_cache.insert(
            "2-5".into(),
            LogEntry {
                log: "old".into(),
                time: "2024-01-01T00:00:00Z".into(),
            },
        );
        shell.set_unreachable("10.0.0.2");
        let (fleet, _) = fleet(doc, shell);

        let summary = fleet.refresh_logs(2).await.unwrap();
        assert_eq!((summary.fetched, summary.failed), (4, 1));

        let logs = fleet.store().snapshot().logs_cache;
        assert_eq!(logs["2-5"].log, "old");
        assert_eq!(logs["1-1"].log, "vkip-a1 line 1\nvkip-a1 line 2");
        assert_eq!(logs["1-1"].time, summary.last_update);
    }

    #[tokio::test]
    async fn test_fetch_logs_unreachable() {
        let shell = live_shell();
        shell.set_unreachable("10.0.0.2");
        let (fleet, _) = fleet(fleet_document(), shell);
        let err = fleet.fetch_logs(2, 5, 10).await.unwrap_err();
        assert!(err.is_transport());
    }

    #[tokio::test]
    async fn test_refresh_cloud_inventory() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v3/auth/tokens"))
            .respond_with(
                ResponseTemplate::new(201)
                    .insert_header("X-Subject-Token", "tok")
                    .set_body_json(json!({"token": {"project": {"name": "mcs-1"}, "catalog": [
                        {"type": "network", "endpoints": [
                            {"interface": "public", "region": "RegionOne", "url": format!("{}/network", server.uri())}
                        ]}
                    ]}})),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/network/v2.0/floatingips"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"floatingips": [
                {"floating_ip_address": "89.0.0.1", "id": "f1", "port_id": "p1", "fixed_ip_address": "10.0.0.5"},
                {"floating_ip_address": "89.0.0.2", "id": "f2", "port_id": null}
            ]})))
            .mount(&server)
            .await;

        let mut doc = fleet_document();
        doc.accounts = vec![
            account("good", &format!("{}/v3", server.uri())),
            account("bad", &format!("{}/missing", server.uri())),
        ];
        let (fleet, _) = fleet(doc, live_shell());

        let summary = fleet.refresh_cloud_inventory().await.unwrap();
        assert_eq!(summary.total_ips, 2);
        assert_eq!(summary.attached, 1);
        assert_eq!(summary.free, 1);
        assert_eq!(summary.attached + summary.free, summary.total_ips);

        let cache = fleet.store().snapshot().inventory_cache;
        assert_eq!(cache.len(), 2);
        assert_eq!(cache["good"].os_project_name.as_deref(), Some("mcs-1"));
        assert!(cache["bad"].error.as_deref().unwrap().contains("404"));

        let overview = fleet.account_summaries();
        assert_eq!(overview.stats.total, 2);
        assert_eq!(fleet.inventory_listing().len(), 2);
    }

    #[tokio::test]
    async fn test_refresh_cloud_without_accounts() {
        let (fleet, _) = fleet(fleet_document(), live_shell());
        assert!(matches!(fleet.refresh_cloud_inventory().await, Err(FipError::NotFound(_))));
    }
}
