// Copyright (c) 2025, Joe Drago <joedrago@gmail.com>
// SPDX-License-Identifier: BSD-2-Clause

use std::collections::HashMap;
use std::net::IpAddr;

use serde::Serialize;

use crate::model::{agent_key, AgentState, AgentStatusRecord, CloudInventoryRecord, Document, FloatingAddress};

/// One agent as the operator sees it: its own status plus the floating
/// addresses of the project it is bound to
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MergedView {
    pub key: String,
    pub host_id: u32,
    pub host_name: String,
    pub agent_id: u32,
    pub agent_name: String,
    pub state: AgentState,
    pub running: bool,
    pub cycles: u64,
    pub success: u64,
    pub last_ip: Option<String>,
    pub account: Option<String>,
    pub project: Option<String>,
    pub floating_ips: Vec<FloatingAddress>,
    pub error: Option<String>,
    pub cloud_error: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AddressStats {
    pub total: usize,
    pub attached: usize,
    pub free: usize,
}

impl AddressStats {
    pub fn add(&mut self, address: &FloatingAddress) {
        self.total += 1;
        if address.attached {
            self.attached += 1;
        } else {
            self.free += 1;
        }
    }

    pub fn of<'a>(records: impl IntoIterator<Item = &'a CloudInventoryRecord>) -> Self {
        let mut stats = AddressStats::default();
        for record in records {
            record.ips.iter().for_each(|a| stats.add(a));
        }
        stats
    }
}

/// Find the inventory of the project an agent is bound to: first by the
/// provider's project name, then by the account's configured name
pub fn find_inventory<'a>(doc: &'a Document, project: &str) -> Option<&'a CloudInventoryRecord> {
    doc.inventory_cache
        .values()
        .find(|r| r.os_project_name.as_deref() == Some(project))
        .or_else(|| doc.inventory_cache.get(project))
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value.as_ref().filter(|v| !v.is_empty()).cloned()
}

/// Merge both caches into one entry per configured agent, in document order.
///
/// Pure over `doc`: calling it twice without a refresh in between returns
/// the same result.
pub fn merge_view(doc: &Document) -> Vec<MergedView> {
    let mut views = Vec::new();
    for host in &doc.hosts {
        for agent in &host.agents {
            let key = agent_key(host.id, agent.id);
            let status = doc
                .status_cache
                .get(&key)
                .cloned()
                .unwrap_or_else(|| AgentStatusRecord::new(host, agent));

            let label = non_empty(&status.project).or_else(|| non_empty(&agent.project_name));
            let cloud = label.as_deref().and_then(|l| find_inventory(doc, l));

            let account = non_empty(&status.account)
                .or_else(|| cloud.map(|c| c.username.clone()).filter(|u| !u.is_empty()))
                .or_else(|| non_empty(&agent.account_name));
            let project = non_empty(&status.project)
                .or_else(|| cloud.and_then(|c| non_empty(&c.os_project_name)))
                .or_else(|| non_empty(&agent.project_name));

            views.push(MergedView {
                key,
                host_id: host.id,
                host_name: host.name.clone(),
                agent_id: agent.id,
                agent_name: agent.name.clone(),
                state: status.state,
                running: status.running,
                cycles: status.cycles,
                success: status.success,
                last_ip: status.last_ip,
                account,
                project,
                floating_ips: cloud.map(|c| c.ips.clone()).unwrap_or_default(),
                error: status.error,
                cloud_error: cloud.and_then(|c| c.error.clone()),
            });
        }
    }
    views
}

/// An agent that reports being bound to a project
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BoundAgent {
    pub host_id: u32,
    pub agent_id: u32,
    pub host_name: String,
    pub agent_name: String,
    pub running: bool,
    pub cycles: u64,
    pub success: u64,
    pub last_ip: Option<String>,
    pub error: Option<String>,
}

impl From<&AgentStatusRecord> for BoundAgent {
    fn from(r: &AgentStatusRecord) -> Self {
        BoundAgent {
            host_id: r.host_id,
            agent_id: r.agent_id,
            host_name: r.host_name.clone(),
            agent_name: r.agent_name.clone(),
            running: r.running,
            cycles: r.cycles,
            success: r.success,
            last_ip: r.last_ip.clone(),
            error: r.error.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProjectSummary {
    pub name: String,
    pub os_project_name: Option<String>,
    pub ips: Vec<FloatingAddress>,
    pub error: Option<String>,
    pub agents: Vec<BoundAgent>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccountSummary {
    pub username: String,
    pub projects: Vec<ProjectSummary>,
    pub total_ips: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccountsOverview {
    pub accounts: Vec<AccountSummary>,
    pub total_projects: usize,
    pub stats: AddressStats,
    pub agents_bound: usize,
    pub agents_running: usize,
    pub last_update: Option<String>,
}

/// Group cloud accounts by username, attach cached addresses and bound
/// agents to each project, busiest accounts first
pub fn account_summaries(doc: &Document) -> AccountsOverview {
    let mut by_project: HashMap<&str, Vec<BoundAgent>> = HashMap::new();
    for record in doc.status_cache.values() {
        if let Some(project) = record.project.as_deref().filter(|p| !p.is_empty()) {
            by_project.entry(project).or_default().push(BoundAgent::from(record));
        }
    }

    let mut accounts: Vec<AccountSummary> = Vec::new();
    let mut stats = AddressStats::default();
    let mut agents_bound = 0;
    let mut agents_running = 0;

    for account in &doc.accounts {
        let cached = doc.inventory_cache.get(&account.name);
        let os_project_name = cached.and_then(|c| non_empty(&c.os_project_name));

        let agents = os_project_name
            .as_deref()
            .and_then(|n| by_project.get(n))
            .filter(|a| !a.is_empty())
            .or_else(|| by_project.get(account.name.as_str()))
            .cloned()
            .unwrap_or_default();
        agents_bound += agents.len();
        agents_running += agents.iter().filter(|a| a.running).count();

        let ips = cached.map(|c| c.ips.clone()).unwrap_or_default();
        ips.iter().for_each(|a| stats.add(a));

        let project = ProjectSummary {
            name: account.name.clone(),
            os_project_name,
            error: cached.and_then(|c| c.error.clone()),
            ips,
            agents,
        };

        let idx = match accounts.iter().position(|a| a.username == account.username) {
            Some(idx) => idx,
            None => {
                accounts.push(AccountSummary {
                    username: account.username.clone(),
                    projects: Vec::new(),
                    total_ips: 0,
                });
                accounts.len() - 1
            }
        };
        accounts[idx].total_ips += project.ips.len();
        accounts[idx].projects.push(project);
    }

    accounts.sort_by(|a, b| b.total_ips.cmp(&a.total_ips));

    AccountsOverview {
        accounts,
        total_projects: doc.accounts.len(),
        stats,
        agents_bound,
        agents_running,
        last_update: doc.inventory_last_update.clone(),
    }
}

/// One cached floating address with the project that owns it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InventoryEntry {
    pub account: String,
    pub username: String,
    pub project: Option<String>,
    #[serde(flatten)]
    pub address: FloatingAddress,
}

/// Every cached floating address, ordered by account then address
pub fn inventory_listing(doc: &Document) -> Vec<InventoryEntry> {
    let mut entries: Vec<InventoryEntry> = doc
        .inventory_cache
        .iter()
        .flat_map(|(name, record)| {
            record.ips.iter().map(move |address| InventoryEntry {
                account: name.clone(),
                username: record.username.clone(),
                project: non_empty(&record.os_project_name),
                address: address.clone(),
            })
        })
        .collect();

    entries.sort_by(|a, b| {
        let ip_a = a.address.ip.parse::<IpAddr>().ok();
        let ip_b = b.address.ip.parse::<IpAddr>().ok();
        a.account
            .cmp(&b.account)
            .then(ip_a.cmp(&ip_b))
            .then_with(|| a.address.ip.cmp(&b.address.ip))
    });
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Agent, CloudAccount, Host};

    fn address(ip: &str, attached: bool) -> FloatingAddress {
        FloatingAddress {
            ip: ip.into(),
            id: format!("id-{}", ip),
            port_id: attached.then(|| "port".to_string()),
            attached,
            ..Default::default()
        }
    }

    fn agent(id: u32, project: Option<&str>) -> Agent {
        Agent {
            id,
            name: format!("a{}", id),
            path: format!("/opt/a{}", id),
            service_name: None,
            state_file: None,
            account_name: None,
            project_name: project.map(str::to_string),
        }
    }

    fn account(name: &str, username: &str) -> CloudAccount {
        CloudAccount {
            name: name.into(),
            username: username.into(),
            password: "pw".into(),
            auth_url: "http://id".into(),
            project_id: format!("pid-{}", name),
        }
    }

    fn document() -> Document {
        let mut doc = Document::default();
        doc.hosts.push(Host {
            id: 1,
            name: "h1".into(),
            host: "10.0.0.1".into(),
            port: 22,
            user: "root".into(),
            password: None,
            key_path: None,
            agents: vec![agent(1, None), agent(2, Some("acct-b")), agent(3, None)],
        });
        doc.accounts = vec![account("acct-a", "ops@x"), account("acct-b", "dev@x"), account("acct-c", "ops@x")];

        doc.status_cache.insert(
            "1-1".into(),
            AgentStatusRecord {
                host_id: 1,
                agent_id: 1,
                host_name: "h1".into(),
                agent_name: "a1".into(),
                state: AgentState::Running,
                running: true,
                cycles: 12,
                success: 3,
                account: Some("ops@x".into()),
                project: Some("mcs-a".into()),
                ..Default::default()
            },
        );
        doc.status_cache.insert(
            "1-2".into(),
            AgentStatusRecord {
                host_id: 1,
                agent_id: 2,
                error: Some("Connection failed: timed out".into()),
                ..Default::default()
            },
        );

        doc.inventory_cache.insert(
            "acct-a".into(),
            CloudInventoryRecord {
                name: "acct-a".into(),
                username: "ops@x".into(),
                os_project_name: Some("mcs-a".into()),
                ips: vec![address("89.0.0.10", true), address("89.0.0.9", false)],
                error: None,
            },
        );
        doc.inventory_cache.insert(
            "acct-b".into(),
            CloudInventoryRecord {
                name: "acct-b".into(),
                username: "dev@x".into(),
                os_project_name: None,
                ips: vec![address("5.5.5.5", false)],
                error: Some("HTTP 500".into()),
            },
        );
        doc
    }

    #[test]
    fn test_merge_view_matches_observed_project() {
        let views = merge_view(&document());
        assert_eq!(views.len(), 3);

        let a1 = &views[0];
        assert_eq!(a1.key, "1-1");
        assert!(a1.running);
        assert_eq!(a1.project.as_deref(), Some("mcs-a"));
        assert_eq!(a1.floating_ips.len(), 2);
        assert_eq!(a1.cloud_error, None);
    }

    #[test]
    fn test_merge_view_falls_back_to_configured_project() {
        let views = merge_view(&document());
        let a2 = &views[1];
        assert!(!a2.running);
        assert_eq!(a2.error.as_deref(), Some("Connection failed: timed out"));
        assert_eq!(a2.floating_ips.len(), 1);
        assert_eq!(a2.account.as_deref(), Some("dev@x"));
        assert_eq!(a2.project.as_deref(), Some("acct-b"));
        assert_eq!(a2.cloud_error.as_deref(), Some("HTTP 500"));
    }

    #[test]
    fn test_merge_view_unpolled_agent() {
        let views = merge_view(&document());
        let a3 = &views[2];
        assert_eq!(a3.state, AgentState::Unknown);
        assert_eq!(a3.agent_name, "a3");
        assert!(a3.floating_ips.is_empty());
        assert_eq!(a3.project, None);
    }

    #[test]
    fn test_merge_view_is_idempotent() {
        let doc = document();
        assert_eq!(merge_view(&doc), merge_view(&doc));
    }

    #[test]
    fn test_address_stats_invariant() {
        let doc = document();
        let stats = AddressStats::of(doc.inventory_cache.values());
        assert_eq!(stats, AddressStats { total: 3, attached: 1, free: 2 });
        assert_eq!(stats.attached + stats.free, stats.total);
    }

    #[test]
    fn test_account_summaries() {
        let overview = account_summaries(&document());
        assert_eq!(overview.total_projects, 3);
        assert_eq!(overview.stats.total, 3);

        let usernames: Vec<_> = overview.accounts.iter().map(|a| a.username.as_str()).collect();
        assert_eq!(usernames, vec!["ops@x", "dev@x"]);

        let ops = &overview.accounts[0];
        assert_eq!(ops.total_ips, 2);
        assert_eq!(ops.projects.len(), 2);
        assert_eq!(ops.projects[0].agents.len(), 1);
        assert_eq!(ops.projects[0].agents[0].agent_name, "a1");
        assert!(ops.projects[1].agents.is_empty());
        assert_eq!(overview.agents_bound, 1);
        assert_eq!(overview.agents_running, 1);
    }

    #[test]
    fn test_account_summaries_binds_by_configured_name() {
        let mut doc = document();
        if let Some(r) = doc.status_cache.get_mut("1-2") {
            r.project = Some("acct-b".into());
        }
        let overview = account_summaries(&doc);
        let dev = overview.accounts.iter().find(|a| a.username == "dev@x").unwrap();
        assert_eq!(dev.projects[0].agents.len(), 1);
        assert_eq!(dev.projects[0].error.as_deref(), Some("HTTP 500"));
    }

    #[test]
    fn test_inventory_listing_order() {
        let listing = inventory_listing(&document());
        let ips: Vec<_> = listing.iter().map(|e| (e.account.as_str(), e.address.ip.as_str())).collect();
        assert_eq!(
            ips,
            vec![("acct-a", "89.0.0.9"), ("acct-a", "89.0.0.10"), ("acct-b", "5.5.5.5")]
        );
        assert_eq!(listing[0].project.as_deref(), Some("mcs-a"));
    }
}
