// Copyright (c) 2025, Joe Drago <joedrago@gmail.com>
// SPDX-License-Identifier: BSD-2-Clause

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, error, warn};

use super::{join_url, AuthSession, CloudClient};
use crate::error::{FipError, Result};
use crate::model::{CloudAccount, CloudInventoryRecord, FloatingAddress, Instance};

const AUTH_HEADER: &str = "X-Auth-Token";

#[derive(Debug, Deserialize)]
struct FloatingIpList {
    #[serde(default)]
    floatingips: Vec<WireFloatingIp>,
}

#[derive(Debug, Deserialize)]
struct WireFloatingIp {
    #[serde(default)]
    floating_ip_address: Option<String>,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    fixed_ip_address: Option<String>,
    #[serde(default)]
    port_id: Option<String>,
}

impl From<WireFloatingIp> for FloatingAddress {
    fn from(w: WireFloatingIp) -> Self {
        let attached = w.port_id.as_deref().is_some_and(|p| !p.is_empty());
        FloatingAddress {
            ip: w.floating_ip_address.unwrap_or_default(),
            id: w.id.unwrap_or_default(),
            status: w.status,
            fixed_ip: w.fixed_ip_address,
            port_id: w.port_id,
            attached,
            server_name: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ServerList {
    #[serde(default)]
    servers: Vec<WireServer>,
}

#[derive(Debug, Deserialize)]
struct WireServer {
    #[serde(default)]
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    addresses: BTreeMap<String, Vec<WireServerAddress>>,
}

#[derive(Debug, Deserialize)]
struct WireServerAddress {
    #[serde(default)]
    addr: Option<String>,
}

impl From<WireServer> for Instance {
    fn from(w: WireServer) -> Self {
        Instance {
            id: w.id,
            name: w.name,
            addresses: w
                .addresses
                .into_values()
                .flatten()
                .filter_map(|a| a.addr)
                .collect(),
        }
    }
}

/// Fill in `server_name` for every address whose private IP belongs to one
/// of `instances`. Attachment itself is decided by the port id alone.
pub fn resolve_attachments(addresses: &mut [FloatingAddress], instances: &[Instance]) {
    for address in addresses.iter_mut() {
        let Some(fixed) = address.fixed_ip.as_deref() else {
            continue;
        };
        if let Some(instance) = instances.iter().find(|i| i.addresses.iter().any(|a| a == fixed)) {
            address.server_name = Some(instance.name.clone());
        }
    }
}

impl CloudClient {
    async fn get_json<T: DeserializeOwned>(&self, session: &AuthSession, url: &str) -> Result<T> {
        let resp = self.http.get(url).header(AUTH_HEADER, &session.token).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FipError::Http(format!("{} from {}", status, url)));
        }
        Ok(resp.json().await?)
    }

    pub async fn list_floating_ips(&self, session: &AuthSession, network_endpoint: &str) -> Result<Vec<FloatingAddress>> {
        let url = join_url(network_endpoint, "v2.0/floatingips");
        let list: FloatingIpList = self.get_json(session, &url).await?;
        Ok(list.floatingips.into_iter().map(FloatingAddress::from).collect())
    }

    pub async fn list_instances(&self, session: &AuthSession, compute_endpoint: &str) -> Result<Vec<Instance>> {
        let url = join_url(compute_endpoint, "servers/detail");
        let list: ServerList = self.get_json(session, &url).await?;
        Ok(list.servers.into_iter().map(Instance::from).collect())
    }

    async fn fill_inventory(&self, account: &CloudAccount, record: &mut CloudInventoryRecord) -> Result<()> {
        let session = self.authenticate(account).await?;
        record.os_project_name = Some(session.project_name.clone()).filter(|n| !n.is_empty());

        let Some(network) = session.endpoint("network") else {
            warn!("{}: identity catalog has no network endpoint in {}", account.name, self.region);
            record.error = Some("No network endpoint".to_string());
            return Ok(());
        };
        let mut addresses = self.list_floating_ips(&session, network).await?;

        if let Some(compute) = session.endpoint("compute") {
            match self.list_instances(&session, compute).await {
                Ok(instances) => resolve_attachments(&mut addresses, &instances),
                Err(e) => warn!("{}: failed to list instances: {}", account.name, e),
            }
        }

        debug!("{}: {} floating addresses", account.name, addresses.len());
        record.ips = addresses;
        Ok(())
    }

    /// Authenticate, list floating addresses and resolve attached instance
    /// names. Never fails: problems land in the record's `error`.
    pub async fn fetch_inventory(&self, account: &CloudAccount) -> CloudInventoryRecord {
        let mut record = CloudInventoryRecord::new(account);
        if let Err(e) = self.fill_inventory(account, &mut record).await {
            error!("Cloud inventory failed for {}: {}", account.name, e);
            record.ips.clear();
            record.error = Some(e.to_string());
        }
        record
    }
}
