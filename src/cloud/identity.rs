// Copyright (c) 2025, Joe Drago <joedrago@gmail.com>
// SPDX-License-Identifier: BSD-2-Clause

use std::collections::HashMap;

use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::{join_url, CloudClient};
use crate::error::{FipError, Result};
use crate::model::CloudAccount;

const TOKEN_HEADER: &str = "X-Subject-Token";
const USER_DOMAIN: &str = "users";

/// A scoped token plus what the identity service told us about the project
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSession {
    pub token: String,
    /// Public endpoint URL per service type ("network", "compute", ...)
    pub endpoints: HashMap<String, String>,
    pub project_name: String,
}

impl AuthSession {
    pub fn endpoint(&self, service_type: &str) -> Option<&str> {
        self.endpoints.get(service_type).map(String::as_str)
    }
}

#[derive(Debug, Default, Deserialize)]
struct TokenBody {
    #[serde(default)]
    token: TokenInfo,
}

#[derive(Debug, Default, Deserialize)]
struct TokenInfo {
    #[serde(default)]
    catalog: Vec<CatalogEntry>,
    #[serde(default)]
    project: Option<ProjectRef>,
}

#[derive(Debug, Deserialize)]
struct ProjectRef {
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
struct CatalogEntry {
    #[serde(rename = "type", default)]
    service_type: String,
    #[serde(default)]
    endpoints: Vec<CatalogEndpoint>,
}

#[derive(Debug, Deserialize)]
struct CatalogEndpoint {
    #[serde(default)]
    interface: String,
    #[serde(default)]
    region: Option<String>,
    #[serde(default)]
    url: String,
}

/// Keep only `region`'s public endpoints, one URL per service type
fn collect_endpoints(catalog: &[CatalogEntry], region: &str) -> HashMap<String, String> {
    let mut endpoints = HashMap::new();
    for service in catalog {
        for ep in &service.endpoints {
            if ep.interface == "public" && ep.region.as_deref() == Some(region) {
                endpoints.insert(service.service_type.clone(), ep.url.clone());
            }
        }
    }
    endpoints
}

fn auth_payload(account: &CloudAccount) -> serde_json::Value {
    json!({
        "auth": {
            "identity": {
                "methods": ["password"],
                "password": {
                    "user": {
                        "name": account.username,
                        "domain": {"name": USER_DOMAIN},
                        "password": account.password,
                    }
                }
            },
            "scope": {
                "project": {"id": account.project_id}
            }
        }
    })
}

impl CloudClient {
    /// Password-grant a token scoped to the account's project.
    ///
    /// Any non-2xx answer is `FipError::Auth` carrying the status.
    pub async fn authenticate(&self, account: &CloudAccount) -> Result<AuthSession> {
        let url = join_url(&account.auth_url, "auth/tokens");
        debug!("Authenticating {} against {}", account.name, url);

        let resp = self.http.post(&url).json(&auth_payload(account)).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FipError::Auth {
                status: status.as_u16(),
                message: status.canonical_reason().unwrap_or("request rejected").to_string(),
            });
        }

        let token = resp
            .headers()
            .get(TOKEN_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| FipError::Parse(format!("Missing {} header", TOKEN_HEADER)))?;

        let body: TokenBody = resp.json().await?;
        Ok(AuthSession {
            token,
            endpoints: collect_endpoints(&body.token.catalog, &self.region),
            project_name: body.token.project.map(|p| p.name).unwrap_or_default(),
        })
    }
}
