// Copyright (c) 2025, Joe Drago <joedrago@gmail.com>
// SPDX-License-Identifier: BSD-2-Clause

pub mod identity;
pub mod inventory;

use std::time::Duration;

use crate::error::{FipError, Result};

pub use identity::AuthSession;
pub use inventory::resolve_attachments;

pub const DEFAULT_REGION: &str = "RegionOne";

/// Client for the provider's identity, network and compute APIs
#[derive(Debug, Clone)]
pub struct CloudClient {
    http: reqwest::Client,
    region: String,
}

impl CloudClient {
    /// `timeout` bounds every request, connect included
    pub fn new(region: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FipError::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(CloudClient {
            http,
            region: region.into(),
        })
    }

    pub fn region(&self) -> &str {
        &self.region
    }
}

/// Join a base endpoint and a path without doubling the slash
fn join_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_url() {
        assert_eq!(join_url("https://id.example/v3/", "/auth/tokens"), "https://id.example/v3/auth/tokens");
        assert_eq!(join_url("http://net:9696", "v2.0/floatingips"), "http://net:9696/v2.0/floatingips");
    }
}
