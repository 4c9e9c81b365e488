// Copyright (c) 2025, Joe Drago <joedrago@gmail.com>
// SPDX-License-Identifier: BSD-2-Clause

use crate::cloud::DEFAULT_REGION;
use crate::engine::Limits;
use crate::error::{FipError, Result};
use crate::remote::Timeouts;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_DATA_FILE: &str = "/opt/fipwatch/data.json";
pub const DEFAULT_LOG_LINES: u32 = 10;

fn version_string() -> &'static str {
    concat!(env!("CARGO_PKG_VERSION"), " (", env!("GIT_SHA"), ")")
}

/// Fleet status and floating-IP reconciliation for remote agents
#[derive(Parser, Debug, Clone)]
#[command(name = "fipwatch")]
#[command(author, version = version_string(), about, long_about = None)]
pub struct Args {
    /// JSON document holding hosts, cloud accounts and caches
    #[arg(long = "data-file", env = "FIPWATCH_DATA_FILE", default_value = DEFAULT_DATA_FILE, global = true)]
    pub data_file: PathBuf,

    /// SSH connect timeout in seconds
    #[arg(long = "ssh-connect-timeout", env = "SSH_TIMEOUT", default_value = "10", global = true)]
    pub ssh_connect_timeout: u64,

    /// Remote command timeout in seconds
    #[arg(long = "ssh-command-timeout", env = "SSH_COMMAND_TIMEOUT", default_value = "30", global = true)]
    pub ssh_command_timeout: u64,

    /// Concurrent SSH sessions during a fleet poll
    #[arg(long = "ssh-workers", env = "MAX_SSH_WORKERS", default_value = "10", global = true)]
    pub ssh_workers: usize,

    /// Concurrent cloud accounts during an inventory refresh
    #[arg(long = "cloud-workers", env = "MAX_CLOUD_WORKERS", default_value = "5", global = true)]
    pub cloud_workers: usize,

    /// Catalog region whose public endpoints are used
    #[arg(long = "cloud-region", env = "FIPWATCH_CLOUD_REGION", default_value = DEFAULT_REGION, global = true)]
    pub cloud_region: String,

    /// Cloud API request timeout in seconds
    #[arg(long = "cloud-timeout", env = "FIPWATCH_CLOUD_TIMEOUT", default_value = "30", global = true)]
    pub cloud_timeout: u64,

    /// Debug log file
    #[arg(long = "debug-log", global = true)]
    pub debug_log: Option<PathBuf>,

    /// Log at debug level
    #[arg(short = 'v', long = "verbose", global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Poll every agent and replace the status cache
    RefreshStatus,
    /// Fetch floating addresses of every cloud account
    RefreshCloud,
    /// Print the merged per-agent view from cache
    View,
    /// Print cloud accounts with their projects and bound agents
    Accounts,
    /// Print every cached floating address
    Addresses,
    /// Read one agent's status live without caching it
    Probe { host_id: u32, agent_id: u32 },
    /// Start, stop or restart one agent
    Control {
        host_id: u32,
        agent_id: u32,
        /// start, stop or restart
        action: String,
    },
    /// Point one agent at another cloud account and restart it
    Rebind {
        host_id: u32,
        agent_id: u32,
        /// Cloud account name
        account: String,
    },
    /// Tail one agent's journal
    Logs {
        host_id: u32,
        agent_id: u32,
        #[arg(short = 'n', long = "lines", default_value_t = DEFAULT_LOG_LINES)]
        lines: u32,
    },
    /// Tail every agent's journal into the logs cache
    RefreshLogs {
        #[arg(short = 'n', long = "lines", default_value_t = DEFAULT_LOG_LINES)]
        lines: u32,
    },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub data_file: PathBuf,
    pub limits: Limits,
    pub cloud_region: String,
    pub cloud_timeout: Duration,
    pub debug_log: Option<PathBuf>,
    pub verbose: bool,
    pub command: Command,
}

fn at_least_one(value: u64, what: &str) -> Result<u64> {
    if value == 0 {
        return Err(FipError::Config(format!("{} must be at least 1", what)));
    }
    Ok(value)
}

impl Config {
    pub fn from_args(args: Args) -> Result<Self> {
        let connect = at_least_one(args.ssh_connect_timeout, "SSH connect timeout")?;
        let command = at_least_one(args.ssh_command_timeout, "SSH command timeout")?;
        let ssh_workers = at_least_one(args.ssh_workers as u64, "SSH worker count")?;
        let cloud_workers = at_least_one(args.cloud_workers as u64, "Cloud worker count")?;
        let cloud_timeout = at_least_one(args.cloud_timeout, "Cloud timeout")?;

        if args.cloud_region.trim().is_empty() {
            return Err(FipError::Config("Cloud region must not be empty".to_string()));
        }

        Ok(Config {
            data_file: args.data_file,
            limits: Limits {
                timeouts: Timeouts {
                    connect: Duration::from_secs(connect),
                    command: Duration::from_secs(command),
                },
                ssh_workers: ssh_workers as usize,
                cloud_workers: cloud_workers as usize,
            },
            cloud_region: args.cloud_region,
            cloud_timeout: Duration::from_secs(cloud_timeout),
            debug_log: args.debug_log,
            verbose: args.verbose,
            command: args.command,
        })
    }
}
