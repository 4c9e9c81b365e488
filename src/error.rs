// Copyright (c) 2025, Joe Drago <joedrago@gmail.com>
// SPDX-License-Identifier: BSD-2-Clause

use std::fmt;
use std::io;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FipError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Command timed out: {0}")]
    Execution(String),

    #[error("HTTP {status}: {message}")]
    Auth { status: u16, message: String },

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid action: {0}")]
    InvalidAction(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to persist document: {0}")]
    Persist(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Tag identifying the failure class of a per-target poll result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Connection,
    Execution,
    Auth,
    Http,
    Parse,
    NotFound,
    InvalidAction,
    Config,
    Io,
    Persist,
    /// The worker itself died (panicked) before producing a result
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Connection => "connection",
            ErrorKind::Execution => "execution",
            ErrorKind::Auth => "auth",
            ErrorKind::Http => "http",
            ErrorKind::Parse => "parse",
            ErrorKind::NotFound => "not_found",
            ErrorKind::InvalidAction => "invalid_action",
            ErrorKind::Config => "config",
            ErrorKind::Io => "io",
            ErrorKind::Persist => "persist",
            ErrorKind::Internal => "internal",
        };
        f.write_str(name)
    }
}

impl FipError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FipError::Io(_) => ErrorKind::Io,
            FipError::Connection(_) => ErrorKind::Connection,
            FipError::Execution(_) => ErrorKind::Execution,
            FipError::Auth { .. } => ErrorKind::Auth,
            FipError::Http(_) => ErrorKind::Http,
            FipError::Parse(_) => ErrorKind::Parse,
            FipError::NotFound(_) => ErrorKind::NotFound,
            FipError::InvalidAction(_) => ErrorKind::InvalidAction,
            FipError::Config(_) => ErrorKind::Config,
            FipError::Persist(_) => ErrorKind::Persist,
            FipError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Returns true if the remote host could not be reached or did not answer in time
    pub fn is_transport(&self) -> bool {
        matches!(self, FipError::Connection(_) | FipError::Execution(_))
    }

    /// Returns true if this error means the operation itself cannot proceed,
    /// as opposed to a single target being unhealthy
    pub fn is_fatal(&self) -> bool {
        matches!(self, FipError::Config(_) | FipError::Persist(_))
    }
}

impl From<reqwest::Error> for FipError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            FipError::Parse(e.to_string())
        } else {
            FipError::Http(e.to_string())
        }
    }
}

impl From<tokio::task::JoinError> for FipError {
    fn from(e: tokio::task::JoinError) -> Self {
        FipError::Internal(format!("worker task failed: {}", e))
    }
}

impl From<serde_json::Error> for FipError {
    fn from(e: serde_json::Error) -> Self {
        FipError::Parse(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, FipError>;
