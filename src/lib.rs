// Copyright (c) 2025, Joe Drago <joedrago@gmail.com>
// SPDX-License-Identifier: BSD-2-Clause

pub mod agent;
pub mod cloud;
pub mod config;
pub mod engine;
pub mod error;
pub mod logger;
pub mod model;
pub mod poller;
pub mod reconcile;
pub mod remote;
pub mod store;
