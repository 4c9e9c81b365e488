// Copyright (c) 2025, Joe Drago <joedrago@gmail.com>
// SPDX-License-Identifier: BSD-2-Clause

use std::any::Any;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinError;

use crate::error::{ErrorKind, FipError, Result};

/// One target's result from a fan-out. Every target produces exactly one.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    Success(T),
    Failure { kind: ErrorKind, message: String },
}

impl<T> Outcome<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    pub fn ok(self) -> Option<T> {
        match self {
            Outcome::Success(v) => Some(v),
            Outcome::Failure { .. } => None,
        }
    }

    fn panicked(e: JoinError) -> Self {
        let message = if e.is_panic() {
            format!("worker panicked: {}", panic_message(e.into_panic()))
        } else {
            "worker cancelled".to_string()
        };
        Outcome::Failure {
            kind: ErrorKind::Internal,
            message,
        }
    }

    fn settle(joined: std::result::Result<Result<T>, JoinError>) -> Self {
        match joined {
            Ok(Ok(v)) => Outcome::Success(v),
            Ok(Err(e)) => Outcome::from(e),
            Err(e) => Outcome::panicked(e),
        }
    }
}

impl<T> From<FipError> for Outcome<T> {
    fn from(e: FipError) -> Self {
        Outcome::Failure {
            kind: e.kind(),
            message: e.to_string(),
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Run `worker` over every target with at most `max_concurrency` in flight.
///
/// Results come back in submission order. A failing or panicking worker
/// yields a `Failure` for its own slot and never affects its siblings.
pub async fn poll_all<T, R, F, Fut>(targets: Vec<T>, max_concurrency: usize, worker: F) -> Vec<Outcome<R>>
where
    T: Send + 'static,
    R: Send + 'static,
    F: Fn(T) -> Fut,
    Fut: Future<Output = Result<R>> + Send + 'static,
{
    let semaphore = Arc::new(Semaphore::new(max_concurrency.max(1)));
    let mut handles = Vec::with_capacity(targets.len());

    for target in targets {
        let semaphore = Arc::clone(&semaphore);
        let work = worker(target);
        handles.push(tokio::spawn(async move {
            let _permit = semaphore.acquire_owned().await.ok();
            work.await
        }));
    }

    let mut results = Vec::with_capacity(handles.len());
    for handle in handles {
        results.push(Outcome::settle(handle.await));
    }
    results
}

/// Like `poll_all`, for workers that block (remote shell sessions).
///
/// Each worker runs on the blocking pool while holding a permit.
pub async fn poll_all_blocking<T, R, F>(targets: Vec<T>, max_concurrency: usize, worker: F) -> Vec<Outcome<R>>
where
    T: Send + 'static,
    R: Send + 'static,
    F: Fn(T) -> Result<R> + Send + Sync + 'static,
{
    let semaphore = Arc::new(Semaphore::new(max_concurrency.max(1)));
    let worker = Arc::new(worker);
    let mut handles = Vec::with_capacity(targets.len());

    for target in targets {
        let semaphore = Arc::clone(&semaphore);
        let worker = Arc::clone(&worker);
        handles.push(tokio::spawn(async move {
            let _permit = semaphore.acquire_owned().await.ok();
            Outcome::settle(tokio::task::spawn_blocking(move || worker(target)).await)
        }));
    }

    let mut results = Vec::with_capacity(handles.len());
    for handle in handles {
        results.push(match handle.await {
            Ok(outcome) => outcome,
            Err(e) => Outcome::panicked(e),
        });
    }
    results
}
