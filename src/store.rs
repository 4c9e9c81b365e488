// Copyright (c) 2025, Joe Drago <joedrago@gmail.com>
// SPDX-License-Identifier: BSD-2-Clause

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex as SyncMutex, RwLock};
use tokio::sync::{Mutex as AsyncMutex, MutexGuard};
use tracing::debug;

use crate::error::{FipError, Result};
use crate::model::{AgentStatusRecord, CloudInventoryRecord, Document, LogEntry};

/// Whole-document persistence
pub trait DocumentStore: Send + Sync {
    fn load(&self) -> Result<Document>;
    fn save(&self, doc: &Document) -> Result<()>;
}

/// A JSON file, replaced atomically on save
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        JsonFileStore { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl DocumentStore for JsonFileStore {
    fn load(&self) -> Result<Document> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("{} does not exist, starting empty", self.path.display());
                return Ok(Document::default());
            }
            Err(e) => return Err(FipError::Io(e)),
        };
        if text.trim().is_empty() {
            return Ok(Document::default());
        }
        Ok(serde_json::from_str(&text)?)
    }

    fn save(&self, doc: &Document) -> Result<()> {
        let persist = |e: io::Error| FipError::Persist(format!("{}: {}", self.path.display(), e));
        let text = serde_json::to_string_pretty(doc).map_err(|e| FipError::Persist(e.to_string()))?;

        let tmp = self.temp_path();
        fs::write(&tmp, text).map_err(persist)?;
        if let Err(e) = fs::rename(&tmp, &self.path) {
            let _ = fs::remove_file(&tmp);
            return Err(persist(e));
        }
        Ok(())
    }
}

/// Keeps the document in memory; used by tests and embedders with their own persistence
#[derive(Debug, Default)]
pub struct MemoryStore {
    doc: SyncMutex<Document>,
    saves: SyncMutex<u32>,
    fail_saves: AtomicBool,
}

impl MemoryStore {
    pub fn new(doc: Document) -> Self {
        MemoryStore {
            doc: SyncMutex::new(doc),
            ..Default::default()
        }
    }

    /// Make every following save fail with `FipError::Persist`
    pub fn fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    pub fn saved(&self) -> Document {
        self.doc.lock().clone()
    }

    pub fn save_count(&self) -> u32 {
        *self.saves.lock()
    }
}

impl DocumentStore for MemoryStore {
    fn load(&self) -> Result<Document> {
        Ok(self.doc.lock().clone())
    }

    fn save(&self, doc: &Document) -> Result<()> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(FipError::Persist("save rejected".to_string()));
        }
        *self.doc.lock() = doc.clone();
        *self.saves.lock() += 1;
        Ok(())
    }
}

/// In-memory view of the document with one writer per cache kind.
///
/// Readers take a snapshot and never wait on a refresh. A refresh holds its
/// kind's writer for as long as it runs, so two refreshes of the same kind
/// queue up while refreshes of different kinds proceed side by side. Every
/// commit saves the new document first and swaps it in only if that worked.
pub struct Store {
    backend: Arc<dyn DocumentStore>,
    current: RwLock<Document>,
    commit_lock: AsyncMutex<()>,
    status_writer: AsyncMutex<()>,
    inventory_writer: AsyncMutex<()>,
    logs_writer: AsyncMutex<()>,
}

impl Store {
    pub fn open(backend: Arc<dyn DocumentStore>) -> Result<Self> {
        let doc = backend.load()?;
        Ok(Store {
            backend,
            current: RwLock::new(doc),
            commit_lock: AsyncMutex::new(()),
            status_writer: AsyncMutex::new(()),
            inventory_writer: AsyncMutex::new(()),
            logs_writer: AsyncMutex::new(()),
        })
    }

    pub fn snapshot(&self) -> Document {
        self.current.read().clone()
    }

    /// Borrow the current document without cloning it
    pub fn read<R>(&self, f: impl FnOnce(&Document) -> R) -> R {
        f(&self.current.read())
    }

    pub async fn status_writer(&self) -> StatusWriter<'_> {
        StatusWriter {
            store: self,
            _guard: self.status_writer.lock().await,
        }
    }

    pub async fn inventory_writer(&self) -> InventoryWriter<'_> {
        InventoryWriter {
            store: self,
            _guard: self.inventory_writer.lock().await,
        }
    }

    pub async fn logs_writer(&self) -> LogsWriter<'_> {
        LogsWriter {
            store: self,
            _guard: self.logs_writer.lock().await,
        }
    }

    async fn commit(&self, apply: impl FnOnce(&mut Document)) -> Result<()> {
        let _commit = self.commit_lock.lock().await;
        let mut next = self.current.read().clone();
        apply(&mut next);

        let backend = self.backend.clone();
        let next = tokio::task::spawn_blocking(move || backend.save(&next).map(|()| next)).await??;
        *self.current.write() = next;
        Ok(())
    }
}

pub struct StatusWriter<'a> {
    store: &'a Store,
    _guard: MutexGuard<'a, ()>,
}

impl StatusWriter<'_> {
    /// Swap in a full poll's worth of records
    pub async fn replace(&self, records: BTreeMap<String, AgentStatusRecord>, timestamp: &str) -> Result<()> {
        self.store
            .commit(|doc| {
                doc.status_cache = records;
                doc.last_update = Some(timestamp.to_string());
            })
            .await
    }

    /// Replace a single agent's record, leaving the others alone
    pub async fn upsert(&self, record: AgentStatusRecord) -> Result<()> {
        self.store
            .commit(|doc| {
                doc.status_cache.insert(record.key(), record);
            })
            .await
    }
}

pub struct InventoryWriter<'a> {
    store: &'a Store,
    _guard: MutexGuard<'a, ()>,
}

impl InventoryWriter<'_> {
    pub async fn replace(&self, records: BTreeMap<String, CloudInventoryRecord>, timestamp: &str) -> Result<()> {
        self.store
            .commit(|doc| {
                doc.inventory_cache = records;
                doc.inventory_last_update = Some(timestamp.to_string());
            })
            .await
    }
}

pub struct LogsWriter<'a> {
    store: &'a Store,
    _guard: MutexGuard<'a, ()>,
}

impl LogsWriter<'_> {
    /// Overwrite the given keys; entries for other agents are kept
    pub async fn merge(&self, entries: Vec<(String, LogEntry)>) -> Result<()> {
        self.store
            .commit(|doc| {
                doc.logs_cache.extend(entries);
            })
            .await
    }
}
