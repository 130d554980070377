//! Everything a running daemon owns, built once by the entry point and
//! handed to every request handler.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{info, warn};

use crate::compactor::{spawn_compactor, CompactorOptions};
use crate::config::Config;
use crate::error::{IndexError, Result};
use crate::indexer::watcher::{WatchOptions, WorkspaceWatcher};
use crate::indexer::{Indexer, IndexerOptions};
use crate::shutdown::Shutdown;
use crate::store::{KvStore, STORE_FILE_NAME};
use crate::workspace::{Workspace, WorkspaceRegistry};
use crate::writer::{spawn_flush_timer, WriteQueue, WriteWorker};

/// Layout version of `<home>/data`. Bumped on incompatible key changes.
pub const STORAGE_VERSION: &str = "1";

const VERSION_FILE_NAME: &str = "version";

/// Delay before the background sync of every workspace at startup.
pub const STARTUP_SYNC_DELAY: Duration = Duration::from_secs(1);

/// Knobs the tests turn down; the daemon uses the defaults.
#[derive(Debug, Clone, Default)]
pub struct ContextOptions {
    pub compactor: CompactorOptions,
    pub watch: WatchOptions,
    /// `None` skips the startup sync.
    pub startup_sync: Option<Duration>,
}

impl ContextOptions {
    pub fn daemon() -> Self {
        ContextOptions {
            startup_sync: Some(STARTUP_SYNC_DELAY),
            ..ContextOptions::default()
        }
    }
}

pub struct IndexerContext {
    pub config: Arc<Config>,
    pub store: Arc<KvStore>,
    pub queue: WriteQueue,
    pub registry: Arc<WorkspaceRegistry>,
    pub indexer: Arc<Indexer>,
    pub shutdown: Shutdown,
    watcher: WorkspaceWatcher,
    worker: Mutex<WriteWorker>,
    loops: Mutex<Vec<JoinHandle<()>>>,
}

/// Check `<data>/version`, writing it on first use.
pub fn check_storage_version(data_dir: &Path) -> Result<()> {
    let path = data_dir.join(VERSION_FILE_NAME);
    match std::fs::read_to_string(&path) {
        Ok(found) => {
            let found = found.trim();
            if found != STORAGE_VERSION {
                return Err(IndexError::VersionMismatch {
                    found: found.to_string(),
                    expected: STORAGE_VERSION.to_string(),
                });
            }
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            std::fs::write(&path, STORAGE_VERSION)?;
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

impl IndexerContext {
    pub fn open(config: Config) -> Result<Self> {
        Self::open_with(config, ContextOptions::daemon())
    }

    pub fn open_with(config: Config, options: ContextOptions) -> Result<Self> {
        let config = Arc::new(config);
        let data_dir = config.data_dir();
        std::fs::create_dir_all(&data_dir)?;
        check_storage_version(&data_dir)?;

        let store = KvStore::open(&data_dir.join(STORE_FILE_NAME))?;
        let (queue, worker) = WriteQueue::start(Arc::clone(&store))?;
        let shutdown = Shutdown::new();
        let mut loops = vec![
            spawn_flush_timer(queue.clone(), shutdown.clone())?,
            spawn_compactor(
                queue.clone(),
                Arc::clone(&store),
                shutdown.clone(),
                options.compactor,
            )?,
        ];

        let registry = Arc::new(WorkspaceRegistry::load(&store, queue.clone())?);
        let indexer = Arc::new(Indexer::new(
            Arc::clone(&store),
            queue.clone(),
            Arc::clone(&registry),
            IndexerOptions {
                max_file_size: config.server.max_file_size,
                workers: config.server.index_workers,
                filters: config.server.filters.clone(),
            },
            shutdown.clone(),
        ));

        let watcher = WorkspaceWatcher::start(Arc::clone(&indexer), shutdown.clone(), options.watch)?;
        for workspace in registry.list() {
            if let Err(e) = watcher.watch(&workspace.path) {
                warn!(workspace = %workspace.id, path = %workspace.path, error = %e, "Cannot watch workspace");
            }
        }
        if let Some(delay) = options.startup_sync {
            loops.push(indexer.spawn_startup_sync(delay)?);
        }

        info!(
            data = %data_dir.display(),
            workspaces = registry.list().len(),
            "Index context ready"
        );
        Ok(IndexerContext {
            config,
            store,
            queue,
            registry,
            indexer,
            shutdown,
            watcher,
            worker: Mutex::new(worker),
            loops: Mutex::new(loops),
        })
    }

    // ─── Workspace lifecycle ─────────────────────────────────────────

    /// Register `path`, start watching it and index it in the background.
    pub fn create_workspace(&self, path: &str) -> Result<Workspace> {
        let workspace = self.registry.create(path)?;
        if let Err(e) = self.watcher.watch(&workspace.path) {
            warn!(workspace = %workspace.id, error = %e, "Cannot watch workspace");
        }
        self.indexer.request_sync(workspace.clone())?;
        Ok(workspace)
    }

    pub fn delete_workspace(&self, path: &str) -> Result<Workspace> {
        let workspace = self.registry.delete(path)?;
        self.watcher.unwatch(&workspace.path);
        Ok(workspace)
    }

    // ─── Shutdown ────────────────────────────────────────────────────

    /// Raise shutdown, wait for the background loops, drain the write
    /// queue with a final flush and close the store. Idempotent.
    pub fn shutdown(&self) {
        self.shutdown.trigger();
        self.watcher.join();
        let loops: Vec<_> = self
            .loops
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect();
        for handle in loops {
            let _ = handle.join();
        }
        self.worker.lock().unwrap_or_else(|e| e.into_inner()).stop();
        if !self.store.is_closed() {
            self.store.close();
            info!("Index store closed");
        }
    }
}

impl Drop for IndexerContext {
    fn drop(&mut self) {
        self.shutdown();
    }
}
