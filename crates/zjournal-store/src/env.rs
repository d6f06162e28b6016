//! The store environment: named sub-databases, snapshot state, writer
//! serialization.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use zjournal_error::{StoreError, StoreResult};

use crate::file;
use crate::txn::{ReadTxn, WriteTxn};
use crate::RECORD_OVERHEAD;

/// Options for [`Env::open`].
#[derive(Debug, Clone)]
pub struct EnvOptions {
    /// Directory holding the snapshot file. Created if absent.
    pub path: PathBuf,
    /// Requested mapping size in bytes. The persisted mapping only grows:
    /// opening an existing environment with a smaller value keeps the
    /// recorded one.
    pub mapsize: usize,
    /// Maximum number of named sub-databases.
    pub max_dbs: usize,
    /// Operation budget per write transaction; the operation that exceeds
    /// it fails with [`StoreError::TxnFull`].
    pub max_txn_ops: usize,
}

impl EnvOptions {
    /// Options with the conventional defaults for `mapsize` consumers.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, mapsize: usize) -> Self {
        Self {
            path: path.into(),
            mapsize,
            max_dbs: 8,
            max_txn_ops: 100_000,
        }
    }
}

/// Handle to a named sub-database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Db(pub(crate) usize);

/// Committed environment state: one ordered map per sub-database.
#[derive(Debug, Default, Clone)]
pub(crate) struct Snapshot {
    pub(crate) dbs: Vec<BTreeMap<Vec<u8>, Arc<[u8]>>>,
}

impl Snapshot {
    /// Occupied bytes across all sub-databases, with per-record overhead.
    pub(crate) fn used_bytes(&self) -> usize {
        self.dbs
            .iter()
            .flat_map(|db| db.iter())
            .map(|(k, v)| k.len() + v.len() + RECORD_OVERHEAD)
            .sum()
    }
}

#[derive(Debug)]
pub(crate) struct EnvState {
    pub(crate) snapshot: Arc<Snapshot>,
    pub(crate) db_names: Vec<String>,
    /// Recorded mapping size; monotonic across reopens, reset by `wipe`.
    pub(crate) mapsize: usize,
}

#[derive(Debug)]
pub(crate) struct EnvInner {
    pub(crate) path: PathBuf,
    pub(crate) opts: EnvOptions,
    pub(crate) state: RwLock<EnvState>,
    /// Serializes writers; held for the lifetime of a [`WriteTxn`].
    pub(crate) writer: Mutex<()>,
}

/// An open store environment.
#[derive(Debug, Clone)]
pub struct Env {
    pub(crate) inner: Arc<EnvInner>,
}

impl Env {
    /// Opens or creates the environment at `opts.path`.
    pub fn open(opts: EnvOptions) -> StoreResult<Self> {
        std::fs::create_dir_all(&opts.path).map_err(|_| StoreError::CannotOpen {
            path: opts.path.clone(),
        })?;

        let loaded = file::load(&opts.path)?;
        let state = match loaded {
            Some(persisted) => EnvState {
                mapsize: persisted.mapsize.max(opts.mapsize),
                snapshot: Arc::new(persisted.snapshot),
                db_names: persisted.db_names,
            },
            None => EnvState {
                snapshot: Arc::new(Snapshot::default()),
                db_names: Vec::new(),
                mapsize: opts.mapsize,
            },
        };

        tracing::debug!(
            path = %opts.path.display(),
            mapsize = state.mapsize,
            dbs = state.db_names.len(),
            "store environment opened"
        );

        Ok(Self {
            inner: Arc::new(EnvInner {
                path: opts.path.clone(),
                opts,
                state: RwLock::new(state),
                writer: Mutex::new(()),
            }),
        })
    }

    /// Whether an environment exists at `path`.
    #[must_use]
    pub fn exists(path: &Path) -> bool {
        file::snapshot_path(path).exists()
    }

    /// Opens a named sub-database, creating it if needed.
    pub fn open_db(&self, name: &str) -> StoreResult<Db> {
        let mut state = self.inner.state.write();
        if let Some(index) = state.db_names.iter().position(|n| n == name) {
            return Ok(Db(index));
        }
        if state.db_names.len() >= self.inner.opts.max_dbs {
            return Err(StoreError::TooManyDbs {
                max: self.inner.opts.max_dbs,
            });
        }
        state.db_names.push(name.to_string());
        let snapshot = Arc::make_mut(&mut state.snapshot);
        snapshot.dbs.push(BTreeMap::new());
        Ok(Db(state.db_names.len() - 1))
    }

    /// The recorded mapping size.
    #[must_use]
    pub fn mapsize(&self) -> usize {
        self.inner.state.read().mapsize
    }

    /// Occupied bytes of the last committed state.
    #[must_use]
    pub fn used_bytes(&self) -> usize {
        self.inner.state.read().snapshot.used_bytes()
    }

    /// Begins a read transaction against the last committed snapshot.
    #[must_use]
    pub fn read_txn(&self) -> ReadTxn {
        ReadTxn {
            snapshot: Arc::clone(&self.inner.state.read().snapshot),
        }
    }

    /// Begins the (single) write transaction, blocking until any current
    /// writer commits or aborts.
    #[must_use]
    pub fn write_txn(&self) -> WriteTxn<'_> {
        let guard = self.inner.writer.lock();
        let state = self.inner.state.read();
        WriteTxn::new(self, guard, (*state.snapshot).clone(), state.mapsize)
    }

    /// Destroys all on-disk and in-memory state and reinitializes an
    /// empty environment with the mapping size this handle requested.
    pub fn wipe(&self) -> StoreResult<()> {
        let _guard = self.inner.writer.lock();
        file::remove(&self.inner.path)?;
        let mut state = self.inner.state.write();
        let db_count = state.db_names.len();
        state.snapshot = Arc::new(Snapshot {
            dbs: vec![BTreeMap::new(); db_count],
        });
        state.mapsize = self.inner.opts.mapsize;
        tracing::debug!(path = %self.inner.path.display(), "store environment wiped");
        Ok(())
    }
}
