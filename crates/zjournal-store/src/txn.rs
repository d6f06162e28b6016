//! Transactions and cursors.
//!
//! Readers hold an [`Arc`] of the committed snapshot and never block.
//! The writer holds the environment's writer mutex and works on a private
//! copy of the ordered maps; `commit` makes the copy durable first and
//! only then publishes it, so readers always observe a state that is on
//! disk.

use std::collections::Bound;
use std::sync::Arc;

use parking_lot::MutexGuard;
use zjournal_error::{StoreError, StoreResult};

use crate::env::{Db, Env, Snapshot};
use crate::file;
use crate::RECORD_OVERHEAD;

/// Read access shared by read and write transactions.
pub trait TxnRead {
    /// Looks up `key` exactly.
    fn get(&self, db: Db, key: &[u8]) -> Option<Arc<[u8]>>;

    /// Returns the first entry with a key strictly greater than `key`.
    fn next_after(&self, db: Db, key: &[u8]) -> Option<(Vec<u8>, Arc<[u8]>)>;

    /// Returns the entry with the smallest key.
    fn first(&self, db: Db) -> Option<(Vec<u8>, Arc<[u8]>)>;

    /// Number of records in the sub-database.
    fn count(&self, db: Db) -> usize;

    /// Opens a cursor over the sub-database.
    fn cursor(&self, db: Db) -> Cursor {
        Cursor { db, pos: None }
    }
}

fn db_view(snapshot: &Snapshot, db: Db) -> &std::collections::BTreeMap<Vec<u8>, Arc<[u8]>> {
    &snapshot.dbs[db.0]
}

/// A read-only snapshot transaction.
#[derive(Debug)]
pub struct ReadTxn {
    pub(crate) snapshot: Arc<Snapshot>,
}

impl TxnRead for ReadTxn {
    fn get(&self, db: Db, key: &[u8]) -> Option<Arc<[u8]>> {
        db_view(&self.snapshot, db).get(key).cloned()
    }

    fn next_after(&self, db: Db, key: &[u8]) -> Option<(Vec<u8>, Arc<[u8]>)> {
        db_view(&self.snapshot, db)
            .range::<[u8], _>((Bound::Excluded(key), Bound::Unbounded))
            .next()
            .map(|(k, v)| (k.clone(), v.clone()))
    }

    fn first(&self, db: Db) -> Option<(Vec<u8>, Arc<[u8]>)> {
        db_view(&self.snapshot, db)
            .iter()
            .next()
            .map(|(k, v)| (k.clone(), v.clone()))
    }

    fn count(&self, db: Db) -> usize {
        db_view(&self.snapshot, db).len()
    }
}

/// The environment's single write transaction.
///
/// Dropping the transaction without [`commit`](Self::commit) discards all
/// of its writes.
pub struct WriteTxn<'env> {
    env: &'env Env,
    _guard: MutexGuard<'env, ()>,
    working: Snapshot,
    mapsize: usize,
    used: usize,
    ops: usize,
}

impl<'env> WriteTxn<'env> {
    pub(crate) fn new(
        env: &'env Env,
        guard: MutexGuard<'env, ()>,
        working: Snapshot,
        mapsize: usize,
    ) -> Self {
        let used = working.used_bytes();
        Self {
            env,
            _guard: guard,
            working,
            mapsize,
            used,
            ops: 0,
        }
    }

    fn charge_op(&mut self) -> StoreResult<()> {
        self.ops += 1;
        if self.ops > self.env.inner.opts.max_txn_ops {
            return Err(StoreError::TxnFull);
        }
        Ok(())
    }

    /// Inserts or replaces a record.
    pub fn put(&mut self, db: Db, key: &[u8], val: &[u8]) -> StoreResult<()> {
        self.charge_op()?;
        self.put_raw(db, key, val)
    }

    /// Inserts or replaces a record without charging the operation
    /// budget.
    ///
    /// For bounded commit-time bookkeeping (the journal's metadata set):
    /// a transaction that hit its budget must still be able to finalize
    /// the records describing what it committed. The mapping-size check
    /// still applies.
    pub fn put_reserved(&mut self, db: Db, key: &[u8], val: &[u8]) -> StoreResult<()> {
        self.put_raw(db, key, val)
    }

    fn put_raw(&mut self, db: Db, key: &[u8], val: &[u8]) -> StoreResult<()> {
        let new_cost = key.len() + val.len() + RECORD_OVERHEAD;
        let old_cost = self.working.dbs[db.0]
            .get(key)
            .map(|old| key.len() + old.len() + RECORD_OVERHEAD)
            .unwrap_or(0);
        if self.used - old_cost + new_cost > self.mapsize {
            return Err(StoreError::MapFull);
        }
        self.used = self.used - old_cost + new_cost;
        self.working.dbs[db.0].insert(key.to_vec(), Arc::from(val));
        Ok(())
    }

    /// Deletes a record if present.
    pub fn del(&mut self, db: Db, key: &[u8]) -> StoreResult<()> {
        self.charge_op()?;
        if let Some(old) = self.working.dbs[db.0].remove(key) {
            self.used -= key.len() + old.len() + RECORD_OVERHEAD;
        }
        Ok(())
    }

    /// Makes the transaction durable and publishes it to readers.
    pub fn commit(mut self) -> StoreResult<()> {
        let inner = &self.env.inner;
        // Sub-databases registered after this transaction began still
        // need a slot in the published snapshot.
        let db_names: Vec<String> = inner.state.read().db_names.clone();
        while self.working.dbs.len() < db_names.len() {
            self.working.dbs.push(Default::default());
        }

        let mut state = inner.state.write();
        state.mapsize = state.mapsize.max(self.mapsize);
        file::store(&inner.path, state.mapsize, &db_names, &self.working)?;
        state.snapshot = Arc::new(std::mem::take(&mut self.working));
        tracing::debug!(ops = self.ops, used = self.used, "store transaction committed");
        Ok(())
    }

    /// Discards the transaction. Equivalent to dropping it.
    pub fn abort(self) {}
}

impl TxnRead for WriteTxn<'_> {
    fn get(&self, db: Db, key: &[u8]) -> Option<Arc<[u8]>> {
        self.working.dbs[db.0].get(key).cloned()
    }

    fn next_after(&self, db: Db, key: &[u8]) -> Option<(Vec<u8>, Arc<[u8]>)> {
        self.working.dbs[db.0]
            .range::<[u8], _>((Bound::Excluded(key), Bound::Unbounded))
            .next()
            .map(|(k, v)| (k.clone(), v.clone()))
    }

    fn first(&self, db: Db) -> Option<(Vec<u8>, Arc<[u8]>)> {
        self.working.dbs[db.0]
            .iter()
            .next()
            .map(|(k, v)| (k.clone(), v.clone()))
    }

    fn count(&self, db: Db) -> usize {
        self.working.dbs[db.0].len()
    }
}

/// A cursor over one sub-database.
///
/// The cursor stores its position by key, so the owning transaction stays
/// free for concurrent `put`/`del` calls between steps; deleting the
/// record under the cursor does not invalidate it.
#[derive(Debug, Clone)]
pub struct Cursor {
    db: Db,
    pos: Option<(Vec<u8>, Arc<[u8]>)>,
}

impl Cursor {
    /// Positions the cursor on `key` exactly. Returns whether the key
    /// exists; on a miss the position is cleared.
    pub fn seek(&mut self, txn: &impl TxnRead, key: &[u8]) -> bool {
        match txn.get(self.db, key) {
            Some(val) => {
                self.pos = Some((key.to_vec(), val));
                true
            }
            None => {
                self.pos = None;
                false
            }
        }
    }

    /// Advances to the next record in key order. Returns whether a record
    /// was found; at the end the position is cleared.
    pub fn next(&mut self, txn: &impl TxnRead) -> bool {
        let Some((key, _)) = &self.pos else {
            return false;
        };
        match txn.next_after(self.db, key) {
            Some(entry) => {
                self.pos = Some(entry);
                true
            }
            None => {
                self.pos = None;
                false
            }
        }
    }

    /// The key under the cursor.
    #[must_use]
    pub fn key(&self) -> Option<&[u8]> {
        self.pos.as_ref().map(|(k, _)| k.as_slice())
    }

    /// The value under the cursor.
    #[must_use]
    pub fn val(&self) -> Option<&[u8]> {
        self.pos.as_ref().map(|(_, v)| v.as_ref())
    }
}
