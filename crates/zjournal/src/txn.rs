//! The transaction helper.
//!
//! Every logical journal operation runs inside one backing-store
//! transaction wrapped in a [`TxnCtx`]: the store transaction, a sticky
//! error, and a shadow copy of the metadata. Operations mutate only the
//! shadow; a successful commit writes the changed metadata into the same
//! transaction *before* the store commit, and the caller publishes the
//! returned shadow into the live journal struct afterwards. On abort (or
//! any failure) the shadow is simply dropped, so metadata and data can
//! never be observed out of step.
//!
//! The sticky error makes composition safe: once an operation on the
//! helper fails, every later operation is a no-op and `commit` returns
//! the first error. Helper routines receive `&mut TxnCtx` when they run
//! inside the caller's transaction; only the owner of the context
//! commits.

use std::sync::Arc;

use zjournal_error::{JournalError, Result, StoreError};
use zjournal_store::{Cursor, Db, Env, ReadTxn, TxnRead, WriteTxn};

use crate::meta::{self, Metadata};

/// Handles of the three named sub-databases.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Dbs {
    pub data: Db,
    pub meta: Db,
    pub merged: Db,
}

enum StoreTxn<'e> {
    Read(ReadTxn),
    Write(WriteTxn<'e>),
    /// Transient state while restarting; never observable.
    Gone,
}

/// One journal operation's transaction state.
pub(crate) struct TxnCtx<'e> {
    env: &'e Env,
    dbs: Dbs,
    txn: StoreTxn<'e>,
    /// Shadow metadata; published by the caller after a successful commit.
    pub shadow: Metadata,
    meta_dirty: bool,
    err: Option<JournalError>,
}

impl<'e> TxnCtx<'e> {
    /// Begins a read-only context.
    pub fn begin_ro(env: &'e Env, dbs: Dbs, meta: &Metadata) -> Self {
        Self {
            env,
            dbs,
            txn: StoreTxn::Read(env.read_txn()),
            shadow: *meta,
            meta_dirty: false,
            err: None,
        }
    }

    /// Begins a read-write context, blocking on the store's writer lock.
    pub fn begin_rw(env: &'e Env, dbs: Dbs, meta: &Metadata) -> Self {
        Self {
            env,
            dbs,
            txn: StoreTxn::Write(env.write_txn()),
            shadow: *meta,
            meta_dirty: false,
            err: None,
        }
    }

    /// Whether no operation has failed yet.
    pub fn ok(&self) -> bool {
        self.err.is_none()
    }

    /// Records `err` if the context has not failed yet.
    pub fn fail(&mut self, err: JournalError) {
        if self.err.is_none() {
            self.err = Some(err);
        }
    }

    /// Marks the shadow metadata as needing persistence at commit.
    pub fn touch_meta(&mut self) {
        self.meta_dirty = true;
    }

    /// Looks up `key`; a miss is not an error.
    pub fn find(&mut self, db: Db, key: &[u8]) -> Option<Arc<[u8]>> {
        if self.err.is_some() {
            return None;
        }
        TxnRead::get(self, db, key)
    }

    /// Looks up `key`; a miss records [`JournalError::NotFound`].
    pub fn find_or_fail(&mut self, db: Db, key: &[u8]) -> Option<Arc<[u8]>> {
        if self.err.is_some() {
            return None;
        }
        let found = TxnRead::get(self, db, key);
        if found.is_none() {
            self.fail(JournalError::NotFound);
        }
        found
    }

    /// Inserts a record (write contexts only).
    pub fn insert(&mut self, db: Db, key: &[u8], val: &[u8]) {
        if self.err.is_some() {
            return;
        }
        let result = match &mut self.txn {
            StoreTxn::Write(txn) => txn.put(db, key, val).map_err(JournalError::from),
            _ => Err(JournalError::InvalidArgument {
                what: "write on a read-only transaction",
            }),
        };
        if let Err(err) = result {
            self.fail(err);
        }
    }

    /// Deletes a record if present (write contexts only).
    pub fn delete(&mut self, db: Db, key: &[u8]) {
        if self.err.is_some() {
            return;
        }
        let result = match &mut self.txn {
            StoreTxn::Write(txn) => txn.del(db, key).map_err(JournalError::from),
            _ => Err(JournalError::InvalidArgument {
                what: "write on a read-only transaction",
            }),
        };
        if let Err(err) = result {
            self.fail(err);
        }
    }

    /// Number of records in `db`.
    pub fn count(&self, db: Db) -> usize {
        TxnRead::count(self, db)
    }

    /// Opens a cursor over `db`.
    pub fn cursor(&self, db: Db) -> Cursor {
        TxnRead::cursor(self, db)
    }

    /// If the sticky error is the store's *transaction-full* signal,
    /// clears it and returns `true` so the caller can restart.
    pub fn take_txn_full(&mut self) -> bool {
        if matches!(self.err, Some(JournalError::Store(StoreError::TxnFull))) {
            self.err = None;
            true
        } else {
            false
        }
    }

    /// Commits the current store transaction and opens a fresh one,
    /// keeping the shadow and sticky state.
    ///
    /// Used by the writer's sub-commits and the iterator's refresh. The
    /// shadow metadata is persisted with the commit, so whatever marker
    /// the caller placed in it (the dirty serial) is durable.
    pub fn restart(&mut self) -> Result<()> {
        if let Some(err) = self.err.take() {
            return Err(err);
        }
        match std::mem::replace(&mut self.txn, StoreTxn::Gone) {
            StoreTxn::Write(mut txn) => {
                if self.meta_dirty {
                    meta::write_fields(&mut txn, self.dbs.meta, &self.shadow)
                        .map_err(JournalError::from)?;
                }
                txn.commit().map_err(JournalError::from)?;
                self.txn = StoreTxn::Write(self.env.write_txn());
                Ok(())
            }
            StoreTxn::Read(_) | StoreTxn::Gone => {
                self.txn = StoreTxn::Read(self.env.read_txn());
                Ok(())
            }
        }
    }

    /// Commits and returns the shadow for the caller to publish. Returns
    /// the sticky error instead if any operation failed; the transaction
    /// is then discarded.
    pub fn commit(mut self) -> Result<Metadata> {
        if let Some(err) = self.err.take() {
            return Err(err);
        }
        match std::mem::replace(&mut self.txn, StoreTxn::Gone) {
            StoreTxn::Write(mut txn) => {
                if self.meta_dirty {
                    meta::write_fields(&mut txn, self.dbs.meta, &self.shadow)
                        .map_err(JournalError::from)?;
                }
                txn.commit().map_err(JournalError::from)?;
            }
            // Read-only contexts have nothing to make durable.
            StoreTxn::Read(_) | StoreTxn::Gone => {}
        }
        Ok(self.shadow)
    }

    /// Discards the transaction and the shadow, returning the sticky
    /// error if one was recorded.
    pub fn abort(mut self) -> Result<()> {
        match self.err.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl TxnRead for TxnCtx<'_> {
    fn get(&self, db: Db, key: &[u8]) -> Option<Arc<[u8]>> {
        match &self.txn {
            StoreTxn::Read(txn) => txn.get(db, key),
            StoreTxn::Write(txn) => txn.get(db, key),
            StoreTxn::Gone => None,
        }
    }

    fn next_after(&self, db: Db, key: &[u8]) -> Option<(Vec<u8>, Arc<[u8]>)> {
        match &self.txn {
            StoreTxn::Read(txn) => txn.next_after(db, key),
            StoreTxn::Write(txn) => txn.next_after(db, key),
            StoreTxn::Gone => None,
        }
    }

    fn first(&self, db: Db) -> Option<(Vec<u8>, Arc<[u8]>)> {
        match &self.txn {
            StoreTxn::Read(txn) => txn.first(db),
            StoreTxn::Write(txn) => txn.first(db),
            StoreTxn::Gone => None,
        }
    }

    fn count(&self, db: Db) -> usize {
        match &self.txn {
            StoreTxn::Read(txn) => txn.count(db),
            StoreTxn::Write(txn) => txn.count(db),
            StoreTxn::Gone => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zjournal_store::EnvOptions;

    fn setup() -> (tempfile::TempDir, Env, Dbs) {
        let dir = tempfile::tempdir().unwrap();
        let env = Env::open(EnvOptions::new(dir.path(), 1 << 20)).unwrap();
        let dbs = Dbs {
            data: env.open_db("data").unwrap(),
            meta: env.open_db("meta").unwrap(),
            merged: env.open_db("merged").unwrap(),
        };
        (dir, env, dbs)
    }

    #[test]
    fn sticky_error_turns_later_operations_into_noops() {
        let (_dir, env, dbs) = setup();
        let meta = Metadata::default();
        let mut ctx = TxnCtx::begin_rw(&env, dbs, &meta);

        ctx.find_or_fail(dbs.data, b"missing");
        assert!(!ctx.ok());

        // These must not reach the store.
        ctx.insert(dbs.data, b"k", b"v");
        ctx.delete(dbs.data, b"k");
        assert!(matches!(ctx.commit(), Err(JournalError::NotFound)));

        assert!(env.read_txn().get(dbs.data, b"k").is_none());
    }

    #[test]
    fn commit_persists_dirty_shadow_with_the_data() {
        let (_dir, env, dbs) = setup();
        {
            let mut txn = env.write_txn();
            meta::init(&mut txn, dbs.meta, &zjournal_types::Dname::parse("test").unwrap())
                .unwrap();
            txn.commit().unwrap();
        }

        let meta0 = Metadata::default();
        let mut ctx = TxnCtx::begin_rw(&env, dbs, &meta0);
        ctx.insert(dbs.data, b"k", b"v");
        ctx.shadow.first_serial = zjournal_types::Serial(3);
        ctx.touch_meta();
        let published = ctx.commit().unwrap();
        assert_eq!(published.first_serial, zjournal_types::Serial(3));

        let reloaded = meta::load(&env.read_txn(), dbs.meta).unwrap().unwrap();
        assert_eq!(reloaded.first_serial, zjournal_types::Serial(3));
        assert_eq!(
            env.read_txn().get(dbs.data, b"k").unwrap().as_ref(),
            b"v"
        );
    }

    #[test]
    fn abort_discards_shadow_and_data() {
        let (_dir, env, dbs) = setup();
        let meta0 = Metadata::default();
        let mut ctx = TxnCtx::begin_rw(&env, dbs, &meta0);
        ctx.insert(dbs.data, b"k", b"v");
        ctx.shadow.first_serial = zjournal_types::Serial(3);
        ctx.touch_meta();
        ctx.abort().unwrap();

        assert!(env.read_txn().get(dbs.data, b"k").is_none());
    }

    #[test]
    fn restart_splits_one_logical_operation_across_commits() {
        let (_dir, env, dbs) = setup();
        {
            let mut txn = env.write_txn();
            meta::init(&mut txn, dbs.meta, &zjournal_types::Dname::parse("test").unwrap())
                .unwrap();
            txn.commit().unwrap();
        }

        let meta0 = Metadata::default();
        let mut ctx = TxnCtx::begin_rw(&env, dbs, &meta0);
        ctx.insert(dbs.data, b"a", b"1");
        ctx.restart().unwrap();

        // The first half is already durable.
        assert_eq!(env.read_txn().get(dbs.data, b"a").unwrap().as_ref(), b"1");

        ctx.insert(dbs.data, b"b", b"2");
        ctx.commit().unwrap();
        assert_eq!(env.read_txn().get(dbs.data, b"b").unwrap().as_ref(), b"2");
    }
}
