//! The writer: storing a changeset.
//!
//! An insert is a pipeline: recover from discontinuity or a duplicate
//! serial (both are normal on the cyclic serial space), plan free space
//! against the policy ratios, serialize into chunks, and commit. A large
//! changeset is split across several store commits; between them the
//! dirty-serial marker is kept durable so a crash leaves a sweepable
//! trace instead of a half-written changeset.

use tracing::{debug, warn};
use zjournal_error::{JournalError, Result, StoreError};
use zjournal_types::Changeset;

use crate::codec::{ChunkHeader, ChunkKey, CHUNK_MAX, HEADER_LEN};
use crate::journal::Journal;
use crate::meta::MetaFlags;
use crate::txn::TxnCtx;

/// Which keyspace an insert targets and which metadata it advances.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum InsertMode {
    /// Ordinary history insert; may trigger recovery, eviction and
    /// flush/merge requests.
    Normal,
    /// Insert of the merged changeset into its reserved sub-database.
    Merged,
}

impl Journal {
    /// Stores one changeset. Returns [`JournalError::Busy`] when the
    /// caller must flush the zone first and retry,
    /// [`JournalError::NoSpace`] when the changeset cannot fit even
    /// after all permissible eviction.
    pub fn store_changeset(&mut self, changeset: &Changeset) -> Result<()> {
        self.insert_changeset(changeset, InsertMode::Normal)
    }

    /// Stores a batch, stopping at the first non-OK status.
    pub fn store_changesets(&mut self, changesets: &[Changeset]) -> Result<()> {
        for changeset in changesets {
            self.store_changeset(changeset)?;
        }
        Ok(())
    }

    pub(crate) fn insert_changeset(&mut self, ch: &Changeset, mode: InsertMode) -> Result<()> {
        let serial = ch.serial_from;
        let serial_to = ch.serial_to;

        // Discontinuity: the zone was reinitialized or its serials were
        // rewound. Older history can no longer be replayed against the
        // new chain, so flush it out and drop it.
        if mode == InsertMode::Normal
            && self.metadata.flags.contains(MetaFlags::SERIAL_TO_VALID)
            && self.metadata.last_serial_to != serial
        {
            warn!(
                zone = %self.zone,
                have = %self.metadata.last_serial_to,
                inserting = %serial,
                "discontinuity in changes history, dropping older changesets"
            );
            self.try_flush()?;
            self.drop_all()?;
        }

        // A chunk keyed by the new to-serial means the serial space has
        // cycled onto stored history; evict the colliding prefix.
        if mode == InsertMode::Normal {
            let collision = {
                let mut ctx = TxnCtx::begin_ro(&self.env, self.dbs, &self.metadata);
                let found = ctx
                    .find(self.dbs.data, &ChunkKey::new(serial_to, 0).encode())
                    .is_some();
                ctx.abort()?;
                found
            };
            if collision {
                warn!(
                    zone = %self.zone,
                    serial = %serial_to,
                    "duplicate changeset serial, dropping older changesets"
                );
                self.try_flush()?;
                self.delete_upto(self.dbs.data, self.metadata.first_serial, serial_to)?;
            }
        }

        // Space planning: evict flushed history first; if that is not
        // enough, ask for a flush (or merge in place) and evict again.
        let (mut want, mut want_min) = self.check_free_space();
        let mut freed = 0;
        if freed < want_min {
            freed = self.delete_tofree(want)?;
        }
        if freed < want_min && mode == InsertMode::Normal {
            self.try_flush()?;
            want_min = want_min.saturating_sub(freed);
            want = want.saturating_sub(freed);
            freed = self.delete_tofree(want)?;
            if freed < want_min {
                return Err(JournalError::NoSpace);
            }
        }

        // Serialize and stamp each chunk with its header.
        let payload_max = CHUNK_MAX - HEADER_LEN;
        let payloads = ch.serialize_chunks(payload_max)?;
        let chunk_count = payloads.len() as u32;
        let vals: Vec<Vec<u8>> = payloads
            .into_iter()
            .map(|payload| {
                let header = ChunkHeader {
                    serial_to,
                    chunk_count,
                    chunk_size: payload.len() as u32,
                };
                let mut val = header.encode().to_vec();
                val.extend_from_slice(&payload);
                val
            })
            .collect();

        let db = match mode {
            InsertMode::Normal => self.dbs.data,
            InsertMode::Merged => self.dbs.merged,
        };
        let budget = (self.space.max_insert_txn * self.size_limit as f32) as usize;

        let mut ctx = TxnCtx::begin_rw(&self.env, self.dbs, &self.metadata);

        // A retry of an insert that previously died between sub-commits
        // replaces the partial write: drop its marker and any surplus
        // chunks beyond the new count.
        if ctx.shadow.flags.contains(MetaFlags::DIRTY_SERIAL_VALID)
            && ctx.shadow.dirty_serial == serial
        {
            for surplus in chunk_count.. {
                let key = ChunkKey::new(serial, surplus).encode();
                if ctx.find(db, &key).is_none() {
                    break;
                }
                ctx.delete(db, &key);
            }
            ctx.shadow.flags.remove(MetaFlags::DIRTY_SERIAL_VALID);
            ctx.touch_meta();
        }

        let mut inserted_bytes = 0usize;
        let mut committed_any = false;
        let mut failure = None;
        for (index, val) in vals.iter().enumerate() {
            let key = ChunkKey::new(serial, index as u32).encode();
            ctx.insert(db, &key, val);
            let retry = ctx.take_txn_full();
            inserted_bytes += val.len();
            if retry || inserted_bytes > budget {
                // Make the partial insert identifiable before it becomes
                // durable; the final commit clears the marker again.
                ctx.shadow.dirty_serial = serial;
                ctx.shadow.flags.insert(MetaFlags::DIRTY_SERIAL_VALID);
                ctx.touch_meta();
                if let Err(err) = ctx.restart() {
                    failure = Some(err);
                    break;
                }
                committed_any = true;
                ctx.shadow.flags.remove(MetaFlags::DIRTY_SERIAL_VALID);
                if retry {
                    ctx.insert(db, &key, val);
                    if ctx.take_txn_full() {
                        // A single chunk exceeding a whole transaction
                        // cannot be stored at all.
                        failure = Some(JournalError::Store(StoreError::TxnFull));
                        break;
                    }
                }
                inserted_bytes = 0;
                debug!(zone = %self.zone, serial = %serial, chunk = index, "insert sub-committed");
            }
        }

        let outcome = match failure {
            Some(err) => {
                let _ = ctx.abort();
                Err(err)
            }
            None => {
                match mode {
                    InsertMode::Normal => {
                        if !ctx.shadow.flags.contains(MetaFlags::SERIAL_TO_VALID) {
                            ctx.shadow.first_serial = serial;
                        }
                        ctx.shadow.flags.insert(MetaFlags::SERIAL_TO_VALID);
                        ctx.shadow.last_serial = serial;
                        ctx.shadow.last_serial_to = serial_to;
                    }
                    InsertMode::Merged => {
                        ctx.shadow.flags.insert(MetaFlags::MERGED_SERIAL_VALID);
                        ctx.shadow.merged_serial = serial;
                    }
                }
                ctx.touch_meta();
                ctx.commit()
            }
        };

        match outcome {
            Ok(published) => {
                self.metadata = published;
                Ok(())
            }
            Err(err) => {
                let err = match err {
                    JournalError::Store(StoreError::MapFull) => JournalError::NoSpace,
                    other => other,
                };
                if committed_any {
                    // Part of the changeset is durable under the dirty
                    // marker. Sweep it now if possible; otherwise leave
                    // the marker for the open-time sweep.
                    if self.sweep_partial_insert(db, serial).is_err() {
                        self.metadata.dirty_serial = serial;
                        self.metadata.flags.insert(MetaFlags::DIRTY_SERIAL_VALID);
                    }
                }
                Err(err)
            }
        }
    }

    /// Best-effort removal of a partially committed insert, clearing the
    /// dirty marker with it.
    fn sweep_partial_insert(&mut self, db: zjournal_store::Db, serial: zjournal_types::Serial) -> Result<()> {
        let mut ctx = TxnCtx::begin_rw(&self.env, self.dbs, &self.metadata);
        for chunk_index in 0.. {
            let key = ChunkKey::new(serial, chunk_index).encode();
            if ctx.find(db, &key).is_none() {
                break;
            }
            ctx.delete(db, &key);
        }
        ctx.shadow.flags.remove(MetaFlags::DIRTY_SERIAL_VALID);
        ctx.touch_meta();
        let published = ctx.commit()?;
        self.metadata = published;
        Ok(())
    }

    /// How much to free before this insert, per the policy ratios: the
    /// minimum shortfall and the amortized (times dispose ratio) request.
    /// Returned as `(want, want_min)`.
    fn check_free_space(&self) -> (usize, usize) {
        let occupied = self.occupancy();
        let keep_free = if self.metadata.flags.contains(MetaFlags::MERGED_SERIAL_VALID) {
            self.space.keep_free_merged
        } else if self.merge_enabled {
            self.space.keep_free_for_merge
        } else {
            self.space.keep_free
        };
        let allowed = 1.0 - keep_free;
        let want_min = if occupied > allowed {
            ((occupied - allowed) * self.size_limit as f32) as usize
        } else {
            0
        };
        let want = (self.space.dispose_ratio * want_min as f32) as usize;
        debug!(
            zone = %self.zone,
            occupied,
            allowed,
            want_min,
            want,
            "insert space planning"
        );
        (want, want_min)
    }
}
