//! Deletion: eviction of flushed history, merged-changeset removal, and
//! dropping the whole journal content.
//!
//! All sweeps walk by chunk, delete inside the iteration transaction and
//! update the metadata shadow at each changeset boundary, so a commit at
//! any point (including a mid-sweep refresh) leaves the metadata
//! describing exactly the records that remain.

use std::ops::ControlFlow;

use zjournal_error::Result;
use zjournal_store::Db;
use zjournal_types::Serial;

use crate::codec::{ChunkKey, KEY_LEN};
use crate::iter::walk_chunks;
use crate::journal::Journal;
use crate::meta::{MetaFlags, Metadata};
use crate::txn::TxnCtx;

/// Charged per deleted record when estimating freed space, matching the
/// store's page-granular accounting.
const FREED_OVERHEAD: usize = zjournal_store::RECORD_OVERHEAD + KEY_LEN;

/// Metadata bookkeeping after the last chunk of `deleted` is gone:
/// `serial_to` becomes the new chain head, and watermarks naming the
/// deleted changeset lose their validity.
fn deleted_update_metadata(shadow: &mut Metadata, deleted: Serial, serial_to: Serial) {
    if shadow.last_flushed == deleted {
        shadow.flags.remove(MetaFlags::LAST_FLUSHED_VALID);
    }
    if shadow.last_serial == deleted {
        shadow.flags.remove(MetaFlags::SERIAL_TO_VALID);
        return;
    }
    shadow.first_serial = serial_to;
}

impl Journal {
    /// Deletes changesets `[dbfirst, last]` from `db`. For the data
    /// sub-database the metadata shadow tracks the moving chain head.
    pub(crate) fn delete_upto(&mut self, db: Db, dbfirst: Serial, last: Serial) -> Result<()> {
        let is_data = db == self.dbs.data;
        let mut ctx = TxnCtx::begin_rw(&self.env, self.dbs, &self.metadata);
        walk_chunks(&mut ctx, db, dbfirst, last, |ctx, step| {
            ctx.delete(db, &ChunkKey::new(step.serial, step.chunk_index).encode());
            if is_data && step.chunk_index == step.chunk_count - 1 {
                deleted_update_metadata(&mut ctx.shadow, step.serial, step.serial_to);
                ctx.touch_meta();
            }
            Ok(ControlFlow::Continue(()))
        })?;
        let published = ctx.commit()?;
        self.metadata = published;
        Ok(())
    }

    /// Deletes the merged changeset, if any, and drops its validity bit.
    pub(crate) fn delete_merged(&mut self) -> Result<()> {
        if !self.metadata.flags.contains(MetaFlags::MERGED_SERIAL_VALID) {
            return Ok(());
        }
        let serial = self.metadata.merged_serial;
        let mut ctx = TxnCtx::begin_rw(&self.env, self.dbs, &self.metadata);
        walk_chunks(&mut ctx, self.dbs.merged, serial, serial, |ctx, step| {
            ctx.delete(
                self.dbs.merged,
                &ChunkKey::new(step.serial, step.chunk_index).encode(),
            );
            Ok(ControlFlow::Continue(()))
        })?;
        ctx.shadow.flags.remove(MetaFlags::MERGED_SERIAL_VALID);
        ctx.touch_meta();
        let published = ctx.commit()?;
        self.metadata = published;
        Ok(())
    }

    /// Deletes the merged changeset and the whole `[first_serial,
    /// last_serial]` history, clearing the corresponding flags.
    pub fn drop_all(&mut self) -> Result<()> {
        self.delete_merged()?;
        if self.metadata.flags.contains(MetaFlags::SERIAL_TO_VALID) {
            self.delete_upto(
                self.dbs.data,
                self.metadata.first_serial,
                self.metadata.last_serial,
            )?;
        }
        Ok(())
    }

    /// Evicts flushed history from the front of the chain until roughly
    /// `to_free` bytes are reclaimed, never touching unflushed
    /// changesets. Returns the freed estimate; zero when nothing is
    /// flushed yet.
    pub(crate) fn delete_tofree(&mut self, to_free: usize) -> Result<usize> {
        if !self.metadata.flags.contains(MetaFlags::LAST_FLUSHED_VALID) {
            return Ok(0);
        }
        let last_flushed = self.metadata.last_flushed;
        let data = self.dbs.data;
        let mut freed = 0usize;

        let mut ctx = TxnCtx::begin_rw(&self.env, self.dbs, &self.metadata);
        walk_chunks(
            &mut ctx,
            data,
            self.metadata.first_serial,
            self.metadata.last_serial,
            |ctx, step| {
                ctx.delete(data, &ChunkKey::new(step.serial, step.chunk_index).encode());
                freed += FREED_OVERHEAD + step.val.len();
                if step.chunk_index == step.chunk_count - 1 {
                    deleted_update_metadata(&mut ctx.shadow, step.serial, step.serial_to);
                    ctx.touch_meta();
                    // The flushed watermark is the last evictable
                    // changeset; everything past it is unflushed.
                    if freed >= to_free || step.serial == last_flushed {
                        return Ok(ControlFlow::Break(()));
                    }
                }
                Ok(ControlFlow::Continue(()))
            },
        )?;
        let published = ctx.commit()?;
        self.metadata = published;
        Ok(freed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boundary_bookkeeping_moves_the_chain_head() {
        let mut shadow = Metadata {
            first_serial: Serial(3),
            last_serial: Serial(9),
            last_serial_to: Serial(10),
            last_flushed: Serial(5),
            flags: MetaFlags::SERIAL_TO_VALID | MetaFlags::LAST_FLUSHED_VALID,
            ..Metadata::default()
        };

        deleted_update_metadata(&mut shadow, Serial(3), Serial(4));
        assert_eq!(shadow.first_serial, Serial(4));
        assert!(shadow.flags.contains(MetaFlags::LAST_FLUSHED_VALID));

        // Deleting the flushed watermark clears its validity.
        deleted_update_metadata(&mut shadow, Serial(5), Serial(6));
        assert_eq!(shadow.first_serial, Serial(6));
        assert!(!shadow.flags.contains(MetaFlags::LAST_FLUSHED_VALID));

        // Deleting the newest changeset empties the chain.
        deleted_update_metadata(&mut shadow, Serial(9), Serial(10));
        assert!(!shadow.flags.contains(MetaFlags::SERIAL_TO_VALID));
        assert_eq!(shadow.first_serial, Serial(6), "head stays put on the last delete");
    }
}
