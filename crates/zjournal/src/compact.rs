//! Compaction: the flush marker and in-place merging.
//!
//! `flush` records that the caller has externalized the zone; it deletes
//! nothing itself, it only makes history evictable. Merging is the
//! alternative for zones whose policy disables external flushing: the
//! unflushed run of changesets is folded into a single merged changeset
//! in the reserved sub-database, after which the whole history counts as
//! flushed and can be evicted as space demands.

use tracing::debug;
use zjournal_error::{JournalError, Result};
use zjournal_types::Serial;

use crate::codec::{ChunkHeader, ChunkKey};
use crate::iter::walk_changesets;
use crate::journal::Journal;
use crate::meta::MetaFlags;
use crate::txn::TxnCtx;
use crate::write::InsertMode;

impl Journal {
    /// Declares all current history flushed. The caller's contract: the
    /// zone has been durably externalized before this call. Metadata
    /// only; idempotent.
    pub fn flush(&mut self) -> Result<()> {
        if !self.metadata.flags.contains(MetaFlags::SERIAL_TO_VALID) {
            return Ok(());
        }
        let mut ctx = TxnCtx::begin_rw(&self.env, self.dbs, &self.metadata);
        ctx.shadow.last_flushed = ctx.shadow.last_serial;
        ctx.shadow.flags.insert(MetaFlags::LAST_FLUSHED_VALID);
        ctx.touch_meta();
        let published = ctx.commit()?;
        self.metadata = published;
        Ok(())
    }

    /// Makes the history flushed one way or another: already flushed is
    /// a no-op, a merge-enabled zone merges in place, otherwise the
    /// caller is asked to flush with [`JournalError::Busy`].
    ///
    /// A leftover merged changeset on a fully flushed journal whose
    /// policy no longer allows merging is deleted here: the external
    /// flush has superseded it.
    pub(crate) fn try_flush(&mut self) -> Result<()> {
        if self.metadata.is_flushed() {
            if self.metadata.flags.contains(MetaFlags::MERGED_SERIAL_VALID)
                && !self.merge_enabled
            {
                self.delete_merged()?;
            }
            return Ok(());
        }
        if self.merge_enabled {
            return self.merge_journal();
        }
        Err(JournalError::Busy)
    }

    /// From-serial of the oldest unflushed changeset, or `None` when
    /// nothing is unflushed.
    fn find_first_unflushed(&self) -> Result<Option<Serial>> {
        if !self.metadata.flags.contains(MetaFlags::SERIAL_TO_VALID) {
            return Ok(None);
        }
        if !self.metadata.flags.contains(MetaFlags::LAST_FLUSHED_VALID) {
            return Ok(Some(self.metadata.first_serial));
        }

        let mut ctx = TxnCtx::begin_ro(&self.env, self.dbs, &self.metadata);
        let val = ctx.find_or_fail(
            self.dbs.data,
            &ChunkKey::new(self.metadata.last_flushed, 0).encode(),
        );
        let first = match val {
            Some(val) => ChunkHeader::decode(&val)?.serial_to,
            None => return Err(ctx.abort().unwrap_err()),
        };
        ctx.abort()?;

        if first == self.metadata.last_serial_to {
            return Ok(None);
        }
        Ok(Some(first))
    }

    /// Folds the unflushed history into the single merged changeset.
    ///
    /// The first time, the oldest unflushed changeset seeds the merge
    /// and leaves its ordinary keys; later runs reload the existing
    /// merged changeset and verify it still lines up with the chain.
    /// Afterwards the whole history is marked flushed.
    pub(crate) fn merge_journal(&mut self) -> Result<()> {
        let Some(from) = self.find_first_unflushed()? else {
            return Ok(());
        };

        let mut merged;
        if self.metadata.flags.contains(MetaFlags::MERGED_SERIAL_VALID) {
            merged = self.load_merged()?;
            if merged.serial_to != from {
                return Err(JournalError::Malformed {
                    detail: format!(
                        "merged changeset ends at {} but unflushed history starts at {from}",
                        merged.serial_to
                    ),
                });
            }
            self.delete_merged()?;
        } else {
            // Compacting a single changeset would only move it between
            // sub-databases.
            if from == self.metadata.last_serial {
                debug!(zone = %self.zone, serial = %from, "merge skipped, nothing to fold");
                return Ok(());
            }
            merged = self.load_one(self.dbs.data, from)?;
            self.delete_upto(self.dbs.data, from, from)?;
        }

        if merged.serial_to != self.metadata.last_serial_to {
            let fold_from = merged.serial_to;
            let mut folded = 0usize;
            let mut ctx = TxnCtx::begin_ro(&self.env, self.dbs, &self.metadata);
            walk_changesets(
                &mut ctx,
                self.dbs.data,
                fold_from,
                self.metadata.last_serial,
                |_, group| {
                    let next = self.decode_group(group)?;
                    merged.merge(&next)?;
                    folded += 1;
                    Ok(())
                },
            )?;
            debug!(
                zone = %self.zone,
                from = %merged.serial_from,
                to = %merged.serial_to,
                folded,
                "journal history merged"
            );
        }

        self.insert_changeset(&merged, InsertMode::Merged)?;

        // Everything the merged changeset covers counts as flushed now.
        let mut ctx = TxnCtx::begin_rw(&self.env, self.dbs, &self.metadata);
        ctx.shadow.last_flushed = ctx.shadow.last_serial;
        ctx.shadow.flags.insert(MetaFlags::LAST_FLUSHED_VALID);
        ctx.touch_meta();
        let published = ctx.commit()?;
        self.metadata = published;
        Ok(())
    }
}
