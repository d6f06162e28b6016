//! Walking the chunk chain.
//!
//! Iteration covers the changeset interval `[first, last]` inclusive and
//! follows the continuity chain rather than raw key order: after the last
//! chunk of a changeset, the next serial is the *current* header's
//! `serial_to`. Recycled serials elsewhere in the key space therefore
//! cannot derail the walk.
//!
//! Stepping is optimistic: try the store's next record and fall back to
//! an exact seek when it is not the expected `(serial, chunk)` key, since a
//! fragmented write can land a later chunk elsewhere in the file.
//!
//! When a callback (or the walk's own deletes) hits the store's
//! *transaction-full* signal, the walk commits, reopens the transaction,
//! re-seeks and retries. In by-changeset mode a guard tracks the serial
//! that triggered the refresh: if the same changeset asks again without
//! progress it cannot fit a transaction at all, and the walk fails
//! instead of looping.

use std::ops::ControlFlow;
use std::sync::Arc;

use zjournal_error::{JournalError, Result, StoreError};
use zjournal_store::{Cursor, Db};
use zjournal_types::Serial;

use crate::codec::{ChunkHeader, ChunkKey};
use crate::txn::TxnCtx;

/// One physical chunk presented to a by-chunk callback.
pub(crate) struct ChunkStep {
    pub serial: Serial,
    pub serial_to: Serial,
    pub chunk_index: u32,
    pub chunk_count: u32,
    pub val: Arc<[u8]>,
}

/// One whole changeset presented to a by-changeset callback: all chunk
/// values, headers included, in index order.
pub(crate) struct ChangesetGroup {
    pub serial: Serial,
    pub serial_to: Serial,
    pub vals: Vec<Arc<[u8]>>,
}

fn decode_positioned(cursor: &Cursor) -> Result<(ChunkKey, ChunkHeader, Arc<[u8]>)> {
    let key = ChunkKey::decode(cursor.key().expect("cursor is positioned"))?;
    let val: Arc<[u8]> = cursor
        .val()
        .expect("cursor is positioned")
        .to_vec()
        .into();
    let header = ChunkHeader::decode(&val)?;
    if header.chunk_count == 0 {
        return Err(JournalError::Malformed {
            detail: format!("chunk {key:?} claims zero chunks"),
        });
    }
    Ok((key, header, val))
}

/// Moves to `expected`, first optimistically via the next record, then by
/// an exact seek. Returns whether the record exists.
fn step_to(ctx: &TxnCtx<'_>, cursor: &mut Cursor, expected: ChunkKey) -> bool {
    let key = expected.encode();
    if cursor.next(ctx) && cursor.key() == Some(key.as_slice()) {
        return true;
    }
    cursor.seek(ctx, &key)
}

fn is_txn_full(err: &JournalError) -> bool {
    matches!(err, JournalError::Store(StoreError::TxnFull))
}

/// Walks `[first, last]` chunk by chunk.
///
/// The callback may delete records through the context and may stop the
/// walk early with [`ControlFlow::Break`] (only at a changeset boundary).
/// A missing changeset start mid-chain is an error here: by-chunk walks
/// are used for deletion sweeps, which must see the whole interval.
pub(crate) fn walk_chunks(
    ctx: &mut TxnCtx<'_>,
    db: Db,
    first: Serial,
    last: Serial,
    mut cb: impl FnMut(&mut TxnCtx<'_>, &ChunkStep) -> Result<ControlFlow<()>>,
) -> Result<()> {
    let mut serial = first;
    let mut chunk_index = 0u32;
    let mut cursor = ctx.cursor(db);
    if !cursor.seek(ctx, &ChunkKey::new(serial, chunk_index).encode()) {
        return Err(JournalError::NotFound);
    }

    loop {
        let (_, header, val) = decode_positioned(&cursor)?;
        let step = ChunkStep {
            serial,
            serial_to: header.serial_to,
            chunk_index,
            chunk_count: header.chunk_count,
            val,
        };

        let mut flow = cb(ctx, &step);
        let refresh = match &flow {
            Err(err) if is_txn_full(err) => true,
            _ => ctx.take_txn_full(),
        };
        if refresh {
            ctx.restart()?;
            if !cursor.seek(ctx, &ChunkKey::new(serial, chunk_index).encode()) {
                return Err(JournalError::NotFound);
            }
            flow = cb(ctx, &step);
        }
        let flow = flow?;
        if !ctx.ok() {
            // The sticky error surfaces at commit; stop walking.
            return Ok(());
        }

        if chunk_index == header.chunk_count - 1 {
            if matches!(flow, ControlFlow::Break(())) || serial == last {
                return Ok(());
            }
            serial = header.serial_to;
            chunk_index = 0;
        } else {
            chunk_index += 1;
        }

        if !step_to(ctx, &mut cursor, ChunkKey::new(serial, chunk_index)) {
            return Err(JournalError::NotFound);
        }
    }
}

/// Walks `[first, last]` changeset by changeset, buffering each
/// changeset's chunks.
///
/// A missing changeset start mid-chain ends the walk without error; the
/// caller sees a shorter list and decides (the reader uses this to detect
/// a gap and fall back to a full transfer). A gap *inside* a changeset is
/// corruption.
pub(crate) fn walk_changesets(
    ctx: &mut TxnCtx<'_>,
    db: Db,
    first: Serial,
    last: Serial,
    mut cb: impl FnMut(&mut TxnCtx<'_>, &ChangesetGroup) -> Result<()>,
) -> Result<()> {
    let mut serial = first;
    let mut chunk_index = 0u32;
    let mut vals: Vec<Arc<[u8]>> = Vec::new();
    let mut last_refreshed: Option<Serial> = None;

    let mut cursor = ctx.cursor(db);
    if !cursor.seek(ctx, &ChunkKey::new(serial, chunk_index).encode()) {
        return Err(JournalError::NotFound);
    }

    loop {
        let (_, header, val) = decode_positioned(&cursor)?;
        if chunk_index == 0 {
            vals.clear();
        }
        vals.push(val);

        if chunk_index == header.chunk_count - 1 {
            let group = ChangesetGroup {
                serial,
                serial_to: header.serial_to,
                vals: std::mem::take(&mut vals),
            };
            match cb(ctx, &group) {
                Ok(()) => {}
                Err(err) if is_txn_full(&err) => {
                    // A changeset that cannot fit one transaction would
                    // refresh forever; bail out instead.
                    if last_refreshed == Some(serial) {
                        return Err(err);
                    }
                    last_refreshed = Some(serial);
                    ctx.restart()?;
                    chunk_index = 0;
                    if !cursor.seek(ctx, &ChunkKey::new(serial, chunk_index).encode()) {
                        return Err(JournalError::NotFound);
                    }
                    continue;
                }
                Err(err) => return Err(err),
            }
            if !ctx.ok() {
                return Ok(());
            }

            if serial == last {
                return Ok(());
            }
            serial = header.serial_to;
            chunk_index = 0;
            last_refreshed = None;
        } else {
            chunk_index += 1;
        }

        if !step_to(ctx, &mut cursor, ChunkKey::new(serial, chunk_index)) {
            if chunk_index == 0 {
                // Chain stops short of `last`; partial result.
                return Ok(());
            }
            return Err(JournalError::Malformed {
                detail: format!("changeset {serial} is missing chunk {chunk_index}"),
            });
        }
    }
}
