//! The journal handle: lifecycle, recovery, reading, self-check.

use std::path::{Path, PathBuf};

use tracing::{info, warn};
use zjournal_error::{JournalError, Result};
use zjournal_store::{Env, EnvOptions, TxnRead};
use zjournal_types::{Changeset, Dname, Serial};

use crate::codec::{ChunkHeader, ChunkKey};
use crate::iter::{walk_changesets, ChangesetGroup};
use crate::meta::{self, MetaFlags, Metadata};
use crate::policy::{JournalOptions, SpacePolicy};
use crate::txn::{Dbs, TxnCtx};

/// Floor for the configured size limit.
pub const SIZE_LIMIT_MIN: usize = 1 << 20;

const DATA_DB: &str = "data";
const META_DB: &str = "meta";
const MERGED_DB: &str = "merged";

/// Verbosity of [`Journal::check`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum CheckLevel {
    /// No logging, results only.
    Silent,
    /// Log findings that indicate damage.
    Warn,
    /// Also log metadata values, counts and sizes.
    Info,
}

/// What a passing [`Journal::check`] observed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CheckSummary {
    /// Non-merged changesets on the chain.
    pub changesets: usize,
    /// Sum of their serialized sizes.
    pub total_size: usize,
    /// Used fraction of the size limit.
    pub occupancy: f32,
}

/// A per-zone changeset journal.
///
/// One handle owns one zone's journal directory. The backing store
/// serializes writers internally, but the handle itself is a
/// single-owner lifecycle: `&mut self` operations must not race.
pub struct Journal {
    pub(crate) env: Env,
    pub(crate) dbs: Dbs,
    pub(crate) path: PathBuf,
    pub(crate) size_limit: usize,
    pub(crate) zone: Dname,
    pub(crate) space: SpacePolicy,
    pub(crate) merge_enabled: bool,
    pub(crate) metadata: Metadata,
}

impl Journal {
    /// Opens (or creates) the journal at `path` with default policies.
    pub fn open(path: &Path, size_limit: usize, zone: Dname) -> Result<Self> {
        Self::open_with(path, zone, JournalOptions::new(size_limit))
    }

    /// Opens (or creates) the journal at `path`.
    ///
    /// The size limit is clamped up to [`SIZE_LIMIT_MIN`]. Returns
    /// [`JournalError::TryAgain`] if the on-disk mapping is larger than
    /// the requested limit while unflushed history exists; the caller
    /// must reopen with the old limit, flush, and retry; with everything
    /// flushed the store is wiped and recreated instead. A leftover
    /// dirty-serial marker from an interrupted insert is swept here.
    pub fn open_with(path: &Path, zone: Dname, options: JournalOptions) -> Result<Self> {
        let size_limit = options.size_limit.max(SIZE_LIMIT_MIN);

        let env = Env::open(EnvOptions {
            path: path.to_path_buf(),
            mapsize: size_limit,
            max_dbs: 3,
            max_txn_ops: options.max_txn_ops,
        })?;
        let dbs = Dbs {
            data: env.open_db(DATA_DB)?,
            meta: env.open_db(META_DB)?,
            merged: env.open_db(MERGED_DB)?,
        };

        let mut journal = Self {
            env,
            dbs,
            path: path.to_path_buf(),
            size_limit,
            zone,
            space: options.space,
            merge_enabled: options.merge_enabled,
            metadata: Metadata::default(),
        };
        journal.load_or_init_metadata()?;

        if journal.env.mapsize() > journal.size_limit {
            warn!(
                zone = %journal.zone,
                mapsize = journal.env.mapsize(),
                limit = journal.size_limit,
                "journal mapping is larger than the requested size limit"
            );
            if !journal.metadata.is_flushed() {
                return Err(JournalError::TryAgain);
            }
            journal.env.wipe()?;
            journal.metadata = Metadata::default();
            journal.load_or_init_metadata()?;
        }

        if journal.metadata.flags.contains(MetaFlags::DIRTY_SERIAL_VALID) {
            journal.sweep_dirty()?;
        }

        Ok(journal)
    }

    /// Detaches the handle. No teardown writes are needed; every state
    /// transition was committed as it happened.
    pub fn close(self) {}

    /// Stat-level check whether a journal directory is present.
    #[must_use]
    pub fn exists(path: &Path) -> bool {
        path.exists()
    }

    /// The zone this handle claims to own.
    #[must_use]
    pub fn zone(&self) -> &Dname {
        &self.zone
    }

    /// The journal directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The stored zone name. Returns [`JournalError::SemanticCheck`]
    /// carrying the stored name when it differs from the handle's zone,
    /// so the caller can decide what to do about the mismatch.
    pub fn load_zone_name(&self) -> Result<Dname> {
        let stored = meta::read_zone_name(&self.env.read_txn(), self.dbs.meta)?;
        if stored == self.zone {
            Ok(stored)
        } else {
            Err(JournalError::SemanticCheck {
                stored: stored.to_string(),
            })
        }
    }

    /// The visible serial range `(from, to)`, or `None` when the journal
    /// is empty. With a merged changeset present, `from` is its serial.
    #[must_use]
    pub fn metadata_info(&self) -> Option<(Serial, Serial)> {
        if !self.metadata.flags.contains(MetaFlags::SERIAL_TO_VALID) {
            return None;
        }
        let from = if self.metadata.flags.contains(MetaFlags::MERGED_SERIAL_VALID) {
            self.metadata.merged_serial
        } else {
            self.metadata.first_serial
        };
        Some((from, self.metadata.last_serial_to))
    }

    /// Used fraction of the size limit.
    #[must_use]
    pub fn occupancy(&self) -> f32 {
        self.env.used_bytes() as f32 / self.size_limit as f32
    }

    /// The current metadata record set, for diagnostics and tests.
    #[must_use]
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    fn load_or_init_metadata(&mut self) -> Result<()> {
        match meta::load(&self.env.read_txn(), self.dbs.meta)? {
            Some(loaded) => self.metadata = loaded,
            None => {
                let mut txn = self.env.write_txn();
                meta::init(&mut txn, self.dbs.meta, &self.zone)?;
                txn.commit().map_err(JournalError::from)?;
                self.metadata = Metadata::default();
            }
        }
        Ok(())
    }

    /// Removes the chunks of an insert that was interrupted between
    /// sub-commits and clears the marker.
    fn sweep_dirty(&mut self) -> Result<()> {
        let dirty = self.metadata.dirty_serial;
        info!(zone = %self.zone, serial = %dirty, "sweeping interrupted changeset insert");

        let mut ctx = TxnCtx::begin_rw(&self.env, self.dbs, &self.metadata);
        for db in [self.dbs.data, self.dbs.merged] {
            for chunk_index in 0.. {
                let key = ChunkKey::new(dirty, chunk_index).encode();
                if ctx.find(db, &key).is_none() {
                    break;
                }
                ctx.delete(db, &key);
            }
        }
        ctx.shadow.flags.remove(MetaFlags::DIRTY_SERIAL_VALID);
        ctx.touch_meta();
        let published = ctx.commit()?;
        self.metadata = published;
        Ok(())
    }

    pub(crate) fn decode_group(&self, group: &ChangesetGroup) -> Result<Changeset> {
        let mut payloads = Vec::with_capacity(group.vals.len());
        for val in &group.vals {
            let header = ChunkHeader::decode(val)?;
            payloads.push(header.payload(val)?);
        }
        let changeset = Changeset::deserialize_chunks(self.zone.clone(), &payloads)?;
        if changeset.serial_from != group.serial || changeset.serial_to != group.serial_to {
            return Err(JournalError::Malformed {
                detail: format!(
                    "changeset {} -> {} stored under serials {} -> {}",
                    changeset.serial_from, changeset.serial_to, group.serial, group.serial_to
                ),
            });
        }
        Ok(changeset)
    }

    /// Loads the single changeset with from-serial `serial` from `db`.
    pub(crate) fn load_one(&self, db: zjournal_store::Db, serial: Serial) -> Result<Changeset> {
        let mut found = None;
        let mut ctx = TxnCtx::begin_ro(&self.env, self.dbs, &self.metadata);
        walk_changesets(&mut ctx, db, serial, serial, |_, group| {
            found = Some(self.decode_group(group)?);
            Ok(())
        })?;
        found.ok_or(JournalError::NotFound)
    }

    pub(crate) fn load_merged(&self) -> Result<Changeset> {
        if !self.metadata.flags.contains(MetaFlags::MERGED_SERIAL_VALID) {
            return Err(JournalError::NotFound);
        }
        self.load_one(self.dbs.merged, self.metadata.merged_serial)
    }

    /// Loads all changesets from `from` onwards.
    ///
    /// With a merged changeset whose serial equals `from`, the merged
    /// changeset leads the list and the walk continues at its to-serial.
    /// Returns [`JournalError::NotFound`] when `from` is not a stored
    /// serial; a chain that stops short of `last_serial` yields a partial
    /// list with no error; the caller detects the gap by inspecting the
    /// tail and falls back to a full zone transfer.
    pub fn load_changesets(&self, from: Serial) -> Result<Vec<Changeset>> {
        let mut out = Vec::new();
        let mut from = from;
        if self.metadata.flags.contains(MetaFlags::MERGED_SERIAL_VALID)
            && from == self.metadata.merged_serial
        {
            let merged = self.load_merged()?;
            from = merged.serial_to;
            out.push(merged);
        }

        let mut ctx = TxnCtx::begin_ro(&self.env, self.dbs, &self.metadata);
        let walked = walk_changesets(
            &mut ctx,
            self.dbs.data,
            from,
            self.metadata.last_serial,
            |_, group| {
                out.push(self.decode_group(group)?);
                Ok(())
            },
        );
        match walked {
            Ok(()) => Ok(out),
            // The merged changeset may cover the whole history; an empty
            // tail after it is not a missing starting point.
            Err(JournalError::NotFound) if !out.is_empty() => Ok(out),
            Err(err) => Err(err),
        }
    }

    /// Read-only structural check: walks the continuity chain from
    /// `first_serial`, verifies it reaches `last_serial_to` without holes
    /// or mismatched from-serials, verifies the flushed watermark names a
    /// stored changeset and the merged changeset lines up with it.
    pub fn check(&self, level: CheckLevel) -> Result<CheckSummary> {
        let log_info = level >= CheckLevel::Info;
        let log_warn = level >= CheckLevel::Warn;
        let m = &self.metadata;

        if log_info {
            info!(
                zone = %self.zone,
                first_serial = %m.first_serial,
                last_serial = %m.last_serial,
                last_serial_to = %m.last_serial_to,
                last_flushed = %m.last_flushed,
                merged_serial = %m.merged_serial,
                flags = m.flags.bits(),
                "journal check: metadata"
            );
        }

        let record_count = self.env.read_txn().count(self.dbs.data);
        let occupancy = self.occupancy();
        if log_info {
            info!(zone = %self.zone, records = record_count, occupancy, "journal check: store");
        }

        let mut summary = CheckSummary {
            changesets: 0,
            total_size: 0,
            occupancy,
        };
        let mut last_flushed_to = None;

        if record_count == 0 {
            if m.flags.contains(MetaFlags::SERIAL_TO_VALID)
                || m.flags.contains(MetaFlags::LAST_FLUSHED_VALID)
            {
                if log_warn {
                    warn!(zone = %self.zone, "journal check: flags set on an empty journal");
                }
                return Err(JournalError::NotFound);
            }
        } else {
            if !m.flags.contains(MetaFlags::SERIAL_TO_VALID) {
                if log_warn {
                    warn!(zone = %self.zone, "journal check: records present without SERIAL_TO_VALID");
                }
                return Err(JournalError::NotFound);
            }

            let mut serial = m.first_serial;
            loop {
                let changeset = self.load_one(self.dbs.data, serial)?;
                if changeset.serial_from != serial {
                    if log_warn {
                        warn!(
                            zone = %self.zone,
                            expected = %serial,
                            stored = %changeset.serial_from,
                            "journal check: from-serial mismatch"
                        );
                    }
                    return Err(JournalError::Malformed {
                        detail: format!("changeset under {serial} claims {}", changeset.serial_from),
                    });
                }
                summary.changesets += 1;
                summary.total_size += changeset.serialized_size();
                if m.is_last_flushed(serial) {
                    last_flushed_to = Some(changeset.serial_to);
                }
                if changeset.serial_to == m.last_serial_to {
                    break;
                }
                if summary.changesets > record_count {
                    // More changesets than records: the chain loops
                    // without reaching last_serial_to.
                    return Err(JournalError::Malformed {
                        detail: "changeset chain is cyclic".to_string(),
                    });
                }
                serial = changeset.serial_to;
            }

            if m.flags.contains(MetaFlags::LAST_FLUSHED_VALID) && last_flushed_to.is_none() {
                if log_warn {
                    warn!(
                        zone = %self.zone,
                        last_flushed = %m.last_flushed,
                        "journal check: flushed watermark names no stored changeset"
                    );
                }
                return Err(JournalError::NotFound);
            }

            if log_info {
                info!(
                    zone = %self.zone,
                    changesets = summary.changesets,
                    total_size = summary.total_size,
                    "journal check: chain walked"
                );
            }
        }

        let merged_records = self.env.read_txn().count(self.dbs.merged);
        if m.flags.contains(MetaFlags::MERGED_SERIAL_VALID) {
            let merged = self.load_merged()?;
            if merged.serial_from != m.merged_serial {
                if log_warn {
                    warn!(
                        zone = %self.zone,
                        expected = %m.merged_serial,
                        stored = %merged.serial_from,
                        "journal check: merged from-serial mismatch"
                    );
                }
                return Err(JournalError::Malformed {
                    detail: format!(
                        "merged changeset under {} claims {}",
                        m.merged_serial, merged.serial_from
                    ),
                });
            }
            let expected_to = last_flushed_to.unwrap_or(m.first_serial);
            if merged.serial_to != expected_to {
                if log_warn {
                    warn!(
                        zone = %self.zone,
                        merged_to = %merged.serial_to,
                        expected = %expected_to,
                        "journal check: merged changeset does not line up with the chain"
                    );
                }
                return Err(JournalError::NotFound);
            }
            if log_info {
                info!(
                    zone = %self.zone,
                    from = %m.merged_serial,
                    to = %merged.serial_to,
                    size = merged.serialized_size(),
                    "journal check: merged changeset"
                );
            }
        } else if merged_records != 0 && log_warn {
            warn!(
                zone = %self.zone,
                records = merged_records,
                "journal check: merged records present without MERGED_SERIAL_VALID"
            );
        }

        Ok(summary)
    }
}
