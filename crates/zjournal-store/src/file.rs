//! Snapshot file I/O.
//!
//! The whole environment is one file, rewritten on every write-commit and
//! swapped in with an atomic rename. Layout, all integers big-endian:
//!
//! ```text
//! [magic: "ZJST"] [format: u32] [mapsize: u64] [db_count: u32]
//! per sub-database:
//!   [name_len: u16] [name] [record_count: u64]
//!   per record: [key_len: u32] [key] [val_len: u32] [val]
//! ```

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use zjournal_error::{StoreError, StoreResult};

use crate::env::Snapshot;

const MAGIC: &[u8; 4] = b"ZJST";
const FORMAT: u32 = 1;
const SNAPSHOT_FILE: &str = "data.zj";
const SNAPSHOT_TMP: &str = "data.zj.tmp";

/// Path of the snapshot file inside an environment directory.
pub(crate) fn snapshot_path(dir: &Path) -> PathBuf {
    dir.join(SNAPSHOT_FILE)
}

pub(crate) struct Persisted {
    pub(crate) mapsize: usize,
    pub(crate) db_names: Vec<String>,
    pub(crate) snapshot: Snapshot,
}

fn corrupt(detail: &str) -> StoreError {
    StoreError::Corrupt {
        detail: detail.to_string(),
    }
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> StoreResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.buf.len())
            .ok_or_else(|| corrupt("truncated snapshot"))?;
        let out = &self.buf[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn u16(&mut self) -> StoreResult<u16> {
        Ok(u16::from_be_bytes(self.take(2)?.try_into().unwrap()))
    }

    fn u32(&mut self) -> StoreResult<u32> {
        Ok(u32::from_be_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn u64(&mut self) -> StoreResult<u64> {
        Ok(u64::from_be_bytes(self.take(8)?.try_into().unwrap()))
    }
}

/// Loads the snapshot file, or `None` if the environment is new.
pub(crate) fn load(dir: &Path) -> StoreResult<Option<Persisted>> {
    let path = snapshot_path(dir);
    let buf = match fs::read(&path) {
        Ok(buf) => buf,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    let mut reader = Reader { buf: &buf, pos: 0 };

    if reader.take(4)? != MAGIC {
        return Err(corrupt("bad magic"));
    }
    if reader.u32()? != FORMAT {
        return Err(corrupt("unknown snapshot format"));
    }
    let mapsize = reader.u64()? as usize;
    let db_count = reader.u32()? as usize;

    let mut db_names = Vec::with_capacity(db_count);
    let mut snapshot = Snapshot::default();
    for _ in 0..db_count {
        let name_len = reader.u16()? as usize;
        let name = std::str::from_utf8(reader.take(name_len)?)
            .map_err(|_| corrupt("sub-database name is not UTF-8"))?
            .to_string();
        let record_count = reader.u64()?;
        let mut db = std::collections::BTreeMap::new();
        for _ in 0..record_count {
            let key_len = reader.u32()? as usize;
            let key = reader.take(key_len)?.to_vec();
            let val_len = reader.u32()? as usize;
            let val: Arc<[u8]> = Arc::from(reader.take(val_len)?);
            db.insert(key, val);
        }
        db_names.push(name);
        snapshot.dbs.push(db);
    }
    if reader.pos != buf.len() {
        return Err(corrupt("trailing octets after snapshot"));
    }

    Ok(Some(Persisted {
        mapsize,
        db_names,
        snapshot,
    }))
}

/// Writes the snapshot durably: temp file, fsync, atomic rename, fsync of
/// the directory.
pub(crate) fn store(
    dir: &Path,
    mapsize: usize,
    db_names: &[String],
    snapshot: &Snapshot,
) -> StoreResult<()> {
    let mut buf = Vec::new();
    buf.extend_from_slice(MAGIC);
    buf.extend_from_slice(&FORMAT.to_be_bytes());
    buf.extend_from_slice(&(mapsize as u64).to_be_bytes());
    buf.extend_from_slice(&(db_names.len() as u32).to_be_bytes());
    for (name, db) in db_names.iter().zip(snapshot.dbs.iter()) {
        buf.extend_from_slice(&(name.len() as u16).to_be_bytes());
        buf.extend_from_slice(name.as_bytes());
        buf.extend_from_slice(&(db.len() as u64).to_be_bytes());
        for (key, val) in db {
            buf.extend_from_slice(&(key.len() as u32).to_be_bytes());
            buf.extend_from_slice(key);
            buf.extend_from_slice(&(val.len() as u32).to_be_bytes());
            buf.extend_from_slice(val);
        }
    }

    let tmp = dir.join(SNAPSHOT_TMP);
    let mut file = File::create(&tmp)?;
    file.write_all(&buf)?;
    file.sync_all()?;
    fs::rename(&tmp, snapshot_path(dir))?;
    #[cfg(unix)]
    File::open(dir)?.sync_all()?;
    Ok(())
}

/// Removes all persisted state of the environment.
pub(crate) fn remove(dir: &Path) -> StoreResult<()> {
    for name in [SNAPSHOT_FILE, SNAPSHOT_TMP] {
        match fs::remove_file(dir.join(name)) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}
