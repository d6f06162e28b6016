//! End-to-end journal scenarios: store/load round-trips, fill-and-flush
//! cycles, recovery from discontinuities and serial collisions, merge
//! mode, the shrunk-mapping refusal and the dirty-serial sweep.

use rand::distributions::Alphanumeric;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use zjournal::{
    CheckLevel, ChunkHeader, ChunkKey, Journal, JournalError, JournalOptions, MetaFlags,
};
use zjournal_types::{Changeset, Dname, Record, Serial, RTYPE_A, RTYPE_TXT};

fn apex() -> Dname {
    Dname::parse("test").unwrap()
}

fn rng() -> StdRng {
    StdRng::seed_from_u64(0x5eed_cafe)
}

/// A TXT record with a random owner under the apex and random payload.
fn random_txt(rng: &mut StdRng, apex: &Dname) -> Record {
    let label: Vec<u8> = (0..15).map(|_| rng.sample(Alphanumeric)).collect();
    let mut rdata = vec![63u8];
    rdata.extend((0..63).map(|_| rng.gen::<u8>()));
    Record::new(apex.prepend(&label).unwrap(), RTYPE_TXT, 3600, rdata)
}

/// A changeset with `size / 2` random removals and additions each.
fn random_changeset(rng: &mut StdRng, from: u32, to: u32, size: usize) -> Changeset {
    let apex = apex();
    let mut ch = Changeset::new(apex.clone(), Serial(from), Serial(to));
    for _ in 0..size / 2 {
        ch.removals.push(random_txt(rng, &apex));
    }
    for _ in 0..size / 2 {
        ch.additions.push(random_txt(rng, &apex));
    }
    ch
}

fn assert_continuous(list: &[Changeset]) {
    for pair in list.windows(2) {
        assert_eq!(
            pair[0].serial_to, pair[1].serial_from,
            "changesets are not continuous"
        );
    }
}

#[test]
fn open_below_floor_clamps_and_succeeds() {
    let dir = tempfile::tempdir().unwrap();
    let journal = Journal::open(dir.path(), 1024, apex()).unwrap();
    journal.check(CheckLevel::Silent).unwrap();
    assert!(journal.metadata_info().is_none());
    assert!(Journal::exists(dir.path()));
}

#[test]
fn store_load_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let mut journal = Journal::open(dir.path(), 2 << 20, apex()).unwrap();

    let ch = random_changeset(&mut rng(), 0, 1, 128);
    journal.store_changeset(&ch).unwrap();
    journal.check(CheckLevel::Silent).unwrap();

    let loaded = journal.load_changesets(Serial(0)).unwrap();
    assert_eq!(loaded, vec![ch]);
    journal.check(CheckLevel::Silent).unwrap();

    assert_eq!(journal.metadata_info(), Some((Serial(0), Serial(1))));
}

#[test]
fn load_from_unknown_serial_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let mut journal = Journal::open(dir.path(), 2 << 20, apex()).unwrap();
    assert!(matches!(
        journal.load_changesets(Serial(5)),
        Err(JournalError::NotFound)
    ));
    journal
        .store_changeset(&random_changeset(&mut rng(), 0, 1, 16))
        .unwrap();
    assert!(matches!(
        journal.load_changesets(Serial(5)),
        Err(JournalError::NotFound)
    ));
}

#[test]
fn fill_to_busy_flush_then_insert() {
    let dir = tempfile::tempdir().unwrap();
    let mut rng = rng();
    let mut journal = Journal::open(dir.path(), 1 << 20, apex()).unwrap();

    // First changeset, then a flush so later eviction has a watermark.
    journal
        .store_changeset(&random_changeset(&mut rng, 0, 1, 128))
        .unwrap();
    journal.flush().unwrap();

    // Fill until the writer asks for a flush.
    let mut stored = Vec::new();
    let mut serial = 1u32;
    loop {
        let ch = random_changeset(&mut rng, serial, serial + 1, 128);
        match journal.store_changeset(&ch) {
            Ok(()) => {
                stored.push(ch);
                serial += 1;
                assert!(serial < 10_000, "journal never filled up");
            }
            Err(JournalError::Busy) => break,
            Err(other) => panic!("unexpected store error: {other}"),
        }
    }
    assert!(serial > 1, "nothing was stored before busy");
    journal.check(CheckLevel::Silent).unwrap();

    // Everything that still starts at the current chain head loads back
    // byte-identically and in order.
    let (from, _) = journal.metadata_info().unwrap();
    let loaded = journal.load_changesets(from).unwrap();
    assert_continuous(&loaded);
    let tail: Vec<_> = stored
        .iter()
        .filter(|ch| {
            let first: u32 = from.get();
            ch.serial_from.get() >= first
        })
        .cloned()
        .collect();
    assert_eq!(&loaded[loaded.len() - tail.len()..], &tail[..]);

    // Flush, reopen, insert once more.
    journal.flush().unwrap();
    journal.check(CheckLevel::Silent).unwrap();
    journal.close();

    let mut journal = Journal::open(dir.path(), 1 << 20, apex()).unwrap();
    journal
        .store_changeset(&random_changeset(&mut rng, serial, serial + 1, 128))
        .unwrap();
    journal.check(CheckLevel::Silent).unwrap();

    let (from, to) = journal.metadata_info().unwrap();
    assert_eq!(to, Serial(serial + 1));
    let loaded = journal.load_changesets(from).unwrap();
    assert_continuous(&loaded);
    assert_eq!(loaded.last().unwrap().serial_to, Serial(serial + 1));
}

#[test]
fn batch_store_matches_sequential_inserts() {
    let dir = tempfile::tempdir().unwrap();
    let mut rng = rng();
    let mut journal = Journal::open(dir.path(), 4 << 20, apex()).unwrap();

    let batch: Vec<_> = (0..8)
        .map(|k| random_changeset(&mut rng, k, k + 1, 32))
        .collect();
    journal.store_changesets(&batch).unwrap();
    journal.check(CheckLevel::Silent).unwrap();

    let loaded = journal.load_changesets(Serial(0)).unwrap();
    assert_eq!(loaded, batch);
}

#[test]
fn discontinuity_drops_older_history() {
    let dir = tempfile::tempdir().unwrap();
    let mut rng = rng();
    let mut journal = Journal::open(dir.path(), 2 << 20, apex()).unwrap();

    journal
        .store_changeset(&random_changeset(&mut rng, 0, 1, 64))
        .unwrap();
    journal
        .store_changeset(&random_changeset(&mut rng, 1, 2, 64))
        .unwrap();

    // A jump in the serial chain: unflushed history cannot be dropped
    // yet, so the caller is asked to flush first.
    let jump = random_changeset(&mut rng, 7, 8, 64);
    assert!(matches!(
        journal.store_changeset(&jump),
        Err(JournalError::Busy)
    ));
    journal.flush().unwrap();
    journal.store_changeset(&jump).unwrap();
    journal.check(CheckLevel::Silent).unwrap();

    assert_eq!(journal.load_changesets(Serial(7)).unwrap(), vec![jump]);
    assert!(matches!(
        journal.load_changesets(Serial(0)),
        Err(JournalError::NotFound)
    ));
}

#[test]
fn serial_collision_after_wraparound() {
    let dir = tempfile::tempdir().unwrap();
    let mut rng = rng();
    let mut journal = Journal::open(dir.path(), 10 << 20, apex()).unwrap();

    // 0 -> 1 -> 2 -> 2^31-1 -> 2^32-2 -> 1: the final step wraps the
    // serial space and collides with the stored changeset 1 -> 2.
    journal
        .store_changeset(&random_changeset(&mut rng, 0, 1, 128))
        .unwrap();
    journal
        .store_changeset(&random_changeset(&mut rng, 1, 2, 128))
        .unwrap();
    let keep2 = random_changeset(&mut rng, 2, 2_147_483_647, 128);
    journal.store_changeset(&keep2).unwrap();
    let keep3 = random_changeset(&mut rng, 2_147_483_647, 4_294_967_294, 128);
    journal.store_changeset(&keep3).unwrap();

    let wrap = random_changeset(&mut rng, 4_294_967_294, 1, 128);
    assert!(matches!(
        journal.store_changeset(&wrap),
        Err(JournalError::Busy)
    ));
    journal.flush().unwrap();
    journal.store_changeset(&wrap).unwrap();
    journal.flush().unwrap();
    journal.check(CheckLevel::Silent).unwrap();

    // The colliding prefix 0->1, 1->2 is gone; the tail survives.
    assert!(matches!(
        journal.load_changesets(Serial(0)),
        Err(JournalError::NotFound)
    ));
    assert!(matches!(
        journal.load_changesets(Serial(1)),
        Err(JournalError::NotFound)
    ));
    let loaded = journal.load_changesets(Serial(2)).unwrap();
    assert_eq!(loaded, vec![keep2, keep3, wrap]);
    assert_continuous(&loaded);

    let tail = journal.load_changesets(Serial(2_147_483_647)).unwrap();
    assert_eq!(tail.len(), 2);
    assert_eq!(tail.last().unwrap().serial_to, Serial(1));
}

/// Records shared by the merge-mode changesets.
fn rr_abc(which: u8) -> Record {
    let owner = apex().prepend(&[b'a' + which; 17]).unwrap();
    Record::new(owner, RTYPE_A, 3600, vec![1, 2, 3, 4 + which])
}

/// `x == 0`: +A +B; odd `x`: -B +C; even `x`: -C +B.
fn merge_changeset(x: u32) -> Changeset {
    let mut ch = Changeset::new(apex(), Serial(x), Serial(x + 1));
    if x == 0 {
        ch.additions.push(rr_abc(0));
        ch.additions.push(rr_abc(1));
    } else if x % 2 == 1 {
        ch.removals.push(rr_abc(1));
        ch.additions.push(rr_abc(2));
    } else {
        ch.removals.push(rr_abc(2));
        ch.additions.push(rr_abc(1));
    }
    ch
}

#[test]
fn merge_mode_compacts_history() {
    let dir = tempfile::tempdir().unwrap();
    let options = JournalOptions::new(1 << 20).merge(true);
    let mut journal = Journal::open_with(dir.path(), apex(), options).unwrap();

    // Insert until space pressure triggers the in-place merge.
    let mut x = 0u32;
    loop {
        journal.store_changeset(&merge_changeset(x)).unwrap();
        x += 1;
        if journal
            .metadata()
            .flags
            .contains(MetaFlags::MERGED_SERIAL_VALID)
        {
            break;
        }
        assert!(x < 2000, "merge never triggered");
    }
    journal.check(CheckLevel::Silent).unwrap();

    // The merged head covers everything up to the changeset that
    // triggered the merge; removals cancelled out (B was removed and
    // re-added along the way).
    let loaded = journal.load_changesets(Serial(0)).unwrap();
    assert_eq!(loaded.len(), 2);
    let merged = &loaded[0];
    assert_eq!(merged.serial_from, Serial(0));
    assert_eq!(merged.serial_to, loaded[1].serial_from);
    assert_eq!(merged.additions.len(), 2);
    assert!(
        merged.removals.is_empty(),
        "removals should cancel against re-additions, got {:?}",
        merged.removals
    );

    // One more insert shows up behind the merged head.
    journal.store_changeset(&merge_changeset(x)).unwrap();
    let loaded = journal.load_changesets(Serial(0)).unwrap();
    assert_eq!(loaded.len(), 3);
    assert_continuous(&loaded[1..]);
    journal.check(CheckLevel::Silent).unwrap();

    // Reading from an unmerged serial skips the merged changeset.
    let first_unmerged = loaded[1].serial_from;
    let tail = journal.load_changesets(first_unmerged).unwrap();
    assert_eq!(tail.len(), 2);
}

#[test]
fn shrunk_mapping_requires_flush_then_wipes() {
    let dir = tempfile::tempdir().unwrap();
    let mut rng = rng();
    {
        let mut journal = Journal::open(dir.path(), 10 << 20, apex()).unwrap();
        journal
            .store_changeset(&random_changeset(&mut rng, 0, 1, 128))
            .unwrap();
        journal.close();
    }

    // Unflushed history + smaller mapping: refused.
    assert!(matches!(
        Journal::open(dir.path(), 2 << 20, apex()),
        Err(JournalError::TryAgain)
    ));

    // Reopen with the old limit, flush, and retry: wiped and recreated.
    {
        let mut journal = Journal::open(dir.path(), 10 << 20, apex()).unwrap();
        journal.flush().unwrap();
        journal.close();
    }
    let journal = Journal::open(dir.path(), 2 << 20, apex()).unwrap();
    assert!(journal.metadata_info().is_none(), "journal starts over empty");
    journal.check(CheckLevel::Silent).unwrap();
}

#[test]
fn dirty_serial_sweep_on_open() {
    let dir = tempfile::tempdir().unwrap();
    let mut rng = rng();
    let size_limit = 2 << 20;
    {
        let mut journal = Journal::open(dir.path(), size_limit, apex()).unwrap();
        journal
            .store_changeset(&random_changeset(&mut rng, 0, 1, 64))
            .unwrap();
        journal.close();
    }

    // Simulate a crash between sub-commits of an insert of serial 7:
    // two of its three chunks are durable and the dirty marker is set.
    {
        let env = zjournal_store::Env::open(zjournal_store::EnvOptions::new(
            dir.path(),
            size_limit,
        ))
        .unwrap();
        let data = env.open_db("data").unwrap();
        let meta = env.open_db("meta").unwrap();
        let mut txn = env.write_txn();
        for chunk_index in 0..2u32 {
            let header = ChunkHeader {
                serial_to: Serial(8),
                chunk_count: 3,
                chunk_size: 4,
            };
            let mut val = header.encode().to_vec();
            val.extend_from_slice(b"\xde\xad\xbe\xef");
            txn.put(data, &ChunkKey::new(Serial(7), chunk_index).encode(), &val)
                .unwrap();
        }
        txn.put(meta, b"dirty_serial", &7u32.to_be_bytes()).unwrap();
        let flags = u32::from_be_bytes(
            txn.get(meta, b"flags").unwrap().as_ref().try_into().unwrap(),
        ) | MetaFlags::DIRTY_SERIAL_VALID.bits();
        txn.put(meta, b"flags", &flags.to_be_bytes()).unwrap();
        txn.commit().unwrap();
    }

    // Reopen: the partial insert is swept, the pre-insert state remains.
    let journal = Journal::open(dir.path(), size_limit, apex()).unwrap();
    assert_eq!(journal.metadata_info(), Some((Serial(0), Serial(1))));
    journal.check(CheckLevel::Silent).unwrap();

    let env = zjournal_store::Env::open(zjournal_store::EnvOptions::new(dir.path(), size_limit))
        .unwrap();
    let data = env.open_db("data").unwrap();
    let txn = env.read_txn();
    use zjournal_store::TxnRead;
    for chunk_index in 0..3u32 {
        assert!(
            txn.get(data, &ChunkKey::new(Serial(7), chunk_index).encode())
                .is_none(),
            "chunk {chunk_index} of the dirty serial survived the sweep"
        );
    }
}

#[test]
fn oversized_insert_transaction_sub_commits() {
    let dir = tempfile::tempdir().unwrap();
    let mut rng = rng();

    // A tiny per-transaction byte budget forces a sub-commit after every
    // chunk of a multi-chunk changeset.
    let mut options = JournalOptions::new(4 << 20);
    options.space.max_insert_txn = 0.001;
    let mut journal = Journal::open_with(dir.path(), apex(), options).unwrap();

    let big = random_changeset(&mut rng, 0, 1, 3000);
    assert!(
        big.serialized_size() > zjournal::CHUNK_MAX * 2,
        "changeset too small to span multiple chunks"
    );
    journal.store_changeset(&big).unwrap();
    journal.check(CheckLevel::Silent).unwrap();

    let loaded = journal.load_changesets(Serial(0)).unwrap();
    assert_eq!(loaded, vec![big]);

    // The marker must not survive the successful insert.
    journal.close();
    let journal = Journal::open(dir.path(), 4 << 20, apex()).unwrap();
    assert_eq!(journal.metadata_info(), Some((Serial(0), Serial(1))));
    journal.check(CheckLevel::Silent).unwrap();
}

#[test]
fn flush_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let mut rng = rng();
    let mut journal = Journal::open(dir.path(), 2 << 20, apex()).unwrap();
    journal
        .store_changeset(&random_changeset(&mut rng, 0, 1, 64))
        .unwrap();

    journal.flush().unwrap();
    let info = journal.metadata_info();
    let occupancy = journal.occupancy();
    let summary = journal.check(CheckLevel::Silent).unwrap();

    journal.flush().unwrap();
    assert_eq!(journal.metadata_info(), info);
    assert_eq!(journal.occupancy(), occupancy);
    assert_eq!(journal.check(CheckLevel::Silent).unwrap(), summary);
}

#[test]
fn zone_name_mismatch_is_a_semantic_check() {
    let dir = tempfile::tempdir().unwrap();
    {
        let journal = Journal::open(dir.path(), 2 << 20, apex()).unwrap();
        assert_eq!(journal.load_zone_name().unwrap(), apex());
        journal.close();
    }

    let other = Dname::parse("other").unwrap();
    let journal = Journal::open(dir.path(), 2 << 20, other).unwrap();
    match journal.load_zone_name() {
        Err(JournalError::SemanticCheck { stored }) => assert_eq!(stored, "test."),
        other => panic!("expected a semantic-check status, got {other:?}"),
    }
}

#[test]
fn version_major_mismatch_is_unsupported() {
    let dir = tempfile::tempdir().unwrap();
    let size_limit = 2 << 20;
    {
        let journal = Journal::open(dir.path(), size_limit, apex()).unwrap();
        journal.close();
    }
    {
        let env =
            zjournal_store::Env::open(zjournal_store::EnvOptions::new(dir.path(), size_limit))
                .unwrap();
        let meta = env.open_db("meta").unwrap();
        let mut txn = env.write_txn();
        txn.put(meta, b"version", &20u32.to_be_bytes()).unwrap();
        txn.commit().unwrap();
    }
    assert!(matches!(
        Journal::open(dir.path(), size_limit, apex()),
        Err(JournalError::Unsupported { stored: 20 })
    ));
}

#[test]
fn drop_all_empties_the_journal() {
    let dir = tempfile::tempdir().unwrap();
    let mut rng = rng();
    let mut journal = Journal::open(dir.path(), 2 << 20, apex()).unwrap();
    for k in 0..4 {
        journal
            .store_changeset(&random_changeset(&mut rng, k, k + 1, 32))
            .unwrap();
    }

    journal.drop_all().unwrap();
    assert!(journal.metadata_info().is_none());
    assert!(matches!(
        journal.load_changesets(Serial(0)),
        Err(JournalError::NotFound)
    ));
    journal.check(CheckLevel::Silent).unwrap();

    // The journal accepts a fresh chain afterwards.
    journal
        .store_changeset(&random_changeset(&mut rng, 40, 41, 32))
        .unwrap();
    assert_eq!(journal.metadata_info(), Some((Serial(40), Serial(41))));
}
