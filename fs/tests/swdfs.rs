// Copyright 2024 Kevin Ludwig
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! End-to-end scenarios against a freshly formatted 2D image.

use std::io::Write;

use sos_fs::{
    name, sword::MAX_FILE_SIZE, DeviceLetter, Error, FsEngine, HeaderPacket, IoContext,
    MountOptions, SosAttr, Whence, CLUSTER_SIZE, FATPOS_DEFAULT, O_CREAT, O_EXCL, O_RDONLY,
    O_RDWR, O_WRONLY, PERM_RD, PERM_WR, RECORD_SIZE,
};

/// Standard 2D geometry: 80 clusters of 16 records.
const IMAGE_CLUSTERS: usize = 0x50;

const A: DeviceLetter = DeviceLetter::A;

fn scratch_image() -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(".2d")
        .tempfile()
        .unwrap();
    file.write_all(&vec![0u8; IMAGE_CLUSTERS * CLUSTER_SIZE])
        .unwrap();
    file
}

fn fresh_engine(file: &tempfile::NamedTempFile) -> (FsEngine, IoContext) {
    let mut engine = FsEngine::with_defaults();
    let mut ioctx = IoContext::new();
    engine.mount_image(A, file.path()).unwrap();
    engine.format(A, "sword").unwrap();
    engine
        .mount_filesystem(A, "sword", MountOptions::default(), &mut ioctx)
        .unwrap();
    (engine, ioctx)
}

fn ascii() -> HeaderPacket {
    HeaderPacket {
        attr: SosAttr::ASC,
        load_addr: 0,
        exec_addr: 0,
    }
}

fn binary() -> HeaderPacket {
    HeaderPacket {
        attr: SosAttr::BIN,
        load_addr: 0x8000,
        exec_addr: 0x8000,
    }
}

fn raw_fat(engine: &mut FsEngine) -> [u8; RECORD_SIZE] {
    let mut fat = [0u8; RECORD_SIZE];
    engine
        .storage_mut()
        .record_read(A, &mut fat, FATPOS_DEFAULT, 1)
        .unwrap();
    fat
}

#[test]
fn create_write_read_round_trip() {
    let file = scratch_image();
    let (mut engine, mut ioctx) = fresh_engine(&file);

    let fd0 = engine
        .open(A, &mut ioctx, "HELLO.TXT", O_RDWR | O_CREAT, Some(&ascii()))
        .unwrap();
    assert_eq!(engine.write(&mut ioctx, fd0, b"HELLO\r").unwrap(), 6);
    engine.close(&mut ioctx, fd0).unwrap();

    let fd1 = engine
        .open(A, &mut ioctx, "HELLO.TXT", O_RDONLY, Some(&ascii()))
        .unwrap();
    let mut buf = [0u8; 6];
    assert_eq!(engine.read(&mut ioctx, fd1, &mut buf).unwrap(), 6);
    assert_eq!(&buf, b"HELLO\r");
    // End of file reads a zero count.
    assert_eq!(engine.read(&mut ioctx, fd1, &mut buf).unwrap(), 0);
    engine.close(&mut ioctx, fd1).unwrap();
}

#[test]
fn full_size_file_round_trips_and_releases() {
    let file = scratch_image();
    let (mut engine, mut ioctx) = fresh_engine(&file);

    let fd = engine.creat(A, &mut ioctx, "MAX.TXT", &ascii()).unwrap();
    let stripe: Vec<u8> = (0..MAX_FILE_SIZE).map(|i| (i % 251) as u8).collect();
    assert_eq!(
        engine.write(&mut ioctx, fd, &stripe).unwrap(),
        MAX_FILE_SIZE as usize
    );
    engine.close(&mut ioctx, fd).unwrap();

    let fd = engine
        .open(A, &mut ioctx, "MAX.TXT", O_RDWR, Some(&ascii()))
        .unwrap();
    let mut back = vec![0u8; MAX_FILE_SIZE as usize];
    assert_eq!(
        engine.read(&mut ioctx, fd, &mut back).unwrap(),
        MAX_FILE_SIZE as usize
    );
    assert_eq!(back, stripe);

    // The file shows up in an enumeration exactly once.
    let dd = engine.opendir(A, &mut ioctx).unwrap();
    let mut hits = 0;
    while let Ok(fib) = engine.readdir(&mut ioctx, dd) {
        if name::sword_to_host(&fib.sword_name) == "MAX.TXT" {
            hits += 1;
            assert_eq!(fib.size, MAX_FILE_SIZE & 0xffff);
        }
    }
    engine.closedir(&mut ioctx, dd).unwrap();
    assert_eq!(hits, 1);

    // Truncating to zero frees every cluster of the chain.
    engine.truncate(&mut ioctx, fd, 0).unwrap();
    engine.close(&mut ioctx, fd).unwrap();
    let fat = raw_fat(&mut engine);
    assert!(fat[2..IMAGE_CLUSTERS].iter().all(|&entry| entry == 0));

    engine.unlink(A, &ioctx, "MAX.TXT").unwrap();
    assert_eq!(
        engine.open(A, &mut ioctx, "MAX.TXT", O_RDONLY, None),
        Err(Error::NotFound)
    );
}

#[test]
fn truncate_ladder_moves_the_end_marker() {
    let file = scratch_image();
    let (mut engine, mut ioctx) = fresh_engine(&file);

    let fd = engine.creat(A, &mut ioctx, "LADDER.DAT", &ascii()).unwrap();
    engine
        .write(&mut ioctx, fd, &vec![0x11u8; CLUSTER_SIZE])
        .unwrap();

    engine.truncate(&mut ioctx, fd, 6144).unwrap();
    let fat = raw_fat(&mut engine);
    let first = 2;
    let second = fat[first];
    assert!(second & 0x80 == 0, "chain extended by one cluster");
    assert_eq!(fat[second as usize], 0x87, "eight records used");

    engine.truncate(&mut ioctx, fd, 4096).unwrap();
    let fat = raw_fat(&mut engine);
    assert_eq!(fat[first], 0x8f, "sixteen records used");
    assert_eq!(fat[second as usize], 0x00, "tail released");

    engine.truncate(&mut ioctx, fd, 0).unwrap();
    let fat = raw_fat(&mut engine);
    assert_eq!(fat[first], 0x00, "chain fully released");

    engine.close(&mut ioctx, fd).unwrap();
}

#[test]
fn read_only_attribute_blocks_rename() {
    let file = scratch_image();
    let (mut engine, mut ioctx) = fresh_engine(&file);

    let fd = engine.creat(A, &mut ioctx, "F.BIN", &binary()).unwrap();
    engine.close(&mut ioctx, fd).unwrap();

    engine
        .set_attr(A, &ioctx, "F.BIN", SosAttr::RDONLY)
        .unwrap();
    assert_eq!(
        engine.rename(A, &ioctx, "F.BIN", "G.BIN"),
        Err(Error::ReadOnly)
    );

    engine.set_attr(A, &ioctx, "F.BIN", SosAttr(0)).unwrap();
    engine.rename(A, &ioctx, "F.BIN", "G.BIN").unwrap();

    let attr = engine.get_attr(A, &ioctx, "G.BIN").unwrap();
    assert!(attr.is_binary());
    assert!(!attr.is_read_only());
}

#[test]
fn poisoned_allocation_table_reads_badfat() {
    let file = scratch_image();
    let (mut engine, mut ioctx) = fresh_engine(&file);

    let fd = engine.creat(A, &mut ioctx, "F.DAT", &ascii()).unwrap();
    engine.write(&mut ioctx, fd, b"payload").unwrap();
    engine.close(&mut ioctx, fd).unwrap();

    // Poison the entry of the file's first cluster.
    let mut fat = raw_fat(&mut engine);
    let first = 2usize;
    fat[first] = 0x00;
    engine
        .storage_mut()
        .record_write(A, &fat, FATPOS_DEFAULT, 1)
        .unwrap();

    let fd = engine
        .open(A, &mut ioctx, "F.DAT", O_RDONLY, Some(&ascii()))
        .unwrap();
    let mut buf = [0u8; 8];
    assert_eq!(engine.read(&mut ioctx, fd, &mut buf), Err(Error::BadFat));
    engine.close(&mut ioctx, fd).unwrap();

    // The poisoned byte survives untouched on disk.
    let fat = raw_fat(&mut engine);
    assert_eq!(fat[first], 0x00);
}

#[test]
fn unmount_refuses_while_open() {
    let file = scratch_image();
    let (mut engine, mut ioctx) = fresh_engine(&file);

    let fd = engine.creat(A, &mut ioctx, "BUSY.TXT", &ascii()).unwrap();
    assert_eq!(
        engine.unmount_filesystem(A, &mut ioctx),
        Err(Error::Busy)
    );
    engine.close(&mut ioctx, fd).unwrap();
    engine.unmount_filesystem(A, &mut ioctx).unwrap();
    engine.unmount_image(A).unwrap();
}

#[test]
fn write_read_round_trips_at_unaligned_offsets() {
    let file = scratch_image();
    let (mut engine, mut ioctx) = fresh_engine(&file);

    let fd = engine.creat(A, &mut ioctx, "OFFS.DAT", &ascii()).unwrap();
    for &pos in &[0u32, 1, 255, 256, 4095, 4096, 5000, 8191, 12288] {
        let payload: Vec<u8> = (0..700).map(|i| ((i + pos as usize) % 241) as u8).collect();
        engine.seek(&mut ioctx, fd, pos as i64, Whence::Set).unwrap();
        assert_eq!(engine.write(&mut ioctx, fd, &payload).unwrap(), 700);

        engine.seek(&mut ioctx, fd, pos as i64, Whence::Set).unwrap();
        let mut back = vec![0u8; 700];
        assert_eq!(engine.read(&mut ioctx, fd, &mut back).unwrap(), 700);
        assert_eq!(back, payload, "at offset {pos}");
    }
    engine.close(&mut ioctx, fd).unwrap();
}

#[test]
fn seek_past_eof_write_allocates_zero_filled_hole() {
    let file = scratch_image();
    let (mut engine, mut ioctx) = fresh_engine(&file);

    let fd = engine.creat(A, &mut ioctx, "SPARSE.DAT", &ascii()).unwrap();
    engine.seek(&mut ioctx, fd, 5000, Whence::Set).unwrap();
    assert_eq!(engine.write(&mut ioctx, fd, b"tail").unwrap(), 4);

    engine.seek(&mut ioctx, fd, 0, Whence::Set).unwrap();
    let mut back = vec![0xffu8; 5004];
    assert_eq!(engine.read(&mut ioctx, fd, &mut back).unwrap(), 5004);
    assert!(back[..5000].iter().all(|&b| b == 0));
    assert_eq!(&back[5000..], b"tail");
    engine.close(&mut ioctx, fd).unwrap();
}

#[test]
fn open_flag_combinations() {
    let file = scratch_image();
    let (mut engine, mut ioctx) = fresh_engine(&file);

    // Creating without write intent is a contradiction.
    assert_eq!(
        engine.open(A, &mut ioctx, "X.TXT", O_RDONLY | O_CREAT, Some(&ascii())),
        Err(Error::Syntax)
    );
    assert_eq!(
        engine.open(A, &mut ioctx, "X.TXT", O_WRONLY | O_RDWR, Some(&ascii())),
        Err(Error::Syntax)
    );
    assert_eq!(
        engine.open(A, &mut ioctx, "X.TXT", O_EXCL, Some(&ascii())),
        Err(Error::Syntax)
    );
    // Creating requires the header packet.
    assert_eq!(
        engine.open(A, &mut ioctx, "X.TXT", O_WRONLY | O_CREAT, None),
        Err(Error::Syntax)
    );

    let fd = engine
        .open(A, &mut ioctx, "X.TXT", O_RDWR | O_CREAT, Some(&ascii()))
        .unwrap();
    engine.close(&mut ioctx, fd).unwrap();
    assert_eq!(
        engine.open(A, &mut ioctx, "X.TXT", O_RDWR | O_CREAT | O_EXCL, Some(&ascii())),
        Err(Error::Exist)
    );

    // A binary open of an ascii file reads as not found.
    assert_eq!(
        engine.open(A, &mut ioctx, "X.TXT", O_RDONLY, Some(&binary())),
        Err(Error::NotFound)
    );
}

#[test]
fn readdir_skips_freed_slots_and_stops_at_the_sentinel() {
    let file = scratch_image();
    let (mut engine, mut ioctx) = fresh_engine(&file);

    for file_name in ["ONE.TXT", "TWO.TXT", "THREE.TXT"] {
        let fd = engine.creat(A, &mut ioctx, file_name, &ascii()).unwrap();
        engine.close(&mut ioctx, fd).unwrap();
    }
    engine.unlink(A, &ioctx, "TWO.TXT").unwrap();

    let dd = engine.opendir(A, &mut ioctx).unwrap();
    assert_eq!(engine.telldir(&ioctx, dd).unwrap(), 0);
    let mut names = Vec::new();
    while let Ok(fib) = engine.readdir(&mut ioctx, dd) {
        names.push(name::sword_to_host(&fib.sword_name));
    }
    assert_eq!(names, ["ONE.TXT", "THREE.TXT"]);

    // Rewinding replays the iteration.
    engine.seekdir(&ioctx, dd, 0).unwrap();
    let first = engine.readdir(&mut ioctx, dd).unwrap();
    assert_eq!(name::sword_to_host(&first.sword_name), "ONE.TXT");
    assert_eq!(engine.telldir(&ioctx, dd).unwrap(), first.dirno + 1);
    engine.closedir(&mut ioctx, dd).unwrap();
}

#[test]
fn sentinel_preservation_across_create_and_unlink() {
    let file = scratch_image();
    let (mut engine, mut ioctx) = fresh_engine(&file);

    for file_name in ["A1", "A2", "A3", "A4"] {
        let fd = engine.creat(A, &mut ioctx, file_name, &ascii()).unwrap();
        engine.close(&mut ioctx, fd).unwrap();
    }
    engine.unlink(A, &ioctx, "A2").unwrap();
    engine.unlink(A, &ioctx, "A4").unwrap();
    let fd = engine.creat(A, &mut ioctx, "A5", &ascii()).unwrap();
    engine.close(&mut ioctx, fd).unwrap();

    // Exactly one sentinel, sitting in the first slot past the last
    // slot ever used.
    let mut dir = [0u8; RECORD_SIZE];
    engine
        .storage_mut()
        .record_read(A, &mut dir, sos_fs::DIRPS_DEFAULT, 1)
        .unwrap();
    let attrs: Vec<u8> = (0..8).map(|slot| dir[slot * 32]).collect();
    // A5 reclaimed the first freed slot, the second stays free.
    assert_ne!(attrs[1], 0x00);
    assert_eq!(attrs[3], 0x00, "freed slot reads free");
    assert_eq!(attrs[4], 0xff, "sentinel past the last used slot");
    assert_eq!(
        attrs.iter().filter(|&&attr| attr == 0xff).count(),
        1,
        "exactly one sentinel"
    );
}

#[test]
fn read_only_mount_rejects_write_intent_and_leaves_the_image() {
    let file = scratch_image();
    {
        let (mut engine, mut ioctx) = fresh_engine(&file);
        let fd = engine.creat(A, &mut ioctx, "KEEP.TXT", &ascii()).unwrap();
        engine.write(&mut ioctx, fd, b"KEEP\r").unwrap();
        engine.close(&mut ioctx, fd).unwrap();
        engine.unmount(A, &mut ioctx).unwrap();
    }
    let before = std::fs::read(file.path()).unwrap();

    let mut engine = FsEngine::with_defaults();
    let mut ioctx = IoContext::new();
    engine
        .mount(
            A,
            file.path(),
            MountOptions { read_only: true },
            &mut ioctx,
        )
        .unwrap();

    assert_eq!(
        engine.creat(A, &mut ioctx, "NEW.TXT", &ascii()),
        Err(Error::ReadOnly)
    );
    assert_eq!(
        engine.open(A, &mut ioctx, "KEEP.TXT", O_RDWR, Some(&ascii())),
        Err(Error::ReadOnly)
    );
    assert_eq!(engine.unlink(A, &ioctx, "KEEP.TXT"), Err(Error::ReadOnly));
    assert_eq!(
        engine.rename(A, &ioctx, "KEEP.TXT", "LOSE.TXT"),
        Err(Error::ReadOnly)
    );
    assert_eq!(
        engine.set_attr(A, &ioctx, "KEEP.TXT", SosAttr::RDONLY),
        Err(Error::ReadOnly)
    );

    // Reading still works.
    let fd = engine
        .open(A, &mut ioctx, "KEEP.TXT", O_RDONLY, Some(&ascii()))
        .unwrap();
    let mut buf = [0u8; 5];
    assert_eq!(engine.read(&mut ioctx, fd, &mut buf).unwrap(), 5);
    engine.close(&mut ioctx, fd).unwrap();
    engine.unmount(A, &mut ioctx).unwrap();

    let after = std::fs::read(file.path()).unwrap();
    assert_eq!(before, after, "read-only mount left the image intact");
}

#[test]
fn cluster_chains_terminate_and_never_share() {
    let file = scratch_image();
    let (mut engine, mut ioctx) = fresh_engine(&file);

    for (file_name, len) in [("P.DAT", 300usize), ("Q.DAT", 9000), ("R.DAT", 4096)] {
        let fd = engine.creat(A, &mut ioctx, file_name, &ascii()).unwrap();
        let body = vec![0x5au8; len];
        assert_eq!(engine.write(&mut ioctx, fd, &body).unwrap(), len);
        engine.close(&mut ioctx, fd).unwrap();
    }

    let fat = raw_fat(&mut engine);
    let dd = engine.opendir(A, &mut ioctx).unwrap();
    let mut seen = std::collections::HashSet::new();
    while let Ok(fib) = engine.readdir(&mut ioctx, dd) {
        // Every live chain ends on an end marker, visits no free
        // entry, and shares no cluster with another file.
        let mut cluster = fib.first_cluster;
        assert!(cluster & 0x80 == 0, "file has content");
        loop {
            assert!(seen.insert(cluster), "cluster {cluster} referenced twice");
            let next = fat[cluster as usize];
            assert_ne!(next, 0x00, "chain of {} hit a free entry", fib.dirno);
            if next & 0x80 != 0 {
                break;
            }
            cluster = next;
        }
    }
    engine.closedir(&mut ioctx, dd).unwrap();
}

#[test]
fn rename_to_an_existing_name_is_exist() {
    let file = scratch_image();
    let (mut engine, mut ioctx) = fresh_engine(&file);

    for file_name in ["SRC.TXT", "DST.TXT"] {
        let fd = engine.creat(A, &mut ioctx, file_name, &ascii()).unwrap();
        engine.close(&mut ioctx, fd).unwrap();
    }
    assert_eq!(
        engine.rename(A, &ioctx, "SRC.TXT", "DST.TXT"),
        Err(Error::Exist)
    );
    // A foreign drive prefix on either side is rejected.
    assert_eq!(
        engine.rename(A, &ioctx, "SRC.TXT", "B:OTHER.TXT"),
        Err(Error::Invalid)
    );
    // The drive's own prefix is tolerated.
    engine
        .rename(A, &ioctx, "A:SRC.TXT", "A:MOVED.TXT")
        .unwrap();
    assert!(engine.get_attr(A, &ioctx, "MOVED.TXT").is_ok());
}

#[test]
fn descriptor_misuse_is_notopen() {
    let file = scratch_image();
    let (mut engine, mut ioctx) = fresh_engine(&file);

    assert_eq!(engine.close(&mut ioctx, 0), Err(Error::NotOpen));
    let mut buf = [0u8; 4];
    assert_eq!(
        engine.read(&mut ioctx, 3, &mut buf),
        Err(Error::NotOpen)
    );
    assert_eq!(engine.close(&mut ioctx, 99), Err(Error::Syntax));

    let fd = engine.creat(A, &mut ioctx, "ONCE.TXT", &ascii()).unwrap();
    engine.close(&mut ioctx, fd).unwrap();
    assert_eq!(engine.close(&mut ioctx, fd), Err(Error::NotOpen));
}

#[test]
fn offline_drive_is_offline() {
    let mut engine = FsEngine::with_defaults();
    let mut ioctx = IoContext::new();
    assert_eq!(
        engine.open(A, &mut ioctx, "X.TXT", O_RDONLY, None),
        Err(Error::Offline)
    );
    assert_eq!(engine.opendir(DeviceLetter::B, &mut ioctx), Err(Error::Offline));
}

#[test]
fn chmod_toggles_the_read_only_bit() {
    let file = scratch_image();
    let (mut engine, mut ioctx) = fresh_engine(&file);

    let fd = engine.creat(A, &mut ioctx, "C.BIN", &binary()).unwrap();
    engine.close(&mut ioctx, fd).unwrap();

    engine.chmod(A, &ioctx, "C.BIN", PERM_RD).unwrap();
    assert!(engine.get_attr(A, &ioctx, "C.BIN").unwrap().is_read_only());
    assert_eq!(engine.unlink(A, &ioctx, "C.BIN"), Err(Error::ReadOnly));

    engine.chmod(A, &ioctx, "C.BIN", PERM_RD | PERM_WR).unwrap();
    let attr = engine.get_attr(A, &ioctx, "C.BIN").unwrap();
    assert!(!attr.is_read_only());
    assert!(attr.is_binary(), "file type bits survive chmod");
    engine.unlink(A, &ioctx, "C.BIN").unwrap();
}

#[test]
fn filesystem_registry_guards_use_counts() {
    let file = scratch_image();
    let (mut engine, mut ioctx) = fresh_engine(&file);

    assert_eq!(engine.unregister_filesystem("sword"), Err(Error::Busy));
    engine.unmount(A, &mut ioctx).unwrap();
    engine.unregister_filesystem("sword").unwrap();
    assert_eq!(
        engine.unregister_filesystem("sword"),
        Err(Error::NotFound)
    );

    engine.mount_image(A, file.path()).unwrap();
    assert_eq!(
        engine.mount_filesystem(A, "sword", MountOptions::default(), &mut ioctx),
        Err(Error::NotFound)
    );
}

#[test]
fn truncate_at_current_size_is_idempotent_on_disk() {
    let file = scratch_image();
    let (mut engine, mut ioctx) = fresh_engine(&file);

    let fd = engine.creat(A, &mut ioctx, "IDEM.DAT", &ascii()).unwrap();
    engine.write(&mut ioctx, fd, &vec![7u8; 6000]).unwrap();
    engine.truncate(&mut ioctx, fd, 6000).unwrap();
    let before = std::fs::read(file.path()).unwrap();
    engine.truncate(&mut ioctx, fd, 6000).unwrap();
    let after = std::fs::read(file.path()).unwrap();
    assert_eq!(before, after);
    engine.close(&mut ioctx, fd).unwrap();

    // And the size invariant holds across the ladder.
    let fd = engine
        .open(A, &mut ioctx, "IDEM.DAT", O_RDWR, Some(&ascii()))
        .unwrap();
    for len in [0u32, 1, 4096, 6144, 6000] {
        engine.truncate(&mut ioctx, fd, len).unwrap();
        assert_eq!(engine.fstat(&ioctx, fd).unwrap().size, len);
    }
    engine.close(&mut ioctx, fd).unwrap();
}
