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

//! Directory entries: fixed 32-byte slots, eight per record, in a run
//! of records starting at `DIRPS`. Attribute `0x00` marks a free
//! slot, `0xFF` the end-of-directory sentinel.

use zerocopy::{little_endian::U16, FromBytes, Immutable, IntoBytes, KnownLayout};

use sos_storage::{
    DeviceLetter, Fib, SosAttr, StorageManager, DENTRIES_PER_RECORD, DENTRY_SIZE, FNAME_EXTLEN,
    FNAME_LEN, FNAME_NAMELEN, RECORD_SIZE,
};

use crate::{Error, Result, SuperBlock};

/// Records the directory spans.
pub(crate) const DIR_RECORDS: u16 = 16;

/// Directory entries the disk holds.
pub(crate) const DENTRY_NR: u16 = DIR_RECORDS * DENTRIES_PER_RECORD as u16;

/// The 32-byte on-disk directory entry. All multi-byte fields are
/// little endian.
#[repr(C)]
#[derive(FromBytes, IntoBytes, Immutable, KnownLayout)]
pub(crate) struct RawDirEntry {
    attr: u8,
    name: [u8; FNAME_NAMELEN],
    ext: [u8; FNAME_EXTLEN],
    password: u8,
    size: U16,
    load_addr: U16,
    exec_addr: U16,
    date: [u8; 6],
    cluster: u8,
    reserved: u8,
}

impl RawDirEntry {
    pub(crate) fn to_fib(&self, device: DeviceLetter, dirno: u8) -> Fib {
        let mut sword_name = [0u8; FNAME_LEN];
        sword_name[..FNAME_NAMELEN].copy_from_slice(&self.name);
        sword_name[FNAME_NAMELEN..].copy_from_slice(&self.ext);
        Fib {
            device,
            dirno,
            attr: SosAttr(self.attr),
            size: self.size.get() as u32,
            load_addr: self.load_addr.get(),
            exec_addr: self.exec_addr.get(),
            date: self.date,
            first_cluster: self.cluster,
            sword_name,
        }
    }

    pub(crate) fn from_fib(fib: &Fib) -> RawDirEntry {
        let mut name = [0u8; FNAME_NAMELEN];
        name.copy_from_slice(&fib.sword_name[..FNAME_NAMELEN]);
        let mut ext = [0u8; FNAME_EXTLEN];
        ext.copy_from_slice(&fib.sword_name[FNAME_NAMELEN..]);
        RawDirEntry {
            attr: fib.attr.0,
            name,
            ext,
            password: 0,
            // The on-disk field keeps the 16-bit view of the monitor.
            size: U16::new(fib.size as u16),
            load_addr: U16::new(fib.load_addr),
            exec_addr: U16::new(fib.exec_addr),
            date: fib.date,
            cluster: fib.first_cluster,
            reserved: 0,
        }
    }
}

fn read_record(
    storage: &mut StorageManager,
    device: DeviceLetter,
    record: u16,
) -> Result<[u8; RECORD_SIZE]> {
    let mut buf = [0u8; RECORD_SIZE];
    if storage.record_read(device, &mut buf, record, 1)? != 1 {
        return Err(Error::Io);
    }
    Ok(buf)
}

fn write_record(
    storage: &mut StorageManager,
    device: DeviceLetter,
    record: u16,
    buf: &[u8; RECORD_SIZE],
) -> Result<()> {
    if storage.record_write(device, buf, record, 1)? != 1 {
        return Err(Error::Io);
    }
    Ok(())
}

fn slot<'rec>(record: &'rec [u8; RECORD_SIZE], index: usize) -> &'rec [u8] {
    &record[index * DENTRY_SIZE..(index + 1) * DENTRY_SIZE]
}

/// Scans the directory, handing every slot to `visit` until it
/// returns `Some` or the end-of-directory sentinel stops the scan.
fn scan<T>(
    storage: &mut StorageManager,
    device: DeviceLetter,
    super_block: &SuperBlock,
    mut visit: impl FnMut(u8, &RawDirEntry) -> Option<T>,
) -> Result<Option<T>> {
    let mut dirno = 0u8;
    for record in super_block.dirps..super_block.dirps + DIR_RECORDS {
        let buf = read_record(storage, device, record)?;
        for index in 0..DENTRIES_PER_RECORD {
            let entry =
                RawDirEntry::ref_from_bytes(slot(&buf, index)).map_err(|_| Error::Invalid)?;
            if SosAttr(entry.attr).is_end_of_dir() {
                return Ok(None);
            }
            if let Some(found) = visit(dirno, entry) {
                return Ok(Some(found));
            }
            dirno += 1;
        }
    }
    Ok(None)
}

/// The entry in slot `dirno`. A free slot, the sentinel before the
/// slot, or a slot past the directory all read as `NOENT`.
pub(crate) fn find_by_dirno(
    storage: &mut StorageManager,
    device: DeviceLetter,
    super_block: &SuperBlock,
    dirno: u8,
) -> Result<Fib> {
    scan(storage, device, super_block, |cur, entry| {
        (cur == dirno && !SosAttr(entry.attr).is_free()).then(|| entry.to_fib(device, cur))
    })?
    .ok_or(Error::NotFound)
}

/// The first live entry in slot `start` or later; lets enumeration
/// skip freed slots. `NOENT` once the sentinel is reached.
pub(crate) fn find_from(
    storage: &mut StorageManager,
    device: DeviceLetter,
    super_block: &SuperBlock,
    start: u8,
) -> Result<Fib> {
    scan(storage, device, super_block, |cur, entry| {
        (cur >= start && !SosAttr(entry.attr).is_free()).then(|| entry.to_fib(device, cur))
    })?
    .ok_or(Error::NotFound)
}

/// Looks a file up by its converted name. The on-disk key is the
/// 13-byte name alone; the extension does not participate.
pub(crate) fn find_by_name(
    storage: &mut StorageManager,
    device: DeviceLetter,
    super_block: &SuperBlock,
    sword_name: &[u8; FNAME_LEN],
) -> Result<Fib> {
    scan(storage, device, super_block, |cur, entry| {
        (!SosAttr(entry.attr).is_free() && entry.name == sword_name[..FNAME_NAMELEN])
            .then(|| entry.to_fib(device, cur))
    })?
    .ok_or(Error::NotFound)
}

/// The first reusable slot: a freed entry or the sentinel itself.
/// `NOSPC` when the directory is full.
pub(crate) fn find_free(
    storage: &mut StorageManager,
    device: DeviceLetter,
    super_block: &SuperBlock,
) -> Result<u8> {
    let mut dirno = 0u16;
    for record in super_block.dirps..super_block.dirps + DIR_RECORDS {
        let buf = read_record(storage, device, record)?;
        for index in 0..DENTRIES_PER_RECORD {
            let attr = SosAttr(slot(&buf, index)[0]);
            if attr.is_free() || attr.is_end_of_dir() {
                return Ok(dirno as u8);
            }
            dirno += 1;
        }
    }
    Err(Error::DeviceFull)
}

/// Splices the 32-byte projection of `fib` into the record holding
/// its slot. When the slot held the end-of-directory sentinel, the
/// sentinel moves into the following slot if that one was unused.
pub(crate) fn write_dent(
    storage: &mut StorageManager,
    super_block: &SuperBlock,
    fib: &Fib,
) -> Result<()> {
    let record = super_block.dirps + fib.dirno as u16 / DENTRIES_PER_RECORD as u16;
    let index = fib.dirno as usize % DENTRIES_PER_RECORD;

    let mut buf = read_record(storage, fib.device, record)?;
    let was_sentinel = SosAttr(slot(&buf, index)[0]).is_end_of_dir();
    buf[index * DENTRY_SIZE..(index + 1) * DENTRY_SIZE]
        .copy_from_slice(RawDirEntry::from_fib(fib).as_bytes());

    let next = fib.dirno as u16 + 1;
    if was_sentinel && next < DENTRY_NR {
        if index + 1 < DENTRIES_PER_RECORD {
            if !SosAttr(slot(&buf, index + 1)[0]).is_end_of_dir() {
                buf[(index + 1) * DENTRY_SIZE] = SosAttr::EODENT.0;
            }
            write_record(storage, fib.device, record, &buf)?;
        } else {
            write_record(storage, fib.device, record, &buf)?;
            let mut next_buf = read_record(storage, fib.device, record + 1)?;
            if !SosAttr(next_buf[0]).is_end_of_dir() {
                next_buf[0] = SosAttr::EODENT.0;
                write_record(storage, fib.device, record + 1, &next_buf)?;
            }
        }
    } else {
        write_record(storage, fib.device, record, &buf)?;
    }
    Ok(())
}

/// Marks the slot free. The rest of the entry is left behind, as the
/// monitor's kill does.
pub(crate) fn clear_dent(
    storage: &mut StorageManager,
    device: DeviceLetter,
    super_block: &SuperBlock,
    dirno: u8,
) -> Result<()> {
    let record = super_block.dirps + dirno as u16 / DENTRIES_PER_RECORD as u16;
    let index = dirno as usize % DENTRIES_PER_RECORD;

    let mut buf = read_record(storage, device, record)?;
    buf[index * DENTRY_SIZE] = SosAttr::FREE.0;
    write_record(storage, device, record, &buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_entry_layout_is_32_bytes() {
        assert_eq!(core::mem::size_of::<RawDirEntry>(), DENTRY_SIZE);
    }

    #[test]
    fn fib_round_trips_through_the_raw_entry() {
        let mut raw = [0u8; DENTRY_SIZE];
        raw[0] = SosAttr::BIN.0;
        raw[1..6].copy_from_slice(b"HELLO");
        raw[1 + 5..14].fill(b' ');
        raw[14..17].copy_from_slice(b"OBJ");
        raw[18..20].copy_from_slice(&0x1234u16.to_le_bytes());
        raw[20..22].copy_from_slice(&0x8000u16.to_le_bytes());
        raw[22..24].copy_from_slice(&0x8010u16.to_le_bytes());
        raw[30] = 0x05;

        let entry = RawDirEntry::ref_from_bytes(&raw).unwrap();
        let fib = entry.to_fib(DeviceLetter::A, 3);
        assert_eq!(fib.attr, SosAttr::BIN);
        assert_eq!(fib.size, 0x1234);
        assert_eq!(fib.load_addr, 0x8000);
        assert_eq!(fib.exec_addr, 0x8010);
        assert_eq!(fib.first_cluster, 0x05);
        assert_eq!(&fib.sword_name[..5], b"HELLO");

        let back = RawDirEntry::from_fib(&fib);
        assert_eq!(back.as_bytes(), &raw);
    }

    #[test]
    fn dent_size_field_wraps_like_the_monitor() {
        let mut fib = Fib::new(DeviceLetter::A);
        fib.size = 0x10000;
        assert_eq!(RawDirEntry::from_fib(&fib).size.get(), 0);
    }
}
