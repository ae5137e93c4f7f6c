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

//! The native SWORD disk format: a single-level directory of 32-byte
//! entries, a one-record allocation table chaining 4 KiB clusters,
//! and a header packet (attribute, load address, execution address)
//! kept in every entry.

mod dent;
mod fat;
mod rwblk;

pub use fat::MAX_FILE_SIZE;

use log::debug;

use sos_storage::{
    name, record_to_cluster, DeviceLetter, Fib, HeaderPacket, SosAttr, StorageManager,
    DIRPS_DEFAULT, FATPOS_DEFAULT, RECORD_SIZE,
};

use crate::{
    flags_may_write, Error, IoDir, MountFlags, MountOptions, OpenFlags, Result, SuperBlock, Vnid,
    MNT_RDONLY, ROOT_VNID,
};

/// The SWORD file-system driver. Stateless: everything lives on disk
/// or in the FIBs the caller holds.
pub struct SwordFileSystem;

impl SwordFileSystem {
    pub const NAME: &'static str = "sword";

    pub(crate) fn mount(
        &self,
        storage: &mut StorageManager,
        device: DeviceLetter,
        options: MountOptions,
    ) -> Result<(SuperBlock, MountFlags)> {
        if !device.is_disk() {
            return Err(Error::BadFile);
        }
        let info = storage.image_info(device)?;

        let mut super_block = SuperBlock {
            records: info.records,
            free_blocks: 0,
            dirps: DIRPS_DEFAULT,
            fatpos: FATPOS_DEFAULT,
        };
        super_block.free_blocks =
            fat::Fat::read(storage, device, &super_block)?.free_clusters(&super_block);

        let mut flags = 0;
        if options.read_only || info.read_only {
            flags |= MNT_RDONLY;
        }
        debug!(
            "sword: mounted {device} ({} records, {} free clusters)",
            super_block.records, super_block.free_blocks
        );
        Ok((super_block, flags))
    }

    pub(crate) fn unmount(&self, _storage: &mut StorageManager, device: DeviceLetter) -> Result<()> {
        // Every operation flushes through; nothing is cached here.
        debug!("sword: unmounted {device}");
        Ok(())
    }

    pub(crate) fn lookup(
        &self,
        storage: &mut StorageManager,
        device: DeviceLetter,
        super_block: &SuperBlock,
        vnid: Vnid,
    ) -> Result<Fib> {
        if vnid == ROOT_VNID {
            let mut fib = Fib::new(device);
            fib.attr = SosAttr::DIR;
            fib.first_cluster = record_to_cluster(super_block.dirps);
            return Ok(fib);
        }
        if vnid >= dent::DENTRY_NR {
            return Err(Error::NotFound);
        }
        dent::find_by_dirno(storage, device, super_block, vnid as u8)
    }

    pub(crate) fn lookup_name(
        &self,
        storage: &mut StorageManager,
        device: DeviceLetter,
        super_block: &SuperBlock,
        dir: &Fib,
        name: &str,
    ) -> Result<Vnid> {
        if !dir.attr.is_dir() {
            // Only the root directory exists on this format.
            return Err(Error::NotFound);
        }
        let sword_name = name::host_to_sword(name);
        dent::find_by_name(storage, device, super_block, &sword_name)
            .map(|fib| fib.dirno as Vnid)
    }

    pub(crate) fn create(
        &self,
        storage: &mut StorageManager,
        device: DeviceLetter,
        super_block: &SuperBlock,
        file_name: &str,
        pkt: &HeaderPacket,
    ) -> Result<Vnid> {
        if pkt.attr.file_type() == 0 {
            return Err(Error::Invalid);
        }
        let sword_name = name::host_to_sword(file_name);
        if sword_name == [b' '; sos_storage::FNAME_LEN] {
            return Err(Error::Invalid);
        }

        match dent::find_by_name(storage, device, super_block, &sword_name) {
            Ok(mut fib) => {
                // Saving over an existing name reuses the entry, as
                // the monitor does, but only for the same file type.
                if fib.attr.is_read_only() {
                    return Err(Error::ReadOnly);
                }
                if fib.attr.file_type() != pkt.attr.file_type() {
                    return Err(Error::Exist);
                }
                fat::release_blocks(storage, super_block, &mut fib, 0)?;
                fib.attr = pkt.attr;
                fib.size = 0;
                fib.load_addr = pkt.load_addr;
                fib.exec_addr = pkt.exec_addr;
                fib.sword_name = sword_name;
                dent::write_dent(storage, super_block, &fib)?;
                Ok(fib.dirno as Vnid)
            }
            Err(Error::NotFound) => {
                let dirno = dent::find_free(storage, device, super_block)?;
                let mut fib = Fib::new(device);
                fib.dirno = dirno;
                fib.attr = pkt.attr;
                fib.load_addr = pkt.load_addr;
                fib.exec_addr = pkt.exec_addr;
                fib.first_cluster = fat::FAT_ENT_EOF_MASK;
                fib.sword_name = sword_name;
                dent::write_dent(storage, super_block, &fib)?;
                Ok(dirno as Vnid)
            }
            Err(error) => Err(error),
        }
    }

    pub(crate) fn check_open(
        &self,
        fib: &Fib,
        flags: OpenFlags,
        pkt: Option<&HeaderPacket>,
    ) -> Result<()> {
        if fib.attr.is_dir() {
            return Err(Error::FileMode);
        }
        if flags_may_write(flags) && fib.attr.is_read_only() {
            return Err(Error::ReadOnly);
        }
        // A file of another type reads as not found.
        if let Some(pkt) = pkt {
            if pkt.attr.file_type() != 0 && pkt.attr.file_type() != fib.attr.file_type() {
                return Err(Error::NotFound);
            }
        }
        Ok(())
    }

    pub(crate) fn read(
        &self,
        storage: &mut StorageManager,
        super_block: &SuperBlock,
        fib: &mut Fib,
        pos: u32,
        buf: &mut [u8],
    ) -> Result<usize> {
        rwblk::read_block(storage, super_block, fib, pos, buf)
    }

    pub(crate) fn write(
        &self,
        storage: &mut StorageManager,
        super_block: &SuperBlock,
        fib: &mut Fib,
        pos: u32,
        buf: &[u8],
    ) -> Result<usize> {
        rwblk::write_block(storage, super_block, fib, pos, buf)
    }

    pub(crate) fn truncate(
        &self,
        storage: &mut StorageManager,
        super_block: &SuperBlock,
        fib: &mut Fib,
        length: u32,
    ) -> Result<()> {
        if length > MAX_FILE_SIZE {
            return Err(Error::DeviceFull);
        }
        if length > fib.size {
            // Extending allocates zero-filled clusters up to the new
            // end of file.
            fat::get_block(storage, super_block, fib, length - 1, IoDir::Write)?;
        } else {
            fat::release_blocks(storage, super_block, fib, length)?;
        }
        fib.size = length;
        dent::write_dent(storage, super_block, fib)
    }

    pub(crate) fn unlink(
        &self,
        storage: &mut StorageManager,
        device: DeviceLetter,
        super_block: &SuperBlock,
        file_name: &str,
    ) -> Result<Vnid> {
        let sword_name = name::host_to_sword(file_name);
        let mut fib = dent::find_by_name(storage, device, super_block, &sword_name)?;
        if fib.attr.is_read_only() {
            return Err(Error::ReadOnly);
        }
        if fib.attr.is_dir() {
            return Err(Error::FileMode);
        }
        fat::release_blocks(storage, super_block, &mut fib, 0)?;
        dent::clear_dent(storage, device, super_block, fib.dirno)?;
        Ok(fib.dirno as Vnid)
    }

    pub(crate) fn rename(
        &self,
        storage: &mut StorageManager,
        device: DeviceLetter,
        super_block: &SuperBlock,
        old_name: &str,
        new_name: &str,
    ) -> Result<Fib> {
        let old_sword = name::host_to_sword(old_name);
        let mut fib = dent::find_by_name(storage, device, super_block, &old_sword)?;
        if fib.attr.is_read_only() {
            return Err(Error::ReadOnly);
        }

        let new_sword = name::host_to_sword(new_name);
        match dent::find_by_name(storage, device, super_block, &new_sword) {
            Ok(existing) if existing.dirno != fib.dirno => return Err(Error::Exist),
            Ok(_) | Err(Error::NotFound) => {}
            Err(error) => return Err(error),
        }

        fib.sword_name = new_sword;
        dent::write_dent(storage, super_block, &fib)?;
        Ok(fib)
    }

    pub(crate) fn set_attr(
        &self,
        storage: &mut StorageManager,
        device: DeviceLetter,
        super_block: &SuperBlock,
        file_name: &str,
        attr: SosAttr,
    ) -> Result<Fib> {
        let sword_name = name::host_to_sword(file_name);
        let mut fib = dent::find_by_name(storage, device, super_block, &sword_name)?;
        fib.attr = SosAttr(fib.attr.0 & SosAttr::PRESERVED_MASK | attr.0 & SosAttr::SETTABLE_MASK);
        dent::write_dent(storage, super_block, &fib)?;
        Ok(fib)
    }

    pub(crate) fn get_attr(
        &self,
        storage: &mut StorageManager,
        device: DeviceLetter,
        super_block: &SuperBlock,
        file_name: &str,
    ) -> Result<SosAttr> {
        let sword_name = name::host_to_sword(file_name);
        dent::find_by_name(storage, device, super_block, &sword_name).map(|fib| fib.attr)
    }

    pub(crate) fn readdir(
        &self,
        storage: &mut StorageManager,
        device: DeviceLetter,
        super_block: &SuperBlock,
        cursor: u8,
    ) -> Result<Fib> {
        dent::find_from(storage, device, super_block, cursor)
    }

    pub(crate) fn write_dent(
        &self,
        storage: &mut StorageManager,
        super_block: &SuperBlock,
        fib: &Fib,
    ) -> Result<()> {
        dent::write_dent(storage, super_block, fib)
    }

    /// Bytes valid in the cluster holding `offset` of the file.
    pub fn used_in_block(
        &self,
        storage: &mut StorageManager,
        super_block: &SuperBlock,
        fib: &Fib,
        offset: u32,
    ) -> Result<usize> {
        fat::used_in_block(storage, super_block, fib, offset)
    }

    /// Lays down a fresh file system on the image bound to `device`:
    /// a zeroed allocation table with the directory and table
    /// clusters reserved and everything past the device marked, and
    /// an empty directory holding a single end sentinel.
    pub fn format(&self, storage: &mut StorageManager, device: DeviceLetter) -> Result<()> {
        if !device.is_disk() {
            return Err(Error::BadFile);
        }
        let info = storage.image_info(device)?;
        if info.read_only {
            return Err(Error::ReadOnly);
        }
        let clusters = info.records >> sos_storage::CLUSTER_SHIFT;

        let mut table = [0u8; RECORD_SIZE];
        table[record_to_cluster(FATPOS_DEFAULT) as usize] = 0x8f;
        table[record_to_cluster(DIRPS_DEFAULT) as usize] = 0x8f;
        for entry in table.iter_mut().skip(clusters as usize) {
            *entry = 0x8f;
        }
        if storage.record_write(device, &table, FATPOS_DEFAULT, 1)? != 1 {
            return Err(Error::Io);
        }

        let mut directory = [0u8; RECORD_SIZE * dent::DIR_RECORDS as usize];
        directory[0] = SosAttr::EODENT.0;
        if storage.record_write(device, &directory, DIRPS_DEFAULT, dent::DIR_RECORDS)?
            != dent::DIR_RECORDS
        {
            return Err(Error::Io);
        }
        debug!("sword: formatted {device} ({clusters} clusters)");
        Ok(())
    }
}
