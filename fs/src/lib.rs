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

//! The virtual file system of the SWORD emulator: v-node cache,
//! mount points, file descriptors and path resolution in front of the
//! native SWORD disk format driver.
//!
//! All engine state lives in one owned [`FsEngine`] value; the
//! per-session [`IoContext`] is created by the caller and borrowed
//! into every operation. Below the v-node layer the engine dispatches
//! through [`FileSystemType`] to the format driver, which performs
//! record I/O through the storage manager bound to the drive letter.

pub use sos_err::{code_of, Error, Result};
pub use sos_storage::{
    name, DeviceLetter, DiskPos, Fib, HeaderPacket, ImageInfo, SosAttr, StorageManager,
    CLUSTER_SIZE, DIRPS_DEFAULT, FATPOS_DEFAULT, FNAME_LEN, RECORD_SIZE, STORAGE_NR,
};
pub use vfs::{FsEngine, IoContext, PERM_EX, PERM_RD, PERM_WR};

pub mod sword;
pub mod xfer;

mod mount;
mod path;
mod vfs;
mod vnode;

use sword::SwordFileSystem;

/// Number of v-node cache slots.
pub const VNODE_TABLE_SIZE: usize = 32;

/// Number of entries of the process-wide file descriptor table.
pub const SYS_FD_TABLE_SIZE: usize = 32;

/// Number of descriptor slots per I/O context.
pub const PROC_FD_TABLE_SIZE: usize = 16;

/// V-node identity within a mount. For the SWORD file system this is
/// the `#DIRNO` of the file; the root directory uses [`ROOT_VNID`].
pub type Vnid = u16;

/// The v-node id of a drive's root directory.
pub const ROOT_VNID: Vnid = 0xffff;

/// A v-node handle: table index plus a generation counter so stale
/// handles are detected after the slot has been reclaimed.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct VnodeRef {
    pub(crate) index: usize,
    pub(crate) generation: u32,
}

pub type MountFlags = u16;

/// The mount is read-only; every write intent fails `RDONLY`.
pub const MNT_RDONLY: MountFlags = 0x0001;

/// Options of a mount request.
#[derive(Clone, Copy, Debug, Default)]
pub struct MountOptions {
    pub read_only: bool,
}

pub type OpenFlags = u16;

pub const O_RDONLY: OpenFlags = 0x0;
pub const O_WRONLY: OpenFlags = 0x1;
pub const O_RDWR: OpenFlags = 0x2;
pub const O_CREAT: OpenFlags = 0x4;
pub const O_EXCL: OpenFlags = 0x8;

const ACCMODE_MASK: OpenFlags = 0x3;

/// Whether the flags carry any write intent.
pub(crate) fn flags_may_write(flags: OpenFlags) -> bool {
    flags & ACCMODE_MASK == O_WRONLY || flags & ACCMODE_MASK == O_RDWR || flags & O_CREAT != 0
}

/// Origin of a seek.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Whence {
    Set,
    Cur,
    End,
}

/// Direction of a block request.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum IoDir {
    Read,
    Write,
}

impl IoDir {
    pub fn is_write(self) -> bool {
        self == IoDir::Write
    }
}

/// In-memory superblock of a mounted file system.
#[derive(Clone, Copy, Debug)]
pub struct SuperBlock {
    /// Records the device holds.
    pub records: u32,
    /// Free clusters at mount time.
    pub free_blocks: u32,
    /// First record of the directory entries.
    pub dirps: u16,
    /// Record of the file allocation table.
    pub fatpos: u16,
}

impl SuperBlock {
    /// Clusters the device holds.
    pub fn clusters(&self) -> u32 {
        self.records >> sos_storage::CLUSTER_SHIFT
    }
}

/// A registered file-system implementation.
///
/// Dispatch is a match over this enum, so a missing operation is a
/// compile-time impossibility rather than a hole in a function
/// table. Only the native SWORD format exists today, but a
/// host-directory backend would slot in as a second variant.
pub enum FileSystemType {
    Sword(SwordFileSystem),
}

impl FileSystemType {
    pub fn name(&self) -> &'static str {
        match self {
            FileSystemType::Sword(_) => SwordFileSystem::NAME,
        }
    }

    /// Fills the superblock and mount flags for a device the storage
    /// layer already has an image bound to.
    pub(crate) fn mount(
        &self,
        storage: &mut StorageManager,
        device: DeviceLetter,
        options: MountOptions,
    ) -> Result<(SuperBlock, MountFlags)> {
        match self {
            FileSystemType::Sword(fs) => fs.mount(storage, device, options),
        }
    }

    pub(crate) fn unmount(&self, storage: &mut StorageManager, device: DeviceLetter) -> Result<()> {
        match self {
            FileSystemType::Sword(fs) => fs.unmount(storage, device),
        }
    }

    /// Materializes the FIB of a v-node id.
    pub(crate) fn lookup(
        &self,
        storage: &mut StorageManager,
        device: DeviceLetter,
        super_block: &SuperBlock,
        vnid: Vnid,
    ) -> Result<Fib> {
        match self {
            FileSystemType::Sword(fs) => fs.lookup(storage, device, super_block, vnid),
        }
    }

    /// Resolves one path element within a directory to a v-node id.
    pub(crate) fn lookup_name(
        &self,
        storage: &mut StorageManager,
        device: DeviceLetter,
        super_block: &SuperBlock,
        dir: &Fib,
        name: &str,
    ) -> Result<Vnid> {
        match self {
            FileSystemType::Sword(fs) => fs.lookup_name(storage, device, super_block, dir, name),
        }
    }

    pub(crate) fn create(
        &self,
        storage: &mut StorageManager,
        device: DeviceLetter,
        super_block: &SuperBlock,
        name: &str,
        pkt: &HeaderPacket,
    ) -> Result<Vnid> {
        match self {
            FileSystemType::Sword(fs) => fs.create(storage, device, super_block, name, pkt),
        }
    }

    /// Validates open flags and header packet against the on-disk
    /// attribute.
    pub(crate) fn check_open(
        &self,
        fib: &Fib,
        flags: OpenFlags,
        pkt: Option<&HeaderPacket>,
    ) -> Result<()> {
        match self {
            FileSystemType::Sword(fs) => fs.check_open(fib, flags, pkt),
        }
    }

    pub(crate) fn read(
        &self,
        storage: &mut StorageManager,
        super_block: &SuperBlock,
        fib: &mut Fib,
        pos: u32,
        buf: &mut [u8],
    ) -> Result<usize> {
        match self {
            FileSystemType::Sword(fs) => fs.read(storage, super_block, fib, pos, buf),
        }
    }

    pub(crate) fn write(
        &self,
        storage: &mut StorageManager,
        super_block: &SuperBlock,
        fib: &mut Fib,
        pos: u32,
        buf: &[u8],
    ) -> Result<usize> {
        match self {
            FileSystemType::Sword(fs) => fs.write(storage, super_block, fib, pos, buf),
        }
    }

    pub(crate) fn truncate(
        &self,
        storage: &mut StorageManager,
        super_block: &SuperBlock,
        fib: &mut Fib,
        length: u32,
    ) -> Result<()> {
        match self {
            FileSystemType::Sword(fs) => fs.truncate(storage, super_block, fib, length),
        }
    }

    /// Removes a directory entry and releases its cluster chain,
    /// returning the v-node id it had.
    pub(crate) fn unlink(
        &self,
        storage: &mut StorageManager,
        device: DeviceLetter,
        super_block: &SuperBlock,
        name: &str,
    ) -> Result<Vnid> {
        match self {
            FileSystemType::Sword(fs) => fs.unlink(storage, device, super_block, name),
        }
    }

    pub(crate) fn rename(
        &self,
        storage: &mut StorageManager,
        device: DeviceLetter,
        super_block: &SuperBlock,
        old_name: &str,
        new_name: &str,
    ) -> Result<Fib> {
        match self {
            FileSystemType::Sword(fs) => fs.rename(storage, device, super_block, old_name, new_name),
        }
    }

    pub(crate) fn set_attr(
        &self,
        storage: &mut StorageManager,
        device: DeviceLetter,
        super_block: &SuperBlock,
        name: &str,
        attr: SosAttr,
    ) -> Result<Fib> {
        match self {
            FileSystemType::Sword(fs) => fs.set_attr(storage, device, super_block, name, attr),
        }
    }

    pub(crate) fn get_attr(
        &self,
        storage: &mut StorageManager,
        device: DeviceLetter,
        super_block: &SuperBlock,
        name: &str,
    ) -> Result<SosAttr> {
        match self {
            FileSystemType::Sword(fs) => fs.get_attr(storage, device, super_block, name),
        }
    }

    /// The first live directory entry at or after the cursor.
    pub(crate) fn readdir(
        &self,
        storage: &mut StorageManager,
        device: DeviceLetter,
        super_block: &SuperBlock,
        cursor: u8,
    ) -> Result<Fib> {
        match self {
            FileSystemType::Sword(fs) => fs.readdir(storage, device, super_block, cursor),
        }
    }

    /// Writes a FIB back into its directory entry.
    pub(crate) fn write_dent(
        &self,
        storage: &mut StorageManager,
        super_block: &SuperBlock,
        fib: &Fib,
    ) -> Result<()> {
        match self {
            FileSystemType::Sword(fs) => fs.write_dent(storage, super_block, fib),
        }
    }

    /// Lays down a fresh, empty file system on the bound image.
    pub fn format(&self, storage: &mut StorageManager, device: DeviceLetter) -> Result<()> {
        match self {
            FileSystemType::Sword(fs) => fs.format(storage, device),
        }
    }
}
