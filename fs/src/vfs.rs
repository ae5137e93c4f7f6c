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

//! The virtual file system front end: descriptor tables, the mount
//! and file-system registries, and the engine value every operation
//! is a method on.

use std::path::Path;

use log::debug;

use sos_storage::{
    DeviceLetter, DiskPos, Fib, HeaderPacket, ImageInfo, ImageDriver, SosAttr, StorageManager,
};

use crate::{
    flags_may_write, mount::{MountPoint, MountTable}, sword::{SwordFileSystem, MAX_FILE_SIZE},
    vnode::VnodeTable, Error, FileSystemType, MountOptions, OpenFlags, Result, Vnid,
    VnodeRef, Whence, ACCMODE_MASK, MNT_RDONLY, O_CREAT, O_EXCL, O_RDONLY, O_WRONLY,
    PROC_FD_TABLE_SIZE, ROOT_VNID, STORAGE_NR, SYS_FD_TABLE_SIZE,
};

/// Permission bits accepted by [`FsEngine::chmod`].
pub const PERM_RD: u16 = 1;
pub const PERM_WR: u16 = 2;
pub const PERM_EX: u16 = 4;

/// One entry of the process-wide descriptor table. The slots of an
/// I/O context point at these.
#[derive(Clone, Copy)]
pub(crate) struct FileDescriptor {
    pub use_count: u32,
    pub vnode: VnodeRef,
    pub flags: OpenFlags,
    /// The descriptor iterates directory entries instead of bytes.
    pub dir_stream: bool,
    pub pos: DiskPos,
}

impl FileDescriptor {
    fn clear(&mut self) {
        self.use_count = 0;
        self.vnode = VnodeRef {
            index: 0,
            generation: 0,
        };
        self.flags = 0;
        self.dir_stream = false;
        self.pos = DiskPos::default();
    }
}

pub(crate) struct FdTable {
    pub entries: Vec<FileDescriptor>,
}

impl FdTable {
    fn new() -> Self {
        Self {
            entries: (0..SYS_FD_TABLE_SIZE)
                .map(|_| FileDescriptor {
                    use_count: 0,
                    vnode: VnodeRef {
                        index: 0,
                        generation: 0,
                    },
                    flags: 0,
                    dir_stream: false,
                    pos: DiskPos::default(),
                })
                .collect(),
        }
    }

    fn alloc(&mut self) -> Option<usize> {
        self.entries.iter().position(|fd| fd.use_count == 0)
    }
}

/// Per-session state: the root and current working directory of each
/// drive, the open descriptor slots, and the cached directory and
/// allocation table records.
pub struct IoContext {
    pub(crate) root: [Option<VnodeRef>; STORAGE_NR],
    pub(crate) cwd: [Option<VnodeRef>; STORAGE_NR],
    pub(crate) fds: [Option<usize>; PROC_FD_TABLE_SIZE],
    pub dirps: u16,
    pub fatpos: u16,
}

impl Default for IoContext {
    fn default() -> Self {
        Self::new()
    }
}

impl IoContext {
    pub fn new() -> Self {
        Self {
            root: [None; STORAGE_NR],
            cwd: [None; STORAGE_NR],
            fds: [None; PROC_FD_TABLE_SIZE],
            dirps: sos_storage::DIRPS_DEFAULT,
            fatpos: sos_storage::FATPOS_DEFAULT,
        }
    }
}

pub(crate) struct FsEntry {
    pub fs: FileSystemType,
    pub use_count: u32,
}

/// The file-system engine. Owns the storage manager, the registries,
/// the mount table and the v-node and descriptor tables; every public
/// operation is a method taking the caller's [`IoContext`].
pub struct FsEngine {
    pub(crate) storage: StorageManager,
    pub(crate) filesystems: Vec<FsEntry>,
    pub(crate) mounts: MountTable,
    pub(crate) vnodes: VnodeTable,
    pub(crate) fds: FdTable,
}

impl Default for FsEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl FsEngine {
    /// An engine with empty registries.
    pub fn new() -> Self {
        Self {
            storage: StorageManager::new(),
            filesystems: Vec::new(),
            mounts: MountTable::new(),
            vnodes: VnodeTable::new(),
            fds: FdTable::new(),
        }
    }

    /// An engine with the built-in storage drivers and the SWORD file
    /// system registered.
    pub fn with_defaults() -> Self {
        let mut engine = Self {
            storage: StorageManager::with_default_drivers(),
            filesystems: Vec::new(),
            mounts: MountTable::new(),
            vnodes: VnodeTable::new(),
            fds: FdTable::new(),
        };
        engine
            .register_filesystem(FileSystemType::Sword(SwordFileSystem))
            .expect("fresh registry");
        engine
    }

    pub fn storage(&self) -> &StorageManager {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut StorageManager {
        &mut self.storage
    }

    /*
     * Registries
     */

    pub fn register_image_driver(&mut self, driver: ImageDriver) -> Result<()> {
        self.storage.register_driver(driver)
    }

    pub fn unregister_image_driver(&mut self, name: &str) -> Result<()> {
        self.storage.unregister_driver(name)
    }

    pub fn register_filesystem(&mut self, fs: FileSystemType) -> Result<()> {
        if self.filesystems.iter().any(|entry| entry.fs.name() == fs.name()) {
            return Err(Error::Busy);
        }
        self.filesystems.push(FsEntry { fs, use_count: 0 });
        Ok(())
    }

    pub fn unregister_filesystem(&mut self, name: &str) -> Result<()> {
        let index = self
            .filesystems
            .iter()
            .position(|entry| entry.fs.name() == name)
            .ok_or(Error::NotFound)?;
        if self.filesystems[index].use_count > 0 {
            return Err(Error::Busy);
        }
        self.filesystems.remove(index);
        Ok(())
    }

    fn fs_by_name(&self, name: &str) -> Result<usize> {
        self.filesystems
            .iter()
            .position(|entry| entry.fs.name() == name)
            .ok_or(Error::NotFound)
    }

    /*
     * Mounting
     */

    pub fn mount_image(&mut self, device: DeviceLetter, path: &Path) -> Result<()> {
        self.storage.mount_image(device, path)
    }

    /// Releases the image binding of a drive. Refused while a file
    /// system is still mounted on it.
    pub fn unmount_image(&mut self, device: DeviceLetter) -> Result<()> {
        let index = MountTable::index_of(device)?;
        if self.mounts.at(index).is_some() {
            return Err(Error::Busy);
        }
        self.storage.unmount_image(device)
    }

    pub fn image_info(&self, device: DeviceLetter) -> Result<ImageInfo> {
        self.storage.image_info(device)
    }

    /// Lays a fresh file system onto the image bound to `device`.
    pub fn format(&mut self, device: DeviceLetter, fs_name: &str) -> Result<()> {
        let index = self.fs_by_name(fs_name)?;
        if self.mounts.at(MountTable::index_of(device)?).is_some() {
            return Err(Error::Busy);
        }
        let fs = &self.filesystems[index].fs;
        fs.format(&mut self.storage, device)
    }

    /// Mounts a registered file system on a drive whose image is
    /// already bound, wiring the root v-node into the I/O context as
    /// both root and current working directory.
    pub fn mount_filesystem(
        &mut self,
        device: DeviceLetter,
        fs_name: &str,
        options: MountOptions,
        ioctx: &mut IoContext,
    ) -> Result<()> {
        let mount_index = MountTable::index_of(device)?;
        if self.mounts.at(mount_index).is_some() {
            return Err(Error::Busy);
        }
        let fs_index = self.fs_by_name(fs_name)?;
        let (super_block, flags) =
            self.filesystems[fs_index]
                .fs
                .mount(&mut self.storage, device, options)?;

        let vn_index = self.vnodes.alloc(&mut self.mounts)?;
        let fib = match self.filesystems[fs_index].fs.lookup(
            &mut self.storage,
            device,
            &super_block,
            ROOT_VNID,
        ) {
            Ok(fib) => fib,
            Err(error) => {
                self.vnodes.invalidate(vn_index, &mut self.mounts);
                return Err(error);
            }
        };
        {
            let node = self.vnodes.at_mut(vn_index);
            node.id = ROOT_VNID;
            node.mount = Some(mount_index);
            node.fib = Some(fib);
            node.busy = false;
            // Referenced as the root and as the current working
            // directory.
            node.use_count = 2;
        }
        let root = self.vnodes.make_ref(vn_index);
        self.mounts.insert(
            mount_index,
            MountPoint {
                device,
                fs_index,
                super_block,
                flags,
                root,
                vnodes: vec![vn_index],
            },
        )?;
        self.filesystems[fs_index].use_count += 1;
        ioctx.root[mount_index] = Some(root);
        ioctx.cwd[mount_index] = Some(root);
        debug!("vfs: mounted {fs_name} on {device}");
        Ok(())
    }

    /// Unmounts the file system of a drive. Refused while any v-node
    /// other than the root (and current working directory) is still
    /// referenced.
    pub fn unmount_filesystem(
        &mut self,
        device: DeviceLetter,
        ioctx: &mut IoContext,
    ) -> Result<()> {
        let mount_index = MountTable::index_of(device)?;
        {
            let mount = self.mounts.at(mount_index).ok_or(Error::Offline)?;
            let cwd = ioctx.cwd[mount_index];
            for &index in &mount.vnodes {
                let node = self.vnodes.at(index);
                let vref = self.vnodes.make_ref(index);
                let limit = if vref == mount.root {
                    if cwd == Some(mount.root) {
                        2
                    } else {
                        1
                    }
                } else if cwd == Some(vref) {
                    1
                } else {
                    0
                };
                if node.use_count > limit || node.busy {
                    return Err(Error::Busy);
                }
            }
        }

        let fs_index = self.mounts.at(mount_index).expect("checked above").fs_index;
        self.filesystems[fs_index]
            .fs
            .unmount(&mut self.storage, device)?;

        let mount = self.mounts.remove(mount_index).expect("checked above");
        if let Some(root) = ioctx.root[mount_index].take() {
            self.vnodes.at_mut(root.index).use_count -= 1;
        }
        if let Some(cwd) = ioctx.cwd[mount_index].take() {
            self.vnodes.at_mut(cwd.index).use_count -= 1;
        }
        for index in mount.vnodes {
            self.vnodes.invalidate(index, &mut self.mounts);
        }
        self.filesystems[fs_index].use_count -= 1;
        debug!("vfs: unmounted {device}");
        Ok(())
    }

    /// Binds an image and mounts the native file system on it in one
    /// step.
    pub fn mount(
        &mut self,
        device: DeviceLetter,
        path: &Path,
        options: MountOptions,
        ioctx: &mut IoContext,
    ) -> Result<()> {
        self.storage.mount_image(device, path)?;
        if let Err(error) =
            self.mount_filesystem(device, SwordFileSystem::NAME, options, ioctx)
        {
            let _ = self.storage.unmount_image(device);
            return Err(error);
        }
        Ok(())
    }

    /// Unmounts the file system and releases the image binding.
    pub fn unmount(&mut self, device: DeviceLetter, ioctx: &mut IoContext) -> Result<()> {
        self.unmount_filesystem(device, ioctx)?;
        self.storage.unmount_image(device)
    }

    /*
     * Files
     */

    /// Creates a file carrying the header packet and opens it for
    /// writing.
    pub fn creat(
        &mut self,
        device: DeviceLetter,
        ioctx: &mut IoContext,
        path: &str,
        pkt: &HeaderPacket,
    ) -> Result<usize> {
        self.open(device, ioctx, path, O_WRONLY | O_CREAT, Some(pkt))
    }

    pub fn open(
        &mut self,
        device: DeviceLetter,
        ioctx: &mut IoContext,
        path: &str,
        flags: OpenFlags,
        pkt: Option<&HeaderPacket>,
    ) -> Result<usize> {
        if flags & ACCMODE_MASK == 3 {
            return Err(Error::Syntax);
        }
        if flags & O_EXCL != 0 && flags & O_CREAT == 0 {
            return Err(Error::Syntax);
        }
        // Creating a file just to read it back is a contradiction.
        if flags & O_CREAT != 0 && flags & ACCMODE_MASK == O_RDONLY {
            return Err(Error::Syntax);
        }

        let (mnt_flags, super_block, fs_index) = {
            let mount = self.mounts.get(device)?;
            (mount.flags, mount.super_block, mount.fs_index)
        };
        if flags_may_write(flags) && mnt_flags & MNT_RDONLY != 0 {
            return Err(Error::ReadOnly);
        }

        let (parent, name) = self.resolve_parent(device, ioctx, path)?;
        if name.is_empty() {
            return Err(Error::FileMode);
        }

        if flags & O_CREAT != 0 {
            let pkt = pkt.ok_or(Error::Syntax)?;
            let parent_fib = self.vnodes.node(parent)?.fib.clone().ok_or(Error::BadFile)?;
            let existing = self.filesystems[fs_index].fs.lookup_name(
                &mut self.storage,
                device,
                &super_block,
                &parent_fib,
                name,
            );
            match existing {
                Ok(_) if flags & O_EXCL != 0 => return Err(Error::Exist),
                Ok(_) | Err(Error::NotFound) => {
                    let vnid = self.filesystems[fs_index].fs.create(
                        &mut self.storage,
                        device,
                        &super_block,
                        name,
                        pkt,
                    )?;
                    // Creating over an existing name rewrote its
                    // directory entry; a cached v-node would be
                    // stale.
                    let mount_index = MountTable::index_of(device)?;
                    if let Some(index) = self.vnodes.find(mount_index, vnid) {
                        if self.vnodes.at(index).use_count == 0 {
                            self.vnodes.invalidate(index, &mut self.mounts);
                        } else {
                            let fib = self.filesystems[fs_index].fs.lookup(
                                &mut self.storage,
                                device,
                                &super_block,
                                vnid,
                            )?;
                            self.vnodes.at_mut(index).fib = Some(fib);
                        }
                    }
                }
                Err(error) => return Err(error),
            }
        }

        let vref = self.walk_element(device, parent, name)?;
        let fib = self.vnodes.node(vref)?.fib.clone().ok_or(Error::BadFile)?;
        self.filesystems[fs_index].fs.check_open(&fib, flags, pkt)?;

        let slot = ioctx
            .fds
            .iter()
            .position(Option::is_none)
            .ok_or(Error::DeviceFull)?;
        let sys = self.fds.alloc().ok_or(Error::DeviceFull)?;
        {
            let fd = &mut self.fds.entries[sys];
            fd.use_count = 1;
            fd.vnode = vref;
            fd.flags = flags;
            fd.dir_stream = false;
            fd.pos = DiskPos {
                dirno: fib.dirno,
                retpoi: 0,
                pos: 0,
            };
        }
        self.vnodes.node_mut(vref)?.use_count += 1;
        ioctx.fds[slot] = Some(sys);
        Ok(slot)
    }

    /// Looks a context descriptor slot up, returning the system table
    /// index and a copy of the entry.
    fn descriptor(&self, ioctx: &IoContext, fd: usize) -> Result<(usize, FileDescriptor)> {
        if fd >= PROC_FD_TABLE_SIZE {
            return Err(Error::Syntax);
        }
        let sys = ioctx.fds[fd].ok_or(Error::NotOpen)?;
        let entry = self.fds.entries[sys];
        if entry.use_count == 0 {
            return Err(Error::NotOpen);
        }
        Ok((sys, entry))
    }

    /// Mount coordinates of an open descriptor's v-node.
    fn descriptor_mount(&self, vref: VnodeRef) -> Result<(usize, usize, crate::SuperBlock)> {
        let node = self.vnodes.node(vref)?;
        let mount_index = node.mount.ok_or(Error::BadFile)?;
        let mount = self.mounts.at(mount_index).ok_or(Error::Offline)?;
        Ok((mount_index, mount.fs_index, mount.super_block))
    }

    pub fn close(&mut self, ioctx: &mut IoContext, fd: usize) -> Result<()> {
        let (sys, entry) = self.descriptor(ioctx, fd)?;

        // The directory entry is flushed on the close of a writable
        // descriptor; plain writes only touch the in-memory FIB.
        if !entry.dir_stream && flags_may_write(entry.flags) {
            let (_, fs_index, super_block) = self.descriptor_mount(entry.vnode)?;
            let fib = self
                .vnodes
                .node(entry.vnode)?
                .fib
                .clone()
                .ok_or(Error::BadFile)?;
            self.filesystems[fs_index]
                .fs
                .write_dent(&mut self.storage, &super_block, &fib)?;
        }

        let node = self.vnodes.node_mut(entry.vnode)?;
        debug_assert!(node.use_count > 0);
        node.use_count -= 1;

        let fd_entry = &mut self.fds.entries[sys];
        fd_entry.use_count -= 1;
        if fd_entry.use_count == 0 {
            fd_entry.clear();
        }
        ioctx.fds[fd] = None;
        Ok(())
    }

    pub fn read(&mut self, ioctx: &mut IoContext, fd: usize, buf: &mut [u8]) -> Result<usize> {
        let (sys, entry) = self.descriptor(ioctx, fd)?;
        if entry.dir_stream {
            return Err(Error::FileMode);
        }
        if entry.flags & ACCMODE_MASK == O_WRONLY {
            return Err(Error::FileMode);
        }
        let (_, fs_index, super_block) = self.descriptor_mount(entry.vnode)?;

        let size = self
            .vnodes
            .node(entry.vnode)?
            .fib
            .as_ref()
            .ok_or(Error::BadFile)?
            .size;
        let pos = entry.pos.pos;
        let count = buf.len().min(size.saturating_sub(pos) as usize);
        if count == 0 {
            return Ok(0);
        }

        let fs = &self.filesystems[fs_index].fs;
        let fib = self
            .vnodes
            .at_mut(entry.vnode.index)
            .fib
            .as_mut()
            .ok_or(Error::BadFile)?;
        let done = fs.read(&mut self.storage, &super_block, fib, pos, &mut buf[..count])?;
        self.fds.entries[sys].pos.pos = pos + done as u32;
        Ok(done)
    }

    pub fn write(&mut self, ioctx: &mut IoContext, fd: usize, buf: &[u8]) -> Result<usize> {
        let (sys, entry) = self.descriptor(ioctx, fd)?;
        if entry.dir_stream {
            return Err(Error::FileMode);
        }
        if entry.flags & ACCMODE_MASK == O_RDONLY && entry.flags & O_CREAT == 0 {
            return Err(Error::FileMode);
        }
        let (mount_index, fs_index, super_block) = self.descriptor_mount(entry.vnode)?;
        if self
            .mounts
            .at(mount_index)
            .ok_or(Error::Offline)?
            .flags
            & MNT_RDONLY
            != 0
        {
            return Err(Error::ReadOnly);
        }

        if buf.is_empty() {
            return Ok(0);
        }
        let pos = entry.pos.pos;
        if pos >= MAX_FILE_SIZE {
            return Err(Error::DeviceFull);
        }
        let count = buf.len().min((MAX_FILE_SIZE - pos) as usize);

        let fs = &self.filesystems[fs_index].fs;
        let fib = self
            .vnodes
            .at_mut(entry.vnode.index)
            .fib
            .as_mut()
            .ok_or(Error::BadFile)?;
        let done = fs.write(&mut self.storage, &super_block, fib, pos, &buf[..count])?;
        fib.size = fib.size.max(pos + done as u32);
        self.fds.entries[sys].pos.pos = pos + done as u32;
        Ok(done)
    }

    pub fn seek(
        &mut self,
        ioctx: &mut IoContext,
        fd: usize,
        offset: i64,
        whence: Whence,
    ) -> Result<u32> {
        let (sys, entry) = self.descriptor(ioctx, fd)?;
        if entry.dir_stream {
            return Err(Error::FileMode);
        }
        let size = self
            .vnodes
            .node(entry.vnode)?
            .fib
            .as_ref()
            .ok_or(Error::BadFile)?
            .size;

        let base = match whence {
            Whence::Set => 0,
            Whence::Cur => entry.pos.pos as i64,
            Whence::End => size as i64,
        };
        let new_pos = base + offset;
        if new_pos < 0 || new_pos > u32::MAX as i64 {
            return Err(Error::Invalid);
        }
        self.fds.entries[sys].pos.pos = new_pos as u32;
        Ok(new_pos as u32)
    }

    /// Extends with zero-filled blocks or shrinks by releasing the
    /// chain tail; a no-op on disk bytes when the length already
    /// matches.
    pub fn truncate(&mut self, ioctx: &mut IoContext, fd: usize, length: u32) -> Result<()> {
        let (_, entry) = self.descriptor(ioctx, fd)?;
        if entry.dir_stream {
            return Err(Error::FileMode);
        }
        if entry.flags & ACCMODE_MASK == O_RDONLY && entry.flags & O_CREAT == 0 {
            return Err(Error::FileMode);
        }
        let (mount_index, fs_index, super_block) = self.descriptor_mount(entry.vnode)?;
        if self
            .mounts
            .at(mount_index)
            .ok_or(Error::Offline)?
            .flags
            & MNT_RDONLY
            != 0
        {
            return Err(Error::ReadOnly);
        }

        let fs = &self.filesystems[fs_index].fs;
        let fib = self
            .vnodes
            .at_mut(entry.vnode.index)
            .fib
            .as_mut()
            .ok_or(Error::BadFile)?;
        fs.truncate(&mut self.storage, &super_block, fib, length)
    }

    /// A snapshot of the FIB behind an open descriptor.
    pub fn fstat(&self, ioctx: &IoContext, fd: usize) -> Result<Fib> {
        let (_, entry) = self.descriptor(ioctx, fd)?;
        self.vnodes
            .node(entry.vnode)?
            .fib
            .clone()
            .ok_or(Error::BadFile)
    }

    pub fn unlink(&mut self, device: DeviceLetter, ioctx: &IoContext, path: &str) -> Result<()> {
        let (mount_index, fs_index, super_block, mnt_flags) = {
            let mount = self.mounts.get(device)?;
            (
                MountTable::index_of(device)?,
                mount.fs_index,
                mount.super_block,
                mount.flags,
            )
        };
        if mnt_flags & MNT_RDONLY != 0 {
            return Err(Error::ReadOnly);
        }
        let (_, name) = self.resolve_parent(device, ioctx, path)?;
        if name.is_empty() {
            return Err(Error::FileMode);
        }
        let vnid =
            self.filesystems[fs_index]
                .fs
                .unlink(&mut self.storage, device, &super_block, name)?;

        // Drop the cached v-node; a handle still referenced stays
        // behind and its descriptors see the dead file.
        if let Some(index) = self.vnodes.find(mount_index, vnid) {
            if self.vnodes.at(index).use_count == 0 {
                self.vnodes.invalidate(index, &mut self.mounts);
            }
        }
        Ok(())
    }

    /// Renames within one drive; the target name must be free.
    pub fn rename(
        &mut self,
        device: DeviceLetter,
        ioctx: &IoContext,
        old_path: &str,
        new_path: &str,
    ) -> Result<()> {
        let (mount_index, fs_index, super_block, mnt_flags) = {
            let mount = self.mounts.get(device)?;
            (
                MountTable::index_of(device)?,
                mount.fs_index,
                mount.super_block,
                mount.flags,
            )
        };
        if mnt_flags & MNT_RDONLY != 0 {
            return Err(Error::ReadOnly);
        }
        let (_, old_name) = self.resolve_parent(device, ioctx, old_path)?;
        let (_, new_name) = self.resolve_parent(device, ioctx, new_path)?;
        if old_name.is_empty() || new_name.is_empty() {
            return Err(Error::FileMode);
        }
        let fib = self.filesystems[fs_index].fs.rename(
            &mut self.storage,
            device,
            &super_block,
            old_name,
            new_name,
        )?;

        if let Some(index) = self.vnodes.find(mount_index, fib.dirno as Vnid) {
            if let Some(cached) = self.vnodes.at_mut(index).fib.as_mut() {
                cached.sword_name = fib.sword_name;
            }
        }
        Ok(())
    }

    /// Sets the settable attribute bits (read-only, hidden, raw); the
    /// file type and directory bits are preserved.
    pub fn set_attr(
        &mut self,
        device: DeviceLetter,
        ioctx: &IoContext,
        path: &str,
        attr: SosAttr,
    ) -> Result<()> {
        let (mount_index, fs_index, super_block, mnt_flags) = {
            let mount = self.mounts.get(device)?;
            (
                MountTable::index_of(device)?,
                mount.fs_index,
                mount.super_block,
                mount.flags,
            )
        };
        if mnt_flags & MNT_RDONLY != 0 {
            return Err(Error::ReadOnly);
        }
        let (_, name) = self.resolve_parent(device, ioctx, path)?;
        if name.is_empty() {
            return Err(Error::FileMode);
        }
        let fib = self.filesystems[fs_index].fs.set_attr(
            &mut self.storage,
            device,
            &super_block,
            name,
            attr,
        )?;

        if let Some(index) = self.vnodes.find(mount_index, fib.dirno as Vnid) {
            if let Some(cached) = self.vnodes.at_mut(index).fib.as_mut() {
                cached.attr = fib.attr;
            }
        }
        Ok(())
    }

    pub fn get_attr(
        &mut self,
        device: DeviceLetter,
        ioctx: &IoContext,
        path: &str,
    ) -> Result<SosAttr> {
        let (fs_index, super_block) = {
            let mount = self.mounts.get(device)?;
            (mount.fs_index, mount.super_block)
        };
        let (_, name) = self.resolve_parent(device, ioctx, path)?;
        if name.is_empty() {
            return Err(Error::FileMode);
        }
        self.filesystems[fs_index]
            .fs
            .get_attr(&mut self.storage, device, &super_block, name)
    }

    /// POSIX-shaped permission change: dropping the write permission
    /// sets the read-only attribute bit, granting it clears it.
    pub fn chmod(
        &mut self,
        device: DeviceLetter,
        ioctx: &IoContext,
        path: &str,
        perm: u16,
    ) -> Result<()> {
        let current = self.get_attr(device, ioctx, path)?;
        let mut bits = current.0 & (SosAttr::HIDDEN.0 | SosAttr::RAW.0);
        if perm & PERM_WR == 0 {
            bits |= SosAttr::RDONLY.0;
        }
        self.set_attr(device, ioctx, path, SosAttr(bits))
    }

    /*
     * Directory streams
     */

    /// Opens an iterator over the drive's directory.
    pub fn opendir(&mut self, device: DeviceLetter, ioctx: &mut IoContext) -> Result<usize> {
        let mount_index = MountTable::index_of(device)?;
        self.mounts.at(mount_index).ok_or(Error::Offline)?;
        let root = ioctx.root[mount_index].ok_or(Error::Offline)?;

        let slot = ioctx
            .fds
            .iter()
            .position(Option::is_none)
            .ok_or(Error::DeviceFull)?;
        let sys = self.fds.alloc().ok_or(Error::DeviceFull)?;
        {
            let fd = &mut self.fds.entries[sys];
            fd.use_count = 1;
            fd.vnode = root;
            fd.flags = O_RDONLY;
            fd.dir_stream = true;
            fd.pos = DiskPos::default();
        }
        self.vnodes.node_mut(root)?.use_count += 1;
        ioctx.fds[slot] = Some(sys);
        Ok(slot)
    }

    /// The next live directory entry; free slots are skipped and the
    /// end-of-directory sentinel terminates the iteration with
    /// `NOENT`.
    pub fn readdir(&mut self, ioctx: &mut IoContext, fd: usize) -> Result<Fib> {
        let (sys, entry) = self.descriptor(ioctx, fd)?;
        if !entry.dir_stream {
            return Err(Error::FileMode);
        }
        let (mount_index, fs_index, super_block) = self.descriptor_mount(entry.vnode)?;
        let device = self.mounts.at(mount_index).ok_or(Error::Offline)?.device;

        let fib = self.filesystems[fs_index].fs.readdir(
            &mut self.storage,
            device,
            &super_block,
            entry.pos.dirno,
        )?;
        self.fds.entries[sys].pos.dirno = fib.dirno + 1;
        Ok(fib)
    }

    /// Repositions the directory iterator at a `#DIRNO`.
    pub fn seekdir(&mut self, ioctx: &IoContext, fd: usize, dirno: u8) -> Result<()> {
        let (sys, entry) = self.descriptor(ioctx, fd)?;
        if !entry.dir_stream {
            return Err(Error::FileMode);
        }
        self.fds.entries[sys].pos.dirno = dirno;
        Ok(())
    }

    /// The `#DIRNO` the next [`Self::readdir`] continues from.
    pub fn telldir(&self, ioctx: &IoContext, fd: usize) -> Result<u8> {
        let (_, entry) = self.descriptor(ioctx, fd)?;
        if !entry.dir_stream {
            return Err(Error::FileMode);
        }
        Ok(entry.pos.dirno)
    }

    pub fn closedir(&mut self, ioctx: &mut IoContext, fd: usize) -> Result<()> {
        let (_, entry) = self.descriptor(ioctx, fd)?;
        if !entry.dir_stream {
            return Err(Error::FileMode);
        }
        self.close(ioctx, fd)
    }
}
