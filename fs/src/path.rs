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

//! Path resolution. The native format is single level, but the
//! resolver tolerates `/`-separated input: absolute paths start at
//! the drive's root v-node, relative paths at the current working
//! directory, and every element in between is walked through the
//! file system's lookup.

use sos_storage::DeviceLetter;

use crate::{mount::MountTable, vfs::FsEngine, Error, IoContext, Result, VnodeRef};

/// Splits an optional `X:` drive prefix off the path, tolerating
/// repeated colons.
pub(crate) fn split_drive(path: &str) -> (Option<u8>, &str) {
    let bytes = path.as_bytes();
    if bytes.len() >= 2 && bytes[1] == b':' && bytes[0].is_ascii_alphabetic() {
        let mut rest = 2;
        while rest < bytes.len() && bytes[rest] == b':' {
            rest += 1;
        }
        (Some(bytes[0].to_ascii_uppercase()), &path[rest..])
    } else {
        (None, path)
    }
}

impl FsEngine {
    /// Resolves everything up to the last path element, returning the
    /// directory v-node and the remaining name. An empty name means
    /// the path named the directory itself.
    pub(crate) fn resolve_parent<'path>(
        &mut self,
        device: DeviceLetter,
        ioctx: &IoContext,
        path: &'path str,
    ) -> Result<(VnodeRef, &'path str)> {
        let (prefix, rest) = split_drive(path);
        if let Some(letter) = prefix {
            if letter != device.as_byte() {
                return Err(Error::Invalid);
            }
        }

        let mount_index = MountTable::index_of(device)?;
        let start = if rest.starts_with('/') {
            ioctx.root[mount_index]
        } else {
            ioctx.cwd[mount_index]
        }
        .ok_or(Error::Offline)?;

        let mut elements = rest.split('/').filter(|element| !element.is_empty());
        let name = elements.next_back().unwrap_or("");

        let mut current = start;
        for element in elements {
            current = self.walk_element(device, current, element)?;
        }
        Ok((current, name))
    }

    /// Resolves a whole path to a v-node.
    pub(crate) fn path_to_vnode(
        &mut self,
        device: DeviceLetter,
        ioctx: &IoContext,
        path: &str,
    ) -> Result<VnodeRef> {
        let (parent, name) = self.resolve_parent(device, ioctx, path)?;
        if name.is_empty() {
            return Ok(parent);
        }
        self.walk_element(device, parent, name)
    }

    /// Resolves one path element inside a directory v-node.
    pub(crate) fn walk_element(
        &mut self,
        device: DeviceLetter,
        dir: VnodeRef,
        element: &str,
    ) -> Result<VnodeRef> {
        let node = self.vnodes.node(dir)?;
        let mount_index = node.mount.ok_or(Error::BadFile)?;
        let dir_fib = node.fib.clone().ok_or(Error::BadFile)?;
        let mount = self.mounts.at(mount_index).ok_or(Error::Offline)?;
        let super_block = mount.super_block;
        let fs_index = mount.fs_index;

        let vnid = self.filesystems[fs_index].fs.lookup_name(
            &mut self.storage,
            device,
            &super_block,
            &dir_fib,
            element,
        )?;
        self.get_vnode(device, vnid)
    }

    /// The v-node of `(device, vnid)`: found on the mount's list, or
    /// materialized through the file system's lookup and linked in.
    pub(crate) fn get_vnode(
        &mut self,
        device: DeviceLetter,
        vnid: crate::Vnid,
    ) -> Result<VnodeRef> {
        let mount_index = MountTable::index_of(device)?;
        let mount = self.mounts.at(mount_index).ok_or(Error::Offline)?;
        if let Some(&index) = mount
            .vnodes
            .iter()
            .find(|&&index| self.vnodes.at(index).id == vnid)
        {
            return Ok(self.vnodes.make_ref(index));
        }
        let super_block = mount.super_block;
        let fs_index = mount.fs_index;

        let index = self.vnodes.alloc(&mut self.mounts)?;
        match self.filesystems[fs_index].fs.lookup(
            &mut self.storage,
            device,
            &super_block,
            vnid,
        ) {
            Ok(fib) => {
                let node = self.vnodes.at_mut(index);
                node.id = vnid;
                node.mount = Some(mount_index);
                node.fib = Some(fib);
                node.busy = false;
                node.use_count = 0;
                self.mounts
                    .at_mut(mount_index)
                    .expect("mounted above")
                    .vnodes
                    .push(index);
                Ok(self.vnodes.make_ref(index))
            }
            Err(error) => {
                self.vnodes.invalidate(index, &mut self.mounts);
                Err(error)
            }
        }
    }
}
