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

//! Mount points: one slot per drive letter, each owning the list of
//! v-nodes materialized from it.

use sos_storage::{DeviceLetter, STORAGE_NR};

use crate::{Error, MountFlags, Result, SuperBlock, VnodeRef};

pub(crate) struct MountPoint {
    pub device: DeviceLetter,
    /// Index into the file-system registry.
    pub fs_index: usize,
    pub super_block: SuperBlock,
    pub flags: MountFlags,
    pub root: VnodeRef,
    /// V-node table indices owned by this mount.
    pub vnodes: Vec<usize>,
}

pub(crate) struct MountTable {
    slots: [Option<MountPoint>; STORAGE_NR],
}

impl MountTable {
    pub fn new() -> Self {
        Self {
            slots: std::array::from_fn(|_| None),
        }
    }

    pub fn index_of(device: DeviceLetter) -> Result<usize> {
        device.index().ok_or(Error::BadFile)
    }

    pub fn at(&self, index: usize) -> Option<&MountPoint> {
        self.slots[index].as_ref()
    }

    pub fn at_mut(&mut self, index: usize) -> Option<&mut MountPoint> {
        self.slots[index].as_mut()
    }

    pub fn get(&self, device: DeviceLetter) -> Result<&MountPoint> {
        self.slots[Self::index_of(device)?]
            .as_ref()
            .ok_or(Error::Offline)
    }

    pub fn get_mut(&mut self, device: DeviceLetter) -> Result<&mut MountPoint> {
        self.slots[Self::index_of(device)?]
            .as_mut()
            .ok_or(Error::Offline)
    }

    pub fn insert(&mut self, index: usize, mount: MountPoint) -> Result<()> {
        if self.slots[index].is_some() {
            return Err(Error::Busy);
        }
        self.slots[index] = Some(mount);
        Ok(())
    }

    pub fn remove(&mut self, index: usize) -> Option<MountPoint> {
        self.slots[index].take()
    }
}
