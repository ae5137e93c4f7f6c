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

//! The v-node cache: one fixed-size table of per-file engine
//! handles, reference counted by descriptors and mount roots, with
//! lazy invalidation under free-list pressure.

use sos_storage::Fib;

use crate::{mount::MountTable, Error, Result, Vnid, VnodeRef, VNODE_TABLE_SIZE};

pub(crate) struct Vnode {
    pub id: Vnid,
    pub use_count: u32,
    /// Locked while the slot is being filled or torn down.
    pub busy: bool,
    /// Bumped on invalidation so stale handles are detected.
    pub generation: u32,
    /// Index of the owning mount; `None` marks a free slot.
    pub mount: Option<usize>,
    pub fib: Option<Fib>,
}

impl Vnode {
    fn clear(&mut self) {
        self.id = 0;
        self.use_count = 0;
        self.busy = false;
        self.mount = None;
        self.fib = None;
    }
}

pub(crate) struct VnodeTable {
    nodes: Vec<Vnode>,
}

impl VnodeTable {
    pub fn new() -> Self {
        Self {
            nodes: (0..VNODE_TABLE_SIZE)
                .map(|_| Vnode {
                    id: 0,
                    use_count: 0,
                    busy: false,
                    generation: 0,
                    mount: None,
                    fib: None,
                })
                .collect(),
        }
    }

    pub fn at(&self, index: usize) -> &Vnode {
        &self.nodes[index]
    }

    pub fn at_mut(&mut self, index: usize) -> &mut Vnode {
        &mut self.nodes[index]
    }

    pub fn make_ref(&self, index: usize) -> VnodeRef {
        VnodeRef {
            index,
            generation: self.nodes[index].generation,
        }
    }

    /// Dereferences a handle, rejecting stale generations.
    pub fn node(&self, vref: VnodeRef) -> Result<&Vnode> {
        let node = self.nodes.get(vref.index).ok_or(Error::BadFile)?;
        if node.generation != vref.generation || node.mount.is_none() {
            return Err(Error::BadFile);
        }
        Ok(node)
    }

    pub fn node_mut(&mut self, vref: VnodeRef) -> Result<&mut Vnode> {
        let node = self.nodes.get_mut(vref.index).ok_or(Error::BadFile)?;
        if node.generation != vref.generation || node.mount.is_none() {
            return Err(Error::BadFile);
        }
        Ok(node)
    }

    /// Index of the live v-node of `(mount, id)`, if cached.
    pub fn find(&self, mount: usize, id: Vnid) -> Option<usize> {
        self.nodes
            .iter()
            .position(|node| node.mount == Some(mount) && node.id == id)
    }

    /// Claims a free slot, reclaiming the first unreferenced cached
    /// entry when the table is full. The slot comes back locked.
    pub fn alloc(&mut self, mounts: &mut MountTable) -> Result<usize> {
        let index = match self.nodes.iter().position(|node| node.mount.is_none()) {
            Some(index) => index,
            None => {
                let victim = self
                    .nodes
                    .iter()
                    .position(|node| node.use_count == 0 && !node.busy)
                    .ok_or(Error::DeviceFull)?;
                self.invalidate(victim, mounts);
                victim
            }
        };
        self.nodes[index].busy = true;
        Ok(index)
    }

    /// Unlinks the v-node from its mount and clears the slot. Any
    /// handle still around goes stale.
    pub fn invalidate(&mut self, index: usize, mounts: &mut MountTable) {
        let node = &mut self.nodes[index];
        debug_assert_eq!(node.use_count, 0);
        if let Some(mount_index) = node.mount {
            if let Some(mount) = mounts.at_mut(mount_index) {
                mount.vnodes.retain(|&linked| linked != index);
            }
        }
        node.clear();
        node.generation += 1;
    }
}
