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

//! MZT tape images: a sequence of files, each a 128-byte header
//! followed by the file body. Linux "mzt" dumps carry an 8-byte
//! `mz20` prefix before the first header.

use std::{
    fs::{File, OpenOptions},
    io::ErrorKind,
    os::unix::fs::FileExt,
    path::Path,
};

use log::{debug, error};
use zerocopy::{little_endian::U16, FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::{
    name,
    types::{DeviceLetter, DiskPos, Fib, ImageInfo, SosAttr, RECORD_SIZE},
    Error, Result,
};

const IMAGE_EXTS: [&str; 3] = ["mzt", "m12", "mzf"];

const LINUX_PREFIX: &[u8; 8] = b"mz20\x00\x02\x00\x00";

const HEADER_SIZE: usize = 0x80;
const NAME_LEN: usize = 17;
/// End mark of the header file name.
const NAME_TERM: u8 = 0x0d;

/// Japanese MZT format attributes.
const MZT_ATTR_BIN: u8 = 0x01;
const MZT_ATTR_BAS: u8 = 0x02;
const MZT_ATTR_BSD_QD: u8 = 0x03;
const MZT_ATTR_ASC: u8 = 0x04;
const MZT_ATTR_SBAS: u8 = 0x05;

/// The 128-byte header in front of every file on tape. All
/// multi-byte fields are little endian.
#[repr(C)]
#[derive(FromBytes, IntoBytes, Immutable, KnownLayout)]
struct MztHeader {
    attr: u8,
    /// Terminated with the end mark `0x0D`, or space filled by some
    /// producers (e.g. Hu-Basic).
    name: [u8; NAME_LEN],
    size: U16,
    load_addr: U16,
    exec_addr: U16,
    reserved: [u8; 104],
}

/// Driver binding MZT images to tape drives.
pub struct MztDriver;

impl MztDriver {
    pub const NAME: &'static str = "mzt";

    pub fn probe(&self, device: DeviceLetter, path: &Path) -> bool {
        device.is_tape()
            && path.extension().is_some_and(|ext| {
                IMAGE_EXTS
                    .iter()
                    .any(|candidate| ext.eq_ignore_ascii_case(candidate))
            })
    }

    pub fn mount(&self, device: DeviceLetter, path: &Path) -> Result<MztImage> {
        let (file, read_only) = match OpenOptions::new().read(true).write(true).open(path) {
            Ok(file) => (file, false),
            Err(error) if error.kind() == ErrorKind::PermissionDenied => (
                OpenOptions::new()
                    .read(true)
                    .open(path)
                    .map_err(|_| Error::Io)?,
                true,
            ),
            Err(_) => return Err(Error::Io),
        };
        let len = file.metadata().map_err(|_| Error::Io)?.len();

        // Detect the Linux dump prefix.
        let mut base = 0u64;
        if len >= LINUX_PREFIX.len() as u64 {
            let mut prefix = [0u8; 8];
            file.read_exact_at(&mut prefix, 0).map_err(|_| Error::Io)?;
            if &prefix == LINUX_PREFIX {
                base = LINUX_PREFIX.len() as u64;
            }
        }

        // Walk the tape once and remember where every file sits.
        let mut entries = Vec::new();
        let mut offset = base;
        while offset + HEADER_SIZE as u64 <= len {
            let mut raw = [0u8; HEADER_SIZE];
            file.read_exact_at(&mut raw, offset).map_err(|_| Error::Io)?;
            let header = MztHeader::ref_from_bytes(&raw).map_err(|_| Error::Invalid)?;
            let size = header.size.get();
            if offset + HEADER_SIZE as u64 + size as u64 > len {
                error!("mzt: truncated file body at {offset:#x}");
                return Err(Error::Invalid);
            }
            entries.push(MztEntry {
                header_offset: offset,
                size,
            });
            offset += (HEADER_SIZE + size as usize) as u64;
        }
        if offset != len {
            error!("mzt: trailing garbage after {offset:#x}");
            return Err(Error::Invalid);
        }

        debug!(
            "mzt: mounted {} on {device} ({} files{})",
            path.display(),
            entries.len(),
            if read_only { ", read-only" } else { "" }
        );

        Ok(MztImage {
            file,
            read_only,
            end: len,
            entries,
        })
    }
}

struct MztEntry {
    header_offset: u64,
    size: u16,
}

impl MztEntry {
    fn body_offset(&self) -> u64 {
        self.header_offset + HEADER_SIZE as u64
    }

    fn body_end(&self) -> u64 {
        self.body_offset() + self.size as u64
    }
}

/// One mounted MZT image.
pub struct MztImage {
    file: File,
    read_only: bool,
    /// Image length, advanced when a file is appended.
    end: u64,
    entries: Vec<MztEntry>,
}

impl MztImage {
    pub fn info(&self) -> ImageInfo {
        ImageInfo {
            records: (self.end / RECORD_SIZE as u64) as u32,
            read_only: self.read_only,
        }
    }

    /// Reads the header of the `dirno`-th file on tape and positions
    /// the drive at the start of its body.
    pub fn fib_read(&self, device: DeviceLetter, dirno: u8, pos: &mut DiskPos) -> Result<Fib> {
        let entry = self
            .entries
            .get(dirno as usize)
            .ok_or(Error::NotFound)?;
        let mut raw = [0u8; HEADER_SIZE];
        self.file
            .read_exact_at(&mut raw, entry.header_offset)
            .map_err(|_| Error::Io)?;
        let header = MztHeader::ref_from_bytes(&raw).map_err(|_| Error::Invalid)?;

        let attr = attr_from_mzt(header.attr)?;
        let name_len = header
            .name
            .iter()
            .position(|&c| c == NAME_TERM)
            .unwrap_or(NAME_LEN);
        let name = header.name[..name_len]
            .iter()
            .rposition(|&c| c != b' ' && c != 0)
            .map_or(&header.name[..0], |last| &header.name[..last + 1]);

        let mut fib = Fib::new(device);
        fib.dirno = dirno;
        fib.attr = attr;
        fib.size = header.size.get() as u32;
        fib.load_addr = header.load_addr.get();
        fib.exec_addr = header.exec_addr.get();
        fib.sword_name = name::host_bytes_to_sword(name);

        pos.dirno = dirno;
        pos.retpoi = 0;
        pos.pos = entry.body_offset() as u32;

        Ok(fib)
    }

    /// Appends a new file header at the end of the tape and positions
    /// the drive at the start of the (still empty) body. The body is
    /// streamed in through [`Self::seq_write`] up to the size the
    /// header declares.
    pub fn fib_write(&mut self, fib: &Fib, pos: &mut DiskPos) -> Result<()> {
        if self.read_only {
            return Err(Error::ReadOnly);
        }

        let mut header = MztHeader {
            attr: attr_to_mzt(fib.attr)?,
            name: [0; NAME_LEN],
            size: U16::new(fib.size.min(u16::MAX as u32) as u16),
            load_addr: U16::new(fib.load_addr),
            exec_addr: U16::new(fib.exec_addr),
            reserved: [0; 104],
        };
        let host = name::sword_to_host(&fib.sword_name);
        let name_len = host.len().min(NAME_LEN);
        header.name[..name_len].copy_from_slice(&host.as_bytes()[..name_len]);
        if name_len < NAME_LEN {
            header.name[name_len] = NAME_TERM;
        }

        let entry = MztEntry {
            header_offset: self.end,
            size: header.size.get(),
        };
        self.file
            .write_all_at(header.as_bytes(), entry.header_offset)
            .map_err(|_| Error::Io)?;
        self.end = entry.body_end();

        pos.dirno = self.entries.len() as u8;
        pos.retpoi = 0;
        pos.pos = entry.body_offset() as u32;
        self.entries.push(entry);

        Ok(())
    }

    /// Streams bytes of the file the drive is positioned on. Returns
    /// the count actually read, zero at the end of the body.
    pub fn seq_read(&self, dest: &mut [u8], pos: &mut DiskPos) -> Result<usize> {
        let entry = self
            .entries
            .get(pos.dirno as usize)
            .ok_or(Error::NotFound)?;
        let cursor = (pos.pos as u64).clamp(entry.body_offset(), entry.body_end());
        let avail = (entry.body_end() - cursor) as usize;
        let count = dest.len().min(avail);
        self.file
            .read_exact_at(&mut dest[..count], cursor)
            .map_err(|_| Error::Io)?;
        pos.pos = (cursor + count as u64) as u32;
        Ok(count)
    }

    /// Streams bytes into the file the drive is positioned on,
    /// bounded by the size its header declares.
    pub fn seq_write(&mut self, src: &[u8], pos: &mut DiskPos) -> Result<usize> {
        if self.read_only {
            return Err(Error::ReadOnly);
        }
        let entry = self
            .entries
            .get(pos.dirno as usize)
            .ok_or(Error::NotFound)?;
        let cursor = (pos.pos as u64).clamp(entry.body_offset(), entry.body_end());
        let avail = (entry.body_end() - cursor) as usize;
        let count = src.len().min(avail);
        self.file
            .write_all_at(&src[..count], cursor)
            .map_err(|_| Error::Io)?;
        pos.pos = (cursor + count as u64) as u32;
        Ok(count)
    }
}

/// MZT attribute to monitor attribute mapping.
fn attr_from_mzt(attr: u8) -> Result<SosAttr> {
    match attr {
        MZT_ATTR_BIN => Ok(SosAttr::BIN),
        MZT_ATTR_BAS | MZT_ATTR_BSD_QD | MZT_ATTR_SBAS => Ok(SosAttr::BAS),
        MZT_ATTR_ASC => Ok(SosAttr::ASC),
        _ => {
            error!("mzt: unknown attribute {attr:#04x}");
            Err(Error::Invalid)
        }
    }
}

fn attr_to_mzt(attr: SosAttr) -> Result<u8> {
    if attr.is_binary() {
        Ok(MZT_ATTR_BIN)
    } else if attr.is_basic() {
        Ok(MZT_ATTR_BAS)
    } else if attr.is_ascii() {
        Ok(MZT_ATTR_ASC)
    } else {
        Err(Error::Invalid)
    }
}
