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

//! D88 disk container images: a 0x2B0-byte header with a write
//! protect flag and a table of track offsets, each track a run of
//! sector blocks carrying their own 16-byte headers. Records map onto
//! sectors through the track table, sixteen 256-byte sectors per
//! track side.

use std::{
    fs::{File, OpenOptions},
    io::ErrorKind,
    os::unix::fs::FileExt,
    path::Path,
};

use log::{debug, error};
use zerocopy::{
    little_endian::{U16, U32},
    FromBytes, Immutable, IntoBytes, KnownLayout,
};

use crate::{
    types::{DeviceLetter, ImageInfo, CLUSTER_RECORDS, RECORD_SIZE},
    Error, Result,
};

const IMAGE_EXT: &str = "d88";

const HEADER_SIZE: usize = 0x2b0;
/// Track offset table entries in the header.
const TRACK_NR: usize = 164;

/// The fixed container header. All multi-byte fields are little
/// endian.
#[repr(C)]
#[derive(FromBytes, IntoBytes, Immutable, KnownLayout)]
struct D88Header {
    /// Disk name, NUL terminated.
    name: [u8; 17],
    reserved: [u8; 9],
    /// Non-zero when the disk is write protected.
    write_protect: u8,
    /// 0x00 2D, 0x10 2DD, 0x20 2HD.
    media: u8,
    disk_size: U32,
    /// File offset of each track, zero for absent tracks.
    track_offsets: [U32; TRACK_NR],
}

/// The 16-byte header in front of every sector block.
#[repr(C)]
#[derive(FromBytes, IntoBytes, Immutable, KnownLayout)]
struct SectorHeader {
    cylinder: u8,
    head: u8,
    /// Sector number within the track, starting at 1.
    sector: u8,
    /// Size code, `128 << n` bytes.
    n: u8,
    sectors_in_track: U16,
    density: u8,
    deleted: u8,
    status: u8,
    reserved: [u8; 5],
    /// Data bytes following this header.
    data_size: U16,
}

/// Driver binding D88 containers to standard disk drives.
pub struct D88Driver;

impl D88Driver {
    pub const NAME: &'static str = "d88";

    pub fn probe(&self, device: DeviceLetter, path: &Path) -> bool {
        device.is_std_disk()
            && path
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case(IMAGE_EXT))
    }

    pub fn mount(&self, device: DeviceLetter, path: &Path) -> Result<D88Image> {
        let (file, file_read_only) = match OpenOptions::new().read(true).write(true).open(path) {
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
        if len < HEADER_SIZE as u64 {
            return Err(Error::Invalid);
        }

        let mut raw = [0u8; HEADER_SIZE];
        file.read_exact_at(&mut raw, 0).map_err(|_| Error::Io)?;
        let header = D88Header::ref_from_bytes(&raw).map_err(|_| Error::Invalid)?;
        if header.disk_size.get() as u64 > len {
            error!("d88: header claims {:#x} bytes of {len:#x}", header.disk_size.get());
            return Err(Error::Invalid);
        }

        // Index every sector once; record I/O then resolves through
        // the table.
        let mut sectors = vec![None; TRACK_NR * CLUSTER_RECORDS as usize];
        for (track, offset) in header.track_offsets.iter().enumerate() {
            let mut cursor = offset.get() as u64;
            if cursor == 0 {
                continue;
            }

            let mut remaining = None;
            loop {
                let mut raw = [0u8; size_of::<SectorHeader>()];
                if cursor + raw.len() as u64 > len {
                    error!("d88: truncated sector header in track {track}");
                    return Err(Error::Invalid);
                }
                file.read_exact_at(&mut raw, cursor).map_err(|_| Error::Io)?;
                let sector = SectorHeader::ref_from_bytes(&raw).map_err(|_| Error::Invalid)?;

                let count = *remaining.get_or_insert(sector.sectors_in_track.get());
                if count == 0 {
                    break;
                }
                let data_size = sector.data_size.get() as u64;
                let data = cursor + raw.len() as u64;
                if data + data_size > len {
                    error!("d88: truncated sector body in track {track}");
                    return Err(Error::Invalid);
                }

                // Only 256-byte sectors participate in record I/O;
                // anything else is skipped but tolerated.
                if data_size == RECORD_SIZE as u64
                    && (1..=CLUSTER_RECORDS as u64).contains(&(sector.sector as u64))
                {
                    let record = track * CLUSTER_RECORDS as usize + sector.sector as usize - 1;
                    sectors[record] = Some(data);
                }

                cursor = data + data_size;
                remaining = Some(count - 1);
                if remaining == Some(0) {
                    break;
                }
            }
        }

        let records = sectors
            .iter()
            .rposition(Option::is_some)
            .map_or(0, |last| last + 1) as u32;
        if records == 0 {
            return Err(Error::Invalid);
        }
        let read_only = file_read_only || header.write_protect != 0;

        debug!(
            "d88: mounted {} on {device} ({records} records{})",
            path.display(),
            if read_only { ", read-only" } else { "" }
        );

        Ok(D88Image {
            file,
            read_only,
            records,
            sectors,
        })
    }
}

/// One mounted D88 container.
pub struct D88Image {
    file: File,
    read_only: bool,
    records: u32,
    /// Data offset of each record, indexed by record number.
    sectors: Vec<Option<u64>>,
}

impl D88Image {
    pub fn info(&self) -> ImageInfo {
        ImageInfo {
            records: self.records,
            read_only: self.read_only,
        }
    }

    fn sector_offset(&self, record: u16) -> Result<u64> {
        self.sectors
            .get(record as usize)
            .copied()
            .flatten()
            .ok_or(Error::BadRecord)
    }

    pub fn record_read(&self, buf: &mut [u8], record: u16, count: u16) -> Result<u16> {
        for index in 0..count {
            let offset = self.sector_offset(record + index)?;
            let chunk = &mut buf[index as usize * RECORD_SIZE..(index as usize + 1) * RECORD_SIZE];
            self.file.read_exact_at(chunk, offset).map_err(|_| Error::Io)?;
        }
        Ok(count)
    }

    pub fn record_write(&mut self, buf: &[u8], record: u16, count: u16) -> Result<u16> {
        if self.read_only {
            return Err(Error::ReadOnly);
        }
        for index in 0..count {
            let offset = self.sector_offset(record + index)?;
            let chunk = &buf[index as usize * RECORD_SIZE..(index as usize + 1) * RECORD_SIZE];
            self.file.write_all_at(chunk, offset).map_err(|_| Error::Io)?;
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    /// A minimal container: `tracks` full track sides of sixteen
    /// 256-byte sectors.
    fn build_d88(tracks: usize, write_protect: u8) -> Vec<u8> {
        let mut header = D88Header {
            name: [0; 17],
            reserved: [0; 9],
            write_protect,
            media: 0x00,
            disk_size: U32::new(0),
            track_offsets: [U32::new(0); TRACK_NR],
        };
        header.name[..4].copy_from_slice(b"TEST");

        let track_size = (size_of::<SectorHeader>() + RECORD_SIZE) * CLUSTER_RECORDS as usize;
        for track in 0..tracks {
            header.track_offsets[track] =
                U32::new((HEADER_SIZE + track * track_size) as u32);
        }
        header.disk_size = U32::new((HEADER_SIZE + tracks * track_size) as u32);

        let mut image = header.as_bytes().to_vec();
        for track in 0..tracks {
            for sector in 1..=CLUSTER_RECORDS {
                let sector_header = SectorHeader {
                    cylinder: (track / 2) as u8,
                    head: (track % 2) as u8,
                    sector: sector as u8,
                    n: 1,
                    sectors_in_track: U16::new(CLUSTER_RECORDS),
                    density: 0,
                    deleted: 0,
                    status: 0,
                    reserved: [0; 5],
                    data_size: U16::new(RECORD_SIZE as u16),
                };
                image.extend_from_slice(sector_header.as_bytes());
                image.extend_from_slice(&[0u8; RECORD_SIZE]);
            }
        }
        image
    }

    fn scratch_d88(tracks: usize, write_protect: u8) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(".d88")
            .tempfile()
            .unwrap();
        file.write_all(&build_d88(tracks, write_protect)).unwrap();
        file
    }

    #[test]
    fn probe_matches_disk_letter_and_extension() {
        let driver = D88Driver;
        assert!(driver.probe(DeviceLetter::A, Path::new("disk.d88")));
        assert!(driver.probe(DeviceLetter::B, Path::new("DISK.D88")));
        assert!(!driver.probe(DeviceLetter::T, Path::new("disk.d88")));
        assert!(!driver.probe(DeviceLetter::A, Path::new("disk.2d")));
    }

    #[test]
    fn records_resolve_through_the_track_table() {
        let scratch = scratch_d88(4, 0);
        let mut image = D88Driver.mount(DeviceLetter::A, scratch.path()).unwrap();
        assert_eq!(image.info().records, 4 * CLUSTER_RECORDS as u32);
        assert!(!image.info().read_only);

        let mut rec = [0u8; RECORD_SIZE];
        rec[0] = 0x42;
        rec[255] = 0x24;
        // Record 0x11 is the second sector of the second track side.
        assert_eq!(image.record_write(&rec, 0x11, 1).unwrap(), 1);
        let mut back = [0u8; RECORD_SIZE];
        assert_eq!(image.record_read(&mut back, 0x11, 1).unwrap(), 1);
        assert_eq!(rec, back);

        assert_eq!(
            image.record_read(&mut back, 4 * CLUSTER_RECORDS, 1),
            Err(Error::BadRecord)
        );
    }

    #[test]
    fn write_protect_flag_makes_the_image_read_only() {
        let scratch = scratch_d88(2, 1);
        let mut image = D88Driver.mount(DeviceLetter::A, scratch.path()).unwrap();
        assert!(image.info().read_only);
        let rec = [0u8; RECORD_SIZE];
        assert_eq!(image.record_write(&rec, 0, 1), Err(Error::ReadOnly));
    }

    #[test]
    fn truncated_container_is_rejected() {
        let mut raw = build_d88(1, 0);
        raw.truncate(raw.len() - 1);
        let mut file = tempfile::Builder::new()
            .suffix(".d88")
            .tempfile()
            .unwrap();
        file.write_all(&raw).unwrap();
        assert!(matches!(
            D88Driver.mount(DeviceLetter::A, file.path()),
            Err(Error::Invalid)
        ));
    }
}
