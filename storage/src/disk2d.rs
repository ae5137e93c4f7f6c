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

//! 2D byte stream disk images: the raw logical sector dump of a
//! double-sided, double-density floppy, one 256-byte record after
//! another with no container header.

use std::{
    fs::{File, OpenOptions},
    io::ErrorKind,
    os::unix::fs::FileExt,
    path::Path,
};

use log::debug;

use crate::{
    types::{DeviceLetter, ImageInfo, RECORD_SIZE},
    Error, Result,
};

const IMAGE_EXT: &str = "2d";

/// Driver binding 2D images to standard disk drives.
pub struct Disk2dDriver;

impl Disk2dDriver {
    pub const NAME: &'static str = "2d";

    /// A 2D image mounts on a standard disk drive and is selected by
    /// its file extension, compared case-insensitively.
    pub fn probe(&self, device: DeviceLetter, path: &Path) -> bool {
        device.is_std_disk()
            && path
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case(IMAGE_EXT))
    }

    pub fn mount(&self, device: DeviceLetter, path: &Path) -> Result<Disk2dImage> {
        let (file, read_only) = match OpenOptions::new().read(true).write(true).open(path) {
            Ok(file) => (file, false),
            // Fall back to a read-only mount for write protected
            // image files.
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
        if len == 0 || len % RECORD_SIZE as u64 != 0 {
            return Err(Error::Invalid);
        }

        debug!(
            "2d: mounted {} on {device} ({} records{})",
            path.display(),
            len / RECORD_SIZE as u64,
            if read_only { ", read-only" } else { "" }
        );

        Ok(Disk2dImage {
            file,
            records: (len / RECORD_SIZE as u64) as u32,
            read_only,
        })
    }
}

/// One mounted 2D image.
pub struct Disk2dImage {
    file: File,
    records: u32,
    read_only: bool,
}

impl Disk2dImage {
    pub fn info(&self) -> ImageInfo {
        ImageInfo {
            records: self.records,
            read_only: self.read_only,
        }
    }

    fn check_range(&self, record: u16, count: u16) -> Result<()> {
        if record as u32 + count as u32 > self.records {
            return Err(Error::BadRecord);
        }
        Ok(())
    }

    pub fn record_read(&self, buf: &mut [u8], record: u16, count: u16) -> Result<u16> {
        self.check_range(record, count)?;
        let len = count as usize * RECORD_SIZE;
        self.file
            .read_exact_at(&mut buf[..len], record as u64 * RECORD_SIZE as u64)
            .map_err(|_| Error::Io)?;
        Ok(count)
    }

    pub fn record_write(&mut self, buf: &[u8], record: u16, count: u16) -> Result<u16> {
        if self.read_only {
            return Err(Error::ReadOnly);
        }
        self.check_range(record, count)?;
        let len = count as usize * RECORD_SIZE;
        self.file
            .write_all_at(&buf[..len], record as u64 * RECORD_SIZE as u64)
            .map_err(|_| Error::Io)?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn scratch_image(records: u32) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(".2d")
            .tempfile()
            .unwrap();
        file.write_all(&vec![0u8; records as usize * RECORD_SIZE])
            .unwrap();
        file
    }

    #[test]
    fn probe_matches_disk_letter_and_extension() {
        let driver = Disk2dDriver;
        assert!(driver.probe(DeviceLetter::A, Path::new("test.2d")));
        assert!(driver.probe(DeviceLetter::B, Path::new("TEST.2D")));
        assert!(!driver.probe(DeviceLetter::T, Path::new("test.2d")));
        assert!(!driver.probe(DeviceLetter::A, Path::new("test.mzt")));
        assert!(!driver.probe(DeviceLetter::A, Path::new("test")));
    }

    #[test]
    fn record_round_trip() {
        let scratch = scratch_image(0x50);
        let mut image = Disk2dDriver.mount(DeviceLetter::A, scratch.path()).unwrap();
        assert_eq!(image.info().records, 0x50);

        let mut rec = [0u8; RECORD_SIZE];
        rec[0] = 0xa5;
        rec[RECORD_SIZE - 1] = 0x5a;
        assert_eq!(image.record_write(&rec, 0x10, 1).unwrap(), 1);

        let mut back = [0u8; RECORD_SIZE];
        assert_eq!(image.record_read(&mut back, 0x10, 1).unwrap(), 1);
        assert_eq!(rec, back);
    }

    #[test]
    fn out_of_range_record_is_rejected() {
        let scratch = scratch_image(0x20);
        let mut image = Disk2dDriver.mount(DeviceLetter::A, scratch.path()).unwrap();
        let mut buf = [0u8; RECORD_SIZE];
        assert_eq!(image.record_read(&mut buf, 0x20, 1), Err(Error::BadRecord));
        assert_eq!(image.record_write(&buf, 0x1f, 2), Err(Error::BadRecord));
        assert_eq!(image.record_read(&mut buf, 0x1f, 1).unwrap(), 1);
    }

    #[test]
    fn truncated_image_is_rejected() {
        let mut file = tempfile::Builder::new()
            .suffix(".2d")
            .tempfile()
            .unwrap();
        file.write_all(&[0u8; 100]).unwrap();
        assert!(matches!(
            Disk2dDriver.mount(DeviceLetter::A, file.path()),
            Err(Error::Invalid)
        ));
    }
}
