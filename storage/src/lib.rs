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

//! Storage image management: a registry of image format drivers and
//! one slot per drive letter, exposing uniform record, sequential and
//! file-information I/O to the file-system layer above.

pub use sos_err::{code_of, Error, Result};
pub use types::*;

pub mod d88;
pub mod disk2d;
pub mod mzt;
pub mod name;

mod types;

use std::path::Path;

use log::debug;

use d88::{D88Driver, D88Image};
use disk2d::{Disk2dDriver, Disk2dImage};
use mzt::{MztDriver, MztImage};

/// An image format driver. Adding a format means adding a variant;
/// a driver that misses an operation is a compile error, not a hole
/// in a function table.
pub enum ImageDriver {
    Disk2d(Disk2dDriver),
    D88(D88Driver),
    Mzt(MztDriver),
}

impl ImageDriver {
    pub fn name(&self) -> &'static str {
        match self {
            ImageDriver::Disk2d(_) => Disk2dDriver::NAME,
            ImageDriver::D88(_) => D88Driver::NAME,
            ImageDriver::Mzt(_) => MztDriver::NAME,
        }
    }

    /// Whether this driver takes the mount request: the drive letter
    /// kind and the image file extension both have to match.
    fn probe(&self, device: DeviceLetter, path: &Path) -> bool {
        match self {
            ImageDriver::Disk2d(driver) => driver.probe(device, path),
            ImageDriver::D88(driver) => driver.probe(device, path),
            ImageDriver::Mzt(driver) => driver.probe(device, path),
        }
    }

    fn mount(&self, device: DeviceLetter, path: &Path) -> Result<DiskImage> {
        match self {
            ImageDriver::Disk2d(driver) => driver.mount(device, path).map(DiskImage::Disk2d),
            ImageDriver::D88(driver) => driver.mount(device, path).map(DiskImage::D88),
            ImageDriver::Mzt(driver) => driver.mount(device, path).map(DiskImage::Mzt),
        }
    }
}

/// A mounted image, owned by its drive slot.
pub enum DiskImage {
    Disk2d(Disk2dImage),
    D88(D88Image),
    Mzt(MztImage),
}

impl DiskImage {
    fn info(&self) -> ImageInfo {
        match self {
            DiskImage::Disk2d(image) => image.info(),
            DiskImage::D88(image) => image.info(),
            DiskImage::Mzt(image) => image.info(),
        }
    }
}

struct DriverEntry {
    driver: ImageDriver,
    /// Mounted images using this driver; forbids unregistering.
    use_count: u32,
}

struct DriveSlot {
    driver_index: usize,
    image: DiskImage,
    pos: DiskPos,
}

/// The storage manager: driver registry plus the drive slot table.
pub struct StorageManager {
    drivers: Vec<DriverEntry>,
    slots: [Option<DriveSlot>; STORAGE_NR],
}

impl Default for StorageManager {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageManager {
    /// An empty manager; drivers are registered explicitly.
    pub fn new() -> Self {
        Self {
            drivers: Vec::new(),
            slots: std::array::from_fn(|_| None),
        }
    }

    /// A manager with the built-in 2D, D88 and MZT drivers
    /// registered.
    pub fn with_default_drivers() -> Self {
        let mut manager = Self::new();
        manager
            .register_driver(ImageDriver::Disk2d(Disk2dDriver))
            .expect("fresh registry");
        manager
            .register_driver(ImageDriver::D88(D88Driver))
            .expect("fresh registry");
        manager
            .register_driver(ImageDriver::Mzt(MztDriver))
            .expect("fresh registry");
        manager
    }

    pub fn register_driver(&mut self, driver: ImageDriver) -> Result<()> {
        if self.drivers.iter().any(|entry| entry.driver.name() == driver.name()) {
            return Err(Error::Busy);
        }
        self.drivers.push(DriverEntry {
            driver,
            use_count: 0,
        });
        Ok(())
    }

    pub fn unregister_driver(&mut self, name: &str) -> Result<()> {
        let index = self
            .drivers
            .iter()
            .position(|entry| entry.driver.name() == name)
            .ok_or(Error::NotFound)?;
        if self.drivers[index].use_count > 0 {
            return Err(Error::Busy);
        }
        self.drivers.remove(index);
        Ok(())
    }

    fn slot_index(device: DeviceLetter) -> Result<usize> {
        device.index().ok_or(Error::BadFile)
    }

    fn slot(&self, device: DeviceLetter) -> Result<&DriveSlot> {
        self.slots[Self::slot_index(device)?]
            .as_ref()
            .ok_or(Error::Offline)
    }

    fn slot_mut(&mut self, device: DeviceLetter) -> Result<&mut DriveSlot> {
        self.slots[Self::slot_index(device)?]
            .as_mut()
            .ok_or(Error::Offline)
    }

    /// Binds an image file to a drive. The registry is consulted in
    /// registration order; the first driver whose letter kind and
    /// file extension match takes the mount.
    pub fn mount_image(&mut self, device: DeviceLetter, path: &Path) -> Result<()> {
        let index = Self::slot_index(device)?;
        if self.slots[index].is_some() {
            return Err(Error::Busy);
        }

        let driver_index = self
            .drivers
            .iter()
            .position(|entry| entry.driver.probe(device, path))
            .ok_or(Error::Offline)?;
        let image = self.drivers[driver_index].driver.mount(device, path)?;
        self.drivers[driver_index].use_count += 1;
        self.slots[index] = Some(DriveSlot {
            driver_index,
            image,
            pos: DiskPos::default(),
        });
        Ok(())
    }

    pub fn unmount_image(&mut self, device: DeviceLetter) -> Result<()> {
        let index = Self::slot_index(device)?;
        let slot = self.slots[index].take().ok_or(Error::Offline)?;
        self.drivers[slot.driver_index].use_count -= 1;
        debug!("storage: unmounted {device}");
        Ok(())
    }

    pub fn is_mounted(&self, device: DeviceLetter) -> bool {
        matches!(Self::slot_index(device), Ok(index) if self.slots[index].is_some())
    }

    pub fn image_info(&self, device: DeviceLetter) -> Result<ImageInfo> {
        Ok(self.slot(device)?.image.info())
    }

    /// The drive position state (tape cursor).
    pub fn position(&self, device: DeviceLetter) -> Result<DiskPos> {
        Ok(self.slot(device)?.pos)
    }

    pub fn set_position(&mut self, device: DeviceLetter, pos: DiskPos) -> Result<()> {
        self.slot_mut(device)?.pos = pos;
        Ok(())
    }

    /// Reads `count` records starting at `record` into `buf`,
    /// returning the count actually read.
    pub fn record_read(
        &mut self,
        device: DeviceLetter,
        buf: &mut [u8],
        record: u16,
        count: u16,
    ) -> Result<u16> {
        debug_assert!(buf.len() >= count as usize * RECORD_SIZE);
        match &self.slot(device)?.image {
            DiskImage::Disk2d(image) => image.record_read(buf, record, count),
            DiskImage::D88(image) => image.record_read(buf, record, count),
            DiskImage::Mzt(_) => Err(Error::Reserved),
        }
    }

    /// Writes `count` records starting at `record` from `buf`,
    /// returning the count actually written.
    pub fn record_write(
        &mut self,
        device: DeviceLetter,
        buf: &[u8],
        record: u16,
        count: u16,
    ) -> Result<u16> {
        debug_assert!(buf.len() >= count as usize * RECORD_SIZE);
        match &mut self.slot_mut(device)?.image {
            DiskImage::Disk2d(image) => image.record_write(buf, record, count),
            DiskImage::D88(image) => image.record_write(buf, record, count),
            DiskImage::Mzt(_) => Err(Error::Reserved),
        }
    }

    /// Positioned streaming read, used by the tape devices.
    pub fn seq_read(&mut self, device: DeviceLetter, dest: &mut [u8]) -> Result<usize> {
        let slot = self.slot_mut(device)?;
        match &slot.image {
            DiskImage::Disk2d(_) | DiskImage::D88(_) => Err(Error::Reserved),
            DiskImage::Mzt(image) => image.seq_read(dest, &mut slot.pos),
        }
    }

    /// Positioned streaming write, used by the tape devices.
    pub fn seq_write(&mut self, device: DeviceLetter, src: &[u8]) -> Result<usize> {
        let slot = self.slot_mut(device)?;
        match &mut slot.image {
            DiskImage::Disk2d(_) | DiskImage::D88(_) => Err(Error::Reserved),
            DiskImage::Mzt(image) => image.seq_write(src, &mut slot.pos),
        }
    }

    /// Reads the file information block of the `dirno`-th file on a
    /// device whose driver provides a directory abstraction.
    pub fn fib_read(&mut self, device: DeviceLetter, dirno: u8) -> Result<Fib> {
        let slot = self.slot_mut(device)?;
        match &slot.image {
            DiskImage::Disk2d(_) | DiskImage::D88(_) => Err(Error::Reserved),
            DiskImage::Mzt(image) => image.fib_read(device, dirno, &mut slot.pos),
        }
    }

    /// Writes a file information block through the driver's directory
    /// abstraction.
    pub fn fib_write(&mut self, device: DeviceLetter, fib: &Fib) -> Result<()> {
        let slot = self.slot_mut(device)?;
        match &mut slot.image {
            DiskImage::Disk2d(_) | DiskImage::D88(_) => Err(Error::Reserved),
            DiskImage::Mzt(image) => image.fib_write(fib, &mut slot.pos),
        }
    }
}
