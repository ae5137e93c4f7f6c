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

//! File content I/O at cluster granularity: the chain walk of the
//! allocation table above, record reads and writes below. Both
//! directions return the count transferred before the first failure;
//! the error itself only surfaces when nothing was transferred.

use sos_storage::{
    cluster_to_record, DeviceLetter, Fib, StorageManager, CLUSTER_SIZE, RECORD_SIZE,
};

use crate::{Error, IoDir, Result, SuperBlock};

use super::fat;

fn read_record(
    storage: &mut StorageManager,
    device: DeviceLetter,
    record: u16,
) -> Result<[u8; RECORD_SIZE]> {
    let mut buf = [0u8; RECORD_SIZE];
    if storage.record_read(device, &mut buf, record, 1)? != 1 {
        return Err(Error::Io);
    }
    Ok(buf)
}

fn write_record(storage: &mut StorageManager, device: DeviceLetter, record: u16, buf: &[u8]) -> Result<()> {
    if storage.record_write(device, buf, record, 1)? != 1 {
        return Err(Error::Io);
    }
    Ok(())
}

/// Reads the span of one cluster starting at `offset` within it.
fn read_cluster(
    storage: &mut StorageManager,
    device: DeviceLetter,
    cluster: u8,
    offset: usize,
    buf: &mut [u8],
) -> Result<()> {
    debug_assert!(offset + buf.len() <= CLUSTER_SIZE);

    let mut done = 0;
    while done < buf.len() {
        let cursor = offset + done;
        let record = cluster_to_record(cluster) + (cursor / RECORD_SIZE) as u16;
        let in_record = cursor % RECORD_SIZE;
        let chunk = (RECORD_SIZE - in_record).min(buf.len() - done);

        let recbuf = read_record(storage, device, record)?;
        buf[done..done + chunk].copy_from_slice(&recbuf[in_record..in_record + chunk]);
        done += chunk;
    }
    Ok(())
}

/// Writes the span of one cluster starting at `offset` within it.
/// Records covered whole go straight through; partial head and tail
/// records are read-modified-written.
fn write_cluster(
    storage: &mut StorageManager,
    device: DeviceLetter,
    cluster: u8,
    offset: usize,
    buf: &[u8],
) -> Result<()> {
    debug_assert!(offset + buf.len() <= CLUSTER_SIZE);

    let mut done = 0;
    while done < buf.len() {
        let cursor = offset + done;
        let record = cluster_to_record(cluster) + (cursor / RECORD_SIZE) as u16;
        let in_record = cursor % RECORD_SIZE;
        let chunk = (RECORD_SIZE - in_record).min(buf.len() - done);

        if in_record == 0 && chunk == RECORD_SIZE {
            write_record(storage, device, record, &buf[done..done + chunk])?;
        } else {
            let mut recbuf = read_record(storage, device, record)?;
            recbuf[in_record..in_record + chunk].copy_from_slice(&buf[done..done + chunk]);
            write_record(storage, device, record, &recbuf)?;
        }
        done += chunk;
    }
    Ok(())
}

/// Reads file content at `pos`. The caller bounds the request by the
/// file size; a request past the allocated chain reads `NOENT`.
pub(crate) fn read_block(
    storage: &mut StorageManager,
    super_block: &SuperBlock,
    fib: &mut Fib,
    pos: u32,
    buf: &mut [u8],
) -> Result<usize> {
    let mut done = 0;
    while done < buf.len() {
        let cursor = pos + done as u32;
        let in_cluster = cursor as usize % CLUSTER_SIZE;
        let chunk = (CLUSTER_SIZE - in_cluster).min(buf.len() - done);

        let step = match fat::get_block(storage, super_block, fib, cursor, IoDir::Read) {
            Ok(cluster) => read_cluster(
                storage,
                fib.device,
                cluster,
                in_cluster,
                &mut buf[done..done + chunk],
            ),
            Err(error) => Err(error),
        };
        match step {
            Ok(()) => done += chunk,
            Err(_) if done > 0 => break,
            Err(error) => return Err(error),
        }
    }
    Ok(done)
}

/// Writes file content at `pos`, allocating clusters as it goes.
pub(crate) fn write_block(
    storage: &mut StorageManager,
    super_block: &SuperBlock,
    fib: &mut Fib,
    pos: u32,
    buf: &[u8],
) -> Result<usize> {
    let mut done = 0;
    while done < buf.len() {
        let cursor = pos + done as u32;
        let in_cluster = cursor as usize % CLUSTER_SIZE;
        let chunk = (CLUSTER_SIZE - in_cluster).min(buf.len() - done);

        let step = match fat::get_block(storage, super_block, fib, cursor, IoDir::Write) {
            Ok(cluster) => write_cluster(
                storage,
                fib.device,
                cluster,
                in_cluster,
                &buf[done..done + chunk],
            ),
            Err(error) => Err(error),
        };
        match step {
            Ok(()) => done += chunk,
            Err(_) if done > 0 => break,
            Err(error) => return Err(error),
        }
    }
    Ok(done)
}
