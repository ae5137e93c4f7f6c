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

//! Host file exchange. Imports accept the legacy single-fork
//! side-car layout (an 18-byte ASCII header in front of the body);
//! the engine itself only ever writes the native on-disk layout, so
//! exports hand back the header packet and the bare body.

use sos_storage::{name, DeviceLetter, HeaderPacket, SosAttr};

use crate::{Error, FsEngine, IoContext, Result, O_CREAT, O_RDONLY, O_WRONLY};

/// Imports host bytes as a file on a mounted drive.
///
/// A leading side-car header supplies the attribute and the load and
/// execution addresses; bytes without one import as an ASCII file.
/// Host newlines of ASCII files are translated to the monitor's
/// carriage returns.
pub fn import_host_file(
    engine: &mut FsEngine,
    ioctx: &mut IoContext,
    device: DeviceLetter,
    file_name: &str,
    bytes: &[u8],
) -> Result<()> {
    let (pkt, body) = match name::parse_sos_header(bytes) {
        Some(pkt) => (pkt, &bytes[name::SOS_HEADER_LEN..]),
        None => (
            HeaderPacket {
                attr: SosAttr::ASC,
                load_addr: 0,
                exec_addr: 0,
            },
            bytes,
        ),
    };
    let mut body = body.to_vec();
    if pkt.attr.is_ascii() {
        name::host_to_sos_newlines(&mut body);
    }

    let fd = engine.open(device, ioctx, file_name, O_WRONLY | O_CREAT, Some(&pkt))?;
    let written = write_all(engine, ioctx, fd, &body);
    let closed = engine.close(ioctx, fd);
    written.and(closed)
}

fn write_all(
    engine: &mut FsEngine,
    ioctx: &mut IoContext,
    fd: usize,
    mut body: &[u8],
) -> Result<()> {
    while !body.is_empty() {
        let done = engine.write(ioctx, fd, body)?;
        if done == 0 {
            return Err(Error::DeviceFull);
        }
        body = &body[done..];
    }
    Ok(())
}

/// Exports a file from a mounted drive as its header packet and
/// body. Monitor carriage returns of ASCII files are translated back
/// to host newlines.
pub fn export_file(
    engine: &mut FsEngine,
    ioctx: &mut IoContext,
    device: DeviceLetter,
    path: &str,
) -> Result<(HeaderPacket, Vec<u8>)> {
    let fd = engine.open(device, ioctx, path, O_RDONLY, None)?;

    let read = (|| {
        let fib = engine.fstat(ioctx, fd)?;
        let mut body = vec![0u8; fib.size as usize];
        let mut done = 0;
        while done < body.len() {
            let count = engine.read(ioctx, fd, &mut body[done..])?;
            if count == 0 {
                break;
            }
            done += count;
        }
        body.truncate(done);

        let pkt = HeaderPacket {
            attr: fib.attr,
            load_addr: fib.load_addr,
            exec_addr: fib.exec_addr,
        };
        if pkt.attr.is_ascii() {
            name::sos_to_host_newlines(&mut body);
        }
        Ok((pkt, body))
    })();

    let closed = engine.close(ioctx, fd);
    match read {
        Ok(result) => closed.map(|_| result),
        Err(error) => Err(error),
    }
}
