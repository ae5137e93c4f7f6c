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

//! File name conversion between the host and the 13+3 space padded
//! on-disk format, and the legacy single-fork side-car header.

use crate::types::{HeaderPacket, SosAttr, FNAME_EXTLEN, FNAME_LEN, FNAME_NAMELEN};

/// Length of the ASCII side-car header `_SOS aa dddd eeee\n`.
pub const SOS_HEADER_LEN: usize = 18;

/// Converts an on-disk file name to a host name: trailing spaces of
/// the name and extension parts are trimmed and a dot is inserted
/// when an extension remains.
pub fn sword_to_host(sword: &[u8; FNAME_LEN]) -> String {
    let name_len = sword[..FNAME_NAMELEN]
        .iter()
        .rposition(|&c| c != b' ')
        .map_or(0, |i| i + 1);
    let ext_len = sword[FNAME_NAMELEN..]
        .iter()
        .rposition(|&c| c != b' ')
        .map_or(0, |i| i + 1);

    let mut host = String::with_capacity(name_len + 1 + ext_len);
    host.extend(sword[..name_len].iter().map(|&c| c as char));
    if ext_len > 0 {
        host.push('.');
        host.extend(
            sword[FNAME_NAMELEN..FNAME_NAMELEN + ext_len]
                .iter()
                .map(|&c| c as char),
        );
    }
    host
}

/// Converts a host file name to the on-disk format: an optional
/// `X:` drive prefix is stripped, the name is split at the last dot,
/// both parts are left justified into 13 and 3 bytes, space padded,
/// and over-long parts are truncated. No dot is stored in band.
pub fn host_to_sword(host: &str) -> [u8; FNAME_LEN] {
    host_bytes_to_sword(host.as_bytes())
}

/// [`host_to_sword`] over raw bytes, for names recovered from tape
/// headers that are not guaranteed to be UTF-8.
pub fn host_bytes_to_sword(bytes: &[u8]) -> [u8; FNAME_LEN] {
    // Skip the drive prefix, tolerating repeated colons.
    let start = bytes
        .iter()
        .position(|&c| c == b':')
        .map_or(0, |i| i + bytes[i..].iter().take_while(|&&c| c == b':').count());
    let stem = &bytes[start..];

    let mut sword = [b' '; FNAME_LEN];
    match stem.iter().rposition(|&c| c == b'.') {
        Some(dot) => {
            let name_len = dot.min(FNAME_NAMELEN);
            sword[..name_len].copy_from_slice(&stem[..name_len]);
            let ext = &stem[dot + 1..];
            let ext_len = ext.len().min(FNAME_EXTLEN);
            sword[FNAME_NAMELEN..FNAME_NAMELEN + ext_len].copy_from_slice(&ext[..ext_len]);
        }
        None => {
            let name_len = stem.len().min(FNAME_NAMELEN);
            sword[..name_len].copy_from_slice(&stem[..name_len]);
        }
    }
    sword
}

/// Compares a host name against an on-disk name by converting the
/// host side and byte comparing all 16 bytes.
pub fn matches(host: &str, sword: &[u8; FNAME_LEN]) -> bool {
    host_to_sword(host) == *sword
}

/// Renders the header packet as the 18-byte ASCII side-car header.
pub fn format_sos_header(pkt: &HeaderPacket) -> [u8; SOS_HEADER_LEN] {
    let text = format!(
        "_SOS {:02x} {:04x} {:04x}\n",
        pkt.attr.0, pkt.load_addr, pkt.exec_addr
    );
    let mut header = [0u8; SOS_HEADER_LEN];
    header.copy_from_slice(text.as_bytes());
    header
}

/// Parses an 18-byte ASCII side-car header. Reads accept the side-car
/// layout; the writer only ever emits the native on-disk layout.
pub fn parse_sos_header(bytes: &[u8]) -> Option<HeaderPacket> {
    if bytes.len() < SOS_HEADER_LEN || &bytes[..5] != b"_SOS " || bytes[SOS_HEADER_LEN - 1] != b'\n'
    {
        return None;
    }
    let text = core::str::from_utf8(&bytes[5..SOS_HEADER_LEN - 1]).ok()?;
    let mut fields = text.split(' ');
    let attr = u8::from_str_radix(fields.next()?, 16).ok()?;
    let load_addr = u16::from_str_radix(fields.next()?, 16).ok()?;
    let exec_addr = u16::from_str_radix(fields.next()?, 16).ok()?;
    if fields.next().is_some() {
        return None;
    }
    Some(HeaderPacket {
        attr: SosAttr(attr),
        load_addr,
        exec_addr,
    })
}

/// Host to monitor newline translation for ASCII files.
pub fn host_to_sos_newlines(buf: &mut [u8]) {
    for byte in buf.iter_mut() {
        if *byte == b'\n' {
            *byte = b'\r';
        }
    }
}

/// Monitor to host newline translation for ASCII files.
pub fn sos_to_host_newlines(buf: &mut [u8]) {
    for byte in buf.iter_mut() {
        if *byte == b'\r' {
            *byte = b'\n';
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sword_to_host_trims_padding() {
        let mut sword = [b' '; FNAME_LEN];
        sword[..5].copy_from_slice(b"HELLO");
        sword[FNAME_NAMELEN..].copy_from_slice(b"TXT");
        assert_eq!(sword_to_host(&sword), "HELLO.TXT");

        sword[FNAME_NAMELEN..].copy_from_slice(b"   ");
        assert_eq!(sword_to_host(&sword), "HELLO");
    }

    #[test]
    fn host_to_sword_pads_and_truncates() {
        let sword = host_to_sword("HELLO.TXT");
        assert_eq!(&sword[..FNAME_NAMELEN], b"HELLO        ");
        assert_eq!(&sword[FNAME_NAMELEN..], b"TXT");

        // Over-long parts are truncated, not rejected.
        let sword = host_to_sword("ABCDEFGHIJKLMNOP.OBJX");
        assert_eq!(&sword[..FNAME_NAMELEN], b"ABCDEFGHIJKLM");
        assert_eq!(&sword[FNAME_NAMELEN..], b"OBJ");
    }

    #[test]
    fn host_to_sword_strips_drive_prefix() {
        assert_eq!(host_to_sword("A:GAME.BAS"), host_to_sword("GAME.BAS"));
        assert_eq!(host_to_sword("A::GAME.BAS"), host_to_sword("GAME.BAS"));
    }

    #[test]
    fn host_to_sword_splits_at_the_last_dot() {
        let sword = host_to_sword("A.B.OBJ");
        assert_eq!(&sword[..FNAME_NAMELEN], b"A.B          ");
        assert_eq!(&sword[FNAME_NAMELEN..], b"OBJ");
    }

    #[test]
    fn round_trip_is_stable() {
        for host in ["HELLO.TXT", "GAME", "A.B.OBJ", "ABCDEFGHIJKLMNOP.OBJX", "X."] {
            let first = host_to_sword(host);
            let second = host_to_sword(&sword_to_host(&first));
            assert_eq!(first, second, "{host}");
        }
    }

    #[test]
    fn compare_uses_the_converted_name() {
        let sword = host_to_sword("HELLO.TXT");
        assert!(matches("HELLO.TXT", &sword));
        assert!(matches("A:HELLO.TXT", &sword));
        assert!(!matches("HELLO.BAS", &sword));
    }

    #[test]
    fn sos_header_round_trip() {
        let pkt = HeaderPacket {
            attr: SosAttr::BIN,
            load_addr: 0x8000,
            exec_addr: 0x8abc,
        };
        let header = format_sos_header(&pkt);
        assert_eq!(&header[..], b"_SOS 01 8000 8abc\n");
        assert_eq!(parse_sos_header(&header), Some(pkt));
        assert_eq!(parse_sos_header(b"_SOS zz 0000 0000\n"), None);
        assert_eq!(parse_sos_header(b"_XOS 01 8000 8abc\n"), None);
    }

    #[test]
    fn ascii_newline_translation() {
        let mut buf = *b"A\nB\n";
        host_to_sos_newlines(&mut buf);
        assert_eq!(&buf, b"A\rB\r");
        sos_to_host_newlines(&mut buf);
        assert_eq!(&buf, b"A\nB\n");
    }
}
