/*
    rpm-rust - Rust library for building RPM packages
    Copyright (C) 2023  NotSludgeBomb

    This program is free software: you can redistribute it and/or modify
    it under the terms of the GNU General Public License as published by
    the Free Software Foundation, either version 3 of the License, or
    (at your option) any later version.

    This program is distributed in the hope that it will be useful,
    but WITHOUT ANY WARRANTY; without even the implied warranty of
    MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
    GNU General Public License for more details.

    You should have received a copy of the GNU General Public License
    along with this program.  If not, see <https://www.gnu.org/licenses/>.
*/

//! Writer for the cpio "newc" format RPM uses as its payload.
//!
//! Each record is a 110-byte ASCII header (`070701` followed by thirteen
//! 8-digit hex fields), the NUL-terminated name and the file data, with the
//! name and the data each padded to a 4-byte boundary.

use std::io::{self, Write};

use flate2::write::GzEncoder;
use flate2::Compression;

use crate::filelist::FileRecord;
use crate::shared::EntryKind;

const MAGIC: &[u8] = b"070701";
const TRAILER: &str = "TRAILER!!!";

/// Streams newc records into `W`, keeping track of the bytes written so
/// padding can be computed without seeking.
pub struct CpioWriter<W: Write> {
    inner: W,
    written: u64,
    next_inode: u32,
}

impl<W: Write> CpioWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            written: 0,
            next_inode: 1,
        }
    }

    /// Appends one record.
    pub fn append(&mut self, record: &FileRecord) -> io::Result<()> {
        let nlink = match record.kind {
            EntryKind::Directory => 2,
            EntryKind::File => 1,
        };
        self.write_header(
            &record.payload_path,
            [
                record.inode,
                record.mode,
                record.uid,
                record.gid,
                nlink,
                record.mtime,
                record.size,
            ],
        )?;
        if record.kind == EntryKind::File {
            self.write_padded(&record.content)?;
        }
        self.next_inode = self.next_inode.max(record.inode + 1);
        Ok(())
    }

    /// Writes the trailer record and returns the inner writer together with
    /// the total archive length.
    pub fn finish(mut self) -> io::Result<(W, u64)> {
        let inode = self.next_inode;
        self.write_header(TRAILER, [inode, 0, 0, 0, 0, 0, 0])?;
        self.inner.flush()?;
        Ok((self.inner, self.written))
    }

    // `fields` holds inode, mode, uid, gid, nlink, mtime and filesize; device
    // numbers and the checksum are always zero
    fn write_header(&mut self, name: &str, fields: [u32; 7]) -> io::Result<()> {
        let mut header = Vec::with_capacity(110 + name.len() + 4);
        header.extend_from_slice(MAGIC);
        let [inode, mode, uid, gid, nlink, mtime, filesize] = fields;
        let name_size = name.len() as u32 + 1;
        for value in [
            inode, mode, uid, gid, nlink, mtime, filesize, 0, 0, 0, 0, name_size, 0,
        ] {
            header.extend_from_slice(format!("{:08x}", value).as_bytes());
        }
        header.extend_from_slice(name.as_bytes());
        header.push(0);
        self.write_padded(&header)
    }

    fn write_padded(&mut self, buf: &[u8]) -> io::Result<()> {
        self.inner.write_all(buf)?;
        self.written += buf.len() as u64;
        let padding = (4 - (self.written % 4) as usize) % 4;
        self.inner.write_all(&[0u8; 3][..padding])?;
        self.written += padding as u64;
        Ok(())
    }
}

/// The payload in both forms the headers need.
#[derive(Debug, Clone)]
pub struct Payload {
    /// Length of the uncompressed cpio archive.
    pub archive_size: u64,
    /// The gzip-compressed archive.
    pub compressed: Vec<u8>,
}

/// Writes `records` as a newc archive and gzips it.
pub fn build_payload(records: &[FileRecord]) -> io::Result<Payload> {
    let mut writer = CpioWriter::new(GzEncoder::new(Vec::new(), Compression::best()));
    for record in records {
        writer.append(record)?;
    }
    let (encoder, archive_size) = writer.finish()?;
    Ok(Payload {
        archive_size,
        compressed: encoder.finish()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filelist::FileList;
    use crate::shared::Entry;

    #[test]
    fn empty_archive_is_only_the_trailer() -> io::Result<()> {
        let (bytes, size) = CpioWriter::new(Vec::new()).finish()?;
        // 110 header bytes + "TRAILER!!!\0", padded to 124
        assert_eq!(size, 124);
        assert_eq!(bytes.len(), 124);
        assert_eq!(&bytes[..6], b"070701");
        assert_eq!(&bytes[6..14], b"00000001");
        assert_eq!(&bytes[110..121], b"TRAILER!!!\0");
        Ok(())
    }

    #[test]
    fn pads_name_and_data_to_four_bytes() -> Result<(), Box<dyn std::error::Error>> {
        let entries = vec![
            Entry::directory("/opt", 0o755)?,
            Entry::file("/opt/a", 0o644, b"hello".to_vec())?,
        ];
        let list = FileList::build(&entries, 1_700_000_000)?;
        let mut writer = CpioWriter::new(Vec::new());
        for record in list.records() {
            writer.append(record)?;
        }
        let (bytes, size) = writer.finish()?;
        assert_eq!(size as usize, bytes.len());

        // "./opt\0" ends the first record on a 4-byte boundary
        assert_eq!(&bytes[110..116], b"./opt\0");
        let second = &bytes[116..];
        assert_eq!(&second[..6], b"070701");
        // inode 2, mode 0100644, nlink 1, size 5
        assert_eq!(&second[6..14], b"00000002");
        assert_eq!(&second[14..22], b"000081a4");
        assert_eq!(&second[38..46], b"00000001");
        assert_eq!(&second[54..62], b"00000005");
        // "./opt/a\0" ends at 118, padded to 120; data ends at 125, padded to 128
        assert_eq!(&second[120..125], b"hello");
        assert_eq!(&second[125..128], &[0, 0, 0]);
        assert_eq!(&second[128..134], b"070701");
        // trailer inode follows the last record
        assert_eq!(&second[134..142], b"00000003");
        Ok(())
    }
}
