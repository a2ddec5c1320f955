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

//! The tag-indexed header structure shared by RPM's signature and metadata
//! sections.
//!
//! A header is laid out as
//!
//! ```text
//! magic (8E AD E8 01) | 4 reserved bytes | index count | data length
//! index records, 16 bytes each: tag, type, offset, count
//! data blob
//! ```
//!
//! with every integer big-endian. Index records are sorted by tag, and every
//! value in the data blob starts at its type's natural alignment.

use std::collections::BTreeSet;

pub const HEADER_MAGIC: [u8; 4] = [0x8E, 0xAD, 0xE8, 0x01];

const INDEX_RECORD_SIZE: usize = 16;

// The on-disk type ids of header values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderType {
    Null = 0,
    Char = 1,
    Int8 = 2,
    Int16 = 3,
    Int32 = 4,
    Int64 = 5,
    String = 6,
    Bin = 7,
    StringArray = 8,
    I18nString = 9,
}

impl HeaderType {
    // Alignment of the type's first byte inside the data blob
    pub fn alignment(&self) -> usize {
        match self {
            HeaderType::Int16 => 2,
            HeaderType::Int32 => 4,
            HeaderType::Int64 => 8,
            _ => 1,
        }
    }
}

/// A typed header value.
///
/// Each variant fixes both the on-disk type id and how the value serializes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderValue {
    Char(Vec<u8>),
    Int8(Vec<u8>),
    Int16(Vec<u16>),
    Int32(Vec<u32>),
    Int64(Vec<u64>),
    String(String),
    Bin(Vec<u8>),
    StringArray(Vec<String>),
    I18nString(String),
}

impl HeaderValue {
    pub fn header_type(&self) -> HeaderType {
        match self {
            HeaderValue::Char(_) => HeaderType::Char,
            HeaderValue::Int8(_) => HeaderType::Int8,
            HeaderValue::Int16(_) => HeaderType::Int16,
            HeaderValue::Int32(_) => HeaderType::Int32,
            HeaderValue::Int64(_) => HeaderType::Int64,
            HeaderValue::String(_) => HeaderType::String,
            HeaderValue::Bin(_) => HeaderType::Bin,
            HeaderValue::StringArray(_) => HeaderType::StringArray,
            HeaderValue::I18nString(_) => HeaderType::I18nString,
        }
    }

    // The `count` field of the value's index record
    pub fn count(&self) -> u32 {
        let count = match self {
            HeaderValue::Char(bytes) | HeaderValue::Int8(bytes) | HeaderValue::Bin(bytes) => {
                bytes.len()
            }
            HeaderValue::Int16(values) => values.len(),
            HeaderValue::Int32(values) => values.len(),
            HeaderValue::Int64(values) => values.len(),
            HeaderValue::String(_) | HeaderValue::I18nString(_) => 1,
            HeaderValue::StringArray(values) => values.len(),
        };
        count as u32
    }

    // Appends the value's bytes to `store`, which must already be aligned
    fn append(&self, store: &mut Vec<u8>) {
        match self {
            HeaderValue::Char(bytes) | HeaderValue::Int8(bytes) | HeaderValue::Bin(bytes) => {
                store.extend_from_slice(bytes)
            }
            HeaderValue::Int16(values) => {
                for value in values {
                    store.extend_from_slice(&value.to_be_bytes());
                }
            }
            HeaderValue::Int32(values) => {
                for value in values {
                    store.extend_from_slice(&value.to_be_bytes());
                }
            }
            HeaderValue::Int64(values) => {
                for value in values {
                    store.extend_from_slice(&value.to_be_bytes());
                }
            }
            HeaderValue::String(value) | HeaderValue::I18nString(value) => {
                store.extend_from_slice(value.as_bytes());
                store.push(0);
            }
            HeaderValue::StringArray(values) => {
                for value in values {
                    store.extend_from_slice(value.as_bytes());
                    store.push(0);
                }
            }
        }
    }
}

// A tag and its value, before layout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderEntry {
    pub tag: u32,
    pub value: HeaderValue,
}

impl HeaderEntry {
    pub fn new(tag: u32, value: HeaderValue) -> Self {
        Self { tag, value }
    }
}

/// One 16-byte index record of a built header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexRecord {
    pub tag: u32,
    pub kind: HeaderType,
    pub offset: i32,
    pub count: u32,
}

impl IndexRecord {
    fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.tag.to_be_bytes());
        out.extend_from_slice(&(self.kind as u32).to_be_bytes());
        out.extend_from_slice(&self.offset.to_be_bytes());
        out.extend_from_slice(&self.count.to_be_bytes());
    }
}

/// Collects header entries and lays them out.
///
/// Tags may be added in any order; `build` sorts them. Adding the same tag
/// twice is a bug in the caller and panics.
#[derive(Debug, Default)]
pub struct HeaderBuilder {
    entries: Vec<HeaderEntry>,
    region: Option<u32>,
}

impl HeaderBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the header as one immutable region tagged `tag`, e.g.
    /// `HEADER_IMMUTABLE` for the metadata header.
    ///
    /// The region tag must sort before every other tag in the header.
    pub fn with_region(mut self, tag: u32) -> Self {
        self.region = Some(tag);
        self
    }

    pub fn add(mut self, tag: u32, value: HeaderValue) -> Self {
        self.entries.push(HeaderEntry::new(tag, value));
        self
    }

    pub fn string(self, tag: u32, value: &str) -> Self {
        self.add(tag, HeaderValue::String(value.to_string()))
    }

    pub fn i18n_string(self, tag: u32, value: &str) -> Self {
        self.add(tag, HeaderValue::I18nString(value.to_string()))
    }

    pub fn int32(self, tag: u32, value: u32) -> Self {
        self.add(tag, HeaderValue::Int32(vec![value]))
    }

    /// Sorts the entries by tag and lays out the data blob.
    ///
    /// # Panics
    ///
    /// Panics on a duplicate tag, or when the region tag doesn't sort first.
    pub fn build(mut self) -> Header {
        self.entries.sort_by_key(|entry| entry.tag);
        let mut seen = BTreeSet::new();
        for entry in &self.entries {
            assert!(seen.insert(entry.tag), "duplicate header tag {}", entry.tag);
        }

        let mut index = Vec::with_capacity(self.entries.len() + 1);
        let mut store = Vec::new();
        for entry in &self.entries {
            let kind = entry.value.header_type();
            pad_to(&mut store, kind.alignment());
            index.push(IndexRecord {
                tag: entry.tag,
                kind,
                offset: store.len() as i32,
                count: entry.value.count(),
            });
            entry.value.append(&mut store);
        }

        if let Some(region) = self.region {
            if let Some(first) = index.first() {
                assert!(
                    region < first.tag,
                    "region tag {} must sort before tag {}",
                    region,
                    first.tag
                );
            }
            // The trailer is itself an index record, pointing back over every
            // record of the region including its own.
            let count = index.len() + 1;
            let trailer = IndexRecord {
                tag: region,
                kind: HeaderType::Bin,
                offset: -((count * INDEX_RECORD_SIZE) as i32),
                count: INDEX_RECORD_SIZE as u32,
            };
            let offset = store.len() as i32;
            trailer.write(&mut store);
            index.insert(
                0,
                IndexRecord {
                    tag: region,
                    kind: HeaderType::Bin,
                    offset,
                    count: INDEX_RECORD_SIZE as u32,
                },
            );
        }

        Header { index, store }
    }
}

/// A laid out header, ready to be serialized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    index: Vec<IndexRecord>,
    store: Vec<u8>,
}

impl Header {
    pub fn builder() -> HeaderBuilder {
        HeaderBuilder::new()
    }

    // Returns the index records, sorted by tag
    pub fn index(&self) -> &[IndexRecord] {
        &self.index
    }

    // Returns the data blob
    pub fn store(&self) -> &[u8] {
        &self.store
    }

    // Size of the serialized header without trailing padding
    pub fn size(&self) -> usize {
        16 + self.index.len() * INDEX_RECORD_SIZE + self.store.len()
    }

    /// Serializes the header. `padded` appends zeros up to the next 8-byte
    /// boundary, which the signature header needs.
    pub fn to_bytes(&self, padded: bool) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.size() + 8);
        out.extend_from_slice(&HEADER_MAGIC);
        out.extend_from_slice(&[0; 4]);
        out.extend_from_slice(&(self.index.len() as u32).to_be_bytes());
        out.extend_from_slice(&(self.store.len() as u32).to_be_bytes());
        for record in &self.index {
            record.write(&mut out);
        }
        out.extend_from_slice(&self.store);
        if padded {
            pad_to(&mut out, 8);
        }
        out
    }
}

// Appends zeros until `buf.len()` is a multiple of `alignment`
fn pad_to(buf: &mut Vec<u8>, alignment: usize) {
    let extra = buf.len() % alignment;
    if extra > 0 {
        buf.resize(buf.len() + alignment - extra, 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn be32(bytes: &[u8], at: usize) -> u32 {
        u32::from_be_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
    }

    #[test]
    fn sorts_tags_and_aligns_values() {
        let header = Header::builder()
            .string(1004, "summary")
            .add(1030, HeaderValue::Int16(vec![0o100644, 0o40755]))
            .string(1000, "demo")
            .add(1009, HeaderValue::Int64(vec![42]))
            .int32(1006, 7)
            .build();

        let tags: Vec<u32> = header.index().iter().map(|r| r.tag).collect();
        assert_eq!(tags, vec![1000, 1004, 1006, 1009, 1030]);
        for record in header.index() {
            assert_eq!(record.offset as usize % record.kind.alignment(), 0);
        }

        // "demo\0" ends at 5, "summary\0" at 13, int32 pads to 16
        assert_eq!(header.index()[2].offset, 16);
        assert_eq!(header.index()[3].offset, 24);
        assert_eq!(&header.store()[24..32], &42u64.to_be_bytes());
    }

    #[test]
    fn serializes_preamble_and_counts() {
        let header = Header::builder()
            .add(
                1117,
                HeaderValue::StringArray(vec!["a".to_string(), "bc".to_string()]),
            )
            .add(1004, HeaderValue::Bin(vec![1, 2, 3]))
            .build();
        let bytes = header.to_bytes(false);

        assert_eq!(&bytes[0..4], &HEADER_MAGIC);
        assert_eq!(&bytes[4..8], &[0; 4]);
        assert_eq!(be32(&bytes, 8), 2);
        assert_eq!(be32(&bytes, 12), 8);
        // first record: BIN, three bytes
        assert_eq!(be32(&bytes, 16), 1004);
        assert_eq!(be32(&bytes, 20), HeaderType::Bin as u32);
        assert_eq!(be32(&bytes, 28), 3);
        // second record: two strings
        assert_eq!(be32(&bytes, 36), HeaderType::StringArray as u32);
        assert_eq!(be32(&bytes, 40), 3);
        assert_eq!(be32(&bytes, 44), 2);
        assert_eq!(&bytes[48..], &[1, 2, 3, b'a', 0, b'b', b'c', 0]);
    }

    #[test]
    fn pads_to_eight_bytes_on_request() {
        let header = Header::builder().string(1000, "abc").build();
        assert_eq!(header.to_bytes(false).len(), 16 + 16 + 4);
        assert_eq!(header.to_bytes(true).len(), 40);
    }

    #[test]
    fn region_trailer_points_back_over_index() {
        let header = Header::builder()
            .with_region(63)
            .string(1000, "demo")
            .int32(1006, 1)
            .build();

        let region = header.index()[0];
        assert_eq!(region.tag, 63);
        assert_eq!(region.kind, HeaderType::Bin);
        assert_eq!(region.count, 16);
        assert_eq!(region.offset as usize, header.store().len() - 16);

        let trailer = &header.store()[region.offset as usize..];
        assert_eq!(be32(trailer, 0), 63);
        assert_eq!(be32(trailer, 4), HeaderType::Bin as u32);
        assert_eq!(be32(trailer, 8) as i32, -48);
        assert_eq!(be32(trailer, 12), 16);
    }

    #[test]
    #[should_panic(expected = "duplicate header tag 1000")]
    fn rejects_duplicate_tags() {
        Header::builder()
            .string(1000, "a")
            .string(1000, "b")
            .build();
    }
}
