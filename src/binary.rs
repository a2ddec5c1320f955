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

//! Build binary RPM packages.
//!
//! A binary RPM is the 96-byte lead, a signature header, the metadata header
//! and the gzip-compressed cpio payload, back to back. Everything is
//! assembled in memory; no `rpmbuild` is involved.
//!
//! # Example
//!
//! ```
//! use std::fs::File;
//! use rpm_rust::*;
//! use rpm_rust::binary::*;
//!
//! fn main() -> rpm_rust::Result<()> {
//!     let metadata = PackageMetadata::new("example")
//!         .set_version("0.1.0")
//!         .set_summary("rpm-rust example")
//!         .set_architecture(Architecture::X86_64);
//!
//!     RpmPackage::from_tree(metadata, &DirectoryTree::new("target/release/publish"))?
//!         .build()?
//!         .write(File::create("example.rpm")?)?;
//!
//!     Ok(())
//! }
//! ```

use std::io::Write;

use log::{debug, info};
use sha1::Sha1;
use sha2::{Digest, Sha256};

use crate::cpio::{build_payload, Payload};
use crate::error::{Error, Result};
use crate::filelist::FileList;
use crate::header::{Header, HeaderBuilder, HeaderValue};
use crate::layout::LayoutBuilder;
use crate::shared::*;
use crate::tags::*;

pub const LEAD_MAGIC: [u8; 4] = [0xED, 0xAB, 0xEE, 0xDB];
pub const LEAD_SIZE: usize = 96;

// Value for the lead's "type" field, 0 for binary packages
const LEAD_TYPE_BINARY: u16 = 0;
// Linux is the only OS the lead knows
const LEAD_OS_LINUX: u16 = 1;
// Header-style signatures
const LEAD_SIGNATURE_TYPE: u16 = 5;

/// The legacy 96-byte lead at the start of every RPM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lead {
    archnum: u16,
    name: [u8; 66],
}

impl Lead {
    /// Creates a lead for `name` (usually `name-version-release`). Names
    /// longer than 65 bytes are cut so the field stays NUL-terminated; the
    /// cut never splits a character.
    pub fn new(name: &str, architecture: Architecture) -> Self {
        let mut name_arr = [0u8; 66];
        let mut length = name.len().min(65);
        while !name.is_char_boundary(length) {
            length -= 1;
        }
        name_arr[..length].copy_from_slice(&name.as_bytes()[..length]);
        Self {
            archnum: architecture.lead_code(),
            name: name_arr,
        }
    }

    pub fn to_bytes(&self) -> [u8; LEAD_SIZE] {
        let mut buf = [0u8; LEAD_SIZE];
        buf[..4].copy_from_slice(&LEAD_MAGIC);
        buf[4] = 3;
        buf[5] = 0;
        buf[6..8].copy_from_slice(&LEAD_TYPE_BINARY.to_be_bytes());
        buf[8..10].copy_from_slice(&self.archnum.to_be_bytes());
        buf[10..76].copy_from_slice(&self.name);
        buf[76..78].copy_from_slice(&LEAD_OS_LINUX.to_be_bytes());
        buf[78..80].copy_from_slice(&LEAD_SIGNATURE_TYPE.to_be_bytes());
        // the remaining 16 bytes are reserved
        buf
    }
}

/// A package's metadata and its entries, ready to be built.
///
/// Entries are used in the order they were added. When the package comes
/// from [`RpmPackage::from_tree`], that order is the layout's.
#[derive(Debug, Clone)]
pub struct RpmPackage {
    metadata: PackageMetadata,
    entries: Vec<Entry>,
}

impl RpmPackage {
    /// Creates an empty package.
    pub fn new(metadata: PackageMetadata) -> Self {
        Self {
            metadata,
            entries: Vec::new(),
        }
    }

    /// Lays out an application tree with the default [`LayoutBuilder`].
    ///
    /// # Errors
    ///
    /// Fails if the tree doesn't contain the main executable or holds paths
    /// that can't be normalized.
    pub fn from_tree<T: FileTree + ?Sized>(metadata: PackageMetadata, tree: &T) -> Result<Self> {
        let entries = LayoutBuilder::new(&metadata).build(tree)?;
        Ok(Self { metadata, entries })
    }

    /// Adds an entry to the package.
    pub fn with_entry(mut self, entry: Entry) -> Self {
        self.entries.push(entry);
        self
    }

    /// Adds a number of entries to the package.
    pub fn with_entries(mut self, entries: Vec<Entry>) -> Self {
        self.entries.extend(entries);
        self
    }

    /// Removes all entries from the package.
    pub fn clear_entries(mut self) -> Self {
        self.entries = Vec::new();
        self
    }

    /// Returns the package's metadata.
    pub fn metadata(&self) -> &PackageMetadata {
        &self.metadata
    }

    /// Returns the package's entries.
    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    /// Builds the package into an RpmArchive.
    ///
    /// # Errors
    ///
    /// Fails on invalid metadata, a modification time outside the 32-bit
    /// range RPM stores, a payload too large for RPM's 32-bit size tags and
    /// any content read failure. Nothing is produced on failure.
    pub fn build(&self) -> Result<RpmArchive> {
        self.metadata.validate()?;
        let mtime = u32::try_from(self.metadata.modified().timestamp()).map_err(|_| {
            Error::InvalidMetadata(format!(
                "modification time {} is out of range",
                self.metadata.modified()
            ))
        })?;

        let files = FileList::build(&self.entries, mtime)?;
        let payload = build_payload(files.records())?;
        debug!(
            "payload: {} bytes of cpio, {} bytes compressed",
            payload.archive_size,
            payload.compressed.len()
        );

        let header = metadata_header(&self.metadata, &files, &payload, mtime)?.to_bytes(false);
        let signature = signature_header(&header, &payload)?;
        debug!(
            "headers: signature {} bytes, metadata {} bytes",
            signature.size(),
            header.len()
        );

        let archive = RpmArchive {
            lead: Lead::new(&self.metadata.full_name(), self.metadata.architecture()),
            signature,
            header,
            payload: payload.compressed,
        };
        info!(
            "built {}.{} ({} bytes)",
            self.metadata.full_name(),
            self.metadata.architecture(),
            archive.size()
        );
        Ok(archive)
    }
}

/// A built RPM.
///
/// The contents of an RpmArchive can't be changed; build a new one from an
/// [`RpmPackage`] instead.
#[derive(Debug, Clone)]
pub struct RpmArchive {
    lead: Lead,
    signature: Header,
    header: Vec<u8>,
    payload: Vec<u8>,
}

impl RpmArchive {
    /// Writes the package to `output`.
    pub fn write<W: Write>(&self, mut output: W) -> Result<()> {
        output.write_all(&self.lead.to_bytes())?;
        output.write_all(&self.signature.to_bytes(true))?;
        output.write_all(&self.header)?;
        output.write_all(&self.payload)?;
        output.flush()?;
        Ok(())
    }

    /// Returns the whole package as one buffer.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut output = Vec::with_capacity(self.size());
        output.extend_from_slice(&self.lead.to_bytes());
        output.extend_from_slice(&self.signature.to_bytes(true));
        output.extend_from_slice(&self.header);
        output.extend_from_slice(&self.payload);
        output
    }

    /// Total size of the package in bytes.
    pub fn size(&self) -> usize {
        LEAD_SIZE + self.signature.to_bytes(true).len() + self.header.len() + self.payload.len()
    }

    // Returns the lead
    pub fn lead(&self) -> &Lead {
        &self.lead
    }

    // Returns the signature header
    pub fn signature(&self) -> &Header {
        &self.signature
    }

    // Returns the serialized metadata header
    pub fn header(&self) -> &[u8] {
        &self.header
    }

    // Returns the compressed payload
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }
}

/// Something that can turn a package description into RPM bytes.
///
/// [`NativeBackend`] encodes in-process. A backend driving an external tool
/// would implement this trait as well.
pub trait PackageBackend {
    fn build(&self, metadata: &PackageMetadata, entries: &[Entry]) -> Result<Vec<u8>>;
}

/// Encodes packages in-process.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeBackend;

impl PackageBackend for NativeBackend {
    fn build(&self, metadata: &PackageMetadata, entries: &[Entry]) -> Result<Vec<u8>> {
        let package = RpmPackage::new(metadata.clone()).with_entries(entries.to_vec());
        Ok(package.build()?.to_bytes())
    }
}

// Converts a size to the 32 bits RPM stores, naming what overflowed
fn size32(size: u64, what: &str) -> Result<u32> {
    u32::try_from(size).map_err(|_| Error::FileTooLarge(what.to_string()))
}

fn strings<I, S>(values: I) -> HeaderValue
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    HeaderValue::StringArray(values.into_iter().map(Into::into).collect())
}

/// Builds the metadata header: package fields, per-file arrays and payload
/// description.
///
/// # Panics
///
/// Panics if the per-file arrays end up with different lengths.
pub fn metadata_header(
    metadata: &PackageMetadata,
    files: &FileList,
    payload: &Payload,
    build_time: u32,
) -> Result<Header> {
    let records = files.records();
    let installed_size = size32(
        metadata.installed_size().unwrap_or_else(|| files.total_size()),
        "installed size",
    )?;
    let evr = format!("{}-{}", metadata.version(), metadata.release());
    let payload_digest = hex::encode(Sha256::digest(&payload.compressed));

    let mut builder = HeaderBuilder::new()
        .with_region(HEADER_IMMUTABLE)
        .add(HEADER_I18NTABLE, strings(["C"]))
        .string(RPMTAG_NAME, metadata.name())
        .string(RPMTAG_VERSION, metadata.version())
        .string(RPMTAG_RELEASE, metadata.release())
        .i18n_string(RPMTAG_SUMMARY, metadata.summary())
        .i18n_string(RPMTAG_DESCRIPTION, metadata.description())
        .int32(RPMTAG_BUILDTIME, build_time)
        .string(RPMTAG_BUILDHOST, metadata.build_host())
        .int32(RPMTAG_SIZE, installed_size)
        .string(RPMTAG_LICENSE, metadata.license())
        .i18n_string(RPMTAG_GROUP, metadata.group())
        .string(RPMTAG_OS, "linux")
        .string(RPMTAG_ARCH, metadata.architecture().as_str())
        .string(
            RPMTAG_SOURCERPM,
            &format!("{}.src.rpm", metadata.full_name()),
        )
        .int32(
            RPMTAG_ARCHIVESIZE,
            size32(payload.archive_size, "cpio archive")?,
        )
        .add(
            RPMTAG_PROVIDENAME,
            strings([
                metadata.name().to_string(),
                format!("{}({})", metadata.name(), metadata.architecture()),
            ]),
        )
        .add(
            RPMTAG_PROVIDEFLAGS,
            HeaderValue::Int32(vec![RPMSENSE_EQUAL, RPMSENSE_EQUAL]),
        )
        .add(RPMTAG_PROVIDEVERSION, strings([evr.clone(), evr]))
        .add(
            RPMTAG_REQUIRENAME,
            strings([
                "rpmlib(CompressedFileNames)",
                "rpmlib(FileDigests)",
                "rpmlib(PayloadFilesHavePrefix)",
            ]),
        )
        .add(
            RPMTAG_REQUIREFLAGS,
            HeaderValue::Int32(vec![RPMSENSE_RPMLIB | RPMSENSE_LESS | RPMSENSE_EQUAL; 3]),
        )
        .add(
            RPMTAG_REQUIREVERSION,
            strings(["3.0.4-1", "4.6.0-1", "4.0-1"]),
        )
        .string(
            RPMTAG_RPMVERSION,
            &format!("rpm-rust {}", env!("CARGO_PKG_VERSION")),
        )
        .string(RPMTAG_PAYLOADFORMAT, "cpio")
        .string(RPMTAG_PAYLOADCOMPRESSOR, "gzip")
        .string(RPMTAG_PAYLOADFLAGS, "9")
        .string(RPMTAG_ENCODING, "utf-8")
        .add(RPMTAG_PAYLOADDIGEST, strings([payload_digest]))
        .int32(RPMTAG_PAYLOADDIGESTALGO, PGPHASHALGO_SHA256);

    for (tag, value) in [
        (RPMTAG_VENDOR, metadata.vendor()),
        (RPMTAG_PACKAGER, metadata.maintainer()),
        (RPMTAG_URL, metadata.homepage()),
    ] {
        if !value.is_empty() {
            builder = builder.string(tag, value);
        }
    }

    // An empty array isn't a valid header value, so a package without
    // files carries no file tags at all
    if !records.is_empty() {
        builder = add_file_arrays(builder, files);
    }

    Ok(builder.build())
}

fn add_file_arrays(builder: HeaderBuilder, files: &FileList) -> HeaderBuilder {
    let records = files.records();
    let count = records.len();
    let sizes = records.iter().map(|r| r.size).collect::<Vec<_>>();
    let modes = records.iter().map(|r| r.mode as u16).collect::<Vec<_>>();
    let mtimes = records.iter().map(|r| r.mtime).collect::<Vec<_>>();
    let digests = records.iter().map(|r| r.digest.clone()).collect::<Vec<_>>();
    let users = records.iter().map(|r| r.user.clone()).collect::<Vec<_>>();
    let groups = records.iter().map(|r| r.group.clone()).collect::<Vec<_>>();
    let inodes = records.iter().map(|r| r.inode).collect::<Vec<_>>();
    let dir_indexes = records.iter().map(|r| r.dir_index).collect::<Vec<_>>();
    let base_names = records.iter().map(|r| r.base_name.clone()).collect::<Vec<_>>();

    for length in [
        sizes.len(),
        modes.len(),
        mtimes.len(),
        digests.len(),
        users.len(),
        groups.len(),
        inodes.len(),
        dir_indexes.len(),
        base_names.len(),
    ] {
        assert_eq!(length, count, "file arrays differ in length");
    }
    for index in &dir_indexes {
        assert!(
            (*index as usize) < files.dir_names().len(),
            "directory index {} is not in the directory table",
            index
        );
    }

    builder
        .add(RPMTAG_FILESIZES, HeaderValue::Int32(sizes))
        .add(RPMTAG_FILEMODES, HeaderValue::Int16(modes))
        .add(RPMTAG_FILERDEVS, HeaderValue::Int16(vec![0; count]))
        .add(RPMTAG_FILEMTIMES, HeaderValue::Int32(mtimes))
        .add(RPMTAG_FILEDIGESTS, HeaderValue::StringArray(digests))
        .add(RPMTAG_FILELINKTOS, strings(vec![""; count]))
        .add(RPMTAG_FILEFLAGS, HeaderValue::Int32(vec![0; count]))
        .add(RPMTAG_FILEUSERNAME, HeaderValue::StringArray(users))
        .add(RPMTAG_FILEGROUPNAME, HeaderValue::StringArray(groups))
        .add(
            RPMTAG_FILEVERIFYFLAGS,
            HeaderValue::Int32(vec![RPMVERIFY_ALL; count]),
        )
        .add(RPMTAG_FILEDEVICES, HeaderValue::Int32(vec![1; count]))
        .add(RPMTAG_FILEINODES, HeaderValue::Int32(inodes))
        .add(RPMTAG_FILELANGS, strings(vec![""; count]))
        .add(RPMTAG_DIRINDEXES, HeaderValue::Int32(dir_indexes))
        .add(RPMTAG_BASENAMES, HeaderValue::StringArray(base_names))
        .add(
            RPMTAG_DIRNAMES,
            HeaderValue::StringArray(files.dir_names().to_vec()),
        )
        .int32(RPMTAG_FILEDIGESTALGO, PGPHASHALGO_MD5)
}

/// Builds the signature header over the serialized metadata header and the
/// compressed payload.
pub fn signature_header(header: &[u8], payload: &Payload) -> Result<Header> {
    let mut md5 = md5::Context::new();
    md5.consume(header);
    md5.consume(&payload.compressed);

    let total = header.len() as u64 + payload.compressed.len() as u64;
    Ok(HeaderBuilder::new()
        .with_region(HEADER_SIGNATURES)
        .string(SIGTAG_SHA1, &hex::encode(Sha1::digest(header)))
        .string(SIGTAG_SHA256, &hex::encode(Sha256::digest(header)))
        .int32(SIGTAG_SIZE, size32(total, "package")?)
        .add(SIGTAG_MD5, HeaderValue::Bin(md5.compute().0.to_vec()))
        .int32(
            SIGTAG_PAYLOADSIZE,
            size32(payload.archive_size, "cpio archive")?,
        )
        .build())
}
