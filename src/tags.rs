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

//! Tag numbers and flag values from rpm's `rpmtag.h`.
//!
//! Only the tags this crate writes are listed.

// Region tags
pub const HEADER_SIGNATURES: u32 = 62;
pub const HEADER_IMMUTABLE: u32 = 63;
pub const HEADER_I18NTABLE: u32 = 100;

// Signature header
pub const SIGTAG_SHA1: u32 = 269;
pub const SIGTAG_SHA256: u32 = 273;
pub const SIGTAG_SIZE: u32 = 1000;
pub const SIGTAG_MD5: u32 = 1004;
pub const SIGTAG_PAYLOADSIZE: u32 = 1007;

// Metadata header
pub const RPMTAG_NAME: u32 = 1000;
pub const RPMTAG_VERSION: u32 = 1001;
pub const RPMTAG_RELEASE: u32 = 1002;
pub const RPMTAG_SUMMARY: u32 = 1004;
pub const RPMTAG_DESCRIPTION: u32 = 1005;
pub const RPMTAG_BUILDTIME: u32 = 1006;
pub const RPMTAG_BUILDHOST: u32 = 1007;
pub const RPMTAG_SIZE: u32 = 1009;
pub const RPMTAG_VENDOR: u32 = 1011;
pub const RPMTAG_LICENSE: u32 = 1014;
pub const RPMTAG_PACKAGER: u32 = 1015;
pub const RPMTAG_GROUP: u32 = 1016;
pub const RPMTAG_URL: u32 = 1020;
pub const RPMTAG_OS: u32 = 1021;
pub const RPMTAG_ARCH: u32 = 1022;
pub const RPMTAG_FILESIZES: u32 = 1028;
pub const RPMTAG_FILEMODES: u32 = 1030;
pub const RPMTAG_FILERDEVS: u32 = 1033;
pub const RPMTAG_FILEMTIMES: u32 = 1034;
pub const RPMTAG_FILEDIGESTS: u32 = 1035;
pub const RPMTAG_FILELINKTOS: u32 = 1036;
pub const RPMTAG_FILEFLAGS: u32 = 1037;
pub const RPMTAG_FILEUSERNAME: u32 = 1039;
pub const RPMTAG_FILEGROUPNAME: u32 = 1040;
pub const RPMTAG_SOURCERPM: u32 = 1044;
pub const RPMTAG_FILEVERIFYFLAGS: u32 = 1045;
pub const RPMTAG_ARCHIVESIZE: u32 = 1046;
pub const RPMTAG_PROVIDENAME: u32 = 1047;
pub const RPMTAG_REQUIREFLAGS: u32 = 1048;
pub const RPMTAG_REQUIRENAME: u32 = 1049;
pub const RPMTAG_REQUIREVERSION: u32 = 1050;
pub const RPMTAG_RPMVERSION: u32 = 1064;
pub const RPMTAG_FILEDEVICES: u32 = 1095;
pub const RPMTAG_FILEINODES: u32 = 1096;
pub const RPMTAG_FILELANGS: u32 = 1097;
pub const RPMTAG_PROVIDEFLAGS: u32 = 1112;
pub const RPMTAG_PROVIDEVERSION: u32 = 1113;
pub const RPMTAG_DIRINDEXES: u32 = 1116;
pub const RPMTAG_BASENAMES: u32 = 1117;
pub const RPMTAG_DIRNAMES: u32 = 1118;
pub const RPMTAG_PAYLOADFORMAT: u32 = 1124;
pub const RPMTAG_PAYLOADCOMPRESSOR: u32 = 1125;
pub const RPMTAG_PAYLOADFLAGS: u32 = 1126;
pub const RPMTAG_FILEDIGESTALGO: u32 = 5011;
pub const RPMTAG_ENCODING: u32 = 5062;
pub const RPMTAG_PAYLOADDIGEST: u32 = 5092;
pub const RPMTAG_PAYLOADDIGESTALGO: u32 = 5093;

// Dependency sense flags
pub const RPMSENSE_LESS: u32 = 1 << 1;
pub const RPMSENSE_EQUAL: u32 = 1 << 3;
pub const RPMSENSE_RPMLIB: u32 = 1 << 24;

// PGP hash algorithm ids, as used by FILEDIGESTALGO and PAYLOADDIGESTALGO
pub const PGPHASHALGO_MD5: u32 = 1;
pub const PGPHASHALGO_SHA256: u32 = 8;

pub const RPMVERIFY_ALL: u32 = 0xFFFF_FFFF;
