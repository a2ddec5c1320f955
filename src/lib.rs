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

//! A pure Rust library for building RPM packages.
//!
//! rpm-rust turns an application's file tree and a bit of metadata into a
//! binary `.rpm` without calling out to `rpmbuild`. The pieces are usable on
//! their own: [`layout`] places the application on the target file system,
//! [`filelist`] derives RPM's per-file arrays, [`cpio`] writes the payload,
//! [`header`] encodes RPM headers and [`binary`] puts it all together.

pub mod binary;
pub mod cpio;
mod error;
pub mod filelist;
pub mod header;
pub mod layout;
mod shared;
pub mod tags;

pub use error::*;
pub use shared::*;
