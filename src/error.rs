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

use std::io;

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can stop a package from being built.
///
/// Broken internal invariants (unsorted header tags, mismatched file arrays)
/// are not represented here; those panic.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("no executable named {0:?} found in the application tree")]
    MissingExecutable(String),
    #[error("file entry {0:?} has no content")]
    MissingContent(String),
    #[error("invalid package path {0:?}")]
    InvalidPath(String),
    #[error("unsupported architecture {0:?}")]
    UnsupportedArchitecture(String),
    #[error("file {0:?} is too large for a cpio payload")]
    FileTooLarge(String),
    #[error("invalid package metadata: {0}")]
    InvalidMetadata(String),
    #[error("failed to read content of {path:?}: {source}")]
    ContentRead {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("{0}")]
    Io(#[from] io::Error),
}
