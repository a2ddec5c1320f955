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

//! Projects an entry sequence onto RPM's per-file parallel arrays.

use std::collections::{HashMap, HashSet};

use log::{debug, trace};

use crate::error::{Error, Result};
use crate::shared::{Entry, EntryKind};

pub const S_IFDIR: u32 = 0o040000;
pub const S_IFREG: u32 = 0o100000;

/// Everything RPM records about one packaged path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub path: String,
    pub directory: String,
    pub base_name: String,
    pub dir_index: u32,
    pub kind: EntryKind,
    pub mode: u32,
    pub size: u32,
    pub uid: u32,
    pub gid: u32,
    pub user: String,
    pub group: String,
    /// Lowercase hex MD5 for files, empty for directories.
    pub digest: String,
    pub mtime: u32,
    pub inode: u32,
    /// The path as stored in the cpio payload, e.g. `./usr/bin/demo`.
    pub payload_path: String,
    pub content: Vec<u8>,
}

/// File records plus the deduplicated directory table they index into.
#[derive(Debug, Clone, Default)]
pub struct FileList {
    records: Vec<FileRecord>,
    dir_names: Vec<String>,
}

impl FileList {
    /// Builds the file list for `entries`, stamping every record with
    /// `mtime`.
    ///
    /// Records keep the order of `entries`; inodes count up from 1 in that
    /// order and directory names are numbered as they are first seen.
    ///
    /// # Errors
    ///
    /// Fails on a duplicate path, on the root directory itself, on a file
    /// too large for a cpio record and on any content read failure.
    ///
    /// # Panics
    ///
    /// Panics if the directory entries aren't sorted by depth and then by
    /// name.
    pub fn build(entries: &[Entry], mtime: u32) -> Result<Self> {
        assert_directories_sorted(entries);

        let mut output = Self::default();
        let mut dir_lookup: HashMap<String, u32> = HashMap::new();
        let mut seen = HashSet::new();

        for (position, entry) in entries.iter().enumerate() {
            let path = entry.path();
            if path == "/" || !seen.insert(path) {
                return Err(Error::InvalidPath(path.to_string()));
            }
            let (directory, base_name) = split_path(path);
            let dir_index = match dir_lookup.get(&directory) {
                Some(index) => *index,
                None => {
                    let index = output.dir_names.len() as u32;
                    dir_lookup.insert(directory.clone(), index);
                    output.dir_names.push(directory.clone());
                    index
                }
            };

            let (mode, content, digest) = match entry.kind() {
                EntryKind::Directory => (S_IFDIR | entry.permissions(), Vec::new(), String::new()),
                EntryKind::File => {
                    let content = entry
                        .read_content()?
                        .ok_or_else(|| Error::MissingContent(path.to_string()))?;
                    let digest = format!("{:x}", md5::compute(&content));
                    (S_IFREG | entry.permissions(), content, digest)
                }
            };
            let size = u32::try_from(content.len())
                .map_err(|_| Error::FileTooLarge(path.to_string()))?;

            trace!("{} -> dir {} ({}), {} bytes", path, dir_index, directory, size);
            output.records.push(FileRecord {
                path: path.to_string(),
                directory,
                base_name,
                dir_index,
                kind: entry.kind(),
                mode,
                size,
                uid: 0,
                gid: 0,
                user: "root".to_string(),
                group: "root".to_string(),
                digest,
                mtime,
                inode: position as u32 + 1,
                payload_path: format!(".{}", path),
                content,
            });
        }

        debug!(
            "file list: {} records, {} directory names",
            output.records.len(),
            output.dir_names.len()
        );
        Ok(output)
    }

    // Returns the records in entry order
    pub fn records(&self) -> &[FileRecord] {
        &self.records
    }

    // Returns the deduplicated directory table
    pub fn dir_names(&self) -> &[String] {
        &self.dir_names
    }

    /// Sum of all file sizes.
    pub fn total_size(&self) -> u64 {
        self.records.iter().map(|record| record.size as u64).sum()
    }
}

/// Splits `/a/b/c` into `("/a/b/", "c")`. Paths directly under the root give
/// `("/", name)`.
pub fn split_path(path: &str) -> (String, String) {
    match path.rfind('/') {
        Some(index) => (path[..=index].to_string(), path[index + 1..].to_string()),
        None => ("/".to_string(), path.to_string()),
    }
}

/// The ordering directories must follow: shallower first, then by name.
pub fn directory_order(a: &str, b: &str) -> std::cmp::Ordering {
    let depth = |path: &str| path.matches('/').count();
    depth(a).cmp(&depth(b)).then_with(|| a.cmp(b))
}

fn assert_directories_sorted(entries: &[Entry]) {
    let directories = entries
        .iter()
        .filter(|entry| entry.kind() == EntryKind::Directory)
        .map(|entry| entry.path())
        .collect::<Vec<_>>();
    for pair in directories.windows(2) {
        assert!(
            directory_order(pair[0], pair[1]).is_lt(),
            "directory {} is out of order before {}",
            pair[0],
            pair[1]
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_paths_at_last_slash() {
        assert_eq!(
            split_path("/opt/demo/demo"),
            ("/opt/demo/".to_string(), "demo".to_string())
        );
        assert_eq!(split_path("/opt"), ("/".to_string(), "opt".to_string()));
    }

    #[test]
    fn orders_directories_by_depth_first() {
        let mut dirs = vec!["/usr/share/applications", "/opt/demo", "/usr", "/opt"];
        dirs.sort_by(|a, b| directory_order(a, b));
        assert_eq!(dirs, vec!["/opt", "/usr", "/opt/demo", "/usr/share/applications"]);
    }

    #[test]
    #[should_panic(expected = "out of order")]
    fn rejects_unsorted_directories() {
        let entries = vec![
            Entry::directory("/opt/demo", 0o755).unwrap(),
            Entry::directory("/opt", 0o755).unwrap(),
        ];
        let _ = FileList::build(&entries, 0);
    }

    #[test]
    fn rejects_duplicate_paths() {
        let entries = vec![
            Entry::file("/opt/demo", 0o644, b"a".to_vec()).unwrap(),
            Entry::file("/opt//demo/", 0o644, b"b".to_vec()).unwrap(),
        ];
        assert!(matches!(
            FileList::build(&entries, 0),
            Err(Error::InvalidPath(path)) if path == "/opt/demo"
        ));
    }
}
