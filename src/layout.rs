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

//! Lays an application tree out as an installable file system.
//!
//! The application lands under `/opt/<name>`, with a launcher in `/usr/bin`
//! and a desktop entry in `/usr/share/applications`. Every ancestor
//! directory of every file is emitted as a directory entry ahead of the
//! files.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use log::debug;

use crate::error::{Error, Result};
use crate::filelist::directory_order;
use crate::shared::*;

const DEFAULT_DESKTOP_TEMPLATE: &str = "[Desktop Entry]
Type=Application
Name={name}
Comment={summary}
Exec={exec}
Icon={icon}
Terminal=false
Categories=Utility;
";

/// Builds the ordered entry list for a package.
#[derive(Debug)]
pub struct LayoutBuilder<'a> {
    metadata: &'a PackageMetadata,
    desktop_template: String,
}

impl<'a> LayoutBuilder<'a> {
    pub fn new(metadata: &'a PackageMetadata) -> Self {
        Self {
            metadata,
            desktop_template: DEFAULT_DESKTOP_TEMPLATE.to_string(),
        }
    }

    /// Replaces the desktop entry template.
    ///
    /// `{name}`, `{summary}`, `{exec}`, `{icon}` and `{group}` are substituted.
    pub fn with_desktop_template(mut self, template: &str) -> Self {
        self.desktop_template = template.to_string();
        self
    }

    /// Returns the directory the application is installed to.
    pub fn install_root(&self) -> String {
        format!("/opt/{}", self.metadata.name())
    }

    /// Lays out `tree`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingExecutable`] if the tree doesn't contain the
    /// metadata's executable, and [`Error::InvalidPath`] for paths that don't
    /// normalize or that appear twice.
    pub fn build<T: FileTree + ?Sized>(&self, tree: &T) -> Result<Vec<Entry>> {
        let root = self.install_root();
        let executable = normalize_path(&format!("{}/{}", root, self.metadata.executable()))?;

        let mut files = Vec::new();
        let mut found_executable = false;
        for resource in tree.resources()? {
            let path = normalize_path(&format!("{}/{}", root, resource.relative_path()))?;
            let mut permissions = resource.permissions();
            if path == executable {
                found_executable = true;
                permissions |= 0o755;
            }
            files.push(Entry::new(
                EntryKind::File,
                &path,
                permissions,
                Some(resource.content().clone()),
            )?);
        }
        if !found_executable {
            return Err(Error::MissingExecutable(
                self.metadata.executable().to_string(),
            ));
        }
        files.sort_by(|a, b| a.path().cmp(b.path()));

        let name = self.metadata.name();
        files.push(Entry::file(
            &format!("/usr/share/applications/{}.desktop", name),
            0o644,
            self.desktop_entry(&executable),
        )?);
        files.push(Entry::file(
            &format!("/usr/bin/{}", name),
            0o755,
            launcher_script(&executable),
        )?);
        for icon in self.metadata.icons() {
            files.push(Entry::new(
                EntryKind::File,
                icon.path(),
                0o644,
                Some(Arc::clone(icon.content())),
            )?);
        }

        let mut seen = HashSet::new();
        for file in &files {
            if !seen.insert(file.path()) {
                return Err(Error::InvalidPath(file.path().to_string()));
            }
        }

        let mut directories = parent_directories(files.iter().map(|file| file.path()))
            .into_iter()
            .collect::<Vec<_>>();
        directories.sort_by(|a, b| directory_order(a, b));

        debug!(
            "layout: {} files, {} directories under {}",
            files.len(),
            directories.len(),
            root
        );

        let mut output = Vec::with_capacity(directories.len() + files.len());
        for directory in directories {
            output.push(Entry::directory(&directory, 0o755)?);
        }
        output.append(&mut files);
        Ok(output)
    }

    // Renders the desktop entry for the absolute executable path
    fn desktop_entry(&self, executable: &str) -> String {
        let icon = match self.metadata.icons().first() {
            Some(icon) => icon.path(),
            None => self.metadata.name(),
        };
        self.desktop_template
            .replace("{name}", self.metadata.name())
            .replace("{summary}", self.metadata.summary())
            .replace("{exec}", executable)
            .replace("{icon}", icon)
            .replace("{group}", self.metadata.group())
    }
}

/// The shell script installed as `/usr/bin/<name>`.
pub fn launcher_script(executable: &str) -> String {
    format!("#!/bin/sh\nexec \"{}\" \"$@\"\n", executable)
}

/// Every ancestor directory of `paths`, excluding the root.
pub fn parent_directories<'p, I>(paths: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = &'p str>,
{
    let mut output = BTreeSet::new();
    for path in paths {
        let mut current = path;
        while let Some(index) = current.rfind('/') {
            current = &current[..index];
            if current.is_empty() || !output.insert(current.to_string()) {
                break;
            }
        }
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata() -> PackageMetadata {
        PackageMetadata::new("demo")
            .set_version("1.0")
            .set_summary("A demo")
    }

    #[test]
    fn collects_each_ancestor_once() {
        let dirs = parent_directories(["/opt/demo/lib/a.so", "/opt/demo/demo", "/usr/bin/demo"]);
        let dirs = dirs.iter().map(String::as_str).collect::<Vec<_>>();
        assert_eq!(
            dirs,
            vec!["/opt", "/opt/demo", "/opt/demo/lib", "/usr", "/usr/bin"]
        );
    }

    #[test]
    fn lays_out_application_launcher_and_desktop_entry() -> Result<()> {
        let metadata = metadata();
        let tree = MemoryTree::new()
            .with_file("demo", 0o644, b"\x7fELF".to_vec())
            .with_file("lib/libdemo.so", 0o644, b"lib".to_vec());
        let entries = LayoutBuilder::new(&metadata).build(&tree)?;

        let listing = entries
            .iter()
            .map(|entry| (entry.kind(), entry.path()))
            .collect::<Vec<_>>();
        assert_eq!(
            listing,
            vec![
                (EntryKind::Directory, "/opt"),
                (EntryKind::Directory, "/usr"),
                (EntryKind::Directory, "/opt/demo"),
                (EntryKind::Directory, "/usr/bin"),
                (EntryKind::Directory, "/usr/share"),
                (EntryKind::Directory, "/opt/demo/lib"),
                (EntryKind::Directory, "/usr/share/applications"),
                (EntryKind::File, "/opt/demo/demo"),
                (EntryKind::File, "/opt/demo/lib/libdemo.so"),
                (EntryKind::File, "/usr/share/applications/demo.desktop"),
                (EntryKind::File, "/usr/bin/demo"),
            ]
        );

        // the main executable is made executable
        assert_eq!(entries[7].permissions(), 0o755);
        assert_eq!(entries[8].permissions(), 0o644);

        let launcher = String::from_utf8(entries[10].read_content()?.unwrap_or_default())
            .map_err(|e| Error::InvalidMetadata(e.to_string()))?;
        assert_eq!(launcher, "#!/bin/sh\nexec \"/opt/demo/demo\" \"$@\"\n");

        let desktop = String::from_utf8(entries[9].read_content()?.unwrap_or_default())
            .map_err(|e| Error::InvalidMetadata(e.to_string()))?;
        assert!(desktop.contains("Exec=/opt/demo/demo\n"));
        assert!(desktop.contains("Comment=A demo\n"));
        Ok(())
    }

    #[test]
    fn places_icons_and_uses_custom_template() -> Result<()> {
        let metadata = metadata().with_icon(Icon::new(
            "/usr/share/icons/hicolor/64x64/apps/demo.png",
            b"png".to_vec(),
        ));
        let tree = MemoryTree::new().with_file("demo", 0o755, b"bin".to_vec());
        let entries = LayoutBuilder::new(&metadata)
            .with_desktop_template("{name}|{exec}|{icon}|{group}")
            .build(&tree)?;

        let desktop = entries
            .iter()
            .find(|entry| entry.path().ends_with(".desktop"))
            .and_then(|entry| entry.read_content().ok().flatten())
            .unwrap_or_default();
        assert_eq!(
            desktop,
            b"demo|/opt/demo/demo|/usr/share/icons/hicolor/64x64/apps/demo.png|Unspecified"
        );
        assert!(entries
            .iter()
            .any(|entry| entry.path() == "/usr/share/icons/hicolor/64x64/apps"
                && entry.kind() == EntryKind::Directory));
        Ok(())
    }

    #[test]
    fn fails_without_executable() {
        let metadata = metadata().set_executable("bin/demo");
        let tree = MemoryTree::new().with_file("demo", 0o755, b"bin".to_vec());
        match LayoutBuilder::new(&metadata).build(&tree) {
            Err(Error::MissingExecutable(name)) => assert_eq!(name, "bin/demo"),
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn rejects_escaping_paths() {
        let metadata = metadata();
        let tree = MemoryTree::new()
            .with_file("demo", 0o755, b"bin".to_vec())
            .with_file("../etc/passwd", 0o644, b"x".to_vec());
        assert!(matches!(
            LayoutBuilder::new(&metadata).build(&tree),
            Err(Error::InvalidPath(_))
        ));
    }
}
