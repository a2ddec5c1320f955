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

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
#[cfg(unix)]
use std::os::unix::fs::MetadataExt;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// Represents the architectures a package can be built for. The lead codes
// follow the `arch_canon` table from rpmrc.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Architecture {
    X86_64,
    I686,
    Aarch64,
    Armv7hl,
    Ppc64le,
    S390x,
    Riscv64,
}

impl Architecture {
    // Converts Architecture to the string RPM stores in RPMTAG_ARCH
    pub fn as_str(&self) -> &'static str {
        match self {
            Architecture::X86_64 => "x86_64",
            Architecture::I686 => "i686",
            Architecture::Aarch64 => "aarch64",
            Architecture::Armv7hl => "armv7hl",
            Architecture::Ppc64le => "ppc64le",
            Architecture::S390x => "s390x",
            Architecture::Riscv64 => "riscv64",
        }
    }

    // Converts &str to Architecture, accepting the usual aliases
    pub fn from(input: &str) -> Result<Self> {
        match input {
            "x86_64" | "x64" | "amd64" => Ok(Architecture::X86_64),
            "i686" | "i386" | "x86" => Ok(Architecture::I686),
            "aarch64" | "arm64" => Ok(Architecture::Aarch64),
            "armv7hl" | "arm" | "armhf" => Ok(Architecture::Armv7hl),
            "ppc64le" => Ok(Architecture::Ppc64le),
            "s390x" => Ok(Architecture::S390x),
            "riscv64" => Ok(Architecture::Riscv64),
            &_ => Err(Error::UnsupportedArchitecture(input.to_string())),
        }
    }

    // The archnum written into the lead
    pub fn lead_code(&self) -> u16 {
        match self {
            Architecture::X86_64 | Architecture::I686 => 1,
            Architecture::Armv7hl => 12,
            Architecture::S390x => 15,
            Architecture::Ppc64le => 16,
            Architecture::Aarch64 => 19,
            Architecture::Riscv64 => 22,
        }
    }
}

impl TryFrom<String> for Architecture {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Architecture::from(&value)
    }
}

impl From<Architecture> for String {
    fn from(arch: Architecture) -> Self {
        arch.as_str().to_string()
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque access to the bytes of a file.
///
/// The encoder never touches the filesystem itself; every file's content is
/// pulled through this trait, so packages can be built from in-memory trees as
/// easily as from a directory on disk. A failed read aborts the build.
pub trait ByteSource: Send + Sync + fmt::Debug {
    fn read_bytes(&self) -> io::Result<Vec<u8>>;
}

impl ByteSource for Vec<u8> {
    fn read_bytes(&self) -> io::Result<Vec<u8>> {
        Ok(self.clone())
    }
}

impl ByteSource for &'static [u8] {
    fn read_bytes(&self) -> io::Result<Vec<u8>> {
        Ok(self.to_vec())
    }
}

impl ByteSource for String {
    fn read_bytes(&self) -> io::Result<Vec<u8>> {
        Ok(self.as_bytes().to_vec())
    }
}

/// A file on disk, read only when its content is needed.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl ByteSource for FileSource {
    fn read_bytes(&self) -> io::Result<Vec<u8>> {
        fs::read(&self.path)
    }
}

/// One file of an application tree, addressed relative to the tree's root.
#[derive(Debug, Clone)]
pub struct Resource {
    relative_path: String,
    permissions: u32,
    content: Arc<dyn ByteSource>,
}

impl Resource {
    pub fn new<S: ByteSource + 'static>(relative_path: &str, permissions: u32, content: S) -> Self {
        Self {
            relative_path: relative_path.to_string(),
            permissions: permissions & 0o7777,
            content: Arc::new(content),
        }
    }

    // Returns the resource's path relative to the tree root
    pub fn relative_path(&self) -> &str {
        &self.relative_path
    }

    // Returns the resource's permission bits
    pub fn permissions(&self) -> u32 {
        self.permissions
    }

    // Returns the resource's content source
    pub fn content(&self) -> &Arc<dyn ByteSource> {
        &self.content
    }
}

/// The application's published file tree.
pub trait FileTree {
    fn resources(&self) -> Result<Vec<Resource>>;
}

/// A file tree held entirely in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryTree {
    resources: Vec<Resource>,
}

impl MemoryTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a file at `relative_path`.
    pub fn with_file<S: ByteSource + 'static>(
        mut self,
        relative_path: &str,
        permissions: u32,
        content: S,
    ) -> Self {
        self.resources
            .push(Resource::new(relative_path, permissions, content));
        self
    }

    /// Adds an already constructed resource.
    pub fn with_resource(mut self, resource: Resource) -> Self {
        self.resources.push(resource);
        self
    }
}

impl FileTree for MemoryTree {
    fn resources(&self) -> Result<Vec<Resource>> {
        Ok(self.resources.clone())
    }
}

/// A file tree backed by a directory on disk.
///
/// Only regular files are collected; their contents are read lazily through
/// [`FileSource`].
#[derive(Debug, Clone)]
pub struct DirectoryTree {
    root: PathBuf,
}

impl DirectoryTree {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }
}

impl FileTree for DirectoryTree {
    fn resources(&self) -> Result<Vec<Resource>> {
        let mut output = Vec::new();
        // Symlinks are packaged as the files they point to
        let walker = walkdir::WalkDir::new(&self.root)
            .follow_links(true)
            .sort_by_file_name();
        for file_result in walker {
            let file = file_result.map_err(io::Error::from)?;
            if file.file_type().is_dir() {
                continue;
            }
            if !file.file_type().is_file() {
                return Err(Error::InvalidPath(file.path().display().to_string()));
            }
            // Cutting the root directory out of the path
            let relative = match file.path().strip_prefix(&self.root) {
                Ok(path) => path,
                Err(_) => return Err(Error::InvalidPath(file.path().display().to_string())),
            };
            let mut components = Vec::new();
            for component in relative.components() {
                match component.as_os_str().to_str() {
                    Some(name) => components.push(name),
                    None => return Err(Error::InvalidPath(file.path().display().to_string())),
                }
            }
            output.push(Resource::new(
                &components.join("/"),
                file_permissions(&file.metadata().map_err(io::Error::from)?),
                FileSource::new(file.path()),
            ));
        }
        Ok(output)
    }
}

#[cfg(unix)]
fn file_permissions(metadata: &fs::Metadata) -> u32 {
    metadata.mode() & 0o7777
}

// Windows has no file modes, so everything is rw-r--r--
#[cfg(windows)]
fn file_permissions(_metadata: &fs::Metadata) -> u32 {
    0o644
}

/// An icon installed at a fixed absolute path, e.g.
/// `/usr/share/icons/hicolor/64x64/apps/<name>.png`.
#[derive(Debug, Clone)]
pub struct Icon {
    path: String,
    content: Arc<dyn ByteSource>,
}

impl Icon {
    pub fn new<S: ByteSource + 'static>(path: &str, content: S) -> Self {
        Self {
            path: path.to_string(),
            content: Arc::new(content),
        }
    }

    // Returns the icon's install path
    pub fn path(&self) -> &str {
        &self.path
    }

    // Returns the icon's content source
    pub fn content(&self) -> &Arc<dyn ByteSource> {
        &self.content
    }
}

/// Describes the package being built.
///
/// Every field has a sensible default, so a manifest only has to name what
/// differs. Empty `summary`, `description` and `executable` fall back to the
/// package name (or summary) when read.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PackageMetadata {
    name: String,
    version: String,
    release: String,
    architecture: Architecture,
    summary: String,
    description: String,
    license: String,
    homepage: String,
    vendor: String,
    maintainer: String,
    group: String,
    build_host: String,
    executable: String,
    installed_size: Option<u64>,
    modified: DateTime<Utc>,
    #[serde(skip)]
    icons: Vec<Icon>,
}

impl Default for PackageMetadata {
    fn default() -> Self {
        Self {
            name: String::new(),
            version: String::new(),
            release: "1".to_string(),
            architecture: Architecture::X86_64,
            summary: String::new(),
            description: String::new(),
            license: "Unknown".to_string(),
            homepage: String::new(),
            vendor: String::new(),
            maintainer: String::new(),
            group: "Unspecified".to_string(),
            build_host: "localhost".to_string(),
            executable: String::new(),
            installed_size: None,
            modified: DateTime::<Utc>::default(),
            icons: Vec::new(),
        }
    }
}

impl PackageMetadata {
    /// Creates metadata for package `name`, stamped with the current time.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            modified: Utc::now(),
            ..Self::default()
        }
    }

    /// Sets the package's name.
    pub fn set_name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    /// Sets the package's version.
    pub fn set_version(mut self, version: &str) -> Self {
        self.version = version.to_string();
        self
    }

    /// Sets the package's release.
    pub fn set_release(mut self, release: &str) -> Self {
        self.release = release.to_string();
        self
    }

    /// Sets the package's architecture.
    pub fn set_architecture(mut self, architecture: Architecture) -> Self {
        self.architecture = architecture;
        self
    }

    /// Sets the package's one-line summary.
    pub fn set_summary(mut self, summary: &str) -> Self {
        self.summary = summary.to_string();
        self
    }

    /// Sets the package's description.
    pub fn set_description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    /// Sets the package's license.
    pub fn set_license(mut self, license: &str) -> Self {
        self.license = license.to_string();
        self
    }

    /// Sets the package's homepage.
    pub fn set_homepage(mut self, homepage: &str) -> Self {
        self.homepage = homepage.to_string();
        self
    }

    /// Sets the package's vendor.
    pub fn set_vendor(mut self, vendor: &str) -> Self {
        self.vendor = vendor.to_string();
        self
    }

    /// Sets the package's maintainer, written as the RPM packager.
    pub fn set_maintainer(mut self, maintainer: &str) -> Self {
        self.maintainer = maintainer.to_string();
        self
    }

    /// Sets the package's group (section).
    pub fn set_group(mut self, group: &str) -> Self {
        self.group = group.to_string();
        self
    }

    /// Sets the host name recorded as the build host.
    pub fn set_build_host(mut self, build_host: &str) -> Self {
        self.build_host = build_host.to_string();
        self
    }

    /// Sets the main executable, relative to the application tree.
    pub fn set_executable(mut self, executable: &str) -> Self {
        self.executable = executable.to_string();
        self
    }

    /// Overrides the computed installed size.
    pub fn set_installed_size(mut self, size: u64) -> Self {
        self.installed_size = Some(size);
        self
    }

    /// Sets the timestamp used for every file and for the build time.
    pub fn set_modified(mut self, modified: DateTime<Utc>) -> Self {
        self.modified = modified;
        self
    }

    /// Adds an icon.
    pub fn with_icon(mut self, icon: Icon) -> Self {
        self.icons.push(icon);
        self
    }

    /// Returns the package's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the package's version.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Returns the package's release.
    pub fn release(&self) -> &str {
        &self.release
    }

    /// Returns the package's architecture.
    pub fn architecture(&self) -> Architecture {
        self.architecture
    }

    /// Returns the package's summary.
    pub fn summary(&self) -> &str {
        if self.summary.is_empty() {
            &self.name
        } else {
            &self.summary
        }
    }

    /// Returns the package's description.
    pub fn description(&self) -> &str {
        if self.description.is_empty() {
            self.summary()
        } else {
            &self.description
        }
    }

    /// Returns the package's license.
    pub fn license(&self) -> &str {
        &self.license
    }

    /// Returns the package's homepage.
    pub fn homepage(&self) -> &str {
        &self.homepage
    }

    /// Returns the package's vendor.
    pub fn vendor(&self) -> &str {
        &self.vendor
    }

    /// Returns the package's maintainer.
    pub fn maintainer(&self) -> &str {
        &self.maintainer
    }

    /// Returns the package's group.
    pub fn group(&self) -> &str {
        &self.group
    }

    /// Returns the build host.
    pub fn build_host(&self) -> &str {
        &self.build_host
    }

    /// Returns the main executable's relative path.
    pub fn executable(&self) -> &str {
        if self.executable.is_empty() {
            &self.name
        } else {
            &self.executable
        }
    }

    /// Returns the installed size override, if any.
    pub fn installed_size(&self) -> Option<u64> {
        self.installed_size
    }

    /// Returns the package's modification time.
    pub fn modified(&self) -> DateTime<Utc> {
        self.modified
    }

    /// Returns the package's icons.
    pub fn icons(&self) -> &[Icon] {
        &self.icons
    }

    /// Returns `name-version-release`, as written into the lead.
    pub fn full_name(&self) -> String {
        format!("{}-{}-{}", self.name, self.version, self.release)
    }

    /// Checks the fields RPM is strict about.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidMetadata`] if the name has characters RPM
    /// rejects, or if the version or release is empty or contains a dash or
    /// whitespace.
    pub fn validate(&self) -> Result<()> {
        let name_regex = Regex::new(r"^[A-Za-z0-9._+-]+$")
            .map_err(|e| Error::InvalidMetadata(e.to_string()))?;
        if !name_regex.is_match(&self.name) {
            return Err(Error::InvalidMetadata(format!(
                "package name {:?} is invalid",
                self.name
            )));
        }
        for (field, value) in [("version", &self.version), ("release", &self.release)] {
            if value.is_empty() || value.contains('-') || value.contains(char::is_whitespace) {
                return Err(Error::InvalidMetadata(format!(
                    "{} {:?} is invalid",
                    field, value
                )));
            }
        }
        Ok(())
    }
}

// Whether an entry is a regular file or a directory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
}

/// A file or directory at an absolute path inside the package.
#[derive(Debug, Clone)]
pub struct Entry {
    path: String,
    permissions: u32,
    content: Option<Arc<dyn ByteSource>>,
    kind: EntryKind,
}

impl Entry {
    /// Creates an entry, normalizing `path`.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::MissingContent`] for a file without content and with
    /// [`Error::InvalidPath`] if `path` can't be normalized. Content given for a
    /// directory is dropped.
    pub fn new(
        kind: EntryKind,
        path: &str,
        permissions: u32,
        content: Option<Arc<dyn ByteSource>>,
    ) -> Result<Self> {
        let path = normalize_path(path)?;
        let content = match kind {
            EntryKind::File => match content {
                Some(content) => Some(content),
                None => return Err(Error::MissingContent(path)),
            },
            EntryKind::Directory => None,
        };
        Ok(Self {
            path,
            permissions: permissions & 0o7777,
            content,
            kind,
        })
    }

    /// Creates a file entry.
    pub fn file<S: ByteSource + 'static>(path: &str, permissions: u32, content: S) -> Result<Self> {
        Self::new(
            EntryKind::File,
            path,
            permissions,
            Some(Arc::new(content)),
        )
    }

    /// Creates a directory entry.
    pub fn directory(path: &str, permissions: u32) -> Result<Self> {
        Self::new(EntryKind::Directory, path, permissions, None)
    }

    // Returns the entry's normalized absolute path
    pub fn path(&self) -> &str {
        &self.path
    }

    // Returns the entry's permission bits
    pub fn permissions(&self) -> u32 {
        self.permissions
    }

    // Returns the entry's kind
    pub fn kind(&self) -> EntryKind {
        self.kind
    }

    // Returns the entry's content source, None for directories
    pub fn content(&self) -> Option<&Arc<dyn ByteSource>> {
        self.content.as_ref()
    }

    /// Reads the entry's content. Directories have none.
    pub fn read_content(&self) -> Result<Option<Vec<u8>>> {
        match &self.content {
            Some(source) => source
                .read_bytes()
                .map(Some)
                .map_err(|source| Error::ContentRead {
                    path: self.path.clone(),
                    source,
                }),
            None => Ok(None),
        }
    }
}

/// Normalizes an absolute package path.
///
/// Repeated slashes collapse and a trailing slash is dropped; the root stays
/// `/`. Relative paths, `.` and `..` components and NUL bytes are rejected.
pub fn normalize_path(path: &str) -> Result<String> {
    if !path.starts_with('/') || path.contains('\0') {
        return Err(Error::InvalidPath(path.to_string()));
    }
    let mut components = Vec::new();
    for component in path.split('/').filter(|c| !c.is_empty()) {
        if component == "." || component == ".." {
            return Err(Error::InvalidPath(path.to_string()));
        }
        components.push(component);
    }
    Ok(format!("/{}", components.join("/")))
}
