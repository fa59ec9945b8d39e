//! Extension packaging.
//!
//! Materializes extensions into the folder layout the broker loads from its
//! extensions root. Every extension becomes one folder named after its id:
//!
//! ```text
//! <staging>/
//! └── my-extension/
//!     ├── hivemq-extension.xml     (id, name, version, priorities, disabled)
//!     ├── my-extension-1.0.jar     (compiled units + service entry)
//!     └── DISABLED                 (only when disabled on startup)
//! ```
//!
//! Three sources are supported:
//! - [`ExtensionPackager::package`]: a descriptor plus a [`UnitResolver`]
//!   for its compiled units
//! - [`ExtensionPackager::package_project`]: a project built by a
//!   [`BuildProducer`]
//! - [`ExtensionPackager::package_archive`]: a distribution zip whose single
//!   top-level folder is the extension
//!
//! ## Security
//!
//! Archive entries are resolved through `enclosed_name`, so `..` components
//! and absolute paths are rejected. Entry count and total uncompressed size
//! are bounded by [`MAX_ARCHIVE_ENTRIES`] and [`MAX_ARCHIVE_SIZE`].

use crate::constants::{
    validate_extension_id, DISABLED_MARKER_FILE, EXTENSION_MAIN_SERVICE, EXTENSION_METADATA_FILE,
    JAR_MANIFEST_ENTRY, MAX_ARCHIVE_ENTRIES, MAX_ARCHIVE_SIZE, STAGING_DIR, UNIT_FILE_EXTENSION,
};
use crate::error::{Error, Result};
use crate::extension::{ExtensionDescriptor, UnitRef};
use crate::producer::BuildProducer;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, Cursor, Read, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tracing::{debug, info, warn};
use uuid::Uuid;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

// =============================================================================
// Unit Resolution
// =============================================================================

/// One file contributed by a unit, addressed by its path inside the jar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitFile {
    /// Jar entry name, `/`-separated.
    pub entry: String,
    /// File contents.
    pub data: Vec<u8>,
}

/// Resolves a unit reference to the compiled files implementing it.
pub trait UnitResolver {
    /// Returns every file belonging to `unit`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnitNotFound`] if the unit has no compiled file.
    fn resolve(&self, unit: &UnitRef) -> Result<Vec<UnitFile>>;
}

/// Resolves units against a compiled-classes output directory.
///
/// `com.example.Main` maps to `<root>/com/example/Main.class`; nested units
/// (`Main$Inner.class`) in the same directory are included.
#[derive(Debug, Clone)]
pub struct ClassDirResolver {
    root: PathBuf,
}

impl ClassDirResolver {
    /// Creates a resolver rooted at a classes directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the classes directory.
    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl UnitResolver for ClassDirResolver {
    fn resolve(&self, unit: &UnitRef) -> Result<Vec<UnitFile>> {
        let namespace = unit.namespace();
        let simple = unit.simple_name();
        let file_name = format!("{}.{}", simple, UNIT_FILE_EXTENSION);

        let mut dir = self.root.clone();
        for segment in &namespace {
            dir.push(segment);
        }
        let path = dir.join(&file_name);

        let unsafe_segment = |s: &str| s.is_empty() || s == "." || s == ".." || s.contains(['/', '\\']);
        if unsafe_segment(simple) || namespace.iter().any(|s| unsafe_segment(*s)) || !path.is_file() {
            return Err(Error::UnitNotFound {
                unit: unit.to_string(),
                path,
            });
        }

        let prefix: String = namespace.iter().map(|s| format!("{s}/")).collect();
        let mut files = vec![UnitFile {
            entry: format!("{prefix}{file_name}"),
            data: fs::read(&path)?,
        }];

        let nested_prefix = format!("{simple}$");
        let nested_suffix = format!(".{}", UNIT_FILE_EXTENSION);
        let mut nested: Vec<PathBuf> = fs::read_dir(&dir)?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with(&nested_prefix) && n.ends_with(&nested_suffix))
            })
            .collect();
        nested.sort();

        for nested_path in nested {
            if let Some(name) = nested_path.file_name().and_then(|n| n.to_str()) {
                files.push(UnitFile {
                    entry: format!("{prefix}{name}"),
                    data: fs::read(&nested_path)?,
                });
            }
        }

        Ok(files)
    }
}

// =============================================================================
// Packaged Extension
// =============================================================================

/// A deployable extension folder on the host, ready to be mounted.
///
/// When produced by a packager with a system-managed staging directory, the
/// value keeps that directory alive until the last clone is dropped.
#[derive(Debug, Clone)]
pub struct PackagedExtension {
    id: String,
    path: PathBuf,
    digest: Option<String>,
    _staging: Option<Arc<TempDir>>,
}

impl PackagedExtension {
    /// Wraps an existing extension folder; its file name is the id.
    ///
    /// # Errors
    ///
    /// - [`Error::ArtifactMissing`] if `path` is not a directory
    /// - [`Error::InvalidExtensionId`] if the folder name is not a valid id
    pub fn from_dir(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if !path.is_dir() {
            return Err(Error::ArtifactMissing { path });
        }
        let id = folder_id(&path)?;
        Ok(Self {
            id,
            path,
            digest: None,
            _staging: None,
        })
    }

    /// Extension id (the folder name).
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Host path of the extension folder.
    pub fn host_path(&self) -> &Path {
        &self.path
    }

    /// SHA-256 of the packaged code payload or source archive, if known.
    pub fn digest(&self) -> Option<&str> {
        self.digest.as_deref()
    }

    /// Whether the folder carries the disabled marker.
    pub fn is_disabled(&self) -> bool {
        self.path.join(DISABLED_MARKER_FILE).exists()
    }

    /// Path of this extension's folder under a container extensions root.
    pub fn container_path(&self, extensions_root: &str) -> String {
        format!("{}/{}", extensions_root.trim_end_matches('/'), self.id)
    }
}

// =============================================================================
// Extension Packager
// =============================================================================

/// Writes extension folders into a staging directory.
///
/// Output paths are keyed by extension id: packaging different extensions
/// never collides, and packaging the same id again replaces its folder.
#[derive(Debug, Clone)]
pub struct ExtensionPackager {
    /// Staging root.
    root: PathBuf,
    /// Owned temp dir when the root is system-managed.
    managed: Option<Arc<TempDir>>,
}

impl ExtensionPackager {
    /// Creates a packager with a system-managed temporary staging directory.
    ///
    /// The directory is removed once the packager and every
    /// [`PackagedExtension`] it produced are dropped.
    pub fn new() -> Result<Self> {
        let dir = tempfile::Builder::new().prefix("brokerlab-").tempdir()?;
        let root = dir.path().to_path_buf();
        debug!(staging = %root.display(), "Created managed staging directory");
        Ok(Self {
            root,
            managed: Some(Arc::new(dir)),
        })
    }

    /// Creates a packager writing into a caller-supplied directory.
    pub fn with_staging_dir(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            managed: None,
        })
    }

    /// Returns the default persistent staging path (under the user cache).
    pub fn default_staging_dir() -> PathBuf {
        if let Some(cache) = dirs::cache_dir() {
            cache.join(STAGING_DIR)
        } else {
            PathBuf::from(".brokerlab").join("extensions")
        }
    }

    /// Returns the staging root.
    pub fn staging_dir(&self) -> &Path {
        &self.root
    }

    /// Packages a descriptor and its compiled units.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidExtensionId`] if the id is not usable as a folder
    /// - [`Error::UnitNotFound`] if a unit cannot be resolved
    /// - [`Error::Io`] / [`Error::Archive`] on write failures
    pub fn package(
        &self,
        descriptor: &ExtensionDescriptor,
        resolver: &dyn UnitResolver,
    ) -> Result<PackagedExtension> {
        let target = self.extension_dir(descriptor.id())?;

        // Resolve before touching the staging dir so failures leave no folder.
        let jar = build_jar(descriptor, resolver)?;
        let digest = hex::encode(Sha256::digest(&jar));

        replace_dir(&target, |dir| {
            fs::write(dir.join(EXTENSION_METADATA_FILE), render_metadata(descriptor))?;
            fs::write(dir.join(jar_file_name(descriptor)), &jar)?;
            if descriptor.is_disabled_on_startup() {
                fs::write(dir.join(DISABLED_MARKER_FILE), b"")?;
            }
            Ok(())
        })?;

        info!(
            extension = %descriptor.id(),
            version = %descriptor.version(),
            path = %target.display(),
            "Packaged extension"
        );

        Ok(self.packaged(descriptor.id().to_string(), target, Some(digest)))
    }

    /// Builds a project with `producer` and packages its artifact.
    ///
    /// A zip artifact is unpacked like [`package_archive`](Self::package_archive);
    /// a directory artifact is copied like [`package_folder`](Self::package_folder).
    ///
    /// # Errors
    ///
    /// - [`Error::BuildFailed`] if the project is missing or the build fails
    /// - [`Error::ArtifactMissing`] if the build left no artifact
    pub fn package_project(
        &self,
        project: &Path,
        producer: &dyn BuildProducer,
    ) -> Result<PackagedExtension> {
        if !project.is_dir() {
            return Err(Error::BuildFailed {
                producer: producer.name().to_string(),
                project: project.to_path_buf(),
                reason: "project directory does not exist".to_string(),
            });
        }

        let artifact = producer.build(project)?;
        if !artifact.exists() {
            return Err(Error::ArtifactMissing { path: artifact });
        }

        if artifact.is_dir() {
            self.package_folder(&artifact)
        } else {
            self.package_archive(&artifact)
        }
    }

    /// Copies an exploded extension folder into the staging dir.
    pub fn package_folder(&self, folder: &Path) -> Result<PackagedExtension> {
        if !folder.is_dir() {
            return Err(Error::ArtifactMissing {
                path: folder.to_path_buf(),
            });
        }
        let id = folder_id(folder)?;
        let target = self.extension_dir(&id)?;

        let same = match (fs::canonicalize(folder), fs::canonicalize(&target)) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        };
        if !same {
            replace_dir(&target, |dir| copy_dir(folder, dir))?;
        }

        info!(extension = %id, path = %target.display(), "Staged extension folder");
        Ok(self.packaged(id, target, None))
    }

    /// Unpacks an extension distribution zip into the staging dir.
    ///
    /// The archive must contain exactly one top-level folder; its name is
    /// the extension id.
    ///
    /// # Errors
    ///
    /// - [`Error::ArtifactMissing`] if the archive does not exist
    /// - [`Error::PathTraversal`] on entries escaping the archive root
    /// - [`Error::ArchiveTooLarge`] on entry-count or size overflow
    /// - [`Error::InvalidArtifact`] if the layout is not one folder
    pub fn package_archive(&self, archive: &Path) -> Result<PackagedExtension> {
        let data = fs::read(archive).map_err(|_| Error::ArtifactMissing {
            path: archive.to_path_buf(),
        })?;
        let digest = hex::encode(Sha256::digest(&data));
        let mut zip = ZipArchive::new(Cursor::new(data))?;

        if zip.len() > MAX_ARCHIVE_ENTRIES {
            return Err(Error::ArchiveTooLarge {
                size: zip.len() as u64,
                limit: MAX_ARCHIVE_ENTRIES as u64,
            });
        }

        let id = archive_root(&mut zip, archive)?;
        let target = self.extension_dir(&id)?;
        replace_dir(&target, |dir| extract_root(&mut zip, &id, dir, MAX_ARCHIVE_SIZE))?;

        info!(
            extension = %id,
            archive = %archive.display(),
            path = %target.display(),
            "Unpacked extension archive"
        );

        Ok(self.packaged(id, target, Some(digest)))
    }

    /// Returns the folder for `id`, validating the id.
    fn extension_dir(&self, id: &str) -> Result<PathBuf> {
        validate_extension_id(id).map_err(|reason| Error::InvalidExtensionId {
            id: id.to_string(),
            reason: reason.to_string(),
        })?;
        Ok(self.root.join(id))
    }

    fn packaged(&self, id: String, path: PathBuf, digest: Option<String>) -> PackagedExtension {
        PackagedExtension {
            id,
            path,
            digest,
            _staging: self.managed.clone(),
        }
    }
}

// =============================================================================
// Metadata and Jar
// =============================================================================

/// Renders the extension metadata file.
pub fn render_metadata(descriptor: &ExtensionDescriptor) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<hivemq-extension>
    <id>{}</id>
    <name>{}</name>
    <version>{}</version>
    <priority>{}</priority>
    <start-priority>{}</start-priority>
    <disabled>{}</disabled>
</hivemq-extension>
"#,
        xml_escape(descriptor.id()),
        xml_escape(descriptor.name()),
        xml_escape(descriptor.version()),
        descriptor.priority(),
        descriptor.start_priority(),
        descriptor.is_disabled_on_startup(),
    )
}

fn xml_escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}

/// Builds the code payload jar in memory.
fn build_jar(descriptor: &ExtensionDescriptor, resolver: &dyn UnitResolver) -> Result<Vec<u8>> {
    let mut entries: BTreeMap<String, Vec<u8>> = BTreeMap::new();
    let units = std::iter::once(descriptor.main_class()).chain(descriptor.additional_classes());
    for unit in units {
        for file in resolver.resolve(unit)? {
            // Duplicate units contribute one entry.
            entries.entry(file.entry).or_insert(file.data);
        }
    }

    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    zip.start_file(JAR_MANIFEST_ENTRY, options)?;
    zip.write_all(b"Manifest-Version: 1.0\r\nCreated-By: brokerlab\r\n\r\n")?;

    zip.start_file(format!("META-INF/services/{}", EXTENSION_MAIN_SERVICE), options)?;
    zip.write_all(format!("{}\n", descriptor.main_class()).as_bytes())?;

    for (name, data) in &entries {
        zip.start_file(name.as_str(), options)?;
        zip.write_all(data)?;
    }

    Ok(zip.finish()?.into_inner())
}

/// Jar name for a descriptor; version characters outside `[A-Za-z0-9._-]`
/// become `_` so the version never acts as a path segment.
fn jar_file_name(descriptor: &ExtensionDescriptor) -> String {
    let version: String = descriptor
        .version()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("{}-{}.jar", descriptor.id(), version)
}

// =============================================================================
// Filesystem Helpers
// =============================================================================

/// Returns the id of an extension folder (its validated file name).
fn folder_id(path: &Path) -> Result<String> {
    let id = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_string();
    validate_extension_id(&id).map_err(|reason| Error::InvalidExtensionId {
        id: id.clone(),
        reason: reason.to_string(),
    })?;
    Ok(id)
}

/// Finds the single top-level folder of an archive and checks limits.
fn archive_root(zip: &mut ZipArchive<Cursor<Vec<u8>>>, archive: &Path) -> Result<String> {
    let invalid = |reason: &str| Error::InvalidArtifact {
        path: archive.to_path_buf(),
        reason: reason.to_string(),
    };

    let mut root: Option<String> = None;
    let mut total_size = 0u64;

    for i in 0..zip.len() {
        let entry = zip.by_index(i)?;
        let Some(path) = entry.enclosed_name() else {
            return Err(Error::PathTraversal {
                path: entry.name().to_string(),
            });
        };

        total_size = total_size.saturating_add(entry.size());
        if total_size > MAX_ARCHIVE_SIZE {
            return Err(Error::ArchiveTooLarge {
                size: total_size,
                limit: MAX_ARCHIVE_SIZE,
            });
        }

        let mut components = path.components();
        let first = match components.next() {
            Some(Component::Normal(name)) => name.to_string_lossy().to_string(),
            _ => continue,
        };
        if components.next().is_none() && !entry.is_dir() {
            return Err(invalid("file outside of the extension folder"));
        }

        match &root {
            None => root = Some(first),
            Some(existing) if *existing != first => {
                return Err(invalid("more than one top-level folder"));
            }
            Some(_) => {}
        }
    }

    root.ok_or_else(|| invalid("archive is empty"))
}

/// Extracts the entries under `id/` into `dest`.
///
/// Bytes actually read are bounded by `limit`, independent of the sizes the
/// entry headers declare.
fn extract_root(
    zip: &mut ZipArchive<Cursor<Vec<u8>>>,
    id: &str,
    dest: &Path,
    limit: u64,
) -> Result<()> {
    let mut written = 0u64;

    for i in 0..zip.len() {
        let mut entry = zip.by_index(i)?;
        let Some(relative) = entry.enclosed_name() else {
            return Err(Error::PathTraversal {
                path: entry.name().to_string(),
            });
        };
        let Ok(inner) = relative.strip_prefix(id) else {
            continue;
        };
        if inner.as_os_str().is_empty() {
            continue;
        }
        let out = dest.join(inner);

        if entry.is_dir() {
            fs::create_dir_all(&out)?;
            continue;
        }
        if let Some(parent) = out.parent() {
            fs::create_dir_all(parent)?;
        }
        let remaining = limit.saturating_sub(written);
        let mut file = File::create(&out)?;
        let copied = io::copy(&mut (&mut entry).take(remaining + 1), &mut file)?;
        if copied > remaining {
            return Err(Error::ArchiveTooLarge {
                size: written + copied,
                limit,
            });
        }
        written += copied;
    }
    Ok(())
}

/// Fills a scratch folder next to `target`, then swaps it into place.
///
/// On failure the scratch folder is removed and any previous `target` is
/// left as it was.
fn replace_dir(target: &Path, fill: impl FnOnce(&Path) -> Result<()>) -> Result<()> {
    let name = target
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("extension");
    let scratch = target.with_file_name(format!(".{}.{}", name, Uuid::now_v7().simple()));
    fs::create_dir_all(&scratch)?;

    if let Err(e) = fill(&scratch).and_then(|()| swap_dir(&scratch, target)) {
        if let Err(cleanup) = fs::remove_dir_all(&scratch) {
            warn!(path = %scratch.display(), error = %cleanup, "Failed to remove scratch folder");
        }
        return Err(e);
    }
    Ok(())
}

/// Moves a filled scratch folder over `target`.
fn swap_dir(scratch: &Path, target: &Path) -> Result<()> {
    if target.exists() {
        debug!(path = %target.display(), "Replacing existing extension folder");
        fs::remove_dir_all(target)?;
    }
    fs::rename(scratch, target)?;
    Ok(())
}

/// Recursively copies regular files and directories.
fn copy_dir(src: &Path, dst: &Path) -> Result<()> {
    fs::create_dir_all(dst)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let target = dst.join(entry.file_name());
        if file_type.is_dir() {
            copy_dir(&entry.path(), &target)?;
        } else if file_type.is_file() {
            fs::copy(entry.path(), &target)?;
        } else {
            warn!(path = %entry.path().display(), "Skipping non-regular file");
        }
    }
    Ok(())
}
