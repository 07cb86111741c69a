//! Zip archive I/O and metadata lookup.

use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use zip::CompressionMethod;
use zip::write::FileOptions;

use crate::container::error::{ContainerError, ContainerResult};
use crate::container::href_of;

/// Name of the entry that must come first, uncompressed.
const MIMETYPE: &str = "mimetype";

/// Title and author as declared in the package metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookMetadata {
    pub title: Option<String>,
    pub author: Option<String>,
}

/// Extract `archive` into `dir`, replacing anything already there.
pub fn unpack(archive: &Path, dir: &Path) -> ContainerResult<()> {
    if dir.exists() {
        std::fs::remove_dir_all(dir).map_err(|e| ContainerError::io(dir, e))?;
    }
    std::fs::create_dir_all(dir).map_err(|e| ContainerError::io(dir, e))?;

    let file = File::open(archive).map_err(|e| ContainerError::io(archive, e))?;
    let mut zip = zip::ZipArchive::new(file).map_err(|e| zip_error(archive, e))?;
    zip.extract(dir).map_err(|e| zip_error(archive, e))?;
    tracing::debug!(archive = %archive.display(), entries = zip.len(), "unpacked");
    Ok(())
}

/// Pack `dir` into `archive`: `mimetype` first and stored, the rest deflated
/// in sorted path order.
pub fn pack(dir: &Path, archive: &Path) -> ContainerResult<()> {
    let mimetype = dir.join(MIMETYPE);
    if !mimetype.is_file() {
        return Err(ContainerError::Structure {
            path: dir.display().to_string(),
            message: "missing mimetype file".into(),
        });
    }

    if let Some(parent) = archive.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| ContainerError::io(parent, e))?;
    }
    let file = File::create(archive).map_err(|e| ContainerError::io(archive, e))?;
    let mut zip = zip::ZipWriter::new(file);

    let stored = FileOptions::default().compression_method(CompressionMethod::Stored);
    let deflated = FileOptions::default().compression_method(CompressionMethod::Deflated);

    let mut files = Vec::new();
    collect_files(dir, &mut files)?;

    add_entry(&mut zip, archive, MIMETYPE, &mimetype, stored)?;
    let mut count = 1;
    for path in files {
        let name = entry_name(dir, &path);
        if name == MIMETYPE {
            continue;
        }
        add_entry(&mut zip, archive, &name, &path, deflated)?;
        count += 1;
    }
    zip.finish().map_err(|e| zip_error(archive, e))?;

    tracing::debug!(archive = %archive.display(), entries = count, "packed");
    Ok(())
}

/// Read title and author from the archive's package metadata.
pub fn read_metadata(archive: &Path) -> ContainerResult<BookMetadata> {
    let doc = epub::doc::EpubDoc::new(archive).map_err(|e| ContainerError::Metadata {
        path: archive.display().to_string(),
        message: e.to_string(),
    })?;
    Ok(BookMetadata {
        title: doc.mdata("title").map(|m| m.value.clone()),
        author: doc.mdata("creator").map(|m| m.value.clone()),
    })
}

fn add_entry(
    zip: &mut zip::ZipWriter<File>,
    archive: &Path,
    name: &str,
    source: &Path,
    options: FileOptions,
) -> ContainerResult<()> {
    let mut bytes = Vec::new();
    File::open(source)
        .and_then(|mut f| f.read_to_end(&mut bytes))
        .map_err(|e| ContainerError::io(source, e))?;
    zip.start_file(name, options)
        .map_err(|e| zip_error(archive, e))?;
    zip.write_all(&bytes).map_err(|e| ContainerError::io(archive, e))
}

/// Every regular file under `dir`, depth-first in sorted order.
fn collect_files(dir: &Path, out: &mut Vec<PathBuf>) -> ContainerResult<()> {
    let mut entries: Vec<PathBuf> = std::fs::read_dir(dir)
        .map_err(|e| ContainerError::io(dir, e))?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<Result<_, _>>()
        .map_err(|e| ContainerError::io(dir, e))?;
    entries.sort();

    for path in entries {
        if path.is_dir() {
            collect_files(&path, out)?;
        } else if path.is_file() {
            out.push(path);
        }
    }
    Ok(())
}

/// Archive entry name: path relative to `root`, `/`-separated.
fn entry_name(root: &Path, path: &Path) -> String {
    href_of(path.strip_prefix(root).unwrap_or(path))
}

fn zip_error(archive: &Path, e: zip::result::ZipError) -> ContainerError {
    ContainerError::Zip {
        path: archive.display().to_string(),
        message: e.to_string(),
    }
}
