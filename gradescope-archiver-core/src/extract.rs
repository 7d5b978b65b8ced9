//! In-place archive unpacking with a bounded recursion depth.
//!
//! A downloaded archive is unpacked into the directory that holds it and then
//! deleted. Every regular file the archive produced is inspected in turn, so
//! an archive nested at any path inside the first one is also unpacked, as
//! long as the depth budget allows. Once an archive is gone, running the
//! extractor again is a no-op.

use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::{ArchiveError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    Zip,
    Tar,
    TarGz,
    Tgz,
    TarBz2,
}

impl ArchiveKind {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            ".zip" => Some(ArchiveKind::Zip),
            ".tar" => Some(ArchiveKind::Tar),
            ".tar.gz" => Some(ArchiveKind::TarGz),
            ".tgz" => Some(ArchiveKind::Tgz),
            ".tar.bz2" => Some(ArchiveKind::TarBz2),
            _ => None,
        }
    }

    pub fn detect(path: &Path) -> Option<Self> {
        Self::from_extension(&full_extension(path))
    }
}

/// Lower-cased extension including the compound `.tar.gz` / `.tar.bz2`
/// suffixes. Empty when the name has no extension.
pub fn full_extension(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    for compound in [".tar.gz", ".tar.bz2"] {
        if name.ends_with(compound) {
            return compound.to_string();
        }
    }
    Path::new(&name)
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_default()
}

#[derive(Debug, Clone)]
pub struct Extractor {
    max_depth: usize,
}

impl Extractor {
    /// `max_depth` is the number of nested levels unpacked below the archive
    /// handed to [`Extractor::extract_if_archive`]; 0 disables recursion.
    pub fn new(max_depth: usize) -> Self {
        Self { max_depth }
    }

    /// Unpack `path` if it is a recognised archive. Returns the directory it
    /// was extracted into, or `None` when it was not an archive or extraction
    /// failed (the failure is logged and the file stays where it was).
    pub fn extract_if_archive(&self, path: &Path) -> Option<PathBuf> {
        self.extract_at_depth(path, 0)
    }

    fn extract_at_depth(&self, path: &Path, depth: usize) -> Option<PathBuf> {
        if depth > self.max_depth {
            debug!(path = %path.display(), depth, "Depth budget exhausted, leaving archive intact");
            return None;
        }
        let kind = ArchiveKind::detect(path)?;
        match extract(path, kind) {
            Ok(produced) => {
                let dest = path.parent().map(Path::to_path_buf).unwrap_or_default();
                for item in produced.iter().filter(|p| p.is_file()) {
                    self.extract_at_depth(item, depth + 1);
                }
                Some(dest)
            }
            Err(e) => {
                warn!(error = %e, path = %path.display(), "Extraction failed, keeping original file");
                None
            }
        }
    }
}

/// Unpack one archive into its own directory and delete it. Returns every
/// regular file the archive produced.
pub fn extract(path: &Path, kind: ArchiveKind) -> Result<Vec<PathBuf>> {
    let dest = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    info!(path = %path.display(), ?kind, "Detected archive, extracting");

    let produced = unpack(path, kind, &dest).map_err(|e| ArchiveError::Extraction {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    // An entry sharing the archive's own name has already replaced it.
    if !produced.iter().any(|p| p == path) {
        fs::remove_file(path)?;
    }
    info!(path = %path.display(), files = produced.len(), "Extracted archive");
    Ok(produced)
}

fn unpack(path: &Path, kind: ArchiveKind, dest: &Path) -> io::Result<Vec<PathBuf>> {
    let file = File::open(path)?;
    match kind {
        ArchiveKind::Zip => unpack_zip(file, dest),
        ArchiveKind::Tar => unpack_tar(BufReader::new(file), dest),
        ArchiveKind::TarGz | ArchiveKind::Tgz => {
            unpack_tar(flate2::read::GzDecoder::new(BufReader::new(file)), dest)
        }
        ArchiveKind::TarBz2 => unpack_tar(bzip2::read::BzDecoder::new(BufReader::new(file)), dest),
    }
}

fn unpack_zip(file: File, dest: &Path) -> io::Result<Vec<PathBuf>> {
    let mut zip = zip::ZipArchive::new(file).map_err(to_io)?;
    let mut produced = Vec::new();
    for i in 0..zip.len() {
        let mut entry = zip.by_index(i).map_err(to_io)?;
        let Some(relative) = entry.enclosed_name().map(Path::to_path_buf) else {
            warn!(entry = entry.name(), "Skipping zip entry with unsafe path");
            continue;
        };
        let outpath = dest.join(relative);
        if entry.is_dir() {
            fs::create_dir_all(&outpath)?;
            continue;
        }
        if let Some(parent) = outpath.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut outfile = File::create(&outpath)?;
        io::copy(&mut entry, &mut outfile)?;
        produced.push(outpath);
    }
    Ok(produced)
}

fn unpack_tar<R: Read>(reader: R, dest: &Path) -> io::Result<Vec<PathBuf>> {
    let mut archive = tar::Archive::new(reader);
    let mut produced = Vec::new();
    for entry in archive.entries()? {
        let mut entry = entry?;
        let relative = entry.path()?.into_owned();
        let is_file = entry.header().entry_type().is_file();
        // unpack_in refuses entries that would escape `dest`.
        if entry.unpack_in(dest)? && is_file {
            produced.push(dest.join(relative));
        }
    }
    Ok(produced)
}

fn to_io(e: zip::result::ZipError) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, e)
}
