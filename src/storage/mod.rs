//! Filesystem layout and archive helpers.
//!
//! ```text
//! DATA_DIR/
//!   <publication>/
//!     HEPData-<publication>-v<version>.zip   packed manifest directory per version
//!     <timestamp>[-n]/<archive>.zip          one directory per upload
//!     <timestamp>[-n]/<archive stem>/        extracted contents
//!     <timestamp>[-n]/yaml/                  output of a legacy conversion
//!   converted/                               download cache
//! ```

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use chrono::Utc;
use regex::Regex;
use thiserror::Error;
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{ZipArchive, ZipWriter};

use crate::ids::{PublicationId, Version};

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("invalid zip archive: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("zip entry escapes the extraction directory: {0}")]
    UnsafePath(String),
}

pub fn ensure_dirs(data_dir: &Path, tmp_dir: &Path) -> io::Result<()> {
    fs::create_dir_all(data_dir)?;
    fs::create_dir_all(data_dir.join("converted"))?;
    fs::create_dir_all(tmp_dir)?;
    Ok(())
}

fn unsafe_chars() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^A-Za-z0-9._-]").expect("valid filename pattern"))
}

/// Reduces a client-supplied file name to a safe single path component.
/// Returns `None` when nothing usable is left.
pub fn sanitize_filename(name: &str) -> Option<String> {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let spaced = base.split_whitespace().collect::<Vec<_>>().join("_");
    let cleaned = unsafe_chars().replace_all(&spaced, "");
    let cleaned = cleaned.trim_start_matches('.').trim_start_matches('_');
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned.to_string())
    }
}

pub fn remove_file_extension(name: &str) -> &str {
    match name.rfind('.') {
        Some(idx) if idx > 0 => &name[..idx],
        _ => name,
    }
}

pub fn publication_dir(data_dir: &Path, publication: PublicationId) -> PathBuf {
    data_dir.join(publication.to_string())
}

/// Path of the packed manifest directory of one submission version.
pub fn submission_archive_path(
    data_dir: &Path,
    publication: PublicationId,
    version: Version,
) -> PathBuf {
    publication_dir(data_dir, publication).join(format!("HEPData-{}-v{}.zip", publication, version))
}

/// Sibling of `path` that a new file is written to before being renamed
/// over `path`.
pub fn staged_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".part");
    path.with_file_name(name)
}

/// Creates `DATA_DIR/<publication>/<unix seconds>`, adding a `-n` suffix when
/// an upload in the same second already claimed the directory.
pub fn create_upload_dir(
    data_dir: &Path,
    publication: PublicationId,
) -> io::Result<(PathBuf, String)> {
    let parent = publication_dir(data_dir, publication);
    fs::create_dir_all(&parent)?;

    let stamp = Utc::now().timestamp().to_string();
    let mut candidate = stamp.clone();
    let mut n = 1;
    loop {
        let dir = parent.join(&candidate);
        match fs::create_dir(&dir) {
            Ok(()) => return Ok((dir, candidate)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                candidate = format!("{}-{}", stamp, n);
                n += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

pub fn extract_zip(zip_path: &Path, target_dir: &Path) -> Result<(), ArchiveError> {
    let file = fs::File::open(zip_path)?;
    extract_zip_reader(file, target_dir)
}

pub fn extract_zip_bytes(bytes: &[u8], target_dir: &Path) -> Result<(), ArchiveError> {
    extract_zip_reader(io::Cursor::new(bytes), target_dir)
}

fn extract_zip_reader<R: io::Read + io::Seek>(
    reader: R,
    target_dir: &Path,
) -> Result<(), ArchiveError> {
    let mut archive = ZipArchive::new(reader)?;
    fs::create_dir_all(target_dir)?;

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        let entry_path = match entry.enclosed_name() {
            Some(path) => target_dir.join(path),
            None => return Err(ArchiveError::UnsafePath(entry.name().to_string())),
        };

        if entry.is_dir() {
            fs::create_dir_all(&entry_path)?;
            continue;
        }

        if let Some(parent) = entry_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut outfile = fs::File::create(&entry_path)?;
        io::copy(&mut entry, &mut outfile)?;
    }
    Ok(())
}

/// Packs every file below `dir` into a zip, paths relative to `dir`.
pub fn zip_directory(dir: &Path) -> Result<Vec<u8>, ArchiveError> {
    let mut buffer = Vec::new();
    {
        let mut zip = ZipWriter::new(io::Cursor::new(&mut buffer));
        let options = SimpleFileOptions::default().unix_permissions(0o644);

        for entry in WalkDir::new(dir).sort_by_file_name() {
            let entry = entry.map_err(io::Error::from)?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry
                .path()
                .strip_prefix(dir)
                .map_err(|_| ArchiveError::UnsafePath(entry.path().display().to_string()))?;
            let name = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            zip.start_file(name, options)?;
            zip.write_all(&fs::read(entry.path())?)?;
        }

        zip.finish()?;
    }
    Ok(buffer)
}

/// Packs a single file into a zip under its own file name.
pub fn zip_file(path: &Path) -> Result<Vec<u8>, ArchiveError> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .ok_or_else(|| ArchiveError::UnsafePath(path.display().to_string()))?;

    let mut buffer = Vec::new();
    {
        let mut zip = ZipWriter::new(io::Cursor::new(&mut buffer));
        zip.start_file(name, SimpleFileOptions::default().unix_permissions(0o644))?;
        zip.write_all(&fs::read(path)?)?;
        zip.finish()?;
    }
    Ok(buffer)
}

/// Walks `dir` in file-name order and returns `(parent directory, file)` for
/// the first file whose name satisfies `predicate`.
pub fn find_file_in_directory<F>(dir: &Path, predicate: F) -> Option<(PathBuf, PathBuf)>
where
    F: Fn(&str) -> bool,
{
    WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .find(|e| e.file_name().to_str().map_or(false, &predicate))
        .map(|e| {
            let path = e.into_path();
            let parent = path.parent().map(Path::to_path_buf).unwrap_or_default();
            (parent, path)
        })
}
