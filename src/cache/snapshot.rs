//! Dependency-state snapshots
//!
//! A snapshot is the cached paths of a workspace packed into a gzipped tar
//! archive on disk. Entries keep their Unix mode and symlink targets; regular
//! files keep their mtime (whole seconds), so a restored `target/` is
//! usable by cargo without a rebuild. Entries are walked in file-name order
//! with ownership and directory times zeroed, so the same tree always packs
//! to the same bytes.

use crate::cache::CacheError;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use sha2::{Digest, Sha256};
use std::fs::{File, Metadata};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Component, Path, PathBuf};
use std::time::UNIX_EPOCH;
use tar::{Archive, Builder, EntryType, Header};
use tracing::debug;
use walkdir::WalkDir;

/// Summary of a packed or unpacked archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    /// Hex SHA-256 of the archive file
    pub digest: String,

    /// Archive size in bytes
    pub size: u64,

    /// Number of tar entries
    pub entries: usize,
}

impl Snapshot {
    /// Pack everything under `paths` (relative to `workspace`) into `archive`.
    ///
    /// Paths that do not exist are skipped. Symlinks are stored as links,
    /// never followed.
    pub fn capture(workspace: &Path, paths: &[String], archive: &Path) -> Result<Self, CacheError> {
        let file = File::create(archive).map_err(|e| CacheError::io(archive, e))?;
        let encoder = GzEncoder::new(BufWriter::new(file), Compression::fast());
        let mut builder = Builder::new(encoder);

        let mut entries = 0;
        for relative in paths {
            check_relative(relative)?;
            let root = workspace.join(relative);
            match std::fs::symlink_metadata(&root) {
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    debug!(path = %relative, "Cached path absent, skipping");
                    continue;
                }
                Err(e) => return Err(CacheError::io(&root, e)),
            }

            for entry in WalkDir::new(&root).follow_root_links(false).sort_by_file_name() {
                let entry = entry.map_err(|e| CacheError::Io {
                    path: root.clone(),
                    message: e.to_string(),
                })?;
                let name = relative_name(workspace, entry.path())?;
                let metadata = entry.metadata().map_err(|e| CacheError::Io {
                    path: entry.path().to_path_buf(),
                    message: e.to_string(),
                })?;
                if append_entry(&mut builder, entry.path(), &name, &metadata)? {
                    entries += 1;
                }
            }
        }

        let encoder = builder.into_inner().map_err(|e| CacheError::io(archive, e))?;
        let mut writer = encoder.finish().map_err(|e| CacheError::io(archive, e))?;
        writer.flush().map_err(|e| CacheError::io(archive, e))?;
        drop(writer);

        let (digest, size) = file_digest(archive)?;
        Ok(Self { digest, size, entries })
    }

    /// Unpack `archive` into `workspace`, preserving modes, links and mtimes.
    ///
    /// An archive that cannot be read is `Corrupt`; entries that would land
    /// outside the workspace are `InvalidPath`.
    pub fn restore(archive: &Path, workspace: &Path) -> Result<Self, CacheError> {
        let (digest, size) = file_digest(archive)?;
        let corrupt = |e: std::io::Error| CacheError::Corrupt(format!("{}: {}", archive.display(), e));

        let file = File::open(archive).map_err(|e| CacheError::io(archive, e))?;
        let mut tar = Archive::new(GzDecoder::new(BufReader::new(file)));
        tar.set_preserve_permissions(true);
        tar.set_preserve_mtime(true);
        tar.set_overwrite(true);

        let mut entries = 0;
        for entry in tar.entries().map_err(corrupt)? {
            let mut entry = entry.map_err(corrupt)?;
            let name = entry.path().map_err(corrupt)?.to_string_lossy().into_owned();
            check_relative(&name)?;
            let unpacked = entry.unpack_in(workspace).map_err(corrupt)?;
            if !unpacked {
                return Err(CacheError::InvalidPath(name));
            }
            entries += 1;
        }

        Ok(Self { digest, size, entries })
    }

    /// Entry names of `archive`, in archive order
    pub fn list(archive: &Path) -> Result<Vec<String>, CacheError> {
        let corrupt = |e: std::io::Error| CacheError::Corrupt(format!("{}: {}", archive.display(), e));
        let file = File::open(archive).map_err(|e| CacheError::io(archive, e))?;
        let mut tar = Archive::new(GzDecoder::new(BufReader::new(file)));

        let mut names = Vec::new();
        for entry in tar.entries().map_err(corrupt)? {
            let entry = entry.map_err(corrupt)?;
            names.push(entry.path().map_err(corrupt)?.to_string_lossy().into_owned());
        }
        Ok(names)
    }
}

/// Hex SHA-256 and length of a file, read in a streaming pass
pub fn file_digest(path: &Path) -> Result<(String, u64), CacheError> {
    let mut file = File::open(path).map_err(|e| CacheError::io(path, e))?;
    let mut hasher = Sha256::new();
    let size = std::io::copy(&mut file, &mut hasher).map_err(|e| CacheError::io(path, e))?;
    Ok((hex::encode(hasher.finalize()), size))
}

/// Append one walked entry. Returns `false` for file types that are not cached.
fn append_entry<W: Write>(
    builder: &mut Builder<W>,
    path: &Path,
    name: &str,
    metadata: &Metadata,
) -> Result<bool, CacheError> {
    let file_type = metadata.file_type();
    let mut header = Header::new_gnu();
    header.set_mode(mode_of(metadata));
    header.set_uid(0);
    header.set_gid(0);
    header.set_size(0);
    header.set_mtime(0);

    let written = if file_type.is_symlink() {
        let target = std::fs::read_link(path).map_err(|e| CacheError::io(path, e))?;
        header.set_entry_type(EntryType::Symlink);
        builder.append_link(&mut header, name, &target)
    } else if file_type.is_dir() {
        header.set_entry_type(EntryType::Directory);
        builder.append_data(&mut header, name, std::io::empty())
    } else if file_type.is_file() {
        header.set_entry_type(EntryType::Regular);
        header.set_size(metadata.len());
        header.set_mtime(mtime_secs(metadata));
        let file = File::open(path).map_err(|e| CacheError::io(path, e))?;
        builder.append_data(&mut header, name, BufReader::new(file))
    } else {
        debug!(path = %path.display(), "Skipping special file");
        return Ok(false);
    };

    written.map_err(|e| CacheError::io(path, e))?;
    Ok(true)
}

fn mtime_secs(metadata: &Metadata) -> u64 {
    metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(unix)]
fn mode_of(metadata: &Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn mode_of(metadata: &Metadata) -> u32 {
    if metadata.is_dir() {
        0o755
    } else if metadata.permissions().readonly() {
        0o444
    } else {
        0o644
    }
}

fn relative_name(workspace: &Path, path: &Path) -> Result<String, CacheError> {
    let relative = path
        .strip_prefix(workspace)
        .map_err(|_| CacheError::InvalidPath(path.display().to_string()))?;
    let parts: Vec<_> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Ok(parts.join("/"))
}

/// Reject absolute paths and parent traversal
fn check_relative(path: &str) -> Result<(), CacheError> {
    let p = PathBuf::from(path);
    let escapes = p
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if path.is_empty() || escapes {
        return Err(CacheError::InvalidPath(path.to_string()));
    }
    Ok(())
}
