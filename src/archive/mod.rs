//! Archive primitives
//!
//! - `ArchiveBuilder`: ordered named blobs bundled into one uncompressed tar
//! - `tar_gz_dir` / `tar_gz_files`: gzip-compressed tar of a tree or of
//!   in-memory files, entries at the archive root
//! - `extract_tar_gz` / `read_tar_gz_files`: the reverse direction

pub mod submission;

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use tar::{Archive, Builder, EntryType, Header, HeaderMode};
use tracing::{debug, warn};

use crate::error::{QueueError, Result};

pub use submission::{
    build_submission_from_source, build_submission_tar, create_submission_tar,
    create_submission_tar_from_path, SubmissionArtifact, MEMBER_NAMES,
};

/// Builds an uncompressed tar from named blobs, in insertion order
#[derive(Debug, Default)]
pub struct ArchiveBuilder {
    members: Vec<(String, Vec<u8>)>,
}

impl ArchiveBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn member(mut self, name: impl Into<String>, data: Vec<u8>) -> Self {
        self.members.push((name.into(), data));
        self
    }

    pub fn build(&self) -> Result<Vec<u8>> {
        let mut builder = Builder::new(Vec::new());
        for (name, data) in &self.members {
            append_file(&mut builder, Path::new(name), data)?;
        }
        Ok(builder.into_inner()?)
    }
}

/// Gzip-compressed tar of everything under `dir`, with paths relative to it.
///
/// The directory's own name does not appear in the archive. Entries are
/// written in sorted order with zeroed metadata so the layout only depends
/// on names and contents.
pub fn tar_gz_dir(dir: &Path) -> Result<Vec<u8>> {
    let metadata = fs::metadata(dir).map_err(|e| QueueError::packaging(dir, e))?;
    if !metadata.is_dir() {
        return Err(QueueError::packaging(
            dir,
            io::Error::new(io::ErrorKind::InvalidInput, "not a directory"),
        ));
    }

    let mut entries = Vec::new();
    collect_entries(dir, Path::new(""), &mut entries).map_err(|e| QueueError::packaging(dir, e))?;
    debug!("Packaging {} entries from {}", entries.len(), dir.display());

    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = Builder::new(encoder);
    builder.mode(HeaderMode::Deterministic);
    for rel in &entries {
        let full = dir.join(rel);
        let result = if full.is_dir() {
            builder.append_dir(rel, &full)
        } else {
            builder.append_path_with_name(&full, rel)
        };
        result.map_err(|e| QueueError::packaging(&full, e))?;
    }
    finish_gz(builder).map_err(|e| QueueError::packaging(dir, e))
}

/// Gzip-compressed tar of in-memory files, in the given order
pub fn tar_gz_files<'a, I, N>(files: I) -> Result<Vec<u8>>
where
    I: IntoIterator<Item = (N, &'a [u8])>,
    N: AsRef<Path>,
{
    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = Builder::new(encoder);
    for (name, data) in files {
        append_file(&mut builder, name.as_ref(), data)?;
    }
    Ok(finish_gz(builder)?)
}

/// Unpack a gzip tar into `dest`; entries escaping `dest` are skipped
pub fn extract_tar_gz(data: &[u8], dest: &Path) -> Result<()> {
    fs::create_dir_all(dest)?;
    let mut archive = Archive::new(GzDecoder::new(data));
    for entry in archive.entries()? {
        let mut entry = entry?;
        if !entry.unpack_in(dest)? {
            warn!(
                "Skipped archive entry outside destination: {}",
                entry.path()?.display()
            );
        }
    }
    Ok(())
}

/// Regular files of a gzip tar, keyed by normalized relative path
pub fn read_tar_gz_files(data: &[u8]) -> Result<BTreeMap<String, Vec<u8>>> {
    read_files(Archive::new(GzDecoder::new(data)))
}

/// Regular files of an uncompressed tar, in archive order
pub fn read_tar_members(data: &[u8]) -> Result<Vec<(String, Vec<u8>)>> {
    let mut archive = Archive::new(data);
    let mut members = Vec::new();
    for entry in archive.entries()? {
        let mut entry = entry?;
        if entry.header().entry_type() != EntryType::Regular {
            continue;
        }
        let name = normalize(&entry.path()?);
        let mut buf = Vec::with_capacity(entry.size() as usize);
        entry.read_to_end(&mut buf)?;
        members.push((name, buf));
    }
    Ok(members)
}

fn read_files<R: Read>(mut archive: Archive<R>) -> Result<BTreeMap<String, Vec<u8>>> {
    let mut files = BTreeMap::new();
    for entry in archive.entries()? {
        let mut entry = entry?;
        if entry.header().entry_type() != EntryType::Regular {
            continue;
        }
        let name = normalize(&entry.path()?);
        let mut buf = Vec::with_capacity(entry.size() as usize);
        entry.read_to_end(&mut buf)?;
        files.insert(name, buf);
    }
    Ok(files)
}

fn append_file<W: Write>(builder: &mut Builder<W>, name: &Path, data: &[u8]) -> io::Result<()> {
    let mut header = Header::new_gnu();
    header.set_entry_type(EntryType::Regular);
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    header.set_mtime(0);
    header.set_cksum();
    builder.append_data(&mut header, name, data)
}

fn finish_gz(builder: Builder<GzEncoder<Vec<u8>>>) -> io::Result<Vec<u8>> {
    builder.into_inner()?.finish()
}

fn collect_entries(root: &Path, rel: &Path, out: &mut Vec<PathBuf>) -> io::Result<()> {
    let mut children: Vec<_> = fs::read_dir(root.join(rel))?.collect::<io::Result<_>>()?;
    children.sort_by_key(|entry| entry.file_name());
    for child in children {
        let child_rel = rel.join(child.file_name());
        let is_dir = child.file_type()?.is_dir();
        out.push(child_rel.clone());
        if is_dir {
            collect_entries(root, &child_rel, out)?;
        }
    }
    Ok(())
}

/// "./a/b" and "a/b" name the same entry
fn normalize(path: &Path) -> String {
    let s = path.to_string_lossy();
    s.trim_start_matches("./").to_string()
}
