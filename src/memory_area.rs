//! Byte windows over the output file. Writers request a region, fill it, and
//! sync it back; overlapping writable requests are refused, and a region that
//! is never synced simply doesn't reach the file.

use crate::error::ErrorKind;
use crate::error::LinkError;
use crate::error::Result;
use anyhow::bail;
use anyhow::Context;
use std::ops::Deref;
use std::ops::DerefMut;
use std::ops::Range;
use std::path::Path;
use std::path::PathBuf;

enum Backing {
    File {
        file: std::fs::File,
        path: PathBuf,
        mmap: memmap2::MmapMut,
    },
    Anonymous(Vec<u8>),
}

pub struct MemoryArea {
    backing: Backing,
    size: u64,
    /// Writable ranges handed out and not yet synced.
    outstanding: Vec<Range<u64>>,
}

/// A mutable byte window. Must be handed back via `MemoryArea::sync` for its
/// contents to land in the output.
pub struct MemoryRegion {
    offset: u64,
    writable: bool,
    data: Vec<u8>,
}

impl MemoryRegion {
    pub fn offset(&self) -> u64 {
        self.offset
    }
}

impl Deref for MemoryRegion {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.data
    }
}

impl DerefMut for MemoryRegion {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

fn io_fault(message: String, location: &Path) -> LinkError {
    LinkError::new(ErrorKind::IOFault, message, location.display().to_string())
}

impl MemoryArea {
    /// Creates the output file at its final size and maps it.
    pub fn create_file(path: &Path, size: u64) -> Result<MemoryArea> {
        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(|e| io_fault(format!("failed to create output file: {e}"), path))?;
        file.set_len(size)
            .map_err(|e| io_fault(format!("failed to size output file: {e}"), path))?;
        // Safety: we created the file and hold it open for the whole link;
        // nothing else should be truncating it underneath us.
        let mmap = unsafe { memmap2::MmapMut::map_mut(&file) }
            .map_err(|e| io_fault(format!("failed to map output file: {e}"), path))?;
        Ok(MemoryArea {
            backing: Backing::File {
                file,
                path: path.to_owned(),
                mmap,
            },
            size,
            outstanding: Vec::new(),
        })
    }

    /// An anonymous area, for callers that want the bytes rather than a file.
    pub fn in_memory(size: u64) -> MemoryArea {
        MemoryArea {
            backing: Backing::Anonymous(vec![0; size as usize]),
            size,
            outstanding: Vec::new(),
        }
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    fn bytes(&self) -> &[u8] {
        match &self.backing {
            Backing::File { mmap, .. } => mmap,
            Backing::Anonymous(bytes) => bytes,
        }
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        match &mut self.backing {
            Backing::File { mmap, .. } => mmap,
            Backing::Anonymous(bytes) => bytes,
        }
    }

    /// Hands out a byte window. Two writable windows over overlapping file
    /// ranges would race on sync, so that's refused.
    pub fn request(&mut self, offset: u64, size: u64, writable: bool) -> Result<MemoryRegion> {
        let end = offset
            .checked_add(size)
            .filter(|&end| end <= self.size)
            .ok_or_else(|| {
                LinkError::new(
                    ErrorKind::IOFault,
                    format!(
                        "region {offset:#x}+{size:#x} exceeds output size {:#x}",
                        self.size
                    ),
                    "",
                )
            })?;
        let range = offset..end;
        if writable {
            if self
                .outstanding
                .iter()
                .any(|r| r.start < range.end && range.start < r.end)
            {
                bail!(LinkError::new(
                    ErrorKind::IOFault,
                    format!("overlapping writable region at {offset:#x}+{size:#x}"),
                    "",
                ));
            }
            self.outstanding.push(range.clone());
        }
        let data = self.bytes()[offset as usize..end as usize].to_vec();
        Ok(MemoryRegion {
            offset,
            writable,
            data,
        })
    }

    /// Writes a region's bytes back. Read-only regions are simply dropped.
    pub fn sync(&mut self, region: MemoryRegion) -> Result {
        if !region.writable {
            return Ok(());
        }
        let range = region.offset..region.offset + region.data.len() as u64;
        let Some(index) = self.outstanding.iter().position(|r| *r == range) else {
            bail!(LinkError::new(
                ErrorKind::IOFault,
                format!("sync of unknown region at {:#x}", region.offset),
                "",
            ));
        };
        self.outstanding.swap_remove(index);
        let offset = region.offset as usize;
        self.bytes_mut()[offset..offset + region.data.len()].copy_from_slice(&region.data);
        Ok(())
    }

    /// Flushes everything to disk. Fails if a writable region was retained
    /// instead of synced.
    pub fn finish(self, executable: bool) -> Result {
        if !self.outstanding.is_empty() {
            bail!(LinkError::new(
                ErrorKind::IOFault,
                format!("{} writable region(s) never synced", self.outstanding.len()),
                "",
            ));
        }
        if let Backing::File { file, path, mmap } = self.backing {
            mmap.flush()
                .map_err(|e| io_fault(format!("failed to flush output: {e}"), &path))?;
            if executable {
                #[cfg(unix)]
                {
                    use std::os::unix::fs::PermissionsExt;
                    let mut permissions = file
                        .metadata()
                        .with_context(|| format!("stat of `{}`", path.display()))?
                        .permissions();
                    permissions.set_mode(0o755);
                    file.set_permissions(permissions)
                        .with_context(|| format!("chmod of `{}`", path.display()))?;
                }
            }
        }
        Ok(())
    }

    /// Consumes the area, returning its contents. For anonymous areas only.
    pub fn into_bytes(self) -> Result<Vec<u8>> {
        if !self.outstanding.is_empty() {
            bail!(LinkError::new(
                ErrorKind::IOFault,
                format!("{} writable region(s) never synced", self.outstanding.len()),
                "",
            ));
        }
        match self.backing {
            Backing::Anonymous(bytes) => Ok(bytes),
            Backing::File { mmap, .. } => Ok(mmap.to_vec()),
        }
    }
}
