//! Per-address-space backing store for evicted pages.
//!
//! A flat file of `num_pages * page_size` bytes, pre-sized and zero-filled
//! at creation: page `v` lives at byte offset `v * page_size`, with no
//! header and no free list. Only dirty pages are ever written, and a page
//! is only read back once it is valid but no longer resident.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use log::debug;

pub struct SwapFile {
    file: File,
    path: PathBuf,
    num_pages: usize,
    page_size: usize,
    writes: u64,
}

impl SwapFile {
    pub fn create<P: AsRef<Path>>(
        path: P,
        num_pages: usize,
        page_size: usize,
    ) -> std::io::Result<SwapFile> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        file.set_len((num_pages * page_size) as u64)?;

        debug!(
            "created swap file {} ({} pages of {} bytes)",
            path.display(),
            num_pages,
            page_size
        );

        Ok(SwapFile {
            file,
            path,
            num_pages,
            page_size,
            writes: 0,
        })
    }

    /// Number of page writes performed since creation. Clean evictions do
    /// not write, which this counter makes observable.
    pub fn writes(&self) -> u64 {
        self.writes
    }

    fn seek_to(&mut self, vpn: usize) {
        assert!(vpn < self.num_pages, "swap access beyond the pre-sized store");
        self.file
            .seek(SeekFrom::Start((vpn * self.page_size) as u64))
            .unwrap_or_else(|e| panic!("seek in swap file {} failed: {}", self.path.display(), e));
    }

    /// Reads exactly one page into `buf`. A short read is a kernel bug or a
    /// corrupted store and halts the kernel.
    pub fn read_page(&mut self, vpn: usize, buf: &mut [u8]) {
        assert_eq!(buf.len(), self.page_size, "swap reads are page-granular");
        self.seek_to(vpn);
        self.file.read_exact(buf).unwrap_or_else(|e| {
            panic!(
                "short read of vpn {} from swap file {}: {}",
                vpn,
                self.path.display(),
                e
            )
        });
    }

    /// Writes exactly one page from `buf`.
    pub fn write_page(&mut self, vpn: usize, buf: &[u8]) {
        assert_eq!(buf.len(), self.page_size, "swap writes are page-granular");
        self.seek_to(vpn);
        self.file.write_all(buf).unwrap_or_else(|e| {
            panic!(
                "short write of vpn {} to swap file {}: {}",
                vpn,
                self.path.display(),
                e
            )
        });
        self.writes += 1;
    }
}

impl Drop for SwapFile {
    fn drop(&mut self) {
        // The store only outlives its address space on disk; clean it up.
        let _ = fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn pages_round_trip_at_their_own_offset() {
        let dir = tempdir().unwrap();
        let mut swap = SwapFile::create(dir.path().join("SWAP.0"), 4, 64).unwrap();

        let page = [0x5a_u8; 64];
        swap.write_page(2, &page);

        let mut out = [0u8; 64];
        swap.read_page(2, &mut out);
        assert_eq!(out, page);

        // Neighbours stay zero-filled.
        swap.read_page(1, &mut out);
        assert_eq!(out, [0u8; 64]);
        assert_eq!(swap.writes(), 1);
    }

    #[test]
    #[should_panic(expected = "beyond the pre-sized store")]
    fn out_of_bounds_page_is_fatal() {
        let dir = tempdir().unwrap();
        let mut swap = SwapFile::create(dir.path().join("SWAP.0"), 2, 64).unwrap();
        swap.write_page(2, &[0u8; 64]);
    }

    #[test]
    fn file_is_removed_with_the_space() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("SWAP.9");
        let swap = SwapFile::create(&path, 1, 64).unwrap();
        assert!(path.exists());
        drop(swap);
        assert!(!path.exists());
    }
}
