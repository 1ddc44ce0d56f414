use std::io;
use std::path::Path;

use log::{debug, trace};

use crate::frame_directory::FrameDirectory;
use crate::machine::Machine;
use crate::noff::Executable;
use crate::page_table::PageTable;
use crate::swap_file::SwapFile;

/// Stack space appended to the uninitialized-data segment.
pub const USER_STACK_SIZE: usize = 1024;

#[derive(Debug, Clone, Copy, Default)]
pub struct SpaceStats {
    pub demand_loads: u64,
    pub swaps_in: u64,
    pub swaps_out: u64,
}

fn pages_for(bytes: usize, page_size: usize) -> usize {
    (bytes + page_size - 1) / page_size
}

/// One user process's virtual address space: its page table, its
/// executable image, and its private swap file.
///
/// Layout is linear: code pages first, then initialized data, then the
/// zero-filled region (uninitialized data plus stack), each segment rounded
/// up to whole pages.
pub struct AddressSpace {
    name: String,
    page_table: PageTable,
    executable: Executable,
    swap: SwapFile,
    page_size: usize,
    code_pages: usize,
    data_pages: usize,
    stats: SpaceStats,
}

impl AddressSpace {
    pub fn new<P: AsRef<Path>>(
        name: &str,
        executable: Executable,
        page_size: usize,
        swap_path: P,
    ) -> io::Result<AddressSpace> {
        let header = *executable.header();
        let code_pages = pages_for(header.code.size as usize, page_size);
        let data_pages = pages_for(header.init_data.size as usize, page_size);
        let zero_pages = pages_for(
            header.uninit_data.size as usize + USER_STACK_SIZE,
            page_size,
        );
        let num_pages = code_pages + data_pages + zero_pages;

        debug!(
            "initializing address space {}: {} pages ({} code, {} data, {} zero-fill)",
            name, num_pages, code_pages, data_pages, zero_pages
        );

        let swap = SwapFile::create(swap_path, num_pages, page_size)?;

        Ok(AddressSpace {
            name: name.to_string(),
            page_table: PageTable::new(num_pages),
            executable,
            swap,
            page_size,
            code_pages,
            data_pages,
            stats: SpaceStats::default(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn num_pages(&self) -> usize {
        self.page_table.len()
    }

    pub fn page_table(&self) -> &PageTable {
        &self.page_table
    }

    pub fn page_table_mut(&mut self) -> &mut PageTable {
        &mut self.page_table
    }

    pub fn stats(&self) -> SpaceStats {
        self.stats
    }

    /// Swap-file write count, exposed for the clean-eviction property.
    pub fn swap_writes(&self) -> u64 {
        self.swap.writes()
    }

    /// Demand-loads `vpn` into `frame`: copies the page from the executable
    /// or zero-fills it, then marks the entry valid and resident. The frame
    /// must already be assigned to this space by the directory.
    pub fn load_page(&mut self, vpn: usize, frame: usize, machine: &mut Machine) {
        assert!(vpn < self.page_table.len(), "demand load outside the page table");
        let header = self.executable.header();

        if vpn < self.code_pages {
            let offset = header.code.in_file_addr as usize + vpn * self.page_size;
            trace!("{}: vpn {} found in code segment", self.name, vpn);
            self.executable.read_at(machine.frame_mut(frame), offset);
        } else if vpn < self.code_pages + self.data_pages {
            let offset = header.init_data.in_file_addr as usize
                + (vpn - self.code_pages) * self.page_size;
            trace!("{}: vpn {} found in initialized data segment", self.name, vpn);
            self.executable.read_at(machine.frame_mut(frame), offset);
        } else {
            trace!("{}: vpn {} is zero-fill", self.name, vpn);
            machine.frame_mut(frame).fill(0);
        }

        let entry = self.page_table.get_mut(vpn);
        entry.frame = Some(frame);
        entry.valid = true;
        self.stats.demand_loads += 1;
        debug!("{}: demand-loaded vpn {} into frame {}", self.name, vpn, frame);
    }

    /// Swap-in: reads exactly one page back from the swap file. The entry
    /// must have been loaded before (`valid`), or the store holds nothing
    /// meaningful for it.
    pub fn reload(&mut self, vpn: usize, frame: usize, machine: &mut Machine) {
        let entry = *self.page_table.get(vpn);
        assert!(entry.valid, "reload of a page that was never loaded");
        assert_eq!(entry.frame, None, "reload of a page that is still resident");

        self.swap.read_page(vpn, machine.frame_mut(frame));

        let entry = self.page_table.get_mut(vpn);
        entry.frame = Some(frame);
        entry.dirty = false;
        entry.referenced = true;
        self.stats.swaps_in += 1;
        debug!("{}: retrieved vpn {} from swap into frame {}", self.name, vpn, frame);
    }

    /// Swap-out. With `mirror_tlb` set (this space is the one running), the
    /// live cache line is copied back first so the write-back decision sees
    /// the current dirty bit. Returns the freed frame; the caller decides
    /// whether it is reassigned or released.
    pub fn evict(&mut self, vpn: usize, machine: &mut Machine, mirror_tlb: bool) -> usize {
        assert!(vpn < self.page_table.len(), "eviction outside the page table");

        if mirror_tlb {
            if let Some(tlb) = machine.tlb_mut() {
                for slot in 0..tlb.len() {
                    let line = *tlb.get(slot);
                    if line.valid && line.vpn == vpn {
                        trace!(
                            "{}: vpn {} is cached, copying bits back and invalidating",
                            self.name,
                            vpn
                        );
                        self.page_table.write_back(line);
                        tlb.invalidate(slot);
                    }
                }
            }
        }

        let entry = *self.page_table.get(vpn);
        let frame = entry
            .frame
            .unwrap_or_else(|| panic!("eviction of non-resident vpn {}", vpn));

        if entry.dirty {
            debug!("{}: vpn {} is dirty, writing frame {} to swap", self.name, vpn, frame);
            self.swap.write_page(vpn, machine.frame(frame));
        } else {
            trace!("{}: vpn {} is clean, skipping the swap write", self.name, vpn);
        }

        self.page_table.get_mut(vpn).frame = None;
        self.stats.swaps_out += 1;
        frame
    }

    /// Destruction path: hand every still-resident frame back to the
    /// directory. Must run before the space is dropped so no directory
    /// entry is left pointing at a dead space.
    pub fn release_frames(&mut self, frames: &mut FrameDirectory) {
        for vpn in 0..self.page_table.len() {
            let entry = self.page_table.get_mut(vpn);
            if entry.valid {
                if let Some(frame) = entry.frame.take() {
                    frames.release_frame(frame);
                }
            }
        }
        debug!("{}: released all frames", self.name);
    }
}
