use std::fmt;
use std::io;
use std::path::PathBuf;

use log::{debug, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::address_space::{AddressSpace, SpaceStats};
use crate::error::Fault;
use crate::frame_directory::FrameDirectory;
use crate::machine::{Machine, BAD_VADDR_REG};
use crate::noff::Executable;
use crate::page_replacer::PolicyKind;
use crate::stats::Statistics;

/// Opaque address-space identifier. Frame directory entries record this
/// instead of a reference so a destroyed space can never dangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SpaceId(usize);

impl fmt::Display for SpaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl SpaceId {
    #[cfg(test)]
    pub(crate) fn test_id(id: usize) -> SpaceId {
        SpaceId(id)
    }
}

/// Id-indexed table of live address spaces.
pub struct ProcessTable {
    spaces: Vec<Option<AddressSpace>>,
}

impl ProcessTable {
    pub fn new() -> ProcessTable {
        ProcessTable { spaces: Vec::new() }
    }

    /// The id the next `add` will hand out. Ids are never reused; exited
    /// spaces leave a tombstone slot behind.
    fn next_id(&self) -> SpaceId {
        SpaceId(self.spaces.len())
    }

    fn add(&mut self, space: AddressSpace) -> SpaceId {
        self.spaces.push(Some(space));
        SpaceId(self.spaces.len() - 1)
    }

    pub fn get(&self, id: SpaceId) -> &AddressSpace {
        self.spaces[id.0]
            .as_ref()
            .unwrap_or_else(|| panic!("no live address space with id {}", id))
    }

    pub fn get_mut(&mut self, id: SpaceId) -> &mut AddressSpace {
        self.spaces[id.0]
            .as_mut()
            .unwrap_or_else(|| panic!("no live address space with id {}", id))
    }

    fn remove(&mut self, id: SpaceId) -> AddressSpace {
        self.spaces[id.0]
            .take()
            .unwrap_or_else(|| panic!("no live address space with id {}", id))
    }

    fn iter(&self) -> impl Iterator<Item = &AddressSpace> {
        self.spaces.iter().filter_map(|slot| slot.as_ref())
    }
}

impl Default for ProcessTable {
    fn default() -> Self {
        ProcessTable::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadMode {
    /// Pages are loaded on first access.
    Demand,
    /// Every page is faulted in at exec time; kept for comparison runs.
    Eager,
}

#[derive(Debug, Clone)]
pub struct VmConfig {
    pub page_size: usize,
    pub num_frames: usize,
    /// `None` models an architecture without a translation cache; the page
    /// table is consulted directly.
    pub tlb_size: Option<usize>,
    pub policy: PolicyKind,
    pub load_mode: LoadMode,
    /// Directory that receives the per-space `SWAP.<id>` files.
    pub swap_dir: PathBuf,
}

impl Default for VmConfig {
    fn default() -> VmConfig {
        VmConfig {
            page_size: 128,
            num_frames: 32,
            tlb_size: Some(4),
            policy: PolicyKind::Fifo,
            load_mode: LoadMode::Demand,
            swap_dir: std::env::temp_dir(),
        }
    }
}

/// The virtual-memory kernel: the frame pool arbiter, the process table,
/// and the translation-cache synchronizer, over a simulated machine.
///
/// Single-threaded by construction: every path that inspects and then
/// mutates shared paging state runs under one `&mut self`, which is this
/// design's equivalent of running fault handling with preemption disabled.
pub struct Kernel {
    machine: Machine,
    frames: FrameDirectory,
    spaces: ProcessTable,
    current: Option<SpaceId>,
    load_mode: LoadMode,
    swap_dir: PathBuf,
    rng: StdRng,
    translation_misses: u64,
    /// Counters inherited from exited spaces, so the end-of-run report
    /// still covers them.
    retired: SpaceStats,
}

impl Kernel {
    pub fn new(config: VmConfig) -> Kernel {
        Kernel::with_rng(config, StdRng::from_entropy())
    }

    /// Deterministic cache-slot displacement for tests.
    pub fn with_rng_seed(config: VmConfig, seed: u64) -> Kernel {
        Kernel::with_rng(config, StdRng::seed_from_u64(seed))
    }

    fn with_rng(config: VmConfig, rng: StdRng) -> Kernel {
        Kernel {
            machine: Machine::new(config.page_size, config.num_frames, config.tlb_size),
            frames: FrameDirectory::new(config.num_frames, config.policy),
            spaces: ProcessTable::new(),
            current: None,
            load_mode: config.load_mode,
            swap_dir: config.swap_dir,
            rng,
            translation_misses: 0,
            retired: SpaceStats::default(),
        }
    }

    pub fn machine(&self) -> &Machine {
        &self.machine
    }

    pub fn frame_directory(&self) -> &FrameDirectory {
        &self.frames
    }

    pub fn space(&self, id: SpaceId) -> &AddressSpace {
        self.spaces.get(id)
    }

    /// Mutable access to a live space, e.g. to tighten a page's protection
    /// bits. Do this only while no cache line holds the page: `write_back`
    /// replaces table entries wholesale with the cached copy.
    pub fn space_mut(&mut self, id: SpaceId) -> &mut AddressSpace {
        self.spaces.get_mut(id)
    }

    pub fn current(&self) -> Option<SpaceId> {
        self.current
    }

    /// Creates an address space for `executable` and registers it. In
    /// eager mode every page is faulted in immediately through the normal
    /// demand path, evicting as needed.
    pub fn exec(&mut self, name: &str, executable: Executable) -> io::Result<SpaceId> {
        let swap_path = self.swap_dir.join(format!("SWAP.{}", self.spaces.next_id()));
        let space = AddressSpace::new(name, executable, self.machine.page_size(), swap_path)?;
        let num_pages = space.num_pages();
        let id = self.spaces.add(space);
        debug!("exec {} as space {} ({} pages)", name, id, num_pages);

        if self.load_mode == LoadMode::Eager {
            let page_size = self.machine.page_size();
            for vpn in 0..num_pages {
                self.fault_in(id, vpn * page_size).unwrap_or_else(|fault| {
                    panic!("eager load of space {} faulted: {}", id, fault)
                });
            }
        }

        Ok(id)
    }

    /// Tears a space down: every frame it still owns goes back to the
    /// pool, then the space and its swap file are dropped. Runs the
    /// release before the drop so no directory entry outlives its owner.
    pub fn exit(&mut self, id: SpaceId) {
        if self.current == Some(id) {
            if let Some(tlb) = self.machine.tlb_mut() {
                tlb.invalidate_all();
            }
            self.current = None;
        }

        let mut space = self.spaces.remove(id);
        space.release_frames(&mut self.frames);
        let stats = space.stats();
        self.retired.demand_loads += stats.demand_loads;
        self.retired.swaps_in += stats.swaps_in;
        self.retired.swaps_out += stats.swaps_out;
        debug!("space {} exited", id);
    }

    /// Mirror cache state back to the outgoing space's page table. Called
    /// once per context switch, before `restore_state`.
    pub fn save_state(&mut self) {
        let Some(id) = self.current else { return };
        if let Some(tlb) = self.machine.tlb_mut() {
            let space = self.spaces.get_mut(id);
            for line in tlb.valid_entries() {
                space.page_table_mut().write_back(*line);
            }
            debug!("space {}: cache state saved to page table", id);
        }
    }

    /// Make `to` the running space. Every cache line is invalidated first:
    /// no translation survives into another address space.
    pub fn restore_state(&mut self, to: SpaceId) {
        let _ = self.spaces.get(to);
        if let Some(tlb) = self.machine.tlb_mut() {
            tlb.invalidate_all();
        }
        self.current = Some(to);
        debug!("space {} restored as current", to);
    }

    pub fn context_switch(&mut self, to: SpaceId) {
        self.save_state();
        self.restore_state(to);
    }

    /// The register file is 32 bits wide; a wider faulting address is
    /// reported saturated rather than truncated.
    fn report_bad_vaddr(&mut self, vaddr: usize) {
        let reported = u32::try_from(vaddr).unwrap_or(u32::MAX);
        self.machine.write_register(BAD_VADDR_REG, reported);
    }

    /// Grants a frame to `(owner, vpn)`. With a full pool the replacement
    /// policy picks a victim, whose eviction (including the swap write if
    /// dirty) completes before the frame changes hands.
    fn acquire_frame(&mut self, owner: SpaceId, vpn: usize) -> usize {
        debug!("space {} is looking for a frame for vpn {}", owner, vpn);

        if let Some(frame) = self.frames.claim_free(owner, vpn) {
            return frame;
        }

        let victim = self.frames.choose_victim(&mut self.spaces);
        let mirror_tlb = self.current == Some(victim.owner);
        let space = self.spaces.get_mut(victim.owner);
        let freed = space.evict(victim.vpn, &mut self.machine, mirror_tlb);
        assert_eq!(freed, victim.frame, "victim eviction freed the wrong frame");

        self.frames.reassign(victim.frame, owner, vpn);
        victim.frame
    }

    /// Demand-loads the page containing `vaddr` into a fresh frame. An
    /// address beyond the space's page table is a user error, reported
    /// through the bad-address register.
    pub fn fault_in(&mut self, id: SpaceId, vaddr: usize) -> Result<(), Fault> {
        let vpn = vaddr / self.machine.page_size();
        let num_pages = self.spaces.get(id).num_pages();
        if vpn >= num_pages {
            warn!("space {}: vaddr {:#x} is out of bounds ({} pages)", id, vaddr, num_pages);
            self.report_bad_vaddr(vaddr);
            return Err(Fault::AddressOutOfBounds { vaddr, num_pages });
        }

        let frame = self.acquire_frame(id, vpn);
        self.spaces.get_mut(id).load_page(vpn, frame, &mut self.machine);
        Ok(())
    }

    /// The translation-miss handler: classifies the page as never loaded,
    /// swapped out, or already resident, makes it resident, and installs
    /// it into the cache (empty slot preferred, else a random line whose
    /// bits are copied back before it is overwritten).
    pub fn handle_translation_miss(&mut self, vaddr: usize) -> Result<(), Fault> {
        let id = self
            .current
            .expect("translation miss with no running address space");
        self.translation_misses += 1;

        let vpn = vaddr / self.machine.page_size();
        let num_pages = self.spaces.get(id).num_pages();
        if vpn >= num_pages {
            warn!("space {}: vaddr {:#x} is out of bounds ({} pages)", id, vaddr, num_pages);
            self.report_bad_vaddr(vaddr);
            return Err(Fault::AddressOutOfBounds { vaddr, num_pages });
        }

        let entry = *self.spaces.get(id).page_table().get(vpn);
        if !entry.valid {
            debug!("space {}: vpn {} was never loaded, demand loading", id, vpn);
            self.fault_in(id, vaddr)?;
        } else if entry.frame.is_none() {
            debug!("space {}: vpn {} is swapped out, reloading", id, vpn);
            let frame = self.acquire_frame(id, vpn);
            self.spaces.get_mut(id).reload(vpn, frame, &mut self.machine);
        }
        // Otherwise the page is resident and merely absent from the cache,
        // e.g. right after a context switch invalidated every line.

        self.install_cache_line(id, vpn);
        Ok(())
    }

    fn install_cache_line(&mut self, id: SpaceId, vpn: usize) {
        let entry = *self.spaces.get(id).page_table().get(vpn);
        assert!(
            entry.valid && entry.frame.is_some(),
            "cache install of a non-resident entry"
        );

        if let Some(tlb) = self.machine.tlb_mut() {
            if let Some(slot) = tlb.free_slot() {
                debug!("filling empty cache slot {} with vpn {}", slot, vpn);
                tlb.set(slot, entry);
            } else {
                let slot = self.rng.gen_range(0..tlb.len());
                let displaced = *tlb.get(slot);
                // The displaced line's bits may have changed since it was
                // installed; save them before overwriting.
                self.spaces.get_mut(id).page_table_mut().write_back(displaced);
                tlb.set(slot, entry);
                debug!(
                    "overwriting cache slot {} (vpn {}) with vpn {}",
                    slot, displaced.vpn, vpn
                );
            }
        }
    }

    fn translate(&mut self, vaddr: usize, is_write: bool) -> Result<(usize, usize), Fault> {
        let id = self
            .current
            .expect("memory access with no running address space");
        let page_size = self.machine.page_size();
        let vpn = vaddr / page_size;
        let offset = vaddr % page_size;

        // One miss resolution is enough to make the translation land; the
        // second pass must hit.
        for _ in 0..2 {
            if let Some(tlb) = self.machine.tlb_mut() {
                if let Some(line) = tlb.lookup_mut(vpn) {
                    if is_write && line.read_only {
                        self.report_bad_vaddr(vaddr);
                        return Err(Fault::ReadOnlyWrite { vaddr });
                    }
                    line.referenced = true;
                    if is_write {
                        line.dirty = true;
                    }
                    return Ok((line.frame.expect("cache lines are resident"), offset));
                }
            } else {
                let space = self.spaces.get_mut(id);
                if vpn < space.num_pages() {
                    let entry = space.page_table_mut().get_mut(vpn);
                    if entry.valid && entry.frame.is_some() {
                        if is_write && entry.read_only {
                            self.report_bad_vaddr(vaddr);
                            return Err(Fault::ReadOnlyWrite { vaddr });
                        }
                        entry.referenced = true;
                        if is_write {
                            entry.dirty = true;
                        }
                        return Ok((entry.frame.expect("checked resident above"), offset));
                    }
                }
            }

            self.handle_translation_miss(vaddr)?;
        }

        panic!("translation of {:#x} did not resolve after miss handling", vaddr);
    }

    /// User-mode load of one byte.
    pub fn read_byte(&mut self, vaddr: usize) -> Result<u8, Fault> {
        let (frame, offset) = self.translate(vaddr, false)?;
        Ok(self.machine.frame(frame)[offset])
    }

    /// User-mode store of one byte.
    pub fn write_byte(&mut self, vaddr: usize, value: u8) -> Result<(), Fault> {
        let (frame, offset) = self.translate(vaddr, true)?;
        self.machine.frame_mut(frame)[offset] = value;
        Ok(())
    }

    /// Aggregates the counters owned by the directory, the spaces and the
    /// kernel into one report.
    pub fn statistics(&self) -> Statistics {
        let mut stats = Statistics {
            translation_misses: self.translation_misses,
            evictions: self.frames.evictions(),
            demand_loads: self.retired.demand_loads,
            swaps_in: self.retired.swaps_in,
            swaps_out: self.retired.swaps_out,
        };
        for space in self.spaces.iter() {
            let s = space.stats();
            stats.demand_loads += s.demand_loads;
            stats.swaps_in += s.swaps_in;
            stats.swaps_out += s.swaps_out;
        }
        stats
    }
}
