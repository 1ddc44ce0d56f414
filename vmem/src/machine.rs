//! The slice of the instruction-set simulator this subsystem consumes: a
//! linear physical memory, an optional hardware translation cache, and the
//! register used to report a faulting address.

use crate::page_table::TranslationEntry;

/// Register that receives the faulting virtual address on a user fault.
pub const BAD_VADDR_REG: usize = 39;

pub const NUM_REGS: usize = 40;

pub struct Machine {
    page_size: usize,
    main_memory: Vec<u8>,
    tlb: Option<Tlb>,
    registers: [u32; NUM_REGS],
}

impl Machine {
    pub fn new(page_size: usize, num_frames: usize, tlb_size: Option<usize>) -> Machine {
        assert!(page_size > 0, "page size must be non-zero");
        assert!(num_frames >= 1, "physical memory must hold at least one frame");
        Machine {
            page_size,
            main_memory: vec![0; page_size * num_frames],
            tlb: tlb_size.map(Tlb::new),
            registers: [0; NUM_REGS],
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn num_frames(&self) -> usize {
        self.main_memory.len() / self.page_size
    }

    pub fn frame(&self, frame: usize) -> &[u8] {
        assert!(frame < self.num_frames(), "frame index outside the pool");
        &self.main_memory[frame * self.page_size..(frame + 1) * self.page_size]
    }

    pub fn frame_mut(&mut self, frame: usize) -> &mut [u8] {
        assert!(frame < self.num_frames(), "frame index outside the pool");
        &mut self.main_memory[frame * self.page_size..(frame + 1) * self.page_size]
    }

    pub fn tlb(&self) -> Option<&Tlb> {
        self.tlb.as_ref()
    }

    pub fn tlb_mut(&mut self) -> Option<&mut Tlb> {
        self.tlb.as_mut()
    }

    pub fn read_register(&self, reg: usize) -> u32 {
        self.registers[reg]
    }

    pub fn write_register(&mut self, reg: usize, value: u32) {
        self.registers[reg] = value;
    }
}

/// Fixed-capacity translation cache. A slot is occupied iff its entry's
/// `valid` bit is set; installed entries are always resident copies, so the
/// bit doubles as slot validity the way the hardware uses it. Volatile
/// across context switches: the kernel invalidates every line on a switch.
pub struct Tlb {
    slots: Vec<TranslationEntry>,
}

impl Tlb {
    fn new(size: usize) -> Tlb {
        assert!(size > 0, "translation cache must have at least one slot");
        Tlb {
            slots: (0..size).map(|_| TranslationEntry::never_loaded(0)).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// The live copy for `vpn`, if one is installed. Bit updates made by
    /// the running program land here, not in the page table.
    pub fn lookup_mut(&mut self, vpn: usize) -> Option<&mut TranslationEntry> {
        self.slots
            .iter_mut()
            .find(|slot| slot.valid && slot.vpn == vpn)
    }

    pub fn free_slot(&self) -> Option<usize> {
        self.slots.iter().position(|slot| !slot.valid)
    }

    pub fn get(&self, slot: usize) -> &TranslationEntry {
        &self.slots[slot]
    }

    pub fn set(&mut self, slot: usize, entry: TranslationEntry) {
        assert!(entry.valid && entry.frame.is_some(), "cache lines hold resident entries");
        self.slots[slot] = entry;
    }

    pub fn invalidate(&mut self, slot: usize) {
        self.slots[slot].valid = false;
    }

    pub fn invalidate_all(&mut self) {
        for slot in &mut self.slots {
            slot.valid = false;
        }
    }

    pub fn valid_entries(&self) -> impl Iterator<Item = &TranslationEntry> {
        self.slots.iter().filter(|slot| slot.valid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resident(vpn: usize, frame: usize) -> TranslationEntry {
        TranslationEntry {
            vpn,
            frame: Some(frame),
            valid: true,
            dirty: false,
            referenced: false,
            read_only: false,
        }
    }

    #[test]
    fn frames_partition_main_memory() {
        let mut machine = Machine::new(64, 4, None);
        machine.frame_mut(2).fill(0xcc);

        assert_eq!(machine.frame(1), &[0u8; 64]);
        assert_eq!(machine.frame(2), &[0xcc_u8; 64]);
        assert_eq!(machine.num_frames(), 4);
    }

    #[test]
    fn tlb_lookup_ignores_invalid_slots() {
        let mut machine = Machine::new(64, 4, Some(2));
        let tlb = machine.tlb_mut().unwrap();

        assert_eq!(tlb.free_slot(), Some(0));
        tlb.set(0, resident(3, 1));
        assert!(tlb.lookup_mut(3).is_some());
        assert!(tlb.lookup_mut(0).is_none());

        tlb.invalidate_all();
        assert!(tlb.lookup_mut(3).is_none());
        assert_eq!(tlb.free_slot(), Some(0));
    }
}
