use log::debug;

use crate::kernel::{ProcessTable, SpaceId};
use crate::page_replacer::{PolicyKind, ReferenceBits, ReplacementPolicy};

/// One physical frame's ownership record. The owner is an opaque space id
/// resolved through the process table, never a reference into the address
/// space itself; destruction must release frames first.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameEntry {
    owner: Option<(SpaceId, usize)>,
}

/// The frame picked for eviction, still owned by its current space until
/// [`FrameDirectory::reassign`] runs.
#[derive(Debug, Clone, Copy)]
pub struct Victim {
    pub frame: usize,
    pub owner: SpaceId,
    pub vpn: usize,
}

/// Owns the mapping from every physical frame to the (space, virtual page)
/// occupying it. The single arbiter of frame ownership: address spaces
/// only gain or lose frames through it.
pub struct FrameDirectory {
    entries: Vec<FrameEntry>,
    used: usize,
    policy: Box<dyn ReplacementPolicy>,
    evictions: u64,
}

/// The clock policy's view of the occupying pages' use bits, resolved
/// through the directory entries and the process table.
struct DirectoryBits<'a> {
    entries: &'a [FrameEntry],
    spaces: &'a mut ProcessTable,
}

impl ReferenceBits for DirectoryBits<'_> {
    fn referenced(&self, frame: usize) -> bool {
        let (owner, vpn) = self.entries[frame]
            .owner
            .expect("policy scanned a free frame");
        self.spaces.get(owner).page_table().get(vpn).referenced
    }

    fn clear_referenced(&mut self, frame: usize) {
        let (owner, vpn) = self.entries[frame]
            .owner
            .expect("policy scanned a free frame");
        self.spaces
            .get_mut(owner)
            .page_table_mut()
            .get_mut(vpn)
            .referenced = false;
    }
}

impl FrameDirectory {
    pub fn new(capacity: usize, policy: PolicyKind) -> FrameDirectory {
        assert!(capacity >= 1, "frame pool must hold at least one frame");
        FrameDirectory {
            entries: vec![FrameEntry::default(); capacity],
            used: 0,
            policy: policy.create(capacity),
            evictions: 0,
        }
    }

    /// Swaps in a caller-built policy; used by tests that need a seeded rng.
    pub fn with_policy(capacity: usize, policy: Box<dyn ReplacementPolicy>) -> FrameDirectory {
        assert!(capacity >= 1, "frame pool must hold at least one frame");
        FrameDirectory {
            entries: vec![FrameEntry::default(); capacity],
            used: 0,
            policy,
            evictions: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    pub fn occupancy(&self) -> usize {
        self.used
    }

    pub fn evictions(&self) -> u64 {
        self.evictions
    }

    pub fn owner_of(&self, frame: usize) -> Option<(SpaceId, usize)> {
        self.entries[frame].owner
    }

    /// Claims the first free frame for `(owner, vpn)`, if any.
    pub fn claim_free(&mut self, owner: SpaceId, vpn: usize) -> Option<usize> {
        if self.used == self.entries.len() {
            return None;
        }
        let frame = self
            .entries
            .iter()
            .position(|entry| entry.owner.is_none())
            .expect("occupancy counter disagrees with the frame entries");

        self.entries[frame].owner = Some((owner, vpn));
        self.used += 1;
        self.policy.frame_admitted(frame);
        debug!("space {} was given free frame {} for vpn {}", owner, frame, vpn);
        Some(frame)
    }

    /// Picks the eviction victim for a full pool. The caller must complete
    /// the victim's eviction before reassigning the frame.
    pub fn choose_victim(&mut self, spaces: &mut ProcessTable) -> Victim {
        assert_eq!(
            self.used,
            self.entries.len(),
            "victim selection while free frames remain"
        );

        let frame = {
            let mut bits = DirectoryBits {
                entries: &self.entries,
                spaces,
            };
            self.policy.pick_victim(&mut bits)
        };
        assert!(frame < self.entries.len(), "policy chose an out-of-pool frame");

        let (owner, vpn) = self.entries[frame]
            .owner
            .expect("policy chose a free frame as victim");
        self.evictions += 1;
        debug!(
            "memory is full, frame {} (space {} vpn {}) chosen as victim",
            frame, owner, vpn
        );
        Victim { frame, owner, vpn }
    }

    /// Hands a just-evicted frame to its new owner. Occupancy is unchanged:
    /// the pool stays full across an eviction.
    pub fn reassign(&mut self, frame: usize, owner: SpaceId, vpn: usize) {
        assert!(frame < self.entries.len());
        assert!(
            self.entries[frame].owner.is_some(),
            "reassignment of a frame that was never occupied"
        );
        self.entries[frame].owner = Some((owner, vpn));
        self.policy.frame_admitted(frame);
        debug!("frame {} reassigned to space {} vpn {}", frame, owner, vpn);
    }

    /// Returns a frame to the pool. Releasing an already-free frame is a
    /// double release and halts the kernel.
    pub fn release_frame(&mut self, frame: usize) {
        assert!(frame < self.entries.len(), "released frame is out of bounds");
        assert!(
            self.entries[frame].owner.is_some(),
            "double release of frame"
        );

        self.entries[frame].owner = None;
        self.used -= 1;
        self.policy.frame_released(frame);
        debug!("frame {} released", frame);
    }
}
