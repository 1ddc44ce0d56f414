use std::collections::VecDeque;

use log::{debug, trace};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Which replacement policy the frame directory runs. Selected at
/// construction so one binary can exercise all three.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyKind {
    Fifo,
    Random,
    Clock,
}

impl PolicyKind {
    pub(crate) fn create(self, capacity: usize) -> Box<dyn ReplacementPolicy> {
        match self {
            PolicyKind::Fifo => Box::new(FifoPolicy::new()),
            PolicyKind::Random => Box::new(RandomPolicy::new(capacity)),
            PolicyKind::Clock => Box::new(ClockPolicy::new()),
        }
    }
}

/// The clock scan's window onto the occupying pages' use bits. Implemented
/// by the frame directory over the owning page tables, so the policy never
/// holds pointers into address spaces.
pub trait ReferenceBits {
    fn referenced(&self, frame: usize) -> bool;
    fn clear_referenced(&mut self, frame: usize);
}

/// Victim selection strategy for a full frame pool.
///
/// The tracked set of frames always equals the directory's occupied set:
/// admission adds a frame, release removes it, and a picked victim is
/// forgotten (the directory re-admits it for its new owner). The directory
/// only calls `pick_victim` once occupancy has reached capacity.
pub trait ReplacementPolicy {
    fn frame_admitted(&mut self, _frame: usize) {}

    fn frame_released(&mut self, _frame: usize) {}

    fn pick_victim(&mut self, bits: &mut dyn ReferenceBits) -> usize;
}

/// First-in-first-out: evicts the frame admitted earliest.
pub struct FifoPolicy {
    queue: VecDeque<usize>,
}

impl FifoPolicy {
    pub fn new() -> FifoPolicy {
        FifoPolicy {
            queue: VecDeque::new(),
        }
    }
}

impl Default for FifoPolicy {
    fn default() -> Self {
        FifoPolicy::new()
    }
}

impl ReplacementPolicy for FifoPolicy {
    fn frame_admitted(&mut self, frame: usize) {
        debug!("fifo: pushing frame {} into the queue", frame);
        self.queue.push_back(frame);
    }

    fn frame_released(&mut self, frame: usize) {
        let idx = self
            .queue
            .iter()
            .position(|&f| f == frame)
            .expect("released frame is not tracked by the fifo queue");
        self.queue.remove(idx);
        debug!("fifo: removing released frame {} from the queue", frame);
    }

    fn pick_victim(&mut self, _bits: &mut dyn ReferenceBits) -> usize {
        let frame = self
            .queue
            .pop_front()
            .expect("victim selection on an empty fifo queue");
        debug!("fifo: popping frame {} from the queue (victim)", frame);
        frame
    }
}

/// Uniform choice among all frame slots. Stateless; only correct once the
/// pool is full, which is the only time the directory asks for a victim.
pub struct RandomPolicy {
    capacity: usize,
    rng: StdRng,
}

impl RandomPolicy {
    pub fn new(capacity: usize) -> RandomPolicy {
        RandomPolicy {
            capacity,
            rng: StdRng::from_entropy(),
        }
    }

    pub fn with_seed(capacity: usize, seed: u64) -> RandomPolicy {
        RandomPolicy {
            capacity,
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl ReplacementPolicy for RandomPolicy {
    fn pick_victim(&mut self, _bits: &mut dyn ReferenceBits) -> usize {
        let frame = self.rng.gen_range(0..self.capacity);
        debug!("random: chose frame {} as victim", frame);
        frame
    }
}

/// Second-chance: frames form a circle with a scan cursor. A referenced
/// frame gets its bit cleared and one more sweep; newly admitted frames are
/// inserted just ahead of the cursor so they too survive a full sweep. With
/// every bit set the scan clears the whole circle and then behaves like
/// FIFO, so it terminates within one sweep plus one selection.
pub struct ClockPolicy {
    circle: Vec<usize>,
    cursor: Option<usize>,
}

impl ClockPolicy {
    pub fn new() -> ClockPolicy {
        ClockPolicy {
            circle: Vec::new(),
            cursor: None,
        }
    }

    fn insert_at_cursor(&mut self, frame: usize) {
        match self.cursor {
            None => {
                self.circle.push(frame);
                self.cursor = Some(0);
            }
            Some(cursor) => {
                self.circle.insert(cursor, frame);
                self.cursor = Some(cursor + 1);
            }
        }
        trace!("clock: circle {:?} cursor {:?}", self.circle, self.cursor);
    }

    fn pop_at_cursor(&mut self) -> usize {
        let cursor = self.cursor.expect("clock scan over an empty circle");
        let frame = self.circle.remove(cursor);
        if self.circle.is_empty() {
            self.cursor = None;
        } else if cursor == self.circle.len() {
            self.cursor = Some(0);
        }
        frame
    }
}

impl Default for ClockPolicy {
    fn default() -> Self {
        ClockPolicy::new()
    }
}

impl ReplacementPolicy for ClockPolicy {
    fn frame_admitted(&mut self, frame: usize) {
        debug!("clock: inserting frame {} ahead of the scan point", frame);
        self.insert_at_cursor(frame);
    }

    fn frame_released(&mut self, frame: usize) {
        let idx = self
            .circle
            .iter()
            .position(|&f| f == frame)
            .expect("released frame is not tracked by the clock circle");
        self.circle.remove(idx);

        let cursor = self
            .cursor
            .expect("clock circle tracked a frame without a cursor");
        if self.circle.is_empty() {
            self.cursor = None;
        } else if idx < cursor {
            self.cursor = Some(cursor - 1);
        } else if idx == cursor && idx == self.circle.len() {
            self.cursor = Some(0);
        }
        debug!("clock: removing released frame {} from the circle", frame);
    }

    fn pick_victim(&mut self, bits: &mut dyn ReferenceBits) -> usize {
        loop {
            let candidate = self.pop_at_cursor();
            if !bits.referenced(candidate) {
                debug!(
                    "clock: frame {} has a clear use bit, victim chosen",
                    candidate
                );
                return candidate;
            }
            trace!(
                "clock: frame {} was in use, giving it a second chance",
                candidate
            );
            bits.clear_referenced(candidate);
            self.insert_at_cursor(candidate);
        }
    }
}
