//! Demand-paged virtual memory for a simulated teaching machine.
//!
//! A [`kernel::Kernel`] owns a fixed pool of physical frames, a table of
//! user address spaces, and the machine's translation cache. Pages are
//! loaded from the executable image on first touch; under memory pressure
//! a pluggable replacement policy (FIFO, random, or clock) picks a victim
//! frame, whose content is persisted to the owning space's swap file
//! before the frame changes hands.

pub mod address_space;
pub mod error;
pub mod frame_directory;
pub mod kernel;
pub mod machine;
pub mod noff;
pub mod page_replacer;
pub mod page_table;
pub mod stats;
pub mod swap_file;
