//! End-to-end paging behavior over a real (temporary) swap directory.

use tempfile::TempDir;

use vmem::kernel::{Kernel, LoadMode, SpaceId, VmConfig};
use vmem::machine::BAD_VADDR_REG;
use vmem::noff::{build_image, Executable};
use vmem::page_replacer::PolicyKind;

const PAGE_SIZE: usize = 64;

fn kernel_with(policy: PolicyKind, num_frames: usize, tlb_size: Option<usize>) -> (Kernel, TempDir) {
    let swap_dir = TempDir::new().unwrap();
    let config = VmConfig {
        page_size: PAGE_SIZE,
        num_frames,
        tlb_size,
        policy,
        load_mode: LoadMode::Demand,
        swap_dir: swap_dir.path().to_path_buf(),
    };
    (Kernel::with_rng_seed(config, 7), swap_dir)
}

/// Four code pages with a recognizable per-page fill, no data segment.
fn spawn(kernel: &mut Kernel, name: &str) -> SpaceId {
    let code: Vec<u8> = (0..4 * PAGE_SIZE)
        .map(|i| (0x10 * (i / PAGE_SIZE) + 1) as u8)
        .collect();
    let exe = Executable::parse(build_image(&code, &[], 0)).unwrap();
    kernel.exec(name, exe).unwrap()
}

fn touch(kernel: &mut Kernel, vpn: usize) -> u8 {
    kernel.read_byte(vpn * PAGE_SIZE).unwrap()
}

fn resident_pages(kernel: &Kernel, id: SpaceId) -> usize {
    kernel
        .space(id)
        .page_table()
        .entries()
        .filter(|e| e.frame.is_some())
        .count()
}

#[test]
fn fifo_pressure_evicts_in_admission_order() {
    let (mut kernel, _swap) = kernel_with(PolicyKind::Fifo, 2, None);
    let id = spawn(&mut kernel, "t");
    kernel.restore_state(id);

    touch(&mut kernel, 0); // page A -> frame 0
    touch(&mut kernel, 1); // page B -> frame 1
    assert_eq!(kernel.frame_directory().occupancy(), 2);

    // Third page under pressure: A goes first.
    touch(&mut kernel, 2);
    assert_eq!(kernel.frame_directory().owner_of(0), Some((id, 2)));
    let page_a = kernel.space(id).page_table().get(0);
    assert!(page_a.valid, "evicted page stays valid");
    assert_eq!(page_a.frame, None, "evicted page is no longer resident");

    // Fourth page: B follows, never the newcomer.
    touch(&mut kernel, 3);
    assert_eq!(kernel.frame_directory().owner_of(1), Some((id, 3)));
    assert_eq!(kernel.space(id).page_table().get(1).frame, None);

    assert_eq!(kernel.statistics().swaps_out, 2);
    assert_eq!(kernel.frame_directory().occupancy(), 2);
}

#[test]
fn first_touch_demand_loads_into_an_empty_cache_slot() {
    let (mut kernel, _swap) = kernel_with(PolicyKind::Fifo, 4, Some(2));
    let id = spawn(&mut kernel, "t");
    kernel.restore_state(id);

    let byte = touch(&mut kernel, 0);
    assert_eq!(byte, 0x01);

    let stats = kernel.statistics();
    assert_eq!(stats.demand_loads, 1);
    assert_eq!(stats.evictions, 0);

    let tlb = kernel.machine().tlb().unwrap();
    assert_eq!(tlb.valid_entries().count(), 1, "no cache line was displaced");
    assert_eq!(tlb.valid_entries().next().unwrap().vpn, 0);
}

#[test]
fn dirty_eviction_round_trips_byte_identical_content() {
    let (mut kernel, _swap) = kernel_with(PolicyKind::Fifo, 2, None);
    let id = spawn(&mut kernel, "t");
    kernel.restore_state(id);

    let pattern: Vec<u8> = (0..PAGE_SIZE).map(|i| (i as u8).wrapping_mul(3)).collect();
    for (i, &byte) in pattern.iter().enumerate() {
        kernel.write_byte(i, byte).unwrap();
    }

    // Push page 0 out through the swap file and drag it back in.
    touch(&mut kernel, 1);
    touch(&mut kernel, 2);
    assert_eq!(kernel.space(id).page_table().get(0).frame, None);

    let reread: Vec<u8> = (0..PAGE_SIZE)
        .map(|i| kernel.read_byte(i).unwrap())
        .collect();
    assert_eq!(reread, pattern);
    assert!(kernel.statistics().swaps_in >= 1);
}

#[test]
fn clean_eviction_skips_the_swap_write() {
    let (mut kernel, _swap) = kernel_with(PolicyKind::Fifo, 2, None);
    let id = spawn(&mut kernel, "t");
    kernel.restore_state(id);

    touch(&mut kernel, 0);
    touch(&mut kernel, 1);
    touch(&mut kernel, 2); // evicts 0; first eviction is always a write
    assert_eq!(kernel.space(id).swap_writes(), 1);

    touch(&mut kernel, 0); // evicts 1 (write 2), reloads 0 clean
    assert_eq!(kernel.space(id).swap_writes(), 2);
    assert!(!kernel.space(id).page_table().get(0).dirty);

    touch(&mut kernel, 3); // evicts 2 (write 3)
    touch(&mut kernel, 1); // evicts 0, which is clean: no write
    assert_eq!(kernel.space(id).swap_writes(), 3);

    // The store's older copy still reloads correctly.
    assert_eq!(touch(&mut kernel, 0), 0x01);
}

#[test]
fn page_table_stays_self_consistent_under_pressure() {
    let (mut kernel, _swap) = kernel_with(PolicyKind::Clock, 2, Some(2));
    let id = spawn(&mut kernel, "t");
    kernel.restore_state(id);

    for round in 0..3 {
        for vpn in 0..4 {
            kernel
                .write_byte(vpn * PAGE_SIZE + round, vpn as u8)
                .unwrap();
        }
    }
    kernel.save_state();

    for (i, entry) in kernel.space(id).page_table().entries().enumerate() {
        assert_eq!(entry.vpn, i);
    }
}

#[test]
fn occupied_frames_match_resident_pages_across_spaces() {
    let (mut kernel, _swap) = kernel_with(PolicyKind::Fifo, 3, None);
    let a = spawn(&mut kernel, "a");
    let b = spawn(&mut kernel, "b");

    kernel.restore_state(a);
    touch(&mut kernel, 0);
    touch(&mut kernel, 1);
    kernel.context_switch(b);
    touch(&mut kernel, 0);
    touch(&mut kernel, 1); // pool is now over capacity, someone got evicted

    assert!(kernel.frame_directory().occupancy() <= 3);
    assert_eq!(
        resident_pages(&kernel, a) + resident_pages(&kernel, b),
        kernel.frame_directory().occupancy()
    );

    kernel.exit(a);
    assert_eq!(resident_pages(&kernel, b), kernel.frame_directory().occupancy());
    kernel.exit(b);
    assert_eq!(kernel.frame_directory().occupancy(), 0);
}

#[test]
fn context_switch_mirrors_cache_bits_and_invalidates_lines() {
    let (mut kernel, _swap) = kernel_with(PolicyKind::Fifo, 4, Some(2));
    let a = spawn(&mut kernel, "a");
    let b = spawn(&mut kernel, "b");

    kernel.restore_state(a);
    touch(&mut kernel, 0);
    // The live use bit sits in the cache line, not the page table.
    assert!(!kernel.space(a).page_table().get(0).referenced);

    kernel.context_switch(b);
    assert!(
        kernel.space(a).page_table().get(0).referenced,
        "outgoing space's cache bits must be mirrored back"
    );
    assert_eq!(kernel.machine().tlb().unwrap().valid_entries().count(), 0);

    // The resident-but-uncached page reinstalls without another load.
    kernel.context_switch(a);
    touch(&mut kernel, 0);
    assert_eq!(kernel.space(a).stats().demand_loads, 1);
}

#[test]
fn out_of_bounds_access_faults_the_process_only() {
    let (mut kernel, _swap) = kernel_with(PolicyKind::Fifo, 2, Some(2));
    let id = spawn(&mut kernel, "t");
    kernel.restore_state(id);

    let bad = 4 * PAGE_SIZE * 100;
    let err = kernel.read_byte(bad).unwrap_err();
    assert!(matches!(err, vmem::error::Fault::AddressOutOfBounds { .. }));
    assert_eq!(kernel.machine().read_register(BAD_VADDR_REG), bad as u32);

    // The kernel keeps running and the space still works.
    assert_eq!(touch(&mut kernel, 0), 0x01);
}

#[test]
fn clock_gives_referenced_pages_a_second_chance_then_degrades_to_fifo() {
    let (mut kernel, _swap) = kernel_with(PolicyKind::Clock, 2, None);
    let id = spawn(&mut kernel, "t");
    kernel.restore_state(id);

    touch(&mut kernel, 0);
    touch(&mut kernel, 1);
    // Both use bits are set; one sweep clears them and evicts the oldest.
    touch(&mut kernel, 2);
    assert_eq!(kernel.space(id).page_table().get(0).frame, None);
    assert_eq!(kernel.space(id).page_table().get(1).frame, Some(1));
}

#[test]
fn random_policy_preserves_content_whatever_it_evicts() {
    let (mut kernel, _swap) = kernel_with(PolicyKind::Random, 2, None);
    let id = spawn(&mut kernel, "t");
    kernel.restore_state(id);

    for vpn in 0..4 {
        kernel.write_byte(vpn * PAGE_SIZE, 0xc0 + vpn as u8).unwrap();
    }
    for vpn in 0..4 {
        assert_eq!(kernel.read_byte(vpn * PAGE_SIZE).unwrap(), 0xc0 + vpn as u8);
        assert_eq!(
            kernel.read_byte(vpn * PAGE_SIZE + 1).unwrap(),
            0x10 * vpn as u8 + 1
        );
    }
    assert_eq!(kernel.frame_directory().occupancy(), 2);
}

#[test]
fn eager_load_faults_every_page_in_at_exec_time() {
    let swap_dir = TempDir::new().unwrap();
    let config = VmConfig {
        page_size: PAGE_SIZE,
        num_frames: 2,
        tlb_size: None,
        policy: PolicyKind::Fifo,
        load_mode: LoadMode::Eager,
        swap_dir: swap_dir.path().to_path_buf(),
    };
    let mut kernel = Kernel::new(config);
    let id = spawn(&mut kernel, "t");

    let num_pages = kernel.space(id).num_pages() as u64;
    assert_eq!(kernel.space(id).stats().demand_loads, num_pages);
    assert_eq!(kernel.frame_directory().occupancy(), 2);

    // Pages evicted during the eager sweep come back intact.
    kernel.restore_state(id);
    assert_eq!(touch(&mut kernel, 0), 0x01);
    assert_eq!(touch(&mut kernel, 3), 0x31);
}

#[test]
fn read_only_page_rejects_stores_and_the_space_keeps_running() {
    let (mut kernel, _swap) = kernel_with(PolicyKind::Fifo, 4, Some(2));
    let id = spawn(&mut kernel, "t");
    kernel.restore_state(id);

    touch(&mut kernel, 0);
    // Flush the cached line before touching protection bits; write-back
    // replaces table entries wholesale with the cached copy.
    kernel.context_switch(id);
    kernel.space_mut(id).page_table_mut().get_mut(0).read_only = true;

    let err = kernel.write_byte(3, 0xaa).unwrap_err();
    assert!(matches!(err, vmem::error::Fault::ReadOnlyWrite { vaddr: 3 }));
    assert_eq!(kernel.machine().read_register(BAD_VADDR_REG), 3);

    // Reads of the protected page still work, writes elsewhere too.
    assert_eq!(touch(&mut kernel, 0), 0x01);
    kernel.write_byte(PAGE_SIZE, 0xbb).unwrap();
    assert_eq!(kernel.read_byte(PAGE_SIZE).unwrap(), 0xbb);
}

#[test]
fn fault_report_saturates_at_the_register_width() {
    let (mut kernel, _swap) = kernel_with(PolicyKind::Fifo, 2, Some(2));
    let id = spawn(&mut kernel, "t");
    kernel.restore_state(id);

    let err = kernel.read_byte(usize::MAX).unwrap_err();
    assert!(matches!(err, vmem::error::Fault::AddressOutOfBounds { .. }));
    assert_eq!(kernel.machine().read_register(BAD_VADDR_REG), u32::MAX);
}

#[test]
fn failed_exec_reserves_no_process_slot() {
    let dir = TempDir::new().unwrap();
    let swap_dir = dir.path().join("swap");
    let config = VmConfig {
        page_size: PAGE_SIZE,
        num_frames: 2,
        tlb_size: None,
        policy: PolicyKind::Fifo,
        load_mode: LoadMode::Demand,
        swap_dir: swap_dir.clone(),
    };
    let mut kernel = Kernel::with_rng_seed(config, 7);

    // The swap directory does not exist yet, so swap-file creation fails.
    let exe = Executable::parse(build_image(&[1; 64], &[], 0)).unwrap();
    assert!(kernel.exec("doomed", exe).is_err());

    std::fs::create_dir(&swap_dir).unwrap();
    let id = spawn(&mut kernel, "t");
    assert_eq!(id.to_string(), "0", "a failed exec must not consume an id");
}

#[test]
fn exited_spaces_keep_their_counters_in_the_report() {
    let (mut kernel, _swap) = kernel_with(PolicyKind::Fifo, 2, None);
    let id = spawn(&mut kernel, "t");
    kernel.restore_state(id);

    for vpn in 0..4 {
        touch(&mut kernel, vpn);
    }
    let before = kernel.statistics();
    assert!(before.demand_loads > 0 && before.swaps_out > 0);

    kernel.exit(id);
    assert_eq!(kernel.statistics(), before);
}
