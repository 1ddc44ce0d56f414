use vmem::kernel::{Kernel, SpaceId, VmConfig};
use vmem::noff::{build_image, Executable};
use vmem::page_replacer::PolicyKind;

const PAGE_SIZE: usize = 64;

fn policy_from_args() -> PolicyKind {
    match std::env::args().nth(1).as_deref() {
        Some("random") => PolicyKind::Random,
        Some("clock") => PolicyKind::Clock,
        Some("fifo") | None => PolicyKind::Fifo,
        Some(other) => {
            eprintln!("unknown policy {:?}, expected fifo|random|clock", other);
            std::process::exit(2);
        }
    }
}

fn spawn(kernel: &mut Kernel, name: &str, fill: u8) -> SpaceId {
    // Two pages of code, one page of data, plus the zero-fill region.
    let code: Vec<u8> = (0..2 * PAGE_SIZE).map(|i| (i as u8) ^ fill).collect();
    let data = vec![fill; PAGE_SIZE];
    let exe = Executable::parse(build_image(&code, &data, 256)).unwrap();
    kernel.exec(name, exe).unwrap()
}

fn main() {
    env_logger::init();

    let config = VmConfig {
        page_size: PAGE_SIZE,
        num_frames: 4,
        tlb_size: Some(2),
        policy: policy_from_args(),
        ..VmConfig::default()
    };
    let mut kernel = Kernel::new(config);

    let a = spawn(&mut kernel, "proc-a", 0x00);
    let b = spawn(&mut kernel, "proc-b", 0xa5);

    // Walk proc-a over more pages than the pool holds, mutating as we go,
    // so eviction and swap traffic actually happen.
    kernel.restore_state(a);
    let pages_a = kernel.space(a).num_pages();
    for vpn in 0..pages_a {
        let vaddr = vpn * PAGE_SIZE;
        let byte = kernel.read_byte(vaddr).unwrap_or_else(|fault| {
            eprintln!("proc-a terminated: {}", fault);
            std::process::exit(1);
        });
        kernel.write_byte(vaddr, byte.wrapping_add(1)).unwrap();
    }

    // Let proc-b steal every frame, then come back to proc-a and check its
    // first page round-tripped through the swap file.
    kernel.context_switch(b);
    let pages_b = kernel.space(b).num_pages();
    for vpn in 0..pages_b {
        kernel.read_byte(vpn * PAGE_SIZE).unwrap();
    }

    kernel.context_switch(a);
    let mut first_page = vec![0u8; PAGE_SIZE];
    for (i, byte) in first_page.iter_mut().enumerate() {
        *byte = kernel.read_byte(i).unwrap();
    }
    println!("proc-a page 0 after swap round-trip:");
    println!("{}", hex::encode(&first_page));

    println!("{}", kernel.statistics());

    kernel.exit(b);
    kernel.exit(a);
    assert_eq!(kernel.frame_directory().occupancy(), 0);
}
