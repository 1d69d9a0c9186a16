use std::{fs, sync::Arc, time::Instant};

use demand_pager::{
    address::{PAGE_SIZE, PHYS_BASE, SECTORS_PER_PAGE},
    modules::{
        block_device::FileBlockDeviceModule,
        file_store::{FileRef, HostFile},
        page_directory::SoftPageDirectory,
    },
    VirtAddr, VmConfig, VmManager,
};
use env_logger::{Builder, Env};
use log::info;
use rand::{rngs::SmallRng, RngCore, SeedableRng};

const USER_FRAMES: usize = 16;
const SWAP_SLOTS: usize = 64;
const STACK_PAGES: usize = 48;
const DATA_FILE: &str = "/tmp/demand_pager_demo.data";

fn main() {
    Builder::from_env(Env::default())
        .filter_level(log::LevelFilter::Info)
        .format_module_path(false)
        .init();

    let swap = FileBlockDeviceModule::new(
        "/tmp/demand_pager_demo.swap".to_string(),
        SWAP_SLOTS * SECTORS_PER_PAGE,
    )
    .unwrap();
    let vm = VmManager::new(
        VmConfig {
            user_frames: USER_FRAMES,
            ..VmConfig::default()
        },
        swap,
    )
    .unwrap();

    let space = vm.create_address_space(Arc::new(SoftPageDirectory::new()));
    let mut rand = SmallRng::seed_from_u64(4242);
    let start = Instant::now();

    // a stack three times as big as physical memory
    let esp = VirtAddr::new(PHYS_BASE - STACK_PAGES * PAGE_SIZE);
    let mut shadow = vec![0u8; STACK_PAGES * PAGE_SIZE];
    rand.fill_bytes(&mut shadow);
    for (i, page) in shadow.chunks_exact(PAGE_SIZE).enumerate().rev() {
        let addr = VirtAddr::new(PHYS_BASE - (STACK_PAGES - i) * PAGE_SIZE);
        vm.write_user(&space, addr, page, esp).unwrap();
    }

    let mut back = vec![0u8; shadow.len()];
    vm.read_user(&space, esp, &mut back, esp).unwrap();
    assert_eq!(back, shadow, "stack contents changed while paged out");

    // map a file, change it through memory and unmap it again
    fs::write(DATA_FILE, vec![b'.'; 3 * PAGE_SIZE + 100]).unwrap();
    let file: FileRef = HostFile::open(DATA_FILE).unwrap();
    let map_addr = VirtAddr::new(0x1000_0000);
    let id = vm.mmap(&space, 3, &file, map_addr).unwrap();
    let target = map_addr.checked_add_pages(2).unwrap();
    vm.write_user(&space, target, b"written through a mapping", esp)
        .unwrap();
    assert!(vm.munmap(&space, id));
    file.close();

    let data = fs::read(DATA_FILE).unwrap();
    assert_eq!(&data[2 * PAGE_SIZE..2 * PAGE_SIZE + 25], b"written through a mapping");
    fs::remove_file(DATA_FILE).unwrap();

    vm.free_address_space_vm_state(&space);

    let stats = vm.stats();
    info!("finished in {:?}", start.elapsed());
    info!(
        "faults: {}, stack growths: {}, file loads: {}",
        stats.faults, stats.stack_growths, stats.file_loads
    );
    info!(
        "evictions: {}, swap outs: {}, swap ins: {}, write backs: {}",
        stats.evictions, stats.swap_outs, stats.swap_ins, stats.write_backs
    );
}
