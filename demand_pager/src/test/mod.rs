use std::sync::Arc;

use crate::{
    address::{VirtAddr, PAGE_SIZE, PHYS_BASE, SECTORS_PER_PAGE},
    modules::{
        block_device::{test::get_test_device, FileBlockDeviceModule},
        page_directory::SoftPageDirectory,
    },
    AddressSpace, VmConfig, VmManager,
};

mod eviction;
mod fault;

pub(crate) fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// VM with `frames` user frames and a swap file that holds `swap_slots` pages
pub(crate) fn get_test_vm(
    test_name: &str,
    frames: usize,
    swap_slots: usize,
) -> VmManager<FileBlockDeviceModule> {
    init_logging();

    let device = get_test_device(test_name, swap_slots * SECTORS_PER_PAGE);
    VmManager::new(
        VmConfig {
            user_frames: frames,
            ..VmConfig::default()
        },
        device,
    )
    .unwrap()
}

pub(crate) fn new_process(
    vm: &VmManager<FileBlockDeviceModule>,
) -> (Arc<AddressSpace>, Arc<SoftPageDirectory>) {
    let pagedir = Arc::new(SoftPageDirectory::new());
    let space = vm.create_address_space(pagedir.clone());
    (space, pagedir)
}

/// Start of the `n`th page below the top of user space
pub(crate) fn stack_page(n: usize) -> VirtAddr {
    VirtAddr::new(PHYS_BASE - (n + 1) * PAGE_SIZE)
}

/// Grows the stack onto page `n` as if the stack pointer pointed right at it
pub(crate) fn touch_stack(vm: &VmManager<FileBlockDeviceModule>, space: &AddressSpace, n: usize) {
    let addr = stack_page(n);
    assert!(vm.page_fault(space, addr, addr), "stack fault at {} failed", addr);
}
