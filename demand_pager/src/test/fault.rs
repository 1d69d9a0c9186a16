use std::sync::Arc;

use rand::{rngs::SmallRng, RngCore, SeedableRng};

use super::{get_test_vm, new_process, stack_page, touch_stack};
use crate::{
    address::{VirtAddr, PAGE_SIZE, PHYS_BASE, USER_BASE},
    modules::{
        file_store::{FileRef, MemoryFile},
        page_directory::{PageDirectoryModule, SoftPageDirectory},
    },
    PageState, VmError,
};

#[test]
fn test_stack_growth_within_slack() {
    let vm = get_test_vm("test_stack_growth_within_slack", 4, 4);
    let (space, pagedir) = new_process(&vm);

    let esp = VirtAddr::new(PHYS_BASE - PAGE_SIZE + 64);

    // exactly 32 bytes below the stack pointer is still a push
    let push = VirtAddr::new(esp.as_usize() - 32);
    assert!(vm.page_fault(&space, push, esp));

    let page = space.pages().find(push).unwrap();
    assert_eq!(page.addr(), push.page_round_down());
    {
        let inner = page.lock();
        assert!(inner.is_resident());
        assert!(inner.is_writable());
        assert_eq!(inner.state(), PageState::AnonymousZero);
    }

    let mapping = pagedir.lookup(push.page_round_down()).unwrap();
    assert!(mapping.writable);
    assert!(vm.memory().frame(mapping.frame).iter().all(|b| *b == 0));

    assert_eq!(vm.stats().stack_growths, 1);
    assert!(!space.is_terminated());
}

#[test]
fn test_stack_growth_rejects_far_access() {
    let vm = get_test_vm("test_stack_growth_rejects_far_access", 4, 4);
    let (space, pagedir) = new_process(&vm);

    let esp = VirtAddr::new(PHYS_BASE - 16);
    let far = VirtAddr::new(PHYS_BASE - 3 * PAGE_SIZE);

    assert!(matches!(
        vm.resolve_fault(&space, far, esp),
        Err(VmError::InvalidStackAccess { .. })
    ));
    assert!(space.pages().is_empty());
    assert_eq!(pagedir.mapped_count(), 0);

    assert!(!vm.page_fault(&space, far, esp));
    assert_eq!(space.exit_status(), Some(VmError::EXIT_CODE));
}

#[test]
fn test_illegal_addresses_are_fatal() {
    let vm = get_test_vm("test_illegal_addresses_are_fatal", 2, 2);
    let esp = VirtAddr::new(PHYS_BASE - 16);

    for addr in [0, USER_BASE - 1, PHYS_BASE, PHYS_BASE + PAGE_SIZE] {
        let (space, _) = new_process(&vm);
        assert!(matches!(
            vm.resolve_fault(&space, VirtAddr::new(addr), esp),
            Err(VmError::BadAddress(_))
        ));
        assert!(!vm.page_fault(&space, VirtAddr::new(addr), esp));
        assert_eq!(space.exit_status(), Some(-1));
    }
    assert!(vm.frame_table().is_empty());
}

#[test]
fn test_demand_segment_loads_lazily() {
    let vm = get_test_vm("test_demand_segment_loads_lazily", 4, 4);
    let (space, pagedir) = new_process(&vm);

    let mut rand = SmallRng::seed_from_u64(9813412);
    let mut contents = vec![0u8; 6000];
    rand.fill_bytes(&mut contents);
    let file: FileRef = MemoryFile::new(contents.clone());

    let base = VirtAddr::new(USER_BASE);
    vm.register_demand_segment(&space, &file, 0, base, 6000, 2 * PAGE_SIZE - 6000, false)
        .unwrap();
    assert_eq!(space.pages().len(), 2);
    assert_eq!(pagedir.mapped_count(), 0);
    assert!(vm.frame_table().is_empty());

    // touch only the second page
    let second = VirtAddr::new(USER_BASE + PAGE_SIZE);
    assert!(vm.page_fault(&space, VirtAddr::new(second.as_usize() + 10), VirtAddr::new(PHYS_BASE)));

    let mapping = pagedir.lookup(second).unwrap();
    assert!(!mapping.writable);
    assert!(pagedir.lookup(base).is_none());
    assert_eq!(space.pages().find(second).unwrap().lock().state(), PageState::FileBacked);

    {
        let frame = vm.memory().frame(mapping.frame);
        assert_eq!(&frame[..6000 - PAGE_SIZE], &contents[PAGE_SIZE..]);
        assert!(frame[6000 - PAGE_SIZE..].iter().all(|b| *b == 0));
    }
    assert_eq!(vm.stats().file_loads, 1);

    // read-only pages reject writes from the kernel side too
    assert!(matches!(
        vm.write_user(&space, second, &[1, 2, 3], VirtAddr::new(PHYS_BASE)),
        Err(VmError::ReadOnly(addr)) if addr == second
    ));

    // reading across the page boundary faults the first page in
    let mut buf = vec![0u8; 200];
    vm.read_user(&space, VirtAddr::new(USER_BASE + PAGE_SIZE - 100), &mut buf, VirtAddr::new(PHYS_BASE))
        .unwrap();
    assert_eq!(&buf[..], &contents[PAGE_SIZE - 100..PAGE_SIZE + 100]);
    assert_eq!(vm.stats().file_loads, 2);
}

#[test]
fn test_demand_segment_alignment() {
    let vm = get_test_vm("test_demand_segment_alignment", 2, 2);
    let (space, _) = new_process(&vm);
    let file: FileRef = MemoryFile::new(vec![0; PAGE_SIZE]);

    assert!(matches!(
        vm.register_demand_segment(&space, &file, 0, VirtAddr::new(USER_BASE + 8), 100, PAGE_SIZE - 100, true),
        Err(VmError::UnalignedSegment(_))
    ));
    assert!(matches!(
        vm.register_demand_segment(&space, &file, 0, VirtAddr::new(USER_BASE), 100, 100, true),
        Err(VmError::UnalignedSegment(_))
    ));
    assert!(space.pages().is_empty());
}

#[test]
fn test_demand_segment_rolls_back_on_overlap() {
    let vm = get_test_vm("test_demand_segment_rolls_back_on_overlap", 2, 2);
    let (space, _) = new_process(&vm);
    let file: FileRef = MemoryFile::new(vec![0; 3 * PAGE_SIZE]);

    let taken = VirtAddr::new(USER_BASE + 5 * PAGE_SIZE);
    vm.register_demand_segment(&space, &file, 0, taken, PAGE_SIZE, 0, true)
        .unwrap();

    // pages 3 and 4 are free, page 5 is not
    assert!(matches!(
        vm.register_demand_segment(
            &space,
            &file,
            0,
            VirtAddr::new(USER_BASE + 3 * PAGE_SIZE),
            3 * PAGE_SIZE,
            0,
            true
        ),
        Err(VmError::AlreadyExists(addr)) if addr == taken
    ));
    assert_eq!(space.pages().pages(), vec![taken]);
}

#[test]
fn test_discarded_segment_gives_back_resident_frame() {
    let vm = get_test_vm("test_discarded_segment_gives_back_resident_frame", 2, 2);
    let (space, pagedir) = new_process(&vm);
    let file: FileRef = MemoryFile::new(vec![7; 2 * PAGE_SIZE]);
    let base = VirtAddr::new(USER_BASE);

    vm.register_demand_segment(&space, &file, 0, base, 2 * PAGE_SIZE, 0, true)
        .unwrap();
    let entries = space.pages().entries();

    // another thread of the process touched the first page before the rollback
    assert!(vm.page_fault(&space, base, base));
    assert_eq!(vm.frame_table().len(), 1);

    vm.discard_pages(&space, &entries);

    assert!(space.pages().is_empty());
    assert!(vm.frame_table().is_empty());
    assert_eq!(vm.memory().free_count(), 2);
    assert!(pagedir.lookup(base).is_none());
    assert!(entries.iter().all(|e| e.lock().removed));

    // discarding twice does nothing
    vm.discard_pages(&space, &entries);
    assert_eq!(vm.memory().free_count(), 2);
}

#[test]
fn test_short_read_releases_frame() {
    let vm = get_test_vm("test_short_read_releases_frame", 2, 2);
    let (space, pagedir) = new_process(&vm);

    // the file is shorter than the segment claims
    let file: FileRef = MemoryFile::new(vec![7; 100]);
    let base = VirtAddr::new(USER_BASE);
    vm.register_demand_segment(&space, &file, 0, base, PAGE_SIZE, 0, true)
        .unwrap();

    assert!(matches!(
        vm.resolve_fault(&space, base, VirtAddr::new(PHYS_BASE)),
        Err(VmError::ShortRead { done: 100, expected: PAGE_SIZE, .. })
    ));
    assert!(vm.frame_table().is_empty());
    assert_eq!(vm.memory().free_count(), 2);
    assert_eq!(pagedir.mapped_count(), 0);
    assert!(!space.pages().find(base).unwrap().lock().is_resident());
}

#[test]
fn test_install_failure_releases_frame() {
    let vm = get_test_vm("test_install_failure_releases_frame", 4, 4);
    let pagedir = Arc::new(SoftPageDirectory::with_capacity_limit(1));
    let space = vm.create_address_space(pagedir.clone());

    touch_stack(&vm, &space, 0);

    let addr = stack_page(1);
    assert!(matches!(
        vm.resolve_fault(&space, addr, addr),
        Err(VmError::InstallFailed(_))
    ));
    assert!(space.pages().find(addr).is_none());
    assert_eq!(vm.frame_table().len(), 1);
    assert_eq!(vm.memory().free_count(), 3);
}

#[test]
fn test_resident_page_fault_is_noop() {
    let vm = get_test_vm("test_resident_page_fault_is_noop", 2, 2);
    let (space, pagedir) = new_process(&vm);

    touch_stack(&vm, &space, 0);
    let before = pagedir.lookup(stack_page(0)).unwrap();

    // a second context faulting on the same page finds it resident
    touch_stack(&vm, &space, 0);
    assert_eq!(pagedir.lookup(stack_page(0)), Some(before));
    assert_eq!(vm.frame_table().len(), 1);
    assert_eq!(vm.stats().stack_growths, 1);
}

#[test]
fn test_push_grows_one_page_far_access_fails() {
    let vm = get_test_vm("test_push_grows_one_page_far_access_fails", 4, 4);
    let (space, _) = new_process(&vm);

    let esp = VirtAddr::new(PHYS_BASE - PAGE_SIZE + 8);
    assert!(vm.page_fault(&space, VirtAddr::new(esp.as_usize() - 4), esp));
    assert_eq!(space.pages().len(), 1);
    assert_eq!(vm.stats().stack_growths, 1);

    assert!(!vm.page_fault(&space, VirtAddr::new(esp.as_usize() - PAGE_SIZE), esp));
    assert_eq!(space.pages().len(), 1);
    assert_eq!(space.exit_status(), Some(-1));
}
