use rand::{rngs::SmallRng, RngCore, SeedableRng};

use super::{get_test_vm, new_process, stack_page, touch_stack};
use crate::{
    address::{PAGE_SIZE, PHYS_BASE},
    modules::page_directory::PageDirectoryModule,
    PageState, VirtAddr, VmError,
};

#[test]
fn test_lru_victim_is_evicted() {
    const FRAMES: usize = 4;
    let vm = get_test_vm("test_lru_victim_is_evicted", FRAMES, 8);
    let (space, pagedir) = new_process(&vm);

    for n in 0..FRAMES {
        touch_stack(&vm, &space, n);
    }
    assert_eq!(vm.memory().free_count(), 0);
    assert_eq!(vm.stats().evictions, 0);

    let oldest = space.pages().find(stack_page(0)).unwrap();
    let oldest_access = oldest.lock().last_access();
    for n in 1..FRAMES {
        let page = space.pages().find(stack_page(n)).unwrap();
        assert!(page.lock().last_access() > oldest_access);
    }

    touch_stack(&vm, &space, FRAMES);

    assert_eq!(vm.stats().evictions, 1);
    assert_eq!(vm.stats().swap_outs, 1);
    assert_eq!(vm.frame_table().len(), FRAMES);

    {
        let inner = oldest.lock();
        assert!(!inner.is_resident());
        assert_eq!(inner.state(), PageState::Swapped);
        assert!(vm.swap().is_allocated(inner.swap_slot().unwrap()));
    }
    assert!(pagedir.lookup(stack_page(0)).is_none());
    for n in 1..=FRAMES {
        assert!(pagedir.lookup(stack_page(n)).is_some());
    }
}

#[test]
fn test_swapped_page_comes_back_intact() {
    const FRAMES: usize = 3;
    let vm = get_test_vm("test_swapped_page_comes_back_intact", FRAMES, 8);
    let (space, pagedir) = new_process(&vm);
    let mut rand = SmallRng::seed_from_u64(1238974612);

    let mut expected = Vec::new();
    for n in 0..FRAMES {
        touch_stack(&vm, &space, n);
        let mut data = vec![0u8; PAGE_SIZE];
        rand.fill_bytes(&mut data);
        vm.write_user(&space, stack_page(n), &data, stack_page(n))
            .unwrap();
        expected.push(data);
    }

    // push everything out once
    for n in FRAMES..2 * FRAMES {
        touch_stack(&vm, &space, n);
    }
    assert_eq!(vm.stats().swap_outs, FRAMES as u64);
    assert_eq!(vm.swap().free_slot_count(), 8 - FRAMES);

    let esp = VirtAddr::new(PHYS_BASE - 2 * FRAMES * PAGE_SIZE);
    for (n, data) in expected.iter().enumerate() {
        let mut back = vec![0u8; PAGE_SIZE];
        vm.read_user(&space, stack_page(n), &mut back, esp).unwrap();
        assert_eq!(&back, data, "page {} corrupted", n);
        assert!(pagedir.lookup(stack_page(n)).is_some());
    }

    // every page is either resident or in swap, never both, never neither
    assert_eq!(vm.stats().swap_ins, FRAMES as u64);
    for page in space.pages().entries() {
        let inner = page.lock();
        assert!(inner.is_resident() ^ inner.swap_slot().is_some());
    }
    assert_eq!(
        vm.swap().free_slot_count(),
        8 - (space.pages().len() - vm.frame_table().len())
    );
}

#[test]
fn test_swap_exhaustion_terminates_faulting_process() {
    // two frames, one swap slot
    let vm = get_test_vm("test_swap_exhaustion_terminates_faulting_process", 2, 1);
    let (space, pagedir) = new_process(&vm);

    touch_stack(&vm, &space, 0);
    touch_stack(&vm, &space, 1);

    // page 0 takes the only slot
    touch_stack(&vm, &space, 2);
    assert_eq!(vm.swap().free_slot_count(), 0);

    let addr = stack_page(3);
    assert!(!vm.page_fault(&space, addr, addr));
    assert_eq!(space.exit_status(), Some(VmError::EXIT_CODE));

    // nothing was torn down half way
    assert!(space.pages().find(addr).is_none());
    assert_eq!(vm.frame_table().len(), 2);
    assert!(pagedir.lookup(stack_page(1)).is_some());
    assert!(pagedir.lookup(stack_page(2)).is_some());
    assert!(space.pages().find(stack_page(1)).unwrap().lock().is_resident());
    assert_eq!(vm.stats().evictions, 1);
}

#[test]
fn test_locked_pages_are_skipped() {
    let vm = get_test_vm("test_locked_pages_are_skipped", 2, 4);
    let (space, pagedir) = new_process(&vm);

    touch_stack(&vm, &space, 0);
    touch_stack(&vm, &space, 1);

    // page 0 is the LRU victim, but somebody is working on it
    let busy = space.pages().find(stack_page(0)).unwrap();
    let guard = busy.lock();

    touch_stack(&vm, &space, 2);
    assert!(guard.is_resident());
    assert!(pagedir.lookup(stack_page(0)).is_some());
    assert!(pagedir.lookup(stack_page(1)).is_none());
    drop(guard);

    // with every other frame locked there is nothing to evict
    let a = space.pages().find(stack_page(0)).unwrap();
    let b = space.pages().find(stack_page(2)).unwrap();
    let _a = a.lock();
    let _b = b.lock();
    let addr = stack_page(3);
    assert!(matches!(
        vm.resolve_fault(&space, addr, addr),
        Err(VmError::OutOfFrames)
    ));
}

#[test]
fn test_eviction_across_address_spaces() {
    let vm = get_test_vm("test_eviction_across_address_spaces", 2, 4);
    let (first, first_dir) = new_process(&vm);
    let (second, _) = new_process(&vm);

    touch_stack(&vm, &first, 0);
    vm.write_user(&first, stack_page(0), b"first", stack_page(0))
        .unwrap();
    touch_stack(&vm, &first, 1);

    // the other process takes the oldest frame
    touch_stack(&vm, &second, 0);
    assert!(first_dir.lookup(stack_page(0)).is_none());
    assert_eq!(
        first.pages().find(stack_page(0)).unwrap().lock().state(),
        PageState::Swapped
    );
    assert_eq!(vm.frame_table().entries().iter().filter(|e| e.owner == second.id()).count(), 1);

    let mut buf = [0u8; 5];
    vm.read_user(&first, stack_page(0), &mut buf, stack_page(1))
        .unwrap();
    assert_eq!(&buf, b"first");
}
