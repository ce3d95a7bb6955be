//! End-to-end collection scenarios driven through the public `Runtime`
//! API, exercising full mark-compact-remap cycles over realistic object
//! graphs built on the paged allocator.

use std::alloc::{alloc, Layout};

use cacophony_gc::page::PageKind;
use cacophony_gc::{test_util, with_runtime, Outline, RuntimeConfig, WordPtr};

unsafe fn alloc_bottom_frame(n_slots: usize, refs: impl IntoIterator<Item = usize>) -> WordPtr {
    let outline = Outline::leaked(n_slots, refs);
    let layout = Layout::array::<u64>(n_slots + 1).unwrap();
    let base = unsafe { alloc(layout) }.cast::<u64>();
    unsafe {
        for i in 0..=n_slots {
            base.add(i).write(0);
        }
        base.add(n_slots).write(outline.as_ptr() as u64);
        WordPtr::new(base.add(n_slots - 1)).unwrap()
    }
}

unsafe fn set_frame_slot(fp: WordPtr, offset: usize, value: WordPtr) {
    unsafe {
        *fp.as_ptr().sub(offset) = value.as_ptr() as u64;
    }
}

fn reset(gc_wait: usize) {
    test_util::reset(RuntimeConfig { regular_page_size: 4096, gc_wait });
}

/// S1: a 100-node singly linked list survives a collection intact.
#[test]
fn hundred_node_linked_list_survives_collection() {
    reset(0);
    unsafe {
        // A node is one reference word (`next`).
        let node_outline = Outline::leaked(1, [0]);

        let fp = alloc_bottom_frame(2, [0, 1]);
        with_runtime(|rt| rt.set_stack_bottom(fp));

        let mut head: Option<WordPtr> = None;
        for _ in 0..100 {
            let node = with_runtime(|rt| rt.alloc_struct(fp, node_outline));
            if let Some(prev_head) = head {
                *node.as_ptr() = prev_head.as_ptr() as u64;
            }
            head = Some(node);
        }
        set_frame_slot(fp, 1, head.unwrap());

        with_runtime(|rt| rt.run_gc(fp));

        // Walk the (possibly relocated) list from the frame slot and
        // count exactly 100 nodes.
        let mut count = 0;
        let mut cursor_raw = *fp.as_ptr().sub(1);
        while cursor_raw != 0 {
            count += 1;
            cursor_raw = *(cursor_raw as *mut u64);
        }
        assert_eq!(count, 100);
    }
}

/// S2: a dead prefix of allocations is reclaimed once unreachable.
#[test]
fn dead_prefix_is_reclaimed() {
    reset(0);
    unsafe {
        let outline = Outline::leaked(1, []);
        let fp = alloc_bottom_frame(2, [0, 1]);
        with_runtime(|rt| rt.set_stack_bottom(fp));

        for _ in 0..10 {
            let _ = with_runtime(|rt| rt.alloc_struct(fp, outline));
        }
        let survivor = with_runtime(|rt| rt.alloc_struct(fp, outline));
        set_frame_slot(fp, 1, survivor);

        with_runtime(|rt| rt.run_gc(fp));
        with_runtime(|rt| assert_eq!(rt.total_occupied(), 16));
    }
}

/// S3: a self-referential cycle (A <-> B) with no external root is
/// fully collected rather than kept alive forever.
#[test]
fn unreachable_cycle_is_collected() {
    reset(0);
    unsafe {
        let outline = Outline::leaked(1, [0]);
        let fp = alloc_bottom_frame(1, []);
        with_runtime(|rt| rt.set_stack_bottom(fp));

        let a = with_runtime(|rt| rt.alloc_struct(fp, outline));
        let b = with_runtime(|rt| rt.alloc_struct(fp, outline));
        *a.as_ptr() = b.as_ptr() as u64;
        *b.as_ptr() = a.as_ptr() as u64;
        // Neither a nor b is reachable from fp: the bottom frame has no
        // reference slots here.

        with_runtime(|rt| rt.run_gc(fp));
        with_runtime(|rt| assert_eq!(rt.total_occupied(), 0));
    }
}

/// S4: an oversize object survives a collection on its own dedicated
/// page.
#[test]
fn oversize_object_survives_collection() {
    reset(0);
    unsafe {
        let outline = Outline::leaked(600, []); // 4808 bytes, > one regular page
        let fp = alloc_bottom_frame(2, [0, 1]);
        with_runtime(|rt| rt.set_stack_bottom(fp));

        let big = with_runtime(|rt| rt.alloc_struct(fp, outline));
        set_frame_slot(fp, 1, big);

        with_runtime(|rt| rt.run_gc(fp));
        with_runtime(|rt| assert_eq!(rt.total_occupied(), 8 * 601));
    }
}

/// B3/S4 (freed half): once an oversize object's only reference is
/// dropped, the collection that follows frees its dedicated page rather
/// than keeping it around.
#[test]
fn oversize_object_page_is_freed_once_dead() {
    reset(0);
    unsafe {
        let outline = Outline::leaked(600, []); // 4808 bytes, > one regular page
        let fp = alloc_bottom_frame(2, [0, 1]);
        with_runtime(|rt| rt.set_stack_bottom(fp));

        let _big = with_runtime(|rt| rt.alloc_struct(fp, outline));
        // Root slot is left null: the oversize object is unreachable.

        with_runtime(|rt| {
            assert!(rt.allocator().pages().iter().any(|p| p.kind() == PageKind::Oversize));
        });

        with_runtime(|rt| rt.run_gc(fp));

        with_runtime(|rt| {
            assert_eq!(rt.total_occupied(), 0);
            assert!(!rt.allocator().pages().iter().any(|p| p.kind() == PageKind::Oversize));
        });
    }
}

/// S6: running with `GC_WAIT == 1` collects after every allocation and
/// never lets dead objects accumulate, keeping resident memory bounded.
#[test]
fn gc_wait_one_keeps_heap_bounded() {
    reset(1);
    unsafe {
        let outline = Outline::leaked(1, []);
        let fp = alloc_bottom_frame(2, [0, 1]);
        with_runtime(|rt| rt.set_stack_bottom(fp));

        for _ in 0..50 {
            let obj = with_runtime(|rt| rt.alloc_struct(fp, outline));
            set_frame_slot(fp, 1, obj);
        }
        with_runtime(|rt| rt.run_gc(fp));
        with_runtime(|rt| assert!(rt.total_occupied() <= 16));
    }
}

/// B1: a header-only object (N = 0) round-trips through a collection.
#[test]
fn header_only_object_survives_collection() {
    reset(0);
    unsafe {
        let outline = Outline::leaked(0, []);
        let fp = alloc_bottom_frame(2, [0, 1]);
        with_runtime(|rt| rt.set_stack_bottom(fp));

        let obj = with_runtime(|rt| rt.alloc_struct(fp, outline));
        set_frame_slot(fp, 1, obj);

        with_runtime(|rt| rt.run_gc(fp));
        with_runtime(|rt| assert_eq!(rt.total_occupied(), 8));
    }
}

/// B2: an object whose outline spans two bitmap chunks (N = 65) is
/// traced and relocated correctly.
#[test]
fn sixty_five_word_object_survives_collection() {
    reset(0);
    unsafe {
        let outline = Outline::leaked(65, [0, 64]);
        let fp = alloc_bottom_frame(2, [0, 1]);
        with_runtime(|rt| rt.set_stack_bottom(fp));

        let obj = with_runtime(|rt| rt.alloc_struct(fp, outline));
        let inner = with_runtime(|rt| rt.alloc_struct(fp, Outline::leaked(1, [])));
        *obj.as_ptr().add(64) = inner.as_ptr() as u64;
        set_frame_slot(fp, 1, obj);

        with_runtime(|rt| rt.run_gc(fp));
        with_runtime(|rt| assert_eq!(rt.total_occupied(), 8 * 66 + 16));
    }
}

/// B4: a null reference slot is skipped, not followed.
#[test]
fn null_reference_slot_is_not_followed() {
    reset(0);
    unsafe {
        let outline = Outline::leaked(1, [0]);
        let fp = alloc_bottom_frame(2, [0, 1]);
        with_runtime(|rt| rt.set_stack_bottom(fp));

        let obj = with_runtime(|rt| rt.alloc_struct(fp, outline));
        // obj's single reference slot is left null by allocation.
        set_frame_slot(fp, 1, obj);

        with_runtime(|rt| rt.run_gc(fp));
        with_runtime(|rt| assert_eq!(rt.total_occupied(), 16));
    }
}

/// S5: after a cycle that evacuates a partially-dead page while another
/// page survives untouched, the page with the most free space is the
/// allocator's tail.
#[test]
fn tail_after_cleanup_has_the_most_free_space() {
    reset(0);
    unsafe {
        // 24-byte objects: 4096 / 24 = 170 (remainder 16), so 170 objects
        // exactly fill one regular page.
        let node_outline = Outline::leaked(2, [0]);
        let fp = alloc_bottom_frame(2, [0, 1]);
        with_runtime(|rt| rt.set_stack_bottom(fp));

        let mut nodes = Vec::with_capacity(340);
        for _ in 0..340 {
            nodes.push(with_runtime(|rt| rt.alloc_struct(fp, node_outline)));
        }
        with_runtime(|rt| assert_eq!(rt.allocator().pages().len(), 2));

        // Keep only the first 3 objects of the older page (nodes[0..170])
        // alive, plus every object of the newer page (nodes[170..340]),
        // threaded into one chain rooted at nodes[0].
        let mut survivors: Vec<WordPtr> = nodes[0..3].to_vec();
        survivors.extend_from_slice(&nodes[170..340]);
        for window in survivors.windows(2) {
            *window[0].as_ptr() = window[1].as_ptr() as u64;
        }
        set_frame_slot(fp, 1, survivors[0]);

        with_runtime(|rt| rt.run_gc(fp));

        with_runtime(|rt| {
            assert_eq!(rt.total_occupied(), survivors.len() * 24);
            let pages = rt.allocator().pages();
            assert_eq!(pages.len(), 2, "one untouched survivor page plus one evacuation destination");
            let tail = pages.last().unwrap();
            assert!(pages.iter().all(|p| tail.free_space() >= p.free_space()), "tail must have the most free space");
        });
    }
}
