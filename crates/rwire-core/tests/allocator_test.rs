//! Integration test: id allocation and request tracking
//!
//! Covers the client allocator's id/generation recycling, the server
//! registry's acceptance rules, the request tracker's at-most-once
//! resolution, and config loading.
//!
//! Run with: cargo test -p rwire-core --test allocator_test

use std::collections::HashSet;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rwire_core::{
    AllocationState, CoreError, KnownObjects, ObjectAllocator, RequestTracker, Resolution,
    WireConfig,
};
use rwire_protocol::{ObjectHandle, ObjectType};

#[test]
fn test_first_handles_start_at_one() {
    let mut alloc = ObjectAllocator::new();
    let a = alloc.new_object(|h| h);
    let b = alloc.new_object(|h| h);
    assert_eq!(a, ObjectHandle::new(1, 0));
    assert_eq!(b, ObjectHandle::new(2, 0));
    assert_eq!(alloc.get(1), Some(&a));
    assert_eq!(alloc.get(0), None);
    assert_eq!(alloc.get(3), None);
}

#[test]
fn test_freed_id_is_recycled_with_next_generation() {
    let mut alloc = ObjectAllocator::new();
    let a = alloc.new_object(|_| "a");
    assert_eq!(alloc.free(a.id), Some("a"));
    assert_eq!(alloc.get(a.id), None);

    let b = alloc.new_object(|_| "b");
    assert_eq!(b, ObjectHandle::new(a.id, a.generation + 1));
    assert_eq!(alloc.get_by_handle(a), None, "stale handle must not resolve");
    assert_eq!(alloc.get_by_handle(b), Some(&"b"));
}

#[test]
fn test_handles_never_repeat_under_random_churn() {
    let mut rng = StdRng::seed_from_u64(7);
    let mut alloc = ObjectAllocator::new();
    let mut live: Vec<ObjectHandle> = Vec::new();
    let mut seen = HashSet::new();

    for _ in 0..5000 {
        if live.is_empty() || rng.gen_bool(0.55) {
            let handle = alloc.new_object(|h| h);
            assert!(seen.insert(handle), "handle {} handed out twice", handle);
            live.push(handle);
        } else {
            let handle = live.swap_remove(rng.gen_range(0..live.len()));
            assert_eq!(alloc.free(handle.id), Some(handle));
        }
        assert_eq!(alloc.live_count(), live.len());
    }

    for handle in &live {
        assert_eq!(alloc.get_by_handle(*handle), Some(handle));
    }
    let iterated: Vec<_> = alloc.iter().map(|(h, _)| h).collect();
    let mut expected = live.clone();
    expected.sort_by_key(|h| h.id);
    assert_eq!(iterated, expected);
}

#[test]
fn test_exhausted_generation_retires_the_id() {
    let mut alloc = ObjectAllocator::new();
    let a = alloc.new_object(|_| ());
    alloc.set_generation(a.id, u32::MAX);
    assert_eq!(alloc.generation(a.id), Some(u32::MAX));
    alloc.free(a.id);

    let b = alloc.new_object(|_| ());
    assert_ne!(b.id, a.id, "exhausted id must not be recycled");
    assert_eq!(b, ObjectHandle::new(2, 0));
}

#[test]
fn test_known_objects_accepts_appends_and_reuse() {
    let mut known = KnownObjects::<u64>::new(ObjectType::Buffer);
    known.allocate(ObjectHandle::new(1, 0)).expect("append");
    known.set_native(1, 100);
    assert_eq!(known.get(1).and_then(|d| d.native), Some(100));

    let freed = known.free(1).expect("free");
    assert_eq!(freed.native, Some(100));
    assert!(known.get(1).is_none());

    known.allocate(ObjectHandle::new(1, 1)).expect("reuse");
    let data = known.get(1).expect("live");
    assert_eq!(data.native, None, "new objects start as error objects");
    assert_eq!(data.generation, 1);
}

#[test]
fn test_known_objects_rejects_bad_handles() {
    let mut known = KnownObjects::<u64>::new(ObjectType::Buffer);
    let rejected = |r: Result<(), CoreError>| matches!(r, Err(CoreError::InvalidAllocation { .. }));

    assert!(rejected(known.allocate(ObjectHandle::new(0, 0))));
    assert!(rejected(known.allocate(ObjectHandle::new(2, 0))), "skips id 1");

    known.allocate(ObjectHandle::new(1, 3)).expect("append");
    assert!(rejected(known.allocate(ObjectHandle::new(1, 4))), "still live");

    known.free(1).expect("free");
    assert!(rejected(known.allocate(ObjectHandle::new(1, 2))), "older generation");
    assert!(matches!(known.free(1), Err(CoreError::NotLive { id: 1, .. })));
}

#[test]
fn test_reserved_slot_is_invisible_until_filled() {
    let mut known = KnownObjects::<u64>::new(ObjectType::ComputePipeline);
    let handle = ObjectHandle::new(1, 0);
    known.reserve(handle).expect("reserve");
    assert!(known.is_reserved(handle));
    assert!(known.get(1).is_none());
    assert_eq!(known.handle_of(1), Some(handle));

    known.set_native(1, 9);
    assert!(!known.is_reserved(handle));
    assert_eq!(known.get(1).map(|d| d.state), Some(AllocationState::Allocated));
    assert_eq!(known.natives().collect::<Vec<_>>(), vec![(1, 9)]);
}

#[test]
fn test_tracker_resolves_each_serial_once() {
    let mut tracker = RequestTracker::new();
    let a = tracker.track("a");
    let b = tracker.track("b");
    assert_eq!((a, b), (1, 2));

    assert_eq!(tracker.resolve_reply(a), Resolution::Pending("a"));
    assert_eq!(tracker.resolve_reply(a), Resolution::Unknown, "double resolution");
    assert_eq!(tracker.resolve_reply(99), Resolution::Unknown);
    assert_eq!(tracker.len(), 1);
    assert!(tracker.contains(b));
}

#[test]
fn test_tracker_orphans_absorb_one_late_reply() {
    let mut tracker = RequestTracker::new();
    let a = tracker.track(1u32);
    let b = tracker.track(2u32);
    let c = tracker.track(1u32);

    let taken = tracker.take_where(true, |e| *e == 1);
    assert_eq!(taken, vec![(a, 1), (c, 1)]);
    assert_eq!(tracker.orphan_count(), 2);

    assert_eq!(tracker.resolve_reply(c), Resolution::Orphan);
    assert_eq!(tracker.resolve_reply(c), Resolution::Unknown);
    assert_eq!(tracker.resolve_reply(b), Resolution::Pending(2));

    let rest = tracker.drain();
    assert!(rest.is_empty());
    assert_eq!(tracker.orphan_count(), 0);
}

#[test]
fn test_tracker_drain_is_in_serial_order() {
    let mut tracker = RequestTracker::new();
    for i in 0..10 {
        tracker.track(i);
    }
    assert_eq!(tracker.cancel(11), None, "serial 11 not issued yet");
    let cancelled = tracker.track(99);
    assert_eq!(tracker.cancel(cancelled), Some(99));
    let serial = tracker.track(100);
    assert_eq!(serial, 12);

    let drained: Vec<u64> = tracker.drain().into_iter().map(|(s, _)| s).collect();
    assert_eq!(drained, vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 12]);
    assert!(tracker.is_empty());
}

#[test]
fn test_tracker_cancel_leaves_no_orphan() {
    let mut tracker = RequestTracker::new();
    let unsent = tracker.track("unsent");
    let sent = tracker.track("sent");

    assert_eq!(tracker.cancel(unsent), Some("unsent"));
    assert_eq!(tracker.cancel(unsent), None, "cancelled twice");
    assert_eq!(tracker.orphan_count(), 0);
    assert_eq!(tracker.resolve_reply(unsent), Resolution::Unknown);
    assert_eq!(tracker.resolve_reply(sent), Resolution::Pending("sent"));
    assert!(tracker.is_empty());

    // Resolved locally first, then found unsendable: the orphan goes too.
    let abandoned = tracker.track("abandoned");
    let taken = tracker.take_where(true, |_| true);
    assert_eq!(taken, vec![(abandoned, "abandoned")]);
    assert_eq!(tracker.orphan_count(), 1);
    assert_eq!(tracker.cancel(abandoned), None);
    assert_eq!(tracker.orphan_count(), 0);
}

#[test]
fn test_config_defaults_and_partial_override() {
    let config = WireConfig::from_toml(
        r#"
        [transport]
        fragment_size = 512
        "#,
    )
    .expect("parse");
    assert_eq!(config.transport.fragment_size, 512);
    assert_eq!(config.transport.buffer_size, 1_000_000);
    assert_eq!(config.server, WireConfig::default().server);

    let missing = WireConfig::load_or_default("/nonexistent/rwire.toml");
    assert_eq!(missing, WireConfig::default());
}

#[test]
fn test_config_rejects_inconsistent_sizes() {
    let err = WireConfig::from_toml(
        r#"
        [transport]
        buffer_size = 4096
        max_command_size = 1024
        "#,
    )
    .unwrap_err();
    assert!(matches!(err, CoreError::ConfigError(_)));
}
