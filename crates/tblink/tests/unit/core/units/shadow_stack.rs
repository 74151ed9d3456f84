//! Shadow Stack Tests.
//!
//! Verifies LIFO ordering, the base sentinel, both overflow policies, and
//! flush behaviour of the raw stack.

use std::collections::VecDeque;

use proptest::prelude::*;
use rstest::rstest;
use tblink_core::common::GuestAddr;
use tblink_core::common::constants::SHACK_BASE;
use tblink_core::config::OverflowPolicy;
use tblink_core::core::units::shadow::{ShadowEntry, ShadowStack, SlotRef};

fn entry(ret: u64, slot: usize) -> ShadowEntry {
    ShadowEntry {
        expected: GuestAddr(ret),
        slot: SlotRef(slot),
    }
}

// ══════════════════════════════════════════════════════════
// 1. Basic push/pop
// ══════════════════════════════════════════════════════════

#[test]
fn new_stack_is_empty_at_base() {
    let stack = ShadowStack::new(4, OverflowPolicy::Reset);
    assert!(stack.is_empty());
    assert_eq!(stack.top(), SHACK_BASE);
    assert_eq!(stack.capacity(), 4);
    assert_eq!(stack.end(), 5);
    assert_eq!(stack.peek(), ShadowEntry::BASE);
}

#[test]
fn push_pop_lifo_order() {
    let mut stack = ShadowStack::new(8, OverflowPolicy::Reset);
    assert!(!stack.push(entry(0xA, 0)));
    assert!(!stack.push(entry(0xB, 1)));
    assert!(!stack.push(entry(0xC, 2)));

    assert_eq!(stack.peek(), entry(0xC, 2), "Most recent push is on top");
    stack.pop();
    assert_eq!(stack.peek(), entry(0xB, 1));
    stack.pop();
    assert_eq!(stack.peek(), entry(0xA, 0));
    stack.pop();
    assert!(stack.is_empty());
}

#[test]
fn pop_empty_is_a_no_op() {
    let mut stack = ShadowStack::new(2, OverflowPolicy::Reset);
    stack.pop();
    stack.pop();
    assert!(stack.is_empty());
    assert_eq!(stack.top(), SHACK_BASE);
}

#[test]
fn base_entry_never_matches_a_real_return() {
    let stack = ShadowStack::new(2, OverflowPolicy::Reset);
    assert_eq!(stack.peek().expected, GuestAddr(u64::MAX));
    assert_eq!(stack.peek().slot, SlotRef::NONE);
}

// ══════════════════════════════════════════════════════════
// 2. Overflow policies
// ══════════════════════════════════════════════════════════

#[rstest]
#[case(OverflowPolicy::Reset)]
#[case(OverflowPolicy::Wrap)]
fn overflow_restarts_past_the_base(#[case] policy: OverflowPolicy) {
    let mut stack = ShadowStack::new(4, policy);
    for i in 0..4 {
        assert!(!stack.push(entry(0x100 + i, i as usize)));
    }
    assert_eq!(stack.top(), 4);

    assert!(stack.push(entry(0x500, 9)), "fifth push must report overflow");
    assert_eq!(stack.top(), SHACK_BASE + 1);
    assert_eq!(stack.peek(), entry(0x500, 9));
}

#[test]
fn reset_overflow_forgets_older_entries() {
    let mut stack = ShadowStack::new(2, OverflowPolicy::Reset);
    let _ = stack.push(entry(0x1, 0));
    let _ = stack.push(entry(0x2, 1));
    let _ = stack.push(entry(0x3, 2));

    stack.pop();
    assert!(stack.is_empty(), "entries below the restart point are unreachable");
}

#[test]
fn wrap_overflow_keeps_recent_entries() {
    let mut stack = ShadowStack::new(2, OverflowPolicy::Wrap);
    let _ = stack.push(entry(0x1, 0));
    let _ = stack.push(entry(0x2, 1));
    let _ = stack.push(entry(0x3, 2));

    stack.pop();
    assert_eq!(stack.top(), 2, "pop from the first entry wraps to the last");
    assert_eq!(stack.peek(), entry(0x2, 1));
}

#[rstest]
#[case(OverflowPolicy::Reset)]
#[case(OverflowPolicy::Wrap)]
fn popping_the_only_entry_empties_the_stack(#[case] policy: OverflowPolicy) {
    let mut stack = ShadowStack::new(3, policy);
    let _ = stack.push(entry(0x10, 0));
    assert_eq!(stack.retreat(), SHACK_BASE);

    stack.pop();
    assert!(stack.is_empty());
    assert_eq!(stack.live(), 0);
}

#[test]
fn wrap_retreat_wraps_only_past_older_entries() {
    let mut stack = ShadowStack::new(3, OverflowPolicy::Wrap);
    for i in 0..4 {
        let _ = stack.push(entry(0x10 + i, i as usize));
    }
    assert_eq!(stack.top(), 1);
    assert_eq!(stack.live(), 3);
    assert_eq!(stack.retreat(), 3, "older frames sit at the end of the ring");
}

#[rstest]
#[case(OverflowPolicy::Reset)]
#[case(OverflowPolicy::Wrap)]
fn balanced_calls_never_overflow(#[case] policy: OverflowPolicy) {
    let mut stack = ShadowStack::new(4, policy);
    for round in 0..10 {
        assert!(!stack.push(entry(0x1000, 0)), "round {round}");
        stack.pop();
        assert!(stack.is_empty(), "round {round}");
    }
}

#[test]
fn wrap_ring_wraps_without_overflow_when_not_full() {
    let mut stack = ShadowStack::new(3, OverflowPolicy::Wrap);
    for i in 0..4 {
        let _ = stack.push(entry(0x10 + i, i as usize));
    }
    stack.pop();
    assert_eq!(stack.top(), 3);
    assert_eq!(stack.live(), 2);

    assert!(!stack.push(entry(0x20, 5)), "reaching the end with room left is not an overflow");
    assert_eq!(stack.top(), 1);
    assert_eq!(stack.live(), 3);

    stack.pop();
    assert_eq!(stack.peek(), entry(0x12, 2));
    stack.pop();
    assert_eq!(stack.peek(), entry(0x11, 1));
    stack.pop();
    assert!(stack.is_empty());
}

// ══════════════════════════════════════════════════════════
// 3. Flush
// ══════════════════════════════════════════════════════════

#[rstest]
#[case(OverflowPolicy::Reset)]
#[case(OverflowPolicy::Wrap)]
fn flush_is_idempotent(#[case] policy: OverflowPolicy) {
    let mut stack = ShadowStack::new(4, policy);
    stack.flush();
    assert!(stack.is_empty());

    let _ = stack.push(entry(0x10, 0));
    stack.flush();
    stack.flush();
    assert!(stack.is_empty());

    let _ = stack.push(entry(0x20, 1));
    assert_eq!(stack.top(), SHACK_BASE + 1);
    assert_eq!(stack.peek(), entry(0x20, 1));
}

#[test]
fn wrap_flush_hides_entries_without_clearing_them() {
    let mut stack = ShadowStack::new(3, OverflowPolicy::Wrap);
    for i in 0..4 {
        let _ = stack.push(entry(0x10 + i, i as usize));
    }
    stack.flush();
    assert_eq!(stack.live(), 0);
    assert_eq!(stack.entry(3), Some(entry(0x12, 2)), "flush leaves storage alone");

    let _ = stack.push(entry(0x40, 7));
    stack.pop();
    assert!(stack.is_empty(), "pre-flush frames must stay unreachable");
    assert_eq!(stack.peek(), ShadowEntry::BASE);
}

#[test]
fn entry_out_of_range_is_none() {
    let stack = ShadowStack::new(2, OverflowPolicy::Reset);
    assert!(stack.entry(2).is_some());
    assert!(stack.entry(3).is_none());
}

// ══════════════════════════════════════════════════════════
// 4. Properties
// ══════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn pops_mirror_pushes_within_capacity(rets in prop::collection::vec(0u64..0x1_0000, 0..16)) {
        let mut stack = ShadowStack::new(16, OverflowPolicy::Reset);
        for (i, ret) in rets.iter().enumerate() {
            prop_assert!(!stack.push(entry(*ret, i)));
        }
        for (i, ret) in rets.iter().enumerate().rev() {
            prop_assert_eq!(stack.peek(), entry(*ret, i));
            stack.pop();
        }
        prop_assert!(stack.is_empty());
    }

    #[test]
    fn top_stays_in_bounds(ops in prop::collection::vec(any::<bool>(), 0..64), wrap in any::<bool>()) {
        let policy = if wrap { OverflowPolicy::Wrap } else { OverflowPolicy::Reset };
        let mut stack = ShadowStack::new(5, policy);
        for (i, push) in ops.into_iter().enumerate() {
            if push {
                let _ = stack.push(entry(i as u64, i));
            } else {
                stack.pop();
            }
            prop_assert!(stack.top() < stack.end());
            prop_assert_eq!(stack.is_empty(), stack.live() == 0);
        }
    }

    #[test]
    fn wrap_keeps_the_most_recent_frames(ops in prop::collection::vec(prop::option::of(0u64..0x100), 0..96)) {
        const CAPACITY: usize = 5;
        let mut stack = ShadowStack::new(CAPACITY, OverflowPolicy::Wrap);
        let mut model: VecDeque<ShadowEntry> = VecDeque::new();

        for (i, op) in ops.into_iter().enumerate() {
            match op {
                Some(ret) => {
                    let e = entry(ret, i);
                    let overflowed = stack.push(e);
                    model.push_back(e);
                    prop_assert_eq!(overflowed, model.len() > CAPACITY);
                    if model.len() > CAPACITY {
                        let _ = model.pop_front();
                    }
                }
                None => {
                    stack.pop();
                    let _ = model.pop_back();
                }
            }
            prop_assert_eq!(stack.live(), model.len());
            prop_assert_eq!(stack.peek(), model.back().copied().unwrap_or(ShadowEntry::BASE));
        }
    }
}
