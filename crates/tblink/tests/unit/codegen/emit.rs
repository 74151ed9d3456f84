//! Protocol Compiler Output Tests.
//!
//! Pins the exact operation sequence each protocol compiler emits, since a
//! backend lowers these one-to-one.

use pretty_assertions::assert_eq;
use tblink_core::codegen::ops::{Cond, EntryPart, EnvField, Helper, Label, Operand};
use tblink_core::codegen::{Op, OpBuilder, Temp, emit_flush, emit_ibtc_lookup, emit_pop, emit_push};
use tblink_core::common::GuestAddr;
use tblink_core::config::OverflowPolicy;

use crate::common::harness::{STACK_SIZE, TestContext};

#[test]
fn push_sequence() {
    let mut tc = TestContext::new();
    let mut b = OpBuilder::new();
    let site = emit_push(&mut b, &mut tc.ctx, &tc.registry, GuestAddr(0x1000)).unwrap();
    let (top, end, not_full) = (Temp(0), Temp(1), Label(0));

    assert_eq!(
        b.finish(),
        vec![
            Op::LdEnv { dst: top, field: EnvField::ShackTop },
            Op::LdEnv { dst: end, field: EnvField::ShackEnd },
            Op::AddI { dst: top, src: top, imm: 1 },
            Op::BrCond { cond: Cond::Lt, lhs: top, rhs: Operand::Temp(end), label: not_full },
            Op::Call { helper: Helper::ShackOverflow, arg: None, dst: None },
            Op::Movi { dst: top, imm: 1 },
            Op::SetLabel(not_full),
            Op::StEntry { index: top, part: EntryPart::Expected, value: Operand::Imm(0x1000) },
            Op::StEntry { index: top, part: EntryPart::Slot, value: Operand::Imm(site.slot.0 as u64) },
            Op::StEnv { field: EnvField::ShackTop, src: top },
        ]
    );
}

#[test]
fn push_compiles_the_call_site() {
    let mut tc = TestContext::new();
    let _ = tc.register(0x1000, 0xAAAA);
    let mut b = OpBuilder::new();
    let site = emit_push(&mut b, &mut tc.ctx, &tc.registry, GuestAddr(0x1000)).unwrap();

    assert!(site.linked);
    assert_eq!(tc.ctx.stats.call_sites, 1);
    assert_eq!(tc.ctx.stats.shadow_pushes, 0, "emitting must not execute the push");
    assert!(tc.ctx.shadow().is_empty());
}

#[test]
fn pop_sequence_reset_policy() {
    let tc = TestContext::with_policy(OverflowPolicy::Reset);
    let mut b = OpBuilder::new();
    let actual = b.new_temp();
    emit_pop(&mut b, &tc.ctx, actual);
    let (top, expected, slot, host, miss) = (Temp(1), Temp(2), Temp(3), Temp(4), Label(0));

    assert_eq!(
        b.finish(),
        vec![
            Op::LdEnv { dst: top, field: EnvField::ShackTop },
            Op::BrCond { cond: Cond::Eq, lhs: top, rhs: Operand::Imm(0), label: miss },
            Op::LdEntry { dst: expected, index: top, part: EntryPart::Expected },
            Op::BrCond { cond: Cond::Ne, lhs: actual, rhs: Operand::Temp(expected), label: miss },
            Op::LdEntry { dst: slot, index: top, part: EntryPart::Slot },
            Op::LdSlot { dst: host, slot },
            Op::AddI { dst: top, src: top, imm: -1 },
            Op::StEnv { field: EnvField::ShackTop, src: top },
            Op::BrCond { cond: Cond::Eq, lhs: host, rhs: Operand::Imm(0), label: miss },
            Op::GotoPtr { target: host },
            Op::SetLabel(miss),
        ]
    );
}

#[test]
fn pop_sequence_wrap_policy_tracks_live_entries() {
    let tc = TestContext::with_policy(OverflowPolicy::Wrap);
    let mut b = OpBuilder::new();
    let actual = b.new_temp();
    emit_pop(&mut b, &tc.ctx, actual);
    let ops = b.finish();
    let (top, host, live) = (Temp(1), Temp(4), Temp(5));
    let (miss, stepped, stored) = (Label(0), Label(1), Label(2));

    assert_eq!(ops.len(), 20);
    assert_eq!(
        ops[6..].to_vec(),
        vec![
            Op::AddI { dst: top, src: top, imm: -1 },
            Op::LdEnv { dst: live, field: EnvField::ShackLive },
            Op::AddI { dst: live, src: live, imm: -1 },
            Op::BrCond { cond: Cond::Ne, lhs: top, rhs: Operand::Imm(0), label: stepped },
            Op::Movi { dst: top, imm: STACK_SIZE as u64 },
            Op::SetLabel(stepped),
            Op::BrCond { cond: Cond::Ne, lhs: live, rhs: Operand::Imm(0), label: stored },
            Op::Movi { dst: top, imm: 0 },
            Op::SetLabel(stored),
            Op::StEnv { field: EnvField::ShackTop, src: top },
            Op::StEnv { field: EnvField::ShackLive, src: live },
            Op::BrCond { cond: Cond::Eq, lhs: host, rhs: Operand::Imm(0), label: miss },
            Op::GotoPtr { target: host },
            Op::SetLabel(miss),
        ]
    );
}

#[test]
fn push_sequence_wrap_policy_overflows_only_when_full() {
    let mut tc = TestContext::with_policy(OverflowPolicy::Wrap);
    let mut b = OpBuilder::new();
    let site = emit_push(&mut b, &mut tc.ctx, &tc.registry, GuestAddr(0x1000)).unwrap();
    let (top, end, live) = (Temp(0), Temp(1), Temp(2));
    let (in_range, not_full) = (Label(0), Label(1));

    assert_eq!(
        b.finish(),
        vec![
            Op::LdEnv { dst: top, field: EnvField::ShackTop },
            Op::LdEnv { dst: end, field: EnvField::ShackEnd },
            Op::AddI { dst: top, src: top, imm: 1 },
            Op::BrCond { cond: Cond::Lt, lhs: top, rhs: Operand::Temp(end), label: in_range },
            Op::Movi { dst: top, imm: 1 },
            Op::SetLabel(in_range),
            Op::LdEnv { dst: live, field: EnvField::ShackLive },
            Op::BrCond { cond: Cond::Lt, lhs: live, rhs: Operand::Imm(STACK_SIZE as u64), label: not_full },
            Op::Call { helper: Helper::ShackOverflow, arg: None, dst: None },
            Op::Movi { dst: live, imm: STACK_SIZE as u64 - 1 },
            Op::SetLabel(not_full),
            Op::AddI { dst: live, src: live, imm: 1 },
            Op::StEntry { index: top, part: EntryPart::Expected, value: Operand::Imm(0x1000) },
            Op::StEntry { index: top, part: EntryPart::Slot, value: Operand::Imm(site.slot.0 as u64) },
            Op::StEnv { field: EnvField::ShackTop, src: top },
            Op::StEnv { field: EnvField::ShackLive, src: live },
        ]
    );
}

#[test]
fn ibtc_lookup_sequence() {
    let mut b = OpBuilder::new();
    let target = b.new_temp();
    emit_ibtc_lookup(&mut b, target);

    assert_eq!(
        b.finish(),
        vec![
            Op::Call { helper: Helper::LookupIbtc, arg: Some(target), dst: Some(Temp(1)) },
            Op::GotoPtr { target: Temp(1) },
        ]
    );
}

#[test]
fn flush_sequence() {
    let mut b = OpBuilder::new();
    emit_flush(&mut b);
    assert_eq!(
        b.ops(),
        &[Op::Call { helper: Helper::ShackFlush, arg: None, dst: None }]
    );
}

#[test]
fn protocols_append_to_an_existing_block() {
    let mut tc = TestContext::new();
    let mut b = OpBuilder::new();
    let _ = emit_push(&mut b, &mut tc.ctx, &tc.registry, GuestAddr(0x1000)).unwrap();
    let before = b.ops().len();
    let temps = b.temp_count();

    let actual = b.new_temp();
    emit_pop(&mut b, &tc.ctx, actual);
    assert_eq!(b.ops().len(), before + 11);
    assert_eq!(b.temp_count(), temps + 5, "pop uses four temps besides its input");
}

#[test]
fn disassembly_is_readable() {
    let mut b = OpBuilder::new();
    let target = b.new_temp();
    emit_ibtc_lookup(&mut b, target);
    let text: Vec<String> = b.ops().iter().map(ToString::to_string).collect();
    assert_eq!(text, vec!["call      LookupIbtc (t0) -> t1", "goto_ptr  t1"]);
}
