//! Protocol compilers.
//!
//! Each function here appends the runtime half of one cache protocol to the
//! block under construction. Compile-time work (slot allocation, linking) is
//! done immediately against the context; what is left is emitted as `Op`s that
//! run every time the translated instruction executes.
//!
//! Every sequence is straight-line apart from forward branches, touches a fixed
//! number of locations, and never allocates.

use crate::common::constants::SHACK_BASE;
use crate::common::{GuestAddr, HostAddr, Result};
use crate::config::OverflowPolicy;
use crate::core::{ExecContext, PushSite};
use crate::registry::TbRegistry;

use super::ops::{Cond, EntryPart, EnvField, Helper, Op, OpBuilder, Operand, Temp};

/// Emits the push protocol for a call whose guest return address is `ret`.
///
/// Allocates the call site's shadow slot and links it (now or deferred), then
/// emits: advance the top, restart it past the base when it reaches the end,
/// store `(ret, slot)` at the new top, store the top back. Under
/// [`OverflowPolicy::Wrap`] the ring's live count is maintained as well and the
/// overflow helper runs only when a valid entry is overwritten.
///
/// # Errors
///
/// Propagates [`AccelError::SlotsExhausted`](crate::common::AccelError::SlotsExhausted);
/// nothing is emitted in that case.
pub fn emit_push<R: TbRegistry + ?Sized>(
    b: &mut OpBuilder,
    ctx: &mut ExecContext,
    registry: &R,
    ret: GuestAddr,
) -> Result<PushSite> {
    let site = ctx.prepare_call_site(ret, registry)?;
    let capacity = ctx.shadow().capacity() as u64;

    let top = b.new_temp();
    let end = b.new_temp();
    let in_range = b.new_label();

    b.emit(Op::LdEnv {
        dst: top,
        field: EnvField::ShackTop,
    });
    b.emit(Op::LdEnv {
        dst: end,
        field: EnvField::ShackEnd,
    });
    b.emit(Op::AddI {
        dst: top,
        src: top,
        imm: 1,
    });
    b.emit(Op::BrCond {
        cond: Cond::Lt,
        lhs: top,
        rhs: Operand::Temp(end),
        label: in_range,
    });

    let live = match ctx.overflow_policy() {
        OverflowPolicy::Reset => {
            emit_overflow(b);
            b.emit(Op::Movi {
                dst: top,
                imm: (SHACK_BASE + 1) as u64,
            });
            b.set_label(in_range);
            None
        }
        OverflowPolicy::Wrap => {
            b.emit(Op::Movi {
                dst: top,
                imm: (SHACK_BASE + 1) as u64,
            });
            b.set_label(in_range);

            let live = b.new_temp();
            let not_full = b.new_label();
            b.emit(Op::LdEnv {
                dst: live,
                field: EnvField::ShackLive,
            });
            b.emit(Op::BrCond {
                cond: Cond::Lt,
                lhs: live,
                rhs: Operand::Imm(capacity),
                label: not_full,
            });
            emit_overflow(b);
            // Full ring: the increment below leaves the count at capacity.
            b.emit(Op::Movi {
                dst: live,
                imm: capacity - 1,
            });
            b.set_label(not_full);
            b.emit(Op::AddI {
                dst: live,
                src: live,
                imm: 1,
            });
            Some(live)
        }
    };

    b.emit(Op::StEntry {
        index: top,
        part: EntryPart::Expected,
        value: Operand::Imm(ret.val()),
    });
    b.emit(Op::StEntry {
        index: top,
        part: EntryPart::Slot,
        value: Operand::Imm(site.slot.0 as u64),
    });
    b.emit(Op::StEnv {
        field: EnvField::ShackTop,
        src: top,
    });
    if let Some(live) = live {
        b.emit(Op::StEnv {
            field: EnvField::ShackLive,
            src: live,
        });
    }

    Ok(site)
}

fn emit_overflow(b: &mut OpBuilder) {
    b.emit(Op::Call {
        helper: Helper::ShackOverflow,
        arg: None,
        dst: None,
    });
}

/// Emits the pop protocol for a return whose actual guest target is in `actual`.
///
/// On a confirmed prediction with a linked slot the sequence ends in
/// [`Op::GotoPtr`]. Every other path falls off the end of the sequence, where
/// the caller emits its slow-path exit.
pub fn emit_pop(b: &mut OpBuilder, ctx: &ExecContext, actual: Temp) {
    let top = b.new_temp();
    let expected = b.new_temp();
    let slot = b.new_temp();
    let host = b.new_temp();
    let miss = b.new_label();

    b.emit(Op::LdEnv {
        dst: top,
        field: EnvField::ShackTop,
    });
    b.emit(Op::BrCond {
        cond: Cond::Eq,
        lhs: top,
        rhs: Operand::Imm(SHACK_BASE as u64),
        label: miss,
    });
    b.emit(Op::LdEntry {
        dst: expected,
        index: top,
        part: EntryPart::Expected,
    });
    b.emit(Op::BrCond {
        cond: Cond::Ne,
        lhs: actual,
        rhs: Operand::Temp(expected),
        label: miss,
    });
    b.emit(Op::LdEntry {
        dst: slot,
        index: top,
        part: EntryPart::Slot,
    });
    b.emit(Op::LdSlot { dst: host, slot });
    b.emit(Op::AddI {
        dst: top,
        src: top,
        imm: -1,
    });
    if ctx.overflow_policy() == OverflowPolicy::Wrap {
        emit_ring_retreat(b, top, ctx.shadow().capacity() as u64);
    } else {
        b.emit(Op::StEnv {
            field: EnvField::ShackTop,
            src: top,
        });
    }
    b.emit(Op::BrCond {
        cond: Cond::Eq,
        lhs: host,
        rhs: Operand::Imm(HostAddr::UNRESOLVED.val()),
        label: miss,
    });
    b.emit(Op::GotoPtr { target: host });
    b.set_label(miss);
}

/// Ring-mode tail of a pop: `top` has already been decremented.
///
/// Wraps the top from the base to the last entry, then parks it on the base if
/// the popped entry was the last valid one, and stores top and live count.
fn emit_ring_retreat(b: &mut OpBuilder, top: Temp, capacity: u64) {
    let live = b.new_temp();
    let stepped = b.new_label();
    let stored = b.new_label();

    b.emit(Op::LdEnv {
        dst: live,
        field: EnvField::ShackLive,
    });
    b.emit(Op::AddI {
        dst: live,
        src: live,
        imm: -1,
    });
    b.emit(Op::BrCond {
        cond: Cond::Ne,
        lhs: top,
        rhs: Operand::Imm(SHACK_BASE as u64),
        label: stepped,
    });
    b.emit(Op::Movi {
        dst: top,
        imm: capacity,
    });
    b.set_label(stepped);
    b.emit(Op::BrCond {
        cond: Cond::Ne,
        lhs: live,
        rhs: Operand::Imm(0),
        label: stored,
    });
    b.emit(Op::Movi {
        dst: top,
        imm: SHACK_BASE as u64,
    });
    b.set_label(stored);
    b.emit(Op::StEnv {
        field: EnvField::ShackTop,
        src: top,
    });
    b.emit(Op::StEnv {
        field: EnvField::ShackLive,
        src: live,
    });
}

/// Emits the IBTC lookup protocol for an indirect jump to the guest address in `target`.
///
/// The helper returns either the cached host entry or the dispatcher stub, so
/// the sequence always leaves through [`Op::GotoPtr`].
pub fn emit_ibtc_lookup(b: &mut OpBuilder, target: Temp) {
    let host = b.new_temp();
    b.emit(Op::Call {
        helper: Helper::LookupIbtc,
        arg: Some(target),
        dst: Some(host),
    });
    b.emit(Op::GotoPtr { target: host });
}

/// Emits a shadow stack flush.
pub fn emit_flush(b: &mut OpBuilder) {
    b.emit(Op::Call {
        helper: Helper::ShackFlush,
        arg: None,
        dst: None,
    });
}
