//! Reference lowering of the runtime operation IR.
//!
//! `Machine` executes an operation list directly against an `ExecContext`,
//! exactly as the host code produced by a backend would. It serves as the
//! executable definition of each protocol: a backend is correct when its code
//! leaves the context in the same state and exits the same way.
//!
//! Counters in [`AccelStats`](crate::stats::AccelStats) are only updated by the
//! helpers an operation list calls; plain loads and stores are not counted.

use crate::common::{AccelError, GuestAddr, HostAddr, Result};
use crate::core::ExecContext;
use crate::core::units::shadow::SlotRef;

use super::ops::{EntryPart, EnvField, Helper, Label, Op, Operand, Temp};

/// Upper bound on executed operations per run; protocol sequences only branch forward.
const MAX_STEPS: usize = 1 << 16;

/// How an operation list was left.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Exit {
    /// Control left through `GotoPtr` to this host address.
    Goto(HostAddr),
    /// Execution ran off the end; the block continues with its slow path.
    FallThrough,
}

impl Exit {
    /// The host address of a `Goto` exit.
    pub const fn target(&self) -> Option<HostAddr> {
        match self {
            Self::Goto(host) => Some(*host),
            Self::FallThrough => None,
        }
    }
}

/// Interpreter state: the context being driven and the temp file.
#[derive(Debug)]
pub struct Machine<'a> {
    ctx: &'a mut ExecContext,
    temps: Vec<Option<u64>>,
}

impl<'a> Machine<'a> {
    /// Creates a machine with every temp unset.
    pub const fn new(ctx: &'a mut ExecContext) -> Self {
        Self {
            ctx,
            temps: Vec::new(),
        }
    }

    /// Presets a temp, typically an input such as the actual return address.
    pub fn bind(&mut self, temp: Temp, value: u64) -> &mut Self {
        self.write(temp, value);
        self
    }

    /// Current value of a temp, if it has been written.
    pub fn temp(&self, temp: Temp) -> Option<u64> {
        self.temps.get(temp.0 as usize).copied().flatten()
    }

    fn write(&mut self, temp: Temp, value: u64) {
        let idx = temp.0 as usize;
        if idx >= self.temps.len() {
            self.temps.resize(idx + 1, None);
        }
        self.temps[idx] = Some(value);
    }

    fn read(&self, temp: Temp) -> Result<u64> {
        self.temp(temp)
            .ok_or_else(|| AccelError::MalformedOps(format!("{temp} read before written")))
    }

    fn operand(&self, operand: Operand) -> Result<u64> {
        match operand {
            Operand::Temp(t) => self.read(t),
            Operand::Imm(v) => Ok(v),
        }
    }

    /// Executes `ops` from the first operation.
    ///
    /// # Errors
    ///
    /// Returns [`AccelError::MalformedOps`] for an undefined label, an unset
    /// temp, a stack index out of range, a store to a read-only field, or a
    /// helper called without its argument.
    pub fn run(&mut self, ops: &[Op]) -> Result<Exit> {
        let labels = resolve_labels(ops)?;
        let mut pc = 0;
        let mut steps = 0;

        while let Some(op) = ops.get(pc) {
            steps += 1;
            if steps > MAX_STEPS {
                return Err(AccelError::MalformedOps(format!(
                    "no exit after {MAX_STEPS} operations"
                )));
            }
            pc += 1;

            match *op {
                Op::LdEnv { dst, field } => {
                    let value = match field {
                        EnvField::ShackTop => self.ctx.shadow().top(),
                        EnvField::ShackEnd => self.ctx.shadow().end(),
                        EnvField::ShackLive => self.ctx.shadow().live(),
                    };
                    self.write(dst, value as u64);
                }
                Op::StEnv { field, src } => {
                    let value = self.read(src)?;
                    match field {
                        EnvField::ShackTop => {
                            if !self.ctx.shadow_mut().set_top(value as usize) {
                                return Err(out_of_range("shadow top", value));
                            }
                        }
                        EnvField::ShackLive => {
                            if !self.ctx.shadow_mut().set_live(value as usize) {
                                return Err(out_of_range("shadow live count", value));
                            }
                        }
                        EnvField::ShackEnd => {
                            return Err(AccelError::MalformedOps(
                                "store to read-only ShackEnd".to_string(),
                            ));
                        }
                    }
                }
                Op::LdEntry { dst, index, part } => {
                    let index = self.read(index)?;
                    let entry = self
                        .ctx
                        .shadow()
                        .entry(index as usize)
                        .ok_or_else(|| out_of_range("stack index", index))?;
                    let value = match part {
                        EntryPart::Expected => entry.expected.val(),
                        EntryPart::Slot => entry.slot.0 as u64,
                    };
                    self.write(dst, value);
                }
                Op::StEntry { index, part, value } => {
                    let index = self.read(index)?;
                    let value = self.operand(value)?;
                    let stack = self.ctx.shadow_mut();
                    let mut entry = stack
                        .entry(index as usize)
                        .ok_or_else(|| out_of_range("stack index", index))?;
                    match part {
                        EntryPart::Expected => entry.expected = GuestAddr(value),
                        EntryPart::Slot => entry.slot = SlotRef(value as usize),
                    }
                    let _ = stack.write(index as usize, entry);
                }
                Op::LdSlot { dst, slot } => {
                    let slot = self.read(slot)?;
                    let host = self.ctx.slots().value(SlotRef(slot as usize));
                    self.write(dst, host.val());
                }
                Op::Movi { dst, imm } => self.write(dst, imm),
                Op::AddI { dst, src, imm } => {
                    let value = self.read(src)?.wrapping_add_signed(imm);
                    self.write(dst, value);
                }
                Op::BrCond {
                    cond,
                    lhs,
                    rhs,
                    label,
                } => {
                    if cond.holds(self.read(lhs)?, self.operand(rhs)?) {
                        pc = target(&labels, label)?;
                    }
                }
                Op::SetLabel(_) => {}
                Op::Call { helper, arg, dst } => {
                    let result = self.call(helper, arg)?;
                    if let (Some(dst), Some(value)) = (dst, result) {
                        self.write(dst, value);
                    }
                }
                Op::GotoPtr { target } => {
                    return Ok(Exit::Goto(HostAddr(self.read(target)?)));
                }
            }
        }

        Ok(Exit::FallThrough)
    }

    fn call(&mut self, helper: Helper, arg: Option<Temp>) -> Result<Option<u64>> {
        match helper {
            Helper::LookupIbtc => {
                let arg = arg.ok_or_else(|| {
                    AccelError::MalformedOps("LookupIbtc called without a target".to_string())
                })?;
                let target = GuestAddr(self.read(arg)?);
                Ok(Some(self.ctx.lookup_ibtc(target).val()))
            }
            Helper::ShackFlush => {
                self.ctx.flush_shadow_stack();
                Ok(None)
            }
            Helper::ShackOverflow => {
                self.ctx.note_overflow();
                Ok(None)
            }
        }
    }
}

/// Maps every label to the index of the operation after its definition.
fn resolve_labels(ops: &[Op]) -> Result<Vec<Option<usize>>> {
    let mut labels: Vec<Option<usize>> = Vec::new();
    for (pos, op) in ops.iter().enumerate() {
        if let Op::SetLabel(Label(id)) = *op {
            let id = id as usize;
            if id >= labels.len() {
                labels.resize(id + 1, None);
            }
            if labels[id].replace(pos + 1).is_some() {
                return Err(AccelError::MalformedOps(format!("L{id} defined twice")));
            }
        }
    }
    Ok(labels)
}

fn target(labels: &[Option<usize>], label: Label) -> Result<usize> {
    labels
        .get(label.0 as usize)
        .copied()
        .flatten()
        .ok_or_else(|| AccelError::MalformedOps(format!("{label} is never defined")))
}

fn out_of_range(what: &str, value: u64) -> AccelError {
    AccelError::MalformedOps(format!("{what} {value:#x} out of range"))
}
