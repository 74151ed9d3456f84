//! Runtime operation IR.
//!
//! The cache protocols are not function calls at runtime: they are short
//! sequences of loads, stores, compares, and indirect jumps that the code
//! generator inlines into each translation block. This module defines that
//! sequence as data so the host backend can lower it, and so it can be
//! executed and checked without a backend.
//!
//! The IR addresses context state symbolically (`EnvField`, stack entries,
//! slots) rather than through raw host pointers. A backend resolves each of
//! these to a fixed offset from its context register.

use std::fmt;

/// A virtual register holding a 64-bit value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Temp(pub u16);

/// A branch target within one operation list.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Label(pub u16);

/// Scalar fields of the execution context reachable from emitted code.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EnvField {
    /// Shadow stack top index.
    ShackTop,
    /// One past the last usable shadow stack index. Read-only.
    ShackEnd,
    /// Valid entries in a ring-mode shadow stack.
    ShackLive,
}

/// Half of a shadow stack entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EntryPart {
    /// Expected guest return address.
    Expected,
    /// Shadow slot index.
    Slot,
}

/// Comparison used by [`Op::BrCond`]. Unsigned.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Cond {
    /// Equal.
    Eq,
    /// Not equal.
    Ne,
    /// Unsigned less than.
    Lt,
    /// Unsigned greater than or equal.
    Ge,
}

impl Cond {
    /// Evaluates the condition.
    #[inline(always)]
    pub const fn holds(self, lhs: u64, rhs: u64) -> bool {
        match self {
            Self::Eq => lhs == rhs,
            Self::Ne => lhs != rhs,
            Self::Lt => lhs < rhs,
            Self::Ge => lhs >= rhs,
        }
    }
}

/// Out-of-line helpers emitted code may call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Helper {
    /// IBTC lookup: argument is the guest target, result is a host address.
    LookupIbtc,
    /// Empty the shadow stack. No argument, no result.
    ShackFlush,
    /// Account for a shadow stack overflow. Cold path only.
    ShackOverflow,
}

/// A register or a constant known at compile time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operand {
    /// Value of a temp.
    Temp(Temp),
    /// Constant.
    Imm(u64),
}

/// One runtime operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Op {
    /// `dst = env.field`
    LdEnv {
        /// Destination.
        dst: Temp,
        /// Field to read.
        field: EnvField,
    },
    /// `env.field = src`
    StEnv {
        /// Field to write.
        field: EnvField,
        /// Source.
        src: Temp,
    },
    /// `dst = stack[index].part`
    LdEntry {
        /// Destination.
        dst: Temp,
        /// Temp holding the stack index.
        index: Temp,
        /// Half of the entry to read.
        part: EntryPart,
    },
    /// `stack[index].part = value`
    StEntry {
        /// Temp holding the stack index.
        index: Temp,
        /// Half of the entry to write.
        part: EntryPart,
        /// Value to store.
        value: Operand,
    },
    /// `dst = slots[slot]`
    LdSlot {
        /// Destination.
        dst: Temp,
        /// Temp holding the slot index.
        slot: Temp,
    },
    /// `dst = imm`
    Movi {
        /// Destination.
        dst: Temp,
        /// Constant.
        imm: u64,
    },
    /// `dst = src + imm` (wrapping)
    AddI {
        /// Destination.
        dst: Temp,
        /// Source.
        src: Temp,
        /// Signed addend.
        imm: i64,
    },
    /// `if cond(lhs, rhs) goto label`
    BrCond {
        /// Comparison.
        cond: Cond,
        /// Left-hand side.
        lhs: Temp,
        /// Right-hand side.
        rhs: Operand,
        /// Target.
        label: Label,
    },
    /// Label definition.
    SetLabel(Label),
    /// Call an out-of-line helper.
    Call {
        /// Helper to call.
        helper: Helper,
        /// Argument, if the helper takes one.
        arg: Option<Temp>,
        /// Result, if the helper returns one.
        dst: Option<Temp>,
    },
    /// Leave the block and continue at the host address in `target`.
    GotoPtr {
        /// Temp holding a host code address.
        target: Temp,
    },
}

impl fmt::Display for Temp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Temp(t) => write!(f, "{t}"),
            Self::Imm(v) => write!(f, "${v:#x}"),
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LdEnv { dst, field } => write!(f, "ld_env    {dst}, {field:?}"),
            Self::StEnv { field, src } => write!(f, "st_env    {field:?}, {src}"),
            Self::LdEntry { dst, index, part } => write!(f, "ld_entry  {dst}, [{index}].{part:?}"),
            Self::StEntry { index, part, value } => {
                write!(f, "st_entry  [{index}].{part:?}, {value}")
            }
            Self::LdSlot { dst, slot } => write!(f, "ld_slot   {dst}, [{slot}]"),
            Self::Movi { dst, imm } => write!(f, "movi      {dst}, ${imm:#x}"),
            Self::AddI { dst, src, imm } => write!(f, "addi      {dst}, {src}, {imm}"),
            Self::BrCond {
                cond,
                lhs,
                rhs,
                label,
            } => write!(f, "brcond    {cond:?} {lhs}, {rhs} -> {label}"),
            Self::SetLabel(label) => write!(f, "{label}:"),
            Self::Call { helper, arg, dst } => {
                write!(f, "call      {helper:?}")?;
                if let Some(arg) = arg {
                    write!(f, " ({arg})")?;
                }
                if let Some(dst) = dst {
                    write!(f, " -> {dst}")?;
                }
                Ok(())
            }
            Self::GotoPtr { target } => write!(f, "goto_ptr  {target}"),
        }
    }
}

/// Accumulates the operations of one translation block.
///
/// Temps and labels are numbered per builder; a protocol compiler appends to
/// whatever the block already contains.
#[derive(Debug, Default, Clone)]
pub struct OpBuilder {
    ops: Vec<Op>,
    temps: u16,
    labels: u16,
}

impl OpBuilder {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a fresh temp.
    pub fn new_temp(&mut self) -> Temp {
        let t = Temp(self.temps);
        self.temps += 1;
        t
    }

    /// Allocates a fresh label. Place it with [`set_label`](Self::set_label).
    pub fn new_label(&mut self) -> Label {
        let l = Label(self.labels);
        self.labels += 1;
        l
    }

    /// Appends an operation.
    pub fn emit(&mut self, op: Op) {
        self.ops.push(op);
    }

    /// Places `label` at the current position.
    pub fn set_label(&mut self, label: Label) {
        self.emit(Op::SetLabel(label));
    }

    /// Number of temps allocated so far.
    pub const fn temp_count(&self) -> usize {
        self.temps as usize
    }

    /// Operations emitted so far.
    pub fn ops(&self) -> &[Op] {
        &self.ops
    }

    /// Consumes the builder, returning its operations.
    pub fn finish(self) -> Vec<Op> {
        self.ops
    }
}
