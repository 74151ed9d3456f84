//! Engine: owns the TB registry and the execution context side by side.
//!
//! Keeping both in one struct lets the slow path register freshly compiled
//! blocks and run link completion without borrowing one through the other.

use std::collections::HashMap;

use tracing::debug;

use crate::common::{AccelError, GuestAddr, HostAddr, Result};
use crate::config::Config;
use crate::core::{ExecContext, PushSite, ReturnPrediction};
use crate::registry::{BlockMap, BlockRef, TbRegistry};

/// Where a control transfer ended up and how it got there.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transfer {
    /// A cache supplied the target without consulting the registry.
    Predicted(HostAddr),
    /// The slow path resolved the target.
    Resolved(HostAddr),
}

impl Transfer {
    /// Host address control continues at.
    pub const fn host(&self) -> HostAddr {
        match self {
            Self::Predicted(host) | Self::Resolved(host) => *host,
        }
    }

    /// Returns `true` if a cache supplied the target.
    pub const fn is_predicted(&self) -> bool {
        matches!(self, Self::Predicted(_))
    }
}

/// Top-level engine: registry, context, and a block compiler.
pub struct Engine<F>
where
    F: FnMut(GuestAddr) -> Option<HostAddr>,
{
    /// Registered translation blocks.
    pub registry: BlockMap,
    /// Cache state for the single CPU this engine drives.
    pub ctx: ExecContext,
    /// Compiles the block at a guest address, returning its host entry.
    compile: F,
    /// Compiled call sites keyed by the guest address of the call instruction.
    call_sites: HashMap<GuestAddr, PushSite>,
}

impl<F> std::fmt::Debug for Engine<F>
where
    F: FnMut(GuestAddr) -> Option<HostAddr>,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("registry", &self.registry)
            .field("ctx", &self.ctx)
            .field("call_sites", &self.call_sites.len())
            .finish_non_exhaustive()
    }
}

impl<F> Engine<F>
where
    F: FnMut(GuestAddr) -> Option<HostAddr>,
{
    /// Creates an engine with an empty registry.
    ///
    /// # Errors
    ///
    /// Returns [`AccelError::InvalidConfig`] if `config` fails validation.
    pub fn new(config: &Config, compile: F) -> Result<Self> {
        Ok(Self {
            registry: BlockMap::new(),
            ctx: ExecContext::new(config)?,
            compile,
            call_sites: HashMap::new(),
        })
    }

    /// Registers a block and completes any deferred links waiting for it.
    ///
    /// # Returns
    ///
    /// The number of shadow slots linked.
    pub fn register_block(&mut self, block: BlockRef) -> usize {
        if let Some(old) = self.registry.insert(block) {
            debug!(guest = %block.guest, old = %old.host, new = %block.host, "block replaced");
        }
        self.ctx.on_block_registered(block)
    }

    /// Slow path: finds the block for `guest`, compiling and registering it if needed.
    ///
    /// # Errors
    ///
    /// Returns [`AccelError::UnknownBlock`] if the compiler declines the address.
    pub fn resolve_slow(&mut self, guest: GuestAddr) -> Result<BlockRef> {
        if let Some(block) = self.registry.lookup_block(guest) {
            return Ok(block);
        }
        let host = (self.compile)(guest).ok_or(AccelError::UnknownBlock(guest))?;
        let block = BlockRef::new(guest, host);
        let _ = self.register_block(block);
        Ok(block)
    }

    /// Executes a call instruction at `site` that returns to `ret`.
    ///
    /// The first execution of a call site compiles it (allocating its slot);
    /// every execution pushes onto the shadow stack.
    ///
    /// # Errors
    ///
    /// Propagates [`AccelError::SlotsExhausted`] from compiling a new call site.
    pub fn call(&mut self, site: GuestAddr, ret: GuestAddr) -> Result<PushSite> {
        let push = match self.call_sites.get(&site) {
            Some(push) => *push,
            None => {
                let push = self.ctx.prepare_call_site(ret, &self.registry)?;
                let _ = self.call_sites.insert(site, push);
                push
            }
        };
        self.ctx.push_shadow(push);
        Ok(push)
    }

    /// Executes a return whose guest target is `actual`.
    ///
    /// # Errors
    ///
    /// Returns [`AccelError::UnknownBlock`] if the slow path cannot resolve `actual`.
    pub fn ret(&mut self, actual: GuestAddr) -> Result<Transfer> {
        match self.ctx.pop_shadow(actual) {
            ReturnPrediction::Hit(host) => Ok(Transfer::Predicted(host)),
            ReturnPrediction::Mismatch | ReturnPrediction::Unresolved => {
                Ok(Transfer::Resolved(self.resolve_slow(actual)?.host))
            }
        }
    }

    /// Executes an indirect jump to `target`.
    ///
    /// # Errors
    ///
    /// Returns [`AccelError::UnknownBlock`] if the slow path cannot resolve `target`.
    pub fn indirect_jump(&mut self, target: GuestAddr) -> Result<Transfer> {
        let host = self.ctx.lookup_ibtc(target);
        if !self.ctx.ibtc_update_pending() {
            return Ok(Transfer::Predicted(host));
        }
        let block = self.resolve_slow(target)?;
        self.ctx.update_ibtc(block);
        Ok(Transfer::Resolved(block.host))
    }

    /// Number of compiled call sites.
    pub fn call_sites(&self) -> usize {
        self.call_sites.len()
    }

    /// Discards every block, call site, and cache entry.
    pub fn flush_code(&mut self) {
        self.registry = BlockMap::new();
        self.call_sites.clear();
        self.ctx.reset();
    }
}
